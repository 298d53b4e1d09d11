//! Axum route handlers for the Interview API.
//!
//! Handlers sequence the remote conversation calls around the ledger:
//! create conversation → `start_session`, and end conversation → `end_session`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::interview::ledger::{Balance, EndedSession, RemainingTime, StartedSession};
use crate::models::interview::{InterviewSessionRow, SessionStatus};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: Uuid,
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// Set when the client already opened the remote conversation itself.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionOwner {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Uuid,
    pub limit: Option<i64>,
}

#[derive(Clone, Copy)]
enum EndKind {
    Graceful,
    Timeout,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/interviews/sessions
pub async fn handle_start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartedSession>, AppError> {
    if req.role.trim().is_empty() {
        return Err(AppError::Validation("role cannot be empty".to_string()));
    }

    let (conversation_id, opened_here) = match req.conversation_id {
        Some(id) => (id, false),
        None => {
            // Check balance and reuse before paying for a remote conversation.
            if let Some(existing) = state.ledger.check_start(req.user_id).await? {
                return Ok(Json(existing));
            }
            let id = state
                .conversations
                .create_conversation(&req.role, &req.description)
                .await?;
            (id, true)
        }
    };

    let started = state
        .ledger
        .start_session(req.user_id, &req.role, &req.description, &conversation_id)
        .await;

    match started {
        Ok(started) => {
            if opened_here && started.reused {
                release_conversation(&state, &conversation_id).await;
            }
            Ok(Json(started))
        }
        Err(e) => {
            if opened_here {
                release_conversation(&state, &conversation_id).await;
            }
            Err(e.into())
        }
    }
}

/// POST /api/v1/interviews/sessions/:id/end
pub async fn handle_end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(owner): Json<SessionOwner>,
) -> Result<Json<EndedSession>, AppError> {
    close_session(&state, session_id, owner.user_id, EndKind::Graceful).await
}

/// POST /api/v1/interviews/sessions/:id/timeout
pub async fn handle_timeout_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(owner): Json<SessionOwner>,
) -> Result<Json<EndedSession>, AppError> {
    close_session(&state, session_id, owner.user_id, EndKind::Timeout).await
}

/// GET /api/v1/interviews/sessions/:id/remaining
///
/// Polled every second or so by the countdown display.
pub async fn handle_remaining_time(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<RemainingTime>, AppError> {
    Ok(Json(state.ledger.get_remaining_time(session_id).await?))
}

/// GET /api/v1/interviews/balance
pub async fn handle_balance(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Balance>, AppError> {
    Ok(Json(state.ledger.balance(params.user_id).await?))
}

/// GET /api/v1/interviews/sessions
pub async fn handle_session_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<InterviewSessionRow>>, AppError> {
    Ok(Json(
        state
            .ledger
            .session_history(params.user_id, params.limit)
            .await?,
    ))
}

/// Stops the remote conversation, then records the end in the ledger.
/// If the remote stop fails the ledger is left untouched.
async fn close_session(
    state: &AppState,
    session_id: Uuid,
    user_id: Uuid,
    kind: EndKind,
) -> Result<Json<EndedSession>, AppError> {
    let session = state.ledger.owned_session(session_id, user_id).await?;

    if session.status() == Some(SessionStatus::Active) {
        if let Err(e) = state
            .conversations
            .end_conversation(&session.conversation_id)
            .await
        {
            error!(
                "Failed to stop conversation {} for session {session_id}; ledger not updated: {e}",
                session.conversation_id
            );
            return Err(e.into());
        }
    }

    let ended = match kind {
        EndKind::Graceful => state.ledger.end_session(session_id, user_id).await?,
        EndKind::Timeout => state.ledger.force_end_session(session_id, user_id).await?,
    };
    Ok(Json(ended))
}

async fn release_conversation(state: &AppState, conversation_id: &str) {
    if let Err(e) = state.conversations.end_conversation(conversation_id).await {
        warn!("Failed to release unused conversation {conversation_id}: {e}");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
