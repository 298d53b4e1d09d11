//! Interview Session Ledger — owns the lifecycle of timed interview sessions and the
//! user's remaining interview time.
//!
//! Rules:
//! - A session can only start when the balance is at least `min_start_balance_minutes`.
//! - At most one ACTIVE session per user; repeated starts return the live session.
//! - Consumed time is charged exactly once, on the ACTIVE → terminal transition,
//!   rounded up to whole minutes and clamped so the balance never goes negative.
//! - Ending a session that is already terminal is a successful no-op.
//!
//! The ledger keeps no in-memory state between calls. Expiry is driven by the
//! caller polling `get_remaining_time` and invoking `force_end_session`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::interview::clock::Clock;
use crate::interview::store::{InsertOutcome, LedgerStore, NewSession, SessionClose};
use crate::interview::timing::{
    balance_to_seconds, billed_minutes, elapsed_seconds, warning_level, WarningLevel,
};
use crate::models::interview::{InterviewSessionRow, SessionStatus};

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Tunables for the ledger. The start threshold and the polling warning bands
/// are independent of each other.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub min_start_balance_minutes: f64,
    pub critical_warning_seconds: i64,
    pub low_warning_seconds: i64,
    pub min_conversation_id_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_start_balance_minutes: 0.1,
            critical_warning_seconds: 10,
            low_warning_seconds: 15,
            min_conversation_id_len: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient interview time: {remaining_seconds}s remaining")]
    InsufficientBalance { remaining_seconds: i64 },

    #[error("Invalid conversation reference")]
    InvalidExternalReference,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {0} does not belong to the caller")]
    Unauthorized(Uuid),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    /// True when an already ACTIVE session was returned instead of a new one.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndedSession {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub duration_seconds: i64,
    pub ended_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    /// True when the session was already terminal and nothing changed.
    pub already_ended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingTime {
    pub remaining_seconds: i64,
    pub should_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_level: Option<WarningLevel>,
}

impl RemainingTime {
    fn ended() -> Self {
        Self {
            remaining_seconds: 0,
            should_end: true,
            warning_level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub balance_minutes: f64,
    pub remaining_seconds: i64,
}

pub struct SessionLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Balance gate plus active-session lookup. Returns the live session when one
    /// exists, `None` when the user may start a new one.
    pub async fn check_start(&self, user_id: Uuid) -> Result<Option<StartedSession>, LedgerError> {
        let balance = self.require_balance(user_id).await?;
        let remaining_seconds = balance_to_seconds(balance);

        if balance < self.config.min_start_balance_minutes {
            info!("User {user_id} cannot start an interview: {remaining_seconds}s remaining");
            return Err(LedgerError::InsufficientBalance { remaining_seconds });
        }

        Ok(self
            .store
            .active_session(user_id)
            .await?
            .map(|existing| reuse(existing, remaining_seconds)))
    }

    /// Starts a timed session, or returns the user's live one.
    pub async fn start_session(
        &self,
        user_id: Uuid,
        role: &str,
        description: &str,
        conversation_id: &str,
    ) -> Result<StartedSession, LedgerError> {
        if let Some(existing) = self.check_start(user_id).await? {
            info!(
                "Reusing active session {} for user {user_id}",
                existing.session_id
            );
            return Ok(existing);
        }

        let conversation_id = conversation_id.trim();
        if conversation_id.len() < self.config.min_conversation_id_len {
            warn!("Rejected conversation reference {conversation_id:?} for user {user_id}");
            return Err(LedgerError::InvalidExternalReference);
        }

        let started_at = self.clock.now();
        let outcome = self
            .store
            .insert_session(NewSession {
                user_id,
                conversation_id,
                role,
                description,
                started_at,
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(row) => {
                let balance = self.require_balance(user_id).await?;
                info!(
                    "Started interview session {} for user {user_id} (conversation {conversation_id})",
                    row.id
                );
                Ok(StartedSession {
                    session_id: row.id,
                    started_at: row.started_at,
                    remaining_seconds: balance_to_seconds(balance),
                    reused: false,
                })
            }
            InsertOutcome::ActiveExists => {
                // A concurrent start won; hand back its session.
                warn!("Concurrent start for user {user_id}; returning the winning session");
                self.check_start(user_id).await?.ok_or_else(|| {
                    LedgerError::InvalidState(format!(
                        "insert for user {user_id} conflicted but no active session exists"
                    ))
                })
            }
        }
    }

    /// Graceful end requested by the user.
    pub async fn end_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<EndedSession, LedgerError> {
        self.finish(session_id, user_id, SessionStatus::Ended).await
    }

    /// System-initiated end once the balance is exhausted.
    pub async fn force_end_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<EndedSession, LedgerError> {
        self.finish(session_id, user_id, SessionStatus::Timeout).await
    }

    /// Countdown for a polling client. Read-only; a missing session reads as ended.
    pub async fn get_remaining_time(&self, session_id: Uuid) -> Result<RemainingTime, LedgerError> {
        let Some(found) = self.store.session_with_balance(session_id).await? else {
            return Ok(RemainingTime::ended());
        };

        if found.session.status() != Some(SessionStatus::Active) {
            return Ok(RemainingTime::ended());
        }

        let elapsed = elapsed_seconds(found.session.started_at, self.clock.now());
        let remaining_seconds = (balance_to_seconds(found.balance_minutes) - elapsed).max(0);

        Ok(RemainingTime {
            remaining_seconds,
            should_end: found.balance_minutes <= 0.0 || remaining_seconds <= 0,
            warning_level: warning_level(
                remaining_seconds,
                self.config.critical_warning_seconds,
                self.config.low_warning_seconds,
            ),
        })
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Balance, LedgerError> {
        let balance_minutes = self.require_balance(user_id).await?;
        Ok(Balance {
            balance_minutes,
            remaining_seconds: balance_to_seconds(balance_minutes),
        })
    }

    pub async fn session_history(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<InterviewSessionRow>, LedgerError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store.sessions_for_user(user_id, limit).await?)
    }

    /// Session lookup with ownership check, for callers that need the conversation
    /// reference before tearing it down.
    pub async fn owned_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<InterviewSessionRow, LedgerError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Session {session_id} not found")))?;

        if session.user_id != user_id {
            warn!("User {user_id} attempted to access session {session_id} owned by another user");
            return Err(LedgerError::Unauthorized(session_id));
        }
        Ok(session)
    }

    async fn finish(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        terminal: SessionStatus,
    ) -> Result<EndedSession, LedgerError> {
        let session = self.owned_session(session_id, user_id).await?;

        match session.status() {
            Some(status) if status.is_terminal() => return self.already_ended(session).await,
            Some(SessionStatus::Active) => {}
            _ => {
                return Err(LedgerError::InvalidState(format!(
                    "session {session_id} has status {}",
                    session.status
                )))
            }
        }

        let ended_at = self.clock.now();
        let duration_seconds = elapsed_seconds(session.started_at, ended_at);
        let charged = billed_minutes(duration_seconds);

        let closed = self
            .store
            .close_session(SessionClose {
                session_id,
                status: terminal,
                ended_at,
                duration_seconds,
                billed_minutes: charged,
            })
            .await?;

        let Some(closed) = closed else {
            // Someone else closed it between our read and the update.
            let session = self.owned_session(session_id, user_id).await?;
            return match session.status() {
                Some(status) if status.is_terminal() => self.already_ended(session).await,
                _ => Err(LedgerError::InvalidState(format!(
                    "session {session_id} could not be closed from status {}",
                    session.status
                ))),
            };
        };

        info!(
            "Session {session_id} {terminal} after {duration_seconds}s; charged {charged} min, balance now {:.2} min",
            closed.balance_minutes
        );

        let row = closed.session;
        Ok(EndedSession {
            session_id,
            status: row.status().unwrap_or(terminal),
            duration_seconds: row.duration_seconds.unwrap_or(duration_seconds),
            ended_at: row.ended_at.unwrap_or(ended_at),
            remaining_seconds: balance_to_seconds(closed.balance_minutes),
            already_ended: false,
        })
    }

    async fn already_ended(
        &self,
        session: InterviewSessionRow,
    ) -> Result<EndedSession, LedgerError> {
        let status = session.status().ok_or_else(|| {
            LedgerError::InvalidState(format!("session {} has status {}", session.id, session.status))
        })?;
        let ended_at = session.ended_at.ok_or_else(|| {
            LedgerError::InvalidState(format!("terminal session {} has no end time", session.id))
        })?;
        let balance = self.require_balance(session.user_id).await?;

        warn!(
            "Session {} already {status}; end request ignored",
            session.id
        );

        Ok(EndedSession {
            session_id: session.id,
            status,
            duration_seconds: session.duration_seconds.unwrap_or(0),
            ended_at,
            remaining_seconds: balance_to_seconds(balance),
            already_ended: true,
        })
    }

    async fn require_balance(&self, user_id: Uuid) -> Result<f64, LedgerError> {
        self.store
            .user_balance(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("User {user_id} not found")))
    }
}

fn reuse(existing: InterviewSessionRow, remaining_seconds: i64) -> StartedSession {
    StartedSession {
        session_id: existing.id,
        started_at: existing.started_at,
        remaining_seconds,
        reused: true,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
