//! Storage seam for the interview ledger.
//!
//! `SessionLedger` holds an `Arc<dyn LedgerStore>`. Production uses `PgLedgerStore`;
//! unit tests use the in-memory store in `memory`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::models::interview::{InterviewSessionRow, SessionStatus};

/// Row to insert when a user starts a new session.
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub user_id: Uuid,
    pub conversation_id: &'a str,
    pub role: &'a str,
    pub description: &'a str,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(InterviewSessionRow),
    /// The one-active-session-per-user constraint rejected the insert.
    ActiveExists,
}

/// Terminal transition for a session plus the minutes to charge its owner.
#[derive(Debug, Clone, Copy)]
pub struct SessionClose {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub billed_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ClosedSession {
    pub session: InterviewSessionRow,
    pub balance_minutes: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionWithBalance {
    #[sqlx(flatten)]
    pub session: InterviewSessionRow,
    pub balance_minutes: f64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// `None` when the user does not exist.
    async fn user_balance(&self, user_id: Uuid) -> Result<Option<f64>>;

    async fn active_session(&self, user_id: Uuid) -> Result<Option<InterviewSessionRow>>;

    async fn insert_session(&self, new: NewSession<'_>) -> Result<InsertOutcome>;

    async fn session(&self, session_id: Uuid) -> Result<Option<InterviewSessionRow>>;

    /// Session and its owner's balance in one read.
    async fn session_with_balance(&self, session_id: Uuid) -> Result<Option<SessionWithBalance>>;

    /// Atomically moves an ACTIVE session to `close.status` and charges the owner,
    /// clamping the balance at zero. Returns `None` (and changes nothing) when the
    /// session is no longer ACTIVE.
    async fn close_session(&self, close: SessionClose) -> Result<Option<ClosedSession>>;

    /// Newest first.
    async fn sessions_for_user(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<InterviewSessionRow>>;
}

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn user_balance(&self, user_id: Uuid) -> Result<Option<f64>> {
        Ok(
            sqlx::query_scalar("SELECT balance_minutes FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn active_session(&self, user_id: Uuid) -> Result<Option<InterviewSessionRow>> {
        Ok(sqlx::query_as::<_, InterviewSessionRow>(
            "SELECT * FROM interview_sessions WHERE user_id = $1 AND status = 'ACTIVE' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_session(&self, new: NewSession<'_>) -> Result<InsertOutcome> {
        let inserted = sqlx::query_as::<_, InterviewSessionRow>(
            r#"
            INSERT INTO interview_sessions
                (id, user_id, conversation_id, role, description, status, started_at)
            VALUES ($1, $2, $3, $4, $5, 'ACTIVE', $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.conversation_id)
        .bind(new.role)
        .bind(new.description)
        .bind(new.started_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(InsertOutcome::Inserted(row)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!("Active session already exists for user {}", new.user_id);
                Ok(InsertOutcome::ActiveExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<InterviewSessionRow>> {
        Ok(
            sqlx::query_as::<_, InterviewSessionRow>(
                "SELECT * FROM interview_sessions WHERE id = $1",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?,
        )
    }

    async fn session_with_balance(&self, session_id: Uuid) -> Result<Option<SessionWithBalance>> {
        Ok(sqlx::query_as::<_, SessionWithBalance>(
            r#"
            SELECT s.*, u.balance_minutes
            FROM interview_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn close_session(&self, close: SessionClose) -> Result<Option<ClosedSession>> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-set: only the caller that still sees ACTIVE gets a row back.
        let session = sqlx::query_as::<_, InterviewSessionRow>(
            r#"
            UPDATE interview_sessions
            SET status = $2, ended_at = $3, duration_seconds = $4
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(close.session_id)
        .bind(close.status.as_str())
        .bind(close.ended_at)
        .bind(close.duration_seconds)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(session) = session else {
            tx.rollback().await?;
            return Ok(None);
        };

        let balance_minutes: f64 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET balance_minutes = GREATEST(balance_minutes - $2, 0)
            WHERE id = $1
            RETURNING balance_minutes
            "#,
        )
        .bind(session.user_id)
        .bind(close.billed_minutes as f64)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ClosedSession {
            session,
            balance_minutes,
        }))
    }

    async fn sessions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<InterviewSessionRow>> {
        Ok(sqlx::query_as::<_, InterviewSessionRow>(
            "SELECT * FROM interview_sessions WHERE user_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory `LedgerStore` honouring the same constraints as the Postgres schema.

    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;
    use crate::interview::timing::deduct_minutes;

    #[derive(Default)]
    struct Inner {
        balances: HashMap<Uuid, f64>,
        sessions: Vec<InterviewSessionRow>,
    }

    #[derive(Default)]
    pub struct MemoryLedgerStore {
        inner: Mutex<Inner>,
    }

    impl MemoryLedgerStore {
        pub async fn add_user(&self, balance_minutes: f64) -> Uuid {
            let id = Uuid::new_v4();
            self.inner.lock().await.balances.insert(id, balance_minutes);
            id
        }

        pub async fn balance_of(&self, user_id: Uuid) -> f64 {
            self.inner.lock().await.balances[&user_id]
        }

        pub async fn set_balance(&self, user_id: Uuid, balance_minutes: f64) {
            self.inner
                .lock()
                .await
                .balances
                .insert(user_id, balance_minutes);
        }

        pub async fn put_session(&self, row: InterviewSessionRow) {
            self.inner.lock().await.sessions.push(row);
        }

        pub async fn session_count(&self, user_id: Uuid) -> usize {
            self.inner
                .lock()
                .await
                .sessions
                .iter()
                .filter(|s| s.user_id == user_id)
                .count()
        }
    }

    #[async_trait]
    impl LedgerStore for MemoryLedgerStore {
        async fn user_balance(&self, user_id: Uuid) -> Result<Option<f64>> {
            Ok(self.inner.lock().await.balances.get(&user_id).copied())
        }

        async fn active_session(&self, user_id: Uuid) -> Result<Option<InterviewSessionRow>> {
            Ok(self
                .inner
                .lock()
                .await
                .sessions
                .iter()
                .find(|s| s.user_id == user_id && s.status == SessionStatus::Active.as_str())
                .cloned())
        }

        async fn insert_session(&self, new: NewSession<'_>) -> Result<InsertOutcome> {
            let mut inner = self.inner.lock().await;
            let exists = inner
                .sessions
                .iter()
                .any(|s| s.user_id == new.user_id && s.status == SessionStatus::Active.as_str());
            if exists {
                return Ok(InsertOutcome::ActiveExists);
            }
            let row = InterviewSessionRow {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                conversation_id: new.conversation_id.to_string(),
                role: new.role.to_string(),
                description: new.description.to_string(),
                status: SessionStatus::Active.as_str().to_string(),
                started_at: new.started_at,
                ended_at: None,
                duration_seconds: None,
            };
            inner.sessions.push(row.clone());
            Ok(InsertOutcome::Inserted(row))
        }

        async fn session(&self, session_id: Uuid) -> Result<Option<InterviewSessionRow>> {
            Ok(self
                .inner
                .lock()
                .await
                .sessions
                .iter()
                .find(|s| s.id == session_id)
                .cloned())
        }

        async fn session_with_balance(
            &self,
            session_id: Uuid,
        ) -> Result<Option<SessionWithBalance>> {
            let inner = self.inner.lock().await;
            Ok(inner
                .sessions
                .iter()
                .find(|s| s.id == session_id)
                .and_then(|s| {
                    inner.balances.get(&s.user_id).map(|b| SessionWithBalance {
                        session: s.clone(),
                        balance_minutes: *b,
                    })
                }))
        }

        async fn close_session(&self, close: SessionClose) -> Result<Option<ClosedSession>> {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.sessions.iter_mut().find(|s| {
                s.id == close.session_id && s.status == SessionStatus::Active.as_str()
            }) else {
                return Ok(None);
            };
            session.status = close.status.as_str().to_string();
            session.ended_at = Some(close.ended_at);
            session.duration_seconds = Some(close.duration_seconds);
            let session = session.clone();

            let balance = inner.balances.entry(session.user_id).or_insert(0.0);
            *balance = deduct_minutes(*balance, close.billed_minutes);
            let balance_minutes = *balance;

            Ok(Some(ClosedSession {
                session,
                balance_minutes,
            }))
        }

        async fn sessions_for_user(
            &self,
            user_id: Uuid,
            limit: i64,
        ) -> Result<Vec<InterviewSessionRow>> {
            let inner = self.inner.lock().await;
            let mut rows: Vec<_> = inner
                .sessions
                .iter()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            rows.truncate(limit.max(0) as usize);
            Ok(rows)
        }
    }
}
