use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an interview session. Stored as upper-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Ended,
    Timeout,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Ended => "ENDED",
            SessionStatus::Timeout => "TIMEOUT",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(SessionStatus::Active),
            "ENDED" => Some(SessionStatus::Ended),
            "TIMEOUT" => Some(SessionStatus::Timeout),
            "CANCELLED" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal sessions are never transitioned again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InterviewSessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: String,
    pub role: String,
    pub description: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl InterviewSessionRow {
    /// Parsed status; `None` if the column holds something this build does not know.
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }
}
