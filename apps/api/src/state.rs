use std::sync::Arc;

use crate::interview::conversation::ConversationGateway;
use crate::interview::ledger::SessionLedger;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<SessionLedger>,
    /// Remote interviewer sessions. Default: HttpConversationClient.
    pub conversations: Arc<dyn ConversationGateway>,
}
