pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::interview::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Interview API
        .route(
            "/api/v1/interviews/sessions",
            get(handlers::handle_session_history).post(handlers::handle_start_session),
        )
        .route(
            "/api/v1/interviews/sessions/:id/end",
            post(handlers::handle_end_session),
        )
        .route(
            "/api/v1/interviews/sessions/:id/timeout",
            post(handlers::handle_timeout_session),
        )
        .route(
            "/api/v1/interviews/sessions/:id/remaining",
            get(handlers::handle_remaining_time),
        )
        .route("/api/v1/interviews/balance", get(handlers::handle_balance))
        .with_state(state)
}
