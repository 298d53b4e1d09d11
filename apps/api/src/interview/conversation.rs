//! Conversation gateway — starts and stops the remote real-time interviewer.
//!
//! The ledger never talks to the vendor. Handlers call the gateway around the
//! ledger operations: a conversation is created before `start_session`, and torn
//! down before `end_session` / `force_end_session`. A failed teardown aborts the
//! ledger update so a live remote session is never recorded as ended.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Conversation API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Conversation API returned no conversation id")]
    MissingId,
}

#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// Opens a remote conversation and returns its id.
    async fn create_conversation(
        &self,
        role: &str,
        description: &str,
    ) -> Result<String, ConversationError>;

    /// Stops a remote conversation. A conversation that no longer exists counts as stopped.
    async fn end_conversation(&self, conversation_id: &str) -> Result<(), ConversationError>;
}

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    conversational_context: String,
    custom_greeting: String,
    properties: ConversationProperties<'a>,
}

#[derive(Debug, Serialize)]
struct ConversationProperties<'a> {
    max_call_duration: u32,
    participant_left_timeout: u32,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    conversation_id: Option<String>,
}

/// REST client for the conversational-video vendor.
#[derive(Clone)]
pub struct HttpConversationClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpConversationClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Sends a request built by `build`, retrying 429 and 5xx with exponential backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, ConversationError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut last_error: Option<ConversationError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 500ms, 1s
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "Conversation API attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match build().header("x-api-key", &self.api_key).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ConversationError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Conversation API returned {}: {}", status, body);
                last_error = Some(ConversationError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(ConversationError::Api {
            status: 0,
            message: format!("gave up after {MAX_RETRIES} attempts"),
        }))
    }
}

#[async_trait]
impl ConversationGateway for HttpConversationClient {
    async fn create_conversation(
        &self,
        role: &str,
        description: &str,
    ) -> Result<String, ConversationError> {
        let body = CreateConversationRequest {
            conversational_context: interviewer_context(role, description),
            custom_greeting: format!(
                "Hi, thanks for joining. Let's begin your interview for the {role} position."
            ),
            properties: ConversationProperties {
                max_call_duration: 3600,
                participant_left_timeout: 60,
                language: "english",
            },
        };
        let url = format!("{}/conversations", self.base_url);

        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConversationError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let created: CreateConversationResponse = response.json().await?;
        let id = created
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConversationError::MissingId)?;

        debug!("Created remote conversation {id}");
        Ok(id)
    }

    async fn end_conversation(&self, conversation_id: &str) -> Result<(), ConversationError> {
        let url = format!("{}/conversations/{}/end", self.base_url, conversation_id);

        let response = self.send_with_retry(|| self.client.post(&url)).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!("Remote conversation {conversation_id} already gone");
            return Ok(());
        }
        if !status.is_success() {
            return Err(ConversationError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        debug!("Ended remote conversation {conversation_id}");
        Ok(())
    }
}

/// Briefing given to the remote interviewer persona.
fn interviewer_context(role: &str, description: &str) -> String {
    let role = role.trim();
    let description = description.trim();
    if description.is_empty() {
        format!("You are interviewing a candidate for the role of {role}. Ask one question at a time.")
    } else {
        format!(
            "You are interviewing a candidate for the role of {role}. Ask one question at a time.\n\nJob description:\n{description}"
        )
    }
}
