//! Agent capability descriptor discovery.
//!
//! The card lives at `{endpoint}/.well-known/agent.json` and is fetched once
//! per client lifetime; its `capabilities.streaming` flag (together with the
//! caller's `force_poll`) decides the update-delivery strategy.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::AuthHeaderSource;
use crate::error::{ClientError, ClientResult};
use crate::transport::map_reqwest_error;
use crate::types::AgentCard;

/// Well-known path for the agent card.
const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

/// Resolves [`AgentCard`]s from agent base URLs.
#[derive(Clone)]
pub struct CardResolver {
    client: reqwest::Client,
    auth: Arc<dyn AuthHeaderSource>,
}

impl std::fmt::Debug for CardResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardResolver").finish_non_exhaustive()
    }
}

impl CardResolver {
    /// Create a resolver sharing an HTTP client and auth source.
    pub fn new(client: reqwest::Client, auth: Arc<dyn AuthHeaderSource>) -> Self {
        Self { client, auth }
    }

    /// Fetch and parse the agent card from the given base URL.
    ///
    /// # Errors
    ///
    /// [`ClientError::Authentication`] if the header provider fails,
    /// [`ClientError::Transport`] on connection failures, [`ClientError::Http`]
    /// on non-2xx responses, [`ClientError::InvalidJson`] on parse failures,
    /// and [`ClientError::Aborted`] if `token` is cancelled.
    pub async fn resolve(&self, base_url: &str, token: &CancelToken) -> ClientResult<AgentCard> {
        let base = base_url.trim_end_matches('/');
        let url = format!("{base}{AGENT_CARD_PATH}");

        tracing::debug!(%url, "resolving agent card");

        let headers = self.auth.auth_headers().await.map_err(|e| match e {
            ClientError::Authentication(_) => e,
            other => ClientError::Authentication(other.to_string()),
        })?;

        let mut builder = self.client.get(&url).header("Accept", "application/json");
        for (key, value) in headers {
            builder = builder.header(key, value);
        }

        let fut = builder.send();
        let response = tokio::select! {
            _ = token.cancelled() => return Err(ClientError::Aborted),
            res = fut => res.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read agent card: {e}")))?;

        let card: AgentCard = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::InvalidJson(format!("failed to parse agent card: {e}")))?;

        tracing::debug!(
            name = %card.name,
            streaming = card.capabilities.streaming,
            "resolved agent card"
        );

        Ok(card)
    }
}
