//! Client configuration and the auth-header seam.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClientResult;

/// Supplies authentication headers for outgoing requests.
///
/// Resolved once per request, so providers may refresh tokens between calls.
/// A failure here surfaces as
/// [`ClientError::Authentication`](crate::error::ClientError::Authentication),
/// distinct from transport failures.
#[async_trait]
pub trait AuthHeaderSource: Send + Sync {
    /// Produce the headers to attach to the next request.
    async fn auth_headers(&self) -> ClientResult<HashMap<String, String>>;
}

/// Static headers, for fixed API keys and tests.
#[async_trait]
impl AuthHeaderSource for HashMap<String, String> {
    async fn auth_headers(&self) -> ClientResult<HashMap<String, String>> {
        Ok(self.clone())
    }
}

/// No authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthHeaderSource for NoAuth {
    async fn auth_headers(&self) -> ClientResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

/// Configuration accepted by [`crate::client::TaskClient`].
///
/// Built with [`ClientConfig::new`] plus builder-style setters:
///
/// ```
/// use a2a_task_client::config::{ClientConfig, NoAuth};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = ClientConfig::new(Arc::new(NoAuth))
///     .with_force_poll(true)
///     .with_poll_interval(Duration::from_secs(2));
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Required auth-header provider.
    pub auth: Arc<dyn AuthHeaderSource>,

    /// Use polling even when the agent card advertises streaming.
    pub force_poll: bool,

    /// Fixed polling cadence.
    pub poll_interval: Duration,

    /// Consecutive `tasks/get` failures tolerated while polling before the
    /// client closes with `poll-retry-failed`.
    pub poll_max_error_attempts: u32,

    /// Reconnect attempts tolerated after stream failures before the client
    /// closes with `sse-reconnect-failed`.
    pub sse_max_reconnect_attempts: u32,

    /// First reconnect delay; doubles per attempt.
    pub sse_initial_reconnect_delay: Duration,

    /// Upper bound on the reconnect delay.
    pub sse_max_reconnect_delay: Duration,

    /// Window within which a burst of stream signals collapses into one
    /// authoritative fetch.
    pub sse_coalesce_window: Duration,

    /// `historyLength` hint passed on `tasks/get`.
    pub history_length: Option<u32>,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("force_poll", &self.force_poll)
            .field("poll_interval", &self.poll_interval)
            .field("poll_max_error_attempts", &self.poll_max_error_attempts)
            .field("sse_max_reconnect_attempts", &self.sse_max_reconnect_attempts)
            .field("sse_initial_reconnect_delay", &self.sse_initial_reconnect_delay)
            .field("sse_max_reconnect_delay", &self.sse_max_reconnect_delay)
            .field("sse_coalesce_window", &self.sse_coalesce_window)
            .field("history_length", &self.history_length)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Defaults: poll every 5s with 3 tolerated failures, 5 reconnect
    /// attempts backed off from 1s to 30s, 250ms signal coalescing.
    pub fn new(auth: Arc<dyn AuthHeaderSource>) -> Self {
        Self {
            auth,
            force_poll: false,
            poll_interval: Duration::from_secs(5),
            poll_max_error_attempts: 3,
            sse_max_reconnect_attempts: 5,
            sse_initial_reconnect_delay: Duration::from_secs(1),
            sse_max_reconnect_delay: Duration::from_secs(30),
            sse_coalesce_window: Duration::from_millis(250),
            history_length: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Force polling regardless of the agent card.
    pub fn with_force_poll(mut self, force_poll: bool) -> Self {
        self.force_poll = force_poll;
        self
    }

    /// Override the polling cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the tolerated consecutive poll failures.
    pub fn with_poll_max_error_attempts(mut self, attempts: u32) -> Self {
        self.poll_max_error_attempts = attempts;
        self
    }

    /// Override the tolerated SSE reconnect attempts.
    pub fn with_sse_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.sse_max_reconnect_attempts = attempts;
        self
    }

    /// Override the reconnect backoff bounds.
    pub fn with_sse_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.sse_initial_reconnect_delay = initial;
        self.sse_max_reconnect_delay = max;
        self
    }

    /// Override the signal coalescing window.
    pub fn with_sse_coalesce_window(mut self, window: Duration) -> Self {
        self.sse_coalesce_window = window;
        self
    }

    /// Set the `historyLength` hint for `tasks/get`.
    pub fn with_history_length(mut self, length: u32) -> Self {
        self.history_length = Some(length);
        self
    }

    /// Override the per-request HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
