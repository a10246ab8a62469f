//! JSON-RPC over HTTP transport.
//!
//! One POST per request with `Content-Type: application/json`; streaming
//! methods add `Accept: text/event-stream` and hand the raw response to the
//! SSE channel. Auth headers come from the injected [`AuthHeaderSource`] on
//! every call, and every call races a [`CancelToken`] — a cancelled call
//! resolves to [`ClientError::Aborted`], never to a transport error.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::AuthHeaderSource;
use crate::error::{ClientError, ClientResult};
use crate::types::{JsonRpcId, JsonRpcRequest, JsonRpcResponse};

/// JSON-RPC over HTTP transport using `reqwest`.
#[derive(Clone)]
pub struct JsonRpcTransport {
    client: reqwest::Client,
    url: String,
    auth: Arc<dyn AuthHeaderSource>,
}

impl std::fmt::Debug for JsonRpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcTransport")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl JsonRpcTransport {
    /// Create a transport targeting the given JSON-RPC endpoint URL.
    pub fn new(
        url: impl Into<String>,
        auth: Arc<dyn AuthHeaderSource>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
            auth,
        }
    }

    /// Issue a unary JSON-RPC request and parse the typed result.
    ///
    /// Cancellation of `token` resolves to [`ClientError::Aborted`].
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
        token: &CancelToken,
    ) -> ClientResult<R> {
        let request = build_request(method, params)?;
        tracing::debug!(method, id = %request.id, "issuing JSON-RPC request");

        let fut = self.send_unary(&request);
        let response = tokio::select! {
            _ = token.cancelled() => return Err(ClientError::Aborted),
            res = fut => res?,
        };
        parse_result(response)
    }

    /// Issue a streaming JSON-RPC request (`Accept: text/event-stream`) and
    /// return the raw HTTP response for the SSE reader.
    ///
    /// Validates the status code here; content-type validation belongs to
    /// the channel.
    pub async fn open_stream<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        token: &CancelToken,
    ) -> ClientResult<reqwest::Response> {
        let request = build_request(method, params)?;
        tracing::debug!(method, id = %request.id, "opening SSE stream");

        let headers = self.resolve_auth_headers().await?;
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&request);
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        // The stream body is long-lived; the client-wide timeout must not
        // apply to it.
        builder = builder.timeout(Duration::from_secs(86400));

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
        Ok(response)
    }

    async fn send_unary(&self, request: &JsonRpcRequest) -> ClientResult<JsonRpcResponse> {
        let headers = self.resolve_auth_headers().await?;

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request);
        for (key, value) in headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

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
            .map_err(|e| ClientError::Transport(format!("failed to read response body: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::InvalidJson(format!("failed to parse JSON-RPC response: {e}")))
    }

    /// Resolve auth headers, validating they are legal HTTP header values.
    /// A provider failure is an `Authentication` error, never `Transport`.
    async fn resolve_auth_headers(&self) -> ClientResult<Vec<(HeaderName, HeaderValue)>> {
        let raw = self
            .auth
            .auth_headers()
            .await
            .map_err(|e| match e {
                ClientError::Authentication(_) => e,
                other => ClientError::Authentication(other.to_string()),
            })?;

        let mut headers = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                ClientError::Authentication(format!("invalid auth header name: {key}"))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|_| {
                ClientError::Authentication(format!("invalid auth header value for {key}"))
            })?;
            headers.push((name, value));
        }
        Ok(headers)
    }
}

/// Map reqwest failures to typed errors, preserving the timeout/connect
/// distinction.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ClientError::Transport(format!("connection failed: {e}"))
    } else {
        ClientError::Transport(format!("HTTP request failed: {e}"))
    }
}

/// Build a JSON-RPC request with a random UUID ID.
fn build_request(method: &str, params: &impl Serialize) -> ClientResult<JsonRpcRequest> {
    let params_value = serde_json::to_value(params)
        .map_err(|e| ClientError::Transport(format!("failed to serialize request params: {e}")))?;

    Ok(JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: JsonRpcId::String(uuid::Uuid::new_v4().to_string()),
        method: method.to_string(),
        params: Some(params_value),
    })
}

/// Parse the `result` field from a JSON-RPC response into the expected type.
///
/// An error envelope becomes [`ClientError::JsonRpc`].
fn parse_result<T: DeserializeOwned>(response: JsonRpcResponse) -> ClientResult<T> {
    if let Some(error) = response.error {
        return Err(ClientError::JsonRpc {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    let result = response.result.ok_or_else(|| {
        ClientError::InvalidJson("JSON-RPC response has neither 'result' nor 'error'".to_string())
    })?;

    serde_json::from_value(result)
        .map_err(|e| ClientError::InvalidJson(format!("failed to deserialize response result: {e}")))
}
