//! Server-Sent Events channel.
//!
//! One long-lived streaming POST per channel. The channel is a dumb I/O
//! primitive: it decodes wire framing into [`StreamFrame`]s and reports
//! failures, but never reconnects — that policy lives in the orchestrator.
//! `pause()` and `stop()` are equivalent: a live stream has no resumable
//! paused state at the wire level, so pausing always means aborting and
//! letting the orchestrator open a fresh stream later.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::ClientError;
use crate::transport::JsonRpcTransport;
use crate::types::StreamFrame;

/// A signal reported by an [`SseChannel`] to its owner.
#[derive(Debug)]
pub enum StreamSignal {
    /// The stream connected and validated; frames may follow.
    Opened,
    /// One decoded event payload.
    Frame(StreamFrame),
    /// The stream failed. Reported at most once; the channel is dead after.
    Failed {
        /// The underlying error.
        error: ClientError,
        /// True when the failure happened before the stream was established.
        during_connect: bool,
    },
}

/// Owns one streaming request and the task reading its body.
///
/// Signals are delivered through the supplied callback from a background
/// task, in the order they occur. After `stop()` no further signals are
/// delivered.
pub struct SseChannel {
    token: CancelToken,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for SseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseChannel")
            .field("stopped", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SseChannel {
    /// Open a streaming channel for `method` (either `tasks/sendSubscribe`
    /// or `tasks/resubscribe`) and start reading it.
    pub fn open<P, F>(
        transport: Arc<JsonRpcTransport>,
        method: &'static str,
        params: P,
        parent: &CancelToken,
        on_signal: F,
    ) -> Self
    where
        P: Serialize + Send + Sync + 'static,
        F: Fn(StreamSignal) + Send + Sync + 'static,
    {
        let token = parent.child();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            let result = run_stream(transport, method, &params, &task_token, &on_signal).await;
            if let Err((error, during_connect)) = result {
                if task_token.is_cancelled() || error.is_aborted() {
                    // Intentional stop, not a failure.
                    return;
                }
                on_signal(StreamSignal::Failed {
                    error,
                    during_connect,
                });
            }
        });

        Self { token, _task: task }
    }

    /// Abort the stream. Idempotent; suppresses any further signals.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Same as [`stop`](Self::stop) — see the module docs.
    pub fn pause(&self) {
        self.stop();
    }
}

impl Drop for SseChannel {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Connect, validate, and pump the stream. Errors carry whether they
/// happened during connect.
async fn run_stream<P, F>(
    transport: Arc<JsonRpcTransport>,
    method: &str,
    params: &P,
    token: &CancelToken,
    on_signal: &F,
) -> Result<(), (ClientError, bool)>
where
    P: Serialize,
    F: Fn(StreamSignal),
{
    let response = transport
        .open_stream(method, params, token)
        .await
        .map_err(|e| (e, true))?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.contains("text/event-stream") {
        return Err((
            ClientError::Transport(format!(
                "expected text/event-stream response, got '{content_type}'"
            )),
            true,
        ));
    }

    on_signal(StreamSignal::Opened);

    let mut body = response.bytes_stream();
    let mut decoder = SseFrameDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => return Err((ClientError::Aborted, false)),
            chunk = body.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                return Err((
                    ClientError::Transport(format!("error reading SSE stream: {e}")),
                    false,
                ))
            }
            // EOF. The server may only end a stream it has marked final; an
            // unannounced EOF is a premature close the orchestrator should
            // hear about and treat like any other stream failure.
            None => {
                return Err((
                    ClientError::Transport("SSE stream ended unexpectedly".to_string()),
                    false,
                ))
            }
        };

        for payload in decoder.push(&chunk) {
            match serde_json::from_str::<StreamFrame>(&payload) {
                Ok(frame) => on_signal(StreamSignal::Frame(frame)),
                // Malformed frames are dropped without killing the stream.
                Err(e) => tracing::debug!(error = %e, "dropping malformed SSE frame"),
            }
        }
    }
}

/// Incremental SSE wire-framing decoder.
///
/// Buffers raw bytes until a blank-line event boundary, collects the event's
/// `data:` lines (joined with `\n` when there are several), and ignores
/// every other field — including `event:` lines, since frames here are
/// classified by payload shape, not event name. The buffer stays bytes so a
/// multi-byte UTF-8 character split across transport chunks is reassembled
/// before any decoding happens.
#[derive(Debug, Default)]
pub(crate) struct SseFrameDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFrameDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes; returns the complete event payloads it
    /// terminated.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            // Lossy per line: a genuinely invalid byte yields a replacement
            // character and the frame fails JSON parse downstream instead of
            // tearing the stream down.
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

            if line.is_empty() {
                // Blank line: event boundary.
                if !self.data_lines.is_empty() {
                    payloads.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Comments (":keepalive") and other fields (event:, id:, retry:)
            // are ignored.
        }
        payloads
    }
}

/// Build the channel and hand its signals to an `mpsc` sender, tagging each
/// with a channel id so the receiver can discard signals from superseded
/// channels.
pub(crate) fn open_tagged<P>(
    transport: Arc<JsonRpcTransport>,
    method: &'static str,
    params: P,
    parent: &CancelToken,
    channel_id: u64,
    tx: tokio::sync::mpsc::UnboundedSender<(u64, StreamSignal)>,
) -> SseChannel
where
    P: Serialize + Send + Sync + 'static,
{
    SseChannel::open(transport, method, params, parent, move |signal| {
        let _ = tx.send((channel_id, signal));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_data_line_event() {
        let mut decoder = SseFrameDecoder::new();
        let payloads = decoder.push(b"data: {\"status\":{\"state\":\"working\"}}\n\n");
        assert_eq!(payloads, vec!["{\"status\":{\"state\":\"working\"}}"]);
    }

    #[test]
    fn event_requires_blank_line_boundary() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(b"data: {\"a\":1}\n").is_empty());
        let payloads = decoder.push(b"\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let mut decoder = SseFrameDecoder::new();
        let payloads = decoder.push(b"data: {\ndata: \"a\": 1}\n\n");
        assert_eq!(payloads, vec!["{\n\"a\": 1}"]);
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(b"data: {\"sta").is_empty());
        assert!(decoder.push(b"tus\":{}}\n").is_empty());
        let payloads = decoder.push(b"\n");
        assert_eq!(payloads, vec!["{\"status\":{}}"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let event = "data: {\"note\":\"caf\u{e9}\"}\n\n";
        let bytes = event.as_bytes();
        // Split one byte into the two-byte 'é'.
        let split = event.find('\u{e9}').unwrap() + 1;

        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let payloads = decoder.push(&bytes[split..]);
        assert_eq!(payloads, vec!["{\"note\":\"caf\u{e9}\"}"]);
    }

    #[test]
    fn crlf_line_endings_tolerated() {
        let mut decoder = SseFrameDecoder::new();
        let payloads = decoder.push(b"data: {\"a\":1}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn comments_and_other_fields_ignored() {
        let mut decoder = SseFrameDecoder::new();
        let payloads =
            decoder.push(b": keepalive\nevent: update\nid: 7\nretry: 1000\ndata: {}\n\n");
        assert_eq!(payloads, vec!["{}"]);
    }

    #[test]
    fn blank_lines_without_data_produce_nothing() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push(b"\n\n\n").is_empty());
        assert!(decoder.push(b": ping\n\n").is_empty());
    }

    #[test]
    fn two_events_in_one_chunk() {
        let mut decoder = SseFrameDecoder::new();
        let payloads = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn data_without_leading_space() {
        let mut decoder = SseFrameDecoder::new();
        let payloads = decoder.push(b"data:{\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }
}
