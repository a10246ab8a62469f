//! Events delivered to client consumers.
//!
//! All client output flows through one tagged union, [`ClientEvent`],
//! delivered over a single channel — there is no listener registry to keep in
//! sync, and at-most-once delivery per event falls out of channel semantics.
//! [`ErrorContext`] and [`CloseReason`] are closed enumerations so consumers
//! can match exhaustively.

use std::fmt;

use crate::error::ClientError;
use crate::types::{Artifact, Task, TaskStatus};

/// An event emitted by a [`crate::client::TaskClient`].
///
/// `StatusUpdate`, `ArtifactUpdate` and `TaskUpdate` carry independent deep
/// copies of the orchestrator's snapshot; mutating them never affects the
/// client's internal view.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The task's status changed.
    StatusUpdate {
        /// The new status.
        status: TaskStatus,
        /// Snapshot of the full task after the change.
        task: Task,
    },

    /// An artifact was added, changed, or removed.
    ArtifactUpdate {
        /// The artifact that changed (for removals, its last known value).
        artifact: Artifact,
        /// Snapshot of the full task after the change.
        task: Task,
        /// True when the artifact disappeared from the task.
        removed: bool,
    },

    /// The task snapshot changed in any way. Emitted once per applied
    /// snapshot that differs from the previous one.
    TaskUpdate {
        /// Snapshot of the full task.
        task: Task,
    },

    /// A recoverable or fatal error occurred. A fatal error is always
    /// followed by exactly one `Close`.
    Error {
        /// The underlying error.
        error: ClientError,
        /// Where in the protocol flow it happened.
        context: ErrorContext,
    },

    /// The client reached a terminal state. Emitted exactly once per client.
    Close {
        /// Why the client closed.
        reason: CloseReason,
    },
}

/// Where in the protocol flow an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    /// Fetching the agent capability card.
    AgentCardFetch,
    /// Obtaining auth headers from the provider.
    Authentication,
    /// The initial `tasks/send` (or `tasks/sendSubscribe`) of a create flow.
    InitialSend,
    /// The initial `tasks/get` of a resume or create-poll flow.
    InitialGet,
    /// Opening an SSE connection.
    SseConnect,
    /// Reading an established SSE stream.
    SseStream,
    /// SSE reconnection attempts exhausted.
    SseReconnectFailed,
    /// A `tasks/get` issued by the poll loop.
    PollGet,
    /// Poll retries exhausted.
    PollRetryFailed,
    /// A `tasks/send` issued by [`crate::client::TaskClient::send`].
    Send,
    /// The cancel flow (`tasks/cancel` or its trailing `tasks/get`).
    Cancel,
    /// Anything that should not happen.
    Internal,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorContext::AgentCardFetch => "agent-card-fetch",
            ErrorContext::Authentication => "authentication",
            ErrorContext::InitialSend => "initial-send",
            ErrorContext::InitialGet => "initial-get",
            ErrorContext::SseConnect => "sse-connect",
            ErrorContext::SseStream => "sse-stream",
            ErrorContext::SseReconnectFailed => "sse-reconnect-failed",
            ErrorContext::PollGet => "poll-get",
            ErrorContext::PollRetryFailed => "poll-retry-failed",
            ErrorContext::Send => "send",
            ErrorContext::Cancel => "cancel",
            ErrorContext::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Why a client closed.
///
/// Task outcomes map 1:1 from the terminal [`crate::types::TaskState`]s;
/// the rest are client-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The task completed (`TaskState::Completed`).
    TaskCompleted,
    /// The agent canceled the task (`TaskState::Canceled` observed without a
    /// client-side cancel).
    TaskCanceledByAgent,
    /// This client canceled the task via [`crate::client::TaskClient::cancel`].
    TaskCanceledByClient,
    /// The task failed (`TaskState::Failed`).
    TaskFailed,
    /// The caller closed the client.
    ClosedByCaller,
    /// A fatal error closed the client.
    ErrorFatal,
    /// SSE reconnection attempts were exhausted.
    SseReconnectFailed,
    /// Poll retries were exhausted.
    PollRetryFailed,
    /// The cancel flow itself failed; the client closed anyway.
    ErrorOnCancel,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TaskCompleted => "task-completed",
            CloseReason::TaskCanceledByAgent => "task-canceled-by-agent",
            CloseReason::TaskCanceledByClient => "task-canceled-by-client",
            CloseReason::TaskFailed => "task-failed",
            CloseReason::ClosedByCaller => "closed-by-caller",
            CloseReason::ErrorFatal => "error-fatal",
            CloseReason::SseReconnectFailed => "sse-reconnect-failed",
            CloseReason::PollRetryFailed => "poll-retry-failed",
            CloseReason::ErrorOnCancel => "error-on-cancel",
        };
        write!(f, "{}", s)
    }
}
