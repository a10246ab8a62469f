//! # a2a-task-client — lifecycle client for A2A task agents
//!
//! This crate drives a single task on a remote
//! [A2A](https://a2a-protocol.org/) agent from creation to completion over
//! JSON-RPC 2.0, with real-time updates via Server-Sent Events (SSE) when
//! the agent supports streaming and fixed-cadence polling when it does not.
//!
//! ## Overview
//!
//! Point [`client::TaskClient`] at an agent endpoint and it will:
//! - Fetch the agent card from `/.well-known/agent.json` and pick SSE or
//!   polling from its declared capabilities
//! - Send the opening message (`tasks/send` / `tasks/sendSubscribe`) and
//!   track the task by id
//! - Treat `tasks/get` as the single source of truth: stream frames only
//!   *trigger* fetches, they are never applied to state directly
//! - Diff each authoritative snapshot against the previous one and emit
//!   granular [`events::ClientEvent`]s (status changes, per-index artifact
//!   changes, a coarse task-changed)
//! - Reconnect dropped streams with capped exponential backoff, retry
//!   failed poll ticks a bounded number of times, and end every lifecycle
//!   with exactly one `close` event
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use a2a_task_client::client::TaskClient;
//! use a2a_task_client::config::{ClientConfig, NoAuth};
//! use a2a_task_client::events::ClientEvent;
//! use a2a_task_client::types::Message;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::new(Arc::new(NoAuth));
//!     let (client, mut events) = TaskClient::start(
//!         "http://localhost:7420",
//!         Message::user_text("Write a haiku about Rust"),
//!         config,
//!     );
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::StatusUpdate { status, .. } => {
//!                 println!("status: {}", status.state);
//!             }
//!             ClientEvent::ArtifactUpdate { artifact, .. } => {
//!                 println!("artifact #{}", artifact.index);
//!             }
//!             ClientEvent::Close { reason } => {
//!                 println!("closed: {reason}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     drop(client);
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`client::TaskClient`] — handle to the orchestrator worker; `start`,
//!   `resume`, `send`, `cancel`, `close`, `pause`, `resume_comms`
//! - [`transport::JsonRpcTransport`] — HTTP transport with JSON-RPC 2.0
//!   encoding and cancellable requests
//! - [`card::CardResolver`] — agent card discovery
//! - [`store::TaskStore`] — snapshot diff engine producing change events
//! - [`sse::SseChannel`] — owned SSE reader task emitting trigger signals
//! - [`poll::PollLoop`] — fixed-cadence poll driver with bounded retries
//! - [`events::ClientEvent`] — the single consumer-facing event stream
//! - [`error::ClientError`] — error taxonomy, including the internal
//!   [`error::ClientError::Aborted`] that is never surfaced to consumers

pub mod cancel;
pub mod card;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod poll;
pub mod sse;
pub mod store;
pub mod transport;
pub mod types;

/// Prelude module that re-exports commonly used types.
///
/// Import this module with `use a2a_task_client::prelude::*;` to get the
/// types most integrations need without importing them individually.
pub mod prelude {
    pub use crate::client::{ClientState, Strategy, TaskClient};
    pub use crate::config::{AuthHeaderSource, ClientConfig, NoAuth};
    pub use crate::error::{ClientError, ClientResult};
    pub use crate::events::{ClientEvent, CloseReason, ErrorContext};
    pub use crate::types::{
        Artifact, Message, Part, Role, Task, TaskState, TaskStatus,
    };
}

// Re-export the primary surface at the crate root for convenience.
pub use client::{ClientState, TaskClient};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, CloseReason, ErrorContext};
