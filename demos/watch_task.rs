//! Run a task against a live agent and print every lifecycle event.
//!
//! ```sh
//! cargo run --example watch_task -- http://localhost:7420 "Write a haiku about Rust"
//! ```

use std::sync::Arc;

use a2a_task_client::client::TaskClient;
use a2a_task_client::config::{ClientConfig, NoAuth};
use a2a_task_client::events::ClientEvent;
use a2a_task_client::types::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for log output.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "http://localhost:7420".to_string());
    let prompt = args.next().unwrap_or_else(|| "Hello!".to_string());

    let config = ClientConfig::new(Arc::new(NoAuth)).with_history_length(10);
    let (client, mut events) = TaskClient::start(&endpoint, Message::user_text(prompt), config);
    println!("task {} started against {endpoint}", client.task_id());

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::StatusUpdate { status, .. } => {
                println!("status: {}", status.state);
            }
            ClientEvent::ArtifactUpdate {
                artifact, removed, ..
            } => {
                if removed {
                    println!("artifact #{} removed", artifact.index);
                } else {
                    println!("artifact #{} updated", artifact.index);
                }
            }
            ClientEvent::TaskUpdate { .. } => {}
            ClientEvent::Error { error, context } => {
                eprintln!("error ({context}): {error}");
            }
            ClientEvent::Close { reason } => {
                println!("closed: {reason}");
                break;
            }
        }
    }
    Ok(())
}
