//! Health check on spark.ping

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::services::cancellation::CancellationRegistry;

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    message: String,
    active_imports: usize,
    timestamp: String,
}

fn pong(request: PingRequest, active_imports: usize) -> PongResponse {
    let message = match request.message {
        Some(m) => format!("Pong: {}", m),
        None => "Pong".to_string(),
    };
    PongResponse {
        message,
        active_imports,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Answer pings with the number of import jobs currently running.
/// An empty or unparsable payload is treated as a bare ping.
pub async fn handle_ping(
    client: Client,
    mut subscriber: Subscriber,
    registry: CancellationRegistry,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = msg.reply.clone() else {
            warn!("Ping without reply subject");
            continue;
        };

        let request: PingRequest = serde_json::from_slice(&msg.payload).unwrap_or_default();
        let response = pong(request, registry.active_jobs());
        client.publish(reply, serde_json::to_vec(&response)?.into()).await?;

        debug!("Sent pong ({} active imports)", response.active_imports);
    }

    Ok(())
}
