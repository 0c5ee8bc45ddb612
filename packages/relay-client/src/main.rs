use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use webhookrelay_client::config::{AutoResponse, Config};
use webhookrelay_client::utils::{config_logger, logger};
use webhookrelay_client::websocket::{describe_websocket_url, normalize_websocket_url, probe_relay};
use webhookrelay_client::{ConnectionStats, RelayClient, Responder, ResponseMessage, SubscriptionMessage};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("Webhook Relay listener starting");

    let config = Config::load().context("Failed to load configuration")?;
    config_logger::log_config(&config);

    let url = normalize_websocket_url(&config.socket_url).context("Invalid RELAY_SOCKET_URL")?;
    describe_websocket_url(&url);

    match probe_relay(&url, Duration::from_secs(10)).await {
        Ok(_) => info!("WebSocket connection test successful"),
        Err(e) => warn!("WebSocket connection test failed: {}. Will try to connect anyway.", e),
    }

    let client_config = config.client_config();
    let responder = Responder::new(&client_config.api_url, &client_config.key, &client_config.secret)
        .context("Failed to build HTTP client")?;
    let auto_response = config.auto_response.clone();

    let client = RelayClient::new(client_config, move |raw| {
        handle_message(raw, &responder, auto_response.as_ref())
    })
    .context("Failed to create relay client")?;

    let status_task = spawn_status_reporter(client.clone());

    info!("Connecting to Webhook Relay...");
    tokio::select! {
        result = client.connect() => result.context("Failed to start relay connection")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received before the relay connection opened");
            client.disconnect().await;
            status_task.abort();
            return Ok(());
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    client.disconnect().await;
    status_task.abort();

    let stats = client.stats().await;
    info!(
        "Listener terminated after {} messages ({} forwarded, {} reconnects)",
        stats.messages_received, stats.messages_forwarded, stats.reconnects
    );
    Ok(())
}

/// Log a forwarded frame and, if configured, answer webhooks with a canned response
fn handle_message(raw: String, responder: &Responder, auto_response: Option<&AutoResponse>) {
    match SubscriptionMessage::decode(&raw) {
        SubscriptionMessage::Webhook(event) => {
            info!(
                "Webhook received: {} {} (bucket={}, log={}, {} bytes)",
                event.method,
                event.query,
                event.meta.bucket_name,
                event.meta.id,
                event.body.len()
            );

            if let Some(auto) = auto_response {
                let response = ResponseMessage::for_event(&event, auto.status, auto.body.clone());
                let responder = responder.clone();
                tokio::spawn(async move {
                    responder.respond(&response).await;
                });
            }
        }
        SubscriptionMessage::Status(status) => {
            info!("Relay status: {:?} {}", status.status, status.message.unwrap_or_default());
        }
        SubscriptionMessage::Unknown { .. } => {
            warn!("Unrecognized relay message: {}", raw);
        }
    }
}

/// Spawn a task to periodically report connection statistics
fn spawn_status_reporter(client: RelayClient) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = ConnectionStats::default();

        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;

            let current = client.stats().await;
            let new_messages = current.messages_received - last.messages_received;
            let connected = client.is_connected().await;

            let last_seen = current
                .last_message_at
                .map(|t| format!("{}s ago", (chrono::Utc::now() - t).num_seconds()))
                .unwrap_or_else(|| "never".to_string());

            info!(
                "STATUS: connected={}, {} new messages in the last minute (total: {}, forwarded: {}), reconnects: {}, last message: {}",
                connected,
                new_messages,
                current.messages_received,
                current.messages_forwarded,
                current.reconnects,
                last_seen
            );

            last = current;
        }
    })
}
