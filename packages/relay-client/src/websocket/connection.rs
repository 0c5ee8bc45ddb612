use tokio::time::Duration;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::error::RelayError;

/// Normalize a relay socket URL, defaulting to `wss://` when no scheme is given
pub fn normalize_websocket_url(input_url: &str) -> Result<Url, RelayError> {
    let mut url_str = input_url.trim().to_string();

    // Add protocol if missing
    if !url_str.contains("://") {
        url_str = format!("wss://{}", url_str);
        info!("Added missing protocol to URL: {}", url_str);
    }

    let url = Url::parse(&url_str)?;

    // Validate the scheme
    match url.scheme() {
        "ws" | "wss" => {}
        scheme => {
            return Err(RelayError::InvalidUrl(format!(
                "invalid WebSocket scheme: {}, must be ws:// or wss://",
                scheme
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(RelayError::InvalidUrl(format!("{} is missing a host", url)));
    }

    Ok(url)
}

/// Log where the client is going to connect
pub fn describe_websocket_url(url: &Url) {
    match url.scheme() {
        "ws" => warn!("Using insecure WebSocket connection (ws://)"),
        _ => info!("Using secure WebSocket connection (wss://)"),
    }

    let host = url.host_str().unwrap_or("unknown");
    let port = url.port_or_known_default().unwrap_or(443);
    info!("Relay host: {}, port: {}, path: {}", host, port, url.path());
}

/// One-off handshake against the relay, for startup diagnostics
pub async fn probe_relay(url: &Url, timeout: Duration) -> Result<(), RelayError> {
    info!("Testing WebSocket connection to: {}", url);

    // Try to connect with a timeout
    match tokio::time::timeout(timeout, connect_async(url.clone())).await {
        Ok(Ok((mut ws_stream, response))) => {
            info!("WebSocket connection test successful, status: {}", response.status());
            // Close the connection
            let _ = ws_stream.close(None).await;
            Ok(())
        }
        Ok(Err(e)) => {
            error!("WebSocket connection test failed: {}", e);
            Err(e.into())
        }
        Err(_) => {
            error!("WebSocket connection test timed out after {:?}", timeout);
            Err(RelayError::Timeout(timeout))
        }
    }
}
