use tracing::info;

use crate::config::Config;

pub fn log_config(config: &Config) {
    info!(
        "Config settings: key={}, buckets={:?}, socket_url={}, api_url={}",
        config.relay_key, config.buckets, config.socket_url, config.api_url
    );
    info!(
        "Reconnect interval: {}ms, missing ping threshold: {}ms, unauthorized policy: {:?}",
        config.reconnect_interval_ms, config.missing_ping_threshold_ms, config.unauthorized_policy
    );

    if let Some(auto) = &config.auto_response {
        info!("Auto-responding to webhooks with status {} ({} byte body)", auto.status, auto.body.len());
    }
}
