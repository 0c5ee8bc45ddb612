use tracing::{debug, error, info, warn};

use crate::config::UnauthorizedPolicy;
use crate::models::{Action, RelayStatus, StatusMessage, SubscriptionMessage};

/// What the session should do with one inbound frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dispatch {
    /// Action to send back to the relay
    pub reply: Option<Action>,
    /// Pass the raw frame to the user handler
    pub forward: bool,
    /// Close the session and stop reconnecting
    pub stop: bool,
}

impl Dispatch {
    fn forward() -> Self {
        Self { forward: true, ..Default::default() }
    }

    fn reply(action: Action) -> Self {
        Self { reply: Some(action), ..Default::default() }
    }
}

/// Routes decoded relay frames
#[derive(Debug, Clone)]
pub struct Dispatcher {
    key: String,
    buckets: Vec<String>,
    unauthorized_policy: UnauthorizedPolicy,
}

impl Dispatcher {
    pub fn new(key: impl Into<String>, buckets: Vec<String>, unauthorized_policy: UnauthorizedPolicy) -> Self {
        Self {
            key: key.into(),
            buckets,
            unauthorized_policy,
        }
    }

    pub fn dispatch(&self, text: &str) -> Dispatch {
        match SubscriptionMessage::decode(text) {
            SubscriptionMessage::Status(status) => self.dispatch_status(status),
            SubscriptionMessage::Webhook(event) => {
                debug!(
                    "Received webhook: method={}, bucket={}, log={}, body_len={}",
                    event.method,
                    event.meta.bucket_name,
                    event.meta.id,
                    event.body.len()
                );
                Dispatch::forward()
            }
            SubscriptionMessage::Unknown { kind } => {
                warn!("Unknown message type: {}", kind.as_deref().unwrap_or("<missing>"));
                Dispatch::forward()
            }
        }
    }

    fn dispatch_status(&self, status: StatusMessage) -> Dispatch {
        match status.status {
            Some(RelayStatus::Authenticated) => {
                info!("Authenticated, subscribing to {} bucket(s): {:?}", self.buckets.len(), self.buckets);
                Dispatch::reply(Action::Subscribe { buckets: self.buckets.clone() })
            }
            Some(RelayStatus::Ping) => {
                debug!("Received relay ping, sending pong");
                Dispatch::reply(Action::Pong)
            }
            Some(RelayStatus::Subscribed) => {
                info!(
                    "Subscribed to webhook stream successfully: {}",
                    status.message.as_deref().unwrap_or_default()
                );
                Dispatch::forward()
            }
            Some(RelayStatus::Unauthorized) => {
                error!("Authorization failed with key: {}", self.key);
                Dispatch {
                    forward: true,
                    stop: self.unauthorized_policy == UnauthorizedPolicy::Stop,
                    ..Default::default()
                }
            }
            Some(RelayStatus::Other(other)) => {
                debug!("Received relay status: {}", other);
                Dispatch::forward()
            }
            None => Dispatch::forward(),
        }
    }
}
