use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::RelayError;

/// Header values keyed by name, as relayed by the server
pub type HeaderMap = HashMap<String, Vec<String>>;

/// Identifies one relayed request instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub bucket_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub bucket_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub input_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub input_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub output_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub output_destination: String,
}

// null or a non-string value reads as ""
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_string).unwrap_or_default())
}

/// Status values the relay sends on `type: "status"` frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Authenticated,
    Subscribed,
    Ping,
    Unauthorized,
    Other(String),
}

impl From<&str> for RelayStatus {
    fn from(value: &str) -> Self {
        match value {
            "authenticated" => Self::Authenticated,
            "subscribed" => Self::Subscribed,
            "ping" => Self::Ping,
            "unauthorized" => Self::Unauthorized,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: Option<RelayStatus>,
    pub message: Option<String>,
}

/// A relayed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub meta: Metadata,
    pub headers: HeaderMap,
    pub query: String,
    pub body: String,
    pub method: String,
}

/// Inbound frame from the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMessage {
    Status(StatusMessage),
    Webhook(WebhookEvent),
    /// Anything else: another `type`, no `type`, or a frame that does not decode
    Unknown { kind: Option<String> },
}

impl SubscriptionMessage {
    /// Decode a text frame. Never fails: frames that cannot be read as a
    /// status or webhook come back as `Unknown`.
    ///
    /// Routing only depends on `type` and `status`. Every other field is read
    /// on its own and falls back to its default when missing or mistyped.
    pub fn decode(text: &str) -> Self {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return Self::Unknown { kind: None },
        };

        let kind = string_field(&frame, "type");
        match kind.as_deref() {
            Some("status") => Self::Status(StatusMessage {
                status: string_field(&frame, "status").as_deref().map(RelayStatus::from),
                message: string_field(&frame, "message"),
            }),
            Some("webhook") => Self::Webhook(WebhookEvent {
                meta: lenient_field(&frame, "meta"),
                headers: lenient_field(&frame, "headers"),
                query: string_field(&frame, "query").unwrap_or_default(),
                body: string_field(&frame, "body").unwrap_or_default(),
                method: string_field(&frame, "method").unwrap_or_default(),
            }),
            _ => Self::Unknown { kind },
        }
    }

    /// Wire `type` of the frame, for logging
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Status(_) => Some("status"),
            Self::Webhook(_) => Some("webhook"),
            Self::Unknown { kind } => kind.as_deref(),
        }
    }
}

fn string_field(frame: &Value, name: &str) -> Option<String> {
    frame.get(name).and_then(Value::as_str).map(str::to_string)
}

fn lenient_field<T: DeserializeOwned + Default>(frame: &Value, name: &str) -> T {
    frame
        .get(name)
        .and_then(|value| T::deserialize(value).ok())
        .unwrap_or_default()
}

/// Client-to-server actions
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Auth { key: String, secret: String },
    Subscribe { buckets: Vec<String> },
    Pong,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Auth { key, .. } => f
                .debug_struct("Auth")
                .field("key", key)
                .field("secret", &"<redacted>")
                .finish(),
            Action::Subscribe { buckets } => {
                f.debug_struct("Subscribe").field("buckets", buckets).finish()
            }
            Action::Pong => f.write_str("Pong"),
        }
    }
}

impl Action {
    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Response to a relayed request, submitted through the log endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMessage {
    pub meta: Option<Metadata>,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ResponseMessage {
    /// Build a response for a received webhook
    pub fn for_event(event: &WebhookEvent, status: u16, body: impl Into<String>) -> Self {
        Self {
            meta: Some(event.meta.clone()),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// JSON body of `PUT /v1/logs/{id}`
#[derive(Debug, Serialize)]
pub struct LogUpdate<'a> {
    pub id: &'a str,
    pub bucket_id: &'a str,
    pub response_body: String,
    pub status_code: u16,
    pub response_headers: &'a HeaderMap,
}

impl<'a> LogUpdate<'a> {
    /// Validate a response and build its submission payload
    pub fn from_response(response: &'a ResponseMessage) -> Result<Self, RelayError> {
        if response.is_empty() {
            return Err(RelayError::EmptyResponse);
        }
        let meta = response.meta.as_ref().ok_or(RelayError::MissingMeta)?;
        if meta.id.is_empty() {
            return Err(RelayError::MissingMetaId);
        }

        Ok(Self {
            id: &meta.id,
            bucket_id: &meta.bucket_id,
            response_body: STANDARD.encode(response.body.as_bytes()),
            status_code: response.status,
            response_headers: &response.headers,
        })
    }
}
