//! Client for the Webhook Relay event stream.
//!
//! [`RelayClient`] keeps one authenticated WebSocket subscription to the relay
//! alive, reconnecting on drops and on missing pings, and hands every relayed
//! frame to a user callback as raw JSON. [`Responder`] sends the HTTP response
//! for a relayed request back through the relay's log API.

pub mod config;
pub mod error;
pub mod models;
pub mod responder;
pub mod utils;
pub mod websocket;

pub use config::{ClientConfig, Config, UnauthorizedPolicy};
pub use error::RelayError;
pub use models::{
    Action, HeaderMap, Metadata, RelayStatus, ResponseMessage, StatusMessage, SubscriptionMessage,
    WebhookEvent,
};
pub use responder::Responder;
pub use websocket::{ConnectionStats, MessageHandler, RelayClient};
