mod client;
mod connection;
mod message_handler;
mod processor;

// Re-export public interfaces
pub use client::{ConnectionStats, MessageHandler, RelayClient};
pub use connection::{describe_websocket_url, normalize_websocket_url, probe_relay};
pub use message_handler::{Dispatch, Dispatcher};
