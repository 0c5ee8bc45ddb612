use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::select;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::models::Action;
use crate::websocket::client::{ConnectionStats, MessageHandler};
use crate::websocket::message_handler::Dispatcher;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The relay closed the socket or the transport failed
    Closed,
    /// Nothing was received within the liveness threshold
    LivenessTimeout,
    /// `disconnect()` was called
    Cancelled,
    /// Credentials were rejected and the policy says stop
    Rejected,
}

/// Everything a session borrows from its client
pub(crate) struct Session<'a> {
    pub dispatcher: &'a Dispatcher,
    pub handler: &'a MessageHandler,
    pub stats: &'a Mutex<ConnectionStats>,
    pub missing_ping_threshold: Duration,
}

/// Serialize and send one action frame
pub(crate) async fn send_action<W>(write: &mut W, action: &Action) -> Result<(), RelayError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = action.to_json()?;
    write.send(Message::Text(json)).await?;
    Ok(())
}

/// Drive one authenticated socket until it closes, times out or is cancelled.
///
/// Frames are dispatched strictly one at a time in arrival order. Every frame
/// re-arms the liveness deadline; when it fires the socket is closed once and
/// the caller decides whether to reconnect.
pub(crate) async fn run_session<W, R>(
    mut write: W,
    mut read: R,
    session: Session<'_>,
    shutdown: &CancellationToken,
) -> SessionEnd
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    // Liveness deadline, armed as soon as the socket is open
    let threshold = session.missing_ping_threshold;
    let liveness = tokio::time::sleep(threshold);
    tokio::pin!(liveness);

    loop {
        select! {
            // Manual disconnect
            _ = shutdown.cancelled() => {
                info!("Closing relay connection");
                if let Err(e) = write.close().await {
                    debug!("Error while closing relay connection: {}", e);
                }
                return SessionEnd::Cancelled;
            }
            // Nothing heard from the relay in time
            _ = &mut liveness => {
                warn!("Pings are missing for {:?}, reconnecting...", threshold);
                if let Err(e) = write.close().await {
                    debug!("Error while closing stale relay connection: {}", e);
                }
                return SessionEnd::LivenessTimeout;
            }
            frame = read.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return SessionEnd::Closed;
                    }
                    None => {
                        info!("WebSocket connection closed");
                        return SessionEnd::Closed;
                    }
                };

                // Any frame proves the relay is alive
                liveness.as_mut().reset(Instant::now() + threshold);
                {
                    let mut stats = session.stats.lock().await;
                    stats.messages_received += 1;
                    stats.last_message_at = Some(chrono::Utc::now());
                }

                match msg {
                    Message::Text(text) => {
                        debug!("Received relay message: {}", text);
                        let dispatch = session.dispatcher.dispatch(&text);

                        // Reply first, then hand the raw frame to the handler

                        if let Some(action) = &dispatch.reply {
                            if let Err(e) = send_action(&mut write, action).await {
                                error!("Failed to send {:?}: {}", action, e);
                            }
                        }

                        if dispatch.forward {
                            session.stats.lock().await.messages_forwarded += 1;
                            (session.handler)(text);
                        }

                        if dispatch.stop {
                            warn!("Relay rejected our credentials, closing without reconnecting");
                            let _ = write.close().await;
                            return SessionEnd::Rejected;
                        }
                    }
                    Message::Ping(data) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Message::Close(frame) => {
                        info!("Relay sent close frame: {:?}", frame);
                    }
                    other => {
                        debug!("Ignoring non-text message: {:?}", other);
                    }
                }
            }
        }
    }
}
