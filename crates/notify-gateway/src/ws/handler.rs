//! WebSocket handler for the realtime status channel.
//!
//! Security features:
//! - Message size limits
//! - Subscriber ceiling enforced by the broadcaster
//! - Rate limiting per connection

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::config::WebSocketConfig;
use crate::domain::{SessionSnapshot, SubscriberId};
use crate::middleware::metrics::GatewayMetrics;
use crate::ws::broadcaster::{StatusBroadcaster, SubscribeError, Subscription};

/// Close code sent when the subscriber ceiling is reached (try again later)
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Frames pushed to a subscriber
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage<'a> {
    QrUpdate { data: &'a SessionSnapshot },
    Error { message: String },
}

impl ServerMessage<'_> {
    fn to_text(&self) -> String {
        // Plain structs of strings and bools, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames a subscriber may send
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Attach an identity; every connection sharing it gets the snapshot
    JoinUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Ask for the current snapshot again
    GetStatus,
}

/// WebSocket connection handler
pub struct StatusSocketHandler {
    broadcaster: Arc<StatusBroadcaster>,
    metrics: Arc<GatewayMetrics>,
    max_message_size: usize,
    messages_per_second: u32,
    /// Message counter for rate limiting
    message_count: u32,
    /// Rate limit window start
    rate_limit_window: Instant,
}

impl StatusSocketHandler {
    pub fn new(
        broadcaster: Arc<StatusBroadcaster>,
        metrics: Arc<GatewayMetrics>,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            broadcaster,
            metrics,
            max_message_size: config.max_message_size,
            messages_per_second: config.messages_per_second,
            message_count: 0,
            rate_limit_window: Instant::now(),
        }
    }

    /// Check rate limit, returns true if the message is allowed
    fn check_rate_limit(&mut self) -> bool {
        let now = Instant::now();

        // Reset window every second
        if now.duration_since(self.rate_limit_window) >= Duration::from_secs(1) {
            self.rate_limit_window = now;
            self.message_count = 0;
        }

        self.message_count += 1;
        self.message_count <= self.messages_per_second
    }

    /// Validate an inbound frame, returning the error to send back if any
    fn check_inbound(&mut self, id: &SubscriberId, size: usize) -> Option<String> {
        if size > self.max_message_size {
            warn!(
                subscriber_id = %id,
                size = size,
                max = self.max_message_size,
                "Message exceeds size limit"
            );
            return Some(format!(
                "Message too large: {} bytes (max: {})",
                size, self.max_message_size
            ));
        }
        if !self.check_rate_limit() {
            debug!(subscriber_id = %id, "Realtime rate limit exceeded");
            return Some("Rate limit exceeded".to_string());
        }
        None
    }

    /// Handle a WebSocket connection until either side closes it
    pub async fn handle(mut self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        let mut subscription = match self.broadcaster.subscribe() {
            Ok(subscription) => subscription,
            Err(SubscribeError::TooManySubscribers { max }) => {
                self.metrics.record_ws_rejected();
                warn!(max = max, "Realtime subscriber ceiling reached, rejecting connection");
                let frame = ServerMessage::Error {
                    message: "Too many connections, try again later".to_string(),
                };
                let _ = sink.send(Message::Text(frame.to_text())).await;
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_TRY_AGAIN_LATER,
                        reason: "subscriber limit reached".into(),
                    })))
                    .await;
                return;
            }
        };

        let id = subscription.id();
        self.metrics.record_ws_connect();
        info!(subscriber_id = %id, "Realtime subscriber connected");

        loop {
            tokio::select! {
                update = subscription.recv() => {
                    let Some(snapshot) = update else {
                        debug!(subscriber_id = %id, "Dropped by broadcaster");
                        break;
                    };
                    let frame = ServerMessage::QrUpdate { data: &snapshot };
                    if let Err(e) = sink.send(Message::Text(frame.to_text())).await {
                        debug!(subscriber_id = %id, error = %e, "Failed to push status update");
                        break;
                    }
                    self.metrics.record_ws_message();
                }
                inbound = stream.next() => {
                    let reply = match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.on_text(&subscription, text.as_bytes())
                        }
                        Some(Ok(Message::Binary(data))) => self.on_text(&subscription, &data),
                        Some(Ok(Message::Ping(data))) => Some(Message::Pong(data)),
                        Some(Ok(Message::Pong(_))) => None,
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(subscriber_id = %id, "WebSocket close received");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(subscriber_id = %id, error = %e, "WebSocket error");
                            break;
                        }
                    };
                    if let Some(reply) = reply {
                        if let Err(e) = sink.send(reply).await {
                            error!(subscriber_id = %id, error = %e, "Failed to send WebSocket reply");
                            break;
                        }
                    }
                }
            }
        }

        drop(subscription);
        self.metrics.record_ws_disconnect();
        info!(subscriber_id = %id, "Realtime subscriber disconnected");
    }

    /// Process one inbound frame. Snapshot replies travel through the
    /// subscription so they stay ordered with broadcasts.
    fn on_text(&mut self, subscription: &Subscription, raw: &[u8]) -> Option<Message> {
        let id = subscription.id();
        if let Some(message) = self.check_inbound(&id, raw.len()) {
            return Some(Message::Text(ServerMessage::Error { message }.to_text()));
        }

        match serde_json::from_slice::<ClientMessage>(raw) {
            Ok(ClientMessage::JoinUser { user_id }) => {
                let user_id = user_id.trim();
                if user_id.is_empty() {
                    let message = "userId must not be empty".to_string();
                    return Some(Message::Text(ServerMessage::Error { message }.to_text()));
                }
                self.broadcaster.identify(&id, user_id);
                // Every connection of this identity resyncs, the joiner included
                let latest = self.broadcaster.latest();
                let delivered = self.broadcaster.broadcast_to_identity(user_id, &latest);
                info!(subscriber_id = %id, user_id = %user_id, delivered = delivered, "Subscriber joined");
                None
            }
            Ok(ClientMessage::GetStatus) => {
                let latest = self.broadcaster.latest();
                self.broadcaster.broadcast_to_subscriber(&id, &latest);
                None
            }
            Err(e) => {
                debug!(subscriber_id = %id, error = %e, "Unrecognized realtime message");
                let message = format!("Unrecognized message: {}", e);
                Some(Message::Text(ServerMessage::Error { message }.to_text()))
            }
        }
    }
}
