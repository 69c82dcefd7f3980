//! Protocol bridge client.
//!
//! The messaging protocol itself runs in a separate bridge process. This
//! adapter speaks JSON over a WebSocket to it:
//!
//! ```text
//! gateway -> bridge   {"id":7,"method":"lookup","params":{"jid":"..."}}
//! bridge  -> gateway  {"id":7,"result":{"exists":true,"jid":"..."}}
//! bridge  -> gateway  {"id":7,"error":"..."}
//! bridge  -> gateway  {"event":"qr","data":"..."}
//! bridge  -> gateway  {"event":"open"}
//! bridge  -> gateway  {"event":"close","reason":"loggedOut"}
//! bridge  -> gateway  {"event":"creds","data":{"creds.json":"<base64>"}}
//! ```
//!
//! Requests are correlated by id and time out individually. Losing the
//! socket fails every pending request and surfaces as a transient close.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::config::BridgeConfig;
use crate::domain::{ImagePayload, ProtocolError};
use crate::lifecycle::ScheduledTask;
use crate::ports::{
    CloseReason, Credentials, ProtocolConnector, ProtocolEvent, ProtocolSession,
    SessionConnection,
};

/// Buffered protocol events per session
const EVENT_BUFFER: usize = 256;

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, ProtocolError>>>;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

/// Any frame the bridge sends. Responses carry `id`, events carry `event`.
#[derive(Debug, Default, Deserialize)]
struct BridgeFrame {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<String>,
    event: Option<String>,
    data: Option<Value>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    exists: bool,
    jid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResult {
    message_id: String,
}

/// Opens sessions on the bridge process
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: String,
    session_name: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(config: &BridgeConfig, session_name: impl Into<String>) -> Self {
        Self {
            url: config.url.clone(),
            session_name: session_name.into(),
            request_timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl ProtocolConnector for BridgeConnector {
    async fn open(&self, credentials: Credentials) -> Result<SessionConnection, ProtocolError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ProtocolError::Connect(format!("{}: {}", self.url, e)))?;
        let (mut sink, mut stream) = socket.split();

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let writer = ScheduledTask::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "Bridge write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = Arc::clone(&pending);
        let reader = ScheduledTask::spawn(async move {
            let mut closed_by_bridge = false;
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Bridge connection error");
                        break;
                    }
                };
                match serde_json::from_str::<BridgeFrame>(text.as_str()) {
                    Ok(frame) => {
                        if let Some(event) = dispatch(frame, &reader_pending) {
                            closed_by_bridge |= matches!(event, ProtocolEvent::Close(_));
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Malformed bridge frame"),
                }
            }

            fail_pending(&reader_pending);
            if !closed_by_bridge {
                let _ = events_tx
                    .send(ProtocolEvent::Close(CloseReason::ConnectionLost))
                    .await;
            }
        });

        let session = Arc::new(BridgeSession {
            outbound: outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: self.request_timeout,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(vec![reader, writer]),
        });

        let encoded: serde_json::Map<String, Value> = credentials
            .iter()
            .map(|(name, bytes)| (name.clone(), Value::String(STANDARD.encode(bytes))))
            .collect();
        session
            .request(
                "open",
                json!({ "sessionName": self.session_name, "credentials": encoded }),
            )
            .await?;

        info!(url = %self.url, entries = credentials.len(), "Bridge session opened");
        Ok(SessionConnection {
            session,
            events: events_rx,
        })
    }
}

/// Route a frame to its waiting request, or turn it into an event
fn dispatch(frame: BridgeFrame, pending: &PendingMap) -> Option<ProtocolEvent> {
    if let Some(id) = frame.id {
        let outcome = match frame.error {
            Some(error) => Err(ProtocolError::Rejected(error)),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        match pending.remove(&id) {
            Some((_, waiter)) => {
                let _ = waiter.send(outcome);
            }
            None => debug!(id = id, "Response for unknown or expired bridge request"),
        }
        return None;
    }

    match frame.event.as_deref() {
        Some("qr") => match frame.data {
            Some(Value::String(payload)) => Some(ProtocolEvent::Qr(payload)),
            _ => {
                warn!("QR event without payload");
                None
            }
        },
        Some("open") => Some(ProtocolEvent::Open),
        Some("close") => Some(ProtocolEvent::Close(close_reason(frame.reason.as_deref()))),
        Some("creds") => Some(ProtocolEvent::CredentialsUpdated(decode_credentials(
            frame.data,
        ))),
        Some(other) => {
            debug!(event = other, "Ignoring bridge event");
            None
        }
        None => {
            warn!("Bridge frame with neither id nor event");
            None
        }
    }
}

fn close_reason(reason: Option<&str>) -> CloseReason {
    match reason {
        Some("loggedOut") | Some("logged_out") => CloseReason::LoggedOut,
        Some("connectionLost") | Some("connection_lost") | None => CloseReason::ConnectionLost,
        Some(other) => CloseReason::Other(other.to_string()),
    }
}

fn decode_credentials(data: Option<Value>) -> Credentials {
    let mut credentials = Credentials::new();
    let Some(Value::Object(entries)) = data else {
        return credentials;
    };
    for (name, value) in entries {
        match value.as_str().map(|v| STANDARD.decode(v)) {
            Some(Ok(bytes)) => {
                credentials.insert(name, bytes);
            }
            _ => warn!(entry = %name, "Skipping undecodable credential entry"),
        }
    }
    credentials
}

fn fail_pending(pending: &PendingMap) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, waiter)) = pending.remove(&id) {
            let _ = waiter.send(Err(ProtocolError::Closed));
        }
    }
}

/// One open session on the bridge
pub struct BridgeSession {
    outbound: mpsc::Sender<Message>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: AtomicBool,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl BridgeSession {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&BridgeRequest { id, method, params })
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.outbound.send(Message::text(text)).await.is_err() {
            self.pending.remove(&id);
            return Err(ProtocolError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                warn!(id = id, method = method, "Bridge request timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Number of requests awaiting an answer
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl ProtocolSession for BridgeSession {
    async fn lookup_number(&self, identifier: &str) -> Result<Option<String>, ProtocolError> {
        let result = self.request("lookup", json!({ "jid": identifier })).await?;
        if result.is_null() {
            return Ok(None);
        }
        let lookup: LookupResult =
            serde_json::from_value(result).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(lookup
            .exists
            .then(|| lookup.jid.unwrap_or_else(|| identifier.to_string())))
    }

    async fn send_image(
        &self,
        recipient: &str,
        image: &ImagePayload,
        caption: &str,
    ) -> Result<String, ProtocolError> {
        let result = self
            .request(
                "sendImage",
                json!({
                    "to": recipient,
                    "image": STANDARD.encode(&image.bytes),
                    "mimeType": image.mime_type,
                    "caption": caption,
                }),
            )
            .await?;
        let sent: SendResult =
            serde_json::from_value(result).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(sent.message_id)
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Message::Close(None)).await;
        fail_pending(&self.pending);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.cancel();
        }
        debug!("Bridge session closed");
    }
}
