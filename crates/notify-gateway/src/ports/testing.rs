//! In-memory implementations of the outbound ports for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::outbound::{
    Clock, CloseReason, CredentialStore, Credentials, MediaFetcher, ProtocolConnector,
    ProtocolEvent, ProtocolSession, SessionConnection, TemplateStore,
};
use crate::domain::{
    CredentialError, FetchError, ImagePayload, ProtocolError, TemplateError,
};

// =============================================================================
// Protocol
// =============================================================================

/// Knobs shared by a [`FakeConnector`] and every session it opens
#[derive(Default)]
pub struct FakeBehavior {
    /// Identifiers that `lookup_number` resolves
    pub registered: Mutex<HashSet<String>>,
    pub fail_open: AtomicBool,
    pub fail_lookup: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_logout: AtomicBool,
    /// Delay inside `open`, to hold a lifecycle operation in flight
    pub open_delay: Mutex<Option<Duration>>,
}

/// A message recorded by [`FakeSession::send_image`]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    pub caption: String,
    pub mime_type: String,
    pub len: usize,
}

/// Fake handle. Records what the core asks of it.
pub struct FakeSession {
    behavior: Arc<FakeBehavior>,
    pub credentials: Credentials,
    pub sent: Mutex<Vec<SentMessage>>,
    pub logged_out: AtomicBool,
    pub closed: AtomicBool,
    next_message: AtomicU64,
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn lookup_number(&self, identifier: &str) -> Result<Option<String>, ProtocolError> {
        if self.behavior.fail_lookup.load(Ordering::SeqCst) {
            return Err(ProtocolError::Timeout);
        }
        Ok(self
            .behavior
            .registered
            .lock()
            .get(identifier)
            .cloned())
    }

    async fn send_image(
        &self,
        recipient: &str,
        image: &ImagePayload,
        caption: &str,
    ) -> Result<String, ProtocolError> {
        if self.behavior.fail_send.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected("fake send failure".into()));
        }
        self.sent.lock().push(SentMessage {
            recipient: recipient.to_string(),
            caption: caption.to_string(),
            mime_type: image.mime_type.clone(),
            len: image.bytes.len(),
        });
        let n = self.next_message.fetch_add(1, Ordering::SeqCst);
        Ok(format!("FAKE{:04}", n))
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        if self.behavior.fail_logout.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test-side view of an opened fake handle
#[derive(Clone)]
pub struct FakeHandle {
    pub session: Arc<FakeSession>,
    events: Arc<Mutex<Option<mpsc::Sender<ProtocolEvent>>>>,
}

impl FakeHandle {
    /// Push an event as if the protocol emitted it
    pub async fn emit(&self, event: ProtocolEvent) {
        let tx = self.events.lock().clone();
        if let Some(tx) = tx {
            // The manager may already have dropped the receiver
            let _ = tx.send(event).await;
        }
    }

    /// End the event stream without a close event, like a dropped transport
    pub fn sever(&self) {
        self.events.lock().take();
    }

    pub async fn qr(&self, payload: &str) {
        self.emit(ProtocolEvent::Qr(payload.to_string())).await;
    }

    pub async fn open(&self) {
        self.emit(ProtocolEvent::Open).await;
    }

    pub async fn close(&self, reason: CloseReason) {
        self.emit(ProtocolEvent::Close(reason)).await;
    }
}

/// Fake connector that hands out [`FakeSession`]s
#[derive(Default)]
pub struct FakeConnector {
    pub behavior: Arc<FakeBehavior>,
    opened: Mutex<Vec<FakeHandle>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `identifier` resolvable by every session
    pub fn register(&self, identifier: &str) {
        self.behavior.registered.lock().insert(identifier.to_string());
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Most recently opened handle
    pub fn last(&self) -> Option<FakeHandle> {
        self.opened.lock().last().cloned()
    }

    pub fn handle(&self, index: usize) -> Option<FakeHandle> {
        self.opened.lock().get(index).cloned()
    }
}

#[async_trait]
impl ProtocolConnector for FakeConnector {
    async fn open(&self, credentials: Credentials) -> Result<SessionConnection, ProtocolError> {
        let delay = *self.behavior.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_open.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connect("fake connect failure".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let session = Arc::new(FakeSession {
            behavior: Arc::clone(&self.behavior),
            credentials,
            sent: Mutex::new(Vec::new()),
            logged_out: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_message: AtomicU64::new(1),
        });
        self.opened.lock().push(FakeHandle {
            session: Arc::clone(&session),
            events: Arc::new(Mutex::new(Some(tx))),
        });
        Ok(SessionConnection {
            session,
            events: rx,
        })
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Credential store kept in memory
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<Credentials>,
    /// Number of upcoming `clear` calls that fail
    pub failing_clears: AtomicUsize,
    pub clear_calls: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entries(entries: Credentials) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
            ..Self::default()
        })
    }

    pub fn snapshot(&self) -> Credentials {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        Ok(self.entries.lock().clone())
    }

    async fn save(&self, entries: &Credentials) -> Result<(), CredentialError> {
        let mut stored = self.entries.lock();
        for (name, value) in entries {
            stored.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_clears.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_clears.store(failing - 1, Ordering::SeqCst);
            return Err(CredentialError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "fake clear failure",
            )));
        }
        self.entries.lock().clear();
        Ok(())
    }
}

// =============================================================================
// Templates, media, time
// =============================================================================

/// Template store backed by a fixed map
#[derive(Default)]
pub struct StaticTemplateStore {
    templates: HashMap<String, String>,
    pub unavailable: AtomicBool,
}

impl StaticTemplateStore {
    pub fn new<I, K, V>(templates: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Arc::new(Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            unavailable: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl TemplateStore for StaticTemplateStore {
    async fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TemplateError::Unavailable("fake outage".into()));
        }
        Ok(self.templates.get(name).cloned())
    }
}

/// Fetcher serving canned bytes per URL
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.responses.lock().insert(url.to_string(), body);
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<ImagePayload, FetchError> {
        let body = self
            .responses
            .lock()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))?;
        if body.len() > max_bytes {
            return Err(FetchError::TooLarge {
                size: body.len(),
                limit: max_bytes,
            });
        }
        Ok(ImagePayload::new(body.into(), None))
    }
}

/// Clock pinned to a settable instant
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(at)))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
