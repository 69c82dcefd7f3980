//! Status fan-out to realtime subscribers.
//!
//! The broadcaster retains the latest snapshot. A new subscriber gets it
//! immediately, under the same lock that orders broadcasts, so it can never
//! miss a transition or see one out of order.
//!
//! Broadcasts never wait on a subscriber. When a queue is full the update is
//! dropped and the subscriber is marked stale; once it drains its queue it
//! receives the retained snapshot, so its last view is always the newest.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::{SessionSnapshot, SubscriberId};

struct SubscriberEntry {
    tx: mpsc::Sender<SessionSnapshot>,
    lag: Arc<LagSignal>,
    identity: Option<String>,
}

/// Set when an update was dropped for a full queue
#[derive(Default)]
struct LagSignal {
    stale: AtomicBool,
    notify: Notify,
}

impl LagSignal {
    fn mark(&self) {
        self.stale.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn take(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }
}

/// Fans status snapshots out to subscribers
pub struct StatusBroadcaster {
    latest: RwLock<SessionSnapshot>,
    subscribers: DashMap<SubscriberId, SubscriberEntry>,
    /// Reserved slots, including subscribers still registering
    slots: AtomicUsize,
    max_subscribers: usize,
    buffer_size: usize,
    broadcasts: AtomicU64,
}

impl StatusBroadcaster {
    pub fn new(max_subscribers: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            latest: RwLock::new(SessionSnapshot::default()),
            subscribers: DashMap::new(),
            slots: AtomicUsize::new(0),
            max_subscribers,
            buffer_size: buffer_size.max(1),
            broadcasts: AtomicU64::new(0),
        })
    }

    /// Register a subscriber. The current snapshot is queued before any
    /// later broadcast.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription, SubscribeError> {
        let max = self.max_subscribers;
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| SubscribeError::TooManySubscribers { max })?;

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let lag = Arc::new(LagSignal::default());
        let id = SubscriberId::new();

        let latest = self.latest.read();
        // Fresh channel with capacity >= 1, cannot be full
        let _ = tx.try_send(latest.clone());
        self.subscribers.insert(
            id,
            SubscriberEntry {
                tx,
                lag: Arc::clone(&lag),
                identity: None,
            },
        );
        drop(latest);

        debug!(subscriber_id = %id, "Subscriber registered");

        Ok(Subscription {
            id,
            rx,
            lag,
            broadcaster: Arc::clone(self),
        })
    }

    /// Record the identity a subscriber announced
    pub fn identify(&self, id: &SubscriberId, identity: impl Into<String>) -> bool {
        match self.subscribers.get_mut(id) {
            Some(mut entry) => {
                let identity = identity.into();
                debug!(subscriber_id = %id, identity = %identity, "Subscriber identified");
                entry.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    /// Retain `snapshot` and push it to every subscriber.
    ///
    /// Never waits on a subscriber. Lagging ones are marked stale and catch
    /// up from the retained snapshot; closed ones are dropped.
    pub fn broadcast_all(&self, snapshot: SessionSnapshot) {
        let mut latest = self.latest.write();
        *latest = snapshot;
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !Self::deliver(entry.key(), entry.value(), &latest) {
                closed.push(*entry.key());
            }
        }
        drop(latest);

        for id in closed {
            self.unsubscribe(&id);
        }
    }

    /// Push a snapshot to one subscriber. Returns `false` if it is gone.
    pub fn broadcast_to_subscriber(&self, id: &SubscriberId, snapshot: &SessionSnapshot) -> bool {
        let delivered = match self.subscribers.get(id) {
            Some(entry) => Self::deliver(id, &entry, snapshot),
            None => return false,
        };
        if !delivered {
            self.unsubscribe(id);
        }
        delivered
    }

    /// Push a snapshot to every subscriber that announced `identity`.
    /// Returns how many received it.
    pub fn broadcast_to_identity(&self, identity: &str, snapshot: &SessionSnapshot) -> usize {
        let targets: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().identity.as_deref() == Some(identity))
            .map(|entry| *entry.key())
            .collect();

        targets
            .iter()
            .filter(|id| self.broadcast_to_subscriber(id, snapshot))
            .count()
    }

    fn deliver(id: &SubscriberId, entry: &SubscriberEntry, snapshot: &SessionSnapshot) -> bool {
        match entry.tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber_id = %id, "Subscriber lagging, will catch up from latest");
                entry.lag.mark();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Remove a subscriber and free its slot
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        if self.subscribers.remove(id).is_some() {
            self.slots.fetch_sub(1, Ordering::SeqCst);
            debug!(subscriber_id = %id, "Subscriber removed");
            true
        } else {
            false
        }
    }

    /// Last broadcast snapshot
    pub fn latest(&self) -> SessionSnapshot {
        self.latest.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }

    /// Total `broadcast_all` calls
    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }
}

/// A registered subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<SessionSnapshot>,
    lag: Arc<LagSignal>,
    broadcaster: Arc<StatusBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next snapshot; `None` once the broadcaster dropped this subscriber.
    ///
    /// Queued snapshots come first. If any update was skipped while the
    /// queue was full, the retained snapshot follows them.
    pub async fn recv(&mut self) -> Option<SessionSnapshot> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.lag.take() {
                return Some(self.broadcaster.latest());
            }
            tokio::select! {
                biased;
                update = self.rx.recv() => return update,
                _ = self.lag.notify.notified() => {}
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SessionSnapshot> {
        match self.rx.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(TryRecvError::Disconnected) => None,
            Err(TryRecvError::Empty) => self.lag.take().then(|| self.broadcaster.latest()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.id);
    }
}

/// Subscription errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("too many realtime subscribers (max {max})")]
    TooManySubscribers { max: usize },
}
