//! Session lifecycle manager.
//!
//! Owns the single protocol handle and the canonical [`SessionState`].
//!
//! - Protocol events arrive on the handle's channel and are applied one at a
//!   time by a pump task. Each opened handle gets a generation number and
//!   events stamped with an older generation are dropped.
//! - `initialize`, `destroy`, `request_qr` and `reset_session` are
//!   single-flight: a second caller is rejected with
//!   [`LifecycleError::OperationInProgress`], never queued.
//! - The core mutex is never held across an await, so `status` never waits
//!   on an operation in flight.
//! - The reconnect and QR-expiry timers are [`ScheduledTask`]s held in the
//!   core; scheduling one cancels its predecessor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::config::SessionConfig;
use crate::domain::{
    ActiveQr, ConnectionStatus, ImagePayload, LifecycleError, SendError, SessionSnapshot,
    SessionState, Transition,
};
use crate::lifecycle::timers::ScheduledTask;
use crate::ports::{
    Clock, CloseReason, CredentialStore, Credentials, ProtocolConnector, ProtocolEvent,
    ProtocolSession,
};
use crate::ws::StatusBroadcaster;

/// Timing knobs of the lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub qr_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reset_settle_delay: Duration,
    pub cleanup_retry_delay: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for LifecycleSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            qr_timeout: config.qr_timeout,
            reconnect_delay: config.reconnect_delay,
            reset_settle_delay: config.reset_settle_delay,
            cleanup_retry_delay: config.cleanup_retry_delay,
        }
    }
}

#[derive(Default)]
struct Core {
    state: SessionState,
    session: Option<Arc<dyn ProtocolSession>>,
    generation: u64,
    pump: Option<ScheduledTask>,
    qr_timer: Option<ScheduledTask>,
    reconnect_timer: Option<ScheduledTask>,
    reconnect_token: u64,
}

struct Inner {
    settings: LifecycleSettings,
    qr_ttl: TimeDelta,
    connector: Arc<dyn ProtocolConnector>,
    credentials: Arc<dyn CredentialStore>,
    broadcaster: Arc<StatusBroadcaster>,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
    busy: AtomicBool,
}

/// Releases the operation lock on drop
struct OperationGuard<'a>(&'a AtomicBool);

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the lifecycle manager. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        settings: LifecycleSettings,
        connector: Arc<dyn ProtocolConnector>,
        credentials: Arc<dyn CredentialStore>,
        broadcaster: Arc<StatusBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let qr_ttl =
            TimeDelta::from_std(settings.qr_timeout).unwrap_or_else(|_| TimeDelta::seconds(120));
        let core = Core::default();
        broadcaster.broadcast_all(core.state.snapshot());
        Self {
            inner: Arc::new(Inner {
                settings,
                qr_ttl,
                connector,
                credentials,
                broadcaster,
                clock,
                core: Mutex::new(core),
                busy: AtomicBool::new(false),
            }),
        }
    }

    /// Open a protocol handle with the stored credentials.
    ///
    /// Returns once the handle exists; QR and connection progress arrive as
    /// events.
    pub async fn initialize(&self) -> Result<(), LifecycleError> {
        if self.has_session() {
            return Err(LifecycleError::AlreadyActive);
        }
        let _guard = self.inner.try_begin()?;
        if self.has_session() {
            return Err(LifecycleError::AlreadyActive);
        }
        self.inner.open_session().await
    }

    /// Tear down the handle (logging out) and return to Disconnected.
    ///
    /// State is cleared before logout is attempted, so a logout failure is
    /// reported but never leaves a half-torn session behind.
    pub async fn destroy(&self) -> Result<(), LifecycleError> {
        let _guard = self.inner.try_begin()?;
        self.inner.destroy_locked().await
    }

    /// Discard any handle and open a fresh one to obtain a new QR.
    pub async fn request_qr(&self) -> Result<(), LifecycleError> {
        if self.is_connected() {
            return Err(LifecycleError::AlreadyConnected);
        }
        let _guard = self.inner.try_begin()?;
        if self.is_connected() {
            return Err(LifecycleError::AlreadyConnected);
        }

        if let Err(e) = self.inner.destroy_locked().await {
            warn!(operation = "request_qr", error = %e, "Previous session did not log out cleanly");
        }
        self.inner.open_session().await
    }

    /// Destroy the session and delete all credential material, forcing a
    /// fresh pairing.
    ///
    /// On failure a best-effort `initialize` runs before the error is
    /// returned; [`SessionManager::has_session`] tells whether it worked.
    pub async fn reset_session(&self) -> Result<(), LifecycleError> {
        let guard = self.inner.try_begin()?;
        let result = self.inner.reset_locked().await;
        drop(guard);

        match result {
            Ok(()) => {
                info!(operation = "reset", "Session reset");
                Ok(())
            }
            Err(e) => {
                error!(operation = "reset", error = %e, "Session reset failed, reinitializing");
                if let Err(init_err) = self.initialize().await {
                    error!(operation = "reset", error = %init_err, "Recovery initialize failed");
                }
                Err(e)
            }
        }
    }

    /// Resolve a network identifier. Lookup failures read as "not found".
    pub async fn validate_number(&self, identifier: &str) -> Result<Option<String>, LifecycleError> {
        let session = {
            let core = self.inner.core.lock();
            if !core.state.is_connected() {
                return Err(LifecycleError::NotConnected);
            }
            core.session.clone()
        };
        let session = session.ok_or(LifecycleError::NotConnected)?;

        match session.lookup_number(identifier).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(recipient = %identifier, error = %e, "Number lookup failed, treating as unregistered");
                Ok(None)
            }
        }
    }

    /// Deliver an image through the current handle. Returns the message id.
    pub async fn send_image(
        &self,
        recipient: &str,
        image: &ImagePayload,
        caption: &str,
    ) -> Result<String, SendError> {
        let session = self
            .inner
            .core
            .lock()
            .session
            .clone()
            .ok_or_else(|| SendError::DeliveryFailed("no active session".into()))?;

        session
            .send_image(recipient, image, caption)
            .await
            .map_err(|e| SendError::DeliveryFailed(e.to_string()))
    }

    /// Current snapshot. Never waits on a lifecycle operation.
    pub fn status(&self) -> SessionSnapshot {
        self.inner.core.lock().state.snapshot()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.core.lock().state.status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().state.is_connected()
    }

    pub fn has_session(&self) -> bool {
        self.inner.core.lock().session.is_some()
    }

    /// Whether a lifecycle operation is in flight
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.inner.broadcaster
    }

    /// Stop timers and drop the connection without logging out, so the
    /// pairing survives a restart.
    pub async fn shutdown(&self) {
        let session = {
            let mut core = self.inner.core.lock();
            let session = core.session.take();
            self.inner.retire(&mut core);
            session
        };
        if let Some(session) = session {
            session.close().await;
            info!("Session closed for shutdown");
        }
    }
}

impl Inner {
    fn try_begin(&self) -> Result<OperationGuard<'_>, LifecycleError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LifecycleError::OperationInProgress)?;
        Ok(OperationGuard(&self.busy))
    }

    /// Apply a transition and broadcast if it changed anything
    fn transition(&self, core: &mut Core, transition: Transition) -> bool {
        let changed = core.state.apply(transition);
        if changed {
            self.broadcaster.broadcast_all(core.state.snapshot());
        }
        changed
    }

    fn cancel_reconnect(&self, core: &mut Core) {
        core.reconnect_token += 1;
        if let Some(timer) = core.reconnect_timer.take() {
            timer.cancel();
            debug!("Pending reconnect cancelled");
        }
    }

    /// Stop consuming events from the current handle and cancel every timer
    fn retire(&self, core: &mut Core) {
        core.generation += 1;
        if let Some(pump) = core.pump.take() {
            pump.cancel();
        }
        if let Some(timer) = core.qr_timer.take() {
            timer.cancel();
        }
        self.cancel_reconnect(core);
        self.transition(core, Transition::Closed);
    }

    /// Caller must hold the operation lock
    async fn open_session(self: &Arc<Self>) -> Result<(), LifecycleError> {
        {
            let mut core = self.core.lock();
            self.cancel_reconnect(&mut core);
            self.transition(&mut core, Transition::Initializing);
        }

        let credentials = match self.credentials.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(operation = "initialize", error = %e, "Failed to load credentials");
                self.transition(&mut self.core.lock(), Transition::Closed);
                return Err(e.into());
            }
        };
        let resumed = !credentials.is_empty();

        let connection = match self.connector.open(credentials).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(operation = "initialize", error = %e, "Failed to open session");
                self.transition(&mut self.core.lock(), Transition::Closed);
                return Err(e.into());
            }
        };

        let mut core = self.core.lock();
        core.generation += 1;
        let generation = core.generation;
        core.session = Some(connection.session);
        core.pump = Some(ScheduledTask::spawn(pump_events(
            Arc::downgrade(self),
            generation,
            connection.events,
        )));
        info!(generation, resumed, "Session handle opened");
        Ok(())
    }

    /// Caller must hold the operation lock
    async fn destroy_locked(&self) -> Result<(), LifecycleError> {
        let session = {
            let mut core = self.core.lock();
            let session = core.session.take();
            self.retire(&mut core);
            session
        };

        if let Some(session) = session {
            session.logout().await.map_err(|e| {
                warn!(operation = "destroy", error = %e, "Logout failed");
                LifecycleError::from(e)
            })?;
            info!(operation = "destroy", "Session logged out");
        }
        Ok(())
    }

    /// Caller must hold the operation lock
    async fn reset_locked(&self) -> Result<(), LifecycleError> {
        self.destroy_locked().await?;
        {
            let core = self.core.lock();
            self.broadcaster.broadcast_all(core.state.snapshot());
        }

        tokio::time::sleep(self.settings.reset_settle_delay).await;

        if let Err(first) = self.credentials.clear().await {
            warn!(operation = "reset", error = %first, "Credential cleanup failed, retrying");
            tokio::time::sleep(self.settings.cleanup_retry_delay).await;
            if let Err(second) = self.credentials.clear().await {
                warn!(
                    operation = "reset",
                    error = %second,
                    "Credential cleanup failed after retry; stale credentials may remain"
                );
            }
        }
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, generation: u64, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Qr(image) => self.on_qr(generation, image),
            ProtocolEvent::Open => self.on_open(generation),
            ProtocolEvent::Close(reason) => self.on_close(generation, reason),
            ProtocolEvent::CredentialsUpdated(entries) => {
                self.on_credentials(generation, entries).await
            }
        }
    }

    fn is_stale(core: &Core, generation: u64) -> bool {
        if core.generation != generation {
            debug!(generation, current = core.generation, "Dropping event from retired session");
            return true;
        }
        false
    }

    fn on_qr(self: &Arc<Self>, generation: u64, image: String) {
        let mut core = self.core.lock();
        if Self::is_stale(&core, generation) {
            return;
        }

        let created_at = self.clock.now();
        let expires_at = created_at + self.qr_ttl;
        let qr = ActiveQr {
            image,
            created_at,
            expires_at,
        };
        if !self.transition(&mut core, Transition::QrIssued(qr)) {
            debug!(status = %core.state.status(), "QR ignored");
            return;
        }

        let weak = Arc::downgrade(self);
        let timer = ScheduledTask::after(self.settings.qr_timeout, async move {
            if let Some(inner) = weak.upgrade() {
                inner.expire_qr(generation, expires_at);
            }
        });
        if let Some(previous) = core.qr_timer.replace(timer) {
            previous.cancel();
        }
        info!(generation, expires_at = %expires_at, "Pairing QR issued");
    }

    fn expire_qr(&self, generation: u64, expires_at: DateTime<Utc>) {
        let mut core = self.core.lock();
        if core.generation != generation
            || core.state.active_qr().map(|qr| qr.expires_at) != Some(expires_at)
        {
            return;
        }
        if let Some(own) = core.qr_timer.take() {
            own.detach();
        }
        if self.transition(&mut core, Transition::QrExpired) {
            info!(generation, "Pairing QR expired");
        }
    }

    fn on_open(&self, generation: u64) {
        let mut core = self.core.lock();
        if Self::is_stale(&core, generation) {
            return;
        }
        if let Some(timer) = core.qr_timer.take() {
            timer.cancel();
        }
        self.cancel_reconnect(&mut core);
        self.transition(&mut core, Transition::Opened);
        info!(generation, "Session connected");
    }

    /// Runs on the pump task of the closing handle
    fn on_close(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let mut core = self.core.lock();
        if Self::is_stale(&core, generation) {
            return;
        }

        core.session = None;
        core.generation += 1;
        if let Some(pump) = core.pump.take() {
            pump.detach();
        }
        if let Some(timer) = core.qr_timer.take() {
            timer.cancel();
        }
        self.transition(&mut core, Transition::Closed);

        if reason.should_reconnect() {
            warn!(
                reason = %reason,
                delay_ms = self.settings.reconnect_delay.as_millis() as u64,
                "Session closed, reconnect scheduled"
            );
            self.schedule_reconnect(&mut core);
        } else {
            info!(reason = %reason, "Session logged out, staying disconnected");
            self.cancel_reconnect(&mut core);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core) {
        core.reconnect_token += 1;
        let token = core.reconnect_token;
        let weak = Arc::downgrade(self);

        let timer = ScheduledTask::after(self.settings.reconnect_delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut core = inner.core.lock();
                if core.reconnect_token != token {
                    return;
                }
                if let Some(own) = core.reconnect_timer.take() {
                    own.detach();
                }
            }

            info!("Reconnecting session");
            let manager = SessionManager { inner };
            match manager.initialize().await {
                Ok(()) => {}
                Err(e @ (LifecycleError::AlreadyActive | LifecycleError::OperationInProgress)) => {
                    debug!(reason = %e, "Reconnect skipped");
                }
                Err(e) => warn!(error = %e, "Reconnect failed"),
            }
        });

        if let Some(previous) = core.reconnect_timer.replace(timer) {
            previous.cancel();
        }
    }

    async fn on_credentials(&self, generation: u64, entries: Credentials) {
        let stale = Self::is_stale(&self.core.lock(), generation);
        if stale {
            return;
        }
        match self.credentials.save(&entries).await {
            Ok(()) => debug!(entries = entries.len(), "Rotated credentials persisted"),
            Err(e) => warn!(error = %e, "Failed to persist rotated credentials"),
        }
    }
}

/// Applies a handle's events in arrival order until it closes. A channel
/// that ends without a close event counts as a lost connection.
async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<ProtocolEvent>,
) {
    loop {
        let event = events
            .recv()
            .await
            .unwrap_or(ProtocolEvent::Close(CloseReason::ConnectionLost));
        let closing = matches!(event, ProtocolEvent::Close(_));

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(generation, event).await;
        if closing {
            break;
        }
    }
}
