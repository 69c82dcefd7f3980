//! Canonical session state and its transition function.
//!
//! [`SessionState::apply`] is the only way status and QR change, which keeps
//! `active_qr.is_some() == (status == QrReady)` true after every transition.
//! Side effects (timers, handles, broadcasts) live in the lifecycle manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Disconnected,
    Initializing,
    QrReady,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Initializing => "initializing",
            ConnectionStatus::QrReady => "qr-ready",
            ConnectionStatus::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pairing QR code currently offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveQr {
    /// Opaque payload, usually a `data:image/png;base64,` URL
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Full status view, as returned by the status route and pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(rename = "isConnected")]
    pub is_connected: bool,
    #[serde(rename = "hasActiveQR")]
    pub has_active_qr: bool,
    #[serde(rename = "qrData")]
    pub qr_data: Option<ActiveQr>,
    #[serde(rename = "connectionStatus")]
    pub connection_status: ConnectionStatus,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        SessionState::default().snapshot()
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A handle is being opened
    Initializing,
    /// The handle issued a pairing QR
    QrIssued(ActiveQr),
    /// The handle finished its handshake
    Opened,
    /// The handle closed, or was torn down
    Closed,
    /// The QR expiry timer fired
    QrExpired,
}

/// Status plus QR, owned by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    status: ConnectionStatus,
    active_qr: Option<ActiveQr>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            active_qr: None,
        }
    }
}

impl SessionState {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn active_qr(&self) -> Option<&ActiveQr> {
        self.active_qr.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Apply a transition. Returns `true` when the state changed.
    ///
    /// A QR arriving while connected or disconnected is dropped, and QR
    /// expiry only acts while a QR is offered.
    pub fn apply(&mut self, transition: Transition) -> bool {
        let before = self.clone();
        match transition {
            Transition::Initializing => {
                self.status = ConnectionStatus::Initializing;
                self.active_qr = None;
            }
            Transition::QrIssued(qr) => match self.status {
                ConnectionStatus::Initializing | ConnectionStatus::QrReady => {
                    self.status = ConnectionStatus::QrReady;
                    self.active_qr = Some(qr);
                }
                ConnectionStatus::Disconnected | ConnectionStatus::Connected => {}
            },
            Transition::Opened => {
                self.status = ConnectionStatus::Connected;
                self.active_qr = None;
            }
            Transition::Closed => {
                self.status = ConnectionStatus::Disconnected;
                self.active_qr = None;
            }
            Transition::QrExpired => {
                if self.status == ConnectionStatus::QrReady {
                    self.status = ConnectionStatus::Initializing;
                    self.active_qr = None;
                }
            }
        }
        *self != before
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            is_connected: self.is_connected(),
            has_active_qr: self.active_qr.is_some(),
            qr_data: self.active_qr.clone(),
            connection_status: self.status,
        }
    }
}
