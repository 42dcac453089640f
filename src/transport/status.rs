//! Connection status reporting.

use log::info;
use std::fmt;
use std::sync::Arc;

/// Whether the transport currently has a usable link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Sending is possible.
    Connected,
    /// The link dropped and the transport is backing off before the next
    /// attempt.
    DisconnectedRetrying,
    /// Closed for good.
    Disconnected,
}

/// Why the status last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatusChangeReason {
    /// A connection was established or a request went through.
    ConnectionOk,
    /// The connector could not reach the hub.
    NoNetwork,
    /// Reconnect attempts ran out.
    RetryExpired,
    /// The user closed the client.
    ClientClose,
    /// An established session failed.
    CommunicationError,
}

/// Told about every status transition, outside the transport lock.
pub type ConnectionStatusCallback =
    Arc<dyn Fn(ConnectionStatus, ConnectionStatusChangeReason) + Send + Sync>;

/// Current status plus the transitions not yet reported.
///
/// Lives inside a transport's lock; [`StatusTracker::take_events`] hands the
/// pending transitions out so they can be reported after unlocking.
pub(crate) struct StatusTracker {
    status: ConnectionStatus,
    reason: Option<ConnectionStatusChangeReason>,
    callback: Option<ConnectionStatusCallback>,
    pending: Vec<(ConnectionStatus, ConnectionStatusChangeReason)>,
}

impl StatusTracker {
    pub(crate) fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reason: None,
            callback: None,
            pending: Vec::new(),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn set_callback(&mut self, callback: ConnectionStatusCallback) {
        self.callback = Some(callback);
    }

    /// Records a transition. Repeating the current status with the same
    /// reason is not a transition.
    pub(crate) fn set(&mut self, status: ConnectionStatus, reason: ConnectionStatusChangeReason) {
        if self.status == status && self.reason == Some(reason) {
            return;
        }
        info!("connection status {:?} -> {status:?} ({reason:?})", self.status);
        self.status = status;
        self.reason = Some(reason);
        self.pending.push((status, reason));
    }

    pub(crate) fn take_events(&mut self) -> StatusEvents {
        StatusEvents {
            callback: self.callback.clone(),
            events: std::mem::take(&mut self.pending),
        }
    }
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("status", &self.status)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// Transitions taken out of a [`StatusTracker`], reported outside the lock.
#[derive(Default)]
pub(crate) struct StatusEvents {
    callback: Option<ConnectionStatusCallback>,
    events: Vec<(ConnectionStatus, ConnectionStatusChangeReason)>,
}

impl StatusEvents {
    pub(crate) fn notify(self) {
        let Some(callback) = self.callback else {
            return;
        };
        for (status, reason) in self.events {
            callback(status, reason);
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectionStatus {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConnectionStatus::Connected => defmt::write!(f, "Connected"),
            ConnectionStatus::DisconnectedRetrying => defmt::write!(f, "DisconnectedRetrying"),
            ConnectionStatus::Disconnected => defmt::write!(f, "Disconnected"),
        }
    }
}
