//! Outbound packet lifecycle shared by every transport.
//!
//! Each user operation becomes a [`Packet`] and moves through three ordered
//! containers owned by an [`OutboundDispatchQueue`]:
//!
//! ```text
//! enqueue ──► waiting ──► in-progress ──► callback-ready ──► take_callbacks
//!               │  ▲           │                ▲
//!               │  └─ retry ───┘                │
//!               └── expired / cancelled ────────┘
//! ```
//!
//! A packet enters *in-progress* only when it is handed to the wire encoder
//! and leaves it only with a terminal [`StatusCode`]. Expiry is checked when
//! a packet reaches the front of *waiting*, so a message that ages out while
//! queued never reaches the wire. [`OutboundDispatchQueue::cancel_all`]
//! resolves everything still outstanding with
//! [`StatusCode::MessageCancelledOnClose`] and closes the queue; every later
//! enqueue or drain fails with [`Error::Closed`].
//!
//! The queue never invokes user code itself. Outcomes pile up as
//! [`CallbackPacket`]s which the transport hands to the caller's thread
//! after releasing its lock.
//!
//! # Examples
//!
//! ```rust
//! use iothub_device::dispatch::{Disposition, OutboundDispatchQueue, Operation, Packet, StatusCode};
//! use iothub_device::message::Message;
//! use std::sync::{Arc, Mutex};
//! use std::time::Instant;
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let mut queue = OutboundDispatchQueue::new();
//!
//! let sink = seen.clone();
//! queue
//!     .enqueue(
//!         Packet::new(Operation::Telemetry, Message::new(b"21.5".to_vec()))
//!             .on_result(move |status, _| sink.lock().unwrap().push(status)),
//!     )
//!     .unwrap();
//!
//! let sent = queue
//!     .drain(10, Instant::now(), |_packet| Ok(Disposition::Completed(StatusCode::Ok)))
//!     .unwrap();
//! assert_eq!(sent, 1);
//!
//! for callback in queue.take_callbacks() {
//!     callback.invoke();
//! }
//! assert_eq!(*seen.lock().unwrap(), vec![StatusCode::Ok]);
//! ```

mod status;
mod subscription;

#[cfg(test)]
mod tests;

pub use status::StatusCode;
pub use subscription::{SubscribeAction, WireSubscription};

use crate::error::{Error, Result};
use crate::message::Message;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// What a packet asks the transport to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Device-to-cloud telemetry.
    Telemetry,
    /// Fetch the full twin document.
    TwinGet,
    /// Patch reported properties.
    TwinUpdateReported,
    /// Start receiving desired-property patches.
    TwinSubscribeDesired,
    /// Start receiving direct-method requests.
    MethodSubscribe,
    /// Start receiving cloud-to-device messages.
    MessageSubscribe,
    /// Answer a direct-method request.
    MethodResponse,
}

impl Operation {
    /// Operations that cannot be encoded without a request id.
    pub fn requires_request_id(self) -> bool {
        matches!(
            self,
            Operation::TwinGet | Operation::TwinUpdateReported | Operation::MethodResponse
        )
    }

    /// Operations that stay in-progress until a correlated response arrives.
    pub fn awaits_response(self) -> bool {
        matches!(self, Operation::TwinGet | Operation::TwinUpdateReported)
    }
}

/// Per-operation result callback.
///
/// Receives the terminal status and, for twin GET, the response document.
/// Any caller context is captured by the closure.
pub type ResultCallback = Box<dyn FnOnce(StatusCode, Option<&[u8]>) + Send>;

/// Identifier assigned to a packet when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u64);

/// One outbound unit of work.
pub struct Packet {
    id: PacketId,
    operation: Operation,
    message: Message,
    request_id: Option<String>,
    version: Option<i64>,
    status: Option<u16>,
    on_result: Option<ResultCallback>,
}

impl Packet {
    /// Creates a packet carrying `message`.
    pub fn new(operation: Operation, message: Message) -> Self {
        Self {
            id: PacketId(0),
            operation,
            message,
            request_id: None,
            version: None,
            status: None,
            on_result: None,
        }
    }

    /// Sets the request id used to correlate the response.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the twin version (expected version for reported updates).
    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    /// Sets the status carried by a method response.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Registers the result callback.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(StatusCode, Option<&[u8]>) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    pub(crate) fn with_callback(mut self, callback: Option<ResultCallback>) -> Self {
        self.on_result = callback;
        self
    }

    /// Queue-assigned id. Zero until enqueued.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// What the packet asks for.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Body and properties to put on the wire.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Correlation id, set for twin requests and method responses.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Expected twin version, if any.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Method response status.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    fn resolve(self, status: StatusCode, response: Option<Vec<u8>>) -> CallbackPacket {
        CallbackPacket {
            status,
            operation: self.operation,
            request_id: self.request_id,
            response,
            callback: self.on_result,
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("request_id", &self.request_id)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("body_len", &self.message.body().len())
            .finish_non_exhaustive()
    }
}

/// A terminal outcome waiting to be delivered.
pub struct CallbackPacket {
    status: StatusCode,
    operation: Operation,
    request_id: Option<String>,
    response: Option<Vec<u8>>,
    callback: Option<ResultCallback>,
}

impl CallbackPacket {
    pub(crate) fn new(
        operation: Operation,
        status: StatusCode,
        callback: Option<ResultCallback>,
    ) -> Self {
        Self {
            status,
            operation,
            request_id: None,
            response: None,
            callback,
        }
    }

    /// Terminal status handed to the callback.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Operation of the resolved packet.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Request id of the resolved packet, if it had one.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Response document, e.g. the full twin for a GET.
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    /// Runs the user callback, if one was registered.
    pub fn invoke(self) {
        if let Some(callback) = self.callback {
            callback(self.status, self.response.as_deref());
        }
    }
}

impl fmt::Debug for CallbackPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPacket")
            .field("status", &self.status)
            .field("operation", &self.operation)
            .field("request_id", &self.request_id)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// What happened to a packet after the wire accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The send itself is the outcome (QoS 1 telemetry, subscriptions).
    Completed(StatusCode),
    /// Stays in-progress until a correlated response resolves it.
    AwaitResponse,
}

/// Waiting → in-progress → callback-ready pipeline.
#[derive(Default)]
pub struct OutboundDispatchQueue {
    waiting: VecDeque<Packet>,
    in_progress: VecDeque<Packet>,
    callbacks: VecDeque<CallbackPacket>,
    next_id: u64,
    closed: bool,
}

impl OutboundDispatchQueue {
    /// Empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a packet to *waiting*.
    ///
    /// # Errors
    ///
    /// * [`Error::Closed`] after [`cancel_all`](Self::cancel_all)
    /// * [`Error::MissingRequestId`] for a twin/method request without one
    pub fn enqueue(&mut self, mut packet: Packet) -> Result<PacketId> {
        if self.closed {
            return Err(Error::Closed);
        }
        if packet.operation.requires_request_id() && packet.request_id.is_none() {
            return Err(Error::MissingRequestId(packet.operation));
        }
        self.next_id += 1;
        packet.id = PacketId(self.next_id);
        self.waiting.push_back(packet);
        Ok(PacketId(self.next_id))
    }

    /// Queues an outcome that needs no wire traffic, e.g. a repeated
    /// subscription.
    pub fn push_outcome(&mut self, outcome: CallbackPacket) {
        self.callbacks.push_back(outcome);
    }

    /// Removes the first live packet from *waiting*.
    ///
    /// Packets found expired on the way are resolved with
    /// [`StatusCode::MessageExpired`].
    pub fn pop_waiting(&mut self, now: Instant) -> Option<Packet> {
        while let Some(packet) = self.waiting.pop_front() {
            if packet.message.is_expired(now) {
                debug!("{:?} expired before it was sent", packet.id);
                self.callbacks
                    .push_back(packet.resolve(StatusCode::MessageExpired, None));
                continue;
            }
            return Some(packet);
        }
        None
    }

    /// Puts a packet back at the front of *waiting*.
    pub fn return_to_waiting(&mut self, packet: Packet) {
        self.waiting.push_front(packet);
    }

    /// Moves a packet into *in-progress*.
    pub fn start(&mut self, packet: Packet) -> PacketId {
        let id = packet.id;
        self.in_progress.push_back(packet);
        id
    }

    /// Resolves one in-progress packet. Returns `false` if it is not there.
    pub fn complete(&mut self, id: PacketId, status: StatusCode, response: Option<Vec<u8>>) -> bool {
        match self.in_progress.iter().position(|p| p.id == id) {
            Some(index) => self.resolve_at(index, status, response),
            None => false,
        }
    }

    /// Resolves the in-progress packet carrying `request_id`.
    pub fn complete_request(
        &mut self,
        request_id: &str,
        status: StatusCode,
        response: Option<Vec<u8>>,
    ) -> bool {
        match self
            .in_progress
            .iter()
            .position(|p| p.request_id.as_deref() == Some(request_id))
        {
            Some(index) => self.resolve_at(index, status, response),
            None => false,
        }
    }

    /// Resolves every in-progress packet with the same status.
    pub fn complete_all_in_progress(&mut self, status: StatusCode) -> usize {
        let count = self.in_progress.len();
        while let Some(packet) = self.in_progress.pop_front() {
            self.callbacks.push_back(packet.resolve(status, None));
        }
        count
    }

    /// Moves every in-progress packet back to the front of *waiting*,
    /// keeping their relative order.
    pub fn requeue_in_progress(&mut self) -> usize {
        let count = self.in_progress.len();
        while let Some(packet) = self.in_progress.pop_back() {
            self.waiting.push_front(packet);
        }
        count
    }

    /// Sends up to `budget` live packets in FIFO order through `send`.
    ///
    /// A retryable error puts the failing packet back at the front of
    /// *waiting* and stops the drain with that error, so the transport can
    /// react to the lost link. Any other error resolves the packet with
    /// [`StatusCode::Error`] and draining continues.
    pub fn drain<F>(&mut self, budget: usize, now: Instant, mut send: F) -> Result<usize>
    where
        F: FnMut(&Packet) -> Result<Disposition>,
    {
        if self.closed {
            return Err(Error::Closed);
        }

        let mut sent = 0;
        while sent < budget {
            let Some(packet) = self.pop_waiting(now) else {
                break;
            };
            let id = self.start(packet);
            let Some(packet) = self.in_progress.back() else {
                break;
            };

            match send(packet) {
                Ok(Disposition::AwaitResponse) => {}
                Ok(Disposition::Completed(status)) => {
                    self.complete(id, status, None);
                }
                Err(e) if e.is_retryable() => {
                    if let Some(packet) = self.in_progress.pop_back() {
                        self.waiting.push_front(packet);
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!("{id:?} failed permanently: {e}");
                    self.complete(id, StatusCode::Error, None);
                }
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Resolves everything outstanding with
    /// [`StatusCode::MessageCancelledOnClose`] and closes the queue.
    ///
    /// Returns how many packets were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        self.closed = true;
        let mut cancelled = 0;
        for packet in self.in_progress.drain(..).chain(self.waiting.drain(..)) {
            self.callbacks
                .push_back(packet.resolve(StatusCode::MessageCancelledOnClose, None));
            cancelled += 1;
        }
        cancelled
    }

    /// Takes every pending outcome, oldest first.
    pub fn take_callbacks(&mut self) -> Vec<CallbackPacket> {
        self.callbacks.drain(..).collect()
    }

    /// No packet waiting, in flight or awaiting callback delivery.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.in_progress.is_empty() && self.callbacks.is_empty()
    }

    /// Set by [`cancel_all`](Self::cancel_all).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Packets not yet handed to the wire.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Packets on the wire without a terminal status.
    pub fn in_progress_len(&self) -> usize {
        self.in_progress.len()
    }

    /// Outcomes not yet taken.
    pub fn callbacks_len(&self) -> usize {
        self.callbacks.len()
    }

    fn resolve_at(&mut self, index: usize, status: StatusCode, response: Option<Vec<u8>>) -> bool {
        match self.in_progress.remove(index) {
            Some(packet) => {
                self.callbacks.push_back(packet.resolve(status, response));
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for OutboundDispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundDispatchQueue")
            .field("waiting", &self.waiting.len())
            .field("in_progress", &self.in_progress.len())
            .field("callbacks", &self.callbacks.len())
            .field("closed", &self.closed)
            .finish()
    }
}
