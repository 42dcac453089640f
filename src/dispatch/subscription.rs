//! Wire subscription state of one sub-protocol.
//!
//! A subscription counts as active only once the broker has acknowledged
//! it. Until then a repeated subscribe call joins the request already in
//! flight and receives the same outcome; a failed request leaves the
//! sub-protocol unsubscribed so the next call goes back on the wire.

use super::{CallbackPacket, Operation, Packet, ResultCallback, StatusCode};
use crate::message::Message;
use std::fmt;

/// Outcome of a subscribe call on a sub-protocol.
pub enum SubscribeAction {
    /// No acknowledged subscription and none in flight; the packet must go
    /// on the wire.
    Send(Packet),
    /// A request is already in flight. The callback was parked and resolves
    /// with that request's outcome.
    Pending,
    /// The broker already acknowledged the subscription. No wire traffic,
    /// but the callback still gets an outcome.
    AlreadySubscribed(Option<ResultCallback>),
}

impl fmt::Debug for SubscribeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeAction::Send(packet) => f.debug_tuple("Send").field(packet).finish(),
            SubscribeAction::Pending => f.write_str("Pending"),
            SubscribeAction::AlreadySubscribed(_) => f.write_str("AlreadySubscribed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Idle,
    Requested,
    Active,
}

/// Tracks whether the broker has accepted a subscription.
#[derive(Default)]
pub struct WireSubscription {
    state: State,
    waiters: Vec<Option<ResultCallback>>,
}

impl WireSubscription {
    /// Starts in the unsubscribed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides what a subscribe call for `operation` has to do.
    pub fn request(
        &mut self,
        operation: Operation,
        on_result: Option<ResultCallback>,
    ) -> SubscribeAction {
        match self.state {
            State::Active => SubscribeAction::AlreadySubscribed(on_result),
            State::Requested => {
                self.waiters.push(on_result);
                SubscribeAction::Pending
            }
            State::Idle => {
                self.state = State::Requested;
                SubscribeAction::Send(
                    Packet::new(operation, Message::default()).with_callback(on_result),
                )
            }
        }
    }

    /// Records the terminal status of the request in flight.
    ///
    /// [`StatusCode::Ok`] makes the subscription active; anything else
    /// returns it to unsubscribed. Parked callbacks come back resolved with
    /// the same status. Does nothing when no request is in flight.
    pub fn settle(&mut self, operation: Operation, status: StatusCode) -> Vec<CallbackPacket> {
        if self.state != State::Requested {
            return Vec::new();
        }
        self.state = if status == StatusCode::Ok {
            State::Active
        } else {
            State::Idle
        };
        self.waiters
            .drain(..)
            .map(|callback| CallbackPacket::new(operation, status, callback))
            .collect()
    }

    /// Marks the subscription active without a broker round trip.
    pub fn activate(&mut self) {
        self.state = State::Active;
    }

    /// The broker acknowledged the subscription.
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// A subscribe request is on its way.
    pub fn is_pending(&self) -> bool {
        self.state == State::Requested
    }
}

impl fmt::Debug for WireSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireSubscription")
            .field("state", &self.state)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
