//! Cloud-to-device messages.
//!
//! The service queues messages per device and hands each one out under a
//! lock until the device settles it with a [`MessageDisposition`]. The
//! registered [`MessageCallback`] decides the disposition and runs outside
//! the transport lock; a panicking callback abandons the message so the hub
//! redelivers it.
//!
//! MQTT acknowledges every delivery at the protocol level, so only HTTPS
//! can act on `Abandon` and `Reject`.
//!
//! ```rust
//! use iothub_device::message::Message;
//! use iothub_device::receive::{MessageDisposition, MessageReceiver};
//! use std::sync::Arc;
//!
//! let mut receiver = MessageReceiver::new();
//! receiver.register(Arc::new(|message: &Message| {
//!     if message.body().is_empty() {
//!         MessageDisposition::Reject
//!     } else {
//!         MessageDisposition::Complete
//!     }
//! }));
//!
//! let delivery = receiver.on_message(Message::new(Vec::new()), Some("lock-1".into())).unwrap();
//! assert_eq!(delivery.run(), MessageDisposition::Reject);
//! ```

use crate::dispatch::{
    CallbackPacket, Operation, ResultCallback, StatusCode, SubscribeAction, WireSubscription,
};
use crate::message::{Message, SystemProperty};
use log::{debug, warn};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// How the device settles a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageDisposition {
    /// Processed; the hub deletes it.
    #[default]
    Complete,
    /// Returned to the queue for another delivery.
    Abandon,
    /// Dead-lettered; never delivered again.
    Reject,
}

/// User handler for cloud-to-device messages.
pub type MessageCallback = Arc<dyn Fn(&Message) -> MessageDisposition + Send + Sync>;

/// A callback invocation prepared under the transport lock.
pub struct MessageDelivery {
    callback: MessageCallback,
    message: Message,
    lock_token: Option<String>,
}

impl MessageDelivery {
    /// The received message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Token needed to settle the message over HTTPS.
    pub fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }

    /// Calls the handler, containing any panic.
    pub fn run(&self) -> MessageDisposition {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(&self.message))) {
            Ok(disposition) => disposition,
            Err(_) => {
                warn!(
                    "message callback panicked on {:?}",
                    self.message.system_property(SystemProperty::MessageId)
                );
                MessageDisposition::Abandon
            }
        }
    }
}

impl fmt::Debug for MessageDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDelivery")
            .field("message", &self.message)
            .field("lock_token", &self.lock_token)
            .finish_non_exhaustive()
    }
}

/// Message callback and subscription state for one device.
#[derive(Default)]
pub struct MessageReceiver {
    callback: Option<MessageCallback>,
    wire: WireSubscription,
}

impl MessageReceiver {
    /// No callback, not subscribed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback is registered.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// The hub acknowledged the subscription, or the transport needs none.
    pub fn is_subscribed(&self) -> bool {
        self.wire.is_active()
    }

    /// Replaces the callback and yields the subscribe packet until the hub
    /// acknowledges one.
    pub fn subscribe(
        &mut self,
        callback: MessageCallback,
        on_result: Option<ResultCallback>,
    ) -> SubscribeAction {
        self.callback = Some(callback);
        self.wire.request(Operation::MessageSubscribe, on_result)
    }

    /// Records the outcome of the subscribe request.
    pub fn subscription_settled(&mut self, status: StatusCode) -> Vec<CallbackPacket> {
        self.wire.settle(Operation::MessageSubscribe, status)
    }

    /// Replaces the callback on a transport that polls instead of
    /// subscribing.
    pub fn register(&mut self, callback: MessageCallback) {
        self.callback = Some(callback);
        self.wire.activate();
    }

    /// Prepares the callback call for an inbound message. `None` when no
    /// callback is registered.
    pub fn on_message(&self, message: Message, lock_token: Option<String>) -> Option<MessageDelivery> {
        let Some(callback) = &self.callback else {
            debug!("cloud-to-device message arrived with no callback registered");
            return None;
        };
        Some(MessageDelivery {
            callback: callback.clone(),
            message,
            lock_token,
        })
    }
}

impl fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("has_callback", &self.callback.is_some())
            .field("wire", &self.wire)
            .finish()
    }
}
