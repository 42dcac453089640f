//! Transports: HTTPS and MQTT.
//!
//! Both transports implement [`Transport`] and share the same outbound
//! pipeline ([`OutboundDispatchQueue`](crate::dispatch::OutboundDispatchQueue)).
//! Each one owns a single mutex around all of its state. Public calls lock
//! it, mutate, and release it before any user callback runs, so a callback
//! may call straight back into the client.
//!
//! Nothing here spawns threads. All wire traffic happens inside
//! [`Transport::do_work`], which the application calls from its own loop.
//!
//! | Operation | HTTPS | MQTT |
//! |---|---|---|
//! | telemetry | batched POST | QoS 1 PUBLISH |
//! | twin get / reported patch | unsupported | `$iothub/twin/...` |
//! | desired subscription | unsupported | `$iothub/twin/PATCH/properties/desired/#` |
//! | direct methods | unsupported | `$iothub/methods/...` |
//! | cloud-to-device messages | polled GET, settled by DELETE / POST | `devices/{device}/messages/devicebound/#` |

pub mod https;
pub mod mqtt;
mod retry;
mod status;

pub use retry::ExponentialBackoff;
pub use status::{ConnectionStatus, ConnectionStatusCallback, ConnectionStatusChangeReason};

use crate::dispatch::{Operation, ResultCallback};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::methods::MethodSubscription;
use crate::receive::MessageCallback;
use crate::twin::{DesiredCallbacks, TwinProperty};

/// One protocol's implementation of the device operations.
///
/// Every method takes `&self`; implementations serialize access with their
/// own lock. Operations a protocol cannot carry return
/// [`Error::UnsupportedOperation`], which is the default here.
pub trait Transport: Send + Sync {
    /// Establishes the link.
    fn open(&self) -> Result<()>;

    /// Queues a telemetry message; it is sent by a later `do_work`.
    fn send_telemetry(&self, message: Message, on_result: Option<ResultCallback>) -> Result<()>;

    /// Requests the full twin document. The callback receives it as its
    /// response payload.
    fn get_twin(&self, _on_result: Option<ResultCallback>) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::TwinGet))
    }

    /// Patches reported properties. `expected_version` is sent as the
    /// optimistic-concurrency `$version`.
    fn update_reported_properties(
        &self,
        _properties: Vec<TwinProperty>,
        _expected_version: Option<i64>,
        _on_result: Option<ResultCallback>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::TwinUpdateReported))
    }

    /// Registers desired-property callbacks, subscribing on first use.
    fn subscribe_desired_properties(
        &self,
        _callbacks: DesiredCallbacks,
        _on_result: Option<ResultCallback>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::TwinSubscribeDesired))
    }

    /// Registers the direct-method handler, subscribing on first use.
    fn subscribe_methods(
        &self,
        _subscription: MethodSubscription,
        _on_result: Option<ResultCallback>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::MethodSubscribe))
    }

    /// Registers the cloud-to-device message callback, replacing any
    /// earlier one and subscribing on first use.
    fn subscribe_messages(
        &self,
        _callback: MessageCallback,
        _on_result: Option<ResultCallback>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::MessageSubscribe))
    }

    /// Answers a method request that is awaiting a response.
    fn respond_to_method(
        &self,
        _request_id: &str,
        _status: u16,
        _payload: Vec<u8>,
        _on_result: Option<ResultCallback>,
    ) -> Result<()> {
        Err(Error::UnsupportedOperation(Operation::MethodResponse))
    }

    /// Sends queued packets, handles inbound traffic, drives reconnects and
    /// runs every ready callback.
    fn do_work(&self) -> Result<()>;

    /// Cancels everything outstanding with
    /// [`StatusCode::MessageCancelledOnClose`](crate::dispatch::StatusCode)
    /// and tears the link down. Closing twice is not an error.
    fn close(&self) -> Result<()>;

    /// Nothing queued, in flight or awaiting callback delivery.
    fn is_empty(&self) -> bool;

    /// Current link state.
    fn connection_status(&self) -> ConnectionStatus;

    /// Replaces the callback told about every link state change.
    fn set_connection_status_callback(&self, callback: ConnectionStatusCallback);
}
