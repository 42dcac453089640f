//! The device-facing client.
//!
//! [`DeviceClient`] is a cheap, cloneable handle over one [`Transport`].
//! Clones share the transport, so a callback can capture a clone and call
//! back into the client (for example to answer a method request later).
//!
//! ```rust,no_run
//! use iothub_device::client::DeviceClient;
//! use iothub_device::config::ClientConfig;
//! use iothub_device::message::Message;
//! use iothub_device::transport::mqtt::{MqttConnector, MqttTransport};
//!
//! fn run<K: MqttConnector>(connector: K) -> iothub_device::error::Result<()> {
//!     let config = ClientConfig::from_connection_string(
//!         "HostName=hub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=a2V5",
//!     )?;
//!     let client = DeviceClient::new(MqttTransport::new(&config, connector)?);
//!     client.open()?;
//!     client.send_telemetry(
//!         Message::new(br#"{"temperature":21.5}"#.to_vec()).with_content_type("application/json"),
//!         |status, _| log::info!("telemetry: {status:?}"),
//!     )?;
//!     while !client.is_empty() {
//!         client.do_work()?;
//!     }
//!     client.close()
//! }
//! ```

use crate::config::{ClientConfig, CredentialSource};
use crate::dispatch::StatusCode;
use crate::error::Result;
use crate::message::Message;
use crate::methods::MethodSubscription;
use crate::network::Connect;
use crate::receive::MessageDisposition;
use crate::transport::https::{HttpsDialer, HttpsTransport};
use crate::transport::mqtt::{MqttDialer, MqttTransport};
use crate::transport::{ConnectionStatus, ConnectionStatusChangeReason, Transport};
use crate::twin::{DesiredCallbacks, TwinProperty};
use std::fmt;
use std::sync::Arc;

/// Handle to one device connection.
pub struct DeviceClient<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for DeviceClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for DeviceClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("status", &self.transport.connection_status())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> DeviceClient<T> {
    /// Wraps `transport`; nothing is sent before [`open`](Self::open).
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects, or for HTTPS enables sending.
    pub fn open(&self) -> Result<()> {
        self.transport.open()
    }

    /// Queues a telemetry message.
    pub fn send_telemetry<F>(&self, message: Message, on_result: F) -> Result<()>
    where
        F: FnOnce(StatusCode, Option<&[u8]>) + Send + 'static,
    {
        self.transport.send_telemetry(message, Some(Box::new(on_result)))
    }

    /// Requests the full twin; the callback receives the JSON document.
    pub fn get_twin<F>(&self, on_result: F) -> Result<()>
    where
        F: FnOnce(StatusCode, Option<&[u8]>) + Send + 'static,
    {
        self.transport.get_twin(Some(Box::new(on_result)))
    }

    /// Patches reported properties.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`](crate::error::Error::DuplicateKey) if a key
    /// repeats, before anything is queued.
    pub fn update_reported_properties<F>(
        &self,
        properties: Vec<TwinProperty>,
        expected_version: Option<i64>,
        on_result: F,
    ) -> Result<()>
    where
        F: FnOnce(StatusCode, Option<&[u8]>) + Send + 'static,
    {
        self.transport
            .update_reported_properties(properties, expected_version, Some(Box::new(on_result)))
    }

    /// Starts receiving desired-property patches.
    pub fn subscribe_desired_properties(&self, callbacks: DesiredCallbacks) -> Result<()> {
        self.transport.subscribe_desired_properties(callbacks, None)
    }

    /// Starts receiving direct method requests.
    pub fn subscribe_methods(&self, subscription: MethodSubscription) -> Result<()> {
        self.transport.subscribe_methods(subscription, None)
    }

    /// Answers a method request from inside its handler, through a clone of
    /// this client. The handler should then return `None`.
    pub fn respond_to_method(&self, request_id: &str, status: u16, payload: Vec<u8>) -> Result<()> {
        self.transport.respond_to_method(request_id, status, payload, None)
    }

    /// Starts receiving cloud-to-device messages. The callback's return
    /// value settles each message; MQTT always completes them.
    pub fn subscribe_messages<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Message) -> MessageDisposition + Send + Sync + 'static,
    {
        self.transport.subscribe_messages(Arc::new(callback), None)
    }

    /// Runs one round of sending, receiving and callbacks.
    pub fn do_work(&self) -> Result<()> {
        self.transport.do_work()
    }

    /// Disconnects and cancels everything still queued.
    pub fn close(&self) -> Result<()> {
        self.transport.close()
    }

    /// Nothing waits to be sent or answered.
    pub fn is_empty(&self) -> bool {
        self.transport.is_empty()
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.connection_status()
    }

    /// Called on every connection status change.
    pub fn register_connection_status_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionStatus, ConnectionStatusChangeReason) + Send + Sync + 'static,
    {
        self.transport.set_connection_status_callback(Arc::new(callback));
    }
}

impl<N, S> DeviceClient<MqttTransport<MqttDialer<N, S>>>
where
    N: Connect + Send,
    N::Connection: Send,
    S: CredentialSource,
{
    /// MQTT client over the crate's wire client.
    pub fn mqtt(config: &ClientConfig, connector: N, credentials: S) -> Result<Self> {
        let dialer = MqttDialer::new(connector, config, credentials);
        Ok(Self::new(MqttTransport::new(config, dialer)?))
    }
}

impl<N, S> DeviceClient<HttpsTransport<HttpsDialer<N, S>>>
where
    N: Connect + Send,
    S: CredentialSource,
{
    /// HTTPS client for telemetry and polled cloud-to-device messages.
    pub fn https(config: &ClientConfig, connector: N, credentials: S) -> Result<Self> {
        let dialer = HttpsDialer::new(connector, config, credentials);
        Ok(Self::new(HttpsTransport::new(config, dialer)?))
    }
}
