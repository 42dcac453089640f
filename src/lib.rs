//! # iothub-device - IoT Hub device client core
//!
//! Device-side plumbing for talking to an IoT Hub: device-to-cloud
//! telemetry, cloud-to-device messages, the device twin and direct
//! methods, over MQTT or HTTPS.
//!
//! ## Features
//!
//! ### Transports
//! - **MQTT**: telemetry (QoS 1), twin GET / reported PATCH / desired
//!   patches, direct methods. Reconnects with capped exponential backoff and
//!   restores subscriptions.
//! - **HTTPS**: telemetry batched into JSON array bodies under the hub's
//!   size ceiling, and polled cloud-to-device messages.
//!
//! ### Outbound pipeline
//! Every operation becomes a [`dispatch::Packet`] that moves through an
//! [`dispatch::OutboundDispatchQueue`] and ends with exactly one
//! [`dispatch::StatusCode`] delivered to its callback, including on expiry
//! and on close.
//!
//! ### Device twin
//! [`twin::TwinSynchronizer`] keeps desired and reported snapshots with
//! their versions and `$metadata`, and routes desired changes to per-key,
//! generic or whole-patch callbacks.
//!
//! ### Direct methods
//! [`methods::MethodInvocationHandler`] tracks each request from receipt to
//! response and turns handler failures into an error status instead of a
//! crash.
//!
//! ### Cloud-to-device messages
//! [`receive::MessageReceiver`] hands each received message to the
//! registered callback, whose [`receive::MessageDisposition`] completes,
//! abandons or rejects it.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! iothub-device = "0.1.0"
//! ```
//!
//! ```rust,no_run
//! use iothub_device::client::DeviceClient;
//! use iothub_device::config::{ClientConfig, StaticCredential};
//! use iothub_device::message::Message;
//! use iothub_device::methods::{MethodRequest, MethodSubscription};
//! use iothub_device::twin::DesiredCallbacks;
//! # use iothub_device::network::{Close, Connect, Connection, Read, Write};
//! # struct Tls;
//! # impl Connection for Tls {}
//! # impl Read for Tls {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl Write for Tls {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl Close for Tls {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct TlsConnector;
//! # impl Connect for TlsConnector {
//! #     type Connection = Tls;
//! #     type Error = ();
//! #     fn connect(&mut self, _remote: &str) -> Result<Tls, ()> { Ok(Tls) }
//! # }
//!
//! # fn main() -> iothub_device::error::Result<()> {
//! let config = ClientConfig::from_connection_string(
//!     "HostName=hub.azure-devices.net;DeviceId=thermostat-1;SharedAccessKey=a2V5",
//! )?;
//! let client = DeviceClient::mqtt(&config, TlsConnector, StaticCredential::new("SharedAccessSignature sr=..."))?;
//! client.open()?;
//!
//! client.subscribe_desired_properties(
//!     DesiredCallbacks::per_property()
//!         .on_key("targetTemperature", |p| log::info!("target now {}", p.value())),
//! )?;
//! client.subscribe_methods(MethodSubscription::new(|req: &MethodRequest| {
//!     Some(req.respond(200, br#"{"rebooting":true}"#.to_vec()))
//! }))?;
//! client.send_telemetry(Message::new(br#"{"temperature":21.5}"#.to_vec()), |status, _| {
//!     log::info!("telemetry: {status:?}")
//! })?;
//!
//! loop {
//!     client.do_work()?;
//! #   break;
//! }
//! # client.close()
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - `defmt`: `defmt::Format` for the wire error, status code and
//!   connection status

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

/// Byte streams and the MQTT/HTTP wire clients running over them.
pub mod network;

/// Crate-wide error type.
pub mod error;

/// Telemetry messages and their system properties.
pub mod message;

/// Client configuration and credentials.
pub mod config;

/// Outbound packet pipeline and terminal status codes.
pub mod dispatch;

/// Device twin state and desired-property routing.
pub mod twin;

/// Direct-method requests and responses.
pub mod methods;

/// Cloud-to-device message delivery and settlement.
pub mod receive;

/// MQTT and HTTPS transports.
pub mod transport;

/// The device-facing client handle.
pub mod client;

pub use client::DeviceClient;
pub use error::{Error, Result};
