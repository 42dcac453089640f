//! # Wire Protocol Clients
//!
//! Byte-level clients for the two protocols IoT Hub devices speak here. Both
//! work over any type implementing [`Connection`](crate::network::Connection)
//! and know nothing about IoT Hub topics, batching or correlation; that lives
//! in [`crate::transport`].
//!
//! - **[`http`]**: HTTP/1.1 request/response, used by the HTTPS transport
//! - **[`mqtt`]**: MQTT 3.1.1 session, used by the MQTT transport
//!
//! ```rust,no_run
//! use iothub_device::network::application::http::{Client, Request, Method};
//! # use iothub_device::network::Connection;
//! # struct MockConnection;
//! # impl Connection for MockConnection {}
//! # impl iothub_device::network::Read for MockConnection {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl iothub_device::network::Write for MockConnection {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl iothub_device::network::Close for MockConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//!
//! let mut client = Client::new(MockConnection);
//! let request = Request {
//!     method: Method::Post,
//!     path: "/devices/dev-1/messages/events?api-version=2020-09-30",
//!     headers: Vec::new(),
//!     body: Some(b"{\"temp\":21.5}"),
//! };
//! // let response = client.request(&request)?;
//! ```

/// HTTP client implementation.
///
/// A small HTTP/1.1 client that writes one request and reads one
/// `Content-Length` delimited response.
pub mod http;

/// MQTT client implementation.
///
/// An MQTT 3.1.1 client with QoS 0/1 publish, subscribe and
/// inbound PUBLISH polling.
pub mod mqtt;
