//! HTTP/1.1 request/response client.
//!
//! The HTTPS transport opens one connection per request, writes the request
//! with an exact `Content-Length` and reads the status line, headers and a
//! `Content-Length` delimited body back.
//!
//! # Usage
//!
//! ```rust,no_run
//! use iothub_device::network::application::http::{Client, Header, Method, Request};
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
//!     method: Method::Get,
//!     path: "/devices/dev-1/messages/devicebound",
//!     headers: vec![Header::new("iothub-to", "/devices/dev-1")],
//!     body: None,
//! };
//! // let response = client.request(&request)?;
//! ```

/// HTTP client implementation and supporting types.
pub mod client;

pub use client::{Client, Header, Method, Request, Response};
