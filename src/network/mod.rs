//! Byte-stream abstraction underneath the IoT Hub transports.
//!
//! The transports never open sockets or negotiate TLS themselves. They are
//! handed something implementing [`Connect`], which yields a [`Connection`]
//! over which the wire clients in [`application`] speak MQTT or HTTP.

/// Common error types for network operations
pub mod error;

/// Wire protocol clients (MQTT 3.1.1, HTTP/1.1)
pub mod application;

/// Readable half of a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Writable half of a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// A connection that can be shut down.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
///
/// Implemented by the platform's TLS layer. The transports call it once on
/// open and again for every reconnect attempt.
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// Writes the whole buffer, looping over short writes.
pub(crate) fn write_all<W: Write>(writer: &mut W, mut buf: &[u8]) -> Result<(), error::Error> {
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => return Err(error::Error::ConnectionClosed),
            Ok(n) => buf = &buf[n..],
            Err(_) => return Err(error::Error::WriteError),
        }
    }
    Ok(())
}

/// Fills `buf` completely, looping over short reads.
pub(crate) fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), error::Error> {
    let mut total_read = 0;
    while total_read < buf.len() {
        match reader.read(&mut buf[total_read..]) {
            Ok(0) => return Err(error::Error::ConnectionClosed),
            Ok(n) => total_read += n,
            Err(_) => return Err(error::Error::ReadError),
        }
    }
    Ok(())
}
