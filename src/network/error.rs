//! Common error types for network operations

/// A common error type for network operations.
///
/// Kept small and `Copy` so the wire clients can return it from tight
/// read/write loops. The transports decide what to do with a failure by
/// asking [`Error::is_retryable`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    #[error("connection is not open")]
    NotOpen,
    /// An error occurred during a write operation.
    #[error("write failed")]
    WriteError,
    /// An error occurred during a read operation.
    #[error("read failed")]
    ReadError,
    /// A connection attempt was refused.
    #[error("connection refused")]
    ConnectionRefused,
    /// A timeout occurred.
    #[error("operation timed out")]
    Timeout,
    /// The connection was closed.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// An invalid address was provided.
    #[error("invalid address")]
    InvalidAddress,
    /// A protocol-specific error occurred.
    #[error("protocol error")]
    ProtocolError,
    /// A packet or request body is larger than the protocol allows.
    #[error("payload too large")]
    PayloadTooLarge,
}

impl Error {
    /// Whether the failure is a property of the link rather than of the data.
    ///
    /// Packets that fail with a retryable error go back to the waiting queue
    /// and the transport starts reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotOpen
                | Error::WriteError
                | Error::ReadError
                | Error::Timeout
                | Error::ConnectionClosed
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::ConnectionRefused => defmt::write!(f, "ConnectionRefused"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionClosed => defmt::write!(f, "ConnectionClosed"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
            Error::ProtocolError => defmt::write!(f, "ProtocolError"),
            Error::PayloadTooLarge => defmt::write!(f, "PayloadTooLarge"),
        }
    }
}
