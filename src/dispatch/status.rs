//! Terminal outcomes reported to operation callbacks.

/// Final status of one outbound operation.
///
/// Service outcomes are mapped from the HTTP-style status code the hub
/// returns (on the HTTPS response or in the MQTT `$iothub/.../res/{status}`
/// topic). `MessageExpired` and `MessageCancelledOnClose` are produced
/// locally and never seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200
    Ok,
    /// 204
    OkEmpty,
    /// 400
    BadFormat,
    /// 401
    Unauthorized,
    /// 403
    TooManyDevices,
    /// 404
    HubOrDeviceIdNotFound,
    /// 412
    PreconditionFailed,
    /// 413
    RequestEntityTooLarge,
    /// 429
    ThrottlingExceeded,
    /// 500
    InternalServerError,
    /// 503
    ServerBusy,
    /// Any other status, or a local failure.
    Error,
    /// The message aged out while waiting to be sent.
    MessageExpired,
    /// The transport closed before the operation completed.
    MessageCancelledOnClose,
}

impl StatusCode {
    /// Maps a service status code.
    pub fn from_http(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            204 => StatusCode::OkEmpty,
            400 => StatusCode::BadFormat,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::TooManyDevices,
            404 => StatusCode::HubOrDeviceIdNotFound,
            412 => StatusCode::PreconditionFailed,
            413 => StatusCode::RequestEntityTooLarge,
            429 => StatusCode::ThrottlingExceeded,
            500 => StatusCode::InternalServerError,
            503 => StatusCode::ServerBusy,
            _ => StatusCode::Error,
        }
    }

    /// `Ok` or `OkEmpty`.
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::OkEmpty)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for StatusCode {
    fn format(&self, f: defmt::Formatter) {
        match self {
            StatusCode::Ok => defmt::write!(f, "Ok"),
            StatusCode::OkEmpty => defmt::write!(f, "OkEmpty"),
            StatusCode::BadFormat => defmt::write!(f, "BadFormat"),
            StatusCode::Unauthorized => defmt::write!(f, "Unauthorized"),
            StatusCode::TooManyDevices => defmt::write!(f, "TooManyDevices"),
            StatusCode::HubOrDeviceIdNotFound => defmt::write!(f, "HubOrDeviceIdNotFound"),
            StatusCode::PreconditionFailed => defmt::write!(f, "PreconditionFailed"),
            StatusCode::RequestEntityTooLarge => defmt::write!(f, "RequestEntityTooLarge"),
            StatusCode::ThrottlingExceeded => defmt::write!(f, "ThrottlingExceeded"),
            StatusCode::InternalServerError => defmt::write!(f, "InternalServerError"),
            StatusCode::ServerBusy => defmt::write!(f, "ServerBusy"),
            StatusCode::Error => defmt::write!(f, "Error"),
            StatusCode::MessageExpired => defmt::write!(f, "MessageExpired"),
            StatusCode::MessageCancelledOnClose => defmt::write!(f, "MessageCancelledOnClose"),
        }
    }
}
