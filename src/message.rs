//! Device-to-cloud and cloud-to-device messages.
//!
//! A [`Message`] is a body plus two property bags: application properties
//! chosen by the user and the fixed set of [`SystemProperty`] values the hub
//! understands. Each transport renders the bags differently (HTTP headers,
//! batch JSON, an MQTT topic suffix), so the names for every encoding live on
//! [`SystemProperty`].
//!
//! ```rust
//! use iothub_device::message::Message;
//! use std::time::Duration;
//!
//! let message = Message::new(br#"{"temperature":21.5}"#.to_vec())
//!     .with_message_id("m-17")
//!     .with_content_type("application/json")
//!     .with_property("alert", "false")
//!     .with_expiry(Duration::from_secs(30));
//!
//! assert_eq!(message.properties().len(), 1);
//! assert!(message.expires_at().is_some());
//! ```

use std::time::{Duration, Instant};

/// Well-known message properties interpreted by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemProperty {
    /// User-settable message identifier.
    MessageId,
    /// Identifier of the message this one answers or relates to.
    CorrelationId,
    /// MIME type of the body.
    ContentType,
    /// Encoding of the body, e.g. `utf-8`.
    ContentEncoding,
    /// Destination path.
    To,
    /// Identity of the sender.
    UserId,
}

impl SystemProperty {
    /// All properties in encoding order.
    pub const ALL: [SystemProperty; 6] = [
        SystemProperty::MessageId,
        SystemProperty::CorrelationId,
        SystemProperty::ContentType,
        SystemProperty::ContentEncoding,
        SystemProperty::To,
        SystemProperty::UserId,
    ];

    /// Name used as an HTTPS header and as a batch property key.
    pub fn https_name(self) -> &'static str {
        match self {
            SystemProperty::MessageId => "iothub-messageid",
            SystemProperty::CorrelationId => "iothub-correlationid",
            SystemProperty::ContentType => "iothub-contenttype",
            SystemProperty::ContentEncoding => "iothub-contentencoding",
            SystemProperty::To => "iothub-to",
            SystemProperty::UserId => "iothub-userid",
        }
    }

    /// Name used in the MQTT telemetry topic property bag.
    pub fn mqtt_name(self) -> &'static str {
        match self {
            SystemProperty::MessageId => "$.mid",
            SystemProperty::CorrelationId => "$.cid",
            SystemProperty::ContentType => "$.ct",
            SystemProperty::ContentEncoding => "$.ce",
            SystemProperty::To => "$.to",
            SystemProperty::UserId => "$.uid",
        }
    }

    /// Reverse of [`https_name`](Self::https_name), ignoring ASCII case.
    pub fn from_https_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.https_name().eq_ignore_ascii_case(name))
    }

    /// Reverse of [`mqtt_name`](Self::mqtt_name).
    pub fn from_mqtt_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.mqtt_name() == name)
    }
}

/// A telemetry message, or the body of a twin/method request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    properties: Vec<(String, String)>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    to: Option<String>,
    user_id: Option<String>,
    expires_at: Option<Instant>,
}

impl Message {
    /// Creates a message with the given body and no properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Adds an application property. Later values for the same name win
    /// when a transport flattens the bag.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the content encoding.
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    /// Sets the destination.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Sets the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Expires the message `ttl` from now.
    pub fn with_expiry(self, ttl: Duration) -> Self {
        self.with_expires_at(Instant::now() + ttl)
    }

    /// Expires the message at an absolute instant.
    pub fn with_expires_at(mut self, at: Instant) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Sets any system property.
    pub fn with_system_property(mut self, property: SystemProperty, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match property {
            SystemProperty::MessageId => self.message_id = value,
            SystemProperty::CorrelationId => self.correlation_id = value,
            SystemProperty::ContentType => self.content_type = value,
            SystemProperty::ContentEncoding => self.content_encoding = value,
            SystemProperty::To => self.to = value,
            SystemProperty::UserId => self.user_id = value,
        }
        self
    }

    pub(crate) fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.correlation_id = Some(id.into());
    }

    /// The message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Application properties in insertion order.
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Looks up a system property.
    pub fn system_property(&self, property: SystemProperty) -> Option<&str> {
        let value = match property {
            SystemProperty::MessageId => &self.message_id,
            SystemProperty::CorrelationId => &self.correlation_id,
            SystemProperty::ContentType => &self.content_type,
            SystemProperty::ContentEncoding => &self.content_encoding,
            SystemProperty::To => &self.to,
            SystemProperty::UserId => &self.user_id,
        };
        value.as_deref()
    }

    /// The system properties that are set, in [`SystemProperty::ALL`] order.
    pub fn system_properties(&self) -> impl Iterator<Item = (SystemProperty, &str)> {
        SystemProperty::ALL
            .into_iter()
            .filter_map(|p| self.system_property(p).map(|v| (p, v)))
    }

    /// Absolute expiry, if any.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Whether the message is past its expiry at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
