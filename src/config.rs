//! Client configuration
//!
//! Everything the transports need to reach one device identity on one hub.
//! A [`ClientConfig`] can be built from a device connection string, from
//! JSON, or field by field starting at [`ClientConfig::default`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on the delay between two reconnect attempts.
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Core client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // --- Identity ---
    /// Fully qualified hub host name, e.g. `myhub.azure-devices.net`
    pub host_name: String,
    /// Device identity registered on the hub
    pub device_id: String,
    /// Symmetric key from the connection string, if any
    #[serde(skip_serializing)]
    pub shared_access_key: Option<String>,

    // --- Protocol ---
    /// Service API version sent on every request
    pub api_version: String,
    /// MQTT keep-alive (seconds)
    pub keep_alive_seconds: u16,

    // --- Dispatch ---
    /// Upper bound on packets sent (and inbound messages handled) per `do_work` call
    pub max_messages_per_send: usize,

    // --- Cloud-to-device ---
    /// HTTPS cloud-to-device poll interval (milliseconds)
    pub receive_interval_ms: u64,
    /// How long the hub keeps a message received over HTTPS locked (seconds)
    pub message_lock_timeout_secs: u32,

    // --- Reconnect ---
    /// Backoff used after a lost connection
    pub retry: RetryConfig,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the second attempt (milliseconds); doubles afterwards
    pub base_delay_ms: u64,
    /// Largest delay (milliseconds); clamped to 60 s
    pub max_delay_ms: u64,
    /// Give up after this many failed attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            device_id: String::new(),
            shared_access_key: None,

            api_version: "2020-09-30".into(),
            keep_alive_seconds: 230,

            max_messages_per_send: 10,

            receive_interval_ms: 25 * 60 * 1000,
            message_lock_timeout_secs: 180,

            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: MAX_RETRY_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl ClientConfig {
    /// Shorthand for a config with identity set and defaults elsewhere.
    pub fn new(host_name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Parses `HostName=...;DeviceId=...;SharedAccessKey=...`.
    ///
    /// Key order does not matter and unknown keys (`GatewayHostName`,
    /// `ModuleId`, ...) are ignored. Values may contain `=`, as base64 keys do.
    ///
    /// ```rust
    /// use iothub_device::config::ClientConfig;
    ///
    /// let config = ClientConfig::from_connection_string(
    ///     "HostName=hub.azure-devices.net;DeviceId=dev-1;SharedAccessKey=a2V5==",
    /// ).unwrap();
    /// assert_eq!(config.device_id, "dev-1");
    /// assert_eq!(config.shared_access_key.as_deref(), Some("a2V5=="));
    /// ```
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut config = Self::default();
        for part in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, found {part:?}")))?;
            match key.trim() {
                "HostName" => config.host_name = value.trim().to_string(),
                "DeviceId" => config.device_id = value.trim().to_string(),
                "SharedAccessKey" => config.shared_access_key = Some(value.trim().to_string()),
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Deserializes and validates a JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no transport could work with.
    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(Error::Config("host name is empty".into()));
        }
        if self.device_id.trim().is_empty() {
            return Err(Error::Config("device id is empty".into()));
        }
        if self.max_messages_per_send == 0 {
            return Err(Error::Config("max_messages_per_send must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config("retry max delay is below the base delay".into()));
        }
        Ok(())
    }

    /// MQTT user name, `{host}/{device}/?api-version={version}`.
    pub fn mqtt_username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.host_name, self.device_id, self.api_version
        )
    }
}

/// Supplies the password (SAS token) presented on every connect.
///
/// Called again before each reconnect attempt so an expired token can be
/// replaced without tearing the client down.
pub trait CredentialSource: Send {
    /// The current credential, or `None` to connect without a password.
    fn credential(&mut self) -> Option<String>;
}

/// A credential that never changes.
#[derive(Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    /// Wraps a fixed token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// No password at all, e.g. for X.509 authenticated TLS.
    pub fn none() -> Self {
        Self(None)
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticCredential")
            .field(&self.0.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialSource for StaticCredential {
    fn credential(&mut self) -> Option<String> {
        self.0.clone()
    }
}

impl<F> CredentialSource for F
where
    F: FnMut() -> Option<String> + Send,
{
    fn credential(&mut self) -> Option<String> {
        self()
    }
}
