//! IoT Hub MQTT topic grammar.
//!
//! MQTT has no request/response, so the hub encodes the operation, the
//! status and a client-chosen request id (`$rid`) in topic strings. The
//! strings below are fixed by the service and reproduced byte-for-byte:
//!
//! | Direction | Topic |
//! |---|---|
//! | out | `$iothub/twin/GET/?$rid={rid}` |
//! | out | `$iothub/twin/PATCH/properties/reported/?$rid={rid}&$version={version}` |
//! | in  | `$iothub/twin/res/{status}/?$rid={rid}&$version={version}` |
//! | in  | `$iothub/twin/PATCH/properties/desired/?$version={version}` |
//! | in  | `$iothub/methods/POST/{name}/?$rid={rid}` |
//! | out | `$iothub/methods/res/{status}/?$rid={rid}` |
//! | out | `devices/{device}/messages/events/{property bag}` |
//! | in  | `devices/{device}/messages/devicebound/{property bag}` |
//!
//! [`build_topic`] and [`parse_topic`] cover the twin and method grammar;
//! [`parse_property_bag`] reads the bag on device-bound messages.
//! The transport talks to three [`TopicCodec`] implementations
//! ([`TelemetryTopics`], [`TwinTopics`], [`MethodTopics`]), one per
//! sub-protocol.

use crate::dispatch::{Operation, Packet};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::network::application::mqtt::QoS;

const TWIN_GET: &str = "$iothub/twin/GET/";
const TWIN_PATCH_REPORTED: &str = "$iothub/twin/PATCH/properties/reported/";
const TWIN_PATCH_DESIRED: &str = "$iothub/twin/PATCH/properties/desired/";
const TWIN_PREFIX: &str = "$iothub/twin/";
const METHOD_RESPONSE: &str = "$iothub/methods/res/";
const METHOD_PREFIX: &str = "$iothub/methods/";

/// Subscription receiving every twin response.
pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
/// Subscription receiving desired-property patches.
pub const TWIN_DESIRED_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
/// Subscription receiving direct-method requests.
pub const METHOD_REQUEST_FILTER: &str = "$iothub/methods/POST/#";

/// A decoded inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    /// Answer to a twin GET or reported-properties PATCH.
    TwinResponse {
        /// Three-digit service status.
        status: u16,
        /// `$rid` token, if present.
        request_id: Option<String>,
        /// `$version` token, if present.
        version: Option<i64>,
    },
    /// Desired-property patch pushed by the service.
    DesiredPatch {
        /// `$version` token, if present.
        version: Option<i64>,
    },
    /// Direct-method invocation.
    MethodRequest {
        /// Method name.
        name: String,
        /// `$rid` token; mandatory on this topic.
        request_id: String,
    },
    /// Cloud-to-device message.
    CloudToDevice {
        /// Decoded property bag, in topic order.
        properties: Vec<(String, String)>,
    },
}

impl InboundTopic {
    /// `$rid` carried by twin responses and method requests.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundTopic::TwinResponse { request_id, .. } => request_id.as_deref(),
            InboundTopic::MethodRequest { request_id, .. } => Some(request_id),
            InboundTopic::DesiredPatch { .. } | InboundTopic::CloudToDevice { .. } => None,
        }
    }

    /// `$version` of a twin response or desired patch.
    pub fn version(&self) -> Option<i64> {
        match self {
            InboundTopic::TwinResponse { version, .. } | InboundTopic::DesiredPatch { version } => {
                *version
            }
            InboundTopic::MethodRequest { .. } | InboundTopic::CloudToDevice { .. } => None,
        }
    }

    /// Service status of a twin response.
    pub fn status(&self) -> Option<u16> {
        match self {
            InboundTopic::TwinResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Name of an invoked method.
    pub fn method_name(&self) -> Option<&str> {
        match self {
            InboundTopic::MethodRequest { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Builds the outbound topic for a twin or method operation.
///
/// # Errors
///
/// * [`Error::MissingRequestId`] when `operation` needs a request id
/// * [`Error::MalformedTopic`] for a method response without a status
/// * [`Error::UnsupportedOperation`] for telemetry and the message
///   subscription, whose topics depend on the device (see [`TelemetryTopics`])
///
/// ```rust
/// use iothub_device::dispatch::Operation;
/// use iothub_device::transport::mqtt::topic::build_topic;
///
/// assert_eq!(
///     build_topic(Operation::TwinGet, Some("abc"), None, None).unwrap(),
///     "$iothub/twin/GET/?$rid=abc"
/// );
/// assert_eq!(
///     build_topic(Operation::MethodResponse, Some("r1"), None, Some(200)).unwrap(),
///     "$iothub/methods/res/200/?$rid=r1"
/// );
/// ```
pub fn build_topic(
    operation: Operation,
    request_id: Option<&str>,
    version: Option<i64>,
    status: Option<u16>,
) -> Result<String> {
    let rid = || request_id.ok_or(Error::MissingRequestId(operation));
    match operation {
        Operation::TwinGet => Ok(format!("{TWIN_GET}?$rid={}", rid()?)),
        Operation::TwinUpdateReported => {
            let mut topic = format!("{TWIN_PATCH_REPORTED}?$rid={}", rid()?);
            if let Some(version) = version {
                topic.push_str(&format!("&$version={version}"));
            }
            Ok(topic)
        }
        Operation::TwinSubscribeDesired => Ok(match version {
            Some(version) => format!("{TWIN_PATCH_DESIRED}?$version={version}"),
            None => TWIN_DESIRED_FILTER.to_string(),
        }),
        Operation::MethodSubscribe => Ok(METHOD_REQUEST_FILTER.to_string()),
        Operation::MethodResponse => {
            let rid = rid()?;
            let status = status.ok_or_else(|| Error::MalformedTopic {
                topic: METHOD_RESPONSE.to_string(),
                reason: "method response requires a status",
            })?;
            Ok(format!("{METHOD_RESPONSE}{status}/?$rid={rid}"))
        }
        Operation::Telemetry | Operation::MessageSubscribe => {
            Err(Error::UnsupportedOperation(operation))
        }
    }
}

/// Parses an inbound twin or method topic.
///
/// The topic is split on `/`. Query tokens (`$rid`, `$version`) come from the
/// final `?`-prefixed segment and may appear in either order.
///
/// ```rust
/// use iothub_device::transport::mqtt::topic::{parse_topic, InboundTopic};
///
/// let parsed = parse_topic("$iothub/twin/res/200/?$rid=abc&$version=5").unwrap();
/// assert_eq!(
///     parsed,
///     InboundTopic::TwinResponse { status: 200, request_id: Some("abc".into()), version: Some(5) }
/// );
/// ```
pub fn parse_topic(topic: &str) -> Result<InboundTopic> {
    let malformed = |reason| Error::MalformedTopic {
        topic: topic.to_string(),
        reason,
    };
    let segments: Vec<&str> = topic.split('/').collect();

    match segments.as_slice() {
        ["$iothub", "twin", "res", status, rest @ ..] => {
            let status = parse_status(status).ok_or_else(|| malformed("status is not 3 digits"))?;
            let query = parse_query(rest).ok_or_else(|| malformed("bad query segment"))?;
            Ok(InboundTopic::TwinResponse {
                status,
                request_id: query.request_id,
                version: query.version,
            })
        }
        ["$iothub", "twin", "PATCH", "properties", "desired", rest @ ..] => {
            let query = parse_query(rest).ok_or_else(|| malformed("bad query segment"))?;
            Ok(InboundTopic::DesiredPatch {
                version: query.version,
            })
        }
        ["$iothub", "methods", "POST", name, rest @ ..] => {
            if name.is_empty() || name.starts_with('?') {
                return Err(malformed("missing method name"));
            }
            let query = parse_query(rest).ok_or_else(|| malformed("bad query segment"))?;
            let request_id = query.request_id.ok_or_else(|| malformed("missing $rid"))?;
            Ok(InboundTopic::MethodRequest {
                name: name.to_string(),
                request_id,
            })
        }
        _ => Err(malformed("not a twin or method topic")),
    }
}

fn parse_status(token: &str) -> Option<u16> {
    if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

#[derive(Default)]
struct Query {
    request_id: Option<String>,
    version: Option<i64>,
}

/// Reads `$rid` and `$version` from the trailing `?a=b&c=d` segment.
fn parse_query(rest: &[&str]) -> Option<Query> {
    let mut query = Query::default();
    let segment = match rest {
        [] | [""] => return Some(query),
        [segment] => segment.strip_prefix('?')?,
        _ => return None,
    };

    for pair in segment.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        match key {
            "$rid" if !value.is_empty() => query.request_id = Some(value.to_string()),
            "$version" => query.version = Some(value.parse().ok()?),
            _ => {}
        }
    }
    Some(query)
}

/// Decodes the `key=value&key=value` property bag of a device-bound topic.
///
/// Keys and values are percent-decoded. An empty bag yields no properties;
/// a pair without `=` is an error.
///
/// ```rust
/// use iothub_device::transport::mqtt::topic::parse_property_bag;
///
/// let bag = parse_property_bag("%24.mid=42&note=a%26b").unwrap();
/// assert_eq!(bag, vec![("$.mid".into(), "42".into()), ("note".into(), "a&b".into())]);
/// ```
pub fn parse_property_bag(bag: &str) -> Result<Vec<(String, String)>> {
    let malformed = |reason| Error::MalformedTopic {
        topic: bag.to_string(),
        reason,
    };
    bag.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| malformed("property without '='"))?;
            let key = urlencoding::decode(key).map_err(|_| malformed("key is not UTF-8"))?;
            let value = urlencoding::decode(value).map_err(|_| malformed("value is not UTF-8"))?;
            Ok((key.into_owned(), value.into_owned()))
        })
        .collect()
}

/// What the session must do to put a packet on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireAction {
    /// PUBLISH the packet body on `topic`.
    Publish {
        /// Full topic including any query or property bag.
        topic: String,
        /// Delivery guarantee for the publish.
        qos: QoS,
    },
    /// SUBSCRIBE to `filter`.
    Subscribe {
        /// Topic filter, wildcards included.
        filter: String,
        /// Maximum QoS requested for deliveries.
        qos: QoS,
    },
}

/// Topic grammar and routing for one sub-protocol.
pub trait TopicCodec {
    /// Wire action for a packet owned by this codec; `None` if it is not.
    fn encode(&self, packet: &Packet) -> Option<Result<WireAction>>;

    /// Decodes an inbound topic owned by this codec; `None` if it is not.
    fn decode(&self, topic: &str) -> Option<Result<InboundTopic>>;

    /// Filter that must be subscribed before `operation` can see a response.
    fn response_filter(&self, _operation: Operation) -> Option<&'static str> {
        None
    }
}

/// Device-to-cloud and cloud-to-device messages of one device.
///
/// Outbound: `devices/{device}/messages/events/` plus the URL-encoded
/// property bag. Inbound: `devices/{device}/messages/devicebound/` plus a
/// bag in the same format.
#[derive(Debug, Clone)]
pub struct TelemetryTopics {
    base: String,
    inbox: String,
}

impl TelemetryTopics {
    /// Topics for `device_id`.
    pub fn new(device_id: &str) -> Self {
        Self {
            base: format!("devices/{device_id}/messages/events/"),
            inbox: format!("devices/{device_id}/messages/devicebound/"),
        }
    }

    /// Subscription receiving this device's cloud-to-device messages.
    pub fn inbox_filter(&self) -> String {
        format!("{}#", self.inbox)
    }

    /// Topic for one message: system properties, then application
    /// properties, as `key=value` pairs joined by `&`. Values and
    /// application property names are percent-encoded.
    pub fn topic_for(&self, message: &Message) -> String {
        let system = message.system_properties().map(|(property, value)| {
            format!("{}={}", property.mqtt_name(), urlencoding::encode(value))
        });
        let application = message.properties().iter().map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        });

        let bag: Vec<String> = system.chain(application).collect();
        format!("{}{}", self.base, bag.join("&"))
    }
}

impl TopicCodec for TelemetryTopics {
    fn encode(&self, packet: &Packet) -> Option<Result<WireAction>> {
        match packet.operation() {
            Operation::Telemetry => Some(Ok(WireAction::Publish {
                topic: self.topic_for(packet.message()),
                qos: QoS::AtLeastOnce,
            })),
            Operation::MessageSubscribe => Some(Ok(WireAction::Subscribe {
                filter: self.inbox_filter(),
                qos: QoS::AtLeastOnce,
            })),
            _ => None,
        }
    }

    fn decode(&self, topic: &str) -> Option<Result<InboundTopic>> {
        let bag = topic.strip_prefix(self.inbox.as_str())?;
        Some(parse_property_bag(bag).map(|properties| InboundTopic::CloudToDevice { properties }))
    }
}

/// Twin GET, reported PATCH, desired subscription and their responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwinTopics;

impl TopicCodec for TwinTopics {
    fn encode(&self, packet: &Packet) -> Option<Result<WireAction>> {
        let operation = packet.operation();
        match operation {
            Operation::TwinGet | Operation::TwinUpdateReported => Some(
                build_topic(operation, packet.request_id(), packet.version(), None)
                    .map(|topic| WireAction::Publish {
                        topic,
                        qos: QoS::AtMostOnce,
                    }),
            ),
            Operation::TwinSubscribeDesired => Some(Ok(WireAction::Subscribe {
                filter: TWIN_DESIRED_FILTER.to_string(),
                qos: QoS::AtMostOnce,
            })),
            _ => None,
        }
    }

    fn decode(&self, topic: &str) -> Option<Result<InboundTopic>> {
        topic.starts_with(TWIN_PREFIX).then(|| parse_topic(topic))
    }

    fn response_filter(&self, operation: Operation) -> Option<&'static str> {
        operation.awaits_response().then_some(TWIN_RESPONSE_FILTER)
    }
}

/// Method subscription, inbound requests and outbound responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodTopics;

impl TopicCodec for MethodTopics {
    fn encode(&self, packet: &Packet) -> Option<Result<WireAction>> {
        let operation = packet.operation();
        match operation {
            Operation::MethodSubscribe => Some(Ok(WireAction::Subscribe {
                filter: METHOD_REQUEST_FILTER.to_string(),
                qos: QoS::AtMostOnce,
            })),
            Operation::MethodResponse => Some(
                build_topic(operation, packet.request_id(), None, packet.status()).map(|topic| {
                    WireAction::Publish {
                        topic,
                        qos: QoS::AtMostOnce,
                    }
                }),
            ),
            _ => None,
        }
    }

    fn decode(&self, topic: &str) -> Option<Result<InboundTopic>> {
        topic.starts_with(METHOD_PREFIX).then(|| parse_topic(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn twin_get_topic() {
        assert_eq!(
            build_topic(Operation::TwinGet, Some("abc"), None, None).unwrap(),
            "$iothub/twin/GET/?$rid=abc"
        );
    }

    #[test]
    fn twin_get_without_request_id_fails() {
        assert!(matches!(
            build_topic(Operation::TwinGet, None, None, None),
            Err(Error::MissingRequestId(Operation::TwinGet))
        ));
    }

    #[test]
    fn reported_patch_topic_with_and_without_version() {
        assert_eq!(
            build_topic(Operation::TwinUpdateReported, Some("4"), Some(12), None).unwrap(),
            "$iothub/twin/PATCH/properties/reported/?$rid=4&$version=12"
        );
        assert_eq!(
            build_topic(Operation::TwinUpdateReported, Some("4"), None, None).unwrap(),
            "$iothub/twin/PATCH/properties/reported/?$rid=4"
        );
    }

    #[test]
    fn desired_subscribe_topic() {
        assert_eq!(
            build_topic(Operation::TwinSubscribeDesired, None, Some(3), None).unwrap(),
            "$iothub/twin/PATCH/properties/desired/?$version=3"
        );
    }

    #[test]
    fn method_response_topic() {
        assert_eq!(
            build_topic(Operation::MethodResponse, Some("r1"), None, Some(200)).unwrap(),
            "$iothub/methods/res/200/?$rid=r1"
        );
        assert!(build_topic(Operation::MethodResponse, Some("r1"), None, None).is_err());
    }

    #[test]
    fn twin_response_tokens_in_either_order() {
        let expected = InboundTopic::TwinResponse {
            status: 200,
            request_id: Some("abc".into()),
            version: Some(5),
        };
        assert_eq!(parse_topic("$iothub/twin/res/200/?$rid=abc&$version=5").unwrap(), expected);
        assert_eq!(parse_topic("$iothub/twin/res/200/?$version=5&$rid=abc").unwrap(), expected);
    }

    #[test]
    fn twin_response_tokens_are_optional() {
        let parsed = parse_topic("$iothub/twin/res/204/?$rid=9").unwrap();
        assert_eq!(parsed.status(), Some(204));
        assert_eq!(parsed.request_id(), Some("9"));
        assert_eq!(parsed.version(), None);

        let parsed = parse_topic("$iothub/twin/res/500/").unwrap();
        assert_eq!(parsed.request_id(), None);
    }

    #[test]
    fn malformed_status_is_an_error() {
        for topic in [
            "$iothub/twin/res/20/?$rid=1",
            "$iothub/twin/res/2000/?$rid=1",
            "$iothub/twin/res/2x0/?$rid=1",
            "$iothub/twin/res//?$rid=1",
        ] {
            assert!(
                matches!(parse_topic(topic), Err(Error::MalformedTopic { .. })),
                "{topic}"
            );
        }
    }

    #[test]
    fn bad_version_token_is_an_error() {
        assert!(parse_topic("$iothub/twin/res/200/?$rid=1&$version=x").is_err());
    }

    #[test]
    fn desired_patch_topic() {
        assert_eq!(
            parse_topic("$iothub/twin/PATCH/properties/desired/?$version=42").unwrap(),
            InboundTopic::DesiredPatch { version: Some(42) }
        );
    }

    #[test]
    fn method_request_topic() {
        let parsed = parse_topic("$iothub/methods/POST/reboot/?$rid=7f").unwrap();
        assert_eq!(parsed.method_name(), Some("reboot"));
        assert_eq!(parsed.request_id(), Some("7f"));
    }

    #[test]
    fn method_request_without_rid_is_an_error() {
        assert!(parse_topic("$iothub/methods/POST/reboot/").is_err());
        assert!(parse_topic("$iothub/methods/POST/reboot/?$rid=").is_err());
        assert!(parse_topic("$iothub/methods/POST/?$rid=1").is_err());
    }

    #[test]
    fn unrelated_topic_is_an_error() {
        assert!(parse_topic("devices/dev/messages/devicebound/").is_err());
    }

    #[test]
    fn telemetry_topic_carries_url_encoded_property_bag() {
        let topics = TelemetryTopics::new("dev-1");
        assert_eq!(
            topics.topic_for(&Message::new(b"x".to_vec())),
            "devices/dev-1/messages/events/"
        );

        let message = Message::new(b"x".to_vec())
            .with_message_id("m 1")
            .with_content_type("application/json")
            .with_property("alert", "a&b");
        assert_eq!(
            topics.topic_for(&message),
            "devices/dev-1/messages/events/$.mid=m%201&$.ct=application%2Fjson&alert=a%26b"
        );
    }

    #[test]
    fn codecs_claim_only_their_own_operations() {
        let get = Packet::new(Operation::TwinGet, Message::default()).with_request_id("1");
        assert!(TwinTopics.encode(&get).is_some());
        assert!(MethodTopics.encode(&get).is_none());
        assert!(TelemetryTopics::new("d").encode(&get).is_none());

        assert_eq!(TwinTopics.response_filter(Operation::TwinGet), Some(TWIN_RESPONSE_FILTER));
        assert_eq!(TwinTopics.response_filter(Operation::TwinSubscribeDesired), None);

        assert!(TwinTopics.decode("$iothub/methods/POST/x/?$rid=1").is_none());
        assert!(MethodTopics.decode("$iothub/methods/POST/x/?$rid=1").is_some());
    }

    #[test]
    fn message_subscription_uses_the_device_inbox() {
        let topics = TelemetryTopics::new("dev-1");
        let packet = Packet::new(Operation::MessageSubscribe, Message::default());
        assert_eq!(
            topics.encode(&packet).unwrap().unwrap(),
            WireAction::Subscribe {
                filter: "devices/dev-1/messages/devicebound/#".into(),
                qos: QoS::AtLeastOnce,
            }
        );
        assert!(TwinTopics.encode(&packet).is_none());
    }

    #[test]
    fn device_bound_topic_decodes_property_bag() {
        let topics = TelemetryTopics::new("dev-1");
        let parsed = topics
            .decode(
                "devices/dev-1/messages/devicebound/%24.mid=c2d-1&%24.to=%2Fdevices%2Fdev-1%2Fmessages%2FdeviceBound&color=red%26blue",
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed,
            InboundTopic::CloudToDevice {
                properties: vec![
                    ("$.mid".into(), "c2d-1".into()),
                    ("$.to".into(), "/devices/dev-1/messages/deviceBound".into()),
                    ("color".into(), "red&blue".into()),
                ]
            }
        );
        assert_eq!(parsed.request_id(), None);

        let empty = topics.decode("devices/dev-1/messages/devicebound/").unwrap().unwrap();
        assert_eq!(empty, InboundTopic::CloudToDevice { properties: Vec::new() });
    }

    #[test]
    fn device_bound_topic_of_another_device_is_not_claimed() {
        let topics = TelemetryTopics::new("dev-1");
        assert!(topics.decode("devices/dev-2/messages/devicebound/a=b").is_none());
        assert!(topics.decode("$iothub/twin/res/200/?$rid=1").is_none());
    }

    #[test]
    fn property_without_value_separator_is_an_error() {
        assert!(matches!(
            parse_property_bag("a=1&broken"),
            Err(Error::MalformedTopic { .. })
        ));
        assert!(parse_property_bag("bad=%FF").is_err());
    }
}
