//! HTTPS telemetry bodies: batched JSON array or single raw message.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::network::application::http::Header;
use base64ct::{Base64, Encoding};
use serde::Serialize;
use std::collections::BTreeMap;

/// Largest body the hub accepts, in bytes.
pub const MAX_BATCH_BYTES: usize = 255 * 1024 - 1;

/// Content type of a batched body.
pub const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.iothub.json";

/// Content type of a single unbatched body.
pub const SINGLE_CONTENT_TYPE: &str = "binary/octet-stream";

/// Prefix turning an application property into an HTTPS header name.
pub const APP_PROPERTY_PREFIX: &str = "iothub-app-";

#[derive(Serialize)]
struct BatchEntry<'a> {
    body: String,
    #[serde(rename = "base64Encoded")]
    base64_encoded: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, &'a str>,
}

/// System properties then application properties, under their HTTPS names.
pub fn https_properties(message: &Message) -> Vec<(String, &str)> {
    message
        .system_properties()
        .map(|(property, value)| (property.https_name().to_string(), value))
        .chain(
            message
                .properties()
                .iter()
                .map(|(name, value)| (format!("{APP_PROPERTY_PREFIX}{name}"), value.as_str())),
        )
        .collect()
}

/// An encoded request body with the headers it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsPayload {
    /// Request body.
    pub body: Vec<u8>,
    /// Value of the `content-type` header.
    pub content_type: &'static str,
    /// Property headers; empty for a batch, whose properties are inline.
    pub headers: Vec<Header>,
}

/// A JSON array of messages that never grows past [`MAX_BATCH_BYTES`].
///
/// ```rust
/// use iothub_device::message::Message;
/// use iothub_device::transport::https::batch::HttpsBatch;
///
/// let mut batch = HttpsBatch::new();
/// batch.try_add(&Message::new(b"a".to_vec()).with_property("k", "v")).unwrap();
/// assert_eq!(
///     batch.into_payload().body,
///     br#"[{"body":"YQ==","base64Encoded":true,"properties":{"iothub-app-k":"v"}}]"#.to_vec()
/// );
/// ```
#[derive(Debug, Clone)]
pub struct HttpsBatch {
    // opening bracket and comma-separated entries; `]` is added on output
    buffer: Vec<u8>,
    count: usize,
}

impl HttpsBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self {
            buffer: vec![b'['],
            count: 0,
        }
    }

    /// Appends one message.
    ///
    /// # Errors
    ///
    /// [`Error::SizeExceeded`] if the encoded batch would pass
    /// [`MAX_BATCH_BYTES`]. The batch is left unchanged.
    pub fn try_add(&mut self, message: &Message) -> Result<()> {
        let entry = BatchEntry {
            body: Base64::encode_string(message.body()),
            base64_encoded: true,
            properties: https_properties(message).into_iter().collect(),
        };
        let encoded = serde_json::to_vec(&entry)?;

        let separator = usize::from(self.count > 0);
        let size = self.encoded_len() + separator + encoded.len();
        if size > MAX_BATCH_BYTES {
            return Err(Error::SizeExceeded {
                size,
                limit: MAX_BATCH_BYTES,
            });
        }

        if separator == 1 {
            self.buffer.push(b',');
        }
        self.buffer.extend_from_slice(&encoded);
        self.count += 1;
        Ok(())
    }

    /// Size of the body [`into_payload`](Self::into_payload) would produce.
    pub fn encoded_len(&self) -> usize {
        self.buffer.len() + 1
    }

    /// Number of messages added.
    pub fn len(&self) -> usize {
        self.count
    }

    /// No message added yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Closes the JSON array.
    pub fn into_payload(mut self) -> HttpsPayload {
        self.buffer.push(b']');
        HttpsPayload {
            body: self.buffer,
            content_type: BATCH_CONTENT_TYPE,
            headers: Vec::new(),
        }
    }
}

impl Default for HttpsBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes one message unbatched: raw body, properties as headers.
///
/// # Errors
///
/// [`Error::SizeExceeded`] if the body alone passes [`MAX_BATCH_BYTES`].
pub fn encode_single(message: &Message) -> Result<HttpsPayload> {
    let size = message.body().len();
    if size > MAX_BATCH_BYTES {
        return Err(Error::SizeExceeded {
            size,
            limit: MAX_BATCH_BYTES,
        });
    }
    Ok(HttpsPayload {
        body: message.body().to_vec(),
        content_type: SINGLE_CONTENT_TYPE,
        headers: https_properties(message)
            .into_iter()
            .map(|(name, value)| Header::new(name, value))
            .collect(),
    })
}

/// One message → [`encode_single`]; otherwise a batch of all of them.
///
/// # Errors
///
/// [`Error::SizeExceeded`] if they do not fit; callers send fewer.
pub fn encode(messages: &[Message]) -> Result<HttpsPayload> {
    if let [message] = messages {
        return encode_single(message);
    }
    let mut batch = HttpsBatch::new();
    for message in messages {
        batch.try_add(message)?;
    }
    Ok(batch.into_payload())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(body_len: usize, pad: usize) -> Message {
        Message::new(vec![0x5a; body_len]).with_property("p", "x".repeat(pad))
    }

    fn single_entry_len(message: &Message) -> usize {
        let mut batch = HttpsBatch::new();
        batch.try_add(message).unwrap();
        batch.encoded_len()
    }

    #[test]
    fn entry_layout() {
        let message = Message::new(b"hi".to_vec())
            .with_message_id("m1")
            .with_property("alert", "true");
        let payload = encode(&[message.clone(), Message::new(b"x".to_vec())]).unwrap();
        assert_eq!(payload.content_type, BATCH_CONTENT_TYPE);
        assert!(payload.headers.is_empty());
        assert_eq!(
            String::from_utf8(payload.body).unwrap(),
            r#"[{"body":"aGk=","base64Encoded":true,"properties":{"iothub-app-alert":"true","iothub-messageid":"m1"}},{"body":"eA==","base64Encoded":true}]"#
        );
    }

    #[test]
    fn single_message_is_unbatched() {
        let message = Message::new(b"raw".to_vec())
            .with_content_type("text/plain")
            .with_property("k", "v");
        let payload = encode(std::slice::from_ref(&message)).unwrap();
        assert_eq!(payload.content_type, SINGLE_CONTENT_TYPE);
        assert_eq!(payload.body, b"raw");
        assert_eq!(
            payload.headers,
            vec![
                Header::new("iothub-contenttype", "text/plain"),
                Header::new("iothub-app-k", "v"),
            ]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let messages: Vec<Message> = (0..5)
            .map(|i| {
                Message::new(format!("reading {i}").into_bytes())
                    .with_property("zone", "b")
                    .with_property("alpha", "a")
                    .with_correlation_id(format!("c{i}"))
            })
            .collect();
        assert_eq!(encode(&messages).unwrap(), encode(&messages).unwrap());
    }

    #[test]
    fn batch_at_ceiling_is_accepted() {
        let base = single_entry_len(&padded(190_000, 0));
        let exact = padded(190_000, MAX_BATCH_BYTES - base);
        assert_eq!(single_entry_len(&exact), MAX_BATCH_BYTES);

        let under = padded(190_000, MAX_BATCH_BYTES - base - 1);
        assert_eq!(single_entry_len(&under), MAX_BATCH_BYTES - 1);
    }

    #[test]
    fn batch_over_ceiling_is_rejected_unchanged() {
        let base = single_entry_len(&padded(190_000, 0));
        let over = padded(190_000, MAX_BATCH_BYTES - base + 1);

        let mut batch = HttpsBatch::new();
        let before = batch.encoded_len();
        assert!(matches!(
            batch.try_add(&over),
            Err(Error::SizeExceeded { size, limit }) if size == MAX_BATCH_BYTES + 1 && limit == MAX_BATCH_BYTES
        ));
        assert_eq!(batch.encoded_len(), before);
        assert!(batch.is_empty());
    }

    #[test]
    fn second_message_overflowing_leaves_first() {
        let big = padded(150_000, 0);
        let mut batch = HttpsBatch::new();
        batch.try_add(&big).unwrap();
        assert!(batch.try_add(&big).is_err());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn oversized_single_body_is_rejected() {
        let message = Message::new(vec![0u8; MAX_BATCH_BYTES + 1]);
        assert!(matches!(encode_single(&message), Err(Error::SizeExceeded { .. })));
        assert!(encode_single(&Message::new(vec![0u8; MAX_BATCH_BYTES])).is_ok());
    }
}
