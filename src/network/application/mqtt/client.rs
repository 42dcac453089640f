//! MQTT 3.1.1 client used by the MQTT transport.
//!
//! The client owns one [`Connection`] and speaks just enough of MQTT 3.1.1
//! for an IoT Hub device session:
//!
//! - CONNECT with client id, user name and password
//! - PUBLISH at QoS 0 and QoS 1 (the hub does not support QoS 2)
//! - SUBSCRIBE with incrementing packet identifiers
//! - inbound PUBLISH polling, acknowledging QoS 1 deliveries with PUBACK
//! - PINGREQ and DISCONNECT
//!
//! Calls that wait for an acknowledgement (QoS 1 publish, subscribe) may
//! see inbound PUBLISH packets first. Those are buffered and
//! returned by the next [`Client::poll`] calls in arrival order.
//!
//! # Examples
//!
//! ```rust,no_run
//! use iothub_device::network::application::mqtt::{Client, Options, QoS};
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
//! let options = Options {
//!     client_id: "thermostat-01",
//!     username: Some("myhub.azure-devices.net/thermostat-01/?api-version=2020-09-30"),
//!     password: Some("SharedAccessSignature sr=..."),
//!     keep_alive_seconds: 230,
//!     clean_session: false,
//! };
//!
//! // let mut client = Client::connect(MockConnection, options)?;
//! // client.subscribe("$iothub/methods/POST/#", QoS::AtMostOnce)?;
//! // client.publish("devices/thermostat-01/messages/events/", b"21.5", QoS::AtLeastOnce)?;
//! // while let Some(message) = client.poll()? {
//! //     println!("{} -> {} bytes", message.topic, message.payload.len());
//! // }
//! ```

use crate::network::error::Error;
use crate::network::{Close, Connection, Read, Write, read_exact, write_all};
use heapless::String;
use std::collections::VecDeque;

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
const PUBACK: u8 = 0x40;
/// MQTT SUBSCRIBE packet type identifier.
const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
const SUBACK: u8 = 0x90;
/// MQTT PINGREQ packet type identifier.
const PINGREQ: u8 = 0xC0;
/// MQTT DISCONNECT packet type identifier.
const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by MQTT 3.1.1 specification
/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// Longest inbound topic name accepted.
///
/// IoT Hub method names are limited to 128 characters, so the longest
/// `$iothub/methods/POST/{name}/?$rid={rid}` topic fits comfortably.
pub const MAX_TOPIC_LEN: usize = 256;

/// Largest remaining length representable in four bytes.
const MAX_REMAINING_LEN: usize = 268_435_455;

/// An incoming MQTT publish message.
///
/// ```rust
/// use iothub_device::network::application::mqtt::PublishPacket;
/// use heapless::String;
///
/// let packet = PublishPacket {
///     topic: String::try_from("$iothub/twin/res/200/?$rid=1").unwrap(),
///     payload: b"{}".to_vec(),
/// };
///
/// assert_eq!(packet.topic.as_str(), "$iothub/twin/res/200/?$rid=1");
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,

    /// The message payload data.
    pub payload: Vec<u8>,
}

/// Quality of Service levels supported by the hub.
///
/// ```rust
/// use iothub_device::network::application::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::AtLeastOnce as u8, 1);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// **QoS 0**: fire and forget.
    AtMostOnce = 0,

    /// **QoS 1**: acknowledged with PUBACK; duplicates possible.
    AtLeastOnce = 1,
}

/// Configuration options for the CONNECT packet.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// The client identifier. For IoT Hub this is the device id.
    pub client_id: &'a str,

    /// User name, `{host}/{device}/?api-version={version}` for IoT Hub.
    pub username: Option<&'a str>,

    /// Password, typically a SAS token.
    pub password: Option<&'a str>,

    /// The keep-alive time interval in seconds. 0 disables keep-alive.
    pub keep_alive_seconds: u16,

    /// Whether to start a clean session.
    pub clean_session: bool,
}

/// An MQTT 3.1.1 client over a blocking [`Connection`].
///
/// The client expects `read` on the connection to return `Ok(0)` when no
/// data is available; [`Client::poll`] reports that as `Ok(None)`.
#[derive(Debug)]
pub struct Client<C: Connection> {
    connection: C,
    next_packet_id: u16,
    pending: VecDeque<PublishPacket>,
}

impl<C: Connection> Client<C> {
    /// Establish an MQTT connection with the broker.
    ///
    /// Sends CONNECT and waits for CONNACK.
    ///
    /// # Errors
    ///
    /// * [`Error::WriteError`] - Failed to send CONNECT packet
    /// * [`Error::ReadError`] - Failed to read CONNACK response
    /// * [`Error::ConnectionClosed`] - Connection closed during handshake
    /// * [`Error::ConnectionRefused`] - Broker refused the connection (bad credentials, unknown device, ...)
    /// * [`Error::ProtocolError`] - Invalid CONNACK packet received
    pub fn connect(mut connection: C, options: Options) -> Result<Self, Error> {
        // --- Variable Header ---
        let mut packet: Vec<u8> = Vec::with_capacity(128);
        put_bytes(&mut packet, PROTOCOL_NAME);
        packet.push(PROTOCOL_LEVEL);

        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= 0x02;
        }
        if options.username.is_some() {
            connect_flags |= 0x80;
        }
        if options.password.is_some() {
            connect_flags |= 0x40;
        }
        packet.push(connect_flags);
        packet.extend_from_slice(&options.keep_alive_seconds.to_be_bytes());

        // --- Payload ---
        put_bytes(&mut packet, options.client_id.as_bytes());
        if let Some(username) = options.username {
            put_bytes(&mut packet, username.as_bytes());
        }
        if let Some(password) = options.password {
            put_bytes(&mut packet, password.as_bytes());
        }

        send_packet(&mut connection, CONNECT, &packet)?;

        // Wait for and parse CONNACK
        let mut connack_buf = [0u8; 4];
        read_exact(&mut connection, &mut connack_buf)?;

        if connack_buf[0] != CONNACK {
            return Err(Error::ProtocolError);
        }

        if connack_buf[1] != 2 {
            return Err(Error::ProtocolError);
        }

        // Check connection acknowledgement status
        match connack_buf[3] {
            0 => Ok(Self {
                connection,
                next_packet_id: 1,
                pending: VecDeque::new(),
            }),
            1..=5 => Err(Error::ConnectionRefused),
            _ => Err(Error::ProtocolError),
        }
    }

    /// Publish a message to a topic.
    ///
    /// At [`QoS::AtLeastOnce`] this blocks until the matching PUBACK arrives.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Error> {
        let mut packet: Vec<u8> = Vec::with_capacity(topic.len() + payload.len() + 4);

        // --- Variable Header ---
        put_bytes(&mut packet, topic.as_bytes());
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => {
                let id = self.allocate_packet_id();
                packet.extend_from_slice(&id.to_be_bytes());
                Some(id)
            }
        };

        // --- Payload ---
        packet.extend_from_slice(payload);

        send_packet(&mut self.connection, PUBLISH | ((qos as u8) << 1), &packet)?;

        if let Some(id) = packet_id {
            self.wait_for_ack(PUBACK, id)?;
        }
        Ok(())
    }

    /// Subscribe to a topic filter and wait for SUBACK.
    ///
    /// A SUBACK carrying the failure return code (0x80) is reported as
    /// [`Error::ProtocolError`].
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Error> {
        let packet_id = self.allocate_packet_id();
        let mut packet: Vec<u8> = Vec::with_capacity(filter.len() + 5);

        // --- Variable Header (Packet Identifier) ---
        packet.extend_from_slice(&packet_id.to_be_bytes());

        // --- Payload ---
        put_bytes(&mut packet, filter.as_bytes());
        packet.push(qos as u8);

        send_packet(&mut self.connection, SUBSCRIBE, &packet)?;

        let suback = self.wait_for_ack(SUBACK, packet_id)?;
        match suback.get(2) {
            Some(0x80) | None => Err(Error::ProtocolError),
            Some(_) => Ok(()),
        }
    }

    /// Send PINGREQ. The PINGRESP is consumed by a later [`Client::poll`].
    pub fn ping(&mut self) -> Result<(), Error> {
        send_packet(&mut self.connection, PINGREQ, &[])
    }

    /// Poll the connection for an incoming PUBLISH.
    ///
    /// Returns buffered messages first. Non-PUBLISH control packets are
    /// consumed and reported as `Ok(None)`.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadError`] - Failed to read from the connection
    /// * [`Error::ConnectionClosed`] - Connection closed mid-packet
    /// * [`Error::ProtocolError`] - Received malformed MQTT packet
    pub fn poll(&mut self) -> Result<Option<PublishPacket>, Error> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }

        let mut header_buf = [0u8; 1];
        match self.connection.read(&mut header_buf) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(_) => return Err(Error::ReadError),
        }

        let body = self.read_body()?;
        if header_buf[0] & 0xF0 == PUBLISH {
            self.accept_publish(header_buf[0], &body).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Send DISCONNECT and close the connection.
    pub fn disconnect(mut self) -> Result<(), Error> {
        send_packet(&mut self.connection, DISCONNECT, &[])?;
        self.connection.close().map_err(|_| Error::ConnectionClosed)
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Packet identifier 0 is reserved
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Reads packets until the acknowledgement `kind` for `packet_id` arrives.
    fn wait_for_ack(&mut self, kind: u8, packet_id: u16) -> Result<Vec<u8>, Error> {
        loop {
            let mut header_buf = [0u8; 1];
            read_exact(&mut self.connection, &mut header_buf)?;
            let body = self.read_body()?;

            if header_buf[0] & 0xF0 == PUBLISH {
                let packet = self.accept_publish(header_buf[0], &body)?;
                self.pending.push_back(packet);
                continue;
            }

            if header_buf[0] == kind {
                if body.len() < 2 {
                    return Err(Error::ProtocolError);
                }
                if u16::from_be_bytes([body[0], body[1]]) == packet_id {
                    return Ok(body);
                }
            }
        }
    }

    /// Reads the remaining length field and the packet body that follows it.
    fn read_body(&mut self) -> Result<Vec<u8>, Error> {
        let mut remaining_len = 0usize;
        let mut multiplier = 1usize;
        for _ in 0..4 {
            let mut byte = [0u8; 1];
            read_exact(&mut self.connection, &mut byte)?;
            remaining_len += (byte[0] as usize & 127) * multiplier;
            if byte[0] & 0x80 == 0 {
                let mut body = vec![0u8; remaining_len];
                read_exact(&mut self.connection, &mut body)?;
                return Ok(body);
            }
            multiplier *= 128;
        }
        Err(Error::ProtocolError)
    }

    /// Decodes a PUBLISH body and acknowledges it when it was sent at QoS 1.
    fn accept_publish(&mut self, header: u8, body: &[u8]) -> Result<PublishPacket, Error> {
        let qos = (header >> 1) & 0x03;
        if body.len() < 2 {
            return Err(Error::ProtocolError);
        }
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let topic_end = 2 + topic_len;
        let topic_bytes = body.get(2..topic_end).ok_or(Error::ProtocolError)?;
        let topic = core::str::from_utf8(topic_bytes).map_err(|_| Error::ProtocolError)?;
        let topic = String::try_from(topic).map_err(|_| Error::ProtocolError)?;

        let payload_start = match qos {
            0 => topic_end,
            1 => {
                let id = body.get(topic_end..topic_end + 2).ok_or(Error::ProtocolError)?;
                send_packet(&mut self.connection, PUBACK, id)?;
                topic_end + 2
            }
            _ => return Err(Error::ProtocolError),
        };

        Ok(PublishPacket {
            topic,
            payload: body[payload_start..].to_vec(),
        })
    }
}

/// Appends a length-prefixed UTF-8 string or binary field.
fn put_bytes(packet: &mut Vec<u8>, bytes: &[u8]) {
    packet.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    packet.extend_from_slice(bytes);
}

/// Writes fixed header and body, then flushes.
fn send_packet<C: Write>(connection: &mut C, header: u8, body: &[u8]) -> Result<(), Error> {
    // --- Fixed Header ---
    let mut fixed_header: heapless::Vec<u8, 5> = heapless::Vec::new();
    fixed_header.push(header).map_err(|_| Error::ProtocolError)?;
    encode_remaining_length(&mut fixed_header, body.len())?;

    write_all(connection, &fixed_header)?;
    write_all(connection, body)?;
    connection.flush().map_err(|_| Error::WriteError)
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries 7 bits of the length; the high bit marks a
/// continuation. Four bytes cover lengths up to 268,435,455.
fn encode_remaining_length(buf: &mut heapless::Vec<u8, 5>, mut len: usize) -> Result<(), Error> {
    if len > MAX_REMAINING_LEN {
        return Err(Error::PayloadTooLarge);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| Error::PayloadTooLarge)?;
        if len == 0 {
            break;
        }
    }
    Ok(())
}
