use iothub_device::client::DeviceClient;
use iothub_device::config::{ClientConfig, StaticCredential};
use iothub_device::dispatch::StatusCode;
use iothub_device::message::Message;
use iothub_device::network::application::http::{Client as HttpClient, Method, Request};
use iothub_device::network::application::mqtt::{Client, Options, QoS};
use iothub_device::network::error::Error;
use iothub_device::network::{Close, Connect, Connection, Read, Write};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Bytes the peer will send, one `read` chunk per entry, plus everything
/// the client wrote.
#[derive(Debug, Default)]
struct Wire {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    closed: bool,
}

type SharedWire = Arc<Mutex<Wire>>;

#[derive(Debug)]
struct MockConnection {
    wire: SharedWire,
}

impl MockConnection {
    fn new(incoming: &[&[u8]]) -> (Self, SharedWire) {
        let wire = SharedWire::default();
        wire.lock()
            .unwrap()
            .incoming
            .extend(incoming.iter().map(|chunk| chunk.to_vec()));
        (Self { wire: wire.clone() }, wire)
    }
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.lock().unwrap();
        let Some(chunk) = wire.incoming.front_mut() else {
            return Ok(0);
        };
        // an empty chunk is one read with nothing available
        if chunk.is_empty() {
            wire.incoming.pop_front();
            return Ok(0);
        }
        let len = buf.len().min(chunk.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        chunk.drain(..len);
        if chunk.is_empty() {
            wire.incoming.pop_front();
        }
        Ok(len)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.wire.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.wire.lock().unwrap().closed = true;
        Ok(())
    }
}

impl Connection for MockConnection {}

/// Hands out pre-scripted connections in order.
struct MockNetwork {
    scripts: VecDeque<Vec<Vec<u8>>>,
    dialed: Arc<Mutex<Vec<(String, SharedWire)>>>,
}

impl MockNetwork {
    fn new(scripts: Vec<Vec<Vec<u8>>>) -> (Self, Arc<Mutex<Vec<(String, SharedWire)>>>) {
        let dialed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                scripts: scripts.into(),
                dialed: dialed.clone(),
            },
            dialed,
        )
    }
}

impl Connect for MockNetwork {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let script = self.scripts.pop_front().ok_or(Error::ConnectionRefused)?;
        let chunks: Vec<&[u8]> = script.iter().map(Vec::as_slice).collect();
        let (connection, wire) = MockConnection::new(&chunks);
        self.dialed.lock().unwrap().push((remote.to_string(), wire));
        Ok(connection)
    }
}

const CONNACK_OK: &[u8] = &[0x20, 0x02, 0x00, 0x00];

fn options() -> Options<'static> {
    Options {
        client_id: "dev-1",
        username: Some("hub.example.net/dev-1/?api-version=2020-09-30"),
        password: Some("sas"),
        keep_alive_seconds: 230,
        clean_session: false,
    }
}

#[test]
fn connect_sends_credentials_and_accepts_connack() {
    let (connection, wire) = MockConnection::new(&[CONNACK_OK]);
    Client::connect(connection, options()).unwrap();

    let written = wire.lock().unwrap().written.clone();
    assert_eq!(written[0], 0x10);
    assert_eq!(&written[2..8], b"\x00\x04MQTT");
    assert_eq!(written[8], 4);
    // user name and password present, persistent session
    assert_eq!(written[9], 0xC0);
    assert_eq!(&written[10..12], &230u16.to_be_bytes());
    assert_eq!(&written[12..19], b"\x00\x05dev-1");
    assert!(written.ends_with(b"\x00\x03sas"));
}

#[test]
fn refused_connack_is_reported() {
    let (connection, _wire) = MockConnection::new(&[&[0x20, 0x02, 0x00, 0x05]]);
    assert!(matches!(
        Client::connect(connection, options()),
        Err(Error::ConnectionRefused)
    ));
}

#[test]
fn publish_waiting_for_puback_buffers_inbound_messages() {
    let inbound = [0x30, 0x06, 0x00, 0x03, b'a', b'/', b'b', b'x'];
    let puback = [0x40, 0x02, 0x00, 0x01];
    let (connection, wire) = MockConnection::new(&[CONNACK_OK, &inbound, &puback]);
    let mut client = Client::connect(connection, options()).unwrap();
    wire.lock().unwrap().written.clear();

    client.publish("t", b"hi", QoS::AtLeastOnce).unwrap();
    assert_eq!(
        wire.lock().unwrap().written,
        vec![0x32, 0x07, 0x00, 0x01, b't', 0x00, 0x01, b'h', b'i']
    );

    let buffered = client.poll().unwrap().unwrap();
    assert_eq!(buffered.topic.as_str(), "a/b");
    assert_eq!(buffered.payload, b"x");
    assert_eq!(client.poll().unwrap(), None);
}

#[test]
fn inbound_qos1_publish_is_acknowledged() {
    let inbound = [0x32, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x07, b'!'];
    let (connection, wire) = MockConnection::new(&[CONNACK_OK, &inbound]);
    let mut client = Client::connect(connection, options()).unwrap();
    wire.lock().unwrap().written.clear();

    let packet = client.poll().unwrap().unwrap();
    assert_eq!(packet.payload, b"!");
    assert_eq!(wire.lock().unwrap().written, vec![0x40, 0x02, 0x00, 0x07]);
}

#[test]
fn rejected_subscription_is_a_protocol_error() {
    let suback = [0x90, 0x03, 0x00, 0x01, 0x80];
    let (connection, _wire) = MockConnection::new(&[CONNACK_OK, &suback]);
    let mut client = Client::connect(connection, options()).unwrap();
    assert_eq!(
        client.subscribe("$iothub/methods/POST/#", QoS::AtMostOnce),
        Err(Error::ProtocolError)
    );
}

#[test]
fn disconnect_closes_the_connection() {
    let (connection, wire) = MockConnection::new(&[CONNACK_OK]);
    let client = Client::connect(connection, options()).unwrap();
    client.disconnect().unwrap();
    let wire = wire.lock().unwrap();
    assert!(wire.written.ends_with(&[0xE0, 0x00]));
    assert!(wire.closed);
}

#[test]
fn http_post_reads_body_across_reads() {
    let (connection, wire) = MockConnection::new(&[
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\n\r\nhel",
        b"lo",
    ]);
    let mut client = HttpClient::new(connection);
    let response = client
        .request(&Request {
            method: Method::Post,
            path: "/devices/dev-1/messages/events?api-version=2020-09-30",
            headers: Vec::new(),
            body: Some(b"21.5"),
        })
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.header("x-test"), Some("yes"));
    assert_eq!(response.body, b"hello");

    let written = String::from_utf8(wire.lock().unwrap().written.clone()).unwrap();
    assert!(written.starts_with("POST /devices/dev-1/messages/events?api-version=2020-09-30 HTTP/1.1\r\n"));
    assert!(written.ends_with("Content-Length: 4\r\n\r\n21.5"));
}

#[test]
fn http_response_closed_early_is_an_error() {
    let (connection, _wire) = MockConnection::new(&[b"HTTP/1.1 200 OK\r\n"]);
    let mut client = HttpClient::new(connection);
    let result = client.request(&Request {
        method: Method::Post,
        path: "/",
        headers: Vec::new(),
        body: None,
    });
    assert_eq!(result, Err(Error::ConnectionClosed));
}

#[test]
fn https_client_posts_with_host_and_authorization() {
    let (network, dialed) = MockNetwork::new(vec![vec![
        b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n".to_vec(),
    ]]);
    let config = ClientConfig::new("hub.example.net", "dev-1");
    let client = DeviceClient::https(&config, network, StaticCredential::new("SharedAccessSignature sr=x")).unwrap();
    client.open().unwrap();

    let status = Arc::new(Mutex::new(None));
    let sink = status.clone();
    client
        .send_telemetry(Message::new(b"21.5".to_vec()), move |s, _| {
            *sink.lock().unwrap() = Some(s);
        })
        .unwrap();
    client.do_work().unwrap();
    assert_eq!(*status.lock().unwrap(), Some(StatusCode::OkEmpty));

    let dialed = dialed.lock().unwrap();
    let (remote, wire) = &dialed[0];
    assert_eq!(remote, "hub.example.net:443");
    let wire = wire.lock().unwrap();
    let written = String::from_utf8(wire.written.clone()).unwrap();
    assert!(written.contains("Host: hub.example.net\r\n"));
    assert!(written.contains("authorization: SharedAccessSignature sr=x\r\n"));
    assert!(written.contains("content-type: binary/octet-stream\r\n"));
    assert!(wire.closed);
}

#[test]
fn mqtt_client_connects_on_open_and_publishes_telemetry() {
    let puback = vec![0x40, 0x02, 0x00, 0x01];
    // the empty read lets the first poll come back idle
    let (network, dialed) = MockNetwork::new(vec![vec![CONNACK_OK.to_vec(), Vec::new(), puback]]);
    let config = ClientConfig::new("hub.example.net", "dev-1");
    let client = DeviceClient::mqtt(&config, network, StaticCredential::new("sas")).unwrap();
    client.open().unwrap();

    let status = Arc::new(Mutex::new(None));
    let sink = status.clone();
    client
        .send_telemetry(Message::new(b"21.5".to_vec()), move |s, _| {
            *sink.lock().unwrap() = Some(s);
        })
        .unwrap();
    client.do_work().unwrap();
    assert_eq!(*status.lock().unwrap(), Some(StatusCode::Ok));
    client.close().unwrap();

    let dialed = dialed.lock().unwrap();
    assert_eq!(dialed.len(), 1);
    assert_eq!(dialed[0].0, "hub.example.net:8883");
    assert!(dialed[0].1.lock().unwrap().closed);
}
