#![allow(dead_code)]

use iothub_device::config::ClientConfig;
use iothub_device::dispatch::{ResultCallback, StatusCode};
use iothub_device::network::application::mqtt::{PublishPacket, QoS};
use iothub_device::network::error::Error;
use iothub_device::transport::https::{HttpsExchange, HttpsReply, HttpsRequest};
use iothub_device::transport::mqtt::{MqttConnector, MqttSession};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Config with zero backoff so reconnects run on the next `do_work`.
pub fn config() -> ClientConfig {
    env_logger::builder().is_test(true).try_init().ok();
    let mut config = ClientConfig::new("hub.example.net", "dev-1");
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config
}

pub fn inbound(topic: &str, payload: &[u8]) -> PublishPacket {
    PublishPacket {
        topic: heapless::String::try_from(topic).unwrap(),
        payload: payload.to_vec(),
    }
}

/// Collects every status delivered to the callbacks it hands out.
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<(String, StatusCode, Option<Vec<u8>>)>>>);

impl Outcomes {
    pub fn callback(&self, tag: &str) -> Option<ResultCallback> {
        let sink = self.0.clone();
        let tag = tag.to_string();
        Some(Box::new(move |status, body| {
            sink.lock()
                .unwrap()
                .push((tag, status, body.map(<[u8]>::to_vec)));
        }))
    }

    pub fn all(&self) -> Vec<(String, StatusCode, Option<Vec<u8>>)> {
        self.0.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, StatusCode)> {
        self.all().into_iter().map(|(tag, status, _)| (tag, status)).collect()
    }
}

// --- MQTT ---

#[derive(Debug, Default)]
pub struct Broker {
    pub published: Vec<(String, Vec<u8>, QoS)>,
    pub subscribed: Vec<String>,
    pub inbound: VecDeque<PublishPacket>,
    /// Errors returned by the next publishes, one per call.
    pub publish_failures: VecDeque<Error>,
    /// Errors returned by the next subscribes, one per call.
    pub subscribe_failures: VecDeque<Error>,
    /// Error returned by the next poll.
    pub poll_failure: Option<Error>,
    /// Number of upcoming connect attempts to refuse.
    pub refuse_connects: usize,
    pub connects: usize,
    pub closes: usize,
    pub pings: usize,
}

impl Broker {
    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _, _)| t.as_str()).collect()
    }
}

pub type SharedBroker = Arc<Mutex<Broker>>;

pub struct MockSession {
    broker: SharedBroker,
}

impl MqttSession for MockSession {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Error> {
        let mut broker = self.broker.lock().unwrap();
        if let Some(e) = broker.publish_failures.pop_front() {
            return Err(e);
        }
        broker.published.push((topic.to_string(), payload.to_vec(), qos));
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<(), Error> {
        let mut broker = self.broker.lock().unwrap();
        if let Some(e) = broker.subscribe_failures.pop_front() {
            return Err(e);
        }
        broker.subscribed.push(filter.to_string());
        Ok(())
    }

    fn ping(&mut self) -> Result<(), Error> {
        self.broker.lock().unwrap().pings += 1;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<PublishPacket>, Error> {
        let mut broker = self.broker.lock().unwrap();
        if let Some(e) = broker.poll_failure.take() {
            return Err(e);
        }
        Ok(broker.inbound.pop_front())
    }

    fn close(self) -> Result<(), Error> {
        self.broker.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub struct MockConnector {
    pub broker: SharedBroker,
}

impl MockConnector {
    pub fn new() -> (Self, SharedBroker) {
        let broker = SharedBroker::default();
        (
            Self {
                broker: broker.clone(),
            },
            broker,
        )
    }
}

impl MqttConnector for MockConnector {
    type Session = MockSession;

    fn connect(&mut self) -> Result<MockSession, Error> {
        let mut broker = self.broker.lock().unwrap();
        broker.connects += 1;
        if broker.refuse_connects > 0 {
            broker.refuse_connects -= 1;
            return Err(Error::NotOpen);
        }
        Ok(MockSession {
            broker: self.broker.clone(),
        })
    }
}

// --- HTTPS ---

#[derive(Debug, Default)]
pub struct Endpoint {
    pub requests: Vec<HttpsRequest>,
    /// Replies for the next requests; 204 once exhausted.
    pub replies: VecDeque<Result<HttpsReply, Error>>,
}

pub type SharedEndpoint = Arc<Mutex<Endpoint>>;

pub struct MockExchange {
    endpoint: SharedEndpoint,
}

impl MockExchange {
    pub fn new() -> (Self, SharedEndpoint) {
        let endpoint = SharedEndpoint::default();
        (
            Self {
                endpoint: endpoint.clone(),
            },
            endpoint,
        )
    }
}

impl HttpsExchange for MockExchange {
    fn send(&mut self, request: &HttpsRequest) -> Result<HttpsReply, Error> {
        let mut endpoint = self.endpoint.lock().unwrap();
        endpoint.requests.push(request.clone());
        endpoint.replies.pop_front().unwrap_or(Ok(HttpsReply {
            status: 204,
            headers: Vec::new(),
            body: Vec::new(),
        }))
    }
}

pub fn header<'a>(request: &'a HttpsRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}
