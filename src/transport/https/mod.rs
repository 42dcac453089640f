//! HTTPS transport.
//!
//! Telemetry and cloud-to-device messages. Every `do_work` packs waiting
//! messages greedily into one batch (up to the send budget and
//! [`batch::MAX_BATCH_BYTES`]) and POSTs it to
//! `/devices/{device}/messages/events`. A single message goes out
//! unbatched. The reply status resolves every packet of that request.
//!
//! Once a message callback is registered, `do_work` also polls
//! `/devices/{device}/messages/devicebound` every
//! [`receive_interval_ms`](crate::config::ClientConfig::receive_interval_ms),
//! and right away again after a message arrived. A received message is
//! locked for this device until the callback's disposition is sent back:
//!
//! | Disposition | Request |
//! |---|---|
//! | complete | `DELETE .../devicebound/{lock}` |
//! | abandon | `POST .../devicebound/{lock}/abandon` |
//! | reject | `DELETE .../devicebound/{lock}?reject=true` |

pub mod batch;

use crate::config::{ClientConfig, CredentialSource, StaticCredential};
use crate::dispatch::{CallbackPacket, OutboundDispatchQueue, Operation, Packet, ResultCallback, StatusCode};
use crate::error::{Error, Result};
use crate::message::{Message, SystemProperty};
use crate::network::application::http::{Client, Header, Method, Request};
use crate::network::error::Error as NetError;
use crate::network::{Close, Connect};
use crate::receive::{MessageCallback, MessageDelivery, MessageDisposition, MessageReceiver};
use crate::transport::retry::RetrySchedule;
use crate::transport::status::{StatusEvents, StatusTracker};
use crate::transport::{
    ConnectionStatus, ConnectionStatusCallback, ConnectionStatusChangeReason, ExponentialBackoff,
    Transport,
};
use batch::{APP_PROPERTY_PREFIX, HttpsBatch, HttpsPayload, MAX_BATCH_BYTES, encode_single};
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One request to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsRequest {
    /// Request method.
    pub method: Method,
    /// Path and query, e.g. `/devices/dev-1/messages/events?api-version=...`.
    pub path: String,
    /// Headers besides host and authorization, which the exchange adds.
    pub headers: Vec<Header>,
    /// Request body; empty for GET and DELETE.
    pub body: Vec<u8>,
}

/// The hub's answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpsReply {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<Header>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpsReply {
    /// First header named `name`, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Carries one request to the hub and brings back the reply.
pub trait HttpsExchange: Send {
    /// Sends `request` and waits for the whole reply.
    fn send(&mut self, request: &HttpsRequest) -> core::result::Result<HttpsReply, NetError>;
}

/// [`HttpsExchange`] over the crate's HTTP/1.1 client, one connection per
/// request.
pub struct HttpsDialer<N, S = StaticCredential> {
    connector: N,
    credentials: S,
    host: String,
}

impl<N, S> HttpsDialer<N, S>
where
    N: Connect + Send,
    S: CredentialSource,
{
    /// Dialer for the hub named in `config`, port 443.
    pub fn new(connector: N, config: &ClientConfig, credentials: S) -> Self {
        Self {
            connector,
            credentials,
            host: config.host_name.clone(),
        }
    }
}

impl<N, S> fmt::Debug for HttpsDialer<N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsDialer")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl<N, S> HttpsExchange for HttpsDialer<N, S>
where
    N: Connect + Send,
    S: CredentialSource,
{
    fn send(&mut self, request: &HttpsRequest) -> core::result::Result<HttpsReply, NetError> {
        let connection = self
            .connector
            .connect(&format!("{}:443", self.host))
            .map_err(|e| {
                warn!("could not reach {}: {e:?}", self.host);
                NetError::NotOpen
            })?;

        let mut headers = vec![Header::new("Host", self.host.as_str())];
        if let Some(token) = self.credentials.credential() {
            headers.push(Header::new("authorization", token));
        }
        headers.extend(request.headers.iter().cloned());

        let mut client = Client::new(connection);
        let response = client.request(&Request {
            method: request.method,
            path: &request.path,
            headers,
            body: Some(&request.body),
        });
        if let Err(e) = client.into_inner().close() {
            debug!("closing https connection: {e:?}");
        }

        let response = response?;
        Ok(HttpsReply {
            status: response.status_code,
            headers: response.headers,
            body: response.body,
        })
    }
}

/// Request paths of one device.
#[derive(Debug)]
struct Routes {
    events: String,
    inbox: String,
    api_version: String,
}

impl Routes {
    fn new(config: &ClientConfig) -> Self {
        let device = urlencoding::encode(&config.device_id);
        Self {
            events: format!(
                "/devices/{device}/messages/events?api-version={}",
                config.api_version
            ),
            inbox: format!("/devices/{device}/messages/devicebound"),
            api_version: config.api_version.clone(),
        }
    }

    fn receive(&self) -> String {
        format!("{}?api-version={}", self.inbox, self.api_version)
    }

    /// Method, `iothub-to` target and full path settling one message.
    fn settle(&self, lock_token: &str, disposition: MessageDisposition) -> (Method, String, String) {
        let target = format!("{}/{}", self.inbox, urlencoding::encode(lock_token));
        let version = &self.api_version;
        match disposition {
            MessageDisposition::Complete => {
                let path = format!("{target}?api-version={version}");
                (Method::Delete, target, path)
            }
            MessageDisposition::Abandon => {
                let target = format!("{target}/abandon");
                let path = format!("{target}?api-version={version}");
                (Method::Post, target, path)
            }
            MessageDisposition::Reject => {
                let path = format!("{target}?reject=true&api-version={version}");
                (Method::Delete, target, path)
            }
        }
    }
}

/// Rebuilds a cloud-to-device message from a receive reply.
///
/// `iothub-app-*` headers become application properties without the
/// prefix; the other `iothub-*` system headers map to system properties.
fn received_message(reply: HttpsReply) -> Message {
    let HttpsReply { headers, body, .. } = reply;
    headers
        .into_iter()
        .fold(Message::new(body), |message, Header { name, value }| {
            let lower = name.to_ascii_lowercase();
            if let Some(app) = lower.strip_prefix(APP_PROPERTY_PREFIX) {
                return message.with_property(app, value);
            }
            match SystemProperty::from_https_name(&lower) {
                Some(property) => message.with_system_property(property, value),
                None => message,
            }
        })
}

struct Inner<E> {
    exchange: E,
    routes: Routes,
    queue: OutboundDispatchQueue,
    status: StatusTracker,
    retry: RetrySchedule,
    opened: bool,
    receiver: MessageReceiver,
    receive_interval: Duration,
    lock_timeout_secs: u32,
    /// When the next receive poll is due; `None` means now.
    next_receive: Option<Instant>,
}

/// Telemetry with batching and polled cloud-to-device messages over HTTPS.
pub struct HttpsTransport<E> {
    budget: usize,
    inner: Mutex<Inner<E>>,
}

impl<E> fmt::Debug for HttpsTransport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsTransport")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl<E: HttpsExchange> HttpsTransport<E> {
    /// Transport for the device in `config`, sending through `exchange`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `config` fails validation.
    pub fn new(config: &ClientConfig, exchange: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            budget: config.max_messages_per_send,
            inner: Mutex::new(Inner {
                exchange,
                routes: Routes::new(config),
                queue: OutboundDispatchQueue::new(),
                status: StatusTracker::new(),
                retry: RetrySchedule::new(ExponentialBackoff::from(&config.retry)),
                opened: false,
                receiver: MessageReceiver::new(),
                receive_interval: Duration::from_millis(config.receive_interval_ms),
                lock_timeout_secs: config.message_lock_timeout_secs,
                next_receive: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, ready: (Vec<CallbackPacket>, StatusEvents)) {
        let (callbacks, events) = ready;
        events.notify();
        for callback in callbacks {
            callback.invoke();
        }
    }

    /// Runs the message callback outside the lock, then sends its verdict.
    fn settle(&self, delivery: MessageDelivery) {
        let disposition = delivery.run();
        let Some(lock_token) = delivery.lock_token() else {
            return;
        };
        let ready = {
            let mut inner = self.lock();
            if inner.queue.is_closed() {
                debug!("transport closed; message {lock_token} stays locked until it times out");
                return;
            }
            inner.send_disposition(lock_token, disposition, Instant::now());
            inner.take_ready()
        };
        self.finish(ready);
    }
}

impl<E: HttpsExchange> Inner<E> {
    fn take_ready(&mut self) -> (Vec<CallbackPacket>, StatusEvents) {
        (self.queue.take_callbacks(), self.status.take_events())
    }

    fn link_ok(&mut self) {
        self.retry.reset();
        self.status
            .set(ConnectionStatus::Connected, ConnectionStatusChangeReason::ConnectionOk);
    }

    /// Starts or continues the backoff after a link failure.
    fn link_failed(&mut self, now: Instant) {
        match self.retry.record_failure(now) {
            Some(delay) => {
                debug!("next https attempt in {delay:?}");
                self.status.set(
                    ConnectionStatus::DisconnectedRetrying,
                    ConnectionStatusChangeReason::NoNetwork,
                );
            }
            None => self.shut_down(ConnectionStatusChangeReason::RetryExpired),
        }
    }

    fn work(&mut self, budget: usize, now: Instant) -> Result<Option<MessageDelivery>> {
        if self.queue.is_closed() {
            return Err(Error::Closed);
        }
        if !self.opened {
            return Err(Error::NotConnected);
        }
        if !self.retry.is_due(now) {
            return Ok(None);
        }
        self.send_next(budget, now)?;
        if self.queue.is_closed() || self.retry.failures() > 0 {
            return Ok(None);
        }
        Ok(self.receive_next(now))
    }

    /// Sends one request built from the front of the queue.
    fn send_next(&mut self, budget: usize, now: Instant) -> Result<usize> {
        let mut packets: Vec<Packet> = Vec::new();
        let mut batch = HttpsBatch::new();
        while packets.len() < budget {
            let Some(packet) = self.queue.pop_waiting(now) else {
                break;
            };
            match batch.try_add(packet.message()) {
                Ok(()) => packets.push(packet),
                Err(e) if packets.is_empty() => {
                    debug!("{:?} does not fit a batch, sending it alone: {e}", packet.id());
                    packets.push(packet);
                    break;
                }
                Err(_) => {
                    self.queue.return_to_waiting(packet);
                    break;
                }
            }
        }

        let count = packets.len();
        let payload = match packets.as_slice() {
            [] => return Ok(0),
            [single] => encode_single(single.message()),
            _ => Ok(batch.into_payload()),
        };
        for packet in packets {
            self.queue.start(packet);
        }

        let HttpsPayload {
            body,
            content_type,
            mut headers,
        } = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping oversized telemetry: {e}");
                self.queue
                    .complete_all_in_progress(StatusCode::RequestEntityTooLarge);
                return Ok(count);
            }
        };
        headers.push(Header::new("content-type", content_type));

        let request = HttpsRequest {
            method: Method::Post,
            path: self.routes.events.clone(),
            headers,
            body,
        };
        match self.exchange.send(&request) {
            Ok(reply) => {
                let status = StatusCode::from_http(reply.status);
                debug!("POST of {count} message(s) returned {}", reply.status);
                self.queue.complete_all_in_progress(status);
                self.link_ok();
                Ok(count)
            }
            Err(e) if e.is_retryable() => {
                let requeued = self.queue.requeue_in_progress();
                warn!("POST failed ({e}), {requeued} message(s) back in queue");
                self.link_failed(now);
                Ok(0)
            }
            Err(e) => {
                warn!("POST failed permanently: {e}");
                self.queue.complete_all_in_progress(StatusCode::Error);
                Ok(count)
            }
        }
    }

    /// Polls for one cloud-to-device message when a callback is registered
    /// and the poll is due.
    fn receive_next(&mut self, now: Instant) -> Option<MessageDelivery> {
        if !self.receiver.has_callback() || self.next_receive.is_some_and(|at| now < at) {
            return None;
        }
        let request = HttpsRequest {
            method: Method::Get,
            path: self.routes.receive(),
            headers: vec![
                Header::new("iothub-to", self.routes.inbox.as_str()),
                Header::new("iothub-messagelocktimeout", self.lock_timeout_secs.to_string()),
            ],
            body: Vec::new(),
        };
        let reply = match self.exchange.send(&request) {
            Ok(reply) => reply,
            Err(e) if e.is_retryable() => {
                warn!("receive failed ({e})");
                self.link_failed(now);
                return None;
            }
            Err(e) => {
                warn!("receive failed permanently: {e}");
                self.next_receive = Some(now + self.receive_interval);
                return None;
            }
        };
        self.link_ok();

        if reply.status != 200 {
            if reply.status != 204 {
                warn!("receive returned {}", reply.status);
            }
            self.next_receive = Some(now + self.receive_interval);
            return None;
        }
        self.next_receive = None;

        let Some(lock_token) = reply.header("etag").map(|tag| tag.trim_matches('"').to_string())
        else {
            warn!("dropping received message without an ETag; it cannot be settled");
            return None;
        };
        debug!("received cloud-to-device message {lock_token}");
        self.receiver
            .on_message(received_message(reply), Some(lock_token))
    }

    fn send_disposition(&mut self, lock_token: &str, disposition: MessageDisposition, now: Instant) {
        let (method, target, path) = self.routes.settle(lock_token, disposition);
        let request = HttpsRequest {
            method,
            path,
            headers: vec![
                Header::new("iothub-to", target),
                Header::new("if-match", lock_token),
            ],
            body: Vec::new(),
        };
        match self.exchange.send(&request) {
            Ok(reply) if matches!(reply.status, 200 | 204) => {
                debug!("message {lock_token} settled: {disposition:?}");
                self.link_ok();
            }
            Ok(reply) => {
                warn!("settling message {lock_token} ({disposition:?}) returned {}", reply.status);
                self.link_ok();
            }
            Err(e) if e.is_retryable() => {
                warn!("settling message {lock_token} failed ({e}); the hub redelivers it after the lock expires");
                self.link_failed(now);
            }
            Err(e) => warn!("settling message {lock_token} failed permanently: {e}"),
        }
    }

    fn shut_down(&mut self, reason: ConnectionStatusChangeReason) {
        let cancelled = self.queue.cancel_all();
        info!("https transport closed ({reason:?}), {cancelled} operation(s) cancelled");
        self.status.set(ConnectionStatus::Disconnected, reason);
    }
}

impl<E: HttpsExchange> Transport for HttpsTransport<E> {
    /// HTTPS keeps no connection open; this only allows sending.
    fn open(&self) -> Result<()> {
        let ready = {
            let mut inner = self.lock();
            if inner.queue.is_closed() {
                return Err(Error::Closed);
            }
            inner.opened = true;
            inner
                .status
                .set(ConnectionStatus::Connected, ConnectionStatusChangeReason::ConnectionOk);
            inner.take_ready()
        };
        self.finish(ready);
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::SizeExceeded`] for a body that could never be sent.
    fn send_telemetry(&self, message: Message, on_result: Option<ResultCallback>) -> Result<()> {
        let size = message.body().len();
        if size > MAX_BATCH_BYTES {
            return Err(Error::SizeExceeded {
                size,
                limit: MAX_BATCH_BYTES,
            });
        }
        self.lock()
            .queue
            .enqueue(Packet::new(Operation::Telemetry, message).with_callback(on_result))?;
        Ok(())
    }

    /// Polling needs no subscription, so `on_result` sees
    /// [`StatusCode::Ok`] on the next `do_work`.
    fn subscribe_messages(
        &self,
        callback: MessageCallback,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.queue.is_closed() {
            return Err(Error::Closed);
        }
        inner.receiver.register(callback);
        inner.queue.push_outcome(CallbackPacket::new(
            Operation::MessageSubscribe,
            StatusCode::Ok,
            on_result,
        ));
        Ok(())
    }

    fn do_work(&self) -> Result<()> {
        let now = Instant::now();
        let (result, ready) = {
            let mut inner = self.lock();
            let result = inner.work(self.budget, now);
            (result, inner.take_ready())
        };
        self.finish(ready);
        if let Some(delivery) = result? {
            self.settle(delivery);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let ready = {
            let mut inner = self.lock();
            if !inner.queue.is_closed() {
                inner.shut_down(ConnectionStatusChangeReason::ClientClose);
            }
            inner.take_ready()
        };
        self.finish(ready);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.lock().status.status()
    }

    fn set_connection_status_callback(&self, callback: ConnectionStatusCallback) {
        self.lock().status.set_callback(callback);
    }
}
