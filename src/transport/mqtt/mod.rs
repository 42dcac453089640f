//! MQTT transport.
//!
//! Telemetry, cloud-to-device messages, device twin and direct methods
//! over one MQTT session. The
//! session is reached through [`MqttConnector`] / [`MqttSession`], which the
//! crate's MQTT client implements and tests replace with doubles.
//!
//! `do_work` runs, in order:
//!
//! 1. a reconnect attempt, if the link is down and the backoff has elapsed;
//! 2. a keep-alive PINGREQ when the session has been idle;
//! 3. up to `max_messages_per_send` inbound PUBLISHes, routed to the
//!    correlation table, the twin, the method handler or the message
//!    receiver;
//! 4. up to `max_messages_per_send` outbound packets;
//! 5. every ready user callback, after the lock is released.
//!
//! A lost session requeues every in-flight packet once, forgets outstanding
//! request ids and reconnects with capped exponential backoff. Filters the
//! broker accepted are subscribed again on the new session.
//!
//! A subscription counts only once the broker acknowledged it. Repeated
//! subscribe calls while one is in flight share its outcome; a refused one
//! can simply be retried.

pub mod correlation;
pub mod topic;

use crate::config::{ClientConfig, CredentialSource, StaticCredential};
use crate::dispatch::{
    CallbackPacket, Disposition, Operation, OutboundDispatchQueue, Packet, ResultCallback,
    StatusCode, SubscribeAction,
};
use crate::error::{Error, Result};
use crate::message::{Message, SystemProperty};
use crate::methods::{
    MethodDispatch, MethodInvocation, MethodInvocationHandler, MethodOutcome, MethodResponse,
    MethodSubscription,
};
use crate::network::application::mqtt::{Client, Options, PublishPacket, QoS};
use crate::network::error::Error as NetError;
use crate::network::{Connect, Connection};
use crate::receive::{MessageCallback, MessageDelivery, MessageDisposition, MessageReceiver};
use crate::transport::retry::RetrySchedule;
use crate::transport::status::{StatusEvents, StatusTracker};
use crate::transport::{
    ConnectionStatus, ConnectionStatusCallback, ConnectionStatusChangeReason, ExponentialBackoff,
    Transport,
};
use crate::twin::{Delivery, DesiredCallbacks, TwinProperty, TwinSynchronizer};
use correlation::{CorrelationTable, TwinResponseKind};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use topic::{InboundTopic, MethodTopics, TelemetryTopics, TopicCodec, TwinTopics, WireAction};

/// An established MQTT session.
pub trait MqttSession: Send {
    /// Publishes; at QoS 1 returns once the broker acknowledged.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> core::result::Result<(), NetError>;
    /// Subscribes; returns once the broker accepted the filter.
    fn subscribe(&mut self, filter: &str, qos: QoS) -> core::result::Result<(), NetError>;
    /// Sends PINGREQ.
    fn ping(&mut self) -> core::result::Result<(), NetError>;
    /// Next inbound PUBLISH, or `None` when nothing is waiting.
    fn poll(&mut self) -> core::result::Result<Option<PublishPacket>, NetError>;
    /// Disconnects and releases the connection.
    fn close(self) -> core::result::Result<(), NetError>;
}

impl<C: Connection + Send> MqttSession for Client<C> {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> core::result::Result<(), NetError> {
        Client::publish(self, topic, payload, qos)
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> core::result::Result<(), NetError> {
        Client::subscribe(self, filter, qos)
    }

    fn ping(&mut self) -> core::result::Result<(), NetError> {
        Client::ping(self)
    }

    fn poll(&mut self) -> core::result::Result<Option<PublishPacket>, NetError> {
        Client::poll(self)
    }

    fn close(self) -> core::result::Result<(), NetError> {
        self.disconnect()
    }
}

/// Opens sessions; called on `open` and on every reconnect attempt.
pub trait MqttConnector: Send {
    /// Session type handed out.
    type Session: MqttSession;
    /// Dials, authenticates and returns a fresh session.
    fn connect(&mut self) -> core::result::Result<Self::Session, NetError>;
}

/// [`MqttConnector`] dialing the hub on port 8883 with the crate's client.
pub struct MqttDialer<N, S = StaticCredential> {
    connector: N,
    credentials: S,
    remote: String,
    client_id: String,
    username: String,
    keep_alive_seconds: u16,
}

impl<N, S> MqttDialer<N, S>
where
    N: Connect + Send,
    S: CredentialSource,
{
    /// Dialer for the hub and device named in `config`.
    pub fn new(connector: N, config: &ClientConfig, credentials: S) -> Self {
        Self {
            connector,
            credentials,
            remote: format!("{}:8883", config.host_name),
            client_id: config.device_id.clone(),
            username: config.mqtt_username(),
            keep_alive_seconds: config.keep_alive_seconds,
        }
    }
}

impl<N, S> fmt::Debug for MqttDialer<N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttDialer")
            .field("remote", &self.remote)
            .field("client_id", &self.client_id)
            .field("keep_alive_seconds", &self.keep_alive_seconds)
            .finish_non_exhaustive()
    }
}

impl<N, S> MqttConnector for MqttDialer<N, S>
where
    N: Connect + Send,
    N::Connection: Send,
    S: CredentialSource,
{
    type Session = Client<N::Connection>;

    fn connect(&mut self) -> core::result::Result<Self::Session, NetError> {
        let connection = self.connector.connect(&self.remote).map_err(|e| {
            warn!("could not reach {}: {e:?}", self.remote);
            NetError::NotOpen
        })?;
        let password = self.credentials.credential();
        Client::connect(
            connection,
            Options {
                client_id: &self.client_id,
                username: Some(&self.username),
                password: password.as_deref(),
                keep_alive_seconds: self.keep_alive_seconds,
                clean_session: false,
            },
        )
    }
}

struct Codecs {
    telemetry: TelemetryTopics,
    twin: TwinTopics,
    methods: MethodTopics,
}

impl Codecs {
    fn all(&self) -> [&dyn TopicCodec; 3] {
        [&self.telemetry, &self.twin, &self.methods]
    }
}

/// Work collected under the lock and run after releasing it.
#[derive(Default)]
struct Ready {
    events: StatusEvents,
    callbacks: Vec<CallbackPacket>,
    deliveries: Vec<Delivery>,
    invocations: Vec<MethodInvocation>,
    messages: Vec<MessageDelivery>,
}

struct Inner<K: MqttConnector> {
    connector: K,
    session: Option<K::Session>,
    opened: bool,
    queue: OutboundDispatchQueue,
    correlation: CorrelationTable,
    codecs: Codecs,
    twin: TwinSynchronizer,
    methods: MethodInvocationHandler,
    receiver: MessageReceiver,
    /// Filters the broker accepted, restored after a reconnect.
    subscriptions: BTreeMap<String, QoS>,
    next_request_id: u64,
    status: StatusTracker,
    retry: RetrySchedule,
    last_activity: Instant,
    deliveries: Vec<Delivery>,
    invocations: Vec<MethodInvocation>,
    messages: Vec<MessageDelivery>,
}

/// Telemetry, cloud-to-device messages, twin and methods over MQTT.
pub struct MqttTransport<K: MqttConnector> {
    budget: usize,
    keep_alive: Option<Duration>,
    inner: Mutex<Inner<K>>,
}

impl<K: MqttConnector> fmt::Debug for MqttTransport<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("budget", &self.budget)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

impl<K: MqttConnector> MqttTransport<K> {
    /// Transport for the device in `config`. Nothing is dialed until
    /// [`open`](Transport::open).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `config` fails validation.
    pub fn new(config: &ClientConfig, connector: K) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            budget: config.max_messages_per_send,
            keep_alive: (config.keep_alive_seconds > 0)
                .then(|| Duration::from_secs(u64::from(config.keep_alive_seconds) / 2)),
            inner: Mutex::new(Inner {
                connector,
                session: None,
                opened: false,
                queue: OutboundDispatchQueue::new(),
                correlation: CorrelationTable::new(),
                codecs: Codecs {
                    telemetry: TelemetryTopics::new(&config.device_id),
                    twin: TwinTopics,
                    methods: MethodTopics,
                },
                twin: TwinSynchronizer::new(),
                methods: MethodInvocationHandler::new(),
                receiver: MessageReceiver::new(),
                subscriptions: BTreeMap::new(),
                next_request_id: 0,
                status: StatusTracker::new(),
                retry: RetrySchedule::new(ExponentialBackoff::from(&config.retry)),
                last_activity: Instant::now(),
                deliveries: Vec::new(),
                invocations: Vec::new(),
                messages: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then delivers whatever it made ready.
    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner<K>) -> T) -> T {
        let (value, ready) = {
            let mut inner = self.lock();
            let value = f(&mut inner);
            (value, inner.take_ready())
        };
        self.run(ready);
        value
    }

    fn run(&self, ready: Ready) {
        ready.events.notify();
        for callback in ready.callbacks {
            callback.invoke();
        }
        for delivery in ready.deliveries {
            delivery.deliver();
        }
        for invocation in ready.invocations {
            let request_id = invocation.request().request_id().to_string();
            match invocation.run() {
                MethodOutcome::Respond(response) => {
                    if let Err(e) = self.enqueue_method_response(response, None) {
                        warn!("method response for {request_id} not sent: {e}");
                    }
                }
                MethodOutcome::Abandon => {
                    let abandoned = self.lock().methods.abandon(&request_id);
                    match abandoned {
                        Ok(Some(on_status)) => on_status(&request_id, StatusCode::Error),
                        Ok(None) => {}
                        Err(_) => debug!("method request {request_id} was answered by its handler"),
                    }
                }
            }
        }
        for delivery in ready.messages {
            let disposition = delivery.run();
            if disposition != MessageDisposition::Complete {
                debug!("mqtt already acknowledged the message; {disposition:?} has no effect");
            }
        }
    }

    fn enqueue_method_response(
        &self,
        response: MethodResponse,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let packet = inner.methods.respond(response, on_result)?;
        inner.queue.enqueue(packet)?;
        Ok(())
    }
}

impl<K: MqttConnector> Inner<K> {
    fn take_ready(&mut self) -> Ready {
        let mut callbacks = self.queue.take_callbacks();
        let mut parked = Vec::new();
        for outcome in &callbacks {
            let status = outcome.status();
            match outcome.operation() {
                Operation::TwinSubscribeDesired => {
                    parked.extend(self.twin.subscription_settled(status));
                }
                Operation::MethodSubscribe => {
                    parked.extend(self.methods.subscription_settled(status));
                }
                Operation::MessageSubscribe => {
                    parked.extend(self.receiver.subscription_settled(status));
                }
                Operation::TwinUpdateReported => {
                    if let Some(request_id) = outcome.request_id() {
                        self.twin.forget_update(request_id);
                    }
                }
                _ => {}
            }
        }
        callbacks.extend(parked);

        Ready {
            events: self.status.take_events(),
            callbacks,
            deliveries: std::mem::take(&mut self.deliveries),
            invocations: std::mem::take(&mut self.invocations),
            messages: std::mem::take(&mut self.messages),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.queue.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn next_request_id(&mut self) -> String {
        self.next_request_id += 1;
        self.next_request_id.to_string()
    }

    fn subscribe(&mut self, action: SubscribeAction, operation: Operation) -> Result<()> {
        match action {
            SubscribeAction::Send(packet) => {
                self.queue.enqueue(packet)?;
            }
            SubscribeAction::Pending => {}
            SubscribeAction::AlreadySubscribed(on_result) => {
                self.queue
                    .push_outcome(CallbackPacket::new(operation, StatusCode::Ok, on_result));
            }
        }
        Ok(())
    }

    /// Opens a session and restores subscriptions on it.
    fn connect(&mut self, now: Instant) -> core::result::Result<(), NetError> {
        let mut session = self.connector.connect()?;
        for (filter, qos) in &self.subscriptions {
            if let Err(e) = session.subscribe(filter, *qos) {
                if let Err(close) = session.close() {
                    debug!("closing half-open session: {close}");
                }
                return Err(e);
            }
            debug!("restored subscription {filter}");
        }
        self.session = Some(session);
        self.last_activity = now;
        self.retry.reset();
        self.status
            .set(ConnectionStatus::Connected, ConnectionStatusChangeReason::ConnectionOk);
        Ok(())
    }

    fn reconnect(&mut self, now: Instant) {
        if !self.retry.is_due(now) {
            return;
        }
        debug!("reconnect attempt {}", self.retry.failures() + 1);
        if let Err(e) = self.connect(now) {
            match self.retry.record_failure(now) {
                Some(delay) => {
                    warn!("reconnect failed ({e}), next attempt in {delay:?}");
                    self.status.set(
                        ConnectionStatus::DisconnectedRetrying,
                        ConnectionStatusChangeReason::NoNetwork,
                    );
                }
                None => {
                    warn!("reconnect failed ({e}), giving up");
                    self.shut_down(ConnectionStatusChangeReason::RetryExpired);
                }
            }
        }
    }

    /// Tears the session down and schedules reconnection.
    fn connection_lost(&mut self, error: &Error) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!("closing lost session: {e}");
            }
        }
        let forgotten = self.correlation.clear();
        let requeued = self.queue.requeue_in_progress();
        warn!("connection lost ({error}): {requeued} packet(s) requeued, {forgotten} request id(s) dropped");
        self.retry.reset();
        self.status.set(
            ConnectionStatus::DisconnectedRetrying,
            ConnectionStatusChangeReason::CommunicationError,
        );
    }

    fn shut_down(&mut self, reason: ConnectionStatusChangeReason) {
        let cancelled = self.queue.cancel_all();
        self.correlation.clear();
        self.methods.clear_pending();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!("closing session: {e}");
            }
        }
        info!("mqtt transport closed ({reason:?}), {cancelled} operation(s) cancelled");
        self.status.set(ConnectionStatus::Disconnected, reason);
    }

    fn work(&mut self, budget: usize, keep_alive: Option<Duration>, now: Instant) -> Result<()> {
        self.ensure_not_closed()?;
        if !self.opened {
            return Err(Error::NotConnected);
        }
        if self.session.is_none() {
            self.reconnect(now);
            if self.session.is_none() {
                return Ok(());
            }
        }

        if let Err(e) = self.keep_alive(keep_alive, now) {
            self.connection_lost(&e);
            return Ok(());
        }
        if let Err(e) = self.receive(budget) {
            self.connection_lost(&e);
            return Ok(());
        }
        match self.send(budget, now) {
            Ok(sent) => {
                if sent > 0 {
                    self.last_activity = now;
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                self.connection_lost(&e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn keep_alive(&mut self, interval: Option<Duration>, now: Instant) -> Result<()> {
        let (Some(interval), Some(session)) = (interval, self.session.as_mut()) else {
            return Ok(());
        };
        if now.duration_since(self.last_activity) >= interval {
            session.ping()?;
            self.last_activity = now;
        }
        Ok(())
    }

    fn receive(&mut self, budget: usize) -> Result<()> {
        for _ in 0..budget {
            let Some(session) = self.session.as_mut() else {
                return Ok(());
            };
            match session.poll()? {
                Some(packet) => self.handle_inbound(packet),
                None => break,
            }
        }
        Ok(())
    }

    fn send(&mut self, budget: usize, now: Instant) -> Result<usize> {
        let Inner {
            session,
            queue,
            correlation,
            codecs,
            subscriptions,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            return Ok(0);
        };
        queue.drain(budget, now, |packet| {
            send_packet(&mut *session, codecs, correlation, subscriptions, packet)
        })
    }

    fn handle_inbound(&mut self, packet: PublishPacket) {
        let topic = packet.topic.as_str();
        let decoded = self.codecs.all().into_iter().find_map(|codec| codec.decode(topic));
        let inbound = match decoded {
            Some(Ok(inbound)) => inbound,
            Some(Err(e)) => {
                warn!("dropping inbound message: {e}");
                return;
            }
            None => {
                warn!("dropping message on unexpected topic {topic:?}");
                return;
            }
        };

        match inbound {
            InboundTopic::TwinResponse {
                status,
                request_id,
                version,
            } => self.handle_twin_response(status, request_id, version, packet.payload),
            InboundTopic::DesiredPatch { version } => {
                match self.twin.apply_desired_patch(version, &packet.payload) {
                    Ok(deliveries) => self.deliveries.extend(deliveries),
                    Err(e) => warn!("dropping desired patch: {e}"),
                }
            }
            InboundTopic::MethodRequest { name, request_id } => {
                debug!("method {name:?} invoked ({request_id})");
                match self.methods.on_request(&name, &request_id, &packet.payload) {
                    MethodDispatch::Invoke(invocation) => self.invocations.push(invocation),
                    MethodDispatch::NoSubscriber => {}
                }
            }
            InboundTopic::CloudToDevice { properties } => {
                let message = device_bound_message(packet.payload, properties);
                if let Some(delivery) = self.receiver.on_message(message, None) {
                    self.messages.push(delivery);
                }
            }
        }
    }

    fn handle_twin_response(
        &mut self,
        status: u16,
        request_id: Option<String>,
        version: Option<i64>,
        payload: Vec<u8>,
    ) {
        let Some(request_id) = request_id else {
            warn!("dropping twin response {status} without a request id");
            return;
        };
        let kind = match self
            .correlation
            .take(&request_id)
            .and_then(TwinResponseKind::for_operation)
        {
            Ok(kind) => kind,
            Err(e) => {
                warn!("dropping twin response: {e}");
                return;
            }
        };

        match self
            .twin
            .apply_response(kind, &request_id, status, version, &payload)
        {
            Ok(deliveries) => self.deliveries.extend(deliveries),
            Err(e) => warn!("twin response {request_id} not applied: {e}"),
        }
        let response = (kind == TwinResponseKind::Get).then_some(payload);
        if !self
            .queue
            .complete_request(&request_id, StatusCode::from_http(status), response)
        {
            debug!("twin response {request_id} matched no in-flight packet");
        }
    }
}

/// Rebuilds a cloud-to-device message from its topic property bag.
///
/// Known `$.` keys become system properties. Other `$.` keys (such as the
/// `$.exp` expiry) and `iothub-ack` are hub bookkeeping and are dropped;
/// everything else is an application property.
fn device_bound_message(payload: Vec<u8>, properties: Vec<(String, String)>) -> Message {
    properties
        .into_iter()
        .fold(Message::new(payload), |message, (key, value)| {
            match SystemProperty::from_mqtt_name(&key) {
                Some(property) => message.with_system_property(property, value),
                None if key.starts_with("$.") || key == "iothub-ack" => message,
                None => message.with_property(key, value),
            }
        })
}

/// Puts one packet on the wire.
fn send_packet<S: MqttSession>(
    session: &mut S,
    codecs: &Codecs,
    correlation: &mut CorrelationTable,
    subscriptions: &mut BTreeMap<String, QoS>,
    packet: &Packet,
) -> Result<Disposition> {
    let operation = packet.operation();
    let Some((codec, action)) = codecs
        .all()
        .into_iter()
        .find_map(|codec| codec.encode(packet).map(|action| (codec, action)))
    else {
        return Err(Error::UnsupportedOperation(operation));
    };
    let action = action?;

    if let Some(filter) = codec.response_filter(operation) {
        if !subscriptions.contains_key(filter) {
            session.subscribe(filter, QoS::AtMostOnce)?;
            subscriptions.insert(filter.to_string(), QoS::AtMostOnce);
        }
    }

    match action {
        WireAction::Subscribe { filter, qos } => {
            session.subscribe(&filter, qos)?;
            subscriptions.insert(filter, qos);
            Ok(Disposition::Completed(StatusCode::Ok))
        }
        WireAction::Publish { topic, qos } => {
            let correlated = packet.request_id().filter(|_| operation.awaits_response());
            if let Some(request_id) = correlated {
                correlation.put(request_id, operation);
            }
            if let Err(e) = session.publish(&topic, packet.message().body(), qos) {
                if let Some(request_id) = correlated {
                    correlation.forget(request_id);
                }
                return Err(e.into());
            }
            Ok(if operation.awaits_response() {
                Disposition::AwaitResponse
            } else {
                Disposition::Completed(StatusCode::Ok)
            })
        }
    }
}

impl<K: MqttConnector> Transport for MqttTransport<K> {
    fn open(&self) -> Result<()> {
        self.with_inner(|inner| {
            inner.ensure_not_closed()?;
            if inner.session.is_some() {
                return Ok(());
            }
            match inner.connect(Instant::now()) {
                Ok(()) => {
                    inner.opened = true;
                    Ok(())
                }
                Err(e) => {
                    inner.status.set(
                        ConnectionStatus::Disconnected,
                        ConnectionStatusChangeReason::NoNetwork,
                    );
                    Err(e.into())
                }
            }
        })
    }

    fn send_telemetry(&self, message: Message, on_result: Option<ResultCallback>) -> Result<()> {
        self.lock()
            .queue
            .enqueue(Packet::new(Operation::Telemetry, message).with_callback(on_result))?;
        Ok(())
    }

    fn get_twin(&self, on_result: Option<ResultCallback>) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let request_id = inner.next_request_id();
        let packet = inner.twin.get_request(request_id, on_result);
        inner.queue.enqueue(packet)?;
        Ok(())
    }

    fn update_reported_properties(
        &self,
        properties: Vec<TwinProperty>,
        expected_version: Option<i64>,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let request_id = inner.next_request_id();
        let packet = inner
            .twin
            .update_request(properties, expected_version, request_id, on_result)?;
        inner.queue.enqueue(packet)?;
        Ok(())
    }

    fn subscribe_desired_properties(
        &self,
        callbacks: DesiredCallbacks,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let action = inner.twin.subscribe(callbacks, on_result);
        inner.subscribe(action, Operation::TwinSubscribeDesired)
    }

    fn subscribe_methods(
        &self,
        subscription: MethodSubscription,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let action = inner.methods.subscribe(subscription, on_result);
        inner.subscribe(action, Operation::MethodSubscribe)
    }

    fn subscribe_messages(
        &self,
        callback: MessageCallback,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_not_closed()?;
        let action = inner.receiver.subscribe(callback, on_result);
        inner.subscribe(action, Operation::MessageSubscribe)
    }

    fn respond_to_method(
        &self,
        request_id: &str,
        status: u16,
        payload: Vec<u8>,
        on_result: Option<ResultCallback>,
    ) -> Result<()> {
        self.enqueue_method_response(MethodResponse::new(request_id, status, payload), on_result)
    }

    fn do_work(&self) -> Result<()> {
        let budget = self.budget;
        let keep_alive = self.keep_alive;
        self.with_inner(|inner| inner.work(budget, keep_alive, Instant::now()))
    }

    fn close(&self) -> Result<()> {
        self.with_inner(|inner| {
            if !inner.queue.is_closed() {
                inner.shut_down(ConnectionStatusChangeReason::ClientClose);
            }
        });
        Ok(())
    }

    fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.queue.is_empty()
            && inner.deliveries.is_empty()
            && inner.invocations.is_empty()
            && inner.messages.is_empty()
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.lock().status.status()
    }

    fn set_connection_status_callback(&self, callback: ConnectionStatusCallback) {
        self.lock().status.set_callback(callback);
    }
}
