//! Direct-method invocation.
//!
//! Every inbound method request is tracked by its request id from the moment
//! it arrives until it is answered or abandoned:
//!
//! ```text
//! Received ──respond──► Responded
//!     └────abandon────► Abandoned
//! ```
//!
//! Only a request in `Received` can be answered, so a second response, or a
//! response for an id the hub never sent, fails with
//! [`Error::MethodNotAwaitingResponse`].
//!
//! The registered [`MethodCallback`] runs outside the transport lock. If it
//! returns `None` or panics, the request is abandoned and the status
//! callback sees [`StatusCode::Error`]. The callback may also answer
//! re-entrantly through the client before returning `None`.

use crate::dispatch::{
    CallbackPacket, Operation, Packet, ResultCallback, StatusCode, SubscribeAction, WireSubscription,
};
use crate::error::{Error, Result};
use crate::message::Message;
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// An inbound method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    request_id: String,
    method_name: String,
    payload: Vec<u8>,
}

impl MethodRequest {
    /// A request as the hub delivers it.
    pub fn new(
        request_id: impl Into<String>,
        method_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method_name: method_name.into(),
            payload: payload.into(),
        }
    }

    /// Hub-assigned id the response must echo.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Name the service invoked.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Raw request body, usually JSON.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Builds the answer to this request.
    pub fn respond(&self, status: u16, payload: impl Into<Vec<u8>>) -> MethodResponse {
        MethodResponse::new(self.request_id.clone(), status, payload)
    }
}

/// The device's answer to a [`MethodRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    request_id: String,
    status: u16,
    payload: Vec<u8>,
}

impl MethodResponse {
    /// Answer with an application status and body.
    pub fn new(request_id: impl Into<String>, status: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            payload: payload.into(),
        }
    }

    /// Id of the request being answered.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Application status returned to the service.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// User handler for method requests. `None` abandons the request.
pub type MethodCallback = Arc<dyn Fn(&MethodRequest) -> Option<MethodResponse> + Send + Sync>;

/// Told how each request ended: the response's send status, or
/// [`StatusCode::Error`] when the request was abandoned.
pub type MethodStatusCallback = Arc<dyn Fn(&str, StatusCode) + Send + Sync>;

/// Handler plus optional status callback.
#[derive(Clone)]
pub struct MethodSubscription {
    handler: MethodCallback,
    on_status: Option<MethodStatusCallback>,
}

impl MethodSubscription {
    /// Subscription without a status callback.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MethodRequest) -> Option<MethodResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            on_status: None,
        }
    }

    /// Adds the callback told how each request ended.
    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, StatusCode) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for MethodSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSubscription")
            .field("on_status", &self.on_status.is_some())
            .finish_non_exhaustive()
    }
}

/// What to do with an inbound method request.
#[derive(Debug)]
pub enum MethodDispatch {
    /// Nothing is subscribed; the hub will time the request out.
    NoSubscriber,
    /// Run the handler outside the lock.
    Invoke(MethodInvocation),
}

/// A handler call prepared under the transport lock.
pub struct MethodInvocation {
    handler: MethodCallback,
    request: MethodRequest,
}

/// Result of running a [`MethodInvocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    /// Send this response.
    Respond(MethodResponse),
    /// The handler returned `None` or panicked.
    Abandon,
}

impl MethodInvocation {
    /// The request the handler will see.
    pub fn request(&self) -> &MethodRequest {
        &self.request
    }

    /// Calls the handler, containing any panic.
    ///
    /// The response always carries the request's id, whatever id the
    /// handler put in it.
    pub fn run(&self) -> MethodOutcome {
        match catch_unwind(AssertUnwindSafe(|| (self.handler)(&self.request))) {
            Ok(Some(response)) => MethodOutcome::Respond(MethodResponse {
                request_id: self.request.request_id.clone(),
                ..response
            }),
            Ok(None) => MethodOutcome::Abandon,
            Err(_) => {
                warn!(
                    "method handler for {:?} panicked",
                    self.request.method_name
                );
                MethodOutcome::Abandon
            }
        }
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Method subscription state and per-request lifecycle.
#[derive(Debug, Default)]
pub struct MethodInvocationHandler {
    subscription: Option<MethodSubscription>,
    wire: WireSubscription,
    received: HashSet<String>,
}

impl MethodInvocationHandler {
    /// No handler and no tracked requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The hub acknowledged the method subscription.
    pub fn is_subscribed(&self) -> bool {
        self.wire.is_active()
    }

    /// Stores the handler and yields the subscribe packet until the hub
    /// acknowledges one.
    pub fn subscribe(
        &mut self,
        subscription: MethodSubscription,
        on_result: Option<ResultCallback>,
    ) -> SubscribeAction {
        self.subscription = Some(subscription);
        self.wire.request(Operation::MethodSubscribe, on_result)
    }

    /// Records the outcome of the subscribe request.
    pub fn subscription_settled(&mut self, status: StatusCode) -> Vec<CallbackPacket> {
        self.wire.settle(Operation::MethodSubscribe, status)
    }

    /// Records an inbound request as `Received` and prepares the handler call.
    pub fn on_request(&mut self, name: &str, request_id: &str, payload: &[u8]) -> MethodDispatch {
        let Some(subscription) = &self.subscription else {
            warn!("method {name:?} ({request_id}) arrived with no handler registered");
            return MethodDispatch::NoSubscriber;
        };
        self.received.insert(request_id.to_string());
        MethodDispatch::Invoke(MethodInvocation {
            handler: subscription.handler.clone(),
            request: MethodRequest::new(request_id, name, payload),
        })
    }

    /// Moves a request to `Responded` and builds the response packet.
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotAwaitingResponse`] unless the id is in `Received`.
    pub fn respond(
        &mut self,
        response: MethodResponse,
        on_result: Option<ResultCallback>,
    ) -> Result<Packet> {
        if !self.received.remove(&response.request_id) {
            return Err(Error::MethodNotAwaitingResponse(response.request_id));
        }
        debug!("method request {} responded {}", response.request_id, response.status);

        let on_status = self.status_callback();
        let request_id = response.request_id.clone();
        let callback: ResultCallback = Box::new(move |status, body| {
            if let Some(on_status) = on_status {
                on_status(&request_id, status);
            }
            if let Some(on_result) = on_result {
                on_result(status, body);
            }
        });

        Ok(
            Packet::new(Operation::MethodResponse, Message::new(response.payload))
                .with_request_id(response.request_id)
                .with_status(response.status)
                .with_callback(Some(callback)),
        )
    }

    /// Moves a request to `Abandoned`.
    ///
    /// Returns the status callback to notify with [`StatusCode::Error`].
    ///
    /// # Errors
    ///
    /// [`Error::MethodNotAwaitingResponse`] if the request was already
    /// answered (for example re-entrantly from the handler).
    pub fn abandon(&mut self, request_id: &str) -> Result<Option<MethodStatusCallback>> {
        if !self.received.remove(request_id) {
            return Err(Error::MethodNotAwaitingResponse(request_id.to_string()));
        }
        debug!("method request {request_id} abandoned");
        Ok(self.status_callback())
    }

    /// Whether `request_id` is in `Received`.
    pub fn is_awaiting_response(&self, request_id: &str) -> bool {
        self.received.contains(request_id)
    }

    /// Forgets every unanswered request. The hub times them out.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.received.len();
        self.received.clear();
        dropped
    }

    fn status_callback(&self) -> Option<MethodStatusCallback> {
        self.subscription.as_ref().and_then(|s| s.on_status.clone())
    }
}
