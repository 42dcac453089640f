//! Device twin synchronization.
//!
//! A twin is a JSON document with two independently versioned sides:
//! *desired* properties written by the service and *reported* properties
//! written by the device. [`TwinSynchronizer`] keeps the last-seen copy of
//! both, turns user calls into [`Packet`]s, and turns inbound responses and
//! patches into [`Delivery`] values for the registered callbacks.
//!
//! # Callback style
//!
//! Desired-property changes are routed by a [`DesiredCallbacks`] value
//! chosen at subscription time:
//!
//! - [`DesiredCallbacks::WholePatch`]: one call per patch with every changed
//!   property.
//! - [`DesiredCallbacks::PerProperty`]: for each changed key, the callback
//!   registered for that key, otherwise the generic callback. A key matching
//!   neither is dropped without a call.
//!
//! Reported properties echoed back in a full twin document only ever go to
//! the generic per-property callback.
//!
//! The synchronizer never runs callbacks itself. The transport collects
//! [`Delivery`] values under its lock and runs them after releasing it.

mod property;


pub use property::{TwinCollection, TwinProperty, validate_key};

use crate::dispatch::{
    CallbackPacket, Operation, Packet, ResultCallback, StatusCode, SubscribeAction, WireSubscription,
};
use crate::error::Result;
use crate::message::Message;
use crate::transport::mqtt::correlation::TwinResponseKind;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Called with one changed property.
pub type PropertyCallback = Arc<dyn Fn(&TwinProperty) + Send + Sync>;

/// Called once per patch with all changed properties.
pub type PatchCallback = Arc<dyn Fn(&TwinCollection) + Send + Sync>;

/// How desired-property changes reach user code.
#[derive(Clone)]
pub enum DesiredCallbacks {
    /// One call per patch.
    WholePatch(PatchCallback),
    /// Per-key callbacks with an optional generic fallback.
    PerProperty {
        /// Callbacks by property key.
        per_key: HashMap<String, PropertyCallback>,
        /// Fallback for keys without their own callback.
        generic: Option<PropertyCallback>,
    },
}

impl DesiredCallbacks {
    /// Whole-patch style.
    pub fn whole_patch<F>(callback: F) -> Self
    where
        F: Fn(&TwinCollection) + Send + Sync + 'static,
    {
        DesiredCallbacks::WholePatch(Arc::new(callback))
    }

    /// Empty per-property style; add callbacks with [`on_key`](Self::on_key)
    /// and [`otherwise`](Self::otherwise).
    pub fn per_property() -> Self {
        DesiredCallbacks::PerProperty {
            per_key: HashMap::new(),
            generic: None,
        }
    }

    /// Registers a callback for one key. Switches a whole-patch value to
    /// per-property style.
    pub fn on_key<F>(self, key: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&TwinProperty) + Send + Sync + 'static,
    {
        let (mut per_key, generic) = self.into_parts();
        per_key.insert(key.into(), Arc::new(callback));
        DesiredCallbacks::PerProperty { per_key, generic }
    }

    /// Registers the generic per-property callback. Switches a whole-patch
    /// value to per-property style.
    pub fn otherwise<F>(self, callback: F) -> Self
    where
        F: Fn(&TwinProperty) + Send + Sync + 'static,
    {
        let (per_key, _) = self.into_parts();
        DesiredCallbacks::PerProperty {
            per_key,
            generic: Some(Arc::new(callback)),
        }
    }

    fn into_parts(self) -> (HashMap<String, PropertyCallback>, Option<PropertyCallback>) {
        match self {
            DesiredCallbacks::WholePatch(_) => (HashMap::new(), None),
            DesiredCallbacks::PerProperty { per_key, generic } => (per_key, generic),
        }
    }

    /// Folds a later registration into this one.
    ///
    /// Per-property registrations merge key by key and a new generic
    /// callback replaces the old one. Whole-patch on either side replaces.
    fn merge(&mut self, other: DesiredCallbacks) {
        match (self, other) {
            (
                DesiredCallbacks::PerProperty { per_key, generic },
                DesiredCallbacks::PerProperty {
                    per_key: new_keys,
                    generic: new_generic,
                },
            ) => {
                per_key.extend(new_keys);
                if new_generic.is_some() {
                    *generic = new_generic;
                }
            }
            (current, other) => *current = other,
        }
    }
}

impl fmt::Debug for DesiredCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredCallbacks::WholePatch(_) => f.write_str("WholePatch"),
            DesiredCallbacks::PerProperty { per_key, generic } => f
                .debug_struct("PerProperty")
                .field("keys", &per_key.keys().collect::<Vec<_>>())
                .field("generic", &generic.is_some())
                .finish(),
        }
    }
}

/// A callback invocation prepared under the transport lock.
pub enum Delivery {
    /// Per-key or generic property callback.
    Property {
        /// Callback chosen for the key.
        callback: PropertyCallback,
        /// The changed property.
        property: TwinProperty,
    },
    /// Whole-patch callback.
    Patch {
        /// The registered patch callback.
        callback: PatchCallback,
        /// Every changed property.
        patch: TwinCollection,
    },
}

impl Delivery {
    /// Runs the callback.
    pub fn deliver(self) {
        match self {
            Delivery::Property { callback, property } => callback(&property),
            Delivery::Patch { callback, patch } => callback(&patch),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Property { property, .. } => {
                f.debug_tuple("Property").field(&property.key()).finish()
            }
            Delivery::Patch { patch, .. } => f.debug_tuple("Patch").field(&patch.len()).finish(),
        }
    }
}

/// Desired/reported state and callback routing for one device.
#[derive(Debug, Default)]
pub struct TwinSynchronizer {
    desired: TwinCollection,
    reported: TwinCollection,
    callbacks: Option<DesiredCallbacks>,
    subscription: WireSubscription,
    /// Reported patches sent but not yet acknowledged, by request id.
    pending_reported: HashMap<String, TwinCollection>,
}

impl TwinSynchronizer {
    /// No snapshot, no callbacks, not subscribed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-seen desired properties.
    pub fn desired(&self) -> &TwinCollection {
        &self.desired
    }

    /// Reported properties as last acknowledged or received.
    pub fn reported(&self) -> &TwinCollection {
        &self.reported
    }

    /// The hub acknowledged the desired-property subscription.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Packet requesting the full twin document.
    pub fn get_request(&self, request_id: String, on_result: Option<ResultCallback>) -> Packet {
        Packet::new(Operation::TwinGet, Message::default())
            .with_request_id(request_id)
            .with_callback(on_result)
    }

    /// Packet patching reported properties.
    ///
    /// The body is a JSON object of the given properties. The message
    /// correlation id is set to the request id. `expected_version` is sent
    /// as `$version` on the topic. The reported snapshot only takes the
    /// properties once the hub accepts the patch.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`](crate::error::Error::DuplicateKey) if a key
    /// repeats; nothing is queued in that case.
    pub fn update_request(
        &mut self,
        properties: Vec<TwinProperty>,
        expected_version: Option<i64>,
        request_id: String,
        on_result: Option<ResultCallback>,
    ) -> Result<Packet> {
        let collection =
            TwinCollection::from_properties(properties.into_iter().map(TwinProperty::into_reported))?;
        let body = serde_json::to_vec(&collection.to_json())?;

        self.pending_reported.insert(request_id.clone(), collection);

        let mut message = Message::new(body);
        message.set_correlation_id(request_id.as_str());
        Ok(Packet::new(Operation::TwinUpdateReported, message)
            .with_request_id(request_id)
            .with_version(expected_version)
            .with_callback(on_result))
    }

    /// Registers desired-property callbacks.
    ///
    /// Callbacks always merge. The subscribe packet is produced until the
    /// hub acknowledges one; see [`WireSubscription`].
    pub fn subscribe(
        &mut self,
        callbacks: DesiredCallbacks,
        on_result: Option<ResultCallback>,
    ) -> SubscribeAction {
        match self.callbacks.as_mut() {
            Some(current) => current.merge(callbacks),
            None => self.callbacks = Some(callbacks),
        }
        self.subscription
            .request(Operation::TwinSubscribeDesired, on_result)
    }

    /// Records the outcome of the desired-property subscribe request.
    pub fn subscription_settled(&mut self, status: StatusCode) -> Vec<CallbackPacket> {
        self.subscription
            .settle(Operation::TwinSubscribeDesired, status)
    }

    /// Drops a reported patch that ended without a hub response.
    pub fn forget_update(&mut self, request_id: &str) {
        self.pending_reported.remove(request_id);
    }

    /// Applies a correlated twin response.
    ///
    /// A successful GET replaces both snapshots and yields deliveries for
    /// every desired key (through the configured style) and every reported
    /// key (generic callback only). A successful reported PATCH merges the
    /// patch sent under `request_id` into the reported snapshot and records
    /// the new version; a failed one discards it.
    pub fn apply_response(
        &mut self,
        kind: TwinResponseKind,
        request_id: &str,
        status: u16,
        version: Option<i64>,
        payload: &[u8],
    ) -> Result<Vec<Delivery>> {
        let patch = match kind {
            TwinResponseKind::UpdateReported => self.pending_reported.remove(request_id),
            TwinResponseKind::Get => None,
        };
        if !(200..300).contains(&status) {
            debug!("twin {kind:?} failed with status {status}");
            return Ok(Vec::new());
        }

        match kind {
            TwinResponseKind::UpdateReported => {
                for property in patch.iter().flatten() {
                    self.reported.upsert(property.clone());
                }
                self.reported.set_version(version);
                Ok(Vec::new())
            }
            TwinResponseKind::Get => {
                let document: Map<String, Value> = serde_json::from_slice(payload)?;
                let side = |name: &str, is_reported: bool| {
                    document
                        .get(name)
                        .and_then(Value::as_object)
                        .map(|m| TwinCollection::from_json(m, is_reported))
                        .unwrap_or_default()
                };
                self.desired = side("desired", false);
                self.reported = side("reported", true);

                let mut deliveries = self.route_desired(&self.desired);
                deliveries.extend(self.route_reported(&self.reported));
                Ok(deliveries)
            }
        }
    }

    /// Applies a desired-property patch; it replaces the desired snapshot.
    ///
    /// The patch body's `$version` wins over the topic's.
    pub fn apply_desired_patch(
        &mut self,
        topic_version: Option<i64>,
        payload: &[u8],
    ) -> Result<Vec<Delivery>> {
        let document: Map<String, Value> = serde_json::from_slice(payload)?;
        let mut patch = TwinCollection::from_json(&document, false);
        if patch.version().is_none() {
            patch.set_version(topic_version);
        }
        let deliveries = self.route_desired(&patch);
        self.desired = patch;
        Ok(deliveries)
    }

    fn route_desired(&self, changed: &TwinCollection) -> Vec<Delivery> {
        if changed.is_empty() {
            return Vec::new();
        }
        match &self.callbacks {
            None => Vec::new(),
            Some(DesiredCallbacks::WholePatch(callback)) => vec![Delivery::Patch {
                callback: callback.clone(),
                patch: changed.clone(),
            }],
            Some(DesiredCallbacks::PerProperty { per_key, generic }) => changed
                .iter()
                .filter_map(|property| {
                    per_key
                        .get(property.key())
                        .or(generic.as_ref())
                        .map(|callback| Delivery::Property {
                            callback: callback.clone(),
                            property: property.clone(),
                        })
                })
                .collect(),
        }
    }

    fn route_reported(&self, reported: &TwinCollection) -> Vec<Delivery> {
        let Some(DesiredCallbacks::PerProperty {
            generic: Some(generic),
            ..
        }) = &self.callbacks
        else {
            return Vec::new();
        };
        reported
            .iter()
            .map(|property| Delivery::Property {
                callback: generic.clone(),
                property: property.clone(),
            })
            .collect()
    }
}
