//! Twin properties and property collections.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

const VERSION_KEY: &str = "$version";
const METADATA_KEY: &str = "$metadata";
const LAST_UPDATED_KEY: &str = "$lastUpdated";
const LAST_UPDATED_VERSION_KEY: &str = "$lastUpdatedVersion";

/// Checks a property key: non-empty, no space, `$` or `.`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains([' ', '$', '.']) {
        return Err(Error::InvalidPropertyKey(key.to_string()));
    }
    Ok(())
}

/// One desired or reported property with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TwinProperty {
    key: String,
    value: Value,
    version: Option<i64>,
    is_reported: bool,
    last_updated: Option<DateTime<Utc>>,
    last_updated_version: Option<i64>,
}

impl TwinProperty {
    /// Creates a desired-side property.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPropertyKey`] if `key` is empty or contains ' ', '$' or '.'.
    ///
    /// ```rust
    /// use iothub_device::twin::TwinProperty;
    ///
    /// assert!(TwinProperty::new("targetTemperature", 21).is_ok());
    /// assert!(TwinProperty::new("target.temperature", 21).is_err());
    /// ```
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self {
            key,
            value: value.into(),
            version: None,
            is_reported: false,
            last_updated: None,
            last_updated_version: None,
        })
    }

    /// Creates a reported property.
    pub fn reported(key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(Self::new(key, value)?.into_reported())
    }

    pub(crate) fn into_reported(mut self) -> Self {
        self.is_reported = true;
        self
    }

    /// Sets the collection version.
    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    /// Sets the `$metadata` fields.
    pub fn with_metadata(
        mut self,
        last_updated: Option<DateTime<Utc>>,
        last_updated_version: Option<i64>,
    ) -> Self {
        self.last_updated = last_updated;
        self.last_updated_version = last_updated_version;
        self
    }

    /// Property name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Property value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Version of the collection this property was received in.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Belongs to the reported collection.
    pub fn is_reported(&self) -> bool {
        self.is_reported
    }

    /// `$metadata.{key}.$lastUpdated`
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// `$metadata.{key}.$lastUpdatedVersion`
    pub fn last_updated_version(&self) -> Option<i64> {
        self.last_updated_version
    }
}

/// Properties keyed by name plus the collection `$version`.
///
/// Keys are unique and case-sensitive. Iteration is in key order, which
/// keeps serialized patches deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinCollection {
    properties: BTreeMap<String, TwinProperty>,
    version: Option<i64>,
}

impl TwinCollection {
    /// Empty collection without a version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection, rejecting repeated keys.
    pub fn from_properties(properties: impl IntoIterator<Item = TwinProperty>) -> Result<Self> {
        let mut collection = Self::new();
        for property in properties {
            collection.insert(property)?;
        }
        Ok(collection)
    }

    /// Adds a property.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`] if the key is already present.
    pub fn insert(&mut self, property: TwinProperty) -> Result<()> {
        match self.properties.entry(property.key.clone()) {
            Entry::Occupied(entry) => Err(Error::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(property);
                Ok(())
            }
        }
    }

    /// Adds or replaces a property.
    pub fn upsert(&mut self, property: TwinProperty) {
        self.properties.insert(property.key.clone(), property);
    }

    /// Property named `key`.
    pub fn get(&self, key: &str) -> Option<&TwinProperty> {
        self.properties.get(key)
    }

    /// Properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = &TwinProperty> {
        self.properties.values()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// No properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// The collection `$version`.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Replaces the collection `$version`.
    pub fn set_version(&mut self, version: Option<i64>) {
        self.version = version;
    }

    /// `{key: value, ...}` without metadata.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.properties
                .iter()
                .map(|(k, p)| (k.clone(), p.value.clone()))
                .collect(),
        )
    }

    /// Reads one side of a twin document or a desired patch.
    ///
    /// `$version` becomes the collection version and `$metadata` fills each
    /// property's last-updated fields. Other `$` keys are ignored, as are
    /// keys that would fail [`validate_key`].
    pub fn from_json(document: &Map<String, Value>, is_reported: bool) -> Self {
        let version = document.get(VERSION_KEY).and_then(Value::as_i64);
        let metadata = document.get(METADATA_KEY).and_then(Value::as_object);

        let mut collection = Self {
            properties: BTreeMap::new(),
            version,
        };

        for (key, value) in document.iter().filter(|(k, _)| !k.starts_with('$')) {
            let property = match TwinProperty::new(key.as_str(), value.clone()) {
                Ok(property) => property,
                Err(e) => {
                    warn!("skipping twin property: {e}");
                    continue;
                }
            };

            let meta = metadata.and_then(|m| m.get(key)).and_then(Value::as_object);
            let last_updated = meta
                .and_then(|m| m.get(LAST_UPDATED_KEY))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let last_updated_version = meta
                .and_then(|m| m.get(LAST_UPDATED_VERSION_KEY))
                .and_then(Value::as_i64);

            let mut property = property
                .with_version(version)
                .with_metadata(last_updated, last_updated_version);
            property.is_reported = is_reported;
            collection.upsert(property);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a TwinCollection {
    type Item = &'a TwinProperty;
    type IntoIter = std::collections::btree_map::Values<'a, String, TwinProperty>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.values()
    }
}
