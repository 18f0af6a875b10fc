//! The policy source abstraction.
//!
//! A policy source stores hierarchical key -> value name -> typed value data.
//! Two backends implement it:
//! - [`PolFile`](crate::storage::PolFile): an ordered record list that
//!   expresses deletes as markers and saves to the binary POL format
//! - [`RegistryTree`](crate::storage::RegistryTree): a live hive where
//!   deletes take effect immediately
//!
//! Adapters for other formats (`.reg` scripts, semantic policy text) are
//! expected to go through this trait only.

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::marker;
use crate::value::{RawValue, Value, ValueKind};

/// The atomic unit of storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Backslash-delimited key path.
    pub key: String,
    /// Value name; empty for a key-presence record.
    pub name: String,
    /// Kind tag and payload.
    pub value: RawValue,
}

impl Record {
    /// A record for `name` under `key`.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>, value: RawValue) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            value,
        }
    }

    /// A record that only asserts the key exists.
    #[must_use]
    pub fn key_presence(key: impl Into<String>) -> Self {
        Self::new(key, "", RawValue::empty())
    }

    /// True when the name is a deletion marker.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        marker::is_marker(&self.name)
    }

    /// True for records with an empty value name.
    #[must_use]
    pub fn is_key_presence(&self) -> bool {
        self.name.is_empty()
    }
}

/// Storage trait for policy data.
///
/// Readers take `&self`; writers take `&mut self`. A source is owned by a
/// single session, so implementations do no internal locking.
pub trait PolicySource: Send + Sync {
    /// Distinct immediate subkey names under `prefix` (empty = root).
    fn key_names(&self, prefix: &str) -> Vec<String>;

    /// Value names directly under `key`, in storage order. Key-presence
    /// records are never listed; markers only when `include_markers` is set.
    fn value_names(&self, key: &str, include_markers: bool) -> Vec<String>;

    /// True when the key exists, either explicitly or through a descendant.
    fn contains_key(&self, key: &str) -> bool;

    /// The stored kind and payload of a value.
    fn raw_value(&self, key: &str, name: &str) -> Option<RawValue>;

    /// True when applying this source would delete `name` from `key`.
    fn will_delete_value(&self, key: &str, name: &str) -> bool;

    /// Every record in storage order, markers included.
    fn records(&self) -> Vec<Record>;

    /// Stores a value, replacing an existing one of the same name in place.
    ///
    /// # Errors
    /// `InvalidKey` if the key path has no segments.
    fn set_raw(&mut self, key: &str, name: &str, value: RawValue) -> Result<(), SourceError>;

    /// Makes the key exist without any values.
    ///
    /// # Errors
    /// `InvalidKey` if the key path has no segments.
    fn create_key(&mut self, key: &str) -> Result<(), SourceError>;

    /// Deletes a value (or records the intent to delete it).
    ///
    /// # Errors
    /// `InvalidKey` if the key path has no segments.
    fn delete_value(&mut self, key: &str, name: &str) -> Result<(), SourceError>;

    /// Deletes everything at or under `key` (or records the intent to).
    ///
    /// # Errors
    /// `InvalidKey` if the key path has no segments.
    fn clear_key(&mut self, key: &str) -> Result<(), SourceError>;

    /// Drops a value and any pending delete marker for it, without
    /// recording a delete.
    ///
    /// # Errors
    /// Backend specific; the bundled backends never fail.
    fn forget_value(&mut self, key: &str, name: &str) -> Result<(), SourceError>;

    /// Drops a pending delete-all marker for `key`, leaving real data alone.
    ///
    /// # Errors
    /// Backend specific; the bundled backends never fail.
    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError>;

    /// True when a real value with this name exists under `key`.
    fn contains_value(&self, key: &str, name: &str) -> bool {
        !marker::is_marker(name) && self.raw_value(key, name).is_some()
    }

    /// The decoded value.
    fn value(&self, key: &str, name: &str) -> Option<Value> {
        self.raw_value(key, name).map(|raw| raw.decode())
    }

    /// The stored kind tag.
    fn value_kind(&self, key: &str, name: &str) -> Option<ValueKind> {
        self.raw_value(key, name).map(|raw| raw.kind)
    }

    /// Stores a typed value.
    ///
    /// # Errors
    /// See [`PolicySource::set_raw`].
    fn set_value(&mut self, key: &str, name: &str, value: &Value) -> Result<(), SourceError> {
        self.set_raw(key, name, value.encode())
    }

    /// Merges this source into `target`, in record order, turning deletion
    /// markers into delete operations instead of copying them.
    ///
    /// # Errors
    /// Propagates the first failing mutation on `target`.
    fn apply(&self, target: &mut dyn PolicySource) -> Result<(), SourceError> {
        for record in self.records() {
            marker::apply_record(&record, target)?;
        }
        Ok(())
    }
}
