//! Deletion markers.
//!
//! A POL file only stores values, so "delete this on apply" is written as a
//! pseudo-value whose name starts with `**`. Every piece of code that needs to
//! know whether a value name is real data or a control signal goes through
//! [`ValueEntry::classify`]; nothing else inspects the prefix.
//!
//! | Name              | Meaning on apply                                   |
//! |-------------------|----------------------------------------------------|
//! | `**delvals.`      | delete every value of the key                      |
//! | `**del.<name>`    | delete `<name>`                                    |
//! | `**deletevalues`  | delete each `;`-separated name in the payload      |
//! | `**deletekeys`    | delete each `;`-separated subkey in the payload    |
//! | other `**…`       | reserved (e.g. `**securekey`), carried but ignored |

use tracing::debug;

use crate::error::SourceError;
use crate::path::{self, starts_with_ci};
use crate::storage::{PolicySource, Record};
use crate::value::{RawValue, Value};

/// Reserved name prefix shared by every marker.
pub const MARKER_PREFIX: &str = "**";

/// Name of the delete-all-values marker.
pub const DELETE_ALL_VALUES: &str = "**delvals.";

/// Prefix of the single-value delete marker.
pub const DELETE_VALUE_PREFIX: &str = "**del.";

/// Name of the delete-listed-values marker.
pub const DELETE_VALUES: &str = "**deletevalues";

/// Name of the delete-listed-subkeys marker.
pub const DELETE_KEYS: &str = "**deletekeys";

/// The role a value name plays in a marker-aware source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEntry<'a> {
    /// Ordinary data. An empty name marks pure key presence.
    Real(&'a str),
    /// `**delvals.`
    DeleteAllValues,
    /// `**del.<name>`
    DeleteValue(&'a str),
    /// `**deletevalues`; targets are listed in the payload.
    DeleteValues,
    /// `**deletekeys`; targets are listed in the payload.
    DeleteKeys,
    /// Any other `**` name.
    Reserved(&'a str),
}

impl<'a> ValueEntry<'a> {
    /// Classifies a stored value name.
    #[must_use]
    pub fn classify(name: &'a str) -> Self {
        if !name.starts_with(MARKER_PREFIX) {
            return Self::Real(name);
        }
        if path::eq_ci(name, DELETE_VALUES) {
            Self::DeleteValues
        } else if path::eq_ci(name, DELETE_KEYS) {
            Self::DeleteKeys
        } else if starts_with_ci(name, "**delvals") {
            Self::DeleteAllValues
        } else if starts_with_ci(name, DELETE_VALUE_PREFIX) {
            Self::DeleteValue(&name[DELETE_VALUE_PREFIX.len()..])
        } else {
            Self::Reserved(name)
        }
    }

    /// True for anything other than real data.
    #[must_use]
    pub const fn is_marker(&self) -> bool {
        !matches!(self, Self::Real(_))
    }

    /// True when this entry, once applied, removes `value` from its key.
    #[must_use]
    pub fn deletes(&self, value: &str) -> bool {
        match self {
            Self::DeleteAllValues => true,
            Self::DeleteValue(target) => path::eq_ci(target, value),
            _ => false,
        }
    }
}

/// True when the name is a marker rather than real data.
#[must_use]
pub fn is_marker(name: &str) -> bool {
    ValueEntry::classify(name).is_marker()
}

/// Builds the marker name that deletes `value`.
#[must_use]
pub fn delete_value_marker(value: &str) -> String {
    format!("{DELETE_VALUE_PREFIX}{value}")
}

/// Payload written for markers: a single-space `REG_SZ`.
#[must_use]
pub fn marker_payload() -> RawValue {
    Value::String(" ".to_string()).encode()
}

/// Splits a `**deletevalues`/`**deletekeys` payload into its targets.
#[must_use]
pub fn listed_targets(payload: &RawValue) -> Vec<String> {
    match payload.decode() {
        Value::String(list) | Value::ExpandString(list) => list
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Applies one stored record to `target`, turning markers into the delete
/// operations they stand for.
///
/// # Errors
/// Propagates the target's mutation errors.
pub fn apply_record(record: &Record, target: &mut dyn PolicySource) -> Result<(), SourceError> {
    match ValueEntry::classify(&record.name) {
        ValueEntry::Real("") => target.create_key(&record.key),
        ValueEntry::Real(name) => target.set_raw(&record.key, name, record.value.clone()),
        ValueEntry::DeleteValue(name) => target.delete_value(&record.key, name),
        ValueEntry::DeleteAllValues => target.clear_key(&record.key),
        ValueEntry::DeleteValues => {
            for name in listed_targets(&record.value) {
                target.delete_value(&record.key, &name)?;
            }
            Ok(())
        }
        ValueEntry::DeleteKeys => {
            for sub in listed_targets(&record.value) {
                target.clear_key(&path::join(&record.key, &sub))?;
            }
            Ok(())
        }
        ValueEntry::Reserved(name) => {
            debug!(key = %record.key, name, "skipping reserved marker on apply");
            Ok(())
        }
    }
}
