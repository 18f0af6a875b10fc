//! Policy state resolution.
//!
//! Maps between a catalog [`Policy`](crate::catalog::Policy) and the raw
//! values a [`PolicySource`] holds:
//!
//! - [`get_policy_state`] derives the state from stored data;
//! - [`set_policy_state`] writes a state plus element values;
//! - [`forget_policy`] removes everything the policy could have written;
//! - [`get_policy_options`] reads element values back;
//! - [`get_referenced_registry_values`] lists every location a policy binds.
//!
//! State is never stored on its own; it is recomputed from the source on
//! every call.

mod apply;
mod options;
mod referenced;
mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use apply::{forget_policy, set_policy_state, ElementOptions};
pub use options::get_policy_options;
pub use referenced::{get_referenced_registry_values, RegistryLocation};
pub use state::get_policy_state;

use crate::catalog::{RegistryList, RegistryValue};
use crate::error::SourceError;
use crate::storage::PolicySource;

/// The effective state of a policy in one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// Nothing the policy writes is present.
    NotConfigured,
    /// The stored data matches the enabled form.
    Enabled,
    /// The stored data matches the disabled form.
    Disabled,
    /// The stored data matches neither form.
    Unknown,
}

impl PolicyState {
    /// True for `Enabled` and `Disabled`.
    #[must_use]
    pub const fn is_configured(self) -> bool {
        matches!(self, Self::Enabled | Self::Disabled)
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not configured"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A caller-supplied element value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ElementValue {
    /// Toggle state.
    Toggle(bool),
    /// Numeric value.
    Number(u64),
    /// Text value.
    Text(String),
    /// Index into an enumeration's choices.
    Choice(usize),
    /// Entries of an indexed or value-as-name list.
    List(Vec<String>),
    /// Name/value entries of an explicitly named list.
    Pairs(Vec<(String, String)>),
    /// Strings of a multi-text element.
    MultiText(Vec<String>),
}

impl ElementValue {
    /// Short variant name for messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Toggle(_) => "toggle",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Choice(_) => "choice",
            Self::List(_) => "list",
            Self::Pairs(_) => "pairs",
            Self::MultiText(_) => "multi-text",
        }
    }
}

/// True when the stored data at `(key, name)` is the form `expected` writes.
/// A delete matches a pending delete marker.
pub(crate) fn value_matches(
    source: &dyn PolicySource,
    key: &str,
    name: &str,
    expected: &RegistryValue,
) -> bool {
    match expected {
        RegistryValue::Delete => {
            !source.contains_value(key, name) && source.will_delete_value(key, name)
        }
        _ => source
            .value(key, name)
            .is_some_and(|stored| expected.matches(&stored)),
    }
}

/// True when every item of a non-empty list is in its written form.
pub(crate) fn list_matches(source: &dyn PolicySource, base: &str, list: &RegistryList) -> bool {
    !list.is_empty()
        && list
            .resolve(base)
            .all(|(key, name, value)| value_matches(source, key, name, value))
}

/// Writes one sentinel: a delete marker or a stored value.
pub(crate) fn write_registry_value(
    source: &mut dyn PolicySource,
    key: &str,
    name: &str,
    value: &RegistryValue,
) -> Result<(), SourceError> {
    match value.to_value() {
        Some(v) => source.set_value(key, name, &v),
        None => source.delete_value(key, name),
    }
}

/// Writes every item of a list.
pub(crate) fn write_list(
    source: &mut dyn PolicySource,
    base: &str,
    list: Option<&RegistryList>,
) -> Result<(), SourceError> {
    if let Some(list) = list {
        for (key, name, value) in list.resolve(base) {
            write_registry_value(source, key, name, value)?;
        }
    }
    Ok(())
}
