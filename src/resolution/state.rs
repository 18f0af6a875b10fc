//! State derivation.

use crate::catalog::{ElementKind, ListNaming, Policy, PolicyElement, RegistryValue};
use crate::storage::PolicySource;
use crate::value::Value;

use super::{list_matches, value_matches, PolicyState};

/// What one element's stored data says about the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evidence {
    Absent,
    Present,
    Deleted,
    /// Present but not in any form the element writes.
    Malformed,
}

/// Derives the effective state of `policy` from `source`.
///
/// The enabling value decides on its own when it is stored. Otherwise the
/// on/off lists and element bindings are weighed: stored values count for
/// enabled, pending deletes for disabled, and a value of the wrong shape
/// makes the state `Unknown`.
#[must_use]
pub fn get_policy_state(source: &dyn PolicySource, policy: &Policy) -> PolicyState {
    let key = policy.registry_key.as_str();

    if let Some(name) = policy.enabling_value() {
        let on = policy.affected.on();
        let off = policy.affected.off();
        if source.contains_value(key, name) {
            return if value_matches(source, key, name, &on) {
                PolicyState::Enabled
            } else if value_matches(source, key, name, &off) {
                PolicyState::Disabled
            } else {
                PolicyState::Unknown
            };
        }
        if off == RegistryValue::Delete && source.will_delete_value(key, name) {
            return PolicyState::Disabled;
        }
    }

    let mut enabled = 0usize;
    let mut disabled = 0usize;
    if let Some(list) = &policy.affected.on_list {
        enabled += usize::from(list_matches(source, key, list));
    }
    if let Some(list) = &policy.affected.off_list {
        disabled += usize::from(list_matches(source, key, list));
    }

    let mut present = 0usize;
    let mut deleted = 0usize;
    for element in &policy.elements {
        match element_evidence(source, policy, element) {
            Evidence::Absent => {}
            Evidence::Present => present += 1,
            Evidence::Deleted => deleted += 1,
            Evidence::Malformed => return PolicyState::Unknown,
        }
    }
    // Element values only exist while enabled; deletes only count when
    // nothing is stored.
    if present > 0 {
        enabled += present;
    } else {
        disabled += deleted;
    }

    match enabled.cmp(&disabled) {
        std::cmp::Ordering::Greater => PolicyState::Enabled,
        std::cmp::Ordering::Less => PolicyState::Disabled,
        std::cmp::Ordering::Equal if enabled == 0 => PolicyState::NotConfigured,
        std::cmp::Ordering::Equal => PolicyState::Unknown,
    }
}

fn element_evidence(source: &dyn PolicySource, policy: &Policy, element: &PolicyElement) -> Evidence {
    let key = element.key(policy);

    if let ElementKind::List { .. } = element.kind {
        return if !source.value_names(key, false).is_empty() {
            Evidence::Present
        } else if source.will_delete_value(key, "") {
            Evidence::Deleted
        } else {
            Evidence::Absent
        };
    }

    let name = element.value_name();
    if name.is_empty() {
        return Evidence::Absent;
    }
    match source.value(key, name) {
        Some(stored) if has_element_shape(&element.kind, &stored) => Evidence::Present,
        Some(_) => Evidence::Malformed,
        None if source.will_delete_value(key, name) => Evidence::Deleted,
        None => Evidence::Absent,
    }
}

/// True when `stored` is a value the element could have written.
pub(super) fn has_element_shape(kind: &ElementKind, stored: &Value) -> bool {
    match kind {
        ElementKind::Toggle { on, off, .. } => {
            let on = on.clone().unwrap_or(RegistryValue::Number(1));
            let off = off.clone().unwrap_or(RegistryValue::Number(0));
            on.matches(stored) || off.matches(stored)
        }
        ElementKind::Numeric { store_as_text, .. } => {
            stored.as_number().is_some()
                || (*store_as_text && stored.as_str().is_some_and(|s| s.trim().parse::<u64>().is_ok()))
        }
        ElementKind::Text { .. } => stored.as_str().is_some(),
        ElementKind::Enumeration { choices, .. } => choices.iter().any(|c| c.value.matches(stored)),
        ElementKind::MultiText { .. } => stored.as_multi_string().is_some(),
        ElementKind::List { naming, .. } => {
            matches!(naming, ListNaming::Explicit) || stored.as_str().is_some()
        }
    }
}
