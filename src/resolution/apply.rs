//! Writing and forgetting policy state.

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::{ElementKind, ListNaming, Policy, PolicyElement, RegistryValue};
use crate::error::{ElementError, PolError, PolResult, SourceError};
use crate::storage::PolicySource;
use crate::value::Value;

use super::referenced::get_referenced_registry_values;
use super::{write_list, write_registry_value, ElementValue, PolicyState};

/// Element values keyed by element ID.
pub type ElementOptions = BTreeMap<String, ElementValue>;

/// Writes `state` for `policy` into `source`.
///
/// Element IDs in `options` that the policy does not declare are rejected
/// before anything is written, as is an enable that omits a required
/// element. When enabling, elements are written in
/// declaration order; the first element that fails stops the call and the
/// error lists the elements already written, which stay in the source.
///
/// # Errors
/// - `Element` wrapping `UnsupportedElement` or `OutOfRange`
/// - `Source` if the source rejects a write
pub fn set_policy_state(
    source: &mut dyn PolicySource,
    policy: &Policy,
    state: PolicyState,
    options: &ElementOptions,
) -> PolResult<()> {
    if let Some(undeclared) = options.keys().find(|id| policy.element(id).is_none()) {
        return Err(ElementError::UnsupportedElement {
            policy_id: policy.id.clone(),
            element_id: undeclared.clone(),
            reason: "element is not declared by the policy".to_string(),
        }
        .into());
    }
    if state == PolicyState::Enabled {
        if let Some(missing) = policy
            .elements
            .iter()
            .find(|e| e.kind.is_required() && !options.contains_key(&e.id))
        {
            return Err(unsupported(policy, missing, "required element was not supplied").into());
        }
    }

    debug!(policy = %policy.id, %state, elements = options.len(), "setting policy state");
    match state {
        PolicyState::NotConfigured => forget_policy(source, policy)?,
        PolicyState::Disabled => disable(source, policy)?,
        PolicyState::Enabled => enable(source, policy, options)?,
        PolicyState::Unknown => {
            return Err(ElementError::UnsupportedElement {
                policy_id: policy.id.clone(),
                element_id: String::new(),
                reason: "the unknown state cannot be written".to_string(),
            }
            .into())
        }
    }
    Ok(())
}

/// Removes every value and marker the policy could have written, without
/// recording any delete. Calling it twice is the same as calling it once.
///
/// # Errors
/// `Source` if the source rejects a mutation.
pub fn forget_policy(source: &mut dyn PolicySource, policy: &Policy) -> PolResult<()> {
    for location in get_referenced_registry_values(policy) {
        if location.is_whole_key() {
            source.clear_key(&location.key)?;
            source.forget_key_clearance(&location.key)?;
        } else {
            source.forget_value(&location.key, &location.name)?;
        }
    }
    Ok(())
}

fn disable(source: &mut dyn PolicySource, policy: &Policy) -> Result<(), SourceError> {
    let key = policy.registry_key.as_str();
    if let Some(name) = policy.enabling_value() {
        write_registry_value(source, key, name, &policy.affected.off())?;
    }
    write_list(source, key, policy.affected.off_list.as_ref())?;

    for element in &policy.elements {
        let element_key = element.key(policy);
        match element.kind {
            ElementKind::List { .. } => source.clear_key(element_key)?,
            _ if !element.value_name().is_empty() => {
                source.delete_value(element_key, element.value_name())?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn enable(source: &mut dyn PolicySource, policy: &Policy, options: &ElementOptions) -> PolResult<()> {
    let key = policy.registry_key.as_str();
    if let Some(name) = policy.enabling_value() {
        write_registry_value(source, key, name, &policy.affected.on())?;
    }
    write_list(source, key, policy.affected.on_list.as_ref())?;

    let mut applied = Vec::new();
    for element in &policy.elements {
        let Some(value) = options.get(&element.id) else {
            continue;
        };
        match write_element(source, policy, element, value) {
            Ok(()) => applied.push(element.id.clone()),
            Err(ElementWriteError::Element(error)) => {
                return Err(PolError::Element { applied, error });
            }
            Err(ElementWriteError::Source(error)) => return Err(error.into()),
        }
    }
    Ok(())
}

enum ElementWriteError {
    Element(ElementError),
    Source(SourceError),
}

impl From<ElementError> for ElementWriteError {
    fn from(e: ElementError) -> Self {
        Self::Element(e)
    }
}

impl From<SourceError> for ElementWriteError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

fn unsupported(policy: &Policy, element: &PolicyElement, reason: impl Into<String>) -> ElementError {
    ElementError::UnsupportedElement {
        policy_id: policy.id.clone(),
        element_id: element.id.clone(),
        reason: reason.into(),
    }
}

fn mismatch(policy: &Policy, element: &PolicyElement, value: &ElementValue) -> ElementError {
    unsupported(
        policy,
        element,
        format!("a {} element cannot take a {} value", element.kind.name(), value.name()),
    )
}

fn write_element(
    source: &mut dyn PolicySource,
    policy: &Policy,
    element: &PolicyElement,
    value: &ElementValue,
) -> Result<(), ElementWriteError> {
    let key = element.key(policy);
    let name = element.value_name();

    match (&element.kind, value) {
        (ElementKind::Toggle { on, off, on_list, off_list }, ElementValue::Toggle(checked)) => {
            let (sentinel, list) = if *checked {
                (on.clone().unwrap_or(RegistryValue::Number(1)), on_list)
            } else {
                (off.clone().unwrap_or(RegistryValue::Number(0)), off_list)
            };
            if !name.is_empty() {
                write_registry_value(source, key, name, &sentinel)?;
            }
            write_list(source, key, list.as_ref())?;
        }
        (
            ElementKind::Numeric { min, max, store_as_text, qword, .. },
            ElementValue::Number(n),
        ) => {
            let limit = if *qword || *store_as_text {
                *max
            } else {
                (*max).min(u64::from(u32::MAX))
            };
            if *n < *min || *n > limit {
                return Err(ElementError::OutOfRange {
                    policy_id: policy.id.clone(),
                    element_id: element.id.clone(),
                    value: *n,
                    min: *min,
                    max: limit,
                }
                .into());
            }
            let stored = if *store_as_text {
                Value::String(n.to_string())
            } else if *qword {
                Value::QWord(*n)
            } else {
                // Bounded by `limit` above.
                Value::DWord(u32::try_from(*n).unwrap_or(u32::MAX))
            };
            source.set_value(key, name, &stored)?;
        }
        (ElementKind::Text { max_length, expandable, .. }, ElementValue::Text(text)) => {
            let length = text.chars().count();
            if length > *max_length {
                return Err(unsupported(
                    policy,
                    element,
                    format!("text is {length} characters, limit is {max_length}"),
                )
                .into());
            }
            let stored = if *expandable {
                Value::ExpandString(text.clone())
            } else {
                Value::String(text.clone())
            };
            source.set_value(key, name, &stored)?;
        }
        (ElementKind::Enumeration { choices, .. }, ElementValue::Choice(index)) => {
            let Some(choice) = choices.get(*index) else {
                return Err(unsupported(
                    policy,
                    element,
                    format!("choice {index} is not one of {} choices", choices.len()),
                )
                .into());
            };
            write_registry_value(source, key, name, &choice.value)?;
            write_list(source, key, choice.extra.as_ref())?;
        }
        (ElementKind::List { naming, additive, expandable }, value) => {
            let entries: Vec<(String, String)> = match (naming, value) {
                (ListNaming::Indexed { prefix }, ElementValue::List(items)) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (format!("{prefix}{}", i + 1), item.clone()))
                    .collect(),
                (ListNaming::ValueAsName, ElementValue::List(items)) => {
                    items.iter().map(|item| (item.clone(), item.clone())).collect()
                }
                (ListNaming::Explicit, ElementValue::Pairs(pairs)) => pairs.clone(),
                _ => return Err(mismatch(policy, element, value).into()),
            };
            if !*additive {
                source.clear_key(key)?;
            }
            for (entry_name, entry) in entries {
                let stored = if *expandable {
                    Value::ExpandString(entry)
                } else {
                    Value::String(entry)
                };
                source.set_value(key, &entry_name, &stored)?;
            }
        }
        (ElementKind::MultiText { max_strings }, ElementValue::MultiText(items)) => {
            if *max_strings > 0 && items.len() > *max_strings {
                return Err(unsupported(
                    policy,
                    element,
                    format!("{} strings given, limit is {max_strings}", items.len()),
                )
                .into());
            }
            source.set_value(key, name, &Value::MultiString(items.clone()))?;
        }
        (_, value) => return Err(mismatch(policy, element, value).into()),
    }
    Ok(())
}
