//! Reading element values back.

use crate::catalog::{ElementKind, ListNaming, Policy, PolicyElement, RegistryValue};
use crate::path;
use crate::storage::PolicySource;

use super::apply::ElementOptions;
use super::{value_matches, ElementValue};

/// Reads the current value of every element that has stored data.
///
/// Elements with nothing stored, or with data of a shape the element never
/// writes, are left out.
#[must_use]
pub fn get_policy_options(source: &dyn PolicySource, policy: &Policy) -> ElementOptions {
    policy
        .elements
        .iter()
        .filter_map(|element| {
            read_element(source, policy, element).map(|value| (element.id.clone(), value))
        })
        .collect()
}

fn read_element(
    source: &dyn PolicySource,
    policy: &Policy,
    element: &PolicyElement,
) -> Option<ElementValue> {
    let key = element.key(policy);

    if let ElementKind::List { naming, .. } = &element.kind {
        return read_list(source, key, naming);
    }
    if let ElementKind::Toggle { off: Some(RegistryValue::Delete), .. } = &element.kind {
        let name = element.value_name();
        if !name.is_empty() && value_matches(source, key, name, &RegistryValue::Delete) {
            return Some(ElementValue::Toggle(false));
        }
    }

    let stored = source.value(key, element.value_name())?;
    match &element.kind {
        ElementKind::Toggle { on, off, .. } => {
            let on = on.clone().unwrap_or(RegistryValue::Number(1));
            let off = off.clone().unwrap_or(RegistryValue::Number(0));
            if on.matches(&stored) {
                Some(ElementValue::Toggle(true))
            } else if off.matches(&stored) {
                Some(ElementValue::Toggle(false))
            } else {
                None
            }
        }
        ElementKind::Numeric { store_as_text, .. } => stored
            .as_number()
            .or_else(|| {
                store_as_text
                    .then(|| stored.as_str().and_then(|s| s.trim().parse().ok()))
                    .flatten()
            })
            .map(ElementValue::Number),
        ElementKind::Text { .. } => stored.as_str().map(|s| ElementValue::Text(s.to_string())),
        ElementKind::Enumeration { choices, .. } => choices
            .iter()
            .position(|c| c.value.matches(&stored))
            .map(ElementValue::Choice),
        ElementKind::MultiText { .. } => stored
            .as_multi_string()
            .map(|items| ElementValue::MultiText(items.to_vec())),
        ElementKind::List { .. } => None,
    }
}

fn read_list(source: &dyn PolicySource, key: &str, naming: &ListNaming) -> Option<ElementValue> {
    let names = source.value_names(key, false);
    if names.is_empty() {
        return None;
    }
    let text = |name: &str| {
        source
            .value(key, name)
            .and_then(|v| v.as_str().map(ToString::to_string))
    };

    match naming {
        ListNaming::Indexed { prefix } => {
            let mut items = Vec::new();
            // Entries are numbered from 1 without gaps; stop at the first hole.
            for index in 1.. {
                let name = format!("{prefix}{index}");
                if !names.iter().any(|n| path::eq_ci(n, &name)) {
                    break;
                }
                items.push(text(&name).unwrap_or_default());
            }
            Some(ElementValue::List(items))
        }
        ListNaming::ValueAsName => Some(ElementValue::List(names)),
        ListNaming::Explicit => Some(ElementValue::Pairs(
            names
                .into_iter()
                .map(|name| {
                    let value = text(&name).unwrap_or_default();
                    (name, value)
                })
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicySection;
    use crate::resolution::{set_policy_state, PolicyState};
    use crate::storage::{PolFile, RegistryTree};
    use crate::value::Value;

    fn list_policy(naming: ListNaming) -> Policy {
        Policy::new("P", PolicySection::User, "K").with_element(PolicyElement {
            id: "L".into(),
            key: Some("K\\L".into()),
            value_name: None,
            kind: ElementKind::List {
                naming,
                additive: false,
                expandable: false,
            },
        })
    }

    #[test]
    fn test_indexed_list_roundtrip() {
        let policy = list_policy(ListNaming::Indexed { prefix: "Item".into() });
        let mut pol = PolFile::new();
        let mut options = ElementOptions::new();
        options.insert("L".into(), ElementValue::List(vec!["x".into(), "y".into()]));
        set_policy_state(&mut pol, &policy, PolicyState::Enabled, &options).unwrap();

        assert_eq!(pol.value_names("K\\L", false), vec!["Item1", "Item2"]);
        assert_eq!(get_policy_options(&pol, &policy), options);
    }

    #[test]
    fn test_explicit_pairs_roundtrip() {
        let policy = list_policy(ListNaming::Explicit);
        let mut tree = RegistryTree::new();
        let mut options = ElementOptions::new();
        options.insert(
            "L".into(),
            ElementValue::Pairs(vec![("site".into(), "1".into()), ("other".into(), "2".into())]),
        );
        set_policy_state(&mut tree, &policy, PolicyState::Enabled, &options).unwrap();
        assert_eq!(get_policy_options(&tree, &policy), options);
    }

    #[test]
    fn test_scalar_elements() {
        let policy = Policy::new("P", PolicySection::Machine, "K")
            .with_element(PolicyElement {
                id: "T".into(),
                key: None,
                value_name: Some("T".into()),
                kind: ElementKind::Toggle {
                    on: None,
                    off: None,
                    on_list: None,
                    off_list: None,
                },
            })
            .with_element(PolicyElement {
                id: "N".into(),
                key: None,
                value_name: Some("N".into()),
                kind: ElementKind::Numeric {
                    min: 0,
                    max: 100,
                    store_as_text: true,
                    qword: false,
                    required: false,
                },
            })
            .with_element(PolicyElement {
                id: "M".into(),
                key: None,
                value_name: Some("M".into()),
                kind: ElementKind::MultiText { max_strings: 0 },
            });

        let mut tree = RegistryTree::new();
        tree.set_value("K", "T", &Value::DWord(0)).unwrap();
        tree.set_value("K", "N", &Value::String(" 42".into())).unwrap();
        tree.set_value("K", "M", &Value::MultiString(vec!["a".into()])).unwrap();

        let got = get_policy_options(&tree, &policy);
        assert_eq!(got.get("T"), Some(&ElementValue::Toggle(false)));
        assert_eq!(got.get("N"), Some(&ElementValue::Number(42)));
        assert_eq!(got.get("M"), Some(&ElementValue::MultiText(vec!["a".into()])));

        tree.set_value("K", "T", &Value::DWord(9)).unwrap();
        assert!(!get_policy_options(&tree, &policy).contains_key("T"));
    }
}
