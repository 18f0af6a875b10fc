//! Static registry footprint of a policy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{ElementKind, Policy, RegistryList};
use crate::path;

/// A key/value location a policy can write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryLocation {
    /// Key path.
    pub key: String,
    /// Value name; empty when the whole key is bound (list elements).
    pub name: String,
}

impl RegistryLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }

    /// True when every value under the key belongs to the policy.
    #[must_use]
    pub fn is_whole_key(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for RegistryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole_key() {
            write!(f, "{}\\*", self.key)
        } else {
            write!(f, "{}!{}", self.key, self.name)
        }
    }
}

#[derive(Default)]
struct Locations(Vec<RegistryLocation>);

impl Locations {
    fn push(&mut self, key: &str, name: &str) {
        let seen = self
            .0
            .iter()
            .any(|l| path::eq_ci(&l.key, key) && path::eq_ci(&l.name, name));
        if !seen {
            self.0.push(RegistryLocation::new(key, name));
        }
    }

    fn push_list(&mut self, base: &str, list: Option<&RegistryList>) {
        if let Some(list) = list {
            for (key, name, _) in list.resolve(base) {
                self.push(key, name);
            }
        }
    }
}

/// Every location `policy` can write, regardless of current state: the
/// enabling value, the on/off lists, each element binding, and the extra
/// lists of toggles and enumeration choices. List elements contribute their
/// whole key. Duplicates are dropped, first occurrence wins.
#[must_use]
pub fn get_referenced_registry_values(policy: &Policy) -> Vec<RegistryLocation> {
    let key = policy.registry_key.as_str();
    let mut out = Locations::default();

    if let Some(name) = policy.enabling_value() {
        out.push(key, name);
    }
    out.push_list(key, policy.affected.on_list.as_ref());
    out.push_list(key, policy.affected.off_list.as_ref());

    for element in &policy.elements {
        let element_key = element.key(policy);
        match &element.kind {
            ElementKind::List { .. } => out.push(element_key, ""),
            kind => {
                if !element.value_name().is_empty() {
                    out.push(element_key, element.value_name());
                }
                match kind {
                    ElementKind::Toggle { on_list, off_list, .. } => {
                        out.push_list(element_key, on_list.as_ref());
                        out.push_list(element_key, off_list.as_ref());
                    }
                    ElementKind::Enumeration { choices, .. } => {
                        for choice in choices {
                            out.push_list(element_key, choice.extra.as_ref());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    out.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        EnumChoice, ListNaming, PolicyElement, PolicySection, RegistrySetting, RegistryValue,
    };

    #[test]
    fn test_referenced_values() {
        let extra = RegistryList {
            default_key: Some("Extra".into()),
            items: vec![RegistrySetting {
                key: None,
                name: "E".into(),
                value: RegistryValue::Number(1),
            }],
        };
        let policy = Policy::new("P", PolicySection::Machine, "K")
            .with_value("Enable")
            .with_element(PolicyElement {
                id: "L".into(),
                key: Some("K\\List".into()),
                value_name: None,
                kind: ElementKind::List {
                    naming: ListNaming::ValueAsName,
                    additive: false,
                    expandable: false,
                },
            })
            .with_element(PolicyElement {
                id: "Again".into(),
                key: None,
                value_name: Some("ENABLE".into()),
                kind: ElementKind::Enumeration {
                    choices: vec![EnumChoice {
                        id: "x".into(),
                        display_name: String::new(),
                        value: RegistryValue::Number(0),
                        extra: Some(extra),
                    }],
                    required: false,
                },
            });

        let got: Vec<String> = get_referenced_registry_values(&policy)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(got, vec!["K!Enable", "K\\List\\*", "Extra!E"]);
    }
}
