//! In-memory live registry backend.
//!
//! [`RegistryTree`] behaves like a registry hive: deletes take effect at once
//! and no markers are ever stored. It is the usual target of
//! [`PolicySource::apply`] and a convenient source for converting to POL.

use std::collections::BTreeMap;

use crate::error::SourceError;
use crate::path;
use crate::storage::{PolicySource, Record};
use crate::value::RawValue;

/// Folded path segments; ordering them gives depth-first key order.
type KeyId = Vec<String>;

fn key_id(key: &str) -> KeyId {
    path::segments(key).map(path::fold).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct KeyNode {
    /// Display path, case preserved from first creation.
    name: String,
    /// Values in insertion order.
    values: Vec<(String, RawValue)>,
}

impl KeyNode {
    fn position(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|(n, _)| path::eq_ci(n, name))
    }
}

/// A hierarchical key/value store with immediate deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryTree {
    keys: BTreeMap<KeyId, KeyNode>,
}

impl RegistryTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, intermediate ones included.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// True when no key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Creates `key` and any missing ancestors, returning its id.
    fn ensure_key(&mut self, key: &str) -> Result<KeyId, SourceError> {
        let id = key_id(key);
        if id.is_empty() {
            return Err(SourceError::InvalidKey {
                key: key.to_string(),
            });
        }
        let mut display = String::new();
        for (depth, segment) in path::segments(key).enumerate() {
            display = path::join(&display, segment);
            let node = self.keys.entry(id[..=depth].to_vec()).or_default();
            if node.name.is_empty() {
                node.name.clone_from(&display);
            }
        }
        Ok(id)
    }

    fn node(&self, key: &str) -> Option<&KeyNode> {
        self.keys.get(&key_id(key))
    }

    fn nested(&self, key: &str) -> impl Iterator<Item = (&KeyId, &KeyNode)> {
        let id = key_id(key);
        self.keys
            .range(id.clone()..)
            .take_while(move |(k, _)| k.starts_with(&id))
    }
}

impl PolicySource for RegistryTree {
    fn key_names(&self, prefix: &str) -> Vec<String> {
        let depth = key_id(prefix).len();
        self.nested(prefix)
            .filter(|(k, _)| k.len() == depth + 1)
            .map(|(_, node)| path::leaf(&node.name).to_string())
            .collect()
    }

    fn value_names(&self, key: &str, include_markers: bool) -> Vec<String> {
        self.node(key).map_or_else(Vec::new, |node| {
            node.values
                .iter()
                .filter(|(n, _)| include_markers || !crate::marker::is_marker(n))
                .map(|(n, _)| n.clone())
                .collect()
        })
    }

    fn contains_key(&self, key: &str) -> bool {
        let id = key_id(key);
        id.is_empty() || self.keys.contains_key(&id)
    }

    fn raw_value(&self, key: &str, name: &str) -> Option<RawValue> {
        let node = self.node(key)?;
        node.position(name).map(|idx| node.values[idx].1.clone())
    }

    fn will_delete_value(&self, _key: &str, _name: &str) -> bool {
        false
    }

    fn records(&self) -> Vec<Record> {
        let mut out = Vec::new();
        for (id, node) in &self.keys {
            if node.values.is_empty() {
                // Intermediate keys are implied by their children.
                let has_children = self
                    .keys
                    .range(id.clone()..)
                    .nth(1)
                    .is_some_and(|(k, _)| k.starts_with(id));
                if !has_children {
                    out.push(Record::key_presence(node.name.clone()));
                }
                continue;
            }
            out.extend(
                node.values
                    .iter()
                    .map(|(n, v)| Record::new(node.name.clone(), n.clone(), v.clone())),
            );
        }
        out
    }

    fn set_raw(&mut self, key: &str, name: &str, value: RawValue) -> Result<(), SourceError> {
        let id = self.ensure_key(key)?;
        if name.is_empty() {
            return Ok(());
        }
        let node = self.keys.entry(id).or_default();
        match node.position(name) {
            Some(idx) => node.values[idx].1 = value,
            None => node.values.push((name.to_string(), value)),
        }
        Ok(())
    }

    fn create_key(&mut self, key: &str) -> Result<(), SourceError> {
        self.ensure_key(key).map(|_| ())
    }

    fn delete_value(&mut self, key: &str, name: &str) -> Result<(), SourceError> {
        self.forget_value(key, name)
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        let id = key_id(key);
        if id.is_empty() {
            return Err(SourceError::InvalidKey {
                key: key.to_string(),
            });
        }
        self.keys.retain(|k, _| !k.starts_with(&id));
        Ok(())
    }

    fn forget_value(&mut self, key: &str, name: &str) -> Result<(), SourceError> {
        if let Some(node) = self.keys.get_mut(&key_id(key)) {
            if let Some(idx) = node.position(name) {
                node.values.remove(idx);
            }
        }
        Ok(())
    }

    fn forget_key_clearance(&mut self, _key: &str) -> Result<(), SourceError> {
        Ok(())
    }
}
