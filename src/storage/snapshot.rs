//! Clear-then-readd workflow.
//!
//! Rewriting a key from scratch on a marker-aware source must leave the new
//! delete-all marker *ahead* of the surviving values in record order, or the
//! survivors would be wiped when the file is applied. The workflow is three
//! explicit steps:
//!
//! 1. [`snapshot_children`] captures what should survive;
//! 2. the key is cleared (dropping the old clearance first);
//! 3. [`replay_children`] writes the survivors back after the fresh marker.
//!
//! [`reset_key`] runs all three.

use tracing::debug;

use crate::error::SourceError;
use crate::path;
use crate::storage::{PolicySource, Record};

/// Ordered survivors of a key, ready to be replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySnapshot {
    /// The key the snapshot was taken at.
    pub key: String,
    /// Real values at the key, then every record of nested keys, in the
    /// source's order.
    pub records: Vec<Record>,
}

impl KeySnapshot {
    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Captures the real values directly at `key` and every record (markers
/// included) of keys nested under it.
#[must_use]
pub fn snapshot_children(source: &dyn PolicySource, key: &str) -> KeySnapshot {
    let key = path::normalize(key);
    let all = source.records();
    let own = all
        .iter()
        .filter(|r| path::eq_ci(path::normalize(&r.key), key) && !r.is_marker() && !r.name.is_empty());
    let nested = all.iter().filter(|r| {
        path::is_same_or_nested(&r.key, key) && !path::eq_ci(path::normalize(&r.key), key)
    });
    KeySnapshot {
        key: key.to_string(),
        records: own.chain(nested).cloned().collect(),
    }
}

/// Writes a snapshot back in its captured order.
///
/// # Errors
/// Propagates the first failing write.
pub fn replay_children(
    source: &mut dyn PolicySource,
    snapshot: &KeySnapshot,
) -> Result<(), SourceError> {
    for record in &snapshot.records {
        if record.is_key_presence() {
            source.create_key(&record.key)?;
        } else {
            // Markers are copied, not applied: applying would act on new data.
            source.set_raw(&record.key, &record.name, record.value.clone())?;
        }
    }
    Ok(())
}

/// Clears `key` and re-adds the given survivors after a fresh delete-all
/// marker. Pass `None` to keep everything currently under the key.
///
/// # Errors
/// Propagates the first failing mutation.
pub fn reset_key(
    source: &mut dyn PolicySource,
    key: &str,
    survivors: Option<&KeySnapshot>,
) -> Result<(), SourceError> {
    let taken;
    let snapshot = match survivors {
        Some(s) => s,
        None => {
            taken = snapshot_children(source, key);
            &taken
        }
    };
    source.forget_key_clearance(key)?;
    source.clear_key(key)?;
    replay_children(source, snapshot)?;
    debug!(key, survivors = snapshot.len(), "reset key");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PolFile, RegistryTree};
    use crate::value::Value;

    fn names(pol: &PolFile) -> Vec<String> {
        pol.entries()
            .iter()
            .map(|r| format!("{}:{}", r.key, r.name))
            .collect()
    }

    #[test]
    fn test_snapshot_skips_markers_at_the_key() {
        let mut pol = PolFile::new();
        pol.clear_key("K").unwrap();
        pol.set_value("K", "A", &Value::DWord(1)).unwrap();
        pol.delete_value("K", "B").unwrap();
        pol.set_value("K\\Sub", "C", &Value::DWord(2)).unwrap();
        pol.set_value("Other", "D", &Value::DWord(3)).unwrap();

        let snap = snapshot_children(&pol, "k");
        let got: Vec<&str> = snap.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(got, vec!["A", "C"]);
        assert!(snap.records.iter().all(|r| !r.is_marker()));
    }

    #[test]
    fn test_reset_key_puts_marker_before_survivors() {
        let mut pol = PolFile::new();
        pol.set_value("K", "A", &Value::DWord(1)).unwrap();
        pol.clear_key("Elsewhere").unwrap();
        pol.set_value("K", "B", &Value::DWord(2)).unwrap();

        reset_key(&mut pol, "K", None).unwrap();

        assert_eq!(
            names(&pol),
            vec!["Elsewhere:**delvals.", "K:**delvals.", "K:A", "K:B"]
        );
    }

    #[test]
    fn test_reset_key_with_chosen_survivors() {
        let mut pol = PolFile::new();
        pol.set_value("K", "A", &Value::DWord(1)).unwrap();
        pol.set_value("K", "B", &Value::DWord(2)).unwrap();

        let mut keep = snapshot_children(&pol, "K");
        keep.records.retain(|r| r.name == "B");
        reset_key(&mut pol, "K", Some(&keep)).unwrap();

        assert_eq!(names(&pol), vec!["K:**delvals.", "K:B"]);

        let mut live = RegistryTree::new();
        live.set_value("K", "Stale", &Value::DWord(9)).unwrap();
        pol.apply(&mut live).unwrap();
        assert_eq!(live.value_names("K", true), vec!["B"]);
    }

    #[test]
    fn test_reset_key_is_stable_when_repeated() {
        let mut pol = PolFile::new();
        pol.set_value("K", "A", &Value::DWord(1)).unwrap();
        reset_key(&mut pol, "K", None).unwrap();
        let once = pol.clone();
        reset_key(&mut pol, "K", None).unwrap();
        assert_eq!(pol, once);
    }
}
