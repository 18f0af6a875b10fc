//! In-memory POL record list implementing [`PolicySource`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::{codec, PolConfig};
use crate::error::{CodecError, SourceError};
use crate::marker::{self, ValueEntry};
use crate::path;
use crate::storage::{PolicySource, Record};
use crate::value::RawValue;

/// An ordered list of POL records.
///
/// Record order is insertion order and is preserved by load and save, since
/// it decides the order in which markers and values apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolFile {
    entries: Vec<Record>,
}

fn check_key(key: &str) -> Result<&str, SourceError> {
    let trimmed = path::normalize(key);
    if trimmed.is_empty() {
        return Err(SourceError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(trimmed)
}

impl PolFile {
    /// Creates an empty file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a file from records, in order.
    ///
    /// Markers are kept verbatim. A repeated value (or key-presence record)
    /// drops its earlier copy and keeps the later one at the later position,
    /// so the file applies exactly like the input sequence.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut pol = Self::new();
        for record in records {
            if !record.is_marker() {
                if let Some(idx) = pol.position(&record.key, &record.name) {
                    warn!(
                        key = %record.key,
                        name = %record.name,
                        "duplicate POL record, keeping the later one"
                    );
                    pol.entries.remove(idx);
                }
            }
            pol.entries.push(record);
        }
        pol
    }

    /// Copies every record of another source, markers included.
    #[must_use]
    pub fn from_source(source: &dyn PolicySource) -> Self {
        Self::from_records(source.records())
    }

    /// Parses a POL image.
    ///
    /// # Errors
    /// `MalformedFile` for any header or framing problem.
    pub fn from_bytes(bytes: &[u8], config: &PolConfig) -> Result<Self, CodecError> {
        let records = codec::decode(bytes, config.max_payload_size)?;
        Ok(Self::from_records(records))
    }

    /// Serializes to a POL image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&self.entries)
    }

    /// Loads a file with the default configuration.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `MalformedFile` if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        Self::load_with(path, &PolConfig::default())
    }

    /// Loads a file.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `MalformedFile` if it does not parse.
    pub fn load_with(path: impl AsRef<Path>, config: &PolConfig) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| CodecError::io(path, e))?;
        let pol = Self::from_bytes(&bytes, config)?;
        debug!(path = %path.display(), records = pol.len(), "loaded POL file");
        Ok(pol)
    }

    /// Saves with the default configuration.
    ///
    /// # Errors
    /// `Io` if the temporary file cannot be written or renamed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CodecError> {
        self.save_with(path, &PolConfig::default())
    }

    /// Saves atomically: the image is written to a temporary sibling and
    /// renamed over `path`, so a failed save leaves the old file intact.
    ///
    /// # Errors
    /// `Io` if the temporary file cannot be written or renamed.
    pub fn save_with(&self, path: impl AsRef<Path>, config: &PolConfig) -> Result<(), CodecError> {
        let path = path.as_ref();
        let bytes = self.to_bytes();
        let temp = TempFile::new(path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp.path)
            .map_err(|e| CodecError::io(&temp.path, e))?;
        file.write_all(&bytes)
            .map_err(|e| CodecError::io(&temp.path, e))?;
        if config.sync_on_write {
            file.sync_all().map_err(|e| CodecError::io(&temp.path, e))?;
        }
        drop(file);

        fs::rename(&temp.path, path).map_err(|e| CodecError::io(path, e))?;
        temp.disarm();
        debug!(path = %path.display(), records = self.len(), bytes = bytes.len(), "saved POL file");
        Ok(())
    }

    /// Number of records, markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the file holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The records in order.
    #[must_use]
    pub fn entries(&self) -> &[Record] {
        &self.entries
    }

    /// Inserts a value, failing instead of overwriting.
    ///
    /// # Errors
    /// `Collision` if the key already holds a value of that name,
    /// `InvalidKey` for an empty key path.
    pub fn insert_value(&mut self, key: &str, name: &str, value: RawValue) -> Result<(), SourceError> {
        let key = check_key(key)?;
        if self.position(key, name).is_some() {
            return Err(SourceError::Collision {
                key: key.to_string(),
                name: name.to_string(),
            });
        }
        self.entries.push(Record::new(key, name, value));
        Ok(())
    }

    fn position(&self, key: &str, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| path::eq_ci(&e.key, key) && path::eq_ci(&e.name, name))
    }

    /// Removes every record with this key and name; loaded files may carry
    /// repeated markers.
    fn remove(&mut self, key: &str, name: &str) {
        self.entries
            .retain(|e| !(path::eq_ci(&e.key, key) && path::eq_ci(&e.name, name)));
    }

    fn entries_at<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.entries.iter().filter(move |e| path::eq_ci(&e.key, key))
    }
}

impl PolicySource for PolFile {
    fn key_names(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.entries {
            if let Some(child) = path::child_segment(&entry.key, prefix) {
                if !names.iter().any(|n| path::eq_ci(n, child)) {
                    names.push(child.to_string());
                }
            }
        }
        names
    }

    fn value_names(&self, key: &str, include_markers: bool) -> Vec<String> {
        let key = path::normalize(key);
        self.entries_at(key)
            .filter(|e| !e.name.is_empty())
            .filter(|e| include_markers || !e.is_marker())
            .map(|e| e.name.clone())
            .collect()
    }

    fn contains_key(&self, key: &str) -> bool {
        let key = path::normalize(key);
        key.is_empty() || self.entries.iter().any(|e| path::is_same_or_nested(&e.key, key))
    }

    fn raw_value(&self, key: &str, name: &str) -> Option<RawValue> {
        self.position(path::normalize(key), name)
            .map(|idx| self.entries[idx].value.clone())
    }

    fn will_delete_value(&self, key: &str, name: &str) -> bool {
        let key = path::normalize(key);
        self.entries_at(key).any(|e| {
            let entry = ValueEntry::classify(&e.name);
            entry.deletes(name)
                || (entry == ValueEntry::DeleteValues
                    && marker::listed_targets(&e.value)
                        .iter()
                        .any(|t| path::eq_ci(t, name)))
        })
    }

    fn records(&self) -> Vec<Record> {
        self.entries.clone()
    }

    fn set_raw(&mut self, key: &str, name: &str, value: RawValue) -> Result<(), SourceError> {
        let key = check_key(key)?;
        if let ValueEntry::Real(real) = ValueEntry::classify(name) {
            if !real.is_empty() {
                self.remove(key, &marker::delete_value_marker(real));
            }
        }
        match self.position(key, name) {
            Some(idx) => self.entries[idx].value = value,
            None => self.entries.push(Record::new(key, name, value)),
        }
        Ok(())
    }

    fn create_key(&mut self, key: &str) -> Result<(), SourceError> {
        let key = check_key(key)?;
        if self.position(key, "").is_none() {
            self.entries.push(Record::key_presence(key));
        }
        Ok(())
    }

    fn delete_value(&mut self, key: &str, name: &str) -> Result<(), SourceError> {
        let key = check_key(key)?;
        if marker::is_marker(name) {
            self.remove(key, name);
            return Ok(());
        }
        self.forget_value(key, name)?;
        self.entries.push(Record::new(
            key,
            marker::delete_value_marker(name),
            marker::marker_payload(),
        ));
        Ok(())
    }

    fn clear_key(&mut self, key: &str) -> Result<(), SourceError> {
        let key = check_key(key)?;
        self.entries.retain(|e| !path::is_same_or_nested(&e.key, key));
        self.entries.push(Record::new(
            key,
            marker::DELETE_ALL_VALUES,
            marker::marker_payload(),
        ));
        Ok(())
    }

    fn forget_value(&mut self, key: &str, name: &str) -> Result<(), SourceError> {
        let key = path::normalize(key);
        self.remove(key, name);
        self.remove(key, &marker::delete_value_marker(name));
        Ok(())
    }

    fn forget_key_clearance(&mut self, key: &str) -> Result<(), SourceError> {
        let key = path::normalize(key);
        self.entries.retain(|e| {
            !(path::eq_ci(&e.key, key)
                && ValueEntry::classify(&e.name) == ValueEntry::DeleteAllValues)
        });
        Ok(())
    }
}

/// Temporary sibling of a save target; removed on drop unless disarmed.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(target: &Path) -> Self {
        let file_name = target
            .file_name()
            .map_or_else(|| "policy".into(), |n| n.to_string_lossy().into_owned());
        let path = target.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4()));
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        // Best-effort cleanup of temp file if not renamed
        if self.armed && self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueKind};
    use tempfile::tempdir;

    fn dword(v: u32) -> RawValue {
        Value::DWord(v).encode()
    }

    #[test]
    fn test_set_value_replaces_in_place() {
        let mut pol = PolFile::new();
        pol.set_raw("K", "A", dword(1)).unwrap();
        pol.set_raw("K", "B", dword(2)).unwrap();
        pol.set_raw("k", "a", dword(3)).unwrap();

        let names: Vec<&str> = pol.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(pol.value("K", "A"), Some(Value::DWord(3)));
    }

    #[test]
    fn test_insert_value_rejects_collision() {
        let mut pol = PolFile::new();
        pol.insert_value("K", "A", dword(1)).unwrap();
        let err = pol.insert_value("k", "a", dword(2)).unwrap_err();
        assert!(matches!(err, SourceError::Collision { .. }));
        pol.insert_value("Other", "A", dword(2)).unwrap();
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let mut pol = PolFile::new();
        let err = pol.set_raw("\\", "A", dword(1)).unwrap_err();
        assert!(matches!(err, SourceError::InvalidKey { .. }));
    }

    #[test]
    fn test_delete_value_writes_marker() {
        let mut pol = PolFile::new();
        pol.set_raw("K", "A", dword(1)).unwrap();
        pol.delete_value("K", "A").unwrap();

        assert!(pol.value("K", "A").is_none());
        assert!(pol.will_delete_value("K", "a"));
        assert_eq!(pol.value_names("K", false), Vec::<String>::new());
        assert_eq!(pol.value_names("K", true), vec!["**del.A"]);
    }

    #[test]
    fn test_set_value_cancels_pending_delete() {
        let mut pol = PolFile::new();
        pol.delete_value("K", "A").unwrap();
        pol.set_raw("K", "A", dword(1)).unwrap();
        assert!(!pol.will_delete_value("K", "A"));
        assert_eq!(pol.len(), 1);
    }

    #[test]
    fn test_clear_key_is_segment_aware() {
        let mut pol = PolFile::new();
        pol.set_raw("A\\B", "X", dword(1)).unwrap();
        pol.set_raw("A\\B\\C", "Y", dword(2)).unwrap();
        pol.set_raw("A\\BC", "Z", dword(3)).unwrap();
        pol.clear_key("a\\b").unwrap();

        assert!(pol.value_names("A\\B", false).is_empty());
        assert!(pol.value_names("A\\B\\C", true).is_empty());
        assert_eq!(pol.value("A\\BC", "Z"), Some(Value::DWord(3)));
        assert!(pol.will_delete_value("A\\B", "anything"));
    }

    #[test]
    fn test_forget_key_clearance_keeps_values() {
        let mut pol = PolFile::new();
        pol.clear_key("K").unwrap();
        pol.set_raw("K", "A", dword(1)).unwrap();
        pol.forget_key_clearance("K").unwrap();

        assert_eq!(pol.value_names("K", true), vec!["A"]);
        assert!(!pol.will_delete_value("K", "B"));
    }

    #[test]
    fn test_forget_value_removes_value_and_marker() {
        let mut pol = PolFile::new();
        pol.delete_value("K", "A").unwrap();
        pol.set_raw("K", "B", dword(1)).unwrap();
        pol.forget_value("K", "A").unwrap();
        pol.forget_value("K", "B").unwrap();
        assert!(pol.is_empty());
    }

    #[test]
    fn test_key_names_distinct_and_case_preserving() {
        let mut pol = PolFile::new();
        pol.set_raw("Root\\Alpha", "A", dword(1)).unwrap();
        pol.set_raw("root\\ALPHA\\Deep", "B", dword(1)).unwrap();
        pol.set_raw("Root\\Beta", "C", dword(1)).unwrap();
        pol.set_raw("RootX", "D", dword(1)).unwrap();

        assert_eq!(pol.key_names("Root"), vec!["Alpha", "Beta"]);
        assert_eq!(pol.key_names(""), vec!["Root", "RootX"]);
        assert!(pol.contains_key("ROOT\\alpha\\deep"));
        assert!(!pol.contains_key("Root\\Gamma"));
    }

    #[test]
    fn test_create_key_presence_only() {
        let mut pol = PolFile::new();
        pol.create_key("Empty\\Leaf").unwrap();
        pol.create_key("empty\\leaf").unwrap();
        assert_eq!(pol.len(), 1);
        assert!(pol.contains_key("Empty\\Leaf"));
        assert!(pol.value_names("Empty\\Leaf", true).is_empty());
    }

    #[test]
    fn test_deletevalues_marker_lists_targets() {
        let mut pol = PolFile::new();
        pol.set_value("K", marker::DELETE_VALUES, &Value::String("A;B".into()))
            .unwrap();
        assert!(pol.will_delete_value("K", "b"));
        assert!(!pol.will_delete_value("K", "C"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Registry.pol");

        let mut pol = PolFile::new();
        pol.set_value("Software\\Policies\\X", "Enable", &Value::DWord(1))
            .unwrap();
        pol.set_raw("Software\\Policies\\X", "Odd", RawValue::new(ValueKind::Other(99), vec![1, 2]))
            .unwrap();
        pol.delete_value("Software\\Policies\\X", "Old").unwrap();
        pol.clear_key("Software\\Policies\\Y").unwrap();
        pol.save(&path).unwrap();

        let loaded = PolFile::load(&path).unwrap();
        assert_eq!(loaded, pol);
        assert_eq!(std::fs::read(&path).unwrap(), pol.to_bytes());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Registry.pol");
        PolFile::new().save(&path).unwrap();
        PolFile::new().save(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Registry.pol");
        let mut pol = PolFile::new();
        pol.set_value("K", "A", &Value::DWord(1)).unwrap();
        pol.save(&path).unwrap();

        // Renaming a file over a directory fails, so point at one.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        assert!(PolFile::new().save(&blocked).is_err());

        assert_eq!(PolFile::load(&path).unwrap(), pol);
        assert!(blocked.is_dir());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = PolFile::load(dir.path().join("absent.pol")).unwrap_err();
        assert!(matches!(err, CodecError::Io { .. }));
    }

    #[test]
    fn test_from_records_keeps_later_duplicate_in_file_order() {
        let pol = PolFile::from_records(vec![
            Record::new("K", "A", dword(1)),
            Record::new("K", "B", dword(2)),
            Record::new("k", "a", dword(3)),
        ]);
        assert_eq!(pol.len(), 2);
        assert_eq!(pol.value("K", "A"), Some(Value::DWord(3)));
        assert_eq!(pol.value_names("K", false), vec!["B", "a"]);
    }

    #[test]
    fn test_repeated_markers_load_verbatim_and_apply_in_file_order() {
        let records = vec![
            Record::new("K", marker::DELETE_ALL_VALUES, marker::marker_payload()),
            Record::new("K", "A", dword(1)),
            Record::new("K", marker::DELETE_ALL_VALUES, marker::marker_payload()),
            Record::new("K", "B", dword(2)),
        ];
        let bytes = codec::encode(&records);
        let loaded = PolFile::from_bytes(&bytes, &PolConfig::default()).unwrap();

        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.to_bytes(), bytes);

        let mut direct = crate::storage::RegistryTree::new();
        for record in &records {
            marker::apply_record(record, &mut direct).unwrap();
        }
        let mut via_file = crate::storage::RegistryTree::new();
        loaded.apply(&mut via_file).unwrap();

        assert_eq!(via_file.value_names("K", false), vec!["B"]);
        assert_eq!(via_file, direct);
    }

    #[test]
    fn test_value_repeated_across_clear_survives_apply() {
        let pol = PolFile::from_records(vec![
            Record::new("K", "A", dword(1)),
            Record::new("K", marker::DELETE_ALL_VALUES, marker::marker_payload()),
            Record::new("K", "A", dword(2)),
        ]);
        let mut tree = crate::storage::RegistryTree::new();
        pol.apply(&mut tree).unwrap();
        assert_eq!(tree.value("K", "A"), Some(Value::DWord(2)));
    }

    #[test]
    fn test_forget_value_drops_repeated_markers() {
        let mut pol = PolFile::from_records(vec![
            Record::new("K", "**del.A", marker::marker_payload()),
            Record::new("K", "**del.A", marker::marker_payload()),
        ]);
        assert_eq!(pol.len(), 2);
        pol.forget_value("K", "A").unwrap();
        assert!(pol.is_empty());
    }
}
