//! Registry key path helpers.
//!
//! Key paths are backslash-delimited, compared case-insensitively and
//! displayed with their original case. Prefix tests work on whole path
//! segments, so `Foo\Bar` is nested under `Foo` but `FooBar` is not.

use std::cmp::Ordering;

/// Path separator for registry keys.
pub const SEPARATOR: char = '\\';

/// Registry branches whose contents are managed policy (as opposed to
/// preferences written outside the policy branches).
pub const POLICY_ROOTS: [&str; 3] = [
    "Software\\Policies",
    "Software\\Microsoft\\Windows\\CurrentVersion\\Policies",
    "System\\CurrentControlSet\\Policies",
];

/// Case-insensitive equality for key paths and value names.
#[must_use]
pub fn eq_ci(a: &str, b: &str) -> bool {
    if a.len() == b.len() && a.eq_ignore_ascii_case(b) {
        return true;
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Case-insensitive ordering, used for stable listings.
#[must_use]
pub fn cmp_ci(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Case-insensitive `starts_with`.
#[must_use]
pub fn starts_with_ci(s: &str, prefix: &str) -> bool {
    let mut chars = s.chars().flat_map(char::to_lowercase);
    prefix
        .chars()
        .flat_map(char::to_lowercase)
        .all(|p| chars.next() == Some(p))
}

/// Folds a path or name to its comparison form.
#[must_use]
pub fn fold(s: &str) -> String {
    s.to_lowercase()
}

/// Trims leading and trailing separators.
#[must_use]
pub fn normalize(key: &str) -> &str {
    key.trim_matches(SEPARATOR)
}

/// Splits a key path into its non-empty segments.
pub fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Joins a parent path and a child segment.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    let parent = normalize(parent);
    let child = normalize(child);
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Returns the parent path, or `None` for a top-level key.
#[must_use]
pub fn parent(key: &str) -> Option<&str> {
    let key = normalize(key);
    key.rfind(SEPARATOR).map(|idx| &key[..idx])
}

/// Returns the last segment of a key path.
#[must_use]
pub fn leaf(key: &str) -> &str {
    let key = normalize(key);
    key.rfind(SEPARATOR).map_or(key, |idx| &key[idx + 1..])
}

/// True when `key` equals `ancestor` or is nested beneath it, comparing whole
/// segments case-insensitively. An empty ancestor contains every key.
#[must_use]
pub fn is_same_or_nested(key: &str, ancestor: &str) -> bool {
    let mut key_segs = segments(key);
    for anc in segments(ancestor) {
        match key_segs.next() {
            Some(seg) if eq_ci(seg, anc) => {}
            _ => return false,
        }
    }
    true
}

/// If `key` is strictly nested under `prefix`, returns the first segment
/// below `prefix` (the immediate child name).
#[must_use]
pub fn child_segment<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let mut key_segs = segments(key);
    for anc in segments(prefix) {
        match key_segs.next() {
            Some(seg) if eq_ci(seg, anc) => {}
            _ => return None,
        }
    }
    key_segs.next()
}

/// True when the key lives under one of the [`POLICY_ROOTS`].
#[must_use]
pub fn is_policy_key(key: &str) -> bool {
    POLICY_ROOTS.iter().any(|root| is_same_or_nested(key, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_ci() {
        assert!(eq_ci("Software\\Policies", "SOFTWARE\\policies"));
        assert!(eq_ci("Ärger", "ärger"));
        assert!(!eq_ci("Foo", "Foo2"));
    }

    #[test]
    fn test_starts_with_ci() {
        assert!(starts_with_ci("**DEL.Value", "**del."));
        assert!(!starts_with_ci("**de", "**del."));
    }

    #[test]
    fn test_nested_is_segment_aware() {
        assert!(is_same_or_nested("A\\B", "A\\B"));
        assert!(is_same_or_nested("a\\b\\c", "A\\B"));
        assert!(!is_same_or_nested("A\\BC", "A\\B"));
        assert!(!is_same_or_nested("A", "A\\B"));
        assert!(is_same_or_nested("anything", ""));
    }

    #[test]
    fn test_child_segment() {
        assert_eq!(child_segment("A\\B\\C", "a"), Some("B"));
        assert_eq!(child_segment("A\\B", ""), Some("A"));
        assert_eq!(child_segment("A", "A"), None);
        assert_eq!(child_segment("AB\\C", "A"), None);
    }

    #[test]
    fn test_join_parent_leaf() {
        assert_eq!(join("", "A"), "A");
        assert_eq!(join("A\\", "\\B"), "A\\B");
        assert_eq!(parent("A\\B\\C"), Some("A\\B"));
        assert_eq!(parent("A"), None);
        assert_eq!(leaf("A\\B\\C"), "C");
        assert_eq!(leaf("A"), "A");
    }

    #[test]
    fn test_policy_roots() {
        assert!(is_policy_key("SOFTWARE\\Policies\\Microsoft\\Edge"));
        assert!(is_policy_key("System\\CurrentControlSet\\Policies"));
        assert!(!is_policy_key("Software\\PoliciesExtra"));
        assert!(!is_policy_key("Software\\Microsoft\\Office"));
    }
}
