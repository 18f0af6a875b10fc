//! Per-policy search predicates.

use std::collections::BTreeMap;

use regex::Regex;

use crate::catalog::Policy;
use crate::error::{PolError, PolResult};
use crate::path;
use crate::resolution::get_referenced_registry_values;

/// A predicate evaluated once per policy by the search worker.
///
/// An `Err` counts as a failed evaluation; the search goes on.
pub trait PolicyMatcher: Send {
    /// True when `policy` is a hit.
    ///
    /// # Errors
    /// Implementation specific.
    fn matches(&self, policy: &Policy) -> PolResult<bool>;
}

impl<F> PolicyMatcher for F
where
    F: Fn(&Policy) -> PolResult<bool> + Send,
{
    fn matches(&self, policy: &Policy) -> PolResult<bool> {
        self(policy)
    }
}

fn search_error(message: impl Into<String>) -> PolError {
    PolError::Search {
        message: message.into(),
    }
}

/// Compiles a `*`/`?` wildcard into an anchored regex over folded text.
fn wildcard(pattern: &str) -> PolResult<Regex> {
    let body = regex::escape(&path::fold(pattern))
        .replace("\\*", ".*")
        .replace("\\?", ".");
    Regex::new(&format!("^{body}$")).map_err(|e| search_error(format!("invalid pattern '{pattern}': {e}")))
}

fn has_wildcard(s: &str) -> bool {
    s.contains(|c: char| c == '*' || c == '?')
}

#[derive(Debug)]
enum KeyPattern {
    Any,
    /// `*`/`?` pattern over the whole key path.
    Wildcard(Regex),
    /// Contains a separator: key must start with it.
    Root(String),
    /// A bare word: one path segment must equal it.
    Segment(String),
}

/// Matches policies by the registry locations they reference.
#[derive(Debug)]
pub struct RegistryMatcher {
    key: KeyPattern,
    value: Option<Regex>,
}

const HIVE_PREFIXES: [&str; 4] = [
    "HKLM\\",
    "HKCU\\",
    "HKEY_LOCAL_MACHINE\\",
    "HKEY_CURRENT_USER\\",
];

impl RegistryMatcher {
    /// Builds a matcher from a key term and a value-name term; either may be
    /// empty but not both. Value names always match as wildcards.
    ///
    /// # Errors
    /// `Search` when both terms are empty, when the key names a hive (the
    /// hive follows from the policy section), or when a pattern is invalid.
    pub fn new(key: &str, value: &str) -> PolResult<Self> {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() && value.is_empty() {
            return Err(search_error("no search terms given"));
        }
        if HIVE_PREFIXES.iter().any(|hive| path::starts_with_ci(key, hive)) {
            return Err(search_error(
                "policy root keys follow from their section; remove the hive from the key",
            ));
        }

        let key = if key.is_empty() {
            KeyPattern::Any
        } else if has_wildcard(key) {
            KeyPattern::Wildcard(wildcard(key)?)
        } else if key.contains(path::SEPARATOR) {
            KeyPattern::Root(key.to_string())
        } else {
            KeyPattern::Segment(key.to_string())
        };
        let value = if value.is_empty() {
            None
        } else {
            Some(wildcard(value)?)
        };
        Ok(Self { key, value })
    }

    fn key_matches(&self, key: &str) -> bool {
        match &self.key {
            KeyPattern::Any => true,
            KeyPattern::Wildcard(re) => re.is_match(&path::fold(key)),
            KeyPattern::Root(root) => path::starts_with_ci(key, root),
            KeyPattern::Segment(seg) => path::segments(key).any(|s| path::eq_ci(s, seg)),
        }
    }
}

impl PolicyMatcher for RegistryMatcher {
    fn matches(&self, policy: &Policy) -> PolResult<bool> {
        Ok(get_referenced_registry_values(policy).iter().any(|loc| {
            self.value
                .as_ref()
                .map_or(true, |re| re.is_match(&path::fold(&loc.name)))
                && self.key_matches(&loc.key)
        }))
    }
}

/// Which policy texts a [`TextMatcher`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFields {
    /// The display name.
    pub title: bool,
    /// The explanation.
    pub description: bool,
    /// User comments.
    pub comments: bool,
}

impl Default for TextFields {
    fn default() -> Self {
        Self {
            title: true,
            description: true,
            comments: false,
        }
    }
}

/// Matches policies by words in their texts.
///
/// Plain words must all appear as whole words, `*`/`?` words must each
/// match some word, and `"quoted phrases"` must appear as a phrase.
#[derive(Debug)]
pub struct TextMatcher {
    words: Vec<String>,
    wildcards: Vec<Regex>,
    phrases: Vec<String>,
    fields: TextFields,
    comments: Vec<BTreeMap<String, String>>,
}

const PUNCTUATION: &str = ".,'\";/!(){}[]";

fn clean(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !PUNCTUATION.contains(*c))
        .collect()
}

impl TextMatcher {
    /// Parses a query. `comments` are the comment tables (policy ID to
    /// comment) consulted when `fields.comments` is set.
    ///
    /// # Errors
    /// `Search` when the query is empty, no field is selected, or a
    /// wildcard does not compile.
    pub fn new(
        query: &str,
        fields: TextFields,
        comments: Vec<BTreeMap<String, String>>,
    ) -> PolResult<Self> {
        if query.trim().is_empty() {
            return Err(search_error("no search terms given"));
        }
        if !(fields.title || fields.description || fields.comments) {
            return Err(search_error("at least one field must be searched"));
        }

        let mut words = Vec::new();
        let mut wildcards = Vec::new();
        let mut phrases = Vec::new();
        let mut partial: Option<String> = None;
        for token in query.split_whitespace() {
            if let Some(mut phrase) = partial.take() {
                phrase.push(' ');
                phrase.push_str(token);
                if token.ends_with('"') {
                    phrases.push(clean(&phrase));
                } else {
                    partial = Some(phrase);
                }
            } else if token.starts_with('"') {
                if token.len() > 1 && token.ends_with('"') {
                    phrases.push(clean(token));
                } else {
                    partial = Some(token.to_string());
                }
            } else if has_wildcard(token) {
                wildcards.push(wildcard(&clean(token))?);
            } else {
                words.push(clean(token));
            }
        }
        // An unterminated quote still counts as a phrase.
        if let Some(phrase) = partial {
            phrases.push(clean(&phrase));
        }

        Ok(Self {
            words,
            wildcards,
            phrases,
            fields,
            comments,
        })
    }

    fn is_hit(&self, text: &str) -> bool {
        let text = clean(text);
        let in_text: Vec<&str> = text.split_whitespace().collect();
        self.words.iter().all(|w| in_text.contains(&w.as_str()))
            && self
                .wildcards
                .iter()
                .all(|re| in_text.iter().any(|w| re.is_match(w)))
            && self.phrases.iter().all(|p| {
                text == *p
                    || text.starts_with(&format!("{p} "))
                    || text.ends_with(&format!(" {p}"))
                    || text.contains(&format!(" {p} "))
            })
    }
}

impl PolicyMatcher for TextMatcher {
    fn matches(&self, policy: &Policy) -> PolResult<bool> {
        if self.fields.title && self.is_hit(&policy.display_name) {
            return Ok(true);
        }
        if self.fields.description && self.is_hit(&policy.explanation) {
            return Ok(true);
        }
        if self.fields.comments {
            return Ok(self
                .comments
                .iter()
                .filter_map(|table| table.get(&policy.id))
                .any(|comment| self.is_hit(comment)));
        }
        Ok(false)
    }
}
