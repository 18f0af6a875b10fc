//! Error types for regpol.
//!
//! All errors are strongly typed using thiserror. Each layer (codec, source,
//! element resolution, value typing) has its own enum and the top-level
//! [`PolError`] wraps them, so callers can match on the specific failure and
//! always see the offending key, value name, or element ID.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing the binary POL format.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed POL file at byte {offset}: {reason}")]
    MalformedFile {
        offset: usize,
        reason: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CodecError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedFile {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by a policy source while mutating its records.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Value '{name}' already exists under key '{key}'")]
    Collision {
        key: String,
        name: String,
    },

    #[error("Invalid key path: '{key}'")]
    InvalidKey {
        key: String,
    },
}

/// Errors raised while writing element values for a policy.
#[derive(Debug, Error)]
pub enum ElementError {
    #[error("Policy '{policy_id}' cannot accept element '{element_id}': {reason}")]
    UnsupportedElement {
        policy_id: String,
        element_id: String,
        reason: String,
    },

    #[error("Element '{element_id}' of policy '{policy_id}' got {value}, outside [{min}, {max}]")]
    OutOfRange {
        policy_id: String,
        element_id: String,
        value: u64,
        min: u64,
        max: u64,
    },
}

impl ElementError {
    /// Returns the ID of the element that failed.
    #[must_use]
    pub fn element_id(&self) -> &str {
        match self {
            Self::UnsupportedElement { element_id, .. } | Self::OutOfRange { element_id, .. } => {
                element_id
            }
        }
    }
}

/// Strict value decoding failures.
///
/// The lenient decoder never produces these; it degrades to opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Value kind {kind} has no defined decoding")]
    UnknownKind {
        kind: u32,
    },

    #[error("Invalid payload for kind {kind}: {reason}")]
    InvalidPayload {
        kind: u32,
        reason: String,
    },
}

/// Top-level error type for regpol.
#[derive(Debug, Error)]
pub enum PolError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// An element could not be written. Elements listed in `applied` were
    /// already written by the same call and remain in the source.
    #[error("Element error (already applied: [{}]): {error}", applied.join(", "))]
    Element {
        applied: Vec<String>,
        #[source]
        error: ElementError,
    },

    #[error("Policy not found: {id}")]
    PolicyNotFound {
        id: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Search error: {message}")]
    Search {
        message: String,
    },
}

impl From<ElementError> for PolError {
    fn from(error: ElementError) -> Self {
        Self::Element {
            applied: Vec::new(),
            error,
        }
    }
}

impl PolError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error came from the POL codec.
    #[must_use]
    pub const fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Returns true if this is a malformed-file error.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Codec(CodecError::MalformedFile { .. }))
    }

    /// Returns true if this error came from a policy source.
    #[must_use]
    pub const fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Returns true if this error came from element validation.
    #[must_use]
    pub const fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }

    /// Returns the element IDs that were written before the failure.
    #[must_use]
    pub fn applied_elements(&self) -> &[String] {
        match self {
            Self::Element { applied, .. } => applied,
            _ => &[],
        }
    }
}

/// Result type alias for regpol operations.
pub type PolResult<T> = Result<T, PolError>;
