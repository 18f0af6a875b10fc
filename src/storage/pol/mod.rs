//! POL file backend.
//!
//! [`PolFile`] keeps an ordered in-memory record list and reads/writes the
//! binary `PReg` format through [`codec`]. Saves are all-or-nothing:
//!
//! ```text
//!   records ──encode──> buffer ──write──> <name>.pol.tmp.<uuid>
//!                                              │ fsync (optional)
//!                                              ↓
//!                                         rename over <name>.pol
//! ```

pub mod codec;
mod file;

pub use file::PolFile;

use serde::{Deserialize, Serialize};

use crate::error::PolError;

/// Configuration for POL load/save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolConfig {
    /// Largest payload accepted for a single record on load (bytes).
    pub max_payload_size: u32,
    /// Whether to fsync the temporary file before renaming it into place.
    pub sync_on_write: bool,
}

impl Default for PolConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PolConfig {
    const MIN_PAYLOAD_SIZE: u32 = 4 * 1024; // 4 KiB, enough for any realistic policy value

    /// Checks the configured bounds.
    ///
    /// # Errors
    /// `Config` when `max_payload_size` is below the minimum.
    pub fn validate(self) -> Result<Self, PolError> {
        if self.max_payload_size < Self::MIN_PAYLOAD_SIZE {
            return Err(PolError::config(format!(
                "max_payload_size must be at least {} bytes (got {})",
                Self::MIN_PAYLOAD_SIZE,
                self.max_payload_size
            )));
        }
        Ok(self)
    }
}
