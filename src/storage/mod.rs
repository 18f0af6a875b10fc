//! Policy source backends.
//!
//! [`PolicySource`] is the capability set every backend offers. The POL
//! backend lives in [`pol`]; [`RegistryTree`] is the marker-free live store.

mod memory;
pub mod pol;
mod snapshot;
mod traits;

pub use memory::RegistryTree;
pub use pol::{PolConfig, PolFile};
pub use snapshot::{replay_children, reset_key, snapshot_children, KeySnapshot};
pub use traits::{PolicySource, Record};
