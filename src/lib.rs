//! # regpol - Registry Policy Sources and Group Policy State
//!
//! regpol reads and writes Windows registry policy data and answers the
//! question every policy editor asks: given a policy definition and a policy
//! source, is the policy enabled, disabled or not configured, and what must
//! be written to change that?
//!
//! ## Core Concepts
//!
//! - **PolicySource**: a store of registry keys and values (a POL file or an
//!   in-memory registry tree)
//! - **POL file**: the `PReg` binary format Group Policy uses on disk,
//!   including the `**del.`/`**delvals.` deletion markers
//! - **PolicyCatalog**: policy definitions with their registry bindings
//! - **Resolution**: reading and writing policy states and element values
//!
//! ## Usage
//!
//! ```rust,ignore
//! use regpol::{get_policy_state, set_policy_state, ElementOptions, PolFile, Policy, PolicySection, PolicyState};
//!
//! let policy = Policy::new("ShowHome", PolicySection::User, "Software\\Policies\\Browser")
//!     .with_value("ShowHomeButton");
//! let mut pol = PolFile::load("User.pol")?;
//!
//! set_policy_state(&mut pol, &policy, PolicyState::Enabled, &ElementOptions::new())?;
//! assert_eq!(get_policy_state(&pol, &policy), PolicyState::Enabled);
//! pol.save("User.pol")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Registry data and storage
pub mod error;
pub mod marker;
pub mod path;
pub mod storage;
pub mod value;

// Policy definitions and resolution
pub mod catalog;
pub mod dedup;
pub mod filter;
pub mod resolution;
pub mod search;
pub mod session;
pub mod support;

pub use catalog::{
    AffectedValues, Category, CatalogItem, ElementKind, EnumChoice, ListNaming, Policy,
    PolicyCatalog, PolicyElement, PolicySection, Product, RegistryList, RegistrySetting,
    RegistryValue, SupportDefinition, SupportEntry, SupportLogic,
};
pub use dedup::deduplicate_policies;
pub use error::{CodecError, ElementError, PolError, PolResult, SourceError, ValueError};
pub use filter::{PolicyFilter, StateFilter};
pub use marker::ValueEntry;
pub use resolution::{
    forget_policy, get_policy_options, get_policy_state, get_referenced_registry_values,
    set_policy_state, ElementOptions, ElementValue, PolicyState, RegistryLocation,
};
pub use search::{
    spawn_search, PolicyMatcher, RegistryMatcher, SearchBatch, SearchConfig, SearchHandle,
    SearchSummary, TextFields, TextMatcher,
};
pub use session::{PolicySession, SessionConfig};
pub use storage::{
    reset_key, snapshot_children, KeySnapshot, PolConfig, PolFile, PolicySource, Record,
    RegistryTree,
};
pub use support::is_policy_supported;
pub use value::{RawValue, Value, ValueKind};
