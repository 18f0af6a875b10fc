//! Session context.
//!
//! [`PolicySession`] is the single owner of everything a policy editor works
//! on: the catalog, the Machine and User sources, and the per-section comment
//! tables. Components receive it (or the parts they need) explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Policy, PolicyCatalog, PolicySection};
use crate::dedup::deduplicate_policies;
use crate::error::{CodecError, PolError, PolResult};
use crate::filter::PolicyFilter;
use crate::resolution::{
    get_policy_options, get_policy_state, set_policy_state, ElementOptions, PolicyState,
};
use crate::search::{spawn_search, PolicyMatcher, SearchConfig, SearchHandle, TextFields, TextMatcher};
use crate::storage::{PolConfig, PolFile, PolicySource};

/// Session configuration, loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Catalog JSON produced by the definition loader.
    pub catalog_path: Option<PathBuf>,
    /// Machine POL file.
    pub machine_pol: Option<PathBuf>,
    /// User POL file.
    pub user_pol: Option<PathBuf>,
    /// POL load/save settings.
    pub pol: PolConfig,
    /// Background search settings.
    pub search: SearchConfig,
}

impl SessionConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    /// `Config` if the JSON is invalid or a bound is out of range.
    pub fn from_json(json: &str) -> PolResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PolError::config(format!("invalid session config: {e}")))?;
        config.validate()
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    /// `Codec(Io)` if the file cannot be read, `Config` if it is invalid.
    pub fn load(path: impl AsRef<Path>) -> PolResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Checks bounds.
    ///
    /// # Errors
    /// `Config` when a bound is out of range.
    pub fn validate(self) -> PolResult<Self> {
        let pol = self.pol.clone().validate()?;
        if self.search.batch_size == 0 {
            return Err(PolError::config("search.batch_size must be at least 1"));
        }
        Ok(Self { pol, ..self })
    }
}

/// One scope's source, its backing file and its comments.
struct Scope {
    source: Box<dyn PolicySource>,
    path: Option<PathBuf>,
    comments: BTreeMap<String, String>,
}

impl Scope {
    fn new(source: Box<dyn PolicySource>, path: Option<PathBuf>) -> Self {
        Self {
            source,
            path,
            comments: BTreeMap::new(),
        }
    }
}

/// Open catalog, sources and comments.
pub struct PolicySession {
    config: SessionConfig,
    catalog: Arc<PolicyCatalog>,
    machine: Scope,
    user: Scope,
}

impl std::fmt::Debug for PolicySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySession")
            .field("policies", &self.catalog.policies.len())
            .field("machine_pol", &self.machine.path)
            .field("user_pol", &self.user.path)
            .finish_non_exhaustive()
    }
}

fn load_or_empty(path: &Path, config: &PolConfig) -> PolResult<PolFile> {
    if path.exists() {
        Ok(PolFile::load_with(path, config)?)
    } else {
        debug!(path = %path.display(), "POL file missing, starting empty");
        Ok(PolFile::new())
    }
}

impl PolicySession {
    /// A session over in-memory sources with no backing files.
    #[must_use]
    pub fn new(catalog: PolicyCatalog) -> Self {
        Self::with_sources(catalog, Box::new(PolFile::new()), Box::new(PolFile::new()))
    }

    /// A session over the given sources.
    #[must_use]
    pub fn with_sources(
        catalog: PolicyCatalog,
        machine: Box<dyn PolicySource>,
        user: Box<dyn PolicySource>,
    ) -> Self {
        Self {
            config: SessionConfig::default(),
            catalog: Arc::new(catalog),
            machine: Scope::new(machine, None),
            user: Scope::new(user, None),
        }
    }

    /// Opens the catalog and POL files named by `config`. Missing POL files
    /// start empty and are created on save.
    ///
    /// # Errors
    /// `Config` for an invalid configuration or catalog, `Codec` when a POL
    /// file cannot be read.
    pub fn open(config: SessionConfig) -> PolResult<Self> {
        let config = config.validate()?;
        let catalog = match &config.catalog_path {
            Some(path) => {
                let json = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
                PolicyCatalog::from_json(&json)?
            }
            None => PolicyCatalog::new(),
        };
        let open = |path: &Option<PathBuf>| -> PolResult<Scope> {
            let source = match path {
                Some(p) => load_or_empty(p, &config.pol)?,
                None => PolFile::new(),
            };
            Ok(Scope::new(Box::new(source), path.clone()))
        };
        let machine = open(&config.machine_pol)?;
        let user = open(&config.user_pol)?;
        info!(
            policies = catalog.policies.len(),
            machine_records = machine.source.records().len(),
            user_records = user.source.records().len(),
            "opened policy session"
        );
        Ok(Self {
            catalog: Arc::new(catalog),
            machine,
            user,
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    fn scope(&self, section: PolicySection) -> PolResult<&Scope> {
        match section {
            PolicySection::Machine => Ok(&self.machine),
            PolicySection::User => Ok(&self.user),
            PolicySection::Both => Err(PolError::config("pick the machine or user section")),
        }
    }

    fn scope_mut(&mut self, section: PolicySection) -> PolResult<&mut Scope> {
        match section {
            PolicySection::Machine => Ok(&mut self.machine),
            PolicySection::User => Ok(&mut self.user),
            PolicySection::Both => Err(PolError::config("pick the machine or user section")),
        }
    }

    /// The source for `section`.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn source(&self, section: PolicySection) -> PolResult<&dyn PolicySource> {
        Ok(self.scope(section)?.source.as_ref())
    }

    /// The mutable source for `section`.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn source_mut(&mut self, section: PolicySection) -> PolResult<&mut dyn PolicySource> {
        Ok(self.scope_mut(section)?.source.as_mut())
    }

    /// Replaces the source for `section`, detaching it from its file unless
    /// `path` is given.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn replace_source(
        &mut self,
        section: PolicySection,
        source: Box<dyn PolicySource>,
        path: Option<PathBuf>,
    ) -> PolResult<()> {
        let scope = self.scope_mut(section)?;
        scope.source = source;
        scope.path = path;
        Ok(())
    }

    fn scoped_policy(&self, id: &str, section: PolicySection) -> PolResult<&Policy> {
        let policy = self.catalog.require_policy(id)?;
        let fits = match section {
            PolicySection::Machine => policy.section.includes_machine(),
            PolicySection::User => policy.section.includes_user(),
            PolicySection::Both => false,
        };
        if !fits {
            return Err(PolError::config(format!(
                "policy '{id}' does not apply to the {section} section"
            )));
        }
        Ok(policy)
    }

    /// Current state of a policy in one section.
    ///
    /// # Errors
    /// `PolicyNotFound`, or `Config` when the policy does not apply to
    /// `section`.
    pub fn policy_state(&self, id: &str, section: PolicySection) -> PolResult<PolicyState> {
        let policy = self.scoped_policy(id, section)?;
        Ok(get_policy_state(self.scope(section)?.source.as_ref(), policy))
    }

    /// Current element values of a policy in one section.
    ///
    /// # Errors
    /// As for [`PolicySession::policy_state`].
    pub fn policy_options(&self, id: &str, section: PolicySection) -> PolResult<ElementOptions> {
        let policy = self.scoped_policy(id, section)?;
        Ok(get_policy_options(self.scope(section)?.source.as_ref(), policy))
    }

    /// Writes a policy state into one section.
    ///
    /// # Errors
    /// As for [`PolicySession::policy_state`], plus the errors of
    /// [`set_policy_state`].
    pub fn set_policy_state(
        &mut self,
        id: &str,
        section: PolicySection,
        state: PolicyState,
        options: &ElementOptions,
    ) -> PolResult<()> {
        let catalog = Arc::clone(&self.catalog);
        self.scoped_policy(id, section)?;
        let policy = catalog.require_policy(id)?;
        set_policy_state(self.scope_mut(section)?.source.as_mut(), policy, state, options)
    }

    /// Merges Machine/User duplicates in the catalog; see
    /// [`deduplicate_policies`].
    pub fn deduplicate(&mut self) -> usize {
        let catalog = Arc::make_mut(&mut self.catalog);
        let merged = deduplicate_policies(
            catalog,
            self.machine.source.as_ref(),
            self.user.source.as_ref(),
        );
        info!(merged, "deduplicated policies");
        merged
    }

    /// The comment on a policy in one section.
    #[must_use]
    pub fn comment(&self, section: PolicySection, id: &str) -> Option<&str> {
        self.scope(section)
            .ok()
            .and_then(|s| s.comments.get(id))
            .map(String::as_str)
    }

    /// Sets or, with an empty text, removes a comment.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn set_comment(&mut self, section: PolicySection, id: &str, text: &str) -> PolResult<()> {
        let comments = &mut self.scope_mut(section)?.comments;
        if text.trim().is_empty() {
            comments.remove(id);
        } else {
            comments.insert(id.to_string(), text.to_string());
        }
        Ok(())
    }

    /// The comment table of one section.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn comments(&self, section: PolicySection) -> PolResult<&BTreeMap<String, String>> {
        Ok(&self.scope(section)?.comments)
    }

    /// Policies of `section` that pass `filter`, in ID order.
    ///
    /// # Errors
    /// `Config` for `Both`.
    pub fn filtered_policies(
        &self,
        filter: &PolicyFilter,
        section: PolicySection,
    ) -> PolResult<Vec<&Policy>> {
        let scope = self.scope(section)?;
        let in_section = |p: &&Policy| match section {
            PolicySection::Machine => p.section.includes_machine(),
            _ => p.section.includes_user(),
        };
        Ok(self
            .catalog
            .policies
            .values()
            .filter(in_section)
            .filter(|p| {
                let state = if filter.state.is_some() {
                    get_policy_state(scope.source.as_ref(), p)
                } else {
                    PolicyState::NotConfigured
                };
                let commented = scope.comments.contains_key(&p.id);
                filter.matches(&self.catalog, p, state, commented)
            })
            .collect())
    }

    /// Starts a background search with `matcher`.
    ///
    /// # Errors
    /// `Search` if the worker cannot start.
    pub fn search(&self, matcher: Box<dyn PolicyMatcher>) -> PolResult<SearchHandle> {
        spawn_search(Arc::clone(&self.catalog), matcher, &self.config.search)
    }

    /// Builds a text matcher that sees both sections' comments.
    ///
    /// # Errors
    /// As for [`TextMatcher::new`].
    pub fn text_matcher(&self, query: &str, fields: TextFields) -> PolResult<TextMatcher> {
        TextMatcher::new(
            query,
            fields,
            vec![self.machine.comments.clone(), self.user.comments.clone()],
        )
    }

    /// Writes each source that has a backing file.
    ///
    /// # Errors
    /// `Codec` if a save fails; earlier saves stay on disk.
    pub fn save(&self) -> PolResult<()> {
        for scope in [&self.machine, &self.user] {
            if let Some(path) = &scope.path {
                PolFile::from_source(scope.source.as_ref()).save_with(path, &self.config.pol)?;
                info!(path = %path.display(), "saved policy source");
            }
        }
        Ok(())
    }
}
