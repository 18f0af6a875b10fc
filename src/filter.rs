//! Policy list filtering.
//!
//! A [`PolicyFilter`] narrows the catalog by management status, current
//! state, presence of a comment and product support. Every criterion is
//! optional; an empty filter keeps everything.

use serde::{Deserialize, Serialize};

use crate::catalog::{Policy, PolicyCatalog};
use crate::path;
use crate::resolution::PolicyState;
use crate::support::is_policy_supported;

/// State criterion of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFilter {
    /// Only not-configured policies.
    NotConfigured,
    /// Enabled, disabled or unknown policies.
    Configured,
    /// Only enabled policies.
    Enabled,
    /// Only disabled policies.
    Disabled,
}

impl StateFilter {
    /// True when `state` passes.
    #[must_use]
    pub const fn accepts(self, state: PolicyState) -> bool {
        match self {
            Self::NotConfigured => matches!(state, PolicyState::NotConfigured),
            Self::Configured => !matches!(state, PolicyState::NotConfigured),
            Self::Enabled => matches!(state, PolicyState::Enabled),
            Self::Disabled => matches!(state, PolicyState::Disabled),
        }
    }
}

/// Criteria for narrowing the policy list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFilter {
    /// Keep only policies whose key is (or is not) under a policy root.
    pub managed: Option<bool>,
    /// Keep only policies in this state.
    pub state: Option<StateFilter>,
    /// Keep only policies with (or without) a comment.
    pub commented: Option<bool>,
    /// Keep only policies supported on these products.
    pub allowed_products: Option<Vec<String>>,
    /// Support entries combine with any-match.
    pub always_match_any: bool,
    /// Policies with no support statement pass the product check.
    pub match_blank_support: bool,
}

impl Default for PolicyFilter {
    fn default() -> Self {
        Self {
            managed: None,
            state: None,
            commented: None,
            allowed_products: None,
            always_match_any: true,
            match_blank_support: true,
        }
    }
}

impl PolicyFilter {
    /// True when no criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managed.is_none()
            && self.state.is_none()
            && self.commented.is_none()
            && self.allowed_products.is_none()
    }

    /// Applies the filter to one policy, given its current state and
    /// whether it carries a comment.
    #[must_use]
    pub fn matches(
        &self,
        catalog: &PolicyCatalog,
        policy: &Policy,
        state: PolicyState,
        commented: bool,
    ) -> bool {
        if let Some(managed) = self.managed {
            if path::is_policy_key(&policy.registry_key) != managed {
                return false;
            }
        }
        if let Some(filter) = self.state {
            if !filter.accepts(state) {
                return false;
            }
        }
        if let Some(want) = self.commented {
            if commented != want {
                return false;
            }
        }
        if let Some(products) = &self.allowed_products {
            return is_policy_supported(
                catalog,
                policy,
                products,
                self.always_match_any,
                self.match_blank_support,
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicySection;

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = PolicyFilter::default();
        let policy = Policy::new("P", PolicySection::User, "Software\\Vendor\\App");
        assert!(filter.is_empty());
        assert!(filter.matches(&PolicyCatalog::new(), &policy, PolicyState::Unknown, false));
    }

    #[test]
    fn test_managed_and_state() {
        let catalog = PolicyCatalog::new();
        let managed = Policy::new("M", PolicySection::Machine, "Software\\Policies\\X");
        let preference = Policy::new("P", PolicySection::Machine, "Software\\Vendor\\X");
        let filter = PolicyFilter {
            managed: Some(true),
            state: Some(StateFilter::Configured),
            ..PolicyFilter::default()
        };

        assert!(filter.matches(&catalog, &managed, PolicyState::Disabled, false));
        assert!(!filter.matches(&catalog, &managed, PolicyState::NotConfigured, false));
        assert!(!filter.matches(&catalog, &preference, PolicyState::Enabled, false));
    }

    #[test]
    fn test_comment_and_support() {
        let catalog = PolicyCatalog::new();
        let policy = Policy::new("P", PolicySection::Machine, "Software\\Policies\\X");
        let filter = PolicyFilter {
            commented: Some(true),
            allowed_products: Some(vec!["Win10".into()]),
            match_blank_support: false,
            ..PolicyFilter::default()
        };
        assert!(!filter.matches(&catalog, &policy, PolicyState::Enabled, false));
        // Blank support is rejected once the comment criterion passes.
        assert!(!filter.matches(&catalog, &policy, PolicyState::Enabled, true));

        let lenient = PolicyFilter {
            match_blank_support: true,
            ..filter
        };
        assert!(lenient.matches(&catalog, &policy, PolicyState::Enabled, true));
    }
}
