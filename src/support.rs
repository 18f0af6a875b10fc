//! Product support filtering.

use crate::catalog::{Policy, PolicyCatalog, SupportDefinition, SupportEntry, SupportLogic};

/// Support definitions may nest; deeper chains are treated as unsupported.
const MAX_SUPPORT_DEPTH: usize = 16;

/// Decides whether `policy` is supported on the `allowed` products.
///
/// A policy with no support definition (or a blank one) is supported iff
/// `match_blank_support`. Otherwise entries combine with any-match when
/// `always_match_any` is set or the definition says `AnyOf`, and with
/// all-match otherwise.
#[must_use]
pub fn is_policy_supported(
    catalog: &PolicyCatalog,
    policy: &Policy,
    allowed: &[String],
    always_match_any: bool,
    match_blank_support: bool,
) -> bool {
    let Some(definition) = policy
        .supported_on
        .as_deref()
        .and_then(|id| catalog.support.get(id))
    else {
        return match_blank_support;
    };
    let checker = SupportCheck {
        catalog,
        allowed,
        always_match_any,
        match_blank_support,
    };
    checker.definition(definition, 0)
}

struct SupportCheck<'a> {
    catalog: &'a PolicyCatalog,
    allowed: &'a [String],
    always_match_any: bool,
    match_blank_support: bool,
}

impl SupportCheck<'_> {
    fn definition(&self, definition: &SupportDefinition, depth: usize) -> bool {
        if depth > MAX_SUPPORT_DEPTH {
            return false;
        }
        if definition.logic == SupportLogic::Blank || definition.entries.is_empty() {
            return self.match_blank_support;
        }
        let mut entries = definition.entries.iter().map(|e| self.entry(e, depth));
        if self.always_match_any || definition.logic == SupportLogic::AnyOf {
            entries.any(|ok| ok)
        } else {
            entries.all(|ok| ok)
        }
    }

    fn entry(&self, entry: &SupportEntry, depth: usize) -> bool {
        if let Some(nested) = self.catalog.support.get(&entry.product) {
            return self.definition(nested, depth + 1);
        }
        if self.allowed.iter().any(|p| *p == entry.product) {
            return true;
        }
        if !entry.is_range {
            return false;
        }
        let min = entry.min_version.unwrap_or(0);
        let max = entry.max_version.unwrap_or(u32::MAX);
        self.allowed.iter().any(|id| {
            self.catalog.products.get(id).is_some_and(|product| {
                product.id != entry.product
                    && self.catalog.product_descends_from(&product.id, &entry.product)
                    && (min..=max).contains(&self.version_under(&product.id, &entry.product))
            })
        })
    }

    /// Version of the child of `ancestor` on the path down to `product`.
    fn version_under(&self, product: &str, ancestor: &str) -> u32 {
        let mut current = product;
        for _ in 0..=self.catalog.products.len() {
            let Some(p) = self.catalog.products.get(current) else {
                break;
            };
            match p.parent.as_deref() {
                Some(parent) if parent == ancestor => return p.version,
                Some(parent) => current = parent,
                None => break,
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PolicySection, Product};

    fn product(id: &str, parent: Option<&str>, version: u32) -> Product {
        Product {
            id: id.into(),
            display_name: String::new(),
            parent: parent.map(Into::into),
            version,
        }
    }

    fn entry(product: &str) -> SupportEntry {
        SupportEntry {
            product: product.into(),
            is_range: false,
            min_version: None,
            max_version: None,
        }
    }

    fn catalog() -> PolicyCatalog {
        let mut catalog = PolicyCatalog::new();
        catalog.add_product(product("Windows", None, 0));
        catalog.add_product(product("Win7", Some("Windows"), 7));
        catalog.add_product(product("Win10", Some("Windows"), 10));
        catalog.add_product(product("Win10_1809", Some("Win10"), 1809));
        catalog.add_product(product("Office", None, 0));
        catalog.add_support(SupportDefinition {
            id: "Both".into(),
            display_name: String::new(),
            logic: SupportLogic::AllOf,
            entries: vec![entry("Win10"), entry("Office")],
        });
        catalog.add_support(SupportDefinition {
            id: "Win8Plus".into(),
            display_name: String::new(),
            logic: SupportLogic::AnyOf,
            entries: vec![SupportEntry {
                product: "Windows".into(),
                is_range: true,
                min_version: Some(8),
                max_version: None,
            }],
        });
        catalog.add_support(SupportDefinition {
            id: "Nested".into(),
            display_name: String::new(),
            logic: SupportLogic::AnyOf,
            entries: vec![entry("Win8Plus")],
        });
        catalog
    }

    fn policy(support: Option<&str>) -> Policy {
        let mut p = Policy::new("P", PolicySection::Machine, "K");
        p.supported_on = support.map(Into::into);
        p
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_blank_support() {
        let catalog = catalog();
        assert!(is_policy_supported(&catalog, &policy(None), &[], false, true));
        assert!(!is_policy_supported(&catalog, &policy(None), &[], false, false));
    }

    #[test]
    fn test_all_of_vs_any_of() {
        let catalog = catalog();
        let p = policy(Some("Both"));
        let win10 = ids(&["Win10"]);
        assert!(!is_policy_supported(&catalog, &p, &win10, false, false));
        assert!(is_policy_supported(&catalog, &p, &win10, true, false));
        assert!(is_policy_supported(&catalog, &p, &ids(&["Win10", "Office"]), false, false));
    }

    #[test]
    fn test_version_range_uses_descendants() {
        let catalog = catalog();
        let p = policy(Some("Win8Plus"));
        assert!(is_policy_supported(&catalog, &p, &ids(&["Win10"]), false, false));
        assert!(is_policy_supported(&catalog, &p, &ids(&["Win10_1809"]), false, false));
        assert!(!is_policy_supported(&catalog, &p, &ids(&["Win7"]), false, false));
        assert!(!is_policy_supported(&catalog, &p, &ids(&["Office"]), false, false));
    }

    #[test]
    fn test_nested_definition() {
        let catalog = catalog();
        let p = policy(Some("Nested"));
        assert!(is_policy_supported(&catalog, &p, &ids(&["Win10"]), false, false));
        assert!(!is_policy_supported(&catalog, &p, &ids(&["Win7"]), false, false));
    }
}
