//! Policy catalog model.
//!
//! The catalog is produced by an external ADMX/ADML loader and consumed here
//! as plain data: policies with their registry bindings and typed elements,
//! plus the category, product and support-definition tables used for
//! grouping and support filtering. It loads from JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PolError, PolResult};
use crate::value::Value;

/// The scope a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySection {
    /// Computer configuration.
    Machine,
    /// User configuration.
    User,
    /// Both scopes.
    Both,
}

impl PolicySection {
    /// True for `Machine` and `Both`.
    #[must_use]
    pub const fn includes_machine(self) -> bool {
        matches!(self, Self::Machine | Self::Both)
    }

    /// True for `User` and `Both`.
    #[must_use]
    pub const fn includes_user(self) -> bool {
        matches!(self, Self::User | Self::Both)
    }
}

impl fmt::Display for PolicySection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine => write!(f, "machine"),
            Self::User => write!(f, "user"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// A value a policy writes to express a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryValue {
    /// Delete the value.
    Delete,
    /// A DWORD.
    Number(u32),
    /// A `REG_SZ`.
    Text(String),
}

impl RegistryValue {
    /// The value to store, or `None` for a delete.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Delete => None,
            Self::Number(n) => Some(Value::DWord(*n)),
            Self::Text(s) => Some(Value::String(s.clone())),
        }
    }

    /// True when a stored value equals this one, kind tag included: a
    /// numeric sentinel only matches a DWORD and text only a plain string.
    #[must_use]
    pub fn matches(&self, stored: &Value) -> bool {
        match (self, stored) {
            (Self::Number(n), Value::DWord(v)) => n == v,
            (Self::Text(s), Value::String(v)) => s == v,
            _ => false,
        }
    }
}

/// One value written as part of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySetting {
    /// Key override; the list's default key otherwise.
    #[serde(default)]
    pub key: Option<String>,
    /// Value name.
    pub name: String,
    /// What to write.
    pub value: RegistryValue,
}

/// A group of values written together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryList {
    /// Key used by items without their own override.
    #[serde(default)]
    pub default_key: Option<String>,
    /// Items in write order.
    #[serde(default)]
    pub items: Vec<RegistrySetting>,
}

impl RegistryList {
    /// Resolves every item to `(key, name, value)`, falling back from the
    /// item key to the list key to `base`.
    pub fn resolve<'a>(
        &'a self,
        base: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str, &'a RegistryValue)> + 'a {
        let list_key = self.default_key.as_deref().unwrap_or(base);
        self.items.iter().map(move |item| {
            (
                item.key.as_deref().unwrap_or(list_key),
                item.name.as_str(),
                &item.value,
            )
        })
    }

    /// True when the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Values written when a policy or toggle is switched on or off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedValues {
    /// Written to the enabling value on enable (DWORD 1 when unset).
    #[serde(default)]
    pub on_value: Option<RegistryValue>,
    /// Written to the enabling value on disable (delete when unset).
    #[serde(default)]
    pub off_value: Option<RegistryValue>,
    /// Extra values written on enable.
    #[serde(default)]
    pub on_list: Option<RegistryList>,
    /// Extra values written on disable.
    #[serde(default)]
    pub off_list: Option<RegistryList>,
}

impl AffectedValues {
    /// The effective on value.
    #[must_use]
    pub fn on(&self) -> RegistryValue {
        self.on_value.clone().unwrap_or(RegistryValue::Number(1))
    }

    /// The effective off value.
    #[must_use]
    pub fn off(&self) -> RegistryValue {
        self.off_value.clone().unwrap_or(RegistryValue::Delete)
    }
}

/// How list entries are named under the list key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ListNaming {
    /// `<prefix>1`, `<prefix>2`, ... in entry order.
    Indexed {
        /// Name prefix, possibly empty.
        #[serde(default)]
        prefix: String,
    },
    /// The caller supplies name/value pairs.
    Explicit,
    /// Each entry is stored under its own text as the name.
    ValueAsName,
}

/// One choice of an enumeration element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumChoice {
    /// Choice identifier.
    pub id: String,
    /// Label for display.
    #[serde(default)]
    pub display_name: String,
    /// Stored value when selected.
    pub value: RegistryValue,
    /// Extra values written when selected.
    #[serde(default)]
    pub extra: Option<RegistryList>,
}

fn default_numeric_max() -> u64 {
    u64::from(u32::MAX)
}

fn default_text_length() -> usize {
    1023
}

/// Element kind and its kind-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// A checkbox.
    Toggle {
        /// Written when checked (DWORD 1 when unset).
        #[serde(default)]
        on: Option<RegistryValue>,
        /// Written when unchecked (DWORD 0 when unset).
        #[serde(default)]
        off: Option<RegistryValue>,
        /// Extra values written when checked.
        #[serde(default)]
        on_list: Option<RegistryList>,
        /// Extra values written when unchecked.
        #[serde(default)]
        off_list: Option<RegistryList>,
    },
    /// A bounded unsigned number.
    Numeric {
        /// Inclusive lower bound.
        #[serde(default)]
        min: u64,
        /// Inclusive upper bound.
        #[serde(default = "default_numeric_max")]
        max: u64,
        /// Store the decimal text as `REG_SZ` instead of a number.
        #[serde(default)]
        store_as_text: bool,
        /// Store as QWORD.
        #[serde(default)]
        qword: bool,
        /// Must be supplied when enabling.
        #[serde(default)]
        required: bool,
    },
    /// A single string.
    Text {
        /// Maximum length in characters.
        #[serde(default = "default_text_length")]
        max_length: usize,
        /// Store as `REG_EXPAND_SZ`.
        #[serde(default)]
        expandable: bool,
        /// Must be supplied when enabling.
        #[serde(default)]
        required: bool,
    },
    /// A fixed set of choices.
    Enumeration {
        /// Choices in display order.
        choices: Vec<EnumChoice>,
        /// Must be supplied when enabling.
        #[serde(default)]
        required: bool,
    },
    /// Entries stored as values of a dedicated subkey.
    List {
        /// How entries are named.
        naming: ListNaming,
        /// Keep existing entries instead of clearing the key first.
        #[serde(default)]
        additive: bool,
        /// Store entries as `REG_EXPAND_SZ`.
        #[serde(default)]
        expandable: bool,
    },
    /// Several strings in one `REG_MULTI_SZ`.
    MultiText {
        /// Maximum number of strings; zero means unlimited.
        #[serde(default)]
        max_strings: usize,
    },
}

impl ElementKind {
    /// Short kind name for messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Toggle { .. } => "toggle",
            Self::Numeric { .. } => "numeric",
            Self::Text { .. } => "text",
            Self::Enumeration { .. } => "enumeration",
            Self::List { .. } => "list",
            Self::MultiText { .. } => "multi-text",
        }
    }

    /// True when the element must be supplied on enable.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        match self {
            Self::Numeric { required, .. }
            | Self::Text { required, .. }
            | Self::Enumeration { required, .. } => *required,
            _ => false,
        }
    }
}

/// One typed parameter of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElement {
    /// Identifier, unique within the policy.
    pub id: String,
    /// Key override; the policy key otherwise.
    #[serde(default)]
    pub key: Option<String>,
    /// Bound value name. Lists bind a whole key and leave this unset.
    #[serde(default)]
    pub value_name: Option<String>,
    /// Kind and settings.
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl PolicyElement {
    /// The key this element writes under.
    #[must_use]
    pub fn key<'a>(&'a self, policy: &'a Policy) -> &'a str {
        self.key.as_deref().unwrap_or(&policy.registry_key)
    }

    /// The bound value name, empty for lists.
    #[must_use]
    pub fn value_name(&self) -> &str {
        self.value_name.as_deref().unwrap_or_default()
    }
}

/// A configurable setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable unique ID.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub display_name: String,
    /// Long description.
    #[serde(default)]
    pub explanation: String,
    /// Owning category.
    #[serde(default)]
    pub category: Option<String>,
    /// Scope.
    pub section: PolicySection,
    /// Key path relative to the hive.
    pub registry_key: String,
    /// The enabling value, if the policy has one.
    #[serde(default)]
    pub registry_value: Option<String>,
    /// On/off values and lists.
    #[serde(default)]
    pub affected: AffectedValues,
    /// Elements in presentation order.
    #[serde(default)]
    pub elements: Vec<PolicyElement>,
    /// Support definition ID.
    #[serde(default)]
    pub supported_on: Option<String>,
}

impl Policy {
    /// Creates a policy with no elements.
    #[must_use]
    pub fn new(id: impl Into<String>, section: PolicySection, registry_key: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            explanation: String::new(),
            category: None,
            section,
            registry_key: registry_key.into(),
            registry_value: None,
            affected: AffectedValues::default(),
            elements: Vec::new(),
            supported_on: None,
        }
    }

    /// Sets the enabling value name.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>) -> Self {
        self.registry_value = Some(name.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Appends an element.
    #[must_use]
    pub fn with_element(mut self, element: PolicyElement) -> Self {
        self.elements.push(element);
        self
    }

    /// The enabling value name, when set and non-empty.
    #[must_use]
    pub fn enabling_value(&self) -> Option<&str> {
        self.registry_value.as_deref().filter(|v| !v.is_empty())
    }

    /// Looks up an element by ID.
    #[must_use]
    pub fn element(&self, id: &str) -> Option<&PolicyElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}

/// A node of the category tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique ID.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub display_name: String,
    /// Parent category.
    #[serde(default)]
    pub parent: Option<String>,
}

/// A product or product version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Unique ID.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub display_name: String,
    /// Parent product (major version under product, minor under major).
    #[serde(default)]
    pub parent: Option<String>,
    /// Version number within the parent.
    #[serde(default)]
    pub version: u32,
}

/// How the entries of a support definition combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportLogic {
    /// Every entry must match.
    #[default]
    AllOf,
    /// One matching entry suffices.
    AnyOf,
    /// No requirement stated.
    Blank,
}

/// One requirement of a support definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportEntry {
    /// Product ID, or the ID of another support definition.
    pub product: String,
    /// Whether `min_version`/`max_version` bound the product's children.
    #[serde(default)]
    pub is_range: bool,
    /// Lowest accepted child version.
    #[serde(default)]
    pub min_version: Option<u32>,
    /// Highest accepted child version.
    #[serde(default)]
    pub max_version: Option<u32>,
}

/// A named "supported on" statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportDefinition {
    /// Unique ID.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub display_name: String,
    /// How entries combine.
    #[serde(default)]
    pub logic: SupportLogic,
    /// Requirements.
    #[serde(default)]
    pub entries: Vec<SupportEntry>,
}

/// A catalog item found by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogItem<'a> {
    /// A category.
    Category(&'a Category),
    /// A product.
    Product(&'a Product),
    /// A support definition.
    Support(&'a SupportDefinition),
    /// A policy, with the section picked by an `@C`/`@U` suffix.
    Policy(&'a Policy, PolicySection),
}

/// All definitions known to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCatalog {
    /// Policies by ID.
    #[serde(default)]
    pub policies: BTreeMap<String, Policy>,
    /// Categories by ID.
    #[serde(default)]
    pub categories: BTreeMap<String, Category>,
    /// Products by ID.
    #[serde(default)]
    pub products: BTreeMap<String, Product>,
    /// Support definitions by ID.
    #[serde(default)]
    pub support: BTreeMap<String, SupportDefinition>,
}

impl PolicyCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from JSON.
    ///
    /// # Errors
    /// `Config` if the document does not parse.
    pub fn from_json(json: &str) -> PolResult<Self> {
        serde_json::from_str(json).map_err(|e| PolError::config(format!("invalid catalog JSON: {e}")))
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    /// `Config` if serialization fails.
    pub fn to_json(&self) -> PolResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PolError::config(format!("catalog serialization failed: {e}")))
    }

    /// Adds or replaces a policy.
    pub fn add_policy(&mut self, policy: Policy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    /// Removes a policy, returning it.
    pub fn remove_policy(&mut self, id: &str) -> Option<Policy> {
        self.policies.remove(id)
    }

    /// Looks up a policy.
    #[must_use]
    pub fn policy(&self, id: &str) -> Option<&Policy> {
        self.policies.get(id)
    }

    /// Looks up a policy or fails with `PolicyNotFound`.
    ///
    /// # Errors
    /// `PolicyNotFound` when the ID is unknown.
    pub fn require_policy(&self, id: &str) -> PolResult<&Policy> {
        self.policy(id).ok_or_else(|| PolError::PolicyNotFound { id: id.to_string() })
    }

    /// Adds or replaces a category.
    pub fn add_category(&mut self, category: Category) {
        self.categories.insert(category.id.clone(), category);
    }

    /// Adds or replaces a product.
    pub fn add_product(&mut self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    /// Adds or replaces a support definition.
    pub fn add_support(&mut self, support: SupportDefinition) {
        self.support.insert(support.id.clone(), support);
    }

    /// Policies whose category is `category`, in ID order.
    pub fn policies_in<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Policy> + 'a {
        self.policies
            .values()
            .filter(move |p| p.category.as_deref() == Some(category))
    }

    /// True when `product` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn product_descends_from(&self, product: &str, ancestor: &str) -> bool {
        let mut current = Some(product);
        // Parent chains are shallow; the bound only stops malformed cycles.
        for _ in 0..=self.products.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.products.get(id).and_then(|p| p.parent.as_deref()),
                None => return false,
            }
        }
        false
    }

    /// Resolves an ID typed by a user: categories, products, support
    /// definitions, then policies. A policy ID may carry an `@C` or `@U`
    /// suffix to pick the machine or user section.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<CatalogItem<'_>> {
        let id = id.trim();
        if let Some(c) = self.categories.get(id) {
            return Some(CatalogItem::Category(c));
        }
        if let Some(p) = self.products.get(id) {
            return Some(CatalogItem::Product(p));
        }
        if let Some(s) = self.support.get(id) {
            return Some(CatalogItem::Support(s));
        }
        let (policy_id, section) = match id.split_once('@') {
            Some((p, "C")) => (p, PolicySection::Machine),
            Some((p, "U")) => (p, PolicySection::User),
            Some((p, _)) => (p, PolicySection::Both),
            None => (id, PolicySection::Both),
        };
        self.policies
            .get(policy_id)
            .map(|p| CatalogItem::Policy(p, section))
    }
}
