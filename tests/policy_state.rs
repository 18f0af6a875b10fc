//! End-to-end policy state tests.
//!
//! These tests verify that:
//! - Writing a state and reading it back agrees, on both backends
//! - Forgetting a policy removes every location it references
//! - List elements are rewritten, not merged
//! - A failing element leaves earlier elements applied and says so
//! - Toggles and enumeration choices write and read back their extra values

use regpol::{
    forget_policy, get_policy_options, get_policy_state, get_referenced_registry_values,
    set_policy_state, ElementKind, ElementOptions, ElementValue, EnumChoice, ListNaming, PolFile,
    Policy, PolicyElement, PolicySection, PolicySource, PolicyState, RegistryList,
    RegistrySetting, RegistryTree, RegistryValue, Value,
};

const KEY: &str = "Software\\Policies\\Browser";
const LIST_KEY: &str = "Software\\Policies\\Browser\\Allowed";
const LEVEL_KEY: &str = "Software\\Policies\\Browser\\Level";

fn policy() -> Policy {
    Policy::new("Browser.Allow", PolicySection::User, KEY)
        .with_value("AllowEnabled")
        .with_element(PolicyElement {
            id: "Sites".into(),
            key: Some(LIST_KEY.into()),
            value_name: None,
            kind: ElementKind::List {
                naming: ListNaming::Indexed { prefix: String::new() },
                additive: false,
                expandable: false,
            },
        })
        .with_element(PolicyElement {
            id: "Limit".into(),
            key: None,
            value_name: Some("Limit".into()),
            kind: ElementKind::Numeric {
                min: 1,
                max: 100,
                store_as_text: false,
                qword: false,
                required: false,
            },
        })
}

fn sites(items: &[&str]) -> ElementOptions {
    let mut options = ElementOptions::new();
    options.insert(
        "Sites".into(),
        ElementValue::List(items.iter().map(|s| (*s).to_string()).collect()),
    );
    options
}

fn assert_unreferenced(source: &dyn PolicySource, policy: &Policy) {
    for location in get_referenced_registry_values(policy) {
        if location.is_whole_key() {
            assert!(
                source.value_names(&location.key, true).is_empty(),
                "{location} still has values"
            );
        } else {
            assert!(
                source.raw_value(&location.key, &location.name).is_none(),
                "{location} still present"
            );
            assert!(!source.will_delete_value(&location.key, &location.name), "{location} still marked");
        }
    }
}

#[test]
fn test_enable_then_not_configured_on_pol() {
    let policy = policy();
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &sites(&["a.example", "b.example"])).unwrap();
    assert_eq!(get_policy_state(&pol, &policy), PolicyState::Enabled);

    set_policy_state(&mut pol, &policy, PolicyState::NotConfigured, &ElementOptions::new()).unwrap();
    assert_eq!(get_policy_state(&pol, &policy), PolicyState::NotConfigured);
    assert_unreferenced(&pol, &policy);
    assert!(pol.is_empty(), "left behind: {:?}", pol.records());
}

#[test]
fn test_enable_then_not_configured_on_tree() {
    let policy = policy();
    let mut tree = RegistryTree::new();

    set_policy_state(&mut tree, &policy, PolicyState::Enabled, &sites(&["a.example"])).unwrap();
    assert_eq!(get_policy_state(&tree, &policy), PolicyState::Enabled);

    set_policy_state(&mut tree, &policy, PolicyState::NotConfigured, &ElementOptions::new()).unwrap();
    assert_eq!(get_policy_state(&tree, &policy), PolicyState::NotConfigured);
    assert_unreferenced(&tree, &policy);
}

#[test]
fn test_disable_on_pol_marks_deletes() {
    let policy = policy();
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Disabled, &ElementOptions::new()).unwrap();

    assert_eq!(get_policy_state(&pol, &policy), PolicyState::Disabled);
    assert!(pol.will_delete_value(KEY, "AllowEnabled"));
    assert!(pol.will_delete_value(LIST_KEY, "1"));
    assert!(pol.will_delete_value(KEY, "Limit"));
}

#[test]
fn test_forget_is_idempotent() {
    let policy = policy();
    let mut pol = PolFile::new();
    pol.set_value(KEY, "Unrelated", &Value::DWord(5)).unwrap();
    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &sites(&["a"])).unwrap();

    forget_policy(&mut pol, &policy).unwrap();
    let once = pol.records();
    forget_policy(&mut pol, &policy).unwrap();

    assert_eq!(pol.records(), once);
    assert_eq!(pol.value(KEY, "Unrelated"), Some(Value::DWord(5)));
}

#[test]
fn test_list_rewrite_drops_old_entries() {
    let policy = policy();
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &sites(&["a", "b"])).unwrap();
    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &sites(&["a"])).unwrap();

    assert_eq!(pol.value_names(LIST_KEY, false), vec!["1"]);
    assert_eq!(
        get_policy_options(&pol, &policy).get("Sites"),
        Some(&ElementValue::List(vec!["a".into()]))
    );

    // Applied to a tree that already holds the old list, the rewrite wins.
    let mut tree = RegistryTree::new();
    tree.set_value(LIST_KEY, "1", &Value::String("old".into())).unwrap();
    tree.set_value(LIST_KEY, "2", &Value::String("old".into())).unwrap();
    pol.apply(&mut tree).unwrap();
    assert_eq!(tree.value_names(LIST_KEY, false), vec!["1"]);
    assert_eq!(tree.value(LIST_KEY, "1"), Some(Value::String("a".into())));
}

#[test]
fn test_partial_apply_reports_applied_elements() {
    let policy = policy();
    let mut tree = RegistryTree::new();
    let mut options = sites(&["a"]);
    options.insert("Limit".into(), ElementValue::Number(500));

    let err = set_policy_state(&mut tree, &policy, PolicyState::Enabled, &options).unwrap_err();

    assert!(err.is_element());
    assert_eq!(err.applied_elements(), ["Sites".to_string()]);
    assert_eq!(tree.value(LIST_KEY, "1"), Some(Value::String("a".into())));
    assert!(!tree.contains_value(KEY, "Limit"));
}

#[test]
fn test_unknown_state_is_not_writable() {
    let mut pol = PolFile::new();
    assert!(set_policy_state(&mut pol, &policy(), PolicyState::Unknown, &ElementOptions::new()).is_err());
    assert!(pol.is_empty());
}

fn one(name: &str, value: RegistryValue) -> RegistryList {
    RegistryList {
        default_key: None,
        items: vec![RegistrySetting {
            key: None,
            name: name.into(),
            value,
        }],
    }
}

fn toggle(id: &str, off: Option<RegistryValue>, with_lists: bool) -> PolicyElement {
    PolicyElement {
        id: id.into(),
        key: None,
        value_name: Some(id.into()),
        kind: ElementKind::Toggle {
            on: None,
            off,
            on_list: with_lists.then(|| one("StrictAudit", RegistryValue::Number(1))),
            off_list: with_lists.then(|| one("StrictAudit", RegistryValue::Number(0))),
        },
    }
}

fn toggled(id: &str, checked: bool) -> ElementOptions {
    let mut options = ElementOptions::new();
    options.insert(id.into(), ElementValue::Toggle(checked));
    options
}

#[test]
fn test_toggle_only_policy_round_trip() {
    let policy = Policy::new("Browser.Popups", PolicySection::User, KEY).with_element(toggle("BlockPopups", None, false));
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &toggled("BlockPopups", true)).unwrap();
    assert_eq!(pol.value(KEY, "BlockPopups"), Some(Value::DWord(1)));
    assert_eq!(get_policy_state(&pol, &policy), PolicyState::Enabled);
    assert_eq!(get_policy_options(&pol, &policy), toggled("BlockPopups", true));

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &toggled("BlockPopups", false)).unwrap();
    assert_eq!(pol.value(KEY, "BlockPopups"), Some(Value::DWord(0)));
    assert_eq!(get_policy_state(&pol, &policy), PolicyState::Enabled);
    assert_eq!(get_policy_options(&pol, &policy), toggled("BlockPopups", false));

    set_policy_state(&mut pol, &policy, PolicyState::NotConfigured, &ElementOptions::new()).unwrap();
    assert!(pol.is_empty(), "left behind: {:?}", pol.records());
}

#[test]
fn test_toggle_with_delete_off_value_and_lists() {
    let policy = Policy::new("Browser.Strict", PolicySection::User, KEY)
        .with_value("AllowEnabled")
        .with_element(toggle("Strict", Some(RegistryValue::Delete), true));
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &toggled("Strict", true)).unwrap();
    assert_eq!(pol.value(KEY, "Strict"), Some(Value::DWord(1)));
    assert_eq!(pol.value(KEY, "StrictAudit"), Some(Value::DWord(1)));
    assert_eq!(get_policy_options(&pol, &policy), toggled("Strict", true));

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &toggled("Strict", false)).unwrap();
    assert!(!pol.contains_value(KEY, "Strict"));
    assert!(pol.will_delete_value(KEY, "Strict"));
    assert_eq!(pol.value(KEY, "StrictAudit"), Some(Value::DWord(0)));
    assert_eq!(get_policy_state(&pol, &policy), PolicyState::Enabled);
    assert_eq!(get_policy_options(&pol, &policy), toggled("Strict", false));

    // The pending delete removes a value the live tree already holds.
    let mut tree = RegistryTree::new();
    tree.set_value(KEY, "Strict", &Value::DWord(1)).unwrap();
    pol.apply(&mut tree).unwrap();
    assert!(!tree.contains_value(KEY, "Strict"));
    assert_eq!(tree.value(KEY, "StrictAudit"), Some(Value::DWord(0)));

    set_policy_state(&mut pol, &policy, PolicyState::NotConfigured, &ElementOptions::new()).unwrap();
    assert_unreferenced(&pol, &policy);
    assert!(pol.is_empty(), "left behind: {:?}", pol.records());
}

#[test]
fn test_enumeration_choice_writes_extra_values() {
    let choice = |id: &str, n: u32, mode: &str| EnumChoice {
        id: id.into(),
        display_name: String::new(),
        value: RegistryValue::Number(n),
        extra: Some(one("Mode", RegistryValue::Text(mode.into()))),
    };
    let policy = Policy::new("Browser.Level", PolicySection::User, KEY)
        .with_value("AllowEnabled")
        .with_element(PolicyElement {
            id: "Level".into(),
            key: Some(LEVEL_KEY.into()),
            value_name: Some("Level".into()),
            kind: ElementKind::Enumeration {
                choices: vec![choice("low", 1, "relaxed"), choice("high", 3, "strict")],
                required: false,
            },
        });
    let level = |index| {
        let mut options = ElementOptions::new();
        options.insert("Level".into(), ElementValue::Choice(index));
        options
    };
    let mut pol = PolFile::new();

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &level(0)).unwrap();
    assert_eq!(pol.value(LEVEL_KEY, "Level"), Some(Value::DWord(1)));
    assert_eq!(pol.value(LEVEL_KEY, "Mode"), Some(Value::String("relaxed".into())));
    assert_eq!(get_policy_options(&pol, &policy), level(0));

    set_policy_state(&mut pol, &policy, PolicyState::Enabled, &level(1)).unwrap();
    assert_eq!(pol.value(LEVEL_KEY, "Mode"), Some(Value::String("strict".into())));
    assert_eq!(get_policy_options(&pol, &policy), level(1));

    set_policy_state(&mut pol, &policy, PolicyState::NotConfigured, &ElementOptions::new()).unwrap();
    assert_unreferenced(&pol, &policy);
    assert!(pol.is_empty(), "left behind: {:?}", pol.records());
}
