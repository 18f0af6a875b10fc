//! Cross-scope policy deduplication.
//!
//! Catalogs often define the same setting twice, once per scope. When a
//! Machine-only and a User-only policy in the same category bind the same
//! registry data, they are folded into one `Both` policy, unless their
//! current states disagree.

use tracing::debug;

use crate::catalog::{Policy, PolicyCatalog, PolicySection};
use crate::path;
use crate::resolution::{get_policy_state, PolicyState};
use crate::storage::PolicySource;

/// True when the two policies write exactly the same registry data.
fn same_binding(a: &Policy, b: &Policy) -> bool {
    a.category == b.category
        && path::eq_ci(&a.registry_key, &b.registry_key)
        && match (a.enabling_value(), b.enabling_value()) {
            (Some(x), Some(y)) => path::eq_ci(x, y),
            (None, None) => true,
            _ => false,
        }
        && a.affected == b.affected
        && a.elements == b.elements
}

/// True when the two states cannot be shown as one.
fn states_conflict(machine: PolicyState, user: PolicyState) -> bool {
    match (machine, user) {
        (PolicyState::Unknown, _) | (_, PolicyState::Unknown) => true,
        (PolicyState::NotConfigured, _) | (_, PolicyState::NotConfigured) => false,
        (m, u) => m != u,
    }
}

/// Merges Machine/User policy pairs into single `Both` policies.
///
/// The Machine policy is kept (with its section widened) and the User policy
/// is removed from the catalog. States are read from `machine` and `user`
/// respectively; pairs whose states conflict are left alone. Returns the
/// number of pairs merged, so a second call on the same catalog returns 0.
pub fn deduplicate_policies(
    catalog: &mut PolicyCatalog,
    machine: &dyn PolicySource,
    user: &dyn PolicySource,
) -> usize {
    let mut merges: Vec<(String, String)> = Vec::new();
    for m in catalog
        .policies
        .values()
        .filter(|p| p.section == PolicySection::Machine)
    {
        let partner = catalog.policies.values().find(|u| {
            u.section == PolicySection::User
                && same_binding(m, u)
                && !merges.iter().any(|(_, taken)| *taken == u.id)
        });
        let Some(u) = partner else {
            continue;
        };
        let machine_state = get_policy_state(machine, m);
        let user_state = get_policy_state(user, u);
        if states_conflict(machine_state, user_state) {
            debug!(machine = %m.id, user = %u.id, %machine_state, %user_state, "not merging, states conflict");
            continue;
        }
        merges.push((m.id.clone(), u.id.clone()));
    }

    for (machine_id, user_id) in &merges {
        catalog.remove_policy(user_id);
        if let Some(policy) = catalog.policies.get_mut(machine_id) {
            policy.section = PolicySection::Both;
        }
        debug!(machine = %machine_id, user = %user_id, "merged scoped policies");
    }
    merges.len()
}
