//! Plan computation: diffing desired state against observed state.
//!
//! A plan is derived fresh each pass and never persisted. It lists orphan
//! destroys first (resources recorded in state but no longer declared, in
//! reverse dependency order), then creates and updates in apply order.
//!
//! Only desired attributes are compared. Computed outputs that exist only
//! in observed state, like provider-assigned identifiers, never produce a
//! diff. A desired attribute whose reference cannot resolve yet is known
//! after apply and always forces a change, since convergence cannot be
//! proven for it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::expr::{self, AttrRef, Unresolved};
use crate::graph::DependencyGraph;
use crate::resource::{Attributes, Resource, ResourceRef};
use crate::store::{ObservedState, StateEntry};

/// What a change operation does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Bring a missing resource into existence
    Create,
    /// Change an existing resource in place
    Update,
    /// Remove an existing resource
    Destroy,
    /// Nothing to do; desired and observed already match
    NoOp,
}

impl Action {
    /// Whether this action changes anything remotely.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// One-character plan symbol: `+`, `~`, `-`, or a space.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Destroy => "-",
            Self::NoOp => " ",
        }
    }
}

/// One attribute difference.
///
/// `new` is `None` on a create or update when the value depends on an
/// output that does not exist yet (known after apply). On a destroy the
/// diff lists the observed values being removed and `new` is always
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrDiff {
    /// Attribute name
    pub key: String,
    /// Observed value, absent on create
    pub old: Option<Value>,
    /// Desired value, if already computable
    pub new: Option<Value>,
}

/// Planned operation for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOp {
    /// The resource the operation targets
    pub resource: ResourceRef,
    /// What will be done
    pub action: Action,
    /// Attribute-level differences backing the action
    #[serde(default)]
    pub diff: Vec<AttrDiff>,
}

/// Ordered set of operations for one pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Operations in execution order
    pub ops: Vec<ChangeOp>,
}

impl Plan {
    /// Number of operations that change something.
    pub fn change_count(&self) -> usize {
        self.ops.iter().filter(|op| op.action.is_change()).count()
    }

    /// Whether the plan has no changes at all.
    pub fn is_converged(&self) -> bool {
        self.change_count() == 0
    }

    /// Count operations with a given action.
    pub fn count(&self, action: Action) -> usize {
        self.ops.iter().filter(|op| op.action == action).count()
    }

    /// Operations that change something, in execution order.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeOp> {
        self.ops.iter().filter(|op| op.action.is_change())
    }
}

/// Resolve every reference in an attribute map.
///
/// Fails on the first reference `lookup` cannot supply; planning treats
/// that as known after apply, application treats it as a hard error.
pub fn resolve_attributes<F>(attributes: &Attributes, lookup: &F) -> Result<Attributes, Unresolved>
where
    F: Fn(&AttrRef) -> Option<Value>,
{
    attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), expr::resolve(value, lookup)?)))
        .collect()
}

/// Compute the operation for one declared resource.
pub fn diff_resource<F>(
    resource: &Resource,
    observed: Option<&ObservedState>,
    lookup: &F,
) -> ChangeOp
where
    F: Fn(&AttrRef) -> Option<Value>,
{
    let Some(observed) = observed else {
        // Nothing exists remotely: plan a create listing every desired
        // attribute, unresolved ones as known after apply.
        let diff = resource
            .attributes
            .iter()
            .map(|(key, value)| AttrDiff {
                key: key.clone(),
                old: None,
                new: expr::resolve(value, lookup).ok(),
            })
            .collect();
        return ChangeOp {
            resource: resource.address.clone(),
            action: Action::Create,
            diff,
        };
    };

    let mut diff = Vec::new();
    for (key, value) in &resource.attributes {
        let old = observed.get(key).cloned();
        match expr::resolve(value, lookup) {
            Ok(desired) => {
                if old.as_ref() != Some(&desired) {
                    diff.push(AttrDiff {
                        key: key.clone(),
                        old,
                        new: Some(desired),
                    });
                }
            }
            // Known after apply: convergence cannot be proven.
            Err(Unresolved(_)) => diff.push(AttrDiff {
                key: key.clone(),
                old,
                new: None,
            }),
        }
    }

    let action = if diff.is_empty() {
        Action::NoOp
    } else {
        Action::Update
    };
    ChangeOp {
        resource: resource.address.clone(),
        action,
        diff,
    }
}

fn destroy_op(entry: &StateEntry) -> ChangeOp {
    let diff = entry
        .observed
        .attributes
        .iter()
        .map(|(key, value)| AttrDiff {
            key: key.clone(),
            old: Some(value.clone()),
            new: None,
        })
        .collect();
    ChangeOp {
        resource: entry.resource.clone(),
        action: Action::Destroy,
        diff,
    }
}

/// Order recorded entries for teardown using their recorded dependencies.
///
/// Builds a graph over the entries themselves, so ordering works even for
/// resources that are no longer declared anywhere.
fn recorded_destroy_order(
    entries: &BTreeMap<ResourceRef, StateEntry>,
) -> Result<Vec<ResourceRef>, ConfigError> {
    let synthesized: Vec<Resource> = entries
        .values()
        .map(|entry| {
            let mut resource = Resource::new(&entry.resource.kind, &entry.resource.name);
            resource.depends_on = entry
                .dependencies
                .iter()
                .filter(|dep| entries.contains_key(*dep))
                .cloned()
                .collect();
            resource
        })
        .collect();
    Ok(DependencyGraph::build(&synthesized)?.destroy_order())
}

/// Compute the full plan for a pass.
///
/// `observed` holds the effective remote state per recorded address:
/// `Some(state)` when the resource exists, `None` when it is gone. Declared
/// resources missing from the map have never been applied.
pub fn plan_changes(
    resources: &[Resource],
    graph: &DependencyGraph,
    state: &BTreeMap<ResourceRef, StateEntry>,
    observed: &BTreeMap<ResourceRef, Option<ObservedState>>,
) -> Result<Plan, ConfigError> {
    let declared: BTreeSet<&ResourceRef> = resources.iter().map(|r| &r.address).collect();
    let by_address: BTreeMap<&ResourceRef, &Resource> =
        resources.iter().map(|r| (&r.address, r)).collect();

    let lookup = |attr_ref: &AttrRef| -> Option<Value> {
        observed
            .get(&attr_ref.resource)
            .and_then(|current| current.as_ref())
            .and_then(|current| current.get(&attr_ref.attribute))
            .cloned()
    };

    let mut ops = Vec::new();

    // Orphans first, leaves before their dependencies.
    let orphans: BTreeMap<ResourceRef, StateEntry> = state
        .iter()
        .filter(|(address, _)| !declared.contains(address))
        .map(|(address, entry)| (address.clone(), entry.clone()))
        .collect();
    for address in recorded_destroy_order(&orphans)? {
        ops.push(destroy_op(&orphans[&address]));
    }

    for address in graph.apply_order() {
        let resource = by_address[&address];
        let current = observed.get(&address).and_then(|current| current.as_ref());
        ops.push(diff_resource(resource, current, &lookup));
    }

    Ok(Plan { ops })
}

/// Compute a teardown plan covering every recorded entry.
pub fn plan_destroy(state: &BTreeMap<ResourceRef, StateEntry>) -> Result<Plan, ConfigError> {
    let ops = recorded_destroy_order(state)?
        .into_iter()
        .map(|address| destroy_op(&state[&address]))
        .collect();
    Ok(Plan { ops })
}
