//! Dependency graph construction and ordering.
//!
//! Edges come from two places: explicit `depends_on` entries and implicit
//! attribute references. Both mean the same thing to the planner: the
//! referenced resource is applied first and destroyed last.
//!
//! Ordering is deterministic. Kahn's algorithm runs over the petgraph
//! structure with the ready set drained in declaration order, so the same
//! configuration always plans in the same sequence. petgraph's own
//! `toposort` is not used for ordering because it does not honor that
//! tie-break; it would still be a valid order, just not a stable one.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ConfigError;
use crate::resource::{Resource, ResourceRef};

/// Immutable dependency graph over a validated resource catalog.
///
/// Node indices are assigned in declaration order, which is what makes the
/// declaration-order tie-break a plain index comparison.
pub struct DependencyGraph {
    graph: DiGraph<ResourceRef, ()>,
    node_index: HashMap<ResourceRef, NodeIndex>,
    topo: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph for a resource catalog and pre-compute its
    /// topological order.
    ///
    /// Fails with [`ConfigError::Cycle`] when the dependencies are not
    /// acyclic, naming every resource on a cycle. No provider or store
    /// calls happen here.
    pub fn build(resources: &[Resource]) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for resource in resources {
            let idx = graph.add_node(resource.address.clone());
            node_index.insert(resource.address.clone(), idx);
        }

        // Edge direction is dependency -> dependent, so topological order
        // yields dependencies first. update_edge dedupes a depends_on that
        // repeats an attribute reference.
        for resource in resources {
            let to = node_index[&resource.address];
            for dep in resource.dependencies() {
                let from = *node_index.get(&dep).ok_or_else(|| {
                    ConfigError::UnknownDependency {
                        resource: resource.address.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.update_edge(from, to, ());
            }
        }

        let topo = ordered_toposort(&graph)?;

        Ok(Self {
            graph,
            node_index,
            topo,
        })
    }

    /// Number of resources in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Whether an address is part of the graph.
    pub fn contains(&self, address: &ResourceRef) -> bool {
        self.node_index.contains_key(address)
    }

    /// Addresses in apply order: every resource after its dependencies,
    /// ties broken by declaration order.
    pub fn apply_order(&self) -> Vec<ResourceRef> {
        self.topo.iter().map(|idx| self.graph[*idx].clone()).collect()
    }

    /// Addresses in destroy order: the exact reverse of apply order.
    pub fn destroy_order(&self) -> Vec<ResourceRef> {
        let mut order = self.apply_order();
        order.reverse();
        order
    }

    /// Group resources into waves that can run concurrently.
    ///
    /// A resource's wave is one past the deepest wave among its
    /// dependencies, so no wave contains an edge. Waves come back in
    /// apply order, members in declaration order.
    pub fn waves(&self) -> Vec<Vec<ResourceRef>> {
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<NodeIndex>> = Vec::new();

        for &idx in &self.topo {
            let depth = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| level[&dep] + 1)
                .max()
                .unwrap_or(0);
            level.insert(idx, depth);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(idx);
        }

        waves
            .into_iter()
            .map(|mut wave| {
                wave.sort_unstable();
                wave.into_iter().map(|idx| self.graph[idx].clone()).collect()
            })
            .collect()
    }

    /// Transitive dependencies of an address, excluding the address
    /// itself. Empty for addresses outside the graph.
    pub fn dependencies_of(&self, address: &ResourceRef) -> BTreeSet<ResourceRef> {
        self.closure(address, Direction::Incoming)
    }

    /// Transitive dependents of an address, excluding the address itself.
    /// Empty for addresses outside the graph.
    pub fn dependents_of(&self, address: &ResourceRef) -> BTreeSet<ResourceRef> {
        self.closure(address, Direction::Outgoing)
    }

    fn closure(&self, address: &ResourceRef, direction: Direction) -> BTreeSet<ResourceRef> {
        let Some(&start) = self.node_index.get(address) else {
            return BTreeSet::new();
        };

        let mut seen = BTreeSet::new();
        let mut pending = vec![start];
        while let Some(idx) = pending.pop() {
            for next in self.graph.neighbors_directed(idx, direction) {
                if seen.insert(self.graph[next].clone()) {
                    pending.push(next);
                }
            }
        }
        seen
    }
}

/// Kahn's algorithm with the ready set drained in declaration order.
fn ordered_toposort(graph: &DiGraph<ResourceRef, ()>) -> Result<Vec<NodeIndex>, ConfigError> {
    let mut indegree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    // NodeIndex order is insertion order, which is declaration order.
    let mut ready: BTreeSet<NodeIndex> = indegree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let degree = indegree
                .get_mut(&next)
                .map(|d| {
                    *d -= 1;
                    *d
                })
                .unwrap_or(0);
            if degree == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < graph.node_count() {
        return Err(ConfigError::Cycle {
            members: cycle_members(graph),
        });
    }
    Ok(order)
}

/// Every node on a cycle, in declaration order.
fn cycle_members(graph: &DiGraph<ResourceRef, ()>) -> Vec<ResourceRef> {
    let mut members: Vec<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|&n| graph.contains_edge(n, n)))
        .flatten()
        .collect();
    members.sort_unstable();
    members.into_iter().map(|idx| graph[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn address(s: &str) -> ResourceRef {
        s.parse().unwrap()
    }

    /// Bucket and role are independent; the function needs both; the
    /// gateway route needs the function.
    fn tts_catalog() -> Vec<Resource> {
        vec![
            Resource::new("object_store", "audio"),
            Resource::new("identity_role", "runtime"),
            Resource::new("function", "synthesize")
                .attr("bucket", "${object_store.audio.bucket}")
                .depends_on(address("identity_role.runtime")),
            Resource::new("gateway_route", "api")
                .attr("function", "${function.synthesize.arn}"),
        ]
    }

    #[test]
    fn test_apply_order_respects_dependencies() {
        let graph = DependencyGraph::build(&tts_catalog()).unwrap();
        let order = graph.apply_order();

        assert_eq!(
            order,
            vec![
                address("object_store.audio"),
                address("identity_role.runtime"),
                address("function.synthesize"),
                address("gateway_route.api"),
            ]
        );
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // Same catalog with bucket and role swapped: the independent pair
        // comes back in the new declaration order.
        let mut resources = tts_catalog();
        resources.swap(0, 1);

        let graph = DependencyGraph::build(&resources).unwrap();
        let order = graph.apply_order();
        assert_eq!(order[0], address("identity_role.runtime"));
        assert_eq!(order[1], address("object_store.audio"));
        assert_eq!(order[2], address("function.synthesize"));
    }

    #[test]
    fn test_destroy_order_is_exact_reverse() {
        let graph = DependencyGraph::build(&tts_catalog()).unwrap();
        let mut reversed = graph.apply_order();
        reversed.reverse();
        assert_eq!(graph.destroy_order(), reversed);
    }

    #[test]
    fn test_cycle_reported_with_members() {
        let resources = vec![
            Resource::new("object_store", "audio").attr("tag", "${function.synthesize.arn}"),
            Resource::new("function", "synthesize").attr("bucket", "${object_store.audio.bucket}"),
            Resource::new("identity_role", "runtime"),
        ];

        let err = DependencyGraph::build(&resources).unwrap_err();
        match err {
            ConfigError::Cycle { members } => {
                assert_eq!(
                    members,
                    vec![address("object_store.audio"), address("function.synthesize")]
                );
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_duplicate_explicit_and_implicit_edge() {
        let resources = vec![
            Resource::new("object_store", "audio"),
            Resource::new("function", "synthesize")
                .attr("bucket", "${object_store.audio.bucket}")
                .depends_on(address("object_store.audio")),
        ];

        let graph = DependencyGraph::build(&resources).unwrap();
        assert_eq!(
            graph.apply_order(),
            vec![address("object_store.audio"), address("function.synthesize")]
        );
    }

    #[test]
    fn test_waves_group_independent_resources() {
        let graph = DependencyGraph::build(&tts_catalog()).unwrap();
        let waves = graph.waves();

        assert_eq!(waves.len(), 3);
        assert_eq!(
            waves[0],
            vec![address("object_store.audio"), address("identity_role.runtime")]
        );
        assert_eq!(waves[1], vec![address("function.synthesize")]);
        assert_eq!(waves[2], vec![address("gateway_route.api")]);
    }

    #[test]
    fn test_transitive_closures() {
        let graph = DependencyGraph::build(&tts_catalog()).unwrap();

        let deps = graph.dependencies_of(&address("gateway_route.api"));
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&address("function.synthesize")));
        assert!(deps.contains(&address("object_store.audio")));
        assert!(deps.contains(&address("identity_role.runtime")));

        let dependents = graph.dependents_of(&address("identity_role.runtime"));
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains(&address("function.synthesize")));
        assert!(dependents.contains(&address("gateway_route.api")));

        assert!(graph.dependents_of(&address("gateway_route.api")).is_empty());
    }

    #[test]
    fn test_empty_catalog() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.apply_order().is_empty());
        assert!(graph.waves().is_empty());
    }
}
