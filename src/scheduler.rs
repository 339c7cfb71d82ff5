//! Execution-layer computation over a validated sprint graph.
//!
//! Layer i holds exactly the sprints whose dependencies all live in layers
//! 0..i, so every layer is maximally parallel: a sprint lands in the
//! earliest layer its dependencies allow. Intra-layer order is lexical by
//! sprint id, which makes repeated runs over the same input byte-identical -
//! resume planning depends on that.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::SprintGraph;

/// One wave of sprints schedulable in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLayer {
    pub index: usize,
    /// Sprint ids in lexical order.
    pub sprint_ids: Vec<String>,
}

/// Computes the ordered execution layers for a validated graph.
///
/// Kahn-style breadth-first layering with indegree tracking: the first wave
/// is every dependency-free sprint; completing a wave decrements its
/// dependents' remaining-dependency counts, and whatever reaches zero forms
/// the next wave. A sprint's wave is therefore `1 + max(dependency waves)`.
pub fn compute_layers(graph: &SprintGraph) -> Vec<ExecutionLayer> {
    let mut remaining: BTreeMap<&str, usize> = graph
        .ids()
        .map(|id| {
            let count = graph.dependencies_of(id).map_or(0, BTreeSet::len);
            (id, count)
        })
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for id in graph.ids() {
        if let Some(deps) = graph.dependencies_of(id) {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id);
            }
        }
    }

    // BTreeMap iteration is lexical, so the first frontier is already
    // sorted; later frontiers are collected through a BTreeSet.
    let mut frontier: Vec<String> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (*id).to_string())
        .collect();

    let mut layers: Vec<ExecutionLayer> = Vec::new();
    while !frontier.is_empty() {
        let mut unlocked: BTreeSet<String> = BTreeSet::new();
        for id in &frontier {
            if let Some(children) = dependents.get(id.as_str()) {
                for child in children {
                    if let Some(count) = remaining.get_mut(*child) {
                        *count -= 1;
                        if *count == 0 {
                            unlocked.insert((*child).to_string());
                        }
                    }
                }
            }
        }

        layers.push(ExecutionLayer {
            index: layers.len(),
            sprint_ids: frontier,
        });
        frontier = unlocked.into_iter().collect();
    }

    layers
}

/// Map from sprint id to its assigned layer index.
pub fn layer_assignments(layers: &[ExecutionLayer]) -> BTreeMap<String, usize> {
    layers
        .iter()
        .flat_map(|layer| {
            layer
                .sprint_ids
                .iter()
                .map(move |id| (id.clone(), layer.index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_input::SprintDeclaration;
    use proptest::prelude::*;

    fn decl(id: &str, deps: &[&str]) -> SprintDeclaration {
        SprintDeclaration {
            id: id.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            estimated_hours: 0.0,
            produces: Vec::new(),
            consumes: Vec::new(),
        }
    }

    fn ids(layer: &ExecutionLayer) -> Vec<&str> {
        layer.sprint_ids.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_fan_out_shares_a_layer() {
        // S01 <- S02, S01 <- S03: the two dependents run in parallel.
        let graph = SprintGraph::build(&[
            decl("S01", &[]),
            decl("S02", &["S01"]),
            decl("S03", &["S01"]),
        ])
        .unwrap();

        let layers = compute_layers(&graph);
        assert_eq!(layers.len(), 2);
        assert_eq!(ids(&layers[0]), vec!["S01"]);
        assert_eq!(ids(&layers[1]), vec!["S02", "S03"]);
        assert_eq!(layers[1].index, 1);
    }

    #[test]
    fn test_transitive_chain_serializes() {
        // S03 depends on both S01 and S02, so it cannot share S02's layer.
        let graph = SprintGraph::build(&[
            decl("S01", &[]),
            decl("S02", &["S01"]),
            decl("S03", &["S01", "S02"]),
        ])
        .unwrap();

        let layers = compute_layers(&graph);
        assert_eq!(layers.len(), 3);
        assert_eq!(ids(&layers[0]), vec!["S01"]);
        assert_eq!(ids(&layers[1]), vec!["S02"]);
        assert_eq!(ids(&layers[2]), vec!["S03"]);
    }

    #[test]
    fn test_layers_are_deterministic_across_runs_and_input_order() {
        let forward = [
            decl("S01", &[]),
            decl("S02", &[]),
            decl("S03", &["S01"]),
            decl("S04", &["S02", "S03"]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = compute_layers(&SprintGraph::build(&forward).unwrap());
        let b = compute_layers(&SprintGraph::build(&forward).unwrap());
        let c = compute_layers(&SprintGraph::build(&reversed).unwrap());

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(ids(&a[0]), vec!["S01", "S02"]);
    }

    #[test]
    fn test_independent_sprints_all_land_in_layer_zero() {
        let graph =
            SprintGraph::build(&[decl("S03", &[]), decl("S01", &[]), decl("S02", &[])]).unwrap();
        let layers = compute_layers(&graph);
        assert_eq!(layers.len(), 1);
        assert_eq!(ids(&layers[0]), vec!["S01", "S02", "S03"]);
    }

    #[test]
    fn test_empty_graph_yields_no_layers() {
        let graph = SprintGraph::build(&[]).unwrap();
        assert!(compute_layers(&graph).is_empty());
    }

    #[test]
    fn test_layer_assignments_maps_every_sprint() {
        let graph = SprintGraph::build(&[decl("S01", &[]), decl("S02", &["S01"])]).unwrap();
        let layers = compute_layers(&graph);
        let assignments = layer_assignments(&layers);
        assert_eq!(assignments.get("S01"), Some(&0));
        assert_eq!(assignments.get("S02"), Some(&1));
    }

    fn sprint_id(i: usize) -> String {
        format!("S{:02}", i)
    }

    /// Sprint i may depend on any subset of the sprints declared before it,
    /// which keeps every generated plan acyclic.
    fn arbitrary_plan() -> impl Strategy<Value = Vec<SprintDeclaration>> {
        prop::collection::vec(prop::collection::vec(any::<bool>(), 16), 0..16).prop_map(|rows| {
            rows.iter()
                .enumerate()
                .map(|(i, row)| SprintDeclaration {
                    id: sprint_id(i),
                    depends_on: row
                        .iter()
                        .enumerate()
                        .filter(|(j, flag)| *j < i && **flag)
                        .map(|(j, _)| sprint_id(j))
                        .collect(),
                    estimated_hours: 0.0,
                    produces: Vec::new(),
                    consumes: Vec::new(),
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_every_sprint_layers_strictly_after_its_dependencies(plan in arbitrary_plan()) {
            let graph = SprintGraph::build(&plan).unwrap();
            let layers = compute_layers(&graph);
            let assignments = layer_assignments(&layers);

            // Every sprint appears in exactly one layer.
            let placed: usize = layers.iter().map(|l| l.sprint_ids.len()).sum();
            prop_assert_eq!(placed, plan.len());
            prop_assert_eq!(assignments.len(), plan.len());

            for declaration in &plan {
                let layer = assignments[&declaration.id];
                if declaration.depends_on.is_empty() {
                    prop_assert_eq!(layer, 0);
                } else {
                    let max_dep = declaration
                        .depends_on
                        .iter()
                        .map(|dep| assignments[dep])
                        .max()
                        .unwrap();
                    // Strictly after every dependency, and no later than
                    // the dependencies force (maximal parallelism).
                    prop_assert_eq!(layer, max_dep + 1);
                }
            }
        }

        #[test]
        fn prop_scheduling_is_deterministic(plan in arbitrary_plan()) {
            let first = compute_layers(&SprintGraph::build(&plan).unwrap());
            let second = compute_layers(&SprintGraph::build(&plan).unwrap());
            prop_assert_eq!(first, second);
        }
    }
}
