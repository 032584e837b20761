//! Label propagation.
//!
//! Every node starts as its own label. Nodes are visited in sorted ID order;
//! each adopts the neighbour label with the greatest aggregate weight,
//! breaking ties by label frequency, then by the lexicographically smaller
//! label. Because node indices are assigned in sorted ID order, "smaller
//! index" and "lexicographically smaller label" coincide.
//!
//! The pass terminates when a full sweep changes nothing or after
//! `max_iterations` sweeps, whichever comes first.

use std::collections::BTreeMap;

use crate::graph::CommunityGraph;

/// The result of a propagation run.
#[derive(Debug, Clone)]
pub struct LpaOutcome {
    /// Final label per node (a node index).
    pub labels: Vec<usize>,
    /// Sweeps performed.
    pub iterations: usize,
    /// `true` when a sweep changed nothing (fixed point reached).
    pub converged: bool,
}

/// Run label propagation over a graph.
#[must_use]
pub fn propagate(graph: &CommunityGraph, max_iterations: usize) -> LpaOutcome {
    let n = graph.len();
    let mut labels: Vec<usize> = (0..n).collect();
    if n == 0 {
        return LpaOutcome {
            labels,
            iterations: 0,
            converged: true,
        };
    }

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;
        let mut changed = false;

        for node in 0..n {
            let neighbors = graph.neighbors(node);
            if neighbors.is_empty() {
                continue;
            }
            // label → (aggregate weight, frequency). BTreeMap keeps the
            // scan order deterministic.
            let mut tally: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
            for &(neighbor, weight) in neighbors {
                let entry = tally.entry(labels[neighbor]).or_insert((0.0, 0));
                entry.0 += weight;
                entry.1 += 1;
            }
            let mut best = labels[node];
            let mut best_weight = f64::MIN;
            let mut best_count = 0usize;
            for (&label, &(weight, count)) in &tally {
                let better = weight > best_weight
                    || (weight == best_weight && count > best_count)
                    || (weight == best_weight && count == best_count && label < best);
                if better {
                    best = label;
                    best_weight = weight;
                    best_count = count;
                }
            }
            if best != labels[node] {
                labels[node] = best;
                changed = true;
            }
        }

        if !changed {
            converged = true;
            break;
        }
    }

    LpaOutcome {
        labels,
        iterations,
        converged,
    }
}

/// Group nodes by final label: label node index → member node indices.
#[must_use]
pub fn group_by_label(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(node);
    }
    groups
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn graph_of(nodes: &[&str], pairs: &[(usize, usize, f64)]) -> CommunityGraph {
        let mut map = BTreeMap::new();
        for &(a, b, w) in pairs {
            *map.entry((a.min(b), a.max(b))).or_insert(0.0) += w;
        }
        CommunityGraph::from_weighted_pairs(nodes.iter().map(|s| s.to_string()).collect(), &map)
    }

    #[test]
    fn test_two_cliques_form_two_communities() {
        // 0-1-2 clique and 3-4-5 clique, joined by one weak edge.
        let graph = graph_of(
            &["a.a.a.a.a.0", "a.a.a.a.a.1", "a.a.a.a.a.2", "a.a.a.a.a.3", "a.a.a.a.a.4", "a.a.a.a.a.5"],
            &[
                (0, 1, 1.0),
                (1, 2, 1.0),
                (0, 2, 1.0),
                (3, 4, 1.0),
                (4, 5, 1.0),
                (3, 5, 1.0),
                (2, 3, 0.1),
            ],
        );
        let outcome = propagate(&graph, 10);
        assert!(outcome.converged);
        let groups = group_by_label(&outcome.labels);
        assert_eq!(groups.len(), 2);
        assert_eq!(outcome.labels[0], outcome.labels[1]);
        assert_eq!(outcome.labels[3], outcome.labels[5]);
        assert_ne!(outcome.labels[0], outcome.labels[3]);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let graph = graph_of(
            &["a.a.a.a.a.0", "a.a.a.a.a.1", "a.a.a.a.a.2", "a.a.a.a.a.3"],
            &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)],
        );
        let first = propagate(&graph, 10);
        let second = propagate(&graph, 10);
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn test_terminates_within_max_iterations() {
        let graph = graph_of(
            &["a.a.a.a.a.0", "a.a.a.a.a.1"],
            &[(0, 1, 1.0)],
        );
        let outcome = propagate(&graph, 3);
        assert!(outcome.iterations <= 3);
    }

    #[test]
    fn test_isolated_nodes_keep_own_label() {
        let graph = graph_of(&["a.a.a.a.a.0", "a.a.a.a.a.1"], &[]);
        let outcome = propagate(&graph, 10);
        assert_eq!(outcome.labels, vec![0, 1]);
        assert!(outcome.converged);
    }

    #[test]
    fn test_cycles_are_handled() {
        // A ↔ B mutual references converge without oscillating forever.
        let graph = graph_of(&["a.a.a.a.a.0", "a.a.a.a.a.1"], &[(0, 1, 1.0)]);
        let outcome = propagate(&graph, 10);
        assert_eq!(outcome.labels[0], outcome.labels[1]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = CommunityGraph::from_states(&[]);
        let outcome = propagate(&graph, 10);
        assert!(outcome.labels.is_empty());
        assert!(outcome.converged);
    }
}
