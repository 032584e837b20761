//! Entity graph construction.
//!
//! Builds an undirected weighted graph over the entity population.
//! Neighbours come from outgoing edges and relationship-triples; since edges
//! are themselves derived from relationship-triples, the two sources are
//! deduplicated per (source, predicate, target) with the stronger weight
//! winning. References to entities outside the population (dangling) are
//! skipped.

use std::collections::{BTreeMap, HashMap};

use semstreams_model::EntityState;

/// An undirected weighted graph with nodes in sorted entity-ID order.
///
/// Node index order equals lexicographic ID order, which the label
/// propagation pass relies on for determinism.
#[derive(Debug, Clone)]
pub struct CommunityGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl CommunityGraph {
    /// Build the graph from entity states.
    #[must_use]
    pub fn from_states(states: &[EntityState]) -> Self {
        let mut nodes: Vec<String> = states.iter().map(|s| s.id.as_str().to_string()).collect();
        nodes.sort();
        nodes.dedup();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        // (source, predicate, target) → weight; max wins on duplicates.
        let mut relations: BTreeMap<(usize, String, usize), f64> = BTreeMap::new();
        for state in states {
            let Some(&src) = index.get(state.id.as_str()) else {
                continue;
            };
            for edge in &state.edges {
                if let Some(&dst) = index.get(edge.target.as_str()) {
                    if src != dst {
                        let entry = relations
                            .entry((src, edge.predicate.clone(), dst))
                            .or_insert(0.0);
                        *entry = entry.max(edge.weight);
                    }
                }
            }
            for triple in &state.triples {
                if let Some(target) = triple.object_entity() {
                    if let Some(&dst) = index.get(target.as_str()) {
                        if src != dst {
                            let entry = relations
                                .entry((src, triple.predicate.clone(), dst))
                                .or_insert(0.0);
                            *entry = entry.max(triple.confidence);
                        }
                    }
                }
            }
        }

        // Collapse predicates: undirected pair → summed weight.
        let mut pair_weight: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for ((src, _, dst), weight) in relations {
            let key = (src.min(dst), src.max(dst));
            *pair_weight.entry(key).or_insert(0.0) += weight;
        }

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for ((a, b), weight) in pair_weight {
            adjacency[a].push((b, weight));
            adjacency[b].push((a, weight));
        }

        Self {
            nodes,
            index,
            adjacency,
        }
    }

    /// Build a graph from pre-aggregated undirected edges (used when
    /// contracting communities into supernodes).
    #[must_use]
    pub fn from_weighted_pairs(nodes: Vec<String>, pairs: &BTreeMap<(usize, usize), f64>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let mut adjacency = vec![Vec::new(); nodes.len()];
        for (&(a, b), &weight) in pairs {
            if a == b || a >= nodes.len() || b >= nodes.len() {
                continue;
            }
            adjacency[a].push((b, weight));
            adjacency[b].push((a, weight));
        }
        Self {
            nodes,
            index,
            adjacency,
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node ID at an index.
    #[must_use]
    pub fn node(&self, i: usize) -> &str {
        &self.nodes[i]
    }

    /// All node IDs, sorted.
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// The index of a node ID.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Weighted neighbours of a node.
    #[must_use]
    pub fn neighbors(&self, i: usize) -> &[(usize, f64)] {
        &self.adjacency[i]
    }

    /// The full adjacency list.
    #[must_use]
    pub fn adjacency(&self) -> &[Vec<(usize, f64)>] {
        &self.adjacency
    }
}
