//! PageRank over community subgraphs.
//!
//! Ranks member importance inside a community. Damping 0.85 with ~20
//! iterations is the engine default; deviations must be configured
//! explicitly.

/// Weighted PageRank over an adjacency list.
///
/// Dangling nodes distribute their mass uniformly. The returned vector sums
/// to 1.0 (for a non-empty graph).
#[must_use]
pub fn pagerank(adjacency: &[Vec<(usize, f64)>], damping: f64, iterations: usize) -> Vec<f64> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f64;
    let out_weight: Vec<f64> = adjacency
        .iter()
        .map(|neighbors| neighbors.iter().map(|&(_, w)| w).sum())
        .collect();

    let mut ranks = vec![uniform; n];
    for _ in 0..iterations {
        let mut next = vec![(1.0 - damping) * uniform; n];
        let mut dangling = 0.0;
        for (node, neighbors) in adjacency.iter().enumerate() {
            if out_weight[node] <= 0.0 {
                dangling += ranks[node];
                continue;
            }
            for &(neighbor, weight) in neighbors {
                next[neighbor] += damping * ranks[node] * weight / out_weight[node];
            }
        }
        let dangling_share = damping * dangling * uniform;
        for rank in &mut next {
            *rank += dangling_share;
        }
        ranks = next;
    }
    ranks
}

/// Build the subgraph adjacency of a member subset, preserving weights.
/// `members` maps subgraph index → full-graph index.
#[must_use]
pub fn subgraph_adjacency(
    adjacency: &[Vec<(usize, f64)>],
    members: &[usize],
) -> Vec<Vec<(usize, f64)>> {
    let position: std::collections::HashMap<usize, usize> = members
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();
    members
        .iter()
        .map(|&global| {
            adjacency[global]
                .iter()
                .filter_map(|&(neighbor, weight)| {
                    position.get(&neighbor).map(|&local| (local, weight))
                })
                .collect()
        })
        .collect()
}
