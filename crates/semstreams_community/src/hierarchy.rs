//! Community hierarchy construction.
//!
//! Level 0 communities come straight from label propagation. Each further
//! level contracts the previous level's communities into supernodes (edge
//! weights aggregate between supernodes) and re-runs propagation, up to
//! `max_levels` or until the structure stops merging.

use std::collections::BTreeMap;

use crate::graph::CommunityGraph;
use crate::lpa::{group_by_label, propagate};

/// A detected community: sorted members keyed by a deterministic ID (the
/// lexicographically smallest member).
#[derive(Debug, Clone)]
pub struct Community {
    /// Deterministic community ID.
    pub id: String,
    /// Sorted member entity IDs.
    pub members: Vec<String>,
}

/// All communities at one hierarchy level.
#[derive(Debug, Clone)]
pub struct LevelCommunities {
    /// The level (0 = finest).
    pub level: usize,
    /// Communities, sorted by ID.
    pub communities: Vec<Community>,
}

fn communities_from_groups(
    graph: &CommunityGraph,
    groups: BTreeMap<usize, Vec<usize>>,
    min_size: usize,
) -> Vec<Community> {
    let mut out: Vec<Community> = groups
        .into_values()
        .filter(|members| members.len() >= min_size)
        .map(|members| {
            let mut ids: Vec<String> =
                members.iter().map(|&i| graph.node(i).to_string()).collect();
            ids.sort();
            Community {
                id: ids[0].clone(),
                members: ids,
            }
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn union_members(children: &[&Community]) -> Vec<String> {
    let mut members: Vec<String> = children
        .iter()
        .flat_map(|c| c.members.iter().cloned())
        .collect();
    members.sort();
    members.dedup();
    members
}

/// Build the full hierarchy.
///
/// Communities smaller than `min_size` are discarded at every level; their
/// members simply have no community at that level.
#[must_use]
pub fn build_hierarchy(
    graph: &CommunityGraph,
    max_levels: usize,
    max_iterations: usize,
    min_size: usize,
) -> Vec<LevelCommunities> {
    let mut levels = Vec::new();
    if graph.is_empty() || max_levels == 0 {
        return levels;
    }

    let outcome = propagate(graph, max_iterations);
    let mut current = communities_from_groups(graph, group_by_label(&outcome.labels), min_size);
    if current.is_empty() {
        return levels;
    }
    levels.push(LevelCommunities {
        level: 0,
        communities: current.clone(),
    });

    for level in 1..max_levels {
        if current.len() <= 1 {
            break;
        }

        // Map each base node to its community index at the previous level.
        let mut node_community: BTreeMap<usize, usize> = BTreeMap::new();
        for (ci, community) in current.iter().enumerate() {
            for member in &community.members {
                if let Some(node) = graph.index_of(member) {
                    node_community.insert(node, ci);
                }
            }
        }

        // Aggregate base-graph edge weights between supernodes.
        let mut pairs: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for node in 0..graph.len() {
            let Some(&a) = node_community.get(&node) else {
                continue;
            };
            for &(neighbor, weight) in graph.neighbors(node) {
                if neighbor <= node {
                    continue; // each undirected edge once
                }
                let Some(&b) = node_community.get(&neighbor) else {
                    continue;
                };
                if a != b {
                    *pairs.entry((a.min(b), a.max(b))).or_insert(0.0) += weight;
                }
            }
        }

        let supernodes: Vec<String> = current.iter().map(|c| c.id.clone()).collect();
        let supergraph = CommunityGraph::from_weighted_pairs(supernodes, &pairs);
        let outcome = propagate(&supergraph, max_iterations);
        let groups = group_by_label(&outcome.labels);

        let mut next: Vec<Community> = groups
            .into_values()
            .map(|supers| {
                let children: Vec<&Community> = supers.iter().map(|&i| &current[i]).collect();
                let members = union_members(&children);
                Community {
                    id: members[0].clone(),
                    members,
                }
            })
            .filter(|c| c.members.len() >= min_size)
            .collect();
        next.sort_by(|a, b| a.id.cmp(&b.id));

        if next.len() >= current.len() || next.is_empty() {
            break; // nothing merged, the hierarchy is done
        }
        levels.push(LevelCommunities {
            level,
            communities: next.clone(),
        });
        current = next;
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clique_pairs(offset: usize) -> Vec<(usize, usize, f64)> {
        vec![
            (offset, offset + 1, 1.0),
            (offset + 1, offset + 2, 1.0),
            (offset, offset + 2, 1.0),
        ]
    }

    fn four_clique_graph() -> CommunityGraph {
        // Four 3-cliques; cliques 0/1 and 2/3 are bridged more strongly than
        // the pairs are to each other.
        let nodes: Vec<String> = (0..12).map(|i| format!("a.a.a.a.a.{i:02}")).collect();
        let mut pairs = BTreeMap::new();
        let mut add = |edges: Vec<(usize, usize, f64)>| {
            for (a, b, w) in edges {
                *pairs.entry((a.min(b), a.max(b))).or_insert(0.0) += w;
            }
        };
        add(clique_pairs(0));
        add(clique_pairs(3));
        add(clique_pairs(6));
        add(clique_pairs(9));
        add(vec![(2, 3, 0.5), (8, 9, 0.5), (5, 6, 0.05)]);
        CommunityGraph::from_weighted_pairs(nodes, &pairs)
    }

    #[test]
    fn test_level_zero_finds_cliques() {
        let graph = four_clique_graph();
        let levels = build_hierarchy(&graph, 3, 10, 2);
        assert!(!levels.is_empty());
        assert_eq!(levels[0].level, 0);
        assert_eq!(levels[0].communities.len(), 4);
    }

    #[test]
    fn test_higher_levels_merge() {
        let graph = four_clique_graph();
        let levels = build_hierarchy(&graph, 3, 10, 2);
        assert!(levels.len() >= 2);
        let level1 = &levels[1];
        assert!(level1.communities.len() < 4);
        // Every base entity that survives appears in exactly one community.
        let mut seen = Vec::new();
        for community in &level1.communities {
            seen.extend(community.members.clone());
        }
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(seen.len(), deduped.len());
    }

    #[test]
    fn test_min_size_discards_small_communities() {
        let nodes: Vec<String> = (0..4).map(|i| format!("a.a.a.a.a.{i}")).collect();
        let mut pairs = BTreeMap::new();
        pairs.insert((0, 1), 1.0); // pair community
        // nodes 2 and 3 isolated
        let graph = CommunityGraph::from_weighted_pairs(nodes, &pairs);
        let levels = build_hierarchy(&graph, 2, 10, 2);
        assert_eq!(levels[0].communities.len(), 1);
        assert_eq!(levels[0].communities[0].members.len(), 2);
    }

    #[test]
    fn test_community_ids_deterministic() {
        let graph = four_clique_graph();
        let a = build_hierarchy(&graph, 3, 10, 2);
        let b = build_hierarchy(&graph, 3, 10, 2);
        let ids_a: Vec<&str> = a[0].communities.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b[0].communities.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        // Each ID is the smallest member.
        for community in &a[0].communities {
            assert_eq!(&community.id, community.members.iter().min().unwrap());
        }
    }
}
