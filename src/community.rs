//! Community data model and single-node post-processing policies.
//!
//! A `Community` is the final product of one walk-and-cluster session: the
//! source node plus the nearby nodes partitioned into representative
//! singles and statistically interchangeable clusters. When a community
//! accumulates too many single nodes, a merge or prune policy (mutually
//! exclusive, chosen by configuration) trims them down to the configured
//! cap.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::config::Divergence;
use crate::divergence::divergence_of_top_n_paths;
use crate::walks::NodeClusterWalkStatistics;

/// The community of one source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub source: String,
    /// Representative single nodes; always contains the source.
    pub single_nodes: BTreeSet<String>,
    /// Symmetric clusters of interchangeable nodes.
    pub clusters: Vec<BTreeSet<String>>,
}

impl Community {
    pub fn number_of_single_nodes(&self) -> usize {
        self.single_nodes.len()
    }

    pub fn number_of_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.single_nodes.len() + self.clusters.iter().map(BTreeSet::len).sum::<usize>()
    }

    /// All member names: source, singles, and every cluster member.
    pub fn all_nodes(&self) -> BTreeSet<String> {
        let mut nodes = self.single_nodes.clone();
        for cluster in &self.clusters {
            nodes.extend(cluster.iter().cloned());
        }
        nodes
    }
}

/// The communities of every source node of one sub-hypergraph.
#[derive(Debug, Clone, Default)]
pub struct Communities {
    pub communities: BTreeMap<String, Community>,
}

impl Communities {
    pub fn get(&self, source: &str) -> Option<&Community> {
        self.communities.get(source)
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Community)> {
        self.communities.iter()
    }
}

/// Folds excess single nodes into existing same-typed clusters until at
/// most `target_cap` singles remain (the source node is accounted
/// separately). The quota is proportioned across node types by population;
/// types absent from every cluster can never merge and are always
/// retained.
///
/// Returns the names of the retained singles and the updated clusters.
pub fn merge_excess_single_nodes(
    single_nodes: Vec<NodeClusterWalkStatistics>,
    mut clusters: Vec<NodeClusterWalkStatistics>,
    target_cap: usize,
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    divergence: Divergence,
) -> (BTreeSet<String>, Vec<NodeClusterWalkStatistics>) {
    let excess = single_nodes.len().saturating_sub(target_cap);
    if excess == 0 {
        let names = single_names(&single_nodes);
        return (names, clusters);
    }

    let valid_types: BTreeSet<String> = clusters
        .iter()
        .map(|c| c.node_type().to_string())
        .collect();

    let mut by_type: BTreeMap<String, Vec<NodeClusterWalkStatistics>> = BTreeMap::new();
    for single in single_nodes {
        by_type
            .entry(single.node_type().to_string())
            .or_default()
            .push(single);
    }

    let valid_counts: BTreeMap<String, usize> = by_type
        .iter()
        .filter(|(node_type, _)| valid_types.contains(*node_type))
        .map(|(node_type, nodes)| (node_type.clone(), nodes.len()))
        .collect();
    let total_valid: usize = valid_counts.values().sum();

    let mut to_merge = excess;
    if to_merge > total_valid {
        warn!(
            "cannot merge {} single nodes: only {} have a same-typed cluster",
            to_merge, total_valid
        );
        to_merge = total_valid;
    }
    if to_merge == 0 {
        let mut names = BTreeSet::new();
        for nodes in by_type.values() {
            names.extend(nodes.iter().flat_map(|n| n.node_names().iter().cloned()));
        }
        return (names, clusters);
    }

    // Merge the most populous types first.
    let mut type_order: Vec<(String, usize)> =
        valid_counts.iter().map(|(t, &c)| (t.clone(), c)).collect();
    type_order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut retained = BTreeSet::new();
    for (node_type, nodes) in &by_type {
        if !valid_types.contains(node_type) {
            retained.extend(nodes.iter().flat_map(|n| n.node_names().iter().cloned()));
        }
    }

    let mut remaining = to_merge;
    for (node_type, count) in type_order {
        let mut pool = by_type.remove(&node_type).unwrap_or_default();
        if remaining > 0 {
            let share = (to_merge as f64 * count as f64 / total_valid as f64).ceil() as usize;
            let quota = share.min(remaining).min(pool.len());
            merge_singles_into_clusters(
                &mut pool,
                &mut clusters,
                quota,
                number_of_walks,
                number_of_top_paths,
                divergence,
            );
            remaining -= quota;
        }
        retained.extend(pool.iter().flat_map(|n| n.node_names().iter().cloned()));
    }

    (retained, clusters)
}

/// Merges `quota` singles from the pool into the same-typed cluster with
/// the smallest path-distribution divergence, one at a time.
fn merge_singles_into_clusters(
    pool: &mut Vec<NodeClusterWalkStatistics>,
    clusters: &mut [NodeClusterWalkStatistics],
    quota: usize,
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    divergence: Divergence,
) {
    for _ in 0..quota {
        let mut best: Option<(usize, usize, f64)> = None;
        for (i, single) in pool.iter().enumerate() {
            for (j, cluster) in clusters.iter().enumerate() {
                if cluster.node_type() != single.node_type() {
                    continue;
                }
                let value = divergence_of_top_n_paths(
                    single,
                    cluster,
                    number_of_walks,
                    number_of_top_paths,
                    divergence,
                );
                if best.map_or(true, |(_, _, d)| value < d) {
                    best = Some((i, j, value));
                }
            }
        }
        match best {
            Some((i, j, _)) => {
                let single = pool.swap_remove(i);
                clusters[j].merge(&single);
            }
            None => break,
        }
    }
}

/// Drops excess single nodes until at most `target_cap` remain, removing
/// first (per type, proportionally to population) the nodes with the
/// largest minimal pairwise divergence to any other same-typed single,
/// i.e. the least representative ones.
pub fn prune_excess_single_nodes(
    single_nodes: Vec<NodeClusterWalkStatistics>,
    target_cap: usize,
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    divergence: Divergence,
) -> BTreeSet<String> {
    let excess = single_nodes.len().saturating_sub(target_cap);
    if excess == 0 {
        return single_names(&single_nodes);
    }
    let total = single_nodes.len();

    let mut by_type: BTreeMap<String, Vec<NodeClusterWalkStatistics>> = BTreeMap::new();
    for single in single_nodes {
        by_type
            .entry(single.node_type().to_string())
            .or_default()
            .push(single);
    }

    let mut type_order: Vec<(String, usize)> = by_type
        .iter()
        .map(|(t, nodes)| (t.clone(), nodes.len()))
        .collect();
    type_order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut retained = BTreeSet::new();
    let mut remaining = excess;
    for (node_type, count) in type_order {
        let mut pool = by_type.remove(&node_type).unwrap_or_default();
        if remaining > 0 {
            let share = (excess as f64 * count as f64 / total as f64).ceil() as usize;
            let quota = share.min(remaining).min(pool.len());
            for _ in 0..quota {
                let least_representative = index_of_largest_minimal_divergence(
                    &pool,
                    number_of_walks,
                    number_of_top_paths,
                    divergence,
                );
                match least_representative {
                    Some(i) => {
                        pool.swap_remove(i);
                    }
                    None => break,
                }
            }
            remaining -= quota;
        }
        retained.extend(pool.iter().flat_map(|n| n.node_names().iter().cloned()));
    }
    retained
}

fn index_of_largest_minimal_divergence(
    pool: &[NodeClusterWalkStatistics],
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    divergence: Divergence,
) -> Option<usize> {
    if pool.is_empty() {
        return None;
    }
    let mut worst: Option<(usize, f64)> = None;
    for (i, node) in pool.iter().enumerate() {
        let mut minimal = f64::INFINITY;
        for (j, other) in pool.iter().enumerate() {
            if i == j {
                continue;
            }
            let value = divergence_of_top_n_paths(
                node,
                other,
                number_of_walks,
                number_of_top_paths,
                divergence,
            );
            if value < minimal {
                minimal = value;
            }
        }
        if worst.map_or(true, |(_, d)| minimal > d) {
            worst = Some((i, minimal));
        }
    }
    worst.map(|(i, _)| i)
}

fn single_names(single_nodes: &[NodeClusterWalkStatistics]) -> BTreeSet<String> {
    single_nodes
        .iter()
        .flat_map(|n| n.node_names().iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walks::NodeWalkStatistics;

    fn single_with_paths(name: &str, node_type: &str, paths: &[(&str, usize)]) -> NodeClusterWalkStatistics {
        let mut stats = NodeWalkStatistics::new(name, node_type);
        for (path, count) in paths {
            for _ in 0..*count {
                stats.add_path(path);
            }
        }
        NodeClusterWalkStatistics::new(&stats)
    }

    fn person_cluster() -> NodeClusterWalkStatistics {
        let mut cluster = single_with_paths("p1", "person", &[("Knows", 40), ("Likes", 10)]);
        cluster.merge(&single_with_paths("p2", "person", &[("Knows", 42), ("Likes", 8)]));
        cluster
    }

    #[test]
    fn test_community_node_accounting() {
        let community = Community {
            source: "src".to_string(),
            single_nodes: ["src", "a"].iter().map(|s| s.to_string()).collect(),
            clusters: vec![["b", "c"].iter().map(|s| s.to_string()).collect()],
        };
        assert_eq!(community.number_of_single_nodes(), 2);
        assert_eq!(community.number_of_clusters(), 1);
        assert_eq!(community.number_of_nodes(), 4);
        assert!(community.all_nodes().contains("c"));
    }

    #[test]
    fn test_merge_respects_target_cap() {
        let singles = vec![
            single_with_paths("a", "person", &[("Knows", 38), ("Likes", 12)]),
            single_with_paths("b", "person", &[("Knows", 45), ("Likes", 5)]),
            single_with_paths("c", "person", &[("Knows", 39), ("Likes", 11)]),
        ];
        let clusters = vec![person_cluster()];
        let (retained, clusters) = merge_excess_single_nodes(
            singles,
            clusters,
            1,
            50,
            Some(3),
            Divergence::SymmetricKl,
        );
        assert_eq!(retained.len(), 1);
        // The two merged singles ended up in the cluster.
        assert_eq!(clusters[0].number_of_nodes(), 4);
    }

    #[test]
    fn test_merge_never_touches_types_without_clusters() {
        let singles = vec![
            single_with_paths("a", "person", &[("Knows", 40)]),
            single_with_paths("movie1", "movie", &[("Stars", 30)]),
            single_with_paths("movie2", "movie", &[("Stars", 31)]),
        ];
        let clusters = vec![person_cluster()];
        let (retained, _) = merge_excess_single_nodes(
            singles,
            clusters,
            1,
            50,
            Some(3),
            Divergence::SymmetricKl,
        );
        // Only the person single can merge; both movies stay.
        assert!(retained.contains("movie1"));
        assert!(retained.contains("movie2"));
    }

    #[test]
    fn test_prune_drops_the_outlier() {
        let singles = vec![
            single_with_paths("a", "person", &[("Knows", 40), ("Likes", 10)]),
            single_with_paths("b", "person", &[("Knows", 41), ("Likes", 9)]),
            single_with_paths("odd", "person", &[("Knows", 5), ("Hates", 45)]),
        ];
        let retained =
            prune_excess_single_nodes(singles, 2, 50, Some(3), Divergence::SymmetricKl);
        assert_eq!(retained.len(), 2);
        assert!(!retained.contains("odd"));
    }

    #[test]
    fn test_prune_without_excess_is_identity() {
        let singles = vec![single_with_paths("a", "person", &[("Knows", 40)])];
        let retained =
            prune_excess_single_nodes(singles, 5, 50, Some(3), Divergence::SymmetricKl);
        assert_eq!(retained.len(), 1);
    }
}
