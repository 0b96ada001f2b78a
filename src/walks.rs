//! Random walks on a sub-hypergraph and the statistics they accumulate.
//!
//! A walk session runs an adaptively-sized batch of truncated random walks
//! from a single source node. Each walk contributes first-hit statistics:
//! the step at which every node was first reached and the path signature
//! (comma-joined predicate labels) that reached it. The number of walks is
//! derived from the desired fractional precision rather than fixed, and is
//! refined once 25% of the theoretical budget has run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;
use rand::Rng;

use crate::config::WalkConfig;
use crate::errors::WalkError;
use crate::hypergraph::Hypergraph;

/// Per-node accumulators for one walk session.
#[derive(Debug, Clone)]
pub struct NodeWalkStatistics {
    name: String,
    node_type: String,
    pub number_of_hits: usize,
    pub accumulated_hitting_time: f64,
    average_hitting_time: Option<f64>,
    pub path_counts: HashMap<String, usize>,
}

impl NodeWalkStatistics {
    pub fn new(name: &str, node_type: &str) -> Self {
        Self {
            name: name.to_string(),
            node_type: node_type.to_string(),
            number_of_hits: 0,
            accumulated_hitting_time: 0.0,
            average_hitting_time: None,
            path_counts: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn add_path(&mut self, path: &str) {
        *self.path_counts.entry(path.to_string()).or_insert(0) += 1;
    }

    /// Finalizes the truncated-hitting-time estimate: walks that never hit
    /// this node are penalized at the truncation length. Must run exactly
    /// once per session.
    pub fn calculate_average_hitting_time(
        &mut self,
        number_of_walks: usize,
        walk_length: usize,
    ) -> Result<(), WalkError> {
        if self.average_hitting_time.is_some() {
            return Err(WalkError::HittingTimeAlreadyComputed(self.name.clone()));
        }
        let misses = (number_of_walks - self.number_of_hits) as f64;
        self.average_hitting_time = Some(
            (self.accumulated_hitting_time + misses * walk_length as f64)
                / number_of_walks as f64,
        );
        Ok(())
    }

    /// The average truncated hitting time, or the truncation length when it
    /// has not been finalized.
    pub fn average_hitting_time(&self) -> f64 {
        self.average_hitting_time.unwrap_or(f64::INFINITY)
    }

    /// The `n` most common paths and their counts, ties broken by path name
    /// for determinism.
    pub fn top_paths(&self, n: usize) -> Vec<(String, usize)> {
        let mut paths: Vec<(String, usize)> = self
            .path_counts
            .iter()
            .map(|(path, &count)| (path.clone(), count))
            .collect();
        paths.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        paths.truncate(n);
        paths
    }
}

/// Aggregated walk statistics of one or more nodes treated as a cluster.
///
/// Merging is purely additive over path counts and node-name sets, so the
/// aggregate is independent of merge order.
#[derive(Debug, Clone)]
pub struct NodeClusterWalkStatistics {
    node_names: BTreeSet<String>,
    node_type: String,
    path_counts: HashMap<String, usize>,
    total_count: usize,
}

impl NodeClusterWalkStatistics {
    pub fn new(node: &NodeWalkStatistics) -> Self {
        let total_count = node.path_counts.values().sum();
        Self {
            node_names: BTreeSet::from([node.name.clone()]),
            node_type: node.node_type.clone(),
            path_counts: node.path_counts.clone(),
            total_count,
        }
    }

    pub fn from_nodes(nodes: &[&NodeWalkStatistics]) -> Self {
        let mut iter = nodes.iter();
        let mut stats = match iter.next() {
            Some(first) => Self::new(first),
            None => Self {
                node_names: BTreeSet::new(),
                node_type: String::new(),
                path_counts: HashMap::new(),
                total_count: 0,
            },
        };
        for node in iter {
            stats.merge(&Self::new(node));
        }
        stats
    }

    pub fn node_names(&self) -> &BTreeSet<String> {
        &self.node_names
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn number_of_nodes(&self) -> usize {
        self.node_names.len()
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn merge(&mut self, other: &NodeClusterWalkStatistics) {
        self.node_names.extend(other.node_names.iter().cloned());
        for (path, count) in &other.path_counts {
            *self.path_counts.entry(path.clone()).or_insert(0) += count;
        }
        self.total_count += other.total_count;
    }

    /// Distinct paths seen more than once; paths with a single count carry
    /// no distributional signal.
    pub fn number_of_meaningful_paths(&self) -> usize {
        self.path_counts.values().filter(|&&c| c > 1).count()
    }

    /// The probabilities of the `n` most common paths, normalized by the
    /// number of walks per member node. Degenerate clusters with no paths
    /// yield the empty-path distribution `{"" : 0}`.
    pub fn top_n_path_probabilities(
        &self,
        n: usize,
        number_of_walks: usize,
    ) -> BTreeMap<String, f64> {
        if self.total_count == 0 {
            return BTreeMap::from([(String::new(), 0.0)]);
        }
        let denominator = (number_of_walks * self.node_names.len().max(1)) as f64;
        let mut paths: Vec<(&String, &usize)> = self.path_counts.iter().collect();
        paths.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        paths
            .into_iter()
            .take(n)
            .map(|(path, &count)| (path.clone(), count as f64 / denominator))
            .collect()
    }
}

/// The outcome of one walk session from a single source node.
#[derive(Debug)]
pub struct WalkSession {
    pub source: String,
    pub statistics: BTreeMap<String, NodeWalkStatistics>,
    pub number_of_walks: usize,
    pub walk_length: usize,
}

/// Runs truncated random walks on a sub-hypergraph, sized so that hitting
/// times and the top-`M` path probabilities reach fractional precision
/// `epsilon`.
pub struct RandomWalker<'a> {
    hypergraph: &'a Hypergraph,
    config: &'a WalkConfig,
    walk_length: usize,
    walks_for_hitting_times: usize,
    max_number_of_walks: usize,
}

// Fraction of the theoretical walk budget always completed before the
// budget is refined against the observed number of distinct paths.
const REFINEMENT_FRACTION: f64 = 0.25;

impl<'a> RandomWalker<'a> {
    pub fn new(hypergraph: &'a Hypergraph, config: &'a WalkConfig) -> Self {
        let walk_length = match hypergraph.estimated_diameter {
            Some(diameter) => {
                ((config.walk_length_factor * diameter).round() as usize).max(2)
            }
            None => config.max_path_length,
        };
        let walks_for_hitting_times =
            walks_for_truncated_hitting_times(walk_length, config.epsilon);
        let walks_for_path_distribution = walks_for_path_distribution(
            config.max_num_paths,
            config.epsilon,
            theoretical_path_bound(hypergraph.number_of_predicates(), walk_length),
        );
        Self {
            hypergraph,
            config,
            walk_length,
            walks_for_hitting_times,
            max_number_of_walks: walks_for_hitting_times.max(walks_for_path_distribution),
        }
    }

    pub fn walk_length(&self) -> usize {
        self.walk_length
    }

    pub fn max_number_of_walks(&self) -> usize {
        self.max_number_of_walks
    }

    /// Runs the full walk session from `source` with the given rng.
    pub fn run<R: Rng + ?Sized>(
        &self,
        source: &str,
        rng: &mut R,
    ) -> Result<WalkSession, WalkError> {
        if !self.hypergraph.contains_node(source) {
            return Err(WalkError::UnknownSourceNode(source.to_string()));
        }

        let mut statistics: BTreeMap<String, NodeWalkStatistics> = self
            .hypergraph
            .nodes()
            .map(|(name, info)| {
                (
                    name.to_string(),
                    NodeWalkStatistics::new(name, &info.node_type),
                )
            })
            .collect();

        let initial_walks =
            ((self.max_number_of_walks as f64 * REFINEMENT_FRACTION) as usize).max(1);
        for _ in 0..initial_walks {
            self.run_one_walk(source, rng, &mut statistics)?;
        }

        // The theoretical bound on distinct paths is loose; re-derive the
        // path-distribution budget from the paths actually observed.
        let observed_paths = count_unique_paths(&statistics).max(1);
        let refined_walks_for_paths = walks_for_path_distribution(
            self.config.max_num_paths,
            self.config.epsilon,
            observed_paths as f64,
        );
        let target = self
            .walks_for_hitting_times
            .max(refined_walks_for_paths)
            .max(initial_walks);
        for _ in initial_walks..target {
            self.run_one_walk(source, rng, &mut statistics)?;
        }

        debug!(
            "walk session from {} finished: {} walks of length {} ({} distinct paths)",
            source,
            target,
            self.walk_length,
            count_unique_paths(&statistics)
        );

        for stats in statistics.values_mut() {
            stats.calculate_average_hitting_time(target, self.walk_length)?;
        }

        Ok(WalkSession {
            source: source.to_string(),
            statistics,
            number_of_walks: target,
            walk_length: self.walk_length,
        })
    }

    /// Runs a single walk, committing its first-hit records only if the
    /// walk completes. A walk that strands on a memberless hyperedge is
    /// retried a bounded number of times.
    fn run_one_walk<R: Rng + ?Sized>(
        &self,
        source: &str,
        rng: &mut R,
        statistics: &mut BTreeMap<String, NodeWalkStatistics>,
    ) -> Result<(), WalkError> {
        let mut retries = 0;
        loop {
            match self.attempt_walk(source, rng) {
                Ok(hits) => {
                    for (node, step, path) in hits {
                        if let Some(stats) = statistics.get_mut(&node) {
                            stats.number_of_hits += 1;
                            stats.accumulated_hitting_time += step as f64;
                            stats.add_path(&path);
                        }
                    }
                    return Ok(());
                }
                Err(stuck_node) => {
                    retries += 1;
                    if retries > self.config.max_stuck_retries {
                        return Err(WalkError::StuckWalk {
                            node: stuck_node,
                            retries: self.config.max_stuck_retries,
                        });
                    }
                }
            }
        }
    }

    /// One truncated walk. Returns the first-hit records `(node, hitting
    /// step, path signature)`, or the stranding node if the walk got stuck.
    fn attempt_walk<R: Rng + ?Sized>(
        &self,
        source: &str,
        rng: &mut R,
    ) -> Result<Vec<(String, usize, String)>, String> {
        let mut current = source.to_string();
        let mut encountered: HashSet<String> = HashSet::new();
        let mut path = String::new();
        let mut hits = Vec::new();

        for step in 0..self.walk_length {
            let (predicate, next) = self
                .hypergraph
                .random_edge_and_neighbor(&current, rng)
                .ok_or_else(|| current.clone())?;
            if !path.is_empty() {
                path.push(',');
            }
            path.push_str(predicate);

            if !encountered.contains(next) {
                hits.push((next.to_string(), step + 1, path.clone()));
                encountered.insert(next.to_string());
            }
            current = next.to_string();
        }

        Ok(hits)
    }
}

/// Walks needed to estimate average truncated hitting times of length-`l`
/// walks to fractional precision `epsilon`.
pub fn walks_for_truncated_hitting_times(walk_length: usize, epsilon: f64) -> usize {
    let l = walk_length as f64;
    ((l - 1.0).powi(2) / (4.0 * epsilon * epsilon)).ceil() as usize
}

/// Upper bound on the number of distinct path signatures reachable in at
/// most `walk_length` steps with `predicates` distinct labels.
pub fn theoretical_path_bound(predicates: usize, walk_length: usize) -> f64 {
    let r = predicates as f64;
    if predicates > 1 {
        1.0 + r * (r.powi(walk_length as i32) - 1.0) / (r - 1.0)
    } else {
        1.0 + walk_length as f64
    }
}

/// Walks needed to resolve the probabilities of the `m` most common paths
/// to fractional precision `epsilon`, given `unique_paths` as the bound on
/// distinct path signatures.
pub fn walks_for_path_distribution(m: usize, epsilon: f64, unique_paths: f64) -> usize {
    let count = (m as f64 + 1.0).min(unique_paths + 1.0);
    let walks = count * unique_paths.max(1.0).ln() / (epsilon * epsilon);
    walks.ceil().max(0.0) as usize
}

fn count_unique_paths(statistics: &BTreeMap<String, NodeWalkStatistics>) -> usize {
    let mut unique: HashSet<&str> = HashSet::new();
    for stats in statistics.values() {
        unique.extend(stats.path_counts.keys().map(String::as_str));
    }
    unique.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_hypergraph() -> Hypergraph {
        let mut hg = Hypergraph::new();
        for (a, b) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")] {
            hg.add_hyperedge("Knows", &[(a, "person"), (b, "person")]);
        }
        hg
    }

    fn fast_config() -> WalkConfig {
        WalkConfig {
            epsilon: 0.3,
            max_num_paths: 20,
            max_path_length: 4,
            ..WalkConfig::default()
        }
    }

    #[test]
    fn test_hitting_times_stay_within_walk_length() {
        let hg = small_hypergraph();
        let config = fast_config();
        let walker = RandomWalker::new(&hg, &config);
        let mut rng = StdRng::seed_from_u64(11);
        let session = walker.run("a", &mut rng).unwrap();
        for stats in session.statistics.values() {
            let h = stats.average_hitting_time();
            assert!(h >= 0.0 && h <= session.walk_length as f64);
        }
    }

    #[test]
    fn test_average_hitting_time_computed_exactly_once() {
        let mut stats = NodeWalkStatistics::new("a", "person");
        stats.number_of_hits = 3;
        stats.accumulated_hitting_time = 6.0;
        stats.calculate_average_hitting_time(10, 5).unwrap();
        // 3 hits at average step 2, 7 misses penalized at length 5.
        assert!((stats.average_hitting_time() - 4.1).abs() < 1e-12);
        let err = stats.calculate_average_hitting_time(10, 5).unwrap_err();
        assert!(matches!(err, WalkError::HittingTimeAlreadyComputed(_)));
    }

    #[test]
    fn test_unknown_source_node_is_rejected() {
        let hg = small_hypergraph();
        let config = fast_config();
        let walker = RandomWalker::new(&hg, &config);
        let mut rng = StdRng::seed_from_u64(1);
        let err = walker.run("zz", &mut rng).unwrap_err();
        assert!(matches!(err, WalkError::UnknownSourceNode(_)));
    }

    #[test]
    fn test_self_loop_trap_reports_stuck_walk() {
        let mut hg = Hypergraph::new();
        hg.add_hyperedge("Lonely", &[("solo", "person")]);
        let config = fast_config();
        let walker = RandomWalker::new(&hg, &config);
        let mut rng = StdRng::seed_from_u64(1);
        let err = walker.run("solo", &mut rng).unwrap_err();
        assert!(matches!(err, WalkError::StuckWalk { .. }));
    }

    #[test]
    fn test_cluster_merge_is_order_independent() {
        let mut a = NodeWalkStatistics::new("a", "person");
        a.add_path("Knows");
        a.add_path("Knows");
        a.add_path("Knows,Likes");
        let mut b = NodeWalkStatistics::new("b", "person");
        b.add_path("Knows");
        b.add_path("Likes");

        let mut ab = NodeClusterWalkStatistics::new(&a);
        ab.merge(&NodeClusterWalkStatistics::new(&b));
        let mut ba = NodeClusterWalkStatistics::new(&b);
        ba.merge(&NodeClusterWalkStatistics::new(&a));

        assert_eq!(ab.total_count(), ba.total_count());
        assert_eq!(ab.node_names(), ba.node_names());
        assert_eq!(
            ab.top_n_path_probabilities(10, 100),
            ba.top_n_path_probabilities(10, 100)
        );
    }

    #[test]
    fn test_empty_cluster_probabilities_fall_back_to_empty_path() {
        let empty = NodeWalkStatistics::new("a", "person");
        let cluster = NodeClusterWalkStatistics::new(&empty);
        let probabilities = cluster.top_n_path_probabilities(5, 100);
        assert_eq!(probabilities.len(), 1);
        assert_eq!(probabilities.get(""), Some(&0.0));
    }

    #[test]
    fn test_walk_budget_grows_as_precision_tightens() {
        let loose = walks_for_truncated_hitting_times(5, 0.2);
        let tight = walks_for_truncated_hitting_times(5, 0.05);
        assert!(tight > loose);

        let loose = walks_for_path_distribution(50, 0.2, 100.0);
        let tight = walks_for_path_distribution(50, 0.05, 100.0);
        assert!(tight > loose);
    }

    #[test]
    fn test_theoretical_path_bound_matches_geometric_series() {
        // R=2, L=3: 1 + 2*(2^3-1)/(2-1) = 15
        assert!((theoretical_path_bound(2, 3) - 15.0).abs() < 1e-12);
        // single predicate collapses to 1 + L
        assert!((theoretical_path_bound(1, 5) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_paths_are_sorted_by_count() {
        let mut stats = NodeWalkStatistics::new("a", "person");
        for _ in 0..3 {
            stats.add_path("Knows");
        }
        stats.add_path("Likes");
        let top = stats.top_paths(2);
        assert_eq!(top[0], ("Knows".to_string(), 3));
        assert_eq!(top[1], ("Likes".to_string(), 1));
    }
}
