//! Clustering of walk statistics into symmetric node groups.
//!
//! Nodes that look alike from a source node (close truncated hitting
//! times, statistically indistinguishable path distributions) are grouped
//! into clusters; everything else is kept as a representative single node.
//! Only same-typed nodes may ever merge.

use log::{debug, warn};
use nalgebra::{DMatrix, SVD};
use ndarray::Array2;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use linfa::prelude::{Fit, Predict};
use linfa_clustering::KMeans;

use std::collections::BTreeMap;

use crate::community::{merge_excess_single_nodes, prune_excess_single_nodes, Community};
use crate::config::{ClusteringType, SingleNodePolicy, SymmetryConfig};
use crate::divergence::divergence_and_threshold_of_top_n_paths;
use crate::hypothesis::{path_symmetric_nodes_test, test_quality_of_clusters};
use crate::walks::{NodeClusterWalkStatistics, NodeWalkStatistics, WalkSession};

/// Threshold difference in truncated hitting times below which two nodes
/// are distance-symmetric: a two-tailed Student-t bound on the difference
/// of two hitting-time estimates from `number_of_walks` samples.
pub fn compute_theta_sym(alpha: f64, number_of_walks: usize, walk_length: usize) -> f64 {
    let df = (number_of_walks - 1) as f64;
    let spread = (walk_length as f64 - 1.0) / (2.0_f64.sqrt() * number_of_walks as f64);
    match StudentsT::new(0.0, 1.0, df) {
        // two-tailed: alpha split between both tails
        Ok(t) => spread * t.inverse_cdf(1.0 - alpha / 2.0),
        Err(_) => spread,
    }
}

/// Groups the non-source nodes of a walk session into a community of
/// single nodes and symmetric clusters.
pub struct SymmetryClusterer<'a> {
    config: &'a SymmetryConfig,
    /// Cap on paths per node when building path-count features.
    max_num_paths: usize,
}

impl<'a> SymmetryClusterer<'a> {
    pub fn new(config: &'a SymmetryConfig, max_num_paths: usize) -> Self {
        Self {
            config,
            max_num_paths,
        }
    }

    pub fn cluster(&self, session: &WalkSession) -> Community {
        let walk_length = session.walk_length;
        let number_of_walks = session.number_of_walks;
        let theta_sym = self
            .config
            .theta_sym
            .unwrap_or_else(|| compute_theta_sym(self.config.alpha_sym, number_of_walks, walk_length));

        // Relevance filter: drop nodes the walks barely reached.
        let threshold_hitting_time = self.config.theta_hit * walk_length as f64;
        let mut nodes_by_type: BTreeMap<&str, Vec<&NodeWalkStatistics>> = BTreeMap::new();
        for stats in session.statistics.values() {
            if stats.name() == session.source {
                continue;
            }
            if stats.average_hitting_time() < threshold_hitting_time {
                nodes_by_type.entry(stats.node_type()).or_default().push(stats);
            }
        }

        let mut single_nodes: Vec<NodeClusterWalkStatistics> = Vec::new();
        let mut clusters: Vec<NodeClusterWalkStatistics> = Vec::new();

        for nodes in nodes_by_type.into_values() {
            let (distance_singles, distance_groups) =
                group_by_truncated_hitting_times(nodes, theta_sym);
            single_nodes.extend(distance_singles.iter().map(|n| NodeClusterWalkStatistics::new(n)));

            for group in distance_groups {
                let (group_singles, group_clusters) =
                    self.cluster_group(&group, number_of_walks);
                single_nodes.extend(group_singles);
                clusters.extend(group_clusters);
            }
        }

        debug!(
            "community of {}: {} singles, {} clusters before post-processing",
            session.source,
            single_nodes.len(),
            clusters.len()
        );

        let (mut retained_singles, clusters) = match self.config.max_single_nodes {
            Some(cap) => match self.config.single_node_policy {
                SingleNodePolicy::Merge => merge_excess_single_nodes(
                    single_nodes,
                    clusters,
                    cap,
                    number_of_walks,
                    self.config.num_top_paths,
                    self.config.divergence,
                ),
                SingleNodePolicy::Prune => {
                    let retained = prune_excess_single_nodes(
                        single_nodes,
                        cap,
                        number_of_walks,
                        self.config.num_top_paths,
                        self.config.divergence,
                    );
                    (retained, clusters)
                }
            },
            None => {
                let names = single_nodes
                    .iter()
                    .flat_map(|n| n.node_names().iter().cloned())
                    .collect();
                (names, clusters)
            }
        };

        // The source node is always its own representative.
        retained_singles.insert(session.source.clone());

        Community {
            source: session.source.clone(),
            single_nodes: retained_singles,
            clusters: clusters.iter().map(|c| c.node_names().clone()).collect(),
        }
    }

    /// Clusters one distance-symmetric group by path distributions.
    fn cluster_group(
        &self,
        nodes: &[&NodeWalkStatistics],
        number_of_walks: usize,
    ) -> (Vec<NodeClusterWalkStatistics>, Vec<NodeClusterWalkStatistics>) {
        if self.config.divergence_threshold.is_some()
            || self.config.clustering_type == ClusteringType::Agglomerative
        {
            return self.agglomerate(nodes, number_of_walks);
        }

        let (counts, _) = path_count_matrix(nodes, self.max_num_paths);
        if path_symmetric_nodes_test(&counts, number_of_walks, self.config.significance_level) {
            return (Vec::new(), vec![cluster_of(nodes)]);
        }

        if nodes.len() <= self.config.clustering_method_threshold {
            self.agglomerate(nodes, number_of_walks)
        } else {
            self.cluster_by_path_count_features(nodes, &counts, number_of_walks)
        }
    }

    /// Agglomerative merging: repeatedly merge the pair of clusters with
    /// the smallest divergence while that divergence stays below the
    /// (fixed or statistically-derived) threshold.
    fn agglomerate(
        &self,
        nodes: &[&NodeWalkStatistics],
        number_of_walks: usize,
    ) -> (Vec<NodeClusterWalkStatistics>, Vec<NodeClusterWalkStatistics>) {
        let z_score = match Normal::new(0.0, 1.0) {
            Ok(normal) => normal.inverse_cdf(1.0 - self.config.significance_level),
            Err(_) => 0.0,
        };
        let mut clusters: Vec<NodeClusterWalkStatistics> =
            nodes.iter().map(|n| NodeClusterWalkStatistics::new(n)).collect();

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..clusters.len() {
                for j in (i + 1)..clusters.len() {
                    let (value, threshold) = divergence_and_threshold_of_top_n_paths(
                        &clusters[i],
                        &clusters[j],
                        number_of_walks,
                        self.config.num_top_paths,
                        z_score,
                        self.config.divergence_threshold,
                        self.config.divergence,
                    );
                    if value < threshold && best.map_or(true, |(_, _, d)| value < d) {
                        best = Some((i, j, value));
                    }
                }
            }
            match best {
                Some((i, j, _)) => {
                    let absorbed = clusters.swap_remove(j);
                    clusters[i].merge(&absorbed);
                }
                None => break,
            }
        }

        split_singles_and_clusters(clusters)
    }

    /// Clustering for large groups: standardize path counts, reduce with
    /// PCA, then search increasing `k` until every sub-cluster passes the
    /// symmetry test.
    fn cluster_by_path_count_features(
        &self,
        nodes: &[&NodeWalkStatistics],
        counts: &DMatrix<f64>,
        number_of_walks: usize,
    ) -> (Vec<NodeClusterWalkStatistics>, Vec<NodeClusterWalkStatistics>) {
        let features = principal_components(
            &standardize_counts(counts),
            self.config.pca_dim,
        );
        let v = nodes.len();

        let mut labels: Vec<usize> = (0..v).collect();
        for k in 2..v.max(3) {
            let candidate = match self.config.clustering_type {
                ClusteringType::Birch => birch_labels(&features, k, 0.05),
                _ => kmeans_labels(&features, k),
            };
            let candidate = match candidate {
                Some(candidate) => candidate,
                None => {
                    warn!("feature clustering with k = {} failed; trying larger k", k);
                    continue;
                }
            };
            let cluster_counts = counts_per_cluster(counts, &candidate);
            labels = candidate;
            if test_quality_of_clusters(
                &cluster_counts,
                number_of_walks,
                self.config.significance_level,
            ) {
                break;
            }
        }

        let groups = group_by_labels(nodes, &labels);
        split_singles_and_clusters(groups)
    }
}

/// Sorts nodes by average hitting time and starts a new group whenever the
/// gap to the previous node exceeds `theta_sym`. Singleton groups are
/// returned as single nodes.
fn group_by_truncated_hitting_times<'a>(
    mut nodes: Vec<&'a NodeWalkStatistics>,
    theta_sym: f64,
) -> (Vec<&'a NodeWalkStatistics>, Vec<Vec<&'a NodeWalkStatistics>>) {
    if nodes.is_empty() {
        return (Vec::new(), Vec::new());
    }
    nodes.sort_by(|a, b| {
        a.average_hitting_time()
            .total_cmp(&b.average_hitting_time())
            .then_with(|| a.name().cmp(b.name()))
    });

    let mut singles = Vec::new();
    let mut groups = Vec::new();
    let mut current: Vec<&NodeWalkStatistics> = Vec::new();
    let mut previous_hitting_time = nodes[0].average_hitting_time();

    for node in nodes {
        if node.average_hitting_time() - previous_hitting_time < theta_sym {
            current.push(node);
        } else {
            if current.len() == 1 {
                singles.push(current[0]);
            } else {
                groups.push(current.clone());
            }
            current.clear();
            current.push(node);
        }
        previous_hitting_time = node.average_hitting_time();
    }
    if current.len() == 1 {
        singles.push(current[0]);
    } else if !current.is_empty() {
        groups.push(current);
    }

    (singles, groups)
}

/// Path-count table of a group: one row per path (union of each node's top
/// paths, in first-seen order over the sorted nodes), one column per node.
fn path_count_matrix(
    nodes: &[&NodeWalkStatistics],
    max_num_paths: usize,
) -> (DMatrix<f64>, Vec<String>) {
    let mut path_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut paths: Vec<String> = Vec::new();
    let top_paths: Vec<Vec<(String, usize)>> =
        nodes.iter().map(|n| n.top_paths(max_num_paths)).collect();

    for node_paths in &top_paths {
        for (path, _) in node_paths {
            if !path_index.contains_key(path) {
                path_index.insert(path.clone(), paths.len());
                paths.push(path.clone());
            }
        }
    }

    let mut counts = DMatrix::zeros(paths.len(), nodes.len());
    for (j, node_paths) in top_paths.iter().enumerate() {
        for (path, count) in node_paths {
            counts[(path_index[path], j)] = *count as f64;
        }
    }
    (counts, paths)
}

/// Row-standardizes the count matrix and transposes it into one feature
/// vector per node.
fn standardize_counts(counts: &DMatrix<f64>) -> DMatrix<f64> {
    let (p, v) = counts.shape();
    let mut features = DMatrix::zeros(v, p);
    for i in 0..p {
        let mean = counts.row(i).sum() / v as f64;
        for j in 0..v {
            features[(j, i)] = if mean != 0.0 {
                (counts[(i, j)] - mean) / mean
            } else {
                0.0
            };
        }
    }
    features
}

/// PCA via thin SVD of the column-centered feature matrix. Feature spaces
/// already at or below the target dimension pass through unchanged.
fn principal_components(features: &DMatrix<f64>, target_dimension: usize) -> DMatrix<f64> {
    let (v, p) = features.shape();
    if p <= target_dimension {
        return features.clone();
    }

    let mut centered = features.clone();
    for j in 0..p {
        let mean = centered.column(j).sum() / v as f64;
        for i in 0..v {
            centered[(i, j)] -= mean;
        }
    }

    let svd = SVD::new(centered, true, true);
    let k = target_dimension.min(svd.singular_values.len());
    match svd.u {
        Some(u) => {
            let mut components = DMatrix::zeros(v, k);
            for c in 0..k {
                for r in 0..v {
                    components[(r, c)] = u[(r, c)] * svd.singular_values[c];
                }
            }
            components
        }
        None => features.clone(),
    }
}

fn kmeans_labels(features: &DMatrix<f64>, k: usize) -> Option<Vec<usize>> {
    let (v, d) = features.shape();
    let mut records = Array2::zeros((v, d));
    for i in 0..v {
        for j in 0..d {
            records[(i, j)] = features[(i, j)];
        }
    }
    let dataset = linfa::Dataset::from(records);
    let model = KMeans::params(k)
        .n_runs(8)
        .max_n_iterations(30)
        .tolerance(1e-6)
        .fit(&dataset)
        .ok()?;
    Some(model.predict(dataset.records()).to_vec())
}

/// A single-threshold clustering-feature pass followed by k-means on the
/// resulting centroids.
fn birch_labels(features: &DMatrix<f64>, k: usize, threshold: f64) -> Option<Vec<usize>> {
    let (v, d) = features.shape();

    // First pass: absorb each point into the nearest centroid within the
    // threshold, otherwise open a new one.
    let mut centroids: Vec<(Vec<f64>, usize)> = Vec::new();
    let mut assignment = vec![0usize; v];
    for i in 0..v {
        let point: Vec<f64> = (0..d).map(|j| features[(i, j)]).collect();
        let nearest = centroids
            .iter()
            .enumerate()
            .map(|(c, (centroid, _))| (c, euclidean(&point, centroid)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((c, distance)) if distance < threshold => {
                let (centroid, count) = &mut centroids[c];
                *count += 1;
                let weight = 1.0 / *count as f64;
                for j in 0..d {
                    centroid[j] += (point[j] - centroid[j]) * weight;
                }
                assignment[i] = c;
            }
            _ => {
                assignment[i] = centroids.len();
                centroids.push((point, 1));
            }
        }
    }

    if centroids.len() <= k {
        return Some(assignment);
    }

    // Second pass: k-means over the centroids, then relabel the points.
    let mut centroid_matrix = DMatrix::zeros(centroids.len(), d);
    for (c, (centroid, _)) in centroids.iter().enumerate() {
        for j in 0..d {
            centroid_matrix[(c, j)] = centroid[j];
        }
    }
    let centroid_labels = kmeans_labels(&centroid_matrix, k)?;
    Some(assignment.iter().map(|&c| centroid_labels[c]).collect())
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Per-cluster count tables, with rows that are zero for the whole cluster
/// removed.
fn counts_per_cluster(counts: &DMatrix<f64>, labels: &[usize]) -> Vec<DMatrix<f64>> {
    let number_of_clusters = labels.iter().copied().max().map_or(0, |m| m + 1);
    let p = counts.nrows();

    (0..number_of_clusters)
        .map(|cluster| {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == cluster)
                .map(|(j, _)| j)
                .collect();
            let live_rows: Vec<usize> = (0..p)
                .filter(|&i| members.iter().any(|&j| counts[(i, j)] != 0.0))
                .collect();
            DMatrix::from_fn(live_rows.len(), members.len(), |r, c| {
                counts[(live_rows[r], members[c])]
            })
        })
        .collect()
}

fn group_by_labels(
    nodes: &[&NodeWalkStatistics],
    labels: &[usize],
) -> Vec<NodeClusterWalkStatistics> {
    let number_of_clusters = labels.iter().copied().max().map_or(0, |m| m + 1);
    (0..number_of_clusters)
        .filter_map(|cluster| {
            let members: Vec<&NodeWalkStatistics> = nodes
                .iter()
                .zip(labels)
                .filter(|(_, &l)| l == cluster)
                .map(|(n, _)| *n)
                .collect();
            if members.is_empty() {
                None
            } else {
                Some(cluster_of(&members))
            }
        })
        .collect()
}

fn cluster_of(nodes: &[&NodeWalkStatistics]) -> NodeClusterWalkStatistics {
    NodeClusterWalkStatistics::from_nodes(nodes)
}

fn split_singles_and_clusters(
    groups: Vec<NodeClusterWalkStatistics>,
) -> (Vec<NodeClusterWalkStatistics>, Vec<NodeClusterWalkStatistics>) {
    let mut singles = Vec::new();
    let mut clusters = Vec::new();
    for group in groups {
        if group.number_of_nodes() == 1 {
            singles.push(group);
        } else {
            clusters.push(group);
        }
    }
    (singles, clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Divergence;
    use crate::hypergraph::Hypergraph;
    use crate::config::WalkConfig;
    use crate::walks::RandomWalker;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stats_with_hitting_time(name: &str, average: f64) -> NodeWalkStatistics {
        let mut stats = NodeWalkStatistics::new(name, "person");
        stats.number_of_hits = 100;
        stats.accumulated_hitting_time = average * 100.0;
        stats.calculate_average_hitting_time(100, 10).unwrap();
        stats
    }

    #[test]
    fn test_theta_sym_shrinks_with_more_walks() {
        let few = compute_theta_sym(0.1, 100, 5);
        let many = compute_theta_sym(0.1, 10_000, 5);
        assert!(few > 0.0);
        assert!(many < few);
    }

    #[test]
    fn test_hitting_time_grouping_respects_gaps() {
        let a = stats_with_hitting_time("a", 1.0);
        let b = stats_with_hitting_time("b", 1.2);
        let c = stats_with_hitting_time("c", 4.0);
        let (singles, groups) = group_by_truncated_hitting_times(vec![&a, &b, &c], 0.5);
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].name(), "c");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_identical_distributions_agglomerate_into_one_cluster() {
        let mut a = NodeWalkStatistics::new("a", "person");
        let mut b = NodeWalkStatistics::new("b", "person");
        for _ in 0..40 {
            a.add_path("Knows");
            b.add_path("Knows");
        }
        for _ in 0..10 {
            a.add_path("Likes");
            b.add_path("Likes");
        }

        let config = SymmetryConfig::default();
        let clusterer = SymmetryClusterer::new(&config, 100);
        let (singles, clusters) = clusterer.agglomerate(&[&a, &b], 50);
        assert!(singles.is_empty());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].number_of_nodes(), 2);
    }

    #[test]
    fn test_disparate_distributions_stay_single() {
        let mut a = NodeWalkStatistics::new("a", "person");
        let mut b = NodeWalkStatistics::new("b", "person");
        for _ in 0..50 {
            a.add_path("Knows");
        }
        for _ in 0..5 {
            b.add_path("Knows");
        }
        for _ in 0..45 {
            b.add_path("Hates");
        }

        let config = SymmetryConfig {
            divergence_threshold: Some(1e-4),
            divergence: Divergence::SymmetricKl,
            ..SymmetryConfig::default()
        };
        let clusterer = SymmetryClusterer::new(&config, 100);
        let (singles, clusters) = clusterer.agglomerate(&[&a, &b], 50);
        assert_eq!(singles.len(), 2);
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_path_count_matrix_shape_and_counts() {
        let mut a = NodeWalkStatistics::new("a", "person");
        let mut b = NodeWalkStatistics::new("b", "person");
        a.add_path("Knows");
        a.add_path("Knows");
        b.add_path("Likes");
        let (counts, paths) = path_count_matrix(&[&a, &b], 10);
        assert_eq!(counts.shape(), (2, 2));
        assert_eq!(paths.len(), 2);
        let knows_row = paths.iter().position(|p| p == "Knows").unwrap();
        assert_eq!(counts[(knows_row, 0)], 2.0);
        assert_eq!(counts[(knows_row, 1)], 0.0);
    }

    #[test]
    fn test_community_is_complete_and_contains_source() {
        let mut hg = Hypergraph::new();
        for (a, b) in [("s", "a"), ("s", "b"), ("a", "b"), ("b", "c"), ("c", "s")] {
            hg.add_hyperedge("Knows", &[(a, "person"), (b, "person")]);
        }
        let walk_config = WalkConfig {
            epsilon: 0.3,
            max_num_paths: 20,
            max_path_length: 4,
            ..WalkConfig::default()
        };
        let walker = RandomWalker::new(&hg, &walk_config);
        let mut rng = StdRng::seed_from_u64(3);
        let session = walker.run("s", &mut rng).unwrap();

        let config = SymmetryConfig::default();
        let clusterer = SymmetryClusterer::new(&config, walk_config.max_num_paths);
        let community = clusterer.cluster(&session);

        assert!(community.single_nodes.contains("s"));
        let all = community.all_nodes();
        assert_eq!(all.len(), community.number_of_nodes());
        for node in &all {
            assert!(hg.contains_node(node));
        }
    }

    #[test]
    fn test_principal_components_reduce_dimension() {
        let features = DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 0.0, 0.5, //
                0.9, 0.1, 0.4, //
                -1.0, 0.0, -0.5, //
                -0.9, -0.1, -0.4,
            ],
        );
        let reduced = principal_components(&features, 2);
        assert_eq!(reduced.shape(), (4, 2));
    }

    #[test]
    fn test_birch_assigns_nearby_points_together() {
        let features = DMatrix::from_row_slice(
            4,
            2,
            &[0.0, 0.0, 0.01, 0.01, 5.0, 5.0, 5.01, 5.01],
        );
        let labels = birch_labels(&features, 2, 0.05).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }
}
