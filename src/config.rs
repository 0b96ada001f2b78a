//! Configuration surface for the community-construction pipeline.
//!
//! All options are validated eagerly before any computation starts; a bad
//! threshold fails fast with a descriptive [`ConfigError`] instead of
//! surfacing as a confusing numeric result later.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::hypergraph::Hypergraph;

/// Which stop-criterion family terminates the recursive bipartitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCriterion {
    /// Stop splitting a cluster once its second-smallest Laplacian
    /// eigenvalue exceeds `max_lambda2` (no sparse cut exists).
    Eigenvalue,
    /// Stop once either side of a candidate split would fall below
    /// `min_cluster_size` nodes.
    ClusterSize,
    /// Stop once the partition tree reaches `max_depth`.
    TreeDepth,
}

/// Strategy for cutting a clique graph in two. The hypergraph cut is always
/// the normalized hypergraph cut and has no strategy knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphCut {
    /// K-means clustering of the two smallest eigenvectors of the clique
    /// graph's normalized Laplacian.
    KmeansBipartition,
    /// Sweep-set search over the Fiedler vector minimizing conductance.
    SweepSetCheeger,
}

/// Configuration of the spectral hierarchical clusterer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustererConfig {
    pub stop_criterion: StopCriterion,
    pub graph_cut: GraphCut,
    /// Largest permissible second eigenvalue before a graph cluster stops
    /// splitting.
    pub max_lambda2: f64,
    /// Smallest permissible leaf size under the `ClusterSize` criterion.
    pub min_cluster_size: usize,
    /// Maximum tree depth under the `TreeDepth` criterion.
    pub max_depth: usize,
    /// K-means restarts for `KmeansBipartition`.
    pub n_init: usize,
    /// K-means iteration cap for `KmeansBipartition`.
    pub max_iter: usize,
    /// Minimum second eigenvalue of the normalized hypergraph Laplacian
    /// below which a hypergraph cluster stops splitting.
    pub threshold: f64,
    /// Reject a hypergraph split if either part holds at least this
    /// fraction of the parent's nodes; the parent then becomes a leaf.
    pub max_fractional_size: f64,
    /// Bipartition via the hypergraph Laplacian instead of the clique
    /// expansion.
    pub use_hypergraph_cut: bool,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            stop_criterion: StopCriterion::ClusterSize,
            graph_cut: GraphCut::SweepSetCheeger,
            max_lambda2: 0.8,
            min_cluster_size: 3,
            max_depth: 16,
            n_init: 10,
            max_iter: 300,
            threshold: 0.01,
            max_fractional_size: 0.9,
            use_hypergraph_cut: false,
        }
    }
}

impl ClustererConfig {
    pub fn validate(&self, hypergraph: &Hypergraph) -> Result<(), ConfigError> {
        if !(0.0 < self.max_lambda2 && self.max_lambda2 < 2.0) {
            return Err(ConfigError::new(
                "max_lambda2",
                format!("must lie strictly between 0 and 2, got {}", self.max_lambda2),
            ));
        }
        if self.min_cluster_size <= 2 {
            return Err(ConfigError::new(
                "min_cluster_size",
                format!("must be greater than 2, got {}", self.min_cluster_size),
            ));
        }
        if self.min_cluster_size >= hypergraph.number_of_nodes() {
            return Err(ConfigError::new(
                "min_cluster_size",
                format!(
                    "must be smaller than the number of nodes in the hypergraph ({} >= {})",
                    self.min_cluster_size,
                    hypergraph.number_of_nodes()
                ),
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::new("max_depth", "must be at least 1"));
        }
        if self.n_init == 0 {
            return Err(ConfigError::new("n_init", "must be positive"));
        }
        if self.max_iter == 0 {
            return Err(ConfigError::new("max_iter", "must be positive"));
        }
        if self.threshold <= 0.0 {
            return Err(ConfigError::new(
                "threshold",
                format!("must be positive, got {}", self.threshold),
            ));
        }
        if !(0.5 <= self.max_fractional_size && self.max_fractional_size < 1.0) {
            return Err(ConfigError::new(
                "max_fractional_size",
                format!("must lie in [0.5, 1), got {}", self.max_fractional_size),
            ));
        }
        Ok(())
    }
}

/// Configuration of the random walker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Desired fractional precision of the truncated-hitting-time and
    /// path-distribution estimates.
    pub epsilon: f64,
    /// Number of most-frequent paths whose probabilities must be resolved
    /// to precision `epsilon`.
    pub max_num_paths: usize,
    /// Walk length used when the hypergraph's diameter is unknown.
    pub max_path_length: usize,
    /// Walk length is `walk_length_factor` times the estimated diameter
    /// when the diameter is known.
    pub walk_length_factor: f64,
    /// Number of times a fatally-stuck walk is restarted before the
    /// session errors out.
    pub max_stuck_retries: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.05,
            max_num_paths: 100,
            max_path_length: 5,
            walk_length_factor: 1.25,
            max_stuck_retries: 10,
        }
    }
}

impl WalkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.epsilon && self.epsilon < 1.0) {
            return Err(ConfigError::new(
                "epsilon",
                format!("must lie strictly between 0 and 1, got {}", self.epsilon),
            ));
        }
        if self.max_num_paths == 0 {
            return Err(ConfigError::new("max_num_paths", "must be positive"));
        }
        if self.max_path_length < 2 {
            return Err(ConfigError::new(
                "max_path_length",
                format!("must be at least 2, got {}", self.max_path_length),
            ));
        }
        if self.walk_length_factor <= 0.0 {
            return Err(ConfigError::new(
                "walk_length_factor",
                format!("must be positive, got {}", self.walk_length_factor),
            ));
        }
        Ok(())
    }
}

/// Clustering algorithm used on large distance-symmetric groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringType {
    /// Pairwise agglomeration on distribution divergence, regardless of
    /// group size.
    Agglomerative,
    Kmeans,
    Birch,
}

/// Divergence used when comparing path-probability distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    SymmetricKl,
    JensenShannon,
}

/// What to do with excess single nodes after clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleNodePolicy {
    /// Fold excess singles into existing same-typed clusters.
    Merge,
    /// Drop the least representative excess singles.
    Prune,
}

/// Configuration of the symmetry clusterer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetryConfig {
    /// Relevance cutoff: keep nodes whose average hitting time stays below
    /// `theta_hit` times the walk length.
    pub theta_hit: f64,
    /// Fixed distance-symmetry threshold; derived from `alpha_sym` and the
    /// walk statistics when `None`.
    pub theta_sym: Option<f64>,
    /// Significance level of the two-tailed t-bound used to derive
    /// `theta_sym`.
    pub alpha_sym: f64,
    /// Number of top paths compared when computing divergences; `None`
    /// takes the smaller cluster's meaningful path count.
    pub num_top_paths: Option<usize>,
    /// Significance level of the path-symmetry hypothesis test.
    pub significance_level: f64,
    /// Fixed divergence threshold for agglomeration; statistically derived
    /// when `None`.
    pub divergence_threshold: Option<f64>,
    /// Target dimension of the PCA reduction for large groups.
    pub pca_dim: usize,
    /// Groups larger than this use dimensionality-reduced clustering
    /// instead of pairwise agglomeration.
    pub clustering_method_threshold: usize,
    pub clustering_type: ClusteringType,
    pub divergence: Divergence,
    /// Cap on the number of single nodes per community; `None` disables
    /// the merge/prune post-processing.
    pub max_single_nodes: Option<usize>,
    pub single_node_policy: SingleNodePolicy,
}

impl Default for SymmetryConfig {
    fn default() -> Self {
        Self {
            theta_hit: 0.98,
            theta_sym: None,
            alpha_sym: 0.1,
            num_top_paths: Some(5),
            significance_level: 0.05,
            divergence_threshold: None,
            pca_dim: 2,
            clustering_method_threshold: 50,
            clustering_type: ClusteringType::Kmeans,
            divergence: Divergence::SymmetricKl,
            max_single_nodes: None,
            single_node_policy: SingleNodePolicy::Merge,
        }
    }
}

impl SymmetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.theta_hit <= 0.0 {
            return Err(ConfigError::new(
                "theta_hit",
                format!("must be positive, got {}", self.theta_hit),
            ));
        }
        if let Some(theta_sym) = self.theta_sym {
            if theta_sym <= 0.0 {
                return Err(ConfigError::new(
                    "theta_sym",
                    format!("must be positive, got {}", theta_sym),
                ));
            }
        }
        if !(0.0 < self.alpha_sym && self.alpha_sym < 1.0) {
            return Err(ConfigError::new(
                "alpha_sym",
                format!("must lie strictly between 0 and 1, got {}", self.alpha_sym),
            ));
        }
        if !(0.0 < self.significance_level && self.significance_level < 1.0) {
            return Err(ConfigError::new(
                "significance_level",
                format!(
                    "must lie strictly between 0 and 1, got {}",
                    self.significance_level
                ),
            ));
        }
        if let Some(threshold) = self.divergence_threshold {
            if threshold <= 0.0 {
                return Err(ConfigError::new(
                    "divergence_threshold",
                    format!("must be positive, got {}", threshold),
                ));
            }
        }
        if self.pca_dim == 0 {
            return Err(ConfigError::new("pca_dim", "must be positive"));
        }
        if self.clustering_method_threshold < 2 {
            return Err(ConfigError::new(
                "clustering_method_threshold",
                "must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Aggregated configuration for the full pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub clustering: ClustererConfig,
    pub walks: WalkConfig,
    pub symmetry: SymmetryConfig,
}

impl CommunityConfig {
    pub fn validate(&self, hypergraph: &Hypergraph) -> Result<(), ConfigError> {
        self.clustering.validate(hypergraph)?;
        self.walks.validate()?;
        self.symmetry.validate()
    }
}
