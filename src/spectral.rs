//! Spectral hierarchical clustering of a hypergraph.
//!
//! The hypergraph is recursively bi-partitioned into a binary tree of
//! clusters and the leaves are returned as sub-hypergraphs. Two cut
//! families are available: clique-expansion cuts on the graph obtained by
//! replacing every k-hyperedge with a k-clique (Shi-Malik normalized cut,
//! found either by a sweep-set Cheeger search or by k-means on the spectral
//! embedding), and the normalized hypergraph cut of Zhou et al. (2006)
//! which operates on the incidence structure directly.

use std::collections::HashSet;

use linfa::prelude::{Fit, Predict};
use linfa_clustering::KMeans;
use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::Array2;

use crate::config::{ClustererConfig, GraphCut, StopCriterion};
use crate::errors::SpectralError;
use crate::graph::Graph;
use crate::hypergraph::Hypergraph;

/// A cluster held in the partition tree during construction.
///
/// `position` is a binary string: each `'0'` / `'1'` suffix records whether
/// the cluster is the left or right child of its parent, so ancestry is
/// string-prefix containment rather than pointer chasing.
#[derive(Debug, Clone)]
pub struct PartitionTreeNode {
    pub graph: Graph,
    pub position: String,
}

/// Observed statistics of the most recent attempted split, kept so that a
/// degenerate clustering can be diagnosed.
#[derive(Debug, Default)]
struct SplitDiagnostics {
    lambda2: f64,
    part_sizes: (usize, usize),
    hint: &'static str,
}

/// Recursive spectral bi-partitioner producing leaf sub-hypergraphs whose
/// node sets exactly partition the input hypergraph.
pub struct SpectralHierarchicalClusterer<'a> {
    hypergraph: &'a Hypergraph,
    config: ClustererConfig,
}

impl<'a> SpectralHierarchicalClusterer<'a> {
    pub fn new(hypergraph: &'a Hypergraph, config: ClustererConfig) -> Self {
        Self { hypergraph, config }
    }

    /// Runs the clustering and returns the leaf sub-hypergraphs.
    ///
    /// Fails with [`SpectralError::RootNotSplit`] when the very first split
    /// already meets the stop criterion, since a single-leaf clustering
    /// means the stop thresholds need relaxing.
    pub fn cluster(&self) -> Result<Vec<Hypergraph>, SpectralError> {
        let leaves = if self.config.use_hypergraph_cut {
            self.cluster_by_hypergraph_cut()?
        } else {
            self.cluster_by_graph_cut()?
        };
        debug!(
            "spectral clustering produced {} leaves with sizes {:?}",
            leaves.len(),
            leaves.iter().map(Hypergraph::number_of_nodes).collect::<Vec<_>>()
        );
        Ok(leaves)
    }

    fn cluster_by_graph_cut(&self) -> Result<Vec<Hypergraph>, SpectralError> {
        let graph = self.hypergraph.to_clique_graph();
        let total_nodes = graph.node_count();

        let mut leaves: Vec<PartitionTreeNode> = Vec::new();
        let mut diag = SplitDiagnostics::default();
        let root = PartitionTreeNode {
            graph,
            position: String::new(),
        };
        self.split_graph(root, 0, &mut leaves, &mut diag)?;

        if leaves.len() == 1 && leaves[0].graph.node_count() == total_nodes && total_nodes > 1 {
            return Err(SpectralError::RootNotSplit {
                lambda2: diag.lambda2,
                part_sizes: diag.part_sizes,
                hint: diag.hint,
            });
        }

        Ok(leaves
            .iter()
            .map(|leaf| {
                let subset: HashSet<String> = leaf.graph.names().iter().cloned().collect();
                self.hypergraph.subhypergraph(&subset)
            })
            .collect())
    }

    fn split_graph(
        &self,
        node: PartitionTreeNode,
        depth: usize,
        leaves: &mut Vec<PartitionTreeNode>,
        diag: &mut SplitDiagnostics,
    ) -> Result<(), SpectralError> {
        let n = node.graph.node_count();
        if n <= 1 {
            leaves.push(node);
            return Ok(());
        }

        let (lambda2, u1, u2) = second_eigenpair(&node.graph)?;
        diag.lambda2 = lambda2;

        // Cheeger inequality: a large second eigenvalue certifies that no
        // sparse cut exists, regardless of the chosen stop criterion.
        if lambda2 > self.config.max_lambda2 {
            diag.hint = "increase max_lambda2";
            leaves.push(node);
            return Ok(());
        }

        if self.config.stop_criterion == StopCriterion::TreeDepth
            && depth >= self.config.max_depth
        {
            diag.hint = "increase max_depth";
            leaves.push(node);
            return Ok(());
        }

        let (part1, part2) = match self.config.graph_cut {
            GraphCut::SweepSetCheeger => sweep_set_cut(&node.graph, &u2),
            GraphCut::KmeansBipartition => {
                self.kmeans_cut(&node.graph, &u1, &u2)?
            }
        };
        diag.part_sizes = (part1.len(), part2.len());

        if part1.is_empty() || part2.is_empty() {
            diag.hint = "the cut was degenerate; increase max_lambda2";
            leaves.push(node);
            return Ok(());
        }

        if self.config.stop_criterion == StopCriterion::ClusterSize
            && (part1.len() < self.config.min_cluster_size
                || part2.len() < self.config.min_cluster_size)
        {
            diag.hint = "decrease min_cluster_size";
            leaves.push(node);
            return Ok(());
        }

        let left = PartitionTreeNode {
            graph: node.graph.subgraph(&part1),
            position: format!("{}0", node.position),
        };
        let right = PartitionTreeNode {
            graph: node.graph.subgraph(&part2),
            position: format!("{}1", node.position),
        };
        self.split_graph(left, depth + 1, leaves, diag)?;
        self.split_graph(right, depth + 1, leaves, diag)
    }

    fn kmeans_cut(
        &self,
        graph: &Graph,
        u1: &DVector<f64>,
        u2: &DVector<f64>,
    ) -> Result<(Vec<usize>, Vec<usize>), SpectralError> {
        let n = graph.node_count();
        let mut embedding = Array2::zeros((n, 2));
        for i in 0..n {
            embedding[(i, 0)] = u1[i];
            embedding[(i, 1)] = u2[i];
        }

        let dataset = linfa::Dataset::from(embedding);
        let model = KMeans::params(2)
            .n_runs(self.config.n_init)
            .max_n_iterations(self.config.max_iter as u64)
            .tolerance(1e-6)
            .fit(&dataset)
            .map_err(|e| SpectralError::KmeansFailed(e.to_string()))?;
        let labels = model.predict(dataset.records());

        let part1: Vec<usize> = (0..n).filter(|&i| labels[i] == 0).collect();
        let part2: Vec<usize> = (0..n).filter(|&i| labels[i] == 1).collect();
        Ok((part1, part2))
    }

    fn cluster_by_hypergraph_cut(&self) -> Result<Vec<Hypergraph>, SpectralError> {
        let total_nodes = self.hypergraph.number_of_nodes();
        let mut leaves: Vec<Hypergraph> = Vec::new();
        let mut diag = SplitDiagnostics::default();
        self.split_hypergraph(self.hypergraph.clone(), 0, &mut leaves, &mut diag)?;

        if leaves.len() == 1 && leaves[0].number_of_nodes() == total_nodes && total_nodes > 1 {
            return Err(SpectralError::RootNotSplit {
                lambda2: diag.lambda2,
                part_sizes: diag.part_sizes,
                hint: diag.hint,
            });
        }
        Ok(leaves)
    }

    fn split_hypergraph(
        &self,
        hypergraph: Hypergraph,
        depth: usize,
        leaves: &mut Vec<Hypergraph>,
        diag: &mut SplitDiagnostics,
    ) -> Result<(), SpectralError> {
        let n = hypergraph.number_of_nodes();
        if n <= 1 {
            leaves.push(hypergraph);
            return Ok(());
        }
        if self.config.stop_criterion == StopCriterion::ClusterSize
            && n < self.config.min_cluster_size
        {
            diag.hint = "decrease min_cluster_size";
            leaves.push(hypergraph);
            return Ok(());
        }
        if self.config.stop_criterion == StopCriterion::TreeDepth
            && depth >= self.config.max_depth
        {
            diag.hint = "increase max_depth";
            leaves.push(hypergraph);
            return Ok(());
        }

        let delta = normalized_hypergraph_laplacian(&hypergraph);
        let (lambda2, u2) = second_eigenpair_of(&delta)
            .ok_or(SpectralError::EigenDecomposition { nodes: n })?;
        diag.lambda2 = lambda2;

        // A second eigenvalue near zero means the hypergraph is close to
        // disconnected and no longer worth cutting.
        if lambda2 < self.config.threshold {
            diag.hint = "decrease threshold";
            leaves.push(hypergraph);
            return Ok(());
        }

        let names: Vec<&str> = hypergraph.node_names().collect();
        let mut part1: HashSet<String> = HashSet::new();
        let mut part2: HashSet<String> = HashSet::new();
        for (i, name) in names.iter().enumerate() {
            if u2[i] >= 0.0 {
                part1.insert((*name).to_string());
            } else {
                part2.insert((*name).to_string());
            }
        }
        diag.part_sizes = (part1.len(), part2.len());

        let limit = (self.config.max_fractional_size * n as f64).ceil() as usize;
        if part1.is_empty()
            || part2.is_empty()
            || part1.len() >= limit
            || part2.len() >= limit
        {
            diag.hint = "increase max_fractional_size";
            leaves.push(hypergraph);
            return Ok(());
        }

        let left = hypergraph.subhypergraph(&part1);
        let right = hypergraph.subhypergraph(&part2);
        self.split_hypergraph(left, depth + 1, leaves, diag)?;
        self.split_hypergraph(right, depth + 1, leaves, diag)
    }
}

/// The two smallest eigenpairs of the symmetric normalized Laplacian
/// `L_sym = I - D^{-1/2} W D^{-1/2}` of a graph. Returns the second
/// eigenvalue plus the first and second eigenvectors.
fn second_eigenpair(
    graph: &Graph,
) -> Result<(f64, DVector<f64>, DVector<f64>), SpectralError> {
    let n = graph.node_count();
    let degrees = graph.degrees();
    let inv_sqrt: DVector<f64> = degrees.map(|d| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 });

    let mut l_sym = DMatrix::<f64>::identity(n, n);
    for i in 0..n {
        for j in 0..n {
            l_sym[(i, j)] -= inv_sqrt[i] * graph.adjacency()[(i, j)] * inv_sqrt[j];
        }
    }

    let eigen = SymmetricEigen::new(l_sym);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    if order.len() < 2 {
        return Err(SpectralError::EigenDecomposition { nodes: n });
    }

    let u1 = eigen.eigenvectors.column(order[0]).into_owned();
    let u2 = eigen.eigenvectors.column(order[1]).into_owned();
    Ok((eigen.eigenvalues[order[1]], u1, u2))
}

fn second_eigenpair_of(matrix: &DMatrix<f64>) -> Option<(f64, DVector<f64>)> {
    let n = matrix.nrows();
    if n < 2 {
        return None;
    }
    let eigen = SymmetricEigen::new(matrix.clone());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    Some((
        eigen.eigenvalues[order[1]],
        eigen.eigenvectors.column(order[1]).into_owned(),
    ))
}

/// Sweep-set search for the sparsest cut along the Fiedler vector.
///
/// Vertices are sorted by their value in the degree-normalized second
/// eigenvector `v2 = D^{-1/2} u2`; every prefix of that order is a candidate
/// cut and the one minimizing conductance wins.
fn sweep_set_cut(graph: &Graph, u2: &DVector<f64>) -> (Vec<usize>, Vec<usize>) {
    let n = graph.node_count();
    let degrees = graph.degrees();
    let total_volume: f64 = degrees.sum();

    let v2: Vec<f64> = (0..n)
        .map(|i| {
            if degrees[i] > 0.0 {
                u2[i] / degrees[i].sqrt()
            } else {
                u2[i]
            }
        })
        .collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| v2[a].total_cmp(&v2[b]));

    let mut set_volume = 0.0;
    let mut cut_weight = 0.0;
    // x[j] is +1 while j is outside the candidate set, -1 once inside, so
    // row(v) . x is exactly the cut-weight delta from absorbing v.
    let mut x = vec![1.0; n];
    let mut best_index = 0;
    let mut best_conductance = f64::INFINITY;

    for (i, &v) in order.iter().take(n - 1).enumerate() {
        set_volume += degrees[v];
        x[v] = -1.0;
        let delta: f64 = (0..n).map(|j| graph.adjacency()[(v, j)] * x[j]).sum();
        cut_weight += delta;

        let denominator = set_volume.min(total_volume - set_volume);
        let conductance = if denominator > 0.0 {
            cut_weight / denominator
        } else {
            f64::INFINITY
        };
        if conductance < best_conductance {
            best_conductance = conductance;
            best_index = i;
        }
    }

    let part1 = order[..=best_index].to_vec();
    let part2 = order[best_index + 1..].to_vec();
    (part1, part2)
}

/// The normalized hypergraph Laplacian of Zhou et al. (2006),
/// `Delta = I - D_v^{-1/2} M W D_e^{-1} M^T D_v^{-1/2}`, with unit
/// hyperedge weights.
fn normalized_hypergraph_laplacian(hypergraph: &Hypergraph) -> DMatrix<f64> {
    let names: Vec<&str> = hypergraph.node_names().collect();
    let n = names.len();
    let m = hypergraph.number_of_edges();

    let index: std::collections::BTreeMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();

    let mut incidence = DMatrix::zeros(n, m);
    for (j, edge) in hypergraph.edges().iter().enumerate() {
        for node in &edge.nodes {
            incidence[(index[node.as_str()], j)] = 1.0;
        }
    }

    let vertex_degrees: Vec<f64> = (0..n).map(|i| incidence.row(i).sum()).collect();
    let edge_degrees: Vec<f64> = (0..m).map(|j| incidence.column(j).sum()).collect();

    let mut theta = DMatrix::zeros(n, n);
    for j in 0..m {
        if edge_degrees[j] == 0.0 {
            continue;
        }
        for a in 0..n {
            if incidence[(a, j)] == 0.0 {
                continue;
            }
            for b in 0..n {
                if incidence[(b, j)] == 0.0 {
                    continue;
                }
                theta[(a, b)] += 1.0 / edge_degrees[j];
            }
        }
    }
    for a in 0..n {
        for b in 0..n {
            let d = vertex_degrees[a] * vertex_degrees[b];
            theta[(a, b)] = if d > 0.0 { theta[(a, b)] / d.sqrt() } else { 0.0 };
        }
    }

    DMatrix::identity(n, n) - theta
}
