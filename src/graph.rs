//! Weighted undirected graph derived from a hypergraph by clique expansion.

use nalgebra::{DMatrix, DVector};

/// A weighted undirected graph with a dense symmetric adjacency matrix.
///
/// Node identity is positional; `names` maps positions back to hypergraph
/// node names.
#[derive(Debug, Clone)]
pub struct Graph {
    names: Vec<String>,
    adjacency: DMatrix<f64>,
}

impl Graph {
    pub fn new(names: Vec<String>, adjacency: DMatrix<f64>) -> Self {
        debug_assert_eq!(names.len(), adjacency.nrows());
        debug_assert_eq!(adjacency.nrows(), adjacency.ncols());
        Self { names, adjacency }
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn adjacency(&self) -> &DMatrix<f64> {
        &self.adjacency
    }

    /// Weighted degree of every vertex.
    pub fn degrees(&self) -> DVector<f64> {
        let n = self.node_count();
        DVector::from_fn(n, |i, _| self.adjacency.row(i).sum())
    }

    pub fn total_volume(&self) -> f64 {
        self.degrees().sum()
    }

    /// The induced subgraph on the given vertex positions.
    pub fn subgraph(&self, indices: &[usize]) -> Graph {
        let names = indices.iter().map(|&i| self.names[i].clone()).collect();
        let k = indices.len();
        let adjacency =
            DMatrix::from_fn(k, k, |r, c| self.adjacency[(indices[r], indices[c])]);
        Graph::new(names, adjacency)
    }
}
