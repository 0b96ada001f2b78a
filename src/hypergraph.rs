//! Hypergraph data model.
//!
//! A `Hypergraph` represents a relational database as typed nodes connected
//! by labeled hyperedges: one hyperedge per ground fact, labeled with the
//! fact's predicate. The structure owns its own adjacency (node -> incident
//! hyperedges) rather than borrowing from a generic graph library, and
//! exposes exactly the operations the community-construction pipeline needs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use nalgebra::DMatrix;
use rand::Rng;

use crate::graph::Graph;

/// A relation instance: an ordered tuple of node names labeled by a
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperedge {
    pub predicate: String,
    pub nodes: Vec<String>,
}

/// Per-node bookkeeping: the node's type and the indices of its incident
/// hyperedges.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub node_type: String,
    pub memberships: Vec<usize>,
}

/// An undirected hypergraph with typed nodes and predicate-labeled
/// hyperedges.
///
/// Nodes only ever enter through [`Hypergraph::add_hyperedge`], so a node
/// with no incident hyperedge cannot exist.
#[derive(Debug, Clone, Default)]
pub struct Hypergraph {
    nodes: BTreeMap<String, NodeInfo>,
    edges: Vec<Hyperedge>,
    predicates: BTreeSet<String>,
    pub estimated_diameter: Option<f64>,
}

impl Hypergraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one hyperedge given its predicate and `(name, type)` member
    /// tuple, registering any members not seen before.
    pub fn add_hyperedge(&mut self, predicate: &str, members: &[(&str, &str)]) {
        let edge_index = self.edges.len();
        self.edges.push(Hyperedge {
            predicate: predicate.to_string(),
            nodes: members.iter().map(|(name, _)| name.to_string()).collect(),
        });
        self.predicates.insert(predicate.to_string());

        for (name, node_type) in members {
            let info = self.nodes.entry(name.to_string()).or_insert_with(|| NodeInfo {
                node_type: node_type.to_string(),
                memberships: Vec::new(),
            });
            info.memberships.push(edge_index);
        }
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn number_of_predicates(&self) -> usize {
        self.predicates.len()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_type(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).map(|info| info.node_type.as_str())
    }

    /// Node names in deterministic (sorted) order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|name| name.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &NodeInfo)> {
        self.nodes.iter().map(|(name, info)| (name.as_str(), info))
    }

    pub fn edges(&self) -> &[Hyperedge] {
        &self.edges
    }

    pub fn incident_edges(&self, name: &str) -> &[usize] {
        self.nodes
            .get(name)
            .map(|info| info.memberships.as_slice())
            .unwrap_or(&[])
    }

    /// Picks a uniformly random incident hyperedge of `node` that has at
    /// least one other member, then a uniformly random other member of that
    /// edge. Returns the edge's predicate and the chosen neighbor, or `None`
    /// if every incident edge is a self-loop trap.
    pub fn random_edge_and_neighbor<'a, R: Rng + ?Sized>(
        &'a self,
        node: &str,
        rng: &mut R,
    ) -> Option<(&'a str, &'a str)> {
        let info = self.nodes.get(node)?;
        let traversable: Vec<&Hyperedge> = info
            .memberships
            .iter()
            .map(|&idx| &self.edges[idx])
            .filter(|edge| edge.nodes.iter().any(|member| member != node))
            .collect();
        if traversable.is_empty() {
            return None;
        }

        let edge = traversable[rng.random_range(0..traversable.len())];
        let neighbors: Vec<&String> = edge.nodes.iter().filter(|member| *member != node).collect();
        let neighbor = neighbors[rng.random_range(0..neighbors.len())];
        Some((edge.predicate.as_str(), neighbor.as_str()))
    }

    /// Restricts the hypergraph to a subset of its nodes.
    ///
    /// Hyperedges are filtered to the members inside the subset; an edge
    /// survives if at least one member remains, so no node of the subset is
    /// lost. Edges left with a single member are self-loop traps which the
    /// random walker handles with bounded retries.
    pub fn subhypergraph(&self, node_subset: &HashSet<String>) -> Hypergraph {
        let mut sub = Hypergraph::new();
        sub.estimated_diameter = self.estimated_diameter;

        for edge in &self.edges {
            let members: Vec<(&str, &str)> = edge
                .nodes
                .iter()
                .filter(|name| node_subset.contains(*name))
                .map(|name| {
                    let info = &self.nodes[name];
                    (name.as_str(), info.node_type.as_str())
                })
                .collect();
            if !members.is_empty() {
                sub.add_hyperedge(&edge.predicate, &members);
            }
        }

        sub
    }

    /// Converts the hypergraph into a weighted graph by replacing each
    /// k-hyperedge with a k-clique. Multi-edges sum their weights.
    pub fn to_clique_graph(&self) -> Graph {
        let names: Vec<String> = self.nodes.keys().cloned().collect();
        let index: BTreeMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let n = names.len();
        let mut adjacency = DMatrix::zeros(n, n);
        for edge in &self.edges {
            for (a, name_a) in edge.nodes.iter().enumerate() {
                for name_b in edge.nodes.iter().skip(a + 1) {
                    if name_a == name_b {
                        continue;
                    }
                    let i = index[name_a.as_str()];
                    let j = index[name_b.as_str()];
                    adjacency[(i, j)] += 1.0;
                    adjacency[(j, i)] += 1.0;
                }
            }
        }

        Graph::new(names, adjacency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn friends_hypergraph() -> Hypergraph {
        let mut hg = Hypergraph::new();
        hg.add_hyperedge("Friends", &[("alice", "person"), ("bob", "person")]);
        hg.add_hyperedge("Friends", &[("bob", "person"), ("carol", "person")]);
        hg.add_hyperedge("WorksAt", &[("alice", "person"), ("acme", "company")]);
        hg
    }

    #[test]
    fn test_counts_and_predicate_catalog() {
        let hg = friends_hypergraph();
        assert_eq!(hg.number_of_nodes(), 4);
        assert_eq!(hg.number_of_edges(), 3);
        assert_eq!(hg.number_of_predicates(), 2);
        assert_eq!(hg.node_type("acme"), Some("company"));
    }

    #[test]
    fn test_every_node_has_incident_edges() {
        let hg = friends_hypergraph();
        for name in hg.node_names() {
            assert!(!hg.incident_edges(name).is_empty(), "{} has no edges", name);
        }
    }

    #[test]
    fn test_random_neighbor_never_returns_self() {
        let hg = friends_hypergraph();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let (_, neighbor) = hg.random_edge_and_neighbor("bob", &mut rng).unwrap();
            assert_ne!(neighbor, "bob");
        }
    }

    #[test]
    fn test_random_neighbor_on_self_loop_trap() {
        let mut hg = Hypergraph::new();
        hg.add_hyperedge("Lonely", &[("solo", "person")]);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(hg.random_edge_and_neighbor("solo", &mut rng).is_none());
    }

    #[test]
    fn test_subhypergraph_keeps_all_subset_nodes() {
        let hg = friends_hypergraph();
        let subset: HashSet<String> = ["alice", "acme"].iter().map(|s| s.to_string()).collect();
        let sub = hg.subhypergraph(&subset);
        assert_eq!(sub.number_of_nodes(), 2);
        assert!(sub.contains_node("alice"));
        assert!(sub.contains_node("acme"));
        // The Friends edge to bob is restricted to alice alone.
        assert!(sub.edges().iter().any(|e| e.nodes == vec!["alice"]));
    }

    #[test]
    fn test_clique_graph_weights_sum_multi_edges() {
        let mut hg = Hypergraph::new();
        hg.add_hyperedge("Friends", &[("a", "person"), ("b", "person")]);
        hg.add_hyperedge("Colleagues", &[("a", "person"), ("b", "person")]);
        let graph = hg.to_clique_graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.adjacency()[(0, 1)], 2.0);
        assert_eq!(graph.adjacency()[(1, 0)], 2.0);
    }

    #[test]
    fn test_clique_graph_of_triple_edge() {
        let mut hg = Hypergraph::new();
        hg.add_hyperedge("Meeting", &[("a", "person"), ("b", "person"), ("c", "room")]);
        let graph = hg.to_clique_graph();
        assert_eq!(graph.node_count(), 3);
        // Every pair of the 3-hyperedge is connected.
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert_eq!(graph.adjacency()[(i, j)], 1.0);
                }
            }
        }
    }
}
