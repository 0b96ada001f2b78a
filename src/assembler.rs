//! End-to-end community assembly.
//!
//! Runs the full pipeline: spectral clustering of the hypergraph into leaf
//! sub-hypergraphs, then one walk-and-cluster job per source node of every
//! leaf. Jobs are independent and dispatched over the rayon pool; each job
//! writes only its own result slot, so the assembled communities are
//! deterministic in content regardless of execution order.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::community::{Communities, Community};
use crate::config::CommunityConfig;
use crate::errors::{HyperclusterError, WalkError};
use crate::hypergraph::Hypergraph;
use crate::spectral::SpectralHierarchicalClusterer;
use crate::symmetry::SymmetryClusterer;
use crate::walks::RandomWalker;

/// Builds the communities of every node of a hypergraph.
pub struct CommunityAssembler<'a> {
    hypergraph: &'a Hypergraph,
    config: &'a CommunityConfig,
    seed: Option<u64>,
}

impl<'a> CommunityAssembler<'a> {
    pub fn new(hypergraph: &'a Hypergraph, config: &'a CommunityConfig) -> Self {
        Self {
            hypergraph,
            config,
            seed: None,
        }
    }

    /// Derives every job's rng from the given seed, making the whole
    /// assembly reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs the pipeline and returns one [`Communities`] per leaf
    /// sub-hypergraph.
    pub fn assemble(&self) -> Result<Vec<Communities>, HyperclusterError> {
        self.config.validate(self.hypergraph)?;

        let start = Instant::now();
        let clusterer =
            SpectralHierarchicalClusterer::new(self.hypergraph, self.config.clustering.clone());
        let mut leaves = clusterer.cluster()?;
        info!(
            "spectral clustering: {} leaves from {} nodes in {:?}",
            leaves.len(),
            self.hypergraph.number_of_nodes(),
            start.elapsed()
        );

        for leaf in &mut leaves {
            if leaf.estimated_diameter.is_none() {
                leaf.estimated_diameter = estimate_diameter(leaf);
            }
        }

        let start = Instant::now();
        info!("assembling communities on {} threads", num_cpus::get());
        let communities = leaves
            .iter()
            .map(|leaf| self.assemble_leaf(leaf))
            .collect::<Result<Vec<Communities>, WalkError>>()?;
        info!(
            "assembled {} communities in {:?}",
            communities.iter().map(Communities::len).sum::<usize>(),
            start.elapsed()
        );

        Ok(communities)
    }

    /// One walk-and-cluster job per source node of a leaf, in parallel.
    /// A leaf with a single node has nothing to walk over; its community
    /// is the source by itself.
    fn assemble_leaf(&self, leaf: &Hypergraph) -> Result<Communities, WalkError> {
        if leaf.number_of_nodes() <= 1 {
            let communities: BTreeMap<String, Community> = leaf
                .node_names()
                .map(|source| {
                    (
                        source.to_string(),
                        Community {
                            source: source.to_string(),
                            single_nodes: BTreeSet::from([source.to_string()]),
                            clusters: Vec::new(),
                        },
                    )
                })
                .collect();
            return Ok(Communities { communities });
        }

        let walker = RandomWalker::new(leaf, &self.config.walks);
        let symmetry =
            SymmetryClusterer::new(&self.config.symmetry, self.config.walks.max_num_paths);
        let sources: Vec<&str> = leaf.node_names().collect();

        let results: Vec<(String, Community)> = sources
            .par_iter()
            .map(|&source| {
                let mut rng = self.rng_for(source);
                let session = walker.run(source, &mut rng)?;
                let community = symmetry.cluster(&session);
                debug!(
                    "community of {}: {} singles, {} clusters",
                    source,
                    community.number_of_single_nodes(),
                    community.number_of_clusters()
                );
                Ok((source.to_string(), community))
            })
            .collect::<Result<Vec<_>, WalkError>>()?;

        let communities: BTreeMap<String, Community> = results.into_iter().collect();
        Ok(Communities { communities })
    }

    fn rng_for(&self, source: &str) -> StdRng {
        match self.seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                source.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_os_rng(),
        }
    }
}

/// Diameter of the leaf's clique expansion by breadth-first search from
/// every node. Unreachable pairs are ignored, so a disconnected leaf gets
/// the largest eccentricity of its components.
fn estimate_diameter(hypergraph: &Hypergraph) -> Option<f64> {
    let graph = hypergraph.to_clique_graph();
    let n = graph.node_count();
    if n == 0 {
        return None;
    }

    let mut diameter = 0usize;
    for start in 0..n {
        let mut distance = vec![usize::MAX; n];
        distance[start] = 0;
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in 0..n {
                if graph.adjacency()[(current, next)] > 0.0 && distance[next] == usize::MAX {
                    distance[next] = distance[current] + 1;
                    queue.push_back(next);
                }
            }
        }
        let eccentricity = distance
            .iter()
            .filter(|&&d| d != usize::MAX)
            .max()
            .copied()
            .unwrap_or(0);
        diameter = diameter.max(eccentricity);
    }

    Some(diameter.max(1) as f64)
}
