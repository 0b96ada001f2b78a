//! Community construction for typed, predicate-labeled hypergraphs.
//!
//! A relational database is modeled as a hypergraph whose nodes are the
//! constants (typed) and whose hyperedges are the ground facts (labeled by
//! predicate). The pipeline compresses that hypergraph into per-node
//! communities in three stages:
//!
//! 1. spectral hierarchical clustering splits the hypergraph into leaf
//!    sub-hypergraphs ([`spectral`]),
//! 2. truncated random walks from every source node accumulate hitting
//!    times and path-signature distributions ([`walks`]),
//! 3. nodes that are statistically interchangeable as seen from the source
//!    are grouped into symmetric clusters ([`symmetry`]), yielding one
//!    [`community::Community`] per source node.
//!
//! [`assembler::CommunityAssembler`] runs all three stages end to end.

pub mod assembler;
pub mod community;
pub mod config;
pub mod divergence;
pub mod errors;
pub mod graph;
pub mod hypergraph;
pub mod hypothesis;
pub mod spectral;
pub mod symmetry;
pub mod walks;

pub use assembler::CommunityAssembler;
pub use community::{Communities, Community};
pub use config::{ClustererConfig, CommunityConfig, SymmetryConfig, WalkConfig};
pub use errors::HyperclusterError;
pub use hypergraph::Hypergraph;

use log::LevelFilter;

/// Initializes a basic logger for binaries and examples. Tests and library
/// consumers that bring their own logger should skip this.
pub fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new().with_level(level).init()
}
