//! Error types for the community-construction pipeline.
//!
//! Configuration problems are reported eagerly, before any computation
//! starts. Runtime errors carry the observed statistics that explain the
//! failure so that callers can adjust their configuration.

use std::error::Error;
use std::fmt;

/// A configuration value failed eager validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub parameter: &'static str,
    pub message: String,
}

impl ConfigError {
    pub fn new(parameter: &'static str, message: impl Into<String>) -> Self {
        Self {
            parameter,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration `{}`: {}", self.parameter, self.message)
    }
}

impl Error for ConfigError {}

/// Errors raised by the spectral hierarchical clusterer.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectralError {
    /// The first attempted split already met the stop criterion, so the
    /// clustering would degenerate to a single leaf. Reports the observed
    /// statistics of the attempted split and which threshold to relax.
    RootNotSplit {
        lambda2: f64,
        part_sizes: (usize, usize),
        hint: &'static str,
    },
    /// The eigensolver failed to produce a second eigenpair.
    EigenDecomposition { nodes: usize },
    /// K-means bipartition of the spectral embedding failed.
    KmeansFailed(String),
}

impl fmt::Display for SpectralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralError::RootNotSplit {
                lambda2,
                part_sizes,
                hint,
            } => write!(
                f,
                "no split occurred at the root (lambda2 = {:.4}, attempted part sizes = {} / {}); {}",
                lambda2, part_sizes.0, part_sizes.1, hint
            ),
            SpectralError::EigenDecomposition { nodes } => write!(
                f,
                "failed to compute the second eigenpair for a graph with {} nodes",
                nodes
            ),
            SpectralError::KmeansFailed(msg) => {
                write!(f, "k-means bipartition of the spectral embedding failed: {}", msg)
            }
        }
    }
}

impl Error for SpectralError {}

/// Errors raised while running random walks or accumulating walk statistics.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkError {
    /// The source node is not a member of the sub-hypergraph.
    UnknownSourceNode(String),
    /// A walk repeatedly ended on a node whose only incident hyperedge has
    /// no other member. Reported after the bounded number of retries.
    StuckWalk { node: String, retries: usize },
    /// `average_hitting_time` was computed a second time on the same
    /// statistics object within one session.
    HittingTimeAlreadyComputed(String),
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::UnknownSourceNode(node) => {
                write!(f, "source node `{}` is not in the hypergraph", node)
            }
            WalkError::StuckWalk { node, retries } => write!(
                f,
                "random walk stuck at self-loop trap `{}` after {} retries",
                node, retries
            ),
            WalkError::HittingTimeAlreadyComputed(node) => write!(
                f,
                "average hitting time for `{}` was already computed in this session",
                node
            ),
        }
    }
}

impl Error for WalkError {}

/// Top-level error for the community-construction pipeline.
#[derive(Debug)]
pub enum HyperclusterError {
    Config(ConfigError),
    Spectral(SpectralError),
    Walk(WalkError),
}

impl fmt::Display for HyperclusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HyperclusterError::Config(e) => e.fmt(f),
            HyperclusterError::Spectral(e) => e.fmt(f),
            HyperclusterError::Walk(e) => e.fmt(f),
        }
    }
}

impl Error for HyperclusterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HyperclusterError::Config(e) => Some(e),
            HyperclusterError::Spectral(e) => Some(e),
            HyperclusterError::Walk(e) => Some(e),
        }
    }
}

impl From<ConfigError> for HyperclusterError {
    fn from(e: ConfigError) -> Self {
        HyperclusterError::Config(e)
    }
}

impl From<SpectralError> for HyperclusterError {
    fn from(e: SpectralError) -> Self {
        HyperclusterError::Spectral(e)
    }
}

impl From<WalkError> for HyperclusterError {
    fn from(e: WalkError) -> Self {
        HyperclusterError::Walk(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_not_split_message_reports_statistics() {
        let err = SpectralError::RootNotSplit {
            lambda2: 0.95,
            part_sizes: (2, 6),
            hint: "increase max_lambda2 or decrease min_cluster_size",
        };
        let msg = err.to_string();
        assert!(msg.contains("0.95"));
        assert!(msg.contains("2 / 6"));
        assert!(msg.contains("max_lambda2"));
    }

    #[test]
    fn test_error_conversion_preserves_source() {
        let err: HyperclusterError = WalkError::StuckWalk {
            node: "alice".to_string(),
            retries: 10,
        }
        .into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("alice"));
    }
}
