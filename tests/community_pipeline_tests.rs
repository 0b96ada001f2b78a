//! End-to-end pipeline tests on a small two-household social hypergraph.

use std::collections::BTreeSet;

use hypercluster::config::{ClustererConfig, WalkConfig};
use hypercluster::{CommunityAssembler, CommunityConfig, Hypergraph};

/// Eight people in two tightly-knit households joined by two
/// acquaintances, 22 hyperedges in total: all six `Friends` pairs within
/// each household, all four `Dinner` triples within each household, and
/// two cross-household `Knows` edges.
fn two_household_hypergraph() -> Hypergraph {
    let mut hg = Hypergraph::new();
    let households = [["ann", "bea", "cal", "dov"], ["eva", "fin", "gil", "hal"]];

    for household in &households {
        for i in 0..4 {
            for j in (i + 1)..4 {
                hg.add_hyperedge(
                    "Friends",
                    &[(household[i], "person"), (household[j], "person")],
                );
            }
        }
        for skip in 0..4 {
            let diners: Vec<(&str, &str)> = (0..4)
                .filter(|&i| i != skip)
                .map(|i| (household[i], "person"))
                .collect();
            hg.add_hyperedge("Dinner", &diners);
        }
    }

    hg.add_hyperedge("Knows", &[("ann", "person"), ("eva", "person")]);
    hg.add_hyperedge("Knows", &[("dov", "person"), ("hal", "person")]);
    hg
}

fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pipeline_config() -> CommunityConfig {
    CommunityConfig {
        clustering: ClustererConfig {
            min_cluster_size: 3,
            max_lambda2: 0.7,
            ..ClustererConfig::default()
        },
        walks: WalkConfig {
            epsilon: 0.3,
            max_num_paths: 20,
            ..WalkConfig::default()
        },
        ..CommunityConfig::default()
    }
}

#[test]
fn test_hypergraph_has_the_expected_shape() {
    let hg = two_household_hypergraph();
    assert_eq!(hg.number_of_nodes(), 8);
    assert_eq!(hg.number_of_edges(), 22);
    assert_eq!(hg.number_of_predicates(), 3);
}

#[test]
fn test_leaf_sizes_sum_to_the_node_count() {
    init_test_logging();
    let hg = two_household_hypergraph();
    let config = pipeline_config();
    let communities = CommunityAssembler::new(&hg, &config)
        .with_seed(42)
        .assemble()
        .unwrap();

    assert!(communities.len() >= 2);
    let total: usize = communities.iter().map(|c| c.len()).sum();
    assert_eq!(total, 8);
    for leaf in &communities {
        assert!(!leaf.is_empty());
    }
}

#[test]
fn test_every_community_is_complete_and_self_contained() {
    init_test_logging();
    let hg = two_household_hypergraph();
    let config = pipeline_config();
    let communities = CommunityAssembler::new(&hg, &config)
        .with_seed(42)
        .assemble()
        .unwrap();

    for leaf in &communities {
        // A leaf's communities all draw from the same node pool, so each
        // community's members must come from the leaf's own sources.
        let leaf_nodes: BTreeSet<&String> = leaf.iter().map(|(source, _)| source).collect();
        for (source, community) in leaf.iter() {
            assert_eq!(&community.source, source);
            assert!(community.single_nodes.contains(source));

            // No node appears both as a single and inside a cluster.
            let mut seen = community.single_nodes.clone();
            for cluster in &community.clusters {
                for node in cluster {
                    assert!(seen.insert(node.clone()), "{} appears twice", node);
                }
            }
            for node in community.all_nodes() {
                assert!(leaf_nodes.contains(&node), "{} is outside the leaf", node);
            }
        }
    }
}

#[test]
fn test_households_are_separated_by_the_spectral_stage() {
    init_test_logging();
    let hg = two_household_hypergraph();
    let config = pipeline_config();
    let communities = CommunityAssembler::new(&hg, &config)
        .with_seed(42)
        .assemble()
        .unwrap();

    let first: BTreeSet<&str> = ["ann", "bea", "cal", "dov"].into_iter().collect();
    for leaf in &communities {
        let sources: BTreeSet<&str> = leaf.iter().map(|(s, _)| s.as_str()).collect();
        // Each leaf stays inside one household.
        assert!(
            sources.iter().all(|s| first.contains(s))
                || sources.iter().all(|s| !first.contains(s)),
            "leaf mixes households: {:?}",
            sources
        );
    }
}
