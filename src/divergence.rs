//! Divergence measures between discrete path-probability distributions.
//!
//! Distributions are maps from path signature to probability. Terms with
//! zero probability contribute nothing to the sums, so `0 * log(0/x)` is
//! never evaluated.

use std::collections::BTreeMap;

use crate::config::Divergence;
use crate::walks::NodeClusterWalkStatistics;

pub type PathDistribution = BTreeMap<String, f64>;

/// Kullback-Leibler divergence `KL(p || q)`, summed over the paths of `p`
/// that also appear in `q`.
pub fn kl_divergence(p: &PathDistribution, q: &PathDistribution) -> f64 {
    p.iter()
        .filter(|(_, &prob)| prob != 0.0)
        .filter_map(|(path, &prob)| q.get(path).map(|&q_prob| prob * (prob / q_prob).ln()))
        .sum()
}

/// Symmetric Kullback-Leibler divergence
/// `0.5 * KL(p || q) + 0.5 * KL(q || p)`.
pub fn sk_divergence(p: &PathDistribution, q: &PathDistribution) -> f64 {
    0.5 * kl_divergence(p, q) + 0.5 * kl_divergence(q, p)
}

/// Jensen-Shannon divergence against the average distribution
/// `m = 0.5 * (p + q)`.
pub fn js_divergence(p: &PathDistribution, q: &PathDistribution) -> f64 {
    let m = average_distribution(p, q);
    0.5 * kl_divergence(p, &m) + 0.5 * kl_divergence(q, &m)
}

/// The distribution `m := 0.5 * (p + q)` over the union of supports.
pub fn average_distribution(p: &PathDistribution, q: &PathDistribution) -> PathDistribution {
    let mut m: PathDistribution = p
        .iter()
        .map(|(path, &prob)| (path.clone(), 0.5 * prob))
        .collect();
    for (path, &prob) in q {
        *m.entry(path.clone()).or_insert(0.0) += 0.5 * prob;
    }
    m
}

/// Symmetric-KL threshold at which the null hypothesis of two identically
/// distributed path samples of `number_of_walks` draws is rejected at the
/// given z-score. Under the null, the divergence of the empirical
/// distributions has mean `mu_sk = (2/N) * sum(1 - p_i/2)` and variance
/// `sigma_sk^2 = (1/N) * sum(p_i * (2 - p_i))` over the top paths of the
/// average distribution.
pub fn threshold_sk_divergence(
    average: &PathDistribution,
    number_of_top_paths: usize,
    number_of_walks: usize,
    z_score: f64,
) -> f64 {
    let mut probabilities: Vec<f64> = average.values().copied().collect();
    probabilities.sort_by(|a, b| b.total_cmp(a));
    let k = probabilities.len().min(number_of_top_paths);
    let n = number_of_walks as f64;

    let mu_sk: f64 = probabilities[..k].iter().map(|p| 1.0 - p / 2.0).sum::<f64>() * 2.0 / n;
    let sigma_sk_squared: f64 =
        probabilities[..k].iter().map(|p| p * (2.0 - p)).sum::<f64>() / n;

    mu_sk + z_score * sigma_sk_squared.sqrt()
}

/// Jensen-Shannon threshold derived from the symmetric-KL one. For nearby
/// distributions `JS(p, q) ~ SK(p, q) / 4` to second order.
pub fn threshold_js_divergence(
    average: &PathDistribution,
    number_of_top_paths: usize,
    number_of_walks: usize,
    z_score: f64,
) -> f64 {
    threshold_sk_divergence(average, number_of_top_paths, number_of_walks, z_score) / 4.0
}

/// The divergence between the top-path distributions of two clusters.
pub fn divergence_of_top_n_paths(
    cluster1: &NodeClusterWalkStatistics,
    cluster2: &NodeClusterWalkStatistics,
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    divergence: Divergence,
) -> f64 {
    let n = number_of_top_paths.unwrap_or_else(|| {
        cluster1
            .number_of_meaningful_paths()
            .min(cluster2.number_of_meaningful_paths())
            .max(1)
    });
    let p = cluster1.top_n_path_probabilities(n, number_of_walks);
    let q = cluster2.top_n_path_probabilities(n, number_of_walks);
    match divergence {
        Divergence::SymmetricKl => sk_divergence(&p, &q),
        Divergence::JensenShannon => js_divergence(&p, &q),
    }
}

/// The divergence between the top-path distributions of two clusters,
/// together with the merge threshold for the given z-score. A fixed
/// threshold overrides the statistical derivation when supplied.
pub fn divergence_and_threshold_of_top_n_paths(
    cluster1: &NodeClusterWalkStatistics,
    cluster2: &NodeClusterWalkStatistics,
    number_of_walks: usize,
    number_of_top_paths: Option<usize>,
    z_score: f64,
    fixed_threshold: Option<f64>,
    divergence: Divergence,
) -> (f64, f64) {
    let n = number_of_top_paths.unwrap_or_else(|| {
        cluster1
            .number_of_meaningful_paths()
            .min(cluster2.number_of_meaningful_paths())
            .max(1)
    });

    let p = cluster1.top_n_path_probabilities(n, number_of_walks);
    let q = cluster2.top_n_path_probabilities(n, number_of_walks);
    let m = average_distribution(&p, &q);

    let value = match divergence {
        Divergence::SymmetricKl => sk_divergence(&p, &q),
        Divergence::JensenShannon => {
            0.5 * kl_divergence(&p, &m) + 0.5 * kl_divergence(&q, &m)
        }
    };

    let threshold = match fixed_threshold {
        Some(threshold) => threshold,
        None => match divergence {
            Divergence::SymmetricKl => {
                threshold_sk_divergence(&m, n, number_of_walks, z_score)
            }
            Divergence::JensenShannon => {
                threshold_js_divergence(&m, n, number_of_walks, z_score)
            }
        },
    };

    (value, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(entries: &[(&str, f64)]) -> PathDistribution {
        entries
            .iter()
            .map(|(path, prob)| (path.to_string(), *prob))
            .collect()
    }

    #[test]
    fn test_symmetric_kl_golden_value() {
        let p = distribution(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let q = distribution(&[("d", 0.1), ("a", 0.7), ("b", 0.1), ("c", 0.1)]);
        assert!((sk_divergence(&p, &q) - 0.17816581155692948).abs() < 1e-6);
    }

    #[test]
    fn test_jensen_shannon_golden_value() {
        let p = distribution(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let q = distribution(&[("d", 0.1), ("a", 0.7), ("b", 0.1), ("c", 0.1)]);
        assert!((js_divergence(&p, &q) - 0.0776870667970463).abs() < 1e-6);
    }

    #[test]
    fn test_divergences_are_symmetric() {
        let p = distribution(&[("a", 0.6), ("b", 0.4)]);
        let q = distribution(&[("a", 0.2), ("b", 0.8)]);
        assert!((sk_divergence(&p, &q) - sk_divergence(&q, &p)).abs() < 1e-12);
        assert!((js_divergence(&p, &q) - js_divergence(&q, &p)).abs() < 1e-12);
    }

    #[test]
    fn test_self_divergence_is_zero() {
        let p = distribution(&[("a", 0.6), ("b", 0.4)]);
        assert_eq!(sk_divergence(&p, &p), 0.0);
        assert_eq!(js_divergence(&p, &p), 0.0);
    }

    #[test]
    fn test_zero_probability_terms_are_skipped() {
        let p = distribution(&[("a", 0.0), ("b", 1.0)]);
        let q = distribution(&[("a", 0.5), ("b", 0.5)]);
        let kl = kl_divergence(&p, &q);
        assert!(kl.is_finite());
        assert!((kl - (2.0_f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_average_distribution_spans_both_supports() {
        let p = distribution(&[("a", 1.0)]);
        let q = distribution(&[("b", 1.0)]);
        let m = average_distribution(&p, &q);
        assert_eq!(m.get("a"), Some(&0.5));
        assert_eq!(m.get("b"), Some(&0.5));
    }

    #[test]
    fn test_sk_threshold_decreases_with_more_walks() {
        let m = distribution(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let few = threshold_sk_divergence(&m, 3, 100, 1.645);
        let many = threshold_sk_divergence(&m, 3, 10_000, 1.645);
        assert!(many < few);
    }
}
