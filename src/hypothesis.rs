//! Generalized chi-squared hypothesis test for path-symmetric nodes.
//!
//! The null hypothesis is that every node in a cluster draws its paths from
//! one shared distribution. Under the null, the sum of squared deviations
//! of the per-node path counts from the cluster mean follows a weighted sum
//! of chi-squared variables whose weights are the eigenvalues of the count
//! covariance matrix. The critical value of that combination is obtained by
//! Satterthwaite-Welch moment matching onto a single scaled chi-squared.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Covariance matrix of the count residues for `v` nodes over `number_of_walks`
/// walks, given the vector of mean path counts. The counts are multinomial,
/// so the diagonal carries `(c_i/N)(1 - c_i/N)` and the off-diagonal the
/// anti-correlation `-c_i c_j / N^2`, both scaled by `N (1 - 1/V)`.
pub fn covariance_matrix_of_count_residues(
    number_of_walks: usize,
    v: usize,
    c_vector: &DVector<f64>,
) -> DMatrix<f64> {
    let n = number_of_walks as f64;
    let p = c_vector.len();
    let scale = n * (1.0 - 1.0 / v as f64);

    DMatrix::from_fn(p, p, |i, j| {
        if i == j {
            scale * (c_vector[i] / n) * (1.0 - c_vector[j] / n)
        } else {
            -scale * (c_vector[i] * c_vector[j]) / (n * n)
        }
    })
}

/// Appends a row of null counts (walks that produced none of the recorded
/// paths) so that the columns sum to the number of walks.
pub fn append_null_counts(node_path_counts: &DMatrix<f64>, number_of_walks: usize) -> DMatrix<f64> {
    let (p, v) = node_path_counts.shape();
    let mut extended = DMatrix::zeros(p + 1, v);
    extended.rows_mut(0, p).copy_from(node_path_counts);
    for j in 0..v {
        extended[(p, j)] = number_of_walks as f64 - node_path_counts.column(j).sum();
    }
    extended
}

/// Critical value of `Q = sum_k lambda_k * chi2(V)` repeated over the `V`
/// nodes, at the given significance level.
///
/// The exact distribution is a weighted chi-squared combination with no
/// closed form; matching its first two moments onto a scaled chi-squared
/// `g * chi2(h)` gives `g = var / (2 * mean)` and `h = 2 * mean^2 / var`.
pub fn critical_q_value(eigenvalues: &[f64], v: usize, significance_level: f64) -> f64 {
    let df = v as f64;
    // Small negative eigenvalues are numerical noise on a PSD matrix.
    let weights: Vec<f64> = eigenvalues.iter().map(|&l| l.max(0.0)).collect();

    let mean: f64 = df * weights.iter().sum::<f64>() * df;
    let variance: f64 = 2.0 * df * weights.iter().map(|w| w * w).sum::<f64>() * df;
    if mean <= 0.0 || variance <= 0.0 {
        return f64::INFINITY;
    }

    let g = variance / (2.0 * mean);
    let h = 2.0 * mean * mean / variance;
    match ChiSquared::new(h) {
        Ok(chi) => g * chi.inverse_cdf(1.0 - significance_level),
        Err(_) => f64::INFINITY,
    }
}

/// Whether the summed squared deviation of the counts from the cluster
/// means stays below the critical value. Exits early once the sum exceeds
/// it.
pub fn q_test(q_critical: f64, counts: &DMatrix<f64>, means: &DVector<f64>) -> bool {
    let (p, v) = counts.shape();
    let mut q = 0.0;
    for i in 0..p {
        for k in 0..v {
            let residue = means[i] - counts[(i, k)];
            q += residue * residue;
            if q > q_critical {
                return false;
            }
        }
    }
    true
}

/// Tests whether a cluster's path counts are consistent with all nodes
/// being path-symmetric.
///
/// `node_path_counts` has one row per path and one column per node.
/// Degenerate inputs (a single node, or no counts at all) are trivially
/// symmetric.
pub fn path_symmetric_nodes_test(
    node_path_counts: &DMatrix<f64>,
    number_of_walks: usize,
    significance_level: f64,
) -> bool {
    let v = node_path_counts.ncols();
    if v <= 1 {
        return true;
    }
    if node_path_counts.sum() == 0.0 {
        return true;
    }

    let counts = append_null_counts(node_path_counts, number_of_walks);
    let p = counts.nrows();
    let means = DVector::from_fn(p, |i, _| counts.row(i).sum() / v as f64);

    let covariance = covariance_matrix_of_count_residues(number_of_walks, v, &means);
    let eigen = SymmetricEigen::new(covariance);
    let eigenvalues: Vec<f64> = eigen.eigenvalues.iter().copied().collect();

    let q_critical = critical_q_value(&eigenvalues, v, significance_level);
    q_test(q_critical, &counts, &means)
}

/// Whether every cluster in a candidate clustering passes the symmetry
/// test.
pub fn test_quality_of_clusters(
    cluster_path_counts: &[DMatrix<f64>],
    number_of_walks: usize,
    significance_level: f64,
) -> bool {
    cluster_path_counts
        .iter()
        .all(|counts| path_symmetric_nodes_test(counts, number_of_walks, significance_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_count_columns_are_symmetric() {
        let counts = DMatrix::from_row_slice(2, 3, &[40.0, 40.0, 40.0, 30.0, 30.0, 30.0]);
        assert!(path_symmetric_nodes_test(&counts, 100, 0.05));
    }

    #[test]
    fn test_disjoint_count_columns_are_rejected() {
        let counts = DMatrix::from_row_slice(2, 2, &[90.0, 5.0, 5.0, 80.0]);
        assert!(!path_symmetric_nodes_test(&counts, 100, 0.05));
    }

    #[test]
    fn test_single_node_is_trivially_symmetric() {
        let counts = DMatrix::from_row_slice(2, 1, &[90.0, 5.0]);
        assert!(path_symmetric_nodes_test(&counts, 100, 0.05));
    }

    #[test]
    fn test_zero_counts_short_circuit_to_true() {
        let counts = DMatrix::zeros(3, 4);
        assert!(path_symmetric_nodes_test(&counts, 100, 0.05));
    }

    #[test]
    fn test_null_counts_complete_each_column() {
        let counts = DMatrix::from_row_slice(2, 2, &[60.0, 50.0, 30.0, 20.0]);
        let extended = append_null_counts(&counts, 100);
        assert_eq!(extended.nrows(), 3);
        for j in 0..2 {
            assert!((extended.column(j).sum() - 100.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_covariance_diagonal_and_off_diagonal_signs() {
        let means = DVector::from_vec(vec![50.0, 30.0, 20.0]);
        let sigma = covariance_matrix_of_count_residues(100, 4, &means);
        for i in 0..3 {
            assert!(sigma[(i, i)] > 0.0);
            for j in 0..3 {
                if i != j {
                    assert!(sigma[(i, j)] < 0.0);
                    assert!((sigma[(i, j)] - sigma[(j, i)]).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_critical_value_grows_as_significance_shrinks() {
        let eigenvalues = [12.0, 8.0, 3.0];
        let loose = critical_q_value(&eigenvalues, 4, 0.10);
        let strict = critical_q_value(&eigenvalues, 4, 0.01);
        assert!(strict > loose);
    }

    #[test]
    fn test_q_test_exits_on_large_deviation() {
        let counts = DMatrix::from_row_slice(1, 2, &[100.0, 0.0]);
        let means = DVector::from_vec(vec![50.0]);
        assert!(!q_test(100.0, &counts, &means));
        assert!(q_test(10_000.0, &counts, &means));
    }
}
