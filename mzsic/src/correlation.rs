//! Correlation coefficients for comparing binned spectra
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Correlations over fewer non-zero points than this are reported as zero
pub const MINIMUM_NONZERO_POINTS: usize = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    KendallTau,
}

fn nonzero_count(values: &[f64]) -> usize {
    values.iter().filter(|v| **v != 0.0).count()
}

/// Correlate two equal-length series with `method`.
///
/// Returns zero when either series has fewer than [`MINIMUM_NONZERO_POINTS`] non-zero
/// values, when either has no variance, or when the lengths differ.
pub fn correlate(x: &[f64], y: &[f64], method: CorrelationMethod) -> f64 {
    if x.len() != y.len() {
        warn!(
            "Cannot correlate series of different lengths ({} and {})",
            x.len(),
            y.len()
        );
        return 0.0;
    }
    if nonzero_count(x) < MINIMUM_NONZERO_POINTS || nonzero_count(y) < MINIMUM_NONZERO_POINTS {
        return 0.0;
    }
    match method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => spearman(x, y),
        CorrelationMethod::KendallTau => kendall_tau_b(x, y),
    }
}

/// Pearson's r. Zero if either series is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// One-based ranks, with tied values sharing the average of their ranks
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }
    ranks
}

pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Kendall's tau-b, which corrects for ties in either series
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut ties_x = 0i64;
    let mut ties_y = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx == 0.0 && dy == 0.0 {
                continue;
            } else if dx == 0.0 {
                ties_x += 1;
            } else if dy == 0.0 {
                ties_y += 1;
            } else if dx.signum() == dy.signum() {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }
    let denom = (((concordant + discordant + ties_x) as f64)
        * ((concordant + discordant + ties_y) as f64))
        .sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (concordant - discordant) as f64 / denom
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0, 12.0];
        assert!((correlate(&x, &y, CorrelationMethod::Pearson) - 1.0).abs() < 1e-12);
        let neg: Vec<f64> = y.iter().rev().copied().collect();
        assert!((correlate(&x, &neg, CorrelationMethod::Pearson) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[3.0; 6]), 0.0);
    }

    #[test]
    fn test_sparse_is_zero() {
        let x = [1.0, 2.0, 3.0, 4.0, 0.0, 0.0];
        let y = [1.0, 2.0, 3.0, 4.0, 0.0, 0.0];
        assert_eq!(correlate(&x, &y, CorrelationMethod::Pearson), 0.0);
        assert_eq!(correlate(&x, &y, CorrelationMethod::Spearman), 0.0);
        assert_eq!(correlate(&x, &[1.0], CorrelationMethod::Pearson), 0.0);
    }

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 5.0]), vec![2.5, 4.0, 2.5, 1.0]);
    }

    #[test]
    fn test_rank_methods() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 25.0];
        assert!((correlate(&x, &y, CorrelationMethod::Spearman) - 1.0).abs() < 1e-12);
        assert!((correlate(&x, &y, CorrelationMethod::KendallTau) - 1.0).abs() < 1e-12);
        let z = [5.0, 4.0, 3.0, 1.0, 2.0];
        // 9 discordant pairs and 1 concordant
        assert!((kendall_tau_b(&x, &z) + 0.8).abs() < 1e-12);
    }
}
