//! Epanechnikov kernel density estimates

use crate::structs::{Availability, DensityCurve, DensityEstimate};

pub const MIN_BANDWIDTH: f64 = 3.0;
pub const MAX_BANDWIDTH: f64 = 15.0;
const BANDWIDTH_DIVISOR: f64 = 15.0;
const FLAT_EPSILON: f64 = 1e-12;

pub const NOT_ENOUGH_DATA: &str = "not enough data";
pub const VARIATION_TOO_LOW: &str = "variation too low to plot";

/// `K(u) = 0.75 (1 - u^2)` on `[-1, 1]`, zero outside
#[must_use]
pub fn epanechnikov(u: f64) -> f64 {
    if u.abs() <= 1.0 {
        0.75 * u.mul_add(-u, 1.0)
    } else {
        0.0
    }
}

/// Rule-of-thumb bandwidth: `clamp((max - min) / 15, 3, 15)`
#[must_use]
pub fn auto_bandwidth(samples: &[f64]) -> f64 {
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    if !min.is_finite() || !max.is_finite() {
        return MIN_BANDWIDTH;
    }
    ((max - min) / BANDWIDTH_DIVISOR).clamp(MIN_BANDWIDTH, MAX_BANDWIDTH)
}

/// `density(x) = mean over samples of K((x - s) / h) / h` at each grid point
///
/// Curves evaluated with the same bandwidth share a y-scale.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate(samples: &[f64], grid: &[f64], bandwidth: f64) -> Vec<[f64; 2]> {
    if samples.is_empty() || bandwidth <= 0.0 {
        return grid.iter().map(|&x| [x, 0.0]).collect();
    }
    let n = samples.len() as f64;
    grid.iter()
        .map(|&x| {
            let sum: f64 = samples
                .iter()
                .map(|&s| epanechnikov((x - s) / bandwidth))
                .sum();
            [x, sum / n / bandwidth]
        })
        .collect()
}

fn is_flat(points: &[[f64; 2]]) -> bool {
    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[1]), hi.max(p[1]))
        });
    points.is_empty() || hi - lo <= FLAT_EPSILON
}

fn has_variation(samples: &[f64]) -> bool {
    samples
        .first()
        .is_some_and(|first| samples.iter().any(|s| (s - first).abs() > f64::EPSILON))
}

/// Density curve of one sample set with the automatic bandwidth
#[must_use]
pub fn estimate_samples(label: &str, samples: &[f64], grid: &[f64]) -> Availability<DensityCurve> {
    let samples: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
    if samples.len() < 2 {
        return Availability::Insufficient(NOT_ENOUGH_DATA.into());
    }
    if !has_variation(&samples) {
        return Availability::Insufficient(VARIATION_TOO_LOW.into());
    }
    let points = estimate(&samples, grid, auto_bandwidth(&samples));
    if is_flat(&points) {
        return Availability::Insufficient(VARIATION_TOO_LOW.into());
    }
    Availability::Ready(DensityCurve {
        label: label.to_string(),
        sample_count: samples.len(),
        points,
    })
}

/// One curve per cohort, all with a bandwidth chosen from the pooled samples
///
/// Cohorts with fewer than 2 samples are skipped. If no cohort has a curve,
/// or every curve is flat, the whole estimate is reported as insufficient.
#[must_use]
pub fn estimate_cohorts(cohorts: &[(String, Vec<f64>)], grid: &[f64]) -> Availability<DensityEstimate> {
    let mut skipped = Vec::new();
    let mut usable: Vec<(&str, Vec<f64>)> = Vec::new();

    for (label, samples) in cohorts {
        let finite: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
        if finite.len() < 2 {
            skipped.push((label.clone(), NOT_ENOUGH_DATA.to_string()));
        } else {
            usable.push((label.as_str(), finite));
        }
    }

    if usable.is_empty() {
        return Availability::Insufficient(NOT_ENOUGH_DATA.into());
    }

    let pooled: Vec<f64> = usable.iter().flat_map(|(_, s)| s.iter().copied()).collect();
    if !has_variation(&pooled) {
        return Availability::Insufficient(VARIATION_TOO_LOW.into());
    }
    let bandwidth = auto_bandwidth(&pooled);

    let curves: Vec<DensityCurve> = usable
        .into_iter()
        .map(|(label, samples)| DensityCurve {
            label: label.to_string(),
            sample_count: samples.len(),
            points: estimate(&samples, grid, bandwidth),
        })
        .collect();

    if curves.iter().all(|c| is_flat(&c.points)) {
        return Availability::Insufficient(VARIATION_TOO_LOW.into());
    }

    tracing::debug!(bandwidth, curves = curves.len(), "density estimate");
    Availability::Ready(DensityEstimate {
        bandwidth,
        curves,
        skipped,
    })
}
