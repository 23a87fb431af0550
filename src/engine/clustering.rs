use crate::config::EngineConfig;
use crate::engine::stats::mean;
use crate::engine::tabulation::frequency;
use crate::structs::{
    CaseRecord, ClusterAssignment, ClusterFeature, ClusterResult, ClusterSummary, ColumnStats,
    EncodedFeatures, FeatureKind, LensError, Result,
};
use linfa::metrics::SilhouetteScore;
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOP_DIAGNOSES_PER_CLUSTER: usize = 5;

/// Cooperative cancellation: a shared flag plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also cancel once `timeout` has elapsed from now
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Shared flag, for signal handlers
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// # Errors
    /// Returns `Cancelled` once the flag is set or the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(LensError::Cancelled("cancelled by request".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(LensError::Cancelled("deadline exceeded".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KMeansParams {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Nearest centroid; ties go to the lowest index
fn nearest_centroid(row: &ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (c, centroid) in centroids.outer_iter().enumerate() {
        let distance = squared_distance(row, &centroid);
        if distance < best_distance {
            best_distance = distance;
            best = c;
        }
    }
    best
}

/// Recompute centroids as member means; an empty cluster keeps its centroid
#[allow(clippy::cast_precision_loss)]
fn update_centroids(data: &Array2<f64>, labels: &[usize], centroids: &mut Array2<f64>) {
    let k = centroids.nrows();
    let mut sums = Array2::<f64>::zeros(centroids.dim());
    let mut counts = vec![0usize; k];

    for (row, &label) in data.outer_iter().zip(labels) {
        counts[label] += 1;
        let mut sum = sums.row_mut(label);
        sum += &row;
    }

    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = sums.row(c).mapv(|v| v / count as f64);
            centroids.row_mut(c).assign(&mean);
        }
    }
}

/// Seeded Lloyd k-means over the encoded matrix
///
/// Centroids start by sampling every dimension independently from its
/// observed values. Iterates until no assignment changes or
/// `max_iterations` is reached. The token is checked once per iteration and
/// a cancelled run returns an error, never a partial result.
///
/// # Errors
/// Returns `InvalidInput` for `k == 0` or `max_iterations == 0`,
/// `InsufficientData` when there are
/// fewer rows than clusters, `Cancelled` when the token fires
pub fn kmeans(
    features: &EncodedFeatures,
    params: &KMeansParams,
    cancel: &CancelToken,
) -> Result<ClusterResult> {
    let data = &features.data;
    let (n_samples, n_features) = data.dim();
    let k = params.k;

    if k == 0 {
        return Err(LensError::InvalidInput("k must be at least 1".into()));
    }
    if params.max_iterations == 0 {
        return Err(LensError::InvalidInput("max_iterations must be at least 1".into()));
    }
    if n_samples < k {
        return Err(LensError::InsufficientData(format!(
            "Cannot create {k} clusters with only {n_samples} samples"
        )));
    }

    let mut rng = Pcg64::seed_from_u64(params.seed);
    let mut centroids = Array2::<f64>::zeros((k, n_features));
    for c in 0..k {
        for j in 0..n_features {
            centroids[[c, j]] = data[[rng.random_range(0..n_samples), j]];
        }
    }

    let mut labels = vec![usize::MAX; n_samples];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        cancel.check()?;
        iterations += 1;

        let mut changed = false;
        for (i, row) in data.outer_iter().enumerate() {
            let nearest = nearest_centroid(&row, &centroids);
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
        update_centroids(data, &labels, &mut centroids);
    }

    let inertia: f64 = data
        .outer_iter()
        .zip(&labels)
        .map(|(row, &label)| squared_distance(&row, &centroids.row(label)))
        .sum();

    let mut sizes = vec![0usize; k];
    for &label in &labels {
        sizes[label] += 1;
    }

    tracing::info!(k, iterations, converged, inertia, "k-means finished");

    Ok(ClusterResult {
        labels,
        k,
        sizes,
        centroids: centroids.outer_iter().map(|c| c.to_vec()).collect(),
        inertia,
        iterations,
        converged,
    })
}

/// Mean silhouette coefficient
///
/// `None` with fewer than two non-empty clusters or more than `max_cases` rows.
#[must_use]
pub fn silhouette(features: &EncodedFeatures, result: &ClusterResult, max_cases: usize) -> Option<f64> {
    let non_empty = result.sizes.iter().filter(|&&s| s > 0).count();
    if non_empty < 2 || features.n_samples() > max_cases {
        tracing::debug!(
            non_empty,
            rows = features.n_samples(),
            "skipping silhouette score"
        );
        return None;
    }

    let targets = Array1::from(result.labels.clone());
    let dataset = DatasetBase::new(features.data.clone(), targets);
    match dataset.silhouette_score() {
        Ok(score) => Some(score),
        Err(e) => {
            tracing::warn!("silhouette score failed: {e}");
            None
        }
    }
}

/// Describe each cluster: size, share, category distributions, numeric
/// mean and spread, boolean percentages and top diagnoses
///
/// `records` must be the rows that were encoded, in the same order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_clusters(
    records: &[&CaseRecord],
    features: &[ClusterFeature],
    result: &ClusterResult,
    config: &EngineConfig,
) -> Vec<ClusterSummary> {
    let palette = config.palette_for(result.k);
    let total = records.len();

    (0..result.k)
        .map(|id| {
            let members: Vec<&CaseRecord> = records
                .iter()
                .zip(&result.labels)
                .filter(|(_, label)| **label == id)
                .map(|(record, _)| *record)
                .collect();

            let mut dominant = BTreeMap::new();
            let mut distributions = BTreeMap::new();
            let mut means = BTreeMap::new();
            let mut stds = BTreeMap::new();
            let mut percentages = BTreeMap::new();
            for &feature in features {
                let name = feature.name().to_string();
                let values = || -> Vec<f64> {
                    members.iter().filter_map(|r| feature.raw_value(r)).collect()
                };
                match feature.kind() {
                    FeatureKind::Categorical => {
                        let table = frequency(members.iter().copied(), |r| feature.categories(r));
                        if let Some(top) = table.entries.first() {
                            dominant.insert(name.clone(), top.label.clone());
                        }
                        distributions.insert(name, table.entries);
                    }
                    FeatureKind::Numeric => {
                        if let Ok(stats) = ColumnStats::calculate(&name, &values()) {
                            means.insert(name.clone(), stats.mean);
                            stds.insert(name, stats.std_dev);
                        }
                    }
                    FeatureKind::Boolean => {
                        if let Some(share) = mean(&values()) {
                            percentages.insert(name, share * 100.0);
                        }
                    }
                }
            }

            let top_diagnoses = frequency(members.iter().copied(), |r| {
                r.diagnosis_label().map(str::to_string).into_iter().collect()
            })
            .top(TOP_DIAGNOSES_PER_CLUSTER)
            .entries;

            ClusterSummary {
                id,
                label: format!("Cluster {id}"),
                color: palette.get(id).cloned().unwrap_or_default(),
                size: members.len(),
                percentage: if total == 0 {
                    0.0
                } else {
                    members.len() as f64 / total as f64 * 100.0
                },
                dominant,
                distributions,
                means,
                stds,
                percentages,
                top_diagnoses,
            }
        })
        .collect()
}

impl ClusterAssignment {
    /// Map each diagnosis to the cluster holding most of its cases (ties to the lowest id)
    #[must_use]
    pub fn from_run(records: &[&CaseRecord], result: &ClusterResult) -> Self {
        let mut votes: HashMap<String, Vec<usize>> = HashMap::new();
        for (record, &label) in records.iter().zip(&result.labels) {
            if let Some(key) = record.diagnosis_key() {
                let counts = votes.entry(key).or_insert_with(|| vec![0; result.k]);
                counts[label] += 1;
            }
        }

        Self::new(votes.into_iter().map(|(diagnosis, counts)| {
            let mut best = 0;
            for (id, &count) in counts.iter().enumerate() {
                if count > counts[best] {
                    best = id;
                }
            }
            (diagnosis, best)
        }))
    }
}
