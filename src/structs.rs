//! Consolidated public types for the medlens crate
//!
//! This module contains the record model, engine results and the error type
//! shared across the crate. Behaviour lives next to the code that owns it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum LensError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Computation cancelled: {0}")]
    Cancelled(String),

    #[error("ML error: {0}")]
    Ml(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LensError {
    /// Stable machine-readable kind used in structured error responses
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) | Self::Config(_) => "invalid_input",
            Self::InsufficientData(_) => "insufficient_data",
            Self::Unavailable(_) | Self::Io(_) | Self::Json(_) | Self::Csv(_) => "unavailable",
            Self::Cancelled(_) => "cancelled",
            Self::Ml(_) => "computation_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

// ============================================================================
// Availability
// ============================================================================

/// Outcome of one dashboard component.
///
/// Components that cannot produce a result report why instead of failing the
/// whole dashboard, so the renderer can show a neutral placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Availability<T> {
    Ready(T),
    /// Degenerate data: zero samples, zero variance, empty selection
    Insufficient(String),
    /// External resource missing or malformed
    Unavailable(String),
}

impl<T> Availability<T> {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Placeholder text shown in place of a chart
    #[must_use]
    pub fn placeholder(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Insufficient(reason) | Self::Unavailable(reason) => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Availability<U> {
        match self {
            Self::Ready(value) => Availability::Ready(f(value)),
            Self::Insufficient(reason) => Availability::Insufficient(reason),
            Self::Unavailable(reason) => Availability::Unavailable(reason),
        }
    }
}

impl<T> From<Result<T>> for Availability<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(LensError::InsufficientData(reason)) => Self::Insufficient(reason),
            Err(e) => Self::Unavailable(e.to_string()),
        }
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// One medical case as loaded from the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Age in years; `"unknown"` and null both load as `None`
    #[serde(default, alias = "patient_age", deserialize_with = "de_age")]
    pub age: Option<f64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub modalities: Vec<String>,
    /// Main region -> sub-regions. A flat list loads as main regions only.
    #[serde(default, deserialize_with = "de_regions")]
    pub regions: BTreeMap<String, Vec<String>>,
    /// Section name -> present
    #[serde(default)]
    pub sections: BTreeMap<String, bool>,
    #[serde(default, alias = "addedOn")]
    pub added_on: Option<String>,
    #[serde(default, alias = "imageCount")]
    pub image_count: u32,
    #[serde(default, alias = "wordCount")]
    pub word_count: u32,
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "case id must be a string or number, got {other}"
        ))),
    }
}

fn de_age<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    let age = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(age.filter(|a| a.is_finite()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegionsRepr {
    Nested(BTreeMap<String, Vec<String>>),
    Flat(Vec<String>),
}

fn de_regions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error> {
    Ok(match Option::<RegionsRepr>::deserialize(deserializer)? {
        Some(RegionsRepr::Nested(map)) => map,
        Some(RegionsRepr::Flat(list)) => list.into_iter().map(|r| (r, Vec::new())).collect(),
        None => BTreeMap::new(),
    })
}

/// Record accessor shared by tabulation, matrix-cell filters and cluster summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Gender,
    Modality,
    /// Main regions only
    Region,
    /// Main regions and sub-regions
    RegionAll,
    Diagnosis,
    AgeGroup,
    Section,
}

// ============================================================================
// Tabulation Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyEntry {
    pub label: String,
    pub count: u64,
}

/// Ordered `(label, count)` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrequencyTable {
    pub entries: Vec<FrequencyEntry>,
}

/// Bin layout: ascending bin starts, the last bin is unbounded above
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    pub starts: Vec<f64>,
    /// Display labels, one per bin. Generated when empty.
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub label: String,
    pub start: f64,
    /// Exclusive end; `None` for the open-ended last bin
    pub end: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
    /// Records with no value
    pub unknown: u64,
    /// Values below the first bin start
    pub below_range: u64,
}

/// Symmetric label co-occurrence counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoocMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

/// Row-axis x column-axis counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossTab {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

/// Cross-tab cells as a percentage of their column group's total
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentMatrix {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub group_totals: Vec<u64>,
    pub percents: Vec<Vec<f64>>,
}

// ============================================================================
// Density Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityCurve {
    pub label: String,
    pub sample_count: usize,
    /// `[x, density]` pairs over the evaluation grid
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityEstimate {
    pub bandwidth: f64,
    pub curves: Vec<DensityCurve>,
    /// Cohorts left out, with the reason
    pub skipped: Vec<(String, String)>,
}

// ============================================================================
// Stats Types
// ============================================================================

/// Descriptive statistics for a numeric field
#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub iqr: f64,
}

impl ColumnStats {
    /// Format as a summary string
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: n={}, mean={:.2}, std={:.2}, min={:.2}, Q1={:.2}, median={:.2}, Q3={:.2}, max={:.2}, IQR={:.2}",
            self.name, self.count, self.mean, self.std_dev, self.min, self.q1, self.median, self.q3, self.max, self.iqr
        )
    }
}

// ============================================================================
// Cluster Types
// ============================================================================

/// Record attribute that can take part in clustering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterFeature {
    Age,
    ImageCount,
    WordCount,
    Gender,
    Modality,
    Region,
    HasMultipleImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
    Boolean,
}

/// Columns of the encoded matrix that belong to one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureBlock {
    pub feature: ClusterFeature,
    /// First column of the block
    pub start: usize,
    /// Column labels; one for numeric and boolean features
    pub labels: Vec<String>,
}

impl FeatureBlock {
    #[must_use]
    pub fn width(&self) -> usize {
        self.labels.len()
    }
}

/// Cluster-ready feature matrix, one row per case
#[derive(Debug, Clone)]
pub struct EncodedFeatures {
    pub blocks: Vec<FeatureBlock>,
    pub data: ndarray::Array2<f64>,
    /// Case id of each row
    pub case_ids: Vec<String>,
}

impl EncodedFeatures {
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Column names, prefixed by feature for one-hot slots
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| {
                let name = b.feature.name();
                b.labels.iter().map(move |l| {
                    if l == name {
                        l.clone()
                    } else {
                        format!("{name}={l}")
                    }
                })
            })
            .collect()
    }
}

/// Result of one k-means run
#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    /// Cluster assignment for each encoded row
    pub labels: Vec<usize>,
    /// Number of clusters
    pub k: usize,
    /// Cluster sizes
    pub sizes: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
    pub iterations: usize,
    /// Whether the loop stopped because no assignment changed
    pub converged: bool,
}

impl ClusterResult {
    /// Get summary for text reports
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write as _;

        let mut s = format!(
            "K-means clustering with k={} ({} iterations, inertia {:.4}{})\n",
            self.k,
            self.iterations,
            self.inertia,
            if self.converged { "" } else { ", not converged" }
        );
        for (i, size) in self.sizes.iter().enumerate() {
            let _ = writeln!(s, "  Cluster {i}: {size} cases");
        }
        s
    }
}

/// Per-cluster description for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub label: String,
    pub color: String,
    pub size: usize,
    pub percentage: f64,
    /// Categorical feature -> most common value among members
    pub dominant: BTreeMap<String, String>,
    /// Categorical feature -> value counts among members
    pub distributions: BTreeMap<String, Vec<FrequencyEntry>>,
    /// Numeric feature -> member mean
    pub means: BTreeMap<String, f64>,
    /// Numeric feature -> member standard deviation
    pub stds: BTreeMap<String, f64>,
    /// Boolean feature -> percent of members where it holds
    pub percentages: BTreeMap<String, f64>,
    pub top_diagnoses: Vec<FrequencyEntry>,
}

/// Diagnosis (case-insensitive) -> cluster id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterAssignment {
    by_diagnosis: HashMap<String, usize>,
    labels: BTreeMap<usize, String>,
}

impl ClusterAssignment {
    /// Build from `(diagnosis, cluster)` pairs
    ///
    /// Diagnoses are matched case-insensitively; when several spellings of the
    /// same diagnosis appear, the first one in iteration order keeps its cluster.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, usize)>) -> Self {
        let mut by_diagnosis = HashMap::new();
        for (diagnosis, id) in pairs {
            by_diagnosis.entry(normalize_key(&diagnosis)).or_insert(id);
        }
        Self {
            by_diagnosis,
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<usize, String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn cluster_of(&self, diagnosis: &str) -> Option<usize> {
        self.by_diagnosis.get(&normalize_key(diagnosis)).copied()
    }

    /// Display label, falling back to `Cluster N`
    #[must_use]
    pub fn label(&self, id: usize) -> String {
        self.labels
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Cluster {id}"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_diagnosis.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_diagnosis.is_empty()
    }

    /// Distinct cluster ids, ascending
    #[must_use]
    pub fn cluster_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.by_diagnosis.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Case-insensitive key used for diagnoses and category selections
#[must_use]
pub fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

// ============================================================================
// Layout Types
// ============================================================================

/// One category in the precomputed 2D layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPoint {
    pub key: String,
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}
