//! Loaders for the precomputed cluster, cluster label and layout files
//!
//! A missing or malformed file makes the dependent feature unavailable; it
//! never fails the rest of the dashboard.

use crate::structs::{Availability, ClusterAssignment, LayoutPoint, LensError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Deserialize)]
struct ClusterFile {
    diagnoses: Vec<String>,
    clusters: Vec<i64>,
}

#[derive(Deserialize)]
struct ClusterLabelFile {
    cluster_labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct LayoutFile {
    diagnoses: Vec<String>,
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    frequency: Option<Vec<f64>>,
}

fn malformed(what: &str, detail: impl std::fmt::Display) -> LensError {
    LensError::Unavailable(format!("malformed {what}: {detail}"))
}

/// Parse `{ diagnoses: [...], clusters: [...] }`
///
/// Negative cluster ids mark outliers and are left unassigned. Diagnoses
/// differing only in case keep the cluster of their first occurrence.
///
/// # Errors
/// Returns `Unavailable` if the JSON is invalid or the arrays differ in length
pub fn parse_cluster_assignment(json: &str) -> Result<ClusterAssignment> {
    let file: ClusterFile = serde_json::from_str(json).map_err(|e| malformed("cluster file", e))?;
    if file.diagnoses.len() != file.clusters.len() {
        return Err(malformed(
            "cluster file",
            format!(
                "{} diagnoses but {} cluster ids",
                file.diagnoses.len(),
                file.clusters.len()
            ),
        ));
    }

    let mut pairs = Vec::with_capacity(file.diagnoses.len());
    let mut outliers = 0usize;
    for (diagnosis, cluster) in file.diagnoses.into_iter().zip(file.clusters) {
        match usize::try_from(cluster) {
            Ok(id) => pairs.push((diagnosis, id)),
            Err(_) => outliers += 1,
        }
    }
    if outliers > 0 {
        tracing::debug!(outliers, "skipped unassigned diagnoses");
    }
    Ok(ClusterAssignment::new(pairs))
}

/// Parse `{ cluster_labels: { "0": "label", ... } }`
///
/// # Errors
/// Returns `Unavailable` if the JSON is invalid or a key is not a cluster id
pub fn parse_cluster_labels(json: &str) -> Result<BTreeMap<usize, String>> {
    let file: ClusterLabelFile =
        serde_json::from_str(json).map_err(|e| malformed("cluster label file", e))?;
    file.cluster_labels
        .into_iter()
        .map(|(key, label)| {
            key.trim()
                .parse::<usize>()
                .map(|id| (id, label))
                .map_err(|_| malformed("cluster label file", format!("bad cluster id '{key}'")))
        })
        .collect()
}

/// Parse `{ diagnoses: [...], x: [...], y: [...], frequency: [...] }`
///
/// `frequency` is optional and defaults every weight to 1.
///
/// # Errors
/// Returns `Unavailable` on invalid JSON, unequal lengths or non-finite coordinates
pub fn parse_layout(json: &str) -> Result<Vec<LayoutPoint>> {
    let file: LayoutFile = serde_json::from_str(json).map_err(|e| malformed("layout file", e))?;
    let n = file.diagnoses.len();
    let frequency_len = file.frequency.as_ref().map_or(n, Vec::len);
    if file.x.len() != n || file.y.len() != n || frequency_len != n {
        return Err(malformed(
            "layout file",
            format!(
                "lengths differ: {n} diagnoses, {} x, {} y, {frequency_len} frequency",
                file.x.len(),
                file.y.len()
            ),
        ));
    }
    if let Some(i) = (0..n).find(|&i| !file.x[i].is_finite() || !file.y[i].is_finite()) {
        return Err(malformed(
            "layout file",
            format!("non-finite coordinate for '{}'", file.diagnoses[i]),
        ));
    }

    let weights = file.frequency.unwrap_or_else(|| vec![1.0; n]);
    Ok(file
        .diagnoses
        .into_iter()
        .zip(file.x)
        .zip(file.y)
        .zip(weights)
        .map(|(((key, x), y), weight)| LayoutPoint { key, x, y, weight })
        .collect())
}

fn load<T>(path: &Path, what: &str, parse: impl FnOnce(&str) -> Result<T>) -> Availability<T> {
    let result = std::fs::read_to_string(path)
        .map_err(|e| LensError::Unavailable(format!("cannot read {what} {}: {e}", path.display())))
        .and_then(|content| parse(&content));
    match result {
        Ok(value) => {
            tracing::info!(path = %path.display(), "loaded {what}");
            Availability::Ready(value)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "{what} unavailable: {e}");
            Availability::Unavailable(e.to_string())
        }
    }
}

/// Cluster assignment, with display labels when a label file is given
///
/// A bad label file only loses the labels; the assignment stays usable.
#[must_use]
pub fn load_cluster_assignment(path: &Path, labels_path: Option<&Path>) -> Availability<ClusterAssignment> {
    let assignment = load(path, "cluster file", parse_cluster_assignment);
    match (assignment, labels_path) {
        (Availability::Ready(assignment), Some(labels_path)) => {
            match load(labels_path, "cluster label file", parse_cluster_labels) {
                Availability::Ready(labels) => Availability::Ready(assignment.with_labels(labels)),
                _ => Availability::Ready(assignment),
            }
        }
        (other, _) => other,
    }
}

#[must_use]
pub fn load_layout(path: &Path) -> Availability<Vec<LayoutPoint>> {
    load(path, "layout file", parse_layout)
}
