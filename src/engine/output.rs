//! Output file writers for the analyze and cluster commands

use super::pipeline::DashboardSummary;
use crate::structs::{Availability, ClusterResult, EncodedFeatures, FrequencyTable, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Write `summary.json` - every dashboard component, machine readable
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_summary_json(output_dir: &Path, summary: &DashboardSummary) -> Result<()> {
    let path = output_dir.join("summary.json");
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}

/// Write `summary.txt` - human readable overview
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_summary(output_dir: &Path, content: &str) -> Result<()> {
    let path = output_dir.join("summary.txt");
    fs::write(path, content)?;
    Ok(())
}

fn render_table(out: &mut String, title: &str, table: &Availability<FrequencyTable>, limit: usize) {
    let _ = writeln!(out, "\n## {title}");
    match table {
        Availability::Ready(table) => {
            for entry in table.top(limit).entries {
                let _ = writeln!(out, "  {:<32} {}", entry.label, entry.count);
            }
        }
        other => {
            let _ = writeln!(out, "  ({})", other.placeholder().unwrap_or_default());
        }
    }
}

/// Render the dashboard as plain text
#[must_use]
pub fn render_summary(summary: &DashboardSummary) -> String {
    let mut out = String::from("# Case Collection Summary\n\n");
    let t = &summary.totals;
    let _ = writeln!(out, "Cases: {} of {}", t.cases, t.total_cases);
    let _ = writeln!(out, "Images: {} ({:.2} per case)", t.images, t.avg_images_per_case);

    render_table(&mut out, "Gender", &summary.gender, 10);
    render_table(&mut out, "Age Groups", &summary.age_groups, 10);
    render_table(&mut out, "Modalities", &summary.modality, 15);
    render_table(&mut out, "Regions", &summary.region, 15);
    render_table(&mut out, "Top Diagnoses", &summary.top_diagnoses, 20);
    render_table(&mut out, "Sections Present", &summary.sections, 10);

    let _ = writeln!(out, "\n## Age Distribution");
    match &summary.age_histogram {
        Availability::Ready(h) => {
            for bin in &h.bins {
                let _ = writeln!(out, "  {:<8} {}", bin.label, bin.count);
            }
            let _ = writeln!(out, "  {:<8} {}", "unknown", h.unknown);
        }
        other => {
            let _ = writeln!(out, "  ({})", other.placeholder().unwrap_or_default());
        }
    }

    let _ = writeln!(out, "\n## Statistics");
    for stats in [
        &summary.age_stats,
        &summary.image_count_stats,
        &summary.word_count_stats,
    ] {
        match stats {
            Availability::Ready(s) => {
                let _ = writeln!(out, "  {}", s.summary());
            }
            other => {
                let _ = writeln!(out, "  ({})", other.placeholder().unwrap_or_default());
            }
        }
    }

    let _ = writeln!(out, "\n## Clusters");
    match &summary.clusters {
        Availability::Ready(overview) => {
            for (entry, color) in overview.counts.entries.iter().zip(&overview.colors) {
                let _ = writeln!(out, "  {:<32} {:>6}  {color}", entry.label, entry.count);
            }
            let _ = writeln!(out, "  {:<32} {:>6}", "unassigned", overview.unassigned);
        }
        other => {
            let _ = writeln!(out, "  ({})", other.placeholder().unwrap_or_default());
        }
    }

    let degraded = summary.degraded();
    if !degraded.is_empty() {
        let _ = writeln!(out, "\n## Not Shown");
        for (component, reason) in degraded {
            let _ = writeln!(out, "  {component}: {reason}");
        }
    }

    out
}

/// Write `frequencies.csv` - one row per ready frequency table entry
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_frequencies_csv(output_dir: &Path, summary: &DashboardSummary) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_dir.join("frequencies.csv"))?;
    writer.write_record(["table", "label", "count"])?;

    for (name, table) in [
        ("gender", &summary.gender),
        ("age_group", &summary.age_groups),
        ("modality", &summary.modality),
        ("region", &summary.region),
        ("diagnosis", &summary.top_diagnoses),
        ("section", &summary.sections),
    ] {
        if let Some(table) = table.ready() {
            for entry in &table.entries {
                let count = entry.count.to_string();
                writer.write_record([name, entry.label.as_str(), count.as_str()])?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Write `clusters.csv` - cluster assignment for each clustered case
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_clusters_csv(
    output_dir: &Path,
    features: &EncodedFeatures,
    clusters: &ClusterResult,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_dir.join("clusters.csv"))?;
    writer.write_record(["case_id", "cluster", "distance_to_centroid"])?;

    for ((case_id, &cluster), row) in features
        .case_ids
        .iter()
        .zip(&clusters.labels)
        .zip(features.data.outer_iter())
    {
        let distance = clusters
            .centroids
            .get(cluster)
            .map_or(f64::NAN, |c| euclidean_distance(&row.to_vec(), c));
        let cluster = cluster.to_string();
        let distance = format!("{distance:.4}");
        writer.write_record([case_id.as_str(), cluster.as_str(), distance.as_str()])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::pipeline::summarize;
    use crate::records::{JsonRecordStore, RecordStore};
    use crate::structs::CaseRecord;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn summary() -> DashboardSummary {
        let store = JsonRecordStore::from_json(
            r#"[
            {"id": "1", "diagnosis": "Meningioma", "age": 54, "gender": "F", "modalities": ["MRI"], "imageCount": 3},
            {"id": "2", "diagnosis": "Fracture, distal radius", "age": 23, "gender": "M", "modalities": ["Radiography"], "imageCount": 1}
        ]"#,
        )
        .expect("parse json");
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        summarize(all, &working, &EngineConfig::default(), None)
    }

    #[test]
    fn test_write_summary() {
        let dir = TempDir::new().expect("create temp dir");
        write_summary(dir.path(), "Test summary content").expect("write summary");

        let content = fs::read_to_string(dir.path().join("summary.txt")).expect("read");
        assert_eq!(content, "Test summary content");
    }

    #[test]
    fn test_render_and_json() {
        let summary = summary();
        let text = render_summary(&summary);
        assert!(text.contains("Cases: 2 of 2"));
        assert!(text.contains("Meningioma"));
        assert!(text.contains("cluster assignments not loaded"));

        let dir = TempDir::new().expect("create temp dir");
        write_summary_json(dir.path(), &summary).expect("write json");
        let content = fs::read_to_string(dir.path().join("summary.json")).expect("read");
        let value: serde_json::Value = serde_json::from_str(&content).expect("valid json");
        assert_eq!(value["totals"]["cases"], 2);
        assert_eq!(value["gender"]["status"], "ready");
        assert_eq!(value["clusters"]["status"], "unavailable");
    }

    #[test]
    fn test_write_frequencies_quotes_labels() {
        let dir = TempDir::new().expect("create temp dir");
        write_frequencies_csv(dir.path(), &summary()).expect("write csv");

        let content = fs::read_to_string(dir.path().join("frequencies.csv")).expect("read");
        assert!(content.starts_with("table,label,count\n"));
        assert!(content.contains("modality,MRI,1"));
        assert!(content.contains("diagnosis,\"Fracture, distal radius\",1"));
    }

    #[test]
    fn test_write_clusters() {
        let dir = TempDir::new().expect("create temp dir");
        let features = EncodedFeatures {
            blocks: Vec::new(),
            data: Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 3.0, 4.0]).expect("shape"),
            case_ids: vec!["a".into(), "b".into()],
        };
        let result = ClusterResult {
            labels: vec![0, 0],
            k: 1,
            sizes: vec![2],
            centroids: vec![vec![0.0, 0.0]],
            inertia: 25.0,
            iterations: 2,
            converged: true,
        };

        write_clusters_csv(dir.path(), &features, &result).expect("write clusters");
        let content = fs::read_to_string(dir.path().join("clusters.csv")).expect("read");
        assert!(content.contains("case_id,cluster,distance_to_centroid"));
        assert!(content.contains("b,0,5.0000"));
    }

    #[test]
    fn test_euclidean_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        let dist = euclidean_distance(&a, &b);
        assert!((dist - 5.0).abs() < 0.001);
    }
}
