//! Dashboard pipeline that computes every summary for one working set

use super::density::estimate_cohorts;
use super::tabulation::{
    axis_labels, cooc_matrix, cross_tab, frequency, frequency_over, group_totals, histogram,
    percent_by_group,
};
use crate::config::EngineConfig;
use crate::records::{AGE_GROUPS, UNKNOWN_LABEL};
use crate::structs::{
    Availability, CaseRecord, ClusterAssignment, CoocMatrix, ColumnStats, CrossTab,
    DensityEstimate, Field, FrequencyTable, Histogram, LensError, PercentMatrix,
};
use serde::Serialize;

const EMPTY_SELECTION: &str = "no cases match the current filters";

#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    /// Cases in the working set
    pub cases: usize,
    /// Cases in the full collection
    pub total_cases: usize,
    pub images: u64,
    pub avg_images_per_case: f64,
}

/// Cases per cluster in the working set, with legend colors
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOverview {
    /// Cluster id of each `counts` entry
    pub ids: Vec<usize>,
    pub counts: FrequencyTable,
    pub colors: Vec<String>,
    /// Cases whose diagnosis has no cluster
    pub unassigned: usize,
}

/// Every dashboard component for one working set
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub totals: Totals,
    pub gender: Availability<FrequencyTable>,
    pub modality: Availability<FrequencyTable>,
    pub region: Availability<FrequencyTable>,
    pub top_diagnoses: Availability<FrequencyTable>,
    /// Cases with each report section present
    pub sections: Availability<FrequencyTable>,
    pub age_groups: Availability<FrequencyTable>,
    pub age_histogram: Availability<Histogram>,
    pub image_histogram: Availability<Histogram>,
    pub modality_cooc: Availability<CoocMatrix>,
    pub region_cooc: Availability<CoocMatrix>,
    pub modality_by_region: Availability<CrossTab>,
    pub modality_by_region_pct: Availability<PercentMatrix>,
    pub age_density: Availability<DensityEstimate>,
    pub age_stats: Availability<ColumnStats>,
    pub image_count_stats: Availability<ColumnStats>,
    pub word_count_stats: Availability<ColumnStats>,
    pub clusters: Availability<ClusterOverview>,
}

impl DashboardSummary {
    /// `(component, reason)` for every component that is not ready
    #[must_use]
    pub fn degraded(&self) -> Vec<(&'static str, &str)> {
        [
            ("gender", self.gender.placeholder()),
            ("modality", self.modality.placeholder()),
            ("region", self.region.placeholder()),
            ("top_diagnoses", self.top_diagnoses.placeholder()),
            ("sections", self.sections.placeholder()),
            ("age_groups", self.age_groups.placeholder()),
            ("age_histogram", self.age_histogram.placeholder()),
            ("image_histogram", self.image_histogram.placeholder()),
            ("modality_cooc", self.modality_cooc.placeholder()),
            ("region_cooc", self.region_cooc.placeholder()),
            ("modality_by_region", self.modality_by_region.placeholder()),
            ("modality_by_region_pct", self.modality_by_region_pct.placeholder()),
            ("age_density", self.age_density.placeholder()),
            ("age_stats", self.age_stats.placeholder()),
            ("image_count_stats", self.image_count_stats.placeholder()),
            ("word_count_stats", self.word_count_stats.placeholder()),
            ("clusters", self.clusters.placeholder()),
        ]
        .into_iter()
        .filter_map(|(name, reason)| reason.map(|r| (name, r)))
        .collect()
    }
}

fn non_empty_table(table: FrequencyTable) -> Availability<FrequencyTable> {
    if table.total() == 0 {
        Availability::Insufficient(EMPTY_SELECTION.into())
    } else {
        Availability::Ready(table)
    }
}

fn section_table(working: &[&CaseRecord]) -> Availability<FrequencyTable> {
    if working.is_empty() {
        return Availability::Insufficient(EMPTY_SELECTION.into());
    }
    let table = frequency(working.iter().copied(), |r| Field::Section.values(r));
    if table.total() == 0 {
        Availability::Insufficient("no section data".into())
    } else {
        Availability::Ready(table)
    }
}

fn matrix_axis(all: &[CaseRecord], field: Field, limit: usize) -> Option<Vec<String>> {
    let axis = axis_labels(all, |r| field.values(r), limit);
    if axis.is_empty() {
        None
    } else {
        Some(axis)
    }
}

#[allow(clippy::cast_precision_loss)]
fn totals(all: &[CaseRecord], working: &[&CaseRecord]) -> Totals {
    let images: u64 = working.iter().map(|r| u64::from(r.image_count)).sum();
    Totals {
        cases: working.len(),
        total_cases: all.len(),
        images,
        avg_images_per_case: if working.is_empty() {
            0.0
        } else {
            images as f64 / working.len() as f64
        },
    }
}

fn age_density(working: &[&CaseRecord], config: &EngineConfig) -> Availability<DensityEstimate> {
    let genders = frequency(working.iter().copied(), |r| vec![r.gender_label()]);
    let cohorts: Vec<(String, Vec<f64>)> = genders
        .labels()
        .into_iter()
        .map(|gender| {
            let ages = working
                .iter()
                .filter(|r| r.gender_label() == gender)
                .filter_map(|r| r.age)
                .collect();
            (gender, ages)
        })
        .collect();
    estimate_cohorts(&cohorts, &config.density_grid())
}

fn cluster_overview(
    working: &[&CaseRecord],
    clusters: Option<&ClusterAssignment>,
    config: &EngineConfig,
) -> Availability<ClusterOverview> {
    let Some(assignment) = clusters else {
        return Availability::Unavailable("cluster assignments not loaded".into());
    };
    let ids = assignment.cluster_ids();
    let axis: Vec<String> = ids.iter().map(usize::to_string).collect();
    let mut counts = frequency_over(working.iter().copied(), &axis, |r| {
        r.diagnosis_label()
            .and_then(|d| assignment.cluster_of(d))
            .map(|id| id.to_string())
            .into_iter()
            .collect()
    });
    let assigned = usize::try_from(counts.total()).unwrap_or(usize::MAX);
    for (entry, &id) in counts.entries.iter_mut().zip(&ids) {
        entry.label = assignment.label(id);
    }
    Availability::Ready(ClusterOverview {
        colors: config.palette_for(ids.len()),
        unassigned: working.len().saturating_sub(assigned),
        ids,
        counts,
    })
}

/// Compute the whole dashboard for `working`, a subset of `all`
///
/// Matrix axes come from `all` so they keep their shape under filtering.
/// Components that cannot be computed report why instead of failing.
#[must_use]
pub fn summarize(
    all: &[CaseRecord],
    working: &[&CaseRecord],
    config: &EngineConfig,
    clusters: Option<&ClusterAssignment>,
) -> DashboardSummary {
    let records = || working.iter().copied();
    let limit = config.axis_label_limit;

    let (modality_cooc, region_cooc, modality_by_region, modality_by_region_pct) =
        if working.is_empty() {
            (
                Availability::Insufficient(EMPTY_SELECTION.into()),
                Availability::Insufficient(EMPTY_SELECTION.into()),
                Availability::Insufficient(EMPTY_SELECTION.into()),
                Availability::Insufficient(EMPTY_SELECTION.into()),
            )
        } else {
            let modality_axis = matrix_axis(all, Field::Modality, limit);
            let region_axis = matrix_axis(all, Field::Region, limit);
            let cooc = |axis: &Option<Vec<String>>, field: Field| match axis {
                Some(axis) => Availability::from(cooc_matrix(records(), axis, |r| field.values(r))),
                None => Availability::Insufficient(format!("no {} labels", field.name())),
            };
            let modality_cooc = cooc(&modality_axis, Field::Modality);
            let region_cooc = cooc(&region_axis, Field::Region);

            let (tab, pct) = match (&region_axis, &modality_axis) {
                (Some(rows), Some(cols)) => {
                    let values = |field: Field| move |r: &CaseRecord| field.values(r);
                    let tab = cross_tab(
                        records(),
                        rows,
                        cols,
                        values(Field::Region),
                        values(Field::Modality),
                    );
                    let totals = group_totals(records(), cols, values(Field::Modality));
                    let pct = match &tab {
                        Ok(t) => percent_by_group(t, &totals),
                        Err(e) => Err(LensError::InvalidInput(e.to_string())),
                    };
                    (Availability::from(tab), Availability::from(pct))
                }
                _ => (
                    Availability::Insufficient("no modality or region labels".into()),
                    Availability::Insufficient("no modality or region labels".into()),
                ),
            };
            (modality_cooc, region_cooc, tab, pct)
        };

    let mut age_group_axis: Vec<String> = AGE_GROUPS.iter().map(|(l, _, _)| (*l).to_string()).collect();
    age_group_axis.push(UNKNOWN_LABEL.to_string());

    let numeric_stats = |name: &str, value: fn(&CaseRecord) -> Option<f64>| {
        let values: Vec<f64> = records().filter_map(value).collect();
        Availability::from(ColumnStats::calculate(name, &values))
    };

    let summary = DashboardSummary {
        totals: totals(all, working),
        gender: non_empty_table(frequency(records(), |r| vec![r.gender_label()])),
        modality: non_empty_table(frequency(records(), |r| Field::Modality.values(r))),
        region: non_empty_table(frequency(records(), |r| Field::Region.values(r))),
        top_diagnoses: non_empty_table(
            frequency(records(), |r| Field::Diagnosis.values(r)).top(config.top_diagnoses),
        ),
        sections: section_table(working),
        age_groups: non_empty_table(frequency_over(records(), &age_group_axis, |r| {
            vec![r.age_group().to_string()]
        })),
        age_histogram: if working.is_empty() {
            Availability::Insufficient(EMPTY_SELECTION.into())
        } else {
            Availability::Ready(histogram(records(), &config.age_bins, |r| r.age))
        },
        image_histogram: if working.is_empty() {
            Availability::Insufficient(EMPTY_SELECTION.into())
        } else {
            Availability::Ready(histogram(records(), &config.image_count_bins, |r| {
                Some(f64::from(r.image_count))
            }))
        },
        modality_cooc,
        region_cooc,
        modality_by_region,
        modality_by_region_pct,
        age_density: age_density(working, config),
        age_stats: numeric_stats("age", |r| r.age),
        image_count_stats: numeric_stats("image_count", |r| Some(f64::from(r.image_count))),
        word_count_stats: numeric_stats("word_count", |r| Some(f64::from(r.word_count))),
        clusters: cluster_overview(working, clusters, config),
    };

    for (component, reason) in summary.degraded() {
        tracing::debug!(component, reason, "component not ready");
    }
    if let Availability::Unavailable(reason) = &summary.clusters {
        tracing::warn!("clustering unavailable: {reason}");
    }
    tracing::info!(
        cases = working.len(),
        total = all.len(),
        "dashboard summary computed"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{apply, FilterState};
    use crate::records::{JsonRecordStore, RecordStore};
    use std::collections::{BTreeMap, HashMap};

    fn store() -> JsonRecordStore {
        JsonRecordStore::from_json(
            r#"[
            {"id": "1", "diagnosis": "Meningioma", "age": 54, "gender": "F",
             "modalities": ["MRI", "CT"], "regions": ["Brain and Neuro"], "imageCount": 6, "wordCount": 400,
             "sections": {"history": true, "findings": true}},
            {"id": "2", "diagnosis": "Fracture", "age": 23, "gender": "M",
             "modalities": ["Radiography"], "regions": ["Musculoskeletal"], "imageCount": 2, "wordCount": 150,
             "sections": {"history": true, "findings": false}},
            {"id": "3", "diagnosis": "Meningioma", "age": 67, "gender": "M",
             "modalities": ["MRI"], "regions": ["Brain and Neuro"], "imageCount": 4, "wordCount": 300},
            {"id": "4", "diagnosis": "Pneumonia", "gender": "F",
             "modalities": ["CT", "Radiography"], "regions": ["Chest, Pulmonary"], "imageCount": 0, "wordCount": 90}
        ]"#,
        )
        .expect("parse json")
    }

    #[test]
    fn test_full_summary() {
        let store = store();
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        let summary = summarize(all, &working, &EngineConfig::default(), None);

        assert_eq!(summary.totals.cases, 4);
        assert_eq!(summary.totals.images, 12);
        assert!((summary.totals.avg_images_per_case - 3.0).abs() < 1e-12);

        let modality = summary.modality.ready().expect("modality");
        assert_eq!(modality.get("MRI"), 2);
        assert_eq!(modality.get("CT"), 2);

        let sections = summary.sections.ready().expect("sections");
        assert_eq!(sections.get("history"), 2);
        assert_eq!(sections.get("findings"), 1);

        let age_groups = summary.age_groups.ready().expect("age groups");
        assert_eq!(age_groups.get("Unknown"), 1);
        assert_eq!(age_groups.get("Elderly (65+)"), 1);

        let histogram = summary.age_histogram.ready().expect("age histogram");
        assert_eq!(histogram.unknown, 1);

        let cooc = summary.modality_cooc.ready().expect("cooc");
        assert!(cooc.is_symmetric());

        let pct = summary.modality_by_region_pct.ready().expect("pct");
        assert!(pct.percents.iter().flatten().all(|p| (0.0..=100.0).contains(p)));

        assert!(summary.age_density.is_ready());
        assert_eq!(summary.age_stats.ready().map(|s| s.count), Some(3));
        assert!(matches!(summary.clusters, Availability::Unavailable(_)));
    }

    #[test]
    fn test_axes_keep_shape_under_filtering() {
        let store = store();
        let all = store.get_all_records();
        let everything: Vec<&CaseRecord> = all.iter().collect();
        let config = EngineConfig::default();
        let full = summarize(all, &everything, &config, None);

        let filter = FilterState {
            diagnosis_query: Some("fracture".into()),
            ..FilterState::default()
        };
        let working = apply(all, &filter, None);
        let filtered = summarize(all, &working, &config, None);

        let a = full.modality_cooc.ready().expect("full cooc");
        let b = filtered.modality_cooc.ready().expect("filtered cooc");
        assert_eq!(a.labels, b.labels);
        assert!(matches!(filtered.age_density, Availability::Insufficient(_)));
    }

    #[test]
    fn test_empty_working_set_degrades() {
        let store = store();
        let all = store.get_all_records();
        let summary = summarize(all, &[], &EngineConfig::default(), None);

        assert_eq!(summary.totals.cases, 0);
        assert!((summary.totals.avg_images_per_case).abs() < 1e-12);
        assert_eq!(summary.gender.placeholder(), Some(EMPTY_SELECTION));
        assert!(matches!(summary.age_stats, Availability::Insufficient(_)));
        assert!(summary.degraded().len() >= 15);
    }

    #[test]
    fn test_cluster_overview() {
        let store = store();
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        let assignment = ClusterAssignment::new(HashMap::from([
            ("meningioma".to_string(), 0),
            ("fracture".to_string(), 1),
        ]));
        let summary = summarize(all, &working, &EngineConfig::default(), Some(&assignment));

        let overview = summary.clusters.ready().expect("clusters");
        assert_eq!(overview.counts.get("Cluster 0"), 2);
        assert_eq!(overview.unassigned, 1);
        assert_eq!(overview.colors.len(), 2);
    }

    #[test]
    fn test_cluster_overview_counts_by_id_when_labels_repeat() {
        let store = store();
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        let assignment = ClusterAssignment::new(HashMap::from([
            ("meningioma".to_string(), 0),
            ("fracture".to_string(), 1),
        ]))
        .with_labels(BTreeMap::from([
            (0, "Neuro".to_string()),
            (1, "Neuro".to_string()),
        ]));
        let summary = summarize(all, &working, &EngineConfig::default(), Some(&assignment));

        let overview = summary.clusters.ready().expect("clusters");
        assert_eq!(overview.ids, vec![0, 1]);
        let counts: Vec<u64> = overview.counts.entries.iter().map(|e| e.count).collect();
        assert_eq!(counts, vec![2, 1]);
        assert!(overview.counts.entries.iter().all(|e| e.label == "Neuro"));
        assert_eq!(overview.counts.total(), 3);
        assert_eq!(overview.unassigned, 1);
    }

    #[test]
    fn test_sections_without_data() {
        let store = JsonRecordStore::from_json(r#"[{"id": "1", "age": 40}]"#).expect("parse json");
        let all = store.get_all_records();
        let working: Vec<&CaseRecord> = all.iter().collect();
        let summary = summarize(all, &working, &EngineConfig::default(), None);
        assert_eq!(summary.sections.placeholder(), Some("no section data"));
    }
}
