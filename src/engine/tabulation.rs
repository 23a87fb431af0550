//! Frequency tables, histograms, co-occurrence and cross-tabulation matrices
//!
//! Multi-valued fields count once per distinct value per record. Matrix axes
//! are passed in (built from the full dataset) so their shape does not change
//! as the working set is filtered.

use crate::structs::{
    BinSpec, CaseRecord, CoocMatrix, CrossTab, FrequencyEntry, FrequencyTable, Histogram,
    HistogramBin, LensError, PercentMatrix, Result,
};
use std::collections::{BTreeSet, HashMap};

fn dedup(values: Vec<String>) -> BTreeSet<String> {
    values.into_iter().collect()
}

/// Count records per label, most frequent first (ties by label)
pub fn frequency<'a, I, F>(records: I, extract: F) -> FrequencyTable
where
    I: IntoIterator<Item = &'a CaseRecord>,
    F: Fn(&CaseRecord) -> Vec<String>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    for record in records {
        for label in dedup(extract(record)) {
            *counts.entry(label).or_insert(0) += 1;
        }
    }

    let mut entries: Vec<FrequencyEntry> = counts
        .into_iter()
        .map(|(label, count)| FrequencyEntry { label, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));

    FrequencyTable { entries }
}

/// Count records per label in fixed axis order; zero counts are kept
pub fn frequency_over<'a, I, F>(records: I, axis: &[String], extract: F) -> FrequencyTable
where
    I: IntoIterator<Item = &'a CaseRecord>,
    F: Fn(&CaseRecord) -> Vec<String>,
{
    let counts = frequency(records, extract);
    FrequencyTable {
        entries: axis
            .iter()
            .map(|label| FrequencyEntry {
                label: label.clone(),
                count: counts.get(label),
            })
            .collect(),
    }
}

/// Fixed matrix axis: the `limit` most frequent labels of the full dataset
pub fn axis_labels<'a, I, F>(all_records: I, extract: F, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a CaseRecord>,
    F: Fn(&CaseRecord) -> Vec<String>,
{
    frequency(all_records, extract).top(limit).labels()
}

impl FrequencyTable {
    /// Count for `label`, 0 when absent
    #[must_use]
    pub fn get(&self, label: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map_or(0, |e| e.count)
    }

    /// Sum of all counts
    #[must_use]
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    #[must_use]
    pub fn top(&self, n: usize) -> Self {
        Self {
            entries: self.entries.iter().take(n).cloned().collect(),
        }
    }

    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn fmt_bound(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

impl BinSpec {
    /// Display labels: configured ones, or `a-b` / `a` / `a+` generated from the starts
    #[must_use]
    pub fn bin_labels(&self) -> Vec<String> {
        if self.labels.len() == self.starts.len() {
            return self.labels.clone();
        }
        self.starts
            .iter()
            .enumerate()
            .map(|(i, &start)| match self.starts.get(i + 1) {
                None => format!("{}+", fmt_bound(start)),
                Some(&end) if start.fract() == 0.0 && end.fract() == 0.0 => {
                    if (end - start - 1.0).abs() < f64::EPSILON {
                        fmt_bound(start)
                    } else {
                        format!("{}-{}", fmt_bound(start), fmt_bound(end - 1.0))
                    }
                }
                Some(&end) => format!("{}-{}", fmt_bound(start), fmt_bound(end)),
            })
            .collect()
    }

    /// Index of the bin holding `value`, `None` below the first start
    #[must_use]
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        self.starts
            .partition_point(|start| *start <= value)
            .checked_sub(1)
    }
}

/// Histogram over half-open bins; the last bin is unbounded above
pub fn histogram<'a, I, F>(records: I, bins: &BinSpec, value_of: F) -> Histogram
where
    I: IntoIterator<Item = &'a CaseRecord>,
    F: Fn(&CaseRecord) -> Option<f64>,
{
    histogram_weighted(records.into_iter().map(|r| (value_of(r), 1)), bins)
}

/// Histogram over `(value, weight)` pairs; absent or non-finite values count as unknown
pub fn histogram_weighted<I>(values: I, bins: &BinSpec) -> Histogram
where
    I: IntoIterator<Item = (Option<f64>, u64)>,
{
    let mut counts = vec![0u64; bins.starts.len()];
    let mut unknown = 0;
    let mut below_range = 0;

    for (value, weight) in values {
        match value.filter(|v| v.is_finite()) {
            None => unknown += weight,
            Some(v) => match bins.bin_index(v) {
                Some(i) => counts[i] += weight,
                None => below_range += weight,
            },
        }
    }

    let labels = bins.bin_labels();
    let bins = bins
        .starts
        .iter()
        .enumerate()
        .zip(labels)
        .zip(counts)
        .map(|(((i, &start), label), count)| HistogramBin {
            label,
            start,
            end: bins.starts.get(i + 1).copied(),
            count,
        })
        .collect();

    Histogram {
        bins,
        unknown,
        below_range,
    }
}

impl Histogram {
    /// Bin counts in order
    #[must_use]
    pub fn counts(&self) -> Vec<u64> {
        self.bins.iter().map(|b| b.count).collect()
    }

    /// Re-bin this histogram's counts, each placed at its bin start
    #[must_use]
    pub fn rebin(&self, bins: &BinSpec) -> Self {
        let mut rebinned = histogram_weighted(
            self.bins
                .iter()
                .map(|b| (Some(b.start), b.count))
                .chain(std::iter::once((None, self.unknown))),
            bins,
        );
        rebinned.below_range += self.below_range;
        rebinned
    }
}

fn axis_index(axis: &[String], name: &str) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(axis.len());
    for (i, label) in axis.iter().enumerate() {
        if label.trim().is_empty() {
            return Err(LensError::InvalidInput(format!("{name} axis has an empty label")));
        }
        if index.insert(label.clone(), i).is_some() {
            return Err(LensError::InvalidInput(format!(
                "{name} axis repeats label '{label}'"
            )));
        }
    }
    Ok(index)
}

fn positions(index: &HashMap<String, usize>, values: Vec<String>) -> Vec<usize> {
    let present: BTreeSet<usize> = dedup(values)
        .iter()
        .filter_map(|v| index.get(v).copied())
        .collect();
    present.into_iter().collect()
}

/// Symmetric co-occurrence counts; the diagonal counts records carrying the label
///
/// # Errors
/// Returns `InvalidInput` if the axis has empty or repeated labels
pub fn cooc_matrix<'a, I, F>(records: I, axis: &[String], extract: F) -> Result<CoocMatrix>
where
    I: IntoIterator<Item = &'a CaseRecord>,
    F: Fn(&CaseRecord) -> Vec<String>,
{
    let index = axis_index(axis, "co-occurrence")?;
    let n = axis.len();
    let mut counts = vec![vec![0u64; n]; n];

    for record in records {
        let present = positions(&index, extract(record));
        for (a, &i) in present.iter().enumerate() {
            counts[i][i] += 1;
            for &j in &present[a + 1..] {
                counts[i][j] += 1;
                counts[j][i] += 1;
            }
        }
    }

    Ok(CoocMatrix {
        labels: axis.to_vec(),
        counts,
    })
}

impl CoocMatrix {
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.counts
            .iter()
            .enumerate()
            .all(|(i, row)| row.iter().enumerate().all(|(j, &v)| self.counts[j][i] == v))
    }
}

/// Row x column counts over the Cartesian product of each record's row and column values
///
/// # Errors
/// Returns `InvalidInput` if either axis has empty or repeated labels
pub fn cross_tab<'a, I, R, C>(
    records: I,
    row_axis: &[String],
    col_axis: &[String],
    extract_row: R,
    extract_col: C,
) -> Result<CrossTab>
where
    I: IntoIterator<Item = &'a CaseRecord>,
    R: Fn(&CaseRecord) -> Vec<String>,
    C: Fn(&CaseRecord) -> Vec<String>,
{
    let row_index = axis_index(row_axis, "row")?;
    let col_index = axis_index(col_axis, "column")?;
    let mut counts = vec![vec![0u64; col_axis.len()]; row_axis.len()];

    for record in records {
        let rows = positions(&row_index, extract_row(record));
        if rows.is_empty() {
            continue;
        }
        let cols = positions(&col_index, extract_col(record));
        for &i in &rows {
            for &j in &cols {
                counts[i][j] += 1;
            }
        }
    }

    Ok(CrossTab {
        row_labels: row_axis.to_vec(),
        col_labels: col_axis.to_vec(),
        counts,
    })
}

/// Records per column label, regardless of their row values
pub fn group_totals<'a, I, C>(records: I, col_axis: &[String], extract_col: C) -> Vec<u64>
where
    I: IntoIterator<Item = &'a CaseRecord>,
    C: Fn(&CaseRecord) -> Vec<String>,
{
    frequency_over(records, col_axis, extract_col)
        .entries
        .iter()
        .map(|e| e.count)
        .collect()
}

/// `pct[i][j] = count[i][j] / total[j] * 100`; a zero total gives 0
///
/// # Errors
/// Returns `InvalidInput` if `totals` does not match the column axis or a
/// cell count exceeds its column total
#[allow(clippy::cast_precision_loss)]
pub fn percent_by_group(tab: &CrossTab, totals: &[u64]) -> Result<PercentMatrix> {
    if totals.len() != tab.col_labels.len() {
        return Err(LensError::InvalidInput(format!(
            "{} group totals for {} columns",
            totals.len(),
            tab.col_labels.len()
        )));
    }
    for (row, counts) in tab.row_labels.iter().zip(&tab.counts) {
        for ((col, &count), &total) in tab.col_labels.iter().zip(counts).zip(totals) {
            if count > total {
                return Err(LensError::InvalidInput(format!(
                    "count {count} for ({row}, {col}) exceeds group total {total}"
                )));
            }
        }
    }

    let percents = tab
        .counts
        .iter()
        .map(|row| {
            row.iter()
                .zip(totals)
                .map(|(&count, &total)| {
                    if total == 0 {
                        0.0
                    } else {
                        count as f64 / total as f64 * 100.0
                    }
                })
                .collect()
        })
        .collect();

    Ok(PercentMatrix {
        row_labels: tab.row_labels.clone(),
        col_labels: tab.col_labels.clone(),
        group_totals: totals.to_vec(),
        percents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::records::{JsonRecordStore, RecordStore};
    use crate::structs::Field;

    fn store() -> JsonRecordStore {
        JsonRecordStore::from_json(
            r#"[
            {"id": "1", "age": 5, "gender": "F", "modalities": ["CT", "MRI", "CT"],
             "regions": {"Head": ["Brain", "Head"]}},
            {"id": "2", "age": 15, "gender": "M", "modalities": ["MRI"],
             "regions": {"Chest": [], "Abdomen": []}},
            {"id": "3", "age": 95, "gender": "M", "modalities": ["CT", "Ultrasound"],
             "regions": {"Abdomen": []}},
            {"id": "4", "age": null, "modalities": []}
        ]"#,
        )
        .expect("parse json")
    }

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_frequency_counts_once_per_value() {
        let store = store();
        let table = frequency(store.get_all_records(), |r| Field::Modality.values(r));

        assert_eq!(table.get("CT"), 2);
        assert_eq!(table.get("MRI"), 2);
        assert_eq!(table.entries[0].label, "CT");
        // Multi-valued field: total exceeds the record count
        assert!(table.total() >= 3);
    }

    #[test]
    fn test_frequency_single_label_sums_to_record_count() {
        let store = store();
        let table = frequency(store.get_all_records(), |r| Field::Gender.values(r));
        assert_eq!(table.total(), 4);
        assert_eq!(table.get("Unknown"), 1);
    }

    #[test]
    fn test_region_all_not_double_counted() {
        let store = store();
        let table = frequency(store.get_all_records(), |r| Field::RegionAll.values(r));
        assert_eq!(table.get("Head"), 1);
        assert_eq!(table.get("Abdomen"), 2);
    }

    #[test]
    fn test_frequency_over_keeps_axis_order() {
        let store = store();
        let axis = labels(&["Ultrasound", "PET", "CT"]);
        let table = frequency_over(store.get_all_records(), &axis, |r| Field::Modality.values(r));
        assert_eq!(table.labels(), axis);
        assert_eq!(
            table.entries.iter().map(|e| e.count).collect::<Vec<_>>(),
            vec![1, 0, 2]
        );
    }

    #[test]
    fn test_age_histogram_example() {
        let store = store();
        let config = EngineConfig::default();
        let hist = histogram(store.get_all_records(), &config.age_bins, |r| r.age);

        assert_eq!(hist.counts(), vec![1, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(hist.unknown, 1);
        assert_eq!(hist.bins[0].label, "0-9");
        assert_eq!(hist.bins[9].label, "90+");
        assert_eq!(hist.bins[9].end, None);
    }

    #[test]
    fn test_histogram_half_open_and_below_range() {
        let bins = BinSpec {
            starts: vec![0.0, 10.0],
            labels: Vec::new(),
        };
        let hist = histogram_weighted(
            [Some(10.0), Some(9.999), Some(-1.0), Some(f64::NAN)].map(|v| (v, 1)),
            &bins,
        );
        assert_eq!(hist.counts(), vec![1, 1]);
        assert_eq!(hist.below_range, 1);
        assert_eq!(hist.unknown, 1);
    }

    #[test]
    fn test_rebin_is_idempotent() {
        let store = store();
        let config = EngineConfig::default();
        let hist = histogram(store.get_all_records(), &config.age_bins, |r| r.age);
        assert_eq!(hist.rebin(&config.age_bins), hist);

        let images = histogram(store.get_all_records(), &config.image_count_bins, |r| {
            Some(f64::from(r.image_count))
        });
        assert_eq!(images.bins[1].label, "1");
        assert_eq!(images.bins[25].label, "25+");
        assert_eq!(images.rebin(&config.image_count_bins), images);
    }

    #[test]
    fn test_cooc_symmetric_with_self_pairs() {
        let store = store();
        let axis = labels(&["CT", "MRI", "Ultrasound"]);
        let m = cooc_matrix(store.get_all_records(), &axis, |r| Field::Modality.values(r))
            .expect("cooc");

        assert!(m.is_symmetric());
        assert_eq!(m.counts[0][0], 2); // CT on two records, duplicate tag ignored
        assert_eq!(m.counts[0][1], 1);
        assert_eq!(m.counts[0][2], 1);
        assert_eq!(m.counts[1][2], 0);
    }

    #[test]
    fn test_cooc_rejects_malformed_axis() {
        let store = store();
        let axis = labels(&["CT", "CT"]);
        assert!(cooc_matrix(store.get_all_records(), &axis, |r| Field::Modality.values(r)).is_err());
    }

    #[test]
    fn test_cross_tab_cartesian_product() {
        let store = store();
        let rows = labels(&["Chest", "Abdomen", "Head"]);
        let cols = labels(&["CT", "MRI", "Ultrasound"]);
        let tab = cross_tab(
            store.get_all_records(),
            &rows,
            &cols,
            |r| Field::Region.values(r),
            |r| Field::Modality.values(r),
        )
        .expect("cross tab");

        // Record 2: 2 regions x 1 modality
        assert_eq!(tab.counts[0][1], 1);
        assert_eq!(tab.counts[1][1], 1);
        // Record 3: 1 region x 2 modalities
        assert_eq!(tab.counts[1][0], 1);
        assert_eq!(tab.counts[1][2], 1);
        assert_eq!(tab.counts[2][0], 1);
    }

    #[test]
    fn test_percent_by_group_in_range() {
        let store = store();
        let rows = labels(&["Chest", "Abdomen", "Head"]);
        let cols = labels(&["CT", "MRI", "PET"]);
        let tab = cross_tab(
            store.get_all_records(),
            &rows,
            &cols,
            |r| Field::Region.values(r),
            |r| Field::Modality.values(r),
        )
        .expect("cross tab");
        let totals = group_totals(store.get_all_records(), &cols, |r| Field::Modality.values(r));
        let pct = percent_by_group(&tab, &totals).expect("percent");

        assert_eq!(totals, vec![2, 2, 0]);
        assert!((pct.percents[1][0] - 50.0).abs() < 1e-9);
        assert!((pct.percents[2][0] - 50.0).abs() < 1e-9);
        // Zero group total
        assert!(pct.percents.iter().all(|row| row[2] == 0.0));
        assert!(pct
            .percents
            .iter()
            .flatten()
            .all(|v| (0.0..=100.0).contains(v)));

        assert!(percent_by_group(&tab, &[1, 2]).is_err());
    }

    #[test]
    fn test_percent_by_group_rejects_inconsistent_totals() {
        let tab = CrossTab {
            row_labels: labels(&["Chest"]),
            col_labels: labels(&["CT", "MRI"]),
            counts: vec![vec![3, 1]],
        };
        let err = percent_by_group(&tab, &[2, 1]).expect_err("count above total");
        assert_eq!(err.kind(), "invalid_input");

        let pct = percent_by_group(&tab, &[3, 4]).expect("consistent totals");
        assert!((pct.percents[0][0] - 100.0).abs() < 1e-9);
        assert!((pct.percents[0][1] - 25.0).abs() < 1e-9);
    }
}
