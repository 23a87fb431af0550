#![allow(clippy::module_name_repetitions)]

//! Record store and per-record accessors

use crate::structs::{normalize_key, CaseRecord, Field, LensError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Age groups used by the demographic summaries: (label, start, exclusive end)
pub const AGE_GROUPS: [(&str, f64, Option<f64>); 4] = [
    ("Pediatric (0-17)", 0.0, Some(18.0)),
    ("Young Adult (18-35)", 18.0, Some(36.0)),
    ("Middle Age (36-64)", 36.0, Some(65.0)),
    ("Elderly (65+)", 65.0, None),
];

pub const UNKNOWN_LABEL: &str = "Unknown";

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

impl CaseRecord {
    /// Trimmed, non-empty diagnosis
    #[must_use]
    pub fn diagnosis_label(&self) -> Option<&str> {
        self.diagnosis
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Case-insensitive diagnosis key
    #[must_use]
    pub fn diagnosis_key(&self) -> Option<String> {
        self.diagnosis_label().map(normalize_key)
    }

    /// Normalized gender: `Male`, `Female`, another trimmed value or `Unknown`
    #[must_use]
    pub fn gender_label(&self) -> String {
        let raw = self.gender.as_deref().map(str::trim).unwrap_or_default();
        match raw.to_lowercase().as_str() {
            "" | "unknown" | "n/a" => UNKNOWN_LABEL.to_string(),
            "m" | "male" => "Male".to_string(),
            "f" | "female" => "Female".to_string(),
            _ => raw.to_string(),
        }
    }

    /// Age group label, or `Unknown`
    #[must_use]
    pub fn age_group(&self) -> &'static str {
        self.age
            .and_then(|age| {
                AGE_GROUPS
                    .iter()
                    .find(|(_, start, end)| age >= *start && end.map_or(true, |e| age < e))
                    .map(|(label, _, _)| *label)
            })
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// Main region names
    pub fn main_regions(&self) -> impl Iterator<Item = &str> {
        self.regions
            .keys()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
    }

    /// Main regions and sub-regions, each name once
    #[must_use]
    pub fn all_regions(&self) -> BTreeSet<&str> {
        self.regions
            .iter()
            .flat_map(|(main, subs)| std::iter::once(main).chain(subs.iter()))
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Section names flagged as present
    pub fn present_sections(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .filter(|(_, present)| **present)
            .map(|(name, _)| name.as_str())
    }

    /// Parsed "added on" date; `None` when absent or in an unknown format
    #[must_use]
    pub fn added_date(&self) -> Option<NaiveDate> {
        let raw = self.added_on.as_deref()?.trim();
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
            .or_else(|| {
                DATETIME_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                    .map(|dt| dt.date())
            })
    }
}

impl Field {
    /// Labels this field yields for a record. May repeat; callers deduplicate.
    #[must_use]
    pub fn values(self, record: &CaseRecord) -> Vec<String> {
        match self {
            Self::Gender => vec![record.gender_label()],
            Self::Modality => record
                .modalities
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            Self::Region => record.main_regions().map(str::to_string).collect(),
            Self::RegionAll => record.all_regions().into_iter().map(str::to_string).collect(),
            Self::Diagnosis => record
                .diagnosis_label()
                .map(str::to_string)
                .into_iter()
                .collect(),
            Self::AgeGroup => vec![record.age_group().to_string()],
            Self::Section => record.present_sections().map(str::to_string).collect(),
        }
    }

    /// Whether the record carries `label` for this field (case-insensitive)
    #[must_use]
    pub fn has_value(self, record: &CaseRecord, label: &str) -> bool {
        let wanted = normalize_key(label);
        self.values(record)
            .iter()
            .any(|v| normalize_key(v) == wanted)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::Modality => "modality",
            Self::Region => "region",
            Self::RegionAll => "region_all",
            Self::Diagnosis => "diagnosis",
            Self::AgeGroup => "age_group",
            Self::Section => "section",
        }
    }
}

/// Source of the full case collection
pub trait RecordStore {
    /// The full, already-cleaned collection
    fn get_all_records(&self) -> &[CaseRecord];

    /// Records satisfying `predicate`, in store order
    fn query(&self, predicate: &dyn Fn(&CaseRecord) -> bool) -> Vec<&CaseRecord> {
        self.get_all_records()
            .iter()
            .filter(|r| predicate(r))
            .collect()
    }

    /// Look up a case by id
    fn get_record(&self, id: &str) -> Option<&CaseRecord> {
        self.get_all_records().iter().find(|r| r.id == id)
    }
}

/// JSON file-based record store
pub struct JsonRecordStore {
    records: Vec<CaseRecord>,
}

impl JsonRecordStore {
    /// Load from a JSON file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LensError::Unavailable(format!(
                "Failed to read records file {}: {e}",
                path.display()
            ))
        })?;

        let store = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            records = store.records.len(),
            "loaded case records"
        );
        Ok(store)
    }

    /// Load from JSON string: an array, or an object with a `cases`, `rows` or `data` array
    ///
    /// # Errors
    /// Returns error if JSON is invalid
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;

        let rows_value = if value.is_array() {
            value
        } else if let Some(rows) = ["cases", "rows", "data"]
            .iter()
            .find_map(|key| value.get(*key))
        {
            rows.clone()
        } else {
            return Err(LensError::InvalidInput(
                "JSON must be an array or have a 'cases'/'rows'/'data' field".into(),
            ));
        };

        let records: Vec<CaseRecord> = serde_json::from_value(rows_value)?;
        Ok(Self { records })
    }

    #[must_use]
    pub fn from_records(records: Vec<CaseRecord>) -> Self {
        Self { records }
    }
}

impl RecordStore for JsonRecordStore {
    fn get_all_records(&self) -> &[CaseRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CASES: &str = r#"[
        {"id": "1", "diagnosis": "Meningioma", "patient_age": 54, "gender": "female",
         "modalities": ["MRI", "CT"], "regions": {"Head": ["Brain", "Head"]},
         "sections": {"history": true, "findings": false},
         "added_on": "2008-07-14", "imageCount": 6, "word_count": 420},
        {"id": 2, "diagnosis": "Osteochondroma", "patient_age": "unknown", "gender": "M",
         "modalities": ["Radiography"], "regions": ["Musculoskeletal"],
         "added_on": "07/14/2010", "imageCount": 2, "word_count": 180},
        {"id": "3", "diagnosis": "  ", "age": null}
    ]"#;

    #[test]
    fn test_load_records() {
        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let records = store.get_all_records();

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].id, "2");
        assert_eq!(records[0].age, Some(54.0));
        assert_eq!(records[1].age, None);
        assert_eq!(records[0].image_count, 6);
        assert_eq!(records[1].regions.len(), 1);
        assert!(records[1].regions["Musculoskeletal"].is_empty());
    }

    #[test]
    fn test_wrapped_json_and_file() {
        let wrapped = format!("{{\"cases\": {CASES}}}");
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(wrapped.as_bytes()).expect("write content");

        let store = JsonRecordStore::from_file(file.path()).expect("load file");
        assert_eq!(store.get_all_records().len(), 3);
        assert!(store.get_record("3").is_some());
    }

    #[test]
    fn test_rejects_bad_shape() {
        assert!(JsonRecordStore::from_json(r#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_accessors() {
        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let records = store.get_all_records();

        assert_eq!(records[0].gender_label(), "Female");
        assert_eq!(records[1].gender_label(), "Male");
        assert_eq!(records[2].gender_label(), UNKNOWN_LABEL);
        assert_eq!(records[0].age_group(), "Middle Age (36-64)");
        assert_eq!(records[1].age_group(), UNKNOWN_LABEL);
        assert_eq!(records[2].diagnosis_label(), None);
        assert_eq!(
            records[0].added_date(),
            NaiveDate::from_ymd_opt(2008, 7, 14)
        );
        assert_eq!(
            records[1].added_date(),
            NaiveDate::from_ymd_opt(2010, 7, 14)
        );
        assert_eq!(records[0].present_sections().collect::<Vec<_>>(), vec!["history"]);
    }

    #[test]
    fn test_region_all_dedupes_main_and_sub() {
        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let values = Field::RegionAll.values(&store.get_all_records()[0]);
        assert_eq!(values, vec!["Brain".to_string(), "Head".to_string()]);
        assert!(Field::Modality.has_value(&store.get_all_records()[0], "mri"));
    }

    #[test]
    fn test_query() {
        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let with_images = store.query(&|r| r.image_count > 0);
        assert_eq!(with_images.len(), 2);
    }
}
