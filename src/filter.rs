//! Record predicate filter: the working set is every record passing all active conditions

use crate::structs::{normalize_key, CaseRecord, ClusterAssignment, Field};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Inclusive age bounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Keep records whose age is unknown
    #[serde(default)]
    pub include_unknown: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    /// At least one of the record's values is required
    #[default]
    Any,
    /// The record's value set equals the required set
    Exact,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub mode: TagMatch,
}

/// Inclusive date range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

/// A single clicked histogram bin or matrix cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BinSelection {
    /// `[start, end)`; `end: None` for the open last bin
    AgeBin { start: f64, end: Option<f64> },
    Cell {
        row: Field,
        row_label: String,
        col: Field,
        col_label: String,
    },
}

/// Active filter conditions, combined by logical AND. The default matches all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub age: Option<AgeBounds>,
    pub genders: BTreeSet<String>,
    pub modalities: Option<TagFilter>,
    pub regions: Option<TagFilter>,
    pub date_range: Option<DateRange>,
    pub cluster_id: Option<usize>,
    /// Category keys from geometric selection. An empty set matches nothing.
    pub category_keys: Option<BTreeSet<String>>,
    pub selection: Option<BinSelection>,
    /// Case-insensitive substring of the diagnosis
    pub diagnosis_query: Option<String>,
}

/// One active condition borrowed from a [`FilterState`]
#[derive(Debug, Clone)]
enum Condition<'a> {
    Age(&'a AgeBounds),
    Gender(BTreeSet<String>),
    Tags(Field, &'a TagFilter),
    Date(&'a DateRange),
    Cluster(usize, &'a ClusterAssignment),
    Keys(BTreeSet<String>),
    Bin(&'a BinSelection),
    DiagnosisQuery(String),
}

impl FilterState {
    /// Load from a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> crate::structs::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whether any condition is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Replace the geometric selection; `None` clears it
    #[must_use]
    pub fn with_category_keys(mut self, keys: Option<BTreeSet<String>>) -> Self {
        self.category_keys = keys;
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster_id: Option<usize>) -> Self {
        self.cluster_id = cluster_id;
        self
    }

    fn conditions<'a>(&'a self, clusters: Option<&'a ClusterAssignment>) -> Vec<Condition<'a>> {
        let mut conditions = Vec::new();

        if let Some(age) = &self.age {
            conditions.push(Condition::Age(age));
        }
        if !self.genders.is_empty() {
            conditions.push(Condition::Gender(
                self.genders.iter().map(|g| normalize_key(g)).collect(),
            ));
        }
        if let Some(tags) = self.modalities.as_ref().filter(|t| !t.tags.is_empty()) {
            conditions.push(Condition::Tags(Field::Modality, tags));
        }
        if let Some(tags) = self.regions.as_ref().filter(|t| !t.tags.is_empty()) {
            // any-match also reaches sub-regions; exact compares main regions only
            let field = match tags.mode {
                TagMatch::Any => Field::RegionAll,
                TagMatch::Exact => Field::Region,
            };
            conditions.push(Condition::Tags(field, tags));
        }
        if let Some(range) = &self.date_range {
            conditions.push(Condition::Date(range));
        }
        if let Some(id) = self.cluster_id {
            match clusters {
                Some(assignment) => conditions.push(Condition::Cluster(id, assignment)),
                None => tracing::debug!(cluster = id, "cluster filter ignored: clustering unavailable"),
            }
        }
        if let Some(keys) = &self.category_keys {
            conditions.push(Condition::Keys(keys.iter().map(|k| normalize_key(k)).collect()));
        }
        if let Some(selection) = &self.selection {
            conditions.push(Condition::Bin(selection));
        }
        if let Some(query) = self
            .diagnosis_query
            .as_deref()
            .map(normalize_key)
            .filter(|q| !q.is_empty())
        {
            conditions.push(Condition::DiagnosisQuery(query));
        }

        conditions
    }
}

impl Condition<'_> {
    fn matches(&self, record: &CaseRecord) -> bool {
        match self {
            Self::Age(bounds) => record.age.map_or(bounds.include_unknown, |age| {
                bounds.min.map_or(true, |min| age >= min) && bounds.max.map_or(true, |max| age <= max)
            }),
            Self::Gender(genders) => genders.contains(&normalize_key(&record.gender_label())),
            Self::Tags(field, filter) => {
                let values: BTreeSet<String> =
                    field.values(record).iter().map(|v| normalize_key(v)).collect();
                let required: BTreeSet<String> =
                    filter.tags.iter().map(|t| normalize_key(t)).collect();
                match filter.mode {
                    TagMatch::Any => !values.is_disjoint(&required),
                    TagMatch::Exact => values == required,
                }
            }
            Self::Date(range) => record.added_date().is_some_and(|date| {
                range.from.map_or(true, |from| date >= from) && range.to.map_or(true, |to| date <= to)
            }),
            Self::Cluster(id, assignment) => record
                .diagnosis_label()
                .and_then(|d| assignment.cluster_of(d))
                .is_some_and(|c| c == *id),
            Self::Keys(keys) => record.diagnosis_key().is_some_and(|d| keys.contains(&d)),
            Self::Bin(BinSelection::AgeBin { start, end }) => record
                .age
                .is_some_and(|age| age >= *start && end.map_or(true, |e| age < e)),
            Self::Bin(BinSelection::Cell {
                row,
                row_label,
                col,
                col_label,
            }) => row.has_value(record, row_label) && col.has_value(record, col_label),
            Self::DiagnosisQuery(query) => record
                .diagnosis_key()
                .is_some_and(|d| d.contains(query.as_str())),
        }
    }
}

/// Records passing every active condition, in input order
///
/// `clusters` backs the cluster-id condition; without it that condition is skipped.
pub fn apply<'a, I>(
    records: I,
    filter: &FilterState,
    clusters: Option<&ClusterAssignment>,
) -> Vec<&'a CaseRecord>
where
    I: IntoIterator<Item = &'a CaseRecord>,
{
    let conditions = filter.conditions(clusters);
    records
        .into_iter()
        .filter(|record| conditions.iter().all(|c| c.matches(record)))
        .collect()
}
