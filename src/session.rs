//! Dashboard session: the record collection plus the current filter state
//!
//! Every change replaces the filter wholesale and recomputes the summary,
//! which is memoized per `(working set, parameters)`.

use crate::cache::{params_hash, working_set_hash, CacheKey, SummaryCache};
use crate::config::EngineConfig;
use crate::endpoint::{self, ClusterRequest, ClusterResponse, EndpointResponse, ErrorResponse};
use crate::engine::clustering::CancelToken;
use crate::engine::pipeline::{summarize, DashboardSummary};
use crate::engine::selection::{select_lasso, select_rect};
use crate::filter::{apply, FilterState};
use crate::records::RecordStore;
use crate::structs::{Availability, CaseRecord, ClusterAssignment, LayoutPoint, LensError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Session<S: RecordStore> {
    store: S,
    config: EngineConfig,
    filter: FilterState,
    clusters: Availability<ClusterAssignment>,
    layout: Availability<Vec<LayoutPoint>>,
    cache: SummaryCache,
    /// Bumped whenever the cluster assignment changes
    generation: u64,
}

impl<S: RecordStore> Session<S> {
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            filter: FilterState::default(),
            clusters: Availability::Unavailable("cluster assignments not loaded".into()),
            layout: Availability::Unavailable("layout not loaded".into()),
            cache: SummaryCache::default(),
            generation: 0,
        }
    }

    #[must_use]
    pub fn with_clusters(mut self, clusters: Availability<ClusterAssignment>) -> Self {
        self.set_clusters(clusters);
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: Availability<Vec<LayoutPoint>>) -> Self {
        self.layout = layout;
        self
    }

    pub fn set_clusters(&mut self, clusters: Availability<ClusterAssignment>) {
        self.clusters = clusters;
        self.generation += 1;
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn filter(&self) -> &FilterState {
        &self.filter
    }

    #[must_use]
    pub const fn clusters(&self) -> &Availability<ClusterAssignment> {
        &self.clusters
    }

    #[must_use]
    pub const fn layout(&self) -> &Availability<Vec<LayoutPoint>> {
        &self.layout
    }

    #[must_use]
    pub fn all_records(&self) -> &[CaseRecord] {
        self.store.get_all_records()
    }

    /// Records passing the current filter
    #[must_use]
    pub fn working_set(&self) -> Vec<&CaseRecord> {
        apply(
            self.store.get_all_records(),
            &self.filter,
            self.clusters.ready(),
        )
    }

    /// Summary of the current working set, from cache when possible
    pub fn summary(&mut self) -> Arc<DashboardSummary> {
        let all = self.store.get_all_records();
        let working = apply(all, &self.filter, self.clusters.ready());
        let key = CacheKey {
            working_set: working_set_hash(&working),
            params: params_hash(&self.config, self.generation),
        };
        let config = &self.config;
        let clusters = self.clusters.ready();
        self.cache
            .get_or_compute(key, || summarize(all, &working, config, clusters))
    }

    /// Replace the filter wholesale and recompute
    pub fn set_filter(&mut self, filter: FilterState) -> Arc<DashboardSummary> {
        tracing::debug!(empty = filter.is_empty(), "filter replaced");
        self.filter = filter;
        self.summary()
    }

    /// Feed a geometric selection back into the filter
    ///
    /// An empty selection clears the selection condition instead of
    /// filtering everything out.
    pub fn apply_selection(&mut self, keys: BTreeSet<String>) -> Arc<DashboardSummary> {
        let keys = if keys.is_empty() { None } else { Some(keys) };
        let filter = self.filter.clone().with_category_keys(keys);
        self.set_filter(filter)
    }

    fn layout_points(&self) -> Result<&[LayoutPoint]> {
        match &self.layout {
            Availability::Ready(points) => Ok(points),
            other => Err(LensError::Unavailable(
                other.placeholder().unwrap_or("layout not loaded").to_string(),
            )),
        }
    }

    /// # Errors
    /// Returns `Unavailable` when no layout is loaded
    pub fn lasso(&mut self, polygon: &[(f64, f64)]) -> Result<Arc<DashboardSummary>> {
        let keys = select_lasso(self.layout_points()?, polygon);
        Ok(self.apply_selection(keys))
    }

    /// # Errors
    /// Returns `Unavailable` when no layout is loaded
    pub fn rect(&mut self, x0: f64, x1: f64, y0: f64, y1: f64) -> Result<Arc<DashboardSummary>> {
        let keys = select_rect(self.layout_points()?, x0, x1, y0, y1);
        Ok(self.apply_selection(keys))
    }

    /// Cluster the working set and, on success, use the result as the cluster filter source
    pub fn cluster(&mut self, request: &ClusterRequest, cancel: &CancelToken) -> EndpointResponse {
        let outcome = request.validate(&self.config).and_then(|validated| {
            let working = self.working_set();
            let run = endpoint::run(&working, &validated, &self.config, cancel)?;
            Ok((ClusterResponse::new(&validated, &working, &run), run.assignment))
        });
        match outcome {
            Ok((response, assignment)) => {
                self.set_clusters(Availability::Ready(assignment));
                EndpointResponse::Success(Box::new(response))
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "cluster request failed: {e}");
                EndpointResponse::Failure(ErrorResponse::from(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::JsonRecordStore;
    use std::collections::HashMap;

    fn session() -> Session<JsonRecordStore> {
        let store = JsonRecordStore::from_json(
            r#"[
            {"id": "1", "diagnosis": "Meningioma", "age": 54, "gender": "F", "modalities": ["MRI"]},
            {"id": "2", "diagnosis": "Glioma", "age": 40, "gender": "M", "modalities": ["MRI"]},
            {"id": "3", "diagnosis": "Fracture", "age": 23, "gender": "M", "modalities": ["Radiography"]},
            {"id": "4", "diagnosis": "Pneumonia", "age": 70, "gender": "F", "modalities": ["CT"]}
        ]"#,
        )
        .expect("parse json");
        let layout = vec![
            LayoutPoint { key: "Meningioma".into(), x: 1.0, y: 1.0, weight: 1.0 },
            LayoutPoint { key: "Glioma".into(), x: 2.0, y: 1.5, weight: 1.0 },
            LayoutPoint { key: "Fracture".into(), x: 8.0, y: 8.0, weight: 1.0 },
        ];
        Session::new(store, EngineConfig::default()).with_layout(Availability::Ready(layout))
    }

    #[test]
    fn test_filter_recomputes() {
        let mut session = session();
        assert_eq!(session.summary().totals.cases, 4);

        let filter = FilterState {
            genders: BTreeSet::from(["Male".to_string()]),
            ..FilterState::default()
        };
        let summary = session.set_filter(filter);
        assert_eq!(summary.totals.cases, 2);

        let summary = session.set_filter(FilterState::default());
        assert_eq!(summary.totals.cases, 4);
    }

    #[test]
    fn test_summary_is_cached() {
        let mut session = session();
        let a = session.summary();
        let b = session.summary();
        assert!(Arc::ptr_eq(&a, &b));

        session.set_clusters(Availability::Ready(ClusterAssignment::new(HashMap::from([(
            "glioma".to_string(),
            0,
        )]))));
        let c = session.summary();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(c.clusters.is_ready());
    }

    #[test]
    fn test_selection_feeds_filter() {
        let mut session = session();
        let summary = session.rect(0.0, 3.0, 0.0, 3.0).expect("layout loaded");
        assert_eq!(summary.totals.cases, 2);
        assert_eq!(session.filter().category_keys.as_ref().map(BTreeSet::len), Some(2));

        // empty selection clears instead of matching nothing
        let summary = session.rect(50.0, 60.0, 50.0, 60.0).expect("layout loaded");
        assert_eq!(summary.totals.cases, 4);
        assert_eq!(session.filter().category_keys, None);

        let summary = session
            .lasso(&[(7.0, 7.0), (9.0, 7.0), (8.0, 9.0)])
            .expect("layout loaded");
        assert_eq!(summary.totals.cases, 1);
    }

    #[test]
    fn test_selection_without_layout() {
        let store = JsonRecordStore::from_records(Vec::new());
        let mut session = Session::new(store, EngineConfig::default());
        let err = session.rect(0.0, 1.0, 0.0, 1.0).expect_err("no layout");
        assert_eq!(err.kind(), "unavailable");
    }

    #[test]
    fn test_local_clustering_becomes_filter_source() {
        let mut session = session();
        let request = ClusterRequest::from_json(r#"{"k": 2, "features": ["age", "modality"]}"#)
            .expect("parse request");
        let response = session.cluster(&request, &CancelToken::new());
        assert!(response.is_success());
        assert!(session.clusters().is_ready());

        let cluster_of_fracture = session
            .clusters()
            .ready()
            .and_then(|c| c.cluster_of("Fracture"))
            .expect("fracture assigned");
        let summary = session.set_filter(FilterState::default().with_cluster(Some(cluster_of_fracture)));
        assert!(summary.totals.cases >= 1);
    }
}
