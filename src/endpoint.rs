//! On-demand clustering request handling
//!
//! Requests are validated before any computation. Every outcome, including
//! failures, is reported as a JSON envelope with a `success` flag.

use crate::config::EngineConfig;
use crate::engine::clustering::{kmeans, silhouette, summarize_clusters, CancelToken, KMeansParams};
use crate::structs::{
    CaseRecord, ClusterAssignment, ClusterFeature, ClusterResult, ClusterSummary,
    EncodedFeatures, LensError, Result,
};
use serde::{Deserialize, Serialize};

/// Incoming clustering request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterRequest {
    pub k: usize,
    pub features: Vec<String>,
    #[serde(default, alias = "maxCases")]
    pub max_cases: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default, alias = "maxIterations")]
    pub max_iterations: Option<usize>,
}

/// A request that passed validation, with defaults filled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRequest {
    pub features: Vec<ClusterFeature>,
    pub max_cases: usize,
    #[serde(flatten)]
    pub params: KMeansParams,
}

impl ClusterRequest {
    /// # Errors
    /// Returns `InvalidInput` if the JSON does not describe a request
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LensError::InvalidInput(format!("invalid cluster request: {e}")))
    }

    /// Check the request against the configured limits
    ///
    /// # Errors
    /// Returns `InvalidInput` describing the first problem found
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidatedRequest> {
        let limits = &config.clustering;
        if self.k < limits.min_k || self.k > limits.max_k {
            return Err(LensError::InvalidInput(format!(
                "k must be between {} and {}, got {}",
                limits.min_k, limits.max_k, self.k
            )));
        }
        if self.features.is_empty() {
            return Err(LensError::InvalidInput("at least one feature is required".into()));
        }
        let mut features = Vec::with_capacity(self.features.len());
        for name in &self.features {
            let feature: ClusterFeature = name.parse()?;
            if !features.contains(&feature) {
                features.push(feature);
            }
        }

        let max_cases = self.max_cases.unwrap_or(limits.default_max_cases);
        if max_cases < self.k {
            return Err(LensError::InvalidInput(format!(
                "max_cases ({max_cases}) must be at least k ({})",
                self.k
            )));
        }
        let max_iterations = self.max_iterations.unwrap_or(limits.max_iterations);
        if max_iterations == 0 {
            return Err(LensError::InvalidInput("max_iterations must be at least 1".into()));
        }

        Ok(ValidatedRequest {
            features,
            max_cases,
            params: KMeansParams {
                k: self.k,
                max_iterations,
                seed: self.seed.unwrap_or(limits.seed),
            },
        })
    }
}

/// Everything one clustering run produced
#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub features: EncodedFeatures,
    pub result: ClusterResult,
    pub silhouette: Option<f64>,
    pub summaries: Vec<ClusterSummary>,
    pub assignment: ClusterAssignment,
    /// Cases in the working set before truncation to `max_cases`
    pub available_cases: usize,
}

/// Cluster the first `max_cases` records of the working set
///
/// # Errors
/// Returns `InsufficientData` with fewer cases than clusters, `Cancelled`
/// when the token fires
pub fn run(
    working: &[&CaseRecord],
    request: &ValidatedRequest,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> Result<ClusterRun> {
    let records = &working[..working.len().min(request.max_cases)];
    if records.len() < request.params.k {
        return Err(LensError::InsufficientData(format!(
            "{} cases available, need at least {} for k={}",
            records.len(),
            request.params.k,
            request.params.k
        )));
    }

    let features = EncodedFeatures::encode(records, &request.features, config)?;
    let result = kmeans(&features, &request.params, cancel)?;
    let silhouette = silhouette(&features, &result, config.clustering.silhouette_max_cases);
    let summaries = summarize_clusters(records, &request.features, &result, config);
    let assignment = ClusterAssignment::from_run(records, &result);

    Ok(ClusterRun {
        features,
        result,
        silhouette,
        summaries,
        assignment,
        available_cases: working.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseCluster {
    pub id: String,
    pub title: Option<String>,
    pub diagnosis: Option<String>,
    pub cluster: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseParameters {
    #[serde(flatten)]
    pub request: ValidatedRequest,
    pub clustered_cases: usize,
    pub available_cases: usize,
    pub feature_columns: Vec<String>,
}

/// Successful clustering response
#[derive(Debug, Clone, Serialize)]
pub struct ClusterResponse {
    pub success: bool,
    pub parameters: ResponseParameters,
    pub clusters: Vec<ClusterSummary>,
    pub cases: Vec<CaseCluster>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
    pub silhouette: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

impl From<&LensError> for ErrorResponse {
    fn from(e: &LensError) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EndpointResponse {
    Success(Box<ClusterResponse>),
    Failure(ErrorResponse),
}

impl EndpointResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl ClusterResponse {
    #[must_use]
    pub fn new(request: &ValidatedRequest, records: &[&CaseRecord], run: &ClusterRun) -> Self {
        let cases = records
            .iter()
            .zip(&run.result.labels)
            .map(|(record, &cluster)| CaseCluster {
                id: record.id.clone(),
                title: record.title.clone(),
                diagnosis: record.diagnosis_label().map(str::to_string),
                cluster,
            })
            .collect();

        Self {
            success: true,
            parameters: ResponseParameters {
                request: request.clone(),
                clustered_cases: run.result.labels.len(),
                available_cases: run.available_cases,
                feature_columns: run.features.column_names(),
            },
            clusters: run.summaries.clone(),
            cases,
            centroids: run.result.centroids.clone(),
            inertia: run.result.inertia,
            iterations: run.result.iterations,
            converged: run.result.converged,
            silhouette: run.silhouette,
        }
    }
}

/// Validate and run a request, folding any failure into the error envelope
#[must_use]
pub fn handle(
    working: &[&CaseRecord],
    request: &ClusterRequest,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> EndpointResponse {
    let outcome = request.validate(config).and_then(|validated| {
        let run = run(working, &validated, config, cancel)?;
        Ok(ClusterResponse::new(&validated, working, &run))
    });
    match outcome {
        Ok(response) => EndpointResponse::Success(Box::new(response)),
        Err(e) => {
            tracing::warn!(kind = e.kind(), "cluster request failed: {e}");
            EndpointResponse::Failure(ErrorResponse::from(&e))
        }
    }
}

/// Same as [`handle`], starting from the raw request body
#[must_use]
pub fn handle_json(
    working: &[&CaseRecord],
    body: &str,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> EndpointResponse {
    match ClusterRequest::from_json(body) {
        Ok(request) => handle(working, &request, config, cancel),
        Err(e) => EndpointResponse::Failure(ErrorResponse::from(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{JsonRecordStore, RecordStore};
    use serde_json::Value;

    fn store() -> JsonRecordStore {
        let cases: Vec<String> = (0..12)
            .map(|i| {
                let (age, modality, diagnosis) = if i < 6 {
                    (20 + i, "CT", "Fracture")
                } else {
                    (70 + i, "MRI", "Glioma")
                };
                format!(
                    r#"{{"id": "{i}", "title": "Case {i}", "diagnosis": "{diagnosis}", "age": {age}, "modalities": ["{modality}"], "imageCount": {i}}}"#
                )
            })
            .collect();
        JsonRecordStore::from_json(&format!("[{}]", cases.join(","))).expect("parse json")
    }

    fn request(json: &str) -> ClusterRequest {
        ClusterRequest::from_json(json).expect("parse request")
    }

    fn to_value(response: &EndpointResponse) -> Value {
        serde_json::to_value(response).expect("serialize")
    }

    #[test]
    fn test_validation() {
        let config = EngineConfig::default();
        let ok = request(r#"{"k": 3, "features": ["age", "modality"], "maxCases": 50}"#)
            .validate(&config)
            .expect("valid");
        assert_eq!(ok.params.seed, 42);
        assert_eq!(ok.max_cases, 50);

        for bad in [
            r#"{"k": 1, "features": ["age"], "max_cases": 10}"#,
            r#"{"k": 21, "features": ["age"], "max_cases": 100}"#,
            r#"{"k": 3, "features": [], "max_cases": 10}"#,
            r#"{"k": 3, "features": ["complexity_score"], "max_cases": 10}"#,
            r#"{"k": 5, "features": ["age"], "max_cases": 4}"#,
        ] {
            let err = request(bad).validate(&config).expect_err(bad);
            assert_eq!(err.kind(), "invalid_input", "{bad}");
        }
    }

    #[test]
    fn test_successful_run() {
        let store = store();
        let working: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        let response = handle_json(
            &working,
            r#"{"k": 2, "features": ["age", "modality"], "max_cases": 100, "seed": 7}"#,
            &EngineConfig::default(),
            &CancelToken::new(),
        );
        assert!(response.is_success());

        let value = to_value(&response);
        assert_eq!(value["success"], true);
        assert_eq!(value["parameters"]["k"], 2);
        assert_eq!(value["parameters"]["seed"], 7);
        assert_eq!(value["cases"].as_array().map(Vec::len), Some(12));
        assert_eq!(value["clusters"].as_array().map(Vec::len), Some(2));
        assert!(value.get("silhouette").is_some());
    }

    #[test]
    fn test_max_cases_truncates() {
        let store = store();
        let working: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        let config = EngineConfig::default();
        let validated = request(r#"{"k": 2, "features": ["image_count"], "max_cases": 4}"#)
            .validate(&config)
            .expect("valid");
        let run = run(&working, &validated, &config, &CancelToken::new()).expect("run");
        assert_eq!(run.result.labels.len(), 4);
        assert_eq!(run.available_cases, 12);
    }

    #[test]
    fn test_error_envelope() {
        let store = store();
        let working: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        let config = EngineConfig::default();

        let body = r#"{"k": 3, "features": ["age"], "max_cases": 10}"#;
        let value = to_value(&handle_json(&working[..2], body, &config, &CancelToken::new()));
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["kind"], "insufficient_data");

        let value = to_value(&handle_json(&working, "not json", &config, &CancelToken::new()));
        assert_eq!(value["error"]["kind"], "invalid_input");

        let token = CancelToken::new();
        token.cancel();
        let body = r#"{"k": 2, "features": ["age"], "max_cases": 10}"#;
        let value = to_value(&handle_json(&working, body, &config, &token));
        assert_eq!(value["error"]["kind"], "cancelled");
    }
}
