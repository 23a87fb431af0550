//! Engine configuration
//!
//! Every field has a default, so a config file only needs the keys it overrides.

use crate::structs::{BinSpec, LensError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for the analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Age histogram bins (`0-9` ... `90+`)
    pub age_bins: BinSpec,
    /// Images-per-case histogram bins (`0` ... `25+`)
    pub image_count_bins: BinSpec,
    /// Maximum number of labels on a fixed matrix axis
    pub axis_label_limit: usize,
    pub top_diagnoses: usize,
    pub density: DensityConfig,
    pub clustering: ClusteringConfig,
    pub vocabulary: Vocabulary,
    pub scales: NumericScales,
    /// Base colors for cluster legends
    pub palette: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    pub grid_min: f64,
    pub grid_max: f64,
    pub grid_step: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_k: usize,
    pub max_k: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub default_max_cases: usize,
    /// Silhouette is quadratic in the case count; skipped above this
    pub silhouette_max_cases: usize,
}

/// Closed vocabularies for one-hot encoding. Values outside go to `other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub gender: Vec<String>,
    pub modality: Vec<String>,
    pub region: Vec<String>,
}

/// Fixed divisors for numeric cluster features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericScales {
    pub age: f64,
    pub image_count: f64,
    pub word_count: f64,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            age_bins: BinSpec {
                starts: (0..10).map(|i| f64::from(i) * 10.0).collect(),
                labels: Vec::new(),
            },
            image_count_bins: BinSpec {
                starts: (0..=25).map(f64::from).collect(),
                labels: Vec::new(),
            },
            axis_label_limit: 30,
            top_diagnoses: 20,
            density: DensityConfig::default(),
            clustering: ClusteringConfig::default(),
            vocabulary: Vocabulary::default(),
            scales: NumericScales::default(),
            palette: strings(&[
                "#4F81BD", "#F28E2B", "#59A14F", "#E15759", "#76B7B2", "#EDC948", "#B07AA1",
                "#FF9DA7", "#9C755F", "#BAB0AC",
            ]),
        }
    }
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            grid_min: 0.0,
            grid_max: 100.0,
            grid_step: 1.0,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_k: 2,
            max_k: 20,
            max_iterations: 100,
            seed: 42,
            default_max_cases: 10_000,
            silhouette_max_cases: 5_000,
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            gender: strings(&["Male", "Female"]),
            modality: strings(&[
                "CT",
                "MRI",
                "Ultrasound",
                "Radiography",
                "Angiography",
                "Nuclear Medicine",
                "Fluoroscopy",
                "Mammography",
            ]),
            region: strings(&[
                "Brain and Neuro",
                "Head and Neck",
                "Spine and Muscles",
                "Chest, Pulmonary",
                "Cardiovascular",
                "Abdomen",
                "Genitourinary",
                "Musculoskeletal",
                "Breast",
            ]),
        }
    }
}

impl Default for NumericScales {
    fn default() -> Self {
        Self {
            age: 100.0,
            image_count: 25.0,
            word_count: 1000.0,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or fails validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| LensError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    ///
    /// # Errors
    /// Returns error if the given file is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Check invariants the engine relies on
    ///
    /// # Errors
    /// Returns `Config` error describing the first violated invariant
    pub fn validate(&self) -> Result<()> {
        for (name, bins) in [("age_bins", &self.age_bins), ("image_count_bins", &self.image_count_bins)] {
            if bins.starts.is_empty() {
                return Err(LensError::Config(format!("{name} must have at least one bin")));
            }
            if !bins.starts.windows(2).all(|w| w[0] < w[1]) {
                return Err(LensError::Config(format!("{name} starts must be strictly ascending")));
            }
            if !bins.labels.is_empty() && bins.labels.len() != bins.starts.len() {
                return Err(LensError::Config(format!(
                    "{name} has {} labels for {} bins",
                    bins.labels.len(),
                    bins.starts.len()
                )));
            }
        }
        if self.density.grid_step <= 0.0 || self.density.grid_max < self.density.grid_min {
            return Err(LensError::Config("density grid is empty".into()));
        }
        let c = &self.clustering;
        if c.min_k == 0 || c.min_k > c.max_k {
            return Err(LensError::Config(format!(
                "invalid k range {}..={}",
                c.min_k, c.max_k
            )));
        }
        if c.max_iterations == 0 {
            return Err(LensError::Config("max_iterations must be at least 1".into()));
        }
        let s = &self.scales;
        if [s.age, s.image_count, s.word_count].iter().any(|v| *v <= 0.0) {
            return Err(LensError::Config("numeric scales must be positive".into()));
        }
        if self.palette.is_empty() {
            return Err(LensError::Config("palette must not be empty".into()));
        }
        Ok(())
    }

    /// Evaluation grid for density curves
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn density_grid(&self) -> Vec<f64> {
        let d = &self.density;
        let steps = ((d.grid_max - d.grid_min) / d.grid_step).floor() as usize;
        (0..=steps).map(|i| d.grid_min + i as f64 * d.grid_step).collect()
    }

    /// Exactly `n` colors, cycling the base palette when it is shorter
    #[must_use]
    pub fn palette_for(&self, n: usize) -> Vec<String> {
        self.palette.iter().cycle().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("valid defaults");
        assert_eq!(config.age_bins.starts.len(), 10);
        assert_eq!(config.image_count_bins.starts.len(), 26);
        assert_eq!(config.density_grid().len(), 101);
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(br#"{"top_diagnoses": 5, "clustering": {"seed": 7}}"#)
            .expect("write content");

        let config = EngineConfig::load(Some(file.path())).expect("load config");
        assert_eq!(config.top_diagnoses, 5);
        assert_eq!(config.clustering.seed, 7);
        assert_eq!(config.clustering.max_k, 20);
    }

    #[test]
    fn test_rejects_unsorted_bins() {
        let mut config = EngineConfig::default();
        config.age_bins.starts = vec![10.0, 0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_palette_sized_to_clusters() {
        let config = EngineConfig::default();
        assert_eq!(config.palette_for(3).len(), 3);
        let many = config.palette_for(25);
        assert_eq!(many.len(), 25);
        assert_eq!(many[10], many[0]);
    }
}
