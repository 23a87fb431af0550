use crate::config::EngineConfig;
use crate::structs::{
    normalize_key, CaseRecord, ClusterFeature, EncodedFeatures, FeatureBlock, FeatureKind,
    LensError, Result,
};
use ndarray::Array2;
use std::str::FromStr;

pub const OTHER_SLOT: &str = "other";

impl ClusterFeature {
    pub const ALL: [Self; 7] = [
        Self::Age,
        Self::ImageCount,
        Self::WordCount,
        Self::Gender,
        Self::Modality,
        Self::Region,
        Self::HasMultipleImages,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::ImageCount => "image_count",
            Self::WordCount => "word_count",
            Self::Gender => "gender",
            Self::Modality => "modality",
            Self::Region => "region",
            Self::HasMultipleImages => "has_multiple_images",
        }
    }

    #[must_use]
    pub const fn kind(self) -> FeatureKind {
        match self {
            Self::Age | Self::ImageCount | Self::WordCount => FeatureKind::Numeric,
            Self::Gender | Self::Modality | Self::Region => FeatureKind::Categorical,
            Self::HasMultipleImages => FeatureKind::Boolean,
        }
    }

    /// Raw numeric value for numeric and boolean features
    #[must_use]
    pub fn raw_value(self, record: &CaseRecord) -> Option<f64> {
        match self {
            Self::Age => record.age,
            Self::ImageCount => Some(f64::from(record.image_count)),
            Self::WordCount => Some(f64::from(record.word_count)),
            Self::HasMultipleImages => Some(if record.image_count > 1 { 1.0 } else { 0.0 }),
            Self::Gender | Self::Modality | Self::Region => None,
        }
    }

    /// Category values for categorical features
    #[must_use]
    pub fn categories(self, record: &CaseRecord) -> Vec<String> {
        match self {
            Self::Gender => vec![record.gender_label()],
            Self::Modality => crate::structs::Field::Modality.values(record),
            Self::Region => crate::structs::Field::Region.values(record),
            _ => Vec::new(),
        }
    }

    fn vocabulary(self, config: &EngineConfig) -> &[String] {
        match self {
            Self::Gender => &config.vocabulary.gender,
            Self::Modality => &config.vocabulary.modality,
            Self::Region => &config.vocabulary.region,
            _ => &[],
        }
    }

    fn scale(self, config: &EngineConfig) -> f64 {
        match self {
            Self::Age => config.scales.age,
            Self::ImageCount => config.scales.image_count,
            Self::WordCount => config.scales.word_count,
            _ => 1.0,
        }
    }
}

impl FromStr for ClusterFeature {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize_key(s);
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|f| f.name()).collect();
                LensError::InvalidInput(format!(
                    "unknown feature '{s}', expected one of: {}",
                    allowed.join(", ")
                ))
            })
    }
}

impl EncodedFeatures {
    /// Encode records for clustering
    ///
    /// Categorical features are one-hot (multi-hot for modality and region)
    /// over the configured vocabulary plus an `other` slot. Numeric features
    /// are divided by their fixed scale; a missing age encodes as 0.
    ///
    /// # Errors
    /// Returns `InvalidInput` if no features are given or a feature repeats,
    /// `InsufficientData` if there are no records
    pub fn encode(
        records: &[&CaseRecord],
        features: &[ClusterFeature],
        config: &EngineConfig,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(LensError::InvalidInput("no clustering features selected".into()));
        }
        for (i, f) in features.iter().enumerate() {
            if features[..i].contains(f) {
                return Err(LensError::InvalidInput(format!(
                    "feature '{}' given twice",
                    f.name()
                )));
            }
        }
        if records.is_empty() {
            return Err(LensError::InsufficientData("no cases to cluster".into()));
        }

        let mut blocks = Vec::with_capacity(features.len());
        let mut width = 0;
        for &feature in features {
            let labels = match feature.kind() {
                FeatureKind::Categorical => feature
                    .vocabulary(config)
                    .iter()
                    .cloned()
                    .chain(std::iter::once(OTHER_SLOT.to_string()))
                    .collect(),
                FeatureKind::Numeric | FeatureKind::Boolean => vec![feature.name().to_string()],
            };
            blocks.push(FeatureBlock {
                feature,
                start: width,
                labels,
            });
            width += blocks.last().map_or(0, FeatureBlock::width);
        }

        let mut data = Array2::<f64>::zeros((records.len(), width));
        for (row, record) in records.iter().enumerate() {
            for block in &blocks {
                let feature = block.feature;
                match feature.kind() {
                    FeatureKind::Numeric => {
                        data[[row, block.start]] =
                            feature.raw_value(record).unwrap_or(0.0) / feature.scale(config);
                    }
                    FeatureKind::Boolean => {
                        data[[row, block.start]] = feature.raw_value(record).unwrap_or(0.0);
                    }
                    FeatureKind::Categorical => {
                        let vocab = feature.vocabulary(config);
                        for value in feature.categories(record) {
                            let key = normalize_key(&value);
                            let slot = vocab
                                .iter()
                                .position(|v| normalize_key(v) == key)
                                .unwrap_or(vocab.len());
                            data[[row, block.start + slot]] = 1.0;
                        }
                    }
                }
            }
        }

        tracing::debug!(
            rows = records.len(),
            columns = width,
            "encoded clustering features"
        );

        Ok(Self {
            blocks,
            data,
            case_ids: records.iter().map(|r| r.id.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::JsonRecordStore;
    use crate::records::RecordStore;

    const CASES: &str = r#"[
        {"id": "a", "age": 50, "gender": "F", "modalities": ["CT", "PET"], "regions": ["Abdomen"], "imageCount": 5, "wordCount": 500},
        {"id": "b", "gender": "M", "modalities": ["MRI"], "regions": ["Breast"], "imageCount": 1}
    ]"#;

    #[test]
    fn test_parse_feature_names() {
        assert_eq!("age".parse::<ClusterFeature>().ok(), Some(ClusterFeature::Age));
        assert_eq!(
            " Has_Multiple_Images".parse::<ClusterFeature>().ok(),
            Some(ClusterFeature::HasMultipleImages)
        );
        let err = "complexity".parse::<ClusterFeature>().expect_err("not allowed");
        assert!(matches!(err, LensError::InvalidInput(_)));
    }

    #[test]
    fn test_encode_layout_and_values() {
        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let records: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        let config = EngineConfig::default();
        let features = [
            ClusterFeature::Age,
            ClusterFeature::Modality,
            ClusterFeature::HasMultipleImages,
        ];
        let encoded = EncodedFeatures::encode(&records, &features, &config).expect("encode");

        let modality_width = config.vocabulary.modality.len() + 1;
        assert_eq!(encoded.n_features(), 1 + modality_width + 1);
        assert_eq!(encoded.n_samples(), 2);

        // age scaled, unknown age is 0
        assert!((encoded.data[[0, 0]] - 0.5).abs() < 1e-12);
        assert!(encoded.data[[1, 0]].abs() < 1e-12);

        // CT slot and the other slot for PET
        let modality = &encoded.blocks[1];
        assert!((encoded.data[[0, modality.start]] - 1.0).abs() < 1e-12);
        assert!((encoded.data[[0, modality.start + modality_width - 1]] - 1.0).abs() < 1e-12);
        assert!((encoded.data[[1, modality.start + 1]] - 1.0).abs() < 1e-12);

        // has multiple images
        assert!((encoded.data[[0, modality_width + 1]] - 1.0).abs() < 1e-12);
        assert!(encoded.data[[1, modality_width + 1]].abs() < 1e-12);

        assert_eq!(encoded.case_ids, vec!["a".to_string(), "b".to_string()]);
        assert!(encoded.column_names().contains(&"modality=other".to_string()));
    }

    #[test]
    fn test_encode_rejects_empty_input() {
        let config = EngineConfig::default();
        assert!(EncodedFeatures::encode(&[], &[ClusterFeature::Age], &config).is_err());

        let store = JsonRecordStore::from_json(CASES).expect("parse json");
        let records: Vec<&CaseRecord> = store.get_all_records().iter().collect();
        assert!(EncodedFeatures::encode(&records, &[], &config).is_err());
        assert!(EncodedFeatures::encode(
            &records,
            &[ClusterFeature::Age, ClusterFeature::Age],
            &config
        )
        .is_err());
    }
}
