//! Min-max scaling between raw prices and model input space.
//!
//! The scaler is fitted offline; this module only loads and applies the fitted parameters.
//! Values outside the fitted range extrapolate linearly.

use serde::Deserialize;
use std::path::Path;

use crate::error::{ForecastError, Result};
use crate::model::bar::Feature;

/// Transform used by the forecaster and backtester. Implementations must be a pure function of
/// their fitted parameters.
pub trait FeatureScaler: Send + Sync {
    fn n_features(&self) -> usize;

    /// Scale every row (one value per feature, in fitted column order).
    fn forward_rows(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>>;

    /// Map scaled target values back to price space in one batch.
    fn inverse_target(&self, scaled: &[f64]) -> Vec<f64>;
}

#[derive(Debug, Deserialize)]
struct ScalerArtifact {
    features: Vec<Feature>,
    data_min: Vec<f64>,
    data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    feature_range: (f64, f64),
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    features: Vec<Feature>,
    scale: Vec<f64>,
    offset: Vec<f64>,
    target: usize,
}

impl MinMaxScaler {
    /// Build from fitted per-feature minima and maxima. A zero-width column gets unit scale so the
    /// transform stays invertible.
    pub fn new(
        features: Vec<Feature>,
        data_min: &[f64],
        data_max: &[f64],
        feature_range: (f64, f64),
    ) -> Result<Self> {
        if features.is_empty() || features.len() != data_min.len() || data_min.len() != data_max.len()
        {
            return Err(ForecastError::Artifact(format!(
                "scaler shape mismatch: {} features, {} minima, {} maxima",
                features.len(),
                data_min.len(),
                data_max.len()
            )));
        }
        let target = features
            .iter()
            .position(|f| *f == Feature::Close)
            .ok_or_else(|| ForecastError::Artifact("scaler has no 'close' column".to_string()))?;
        let (lo, hi) = feature_range;
        if !(hi > lo) {
            return Err(ForecastError::Artifact(format!(
                "invalid feature_range ({lo}, {hi})"
            )));
        }

        let mut scale = Vec::with_capacity(features.len());
        let mut offset = Vec::with_capacity(features.len());
        for (min, max) in data_min.iter().zip(data_max) {
            let span = max - min;
            let s = if span.abs() > f64::EPSILON {
                (hi - lo) / span
            } else {
                1.0
            };
            scale.push(s);
            offset.push(lo - min * s);
        }
        Ok(Self {
            features,
            scale,
            offset,
            target,
        })
    }

    /// Single-feature scaler over closing prices.
    pub fn univariate(min: f64, max: f64) -> Result<Self> {
        Self::new(vec![Feature::Close], &[min], &[max], (0.0, 1.0))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ForecastError::Artifact(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: ScalerArtifact = serde_json::from_str(raw)
            .map_err(|e| ForecastError::Artifact(format!("invalid scaler artifact: {e}")))?;
        Self::new(
            artifact.features,
            &artifact.data_min,
            &artifact.data_max,
            artifact.feature_range,
        )
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn target_index(&self) -> usize {
        self.target
    }

    /// Elementwise forward transform of one column.
    pub fn forward(&self, column: usize, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .map(|x| x * self.scale[column] + self.offset[column])
            .collect()
    }

    /// Exact algebraic inverse of [`MinMaxScaler::forward`].
    pub fn inverse(&self, column: usize, scaled: &[f64]) -> Vec<f64> {
        scaled
            .iter()
            .map(|y| (y - self.offset[column]) / self.scale[column])
            .collect()
    }
}

impl FeatureScaler for MinMaxScaler {
    fn n_features(&self) -> usize {
        self.features.len()
    }

    fn forward_rows(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(self.scale.iter().zip(&self.offset))
                    .map(|(x, (s, o))| x * s + o)
                    .collect()
            })
            .collect()
    }

    fn inverse_target(&self, scaled: &[f64]) -> Vec<f64> {
        self.inverse(self.target, scaled)
    }
}
