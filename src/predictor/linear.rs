use serde::Deserialize;
use std::path::Path;

use super::{check_window, Predictor};
use crate::error::{ForecastError, Result};
use crate::model::bar::Feature;

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    features: Vec<Feature>,
    /// `weights[t][f]`: coefficient for row `t` (oldest first) and feature `f`.
    weights: Vec<Vec<f64>>,
    #[serde(default)]
    bias: f64,
}

/// Linear autoregressive model over a fixed window, exported from the training pipeline as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearWindowModel {
    features: Vec<Feature>,
    weights: Vec<Vec<f64>>,
    bias: f64,
}

impl LinearWindowModel {
    pub fn new(features: Vec<Feature>, weights: Vec<Vec<f64>>, bias: f64) -> Result<Self> {
        if weights.is_empty() {
            return Err(ForecastError::Artifact("model has an empty window".to_string()));
        }
        if let Some(row) = weights.iter().find(|r| r.len() != features.len()) {
            return Err(ForecastError::Artifact(format!(
                "weight row has {} columns, expected {}",
                row.len(),
                features.len()
            )));
        }
        Ok(Self {
            features,
            weights,
            bias,
        })
    }

    /// Model that repeats the last observed close.
    pub fn persistence(features: Vec<Feature>, window: usize) -> Result<Self> {
        let target = features
            .iter()
            .position(|f| *f == Feature::Close)
            .ok_or_else(|| ForecastError::Artifact("no 'close' column".to_string()))?;
        let mut weights = vec![vec![0.0; features.len()]; window];
        if let Some(last) = weights.last_mut() {
            last[target] = 1.0;
        }
        Self::new(features, weights, 0.0)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ForecastError::Artifact(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: LinearArtifact = serde_json::from_str(raw)
            .map_err(|e| ForecastError::Artifact(format!("invalid model artifact: {e}")))?;
        Self::new(artifact.features, artifact.weights, artifact.bias)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }
}

impl Predictor for LinearWindowModel {
    fn window(&self) -> usize {
        self.weights.len()
    }

    fn n_features(&self) -> usize {
        self.features.len()
    }

    fn step(&self, window: &[Vec<f64>]) -> Result<f64> {
        check_window(self, window)?;
        let y = window
            .iter()
            .zip(&self.weights)
            .flat_map(|(row, w)| row.iter().zip(w).map(|(x, c)| x * c))
            .sum::<f64>()
            + self.bias;
        if !y.is_finite() {
            return Err(ForecastError::Model(format!("non-finite output {y}")));
        }
        Ok(y)
    }
}
