use std::sync::Arc;

use crate::error::{ForecastError, Result};
use crate::model::bar::Feature;
use crate::predictor::Predictor;
use crate::scaler::FeatureScaler;

const VOLUME_LOOKBACK: usize = 20;
const HIGH_BAND: f64 = 1.01;
const LOW_BAND: f64 = 0.99;

/// Fills a synthetic buffer row after each predicted step.
pub trait RowSynthesis: Send + Sync {
    /// New scaled row whose target column is `predicted`. `buffer` is non-empty.
    fn next_row(&self, buffer: &[Vec<f64>], predicted: f64) -> Vec<f64>;
}

/// Copies the previous row and overwrites only the target column.
#[derive(Debug, Clone)]
pub struct TargetOnly {
    pub target: usize,
}

impl RowSynthesis for TargetOnly {
    fn next_row(&self, buffer: &[Vec<f64>], predicted: f64) -> Vec<f64> {
        let mut row = buffer.last().cloned().unwrap_or_default();
        if let Some(slot) = row.get_mut(self.target) {
            *slot = predicted;
        }
        row
    }
}

/// Heuristic auxiliary columns for OHLCV inputs. These values are approximations, not model
/// outputs, and are the accepted error source for the non-target features:
///
/// - open: previous row's close
/// - high / low: predicted close times 1.01 / 0.99 (in scaled space)
/// - volume: mean of the last 20 rows, or of all rows if fewer exist
#[derive(Debug, Clone)]
pub struct OhlcvHeuristic {
    features: Vec<Feature>,
}

impl OhlcvHeuristic {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    fn column(&self, feature: Feature) -> Option<usize> {
        self.features.iter().position(|f| *f == feature)
    }
}

impl RowSynthesis for OhlcvHeuristic {
    fn next_row(&self, buffer: &[Vec<f64>], predicted: f64) -> Vec<f64> {
        let prev = buffer.last().cloned().unwrap_or_default();
        let mut row = prev.clone();
        let close = self.column(Feature::Close);

        if let Some(c) = close {
            row[c] = predicted;
        }
        if let (Some(o), Some(c)) = (self.column(Feature::Open), close) {
            row[o] = prev[c];
        }
        if let Some(h) = self.column(Feature::High) {
            row[h] = predicted * HIGH_BAND;
        }
        if let Some(l) = self.column(Feature::Low) {
            row[l] = predicted * LOW_BAND;
        }
        if let Some(v) = self.column(Feature::Volume) {
            let start = buffer.len().saturating_sub(VOLUME_LOOKBACK);
            let recent = &buffer[start..];
            row[v] = recent.iter().map(|r| r[v]).sum::<f64>() / recent.len() as f64;
        }
        row
    }
}

/// Default policy for a feature layout: close-only inputs need no auxiliary synthesis.
pub fn synthesis_for(features: &[Feature]) -> Arc<dyn RowSynthesis> {
    match features {
        [Feature::Close] => Arc::new(TargetOnly { target: 0 }),
        _ => Arc::new(OhlcvHeuristic::new(features.to_vec())),
    }
}

#[derive(Debug, Clone)]
pub struct ForecastRun {
    /// Raw model outputs, one per step.
    pub scaled: Vec<f64>,
    /// `scaled` mapped back to price space.
    pub prices: Vec<f64>,
    /// History followed by one synthetic row per step.
    pub buffer: Vec<Vec<f64>>,
}

/// Multi-step forecaster: each step's prediction is appended to the buffer and feeds the next
/// step's window. Errors compound across steps and are not damped.
#[derive(Clone)]
pub struct RecursiveForecaster {
    predictor: Arc<dyn Predictor>,
    scaler: Arc<dyn FeatureScaler>,
    synthesis: Arc<dyn RowSynthesis>,
}

impl RecursiveForecaster {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        scaler: Arc<dyn FeatureScaler>,
        synthesis: Arc<dyn RowSynthesis>,
    ) -> Self {
        Self {
            predictor,
            scaler,
            synthesis,
        }
    }

    pub fn run(&self, history: Vec<Vec<f64>>, steps: usize) -> Result<ForecastRun> {
        let w = self.predictor.window();
        if steps == 0 {
            return Err(ForecastError::Range("forecast steps must be > 0".to_string()));
        }
        if history.len() < w {
            return Err(ForecastError::Model(format!(
                "need at least {w} rows of history, got {}",
                history.len()
            )));
        }

        let mut buffer = history;
        buffer.reserve(steps);
        let mut scaled = Vec::with_capacity(steps);
        for _ in 0..steps {
            let y = self.predictor.step(&buffer[buffer.len() - w..])?;
            let row = self.synthesis.next_row(&buffer, y);
            buffer.push(row);
            scaled.push(y);
        }

        let prices = self.scaler.inverse_target(&scaled);
        Ok(ForecastRun {
            scaled,
            prices,
            buffer,
        })
    }

    /// Price forecast for `steps` periods past the end of `history`.
    pub fn forecast(&self, history: Vec<Vec<f64>>, steps: usize) -> Result<Vec<f64>> {
        Ok(self.run(history, steps)?.prices)
    }
}
