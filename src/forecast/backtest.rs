use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ForecastError, Result};
use crate::model::bar::PriceSeries;
use crate::model::forecast::EvalPoint;
use crate::predictor::Predictor;
use crate::scaler::FeatureScaler;

/// Which indices the backtest evaluates before trimming to `span`.
///
/// Both produce identical output for the kept entries; `Tail` skips the inference calls whose
/// results `Full` would discard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimPolicy {
    /// Evaluate only the last `span` eligible indices.
    #[default]
    Tail,
    /// Evaluate every eligible index, then keep the last `span`.
    Full,
}

/// Point-in-time replay: the prediction for index `i` uses rows `[i - W, i)` only.
#[derive(Clone)]
pub struct Backtester {
    predictor: Arc<dyn Predictor>,
    scaler: Arc<dyn FeatureScaler>,
    policy: TrimPolicy,
}

impl Backtester {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        scaler: Arc<dyn FeatureScaler>,
        policy: TrimPolicy,
    ) -> Self {
        Self {
            predictor,
            scaler,
            policy,
        }
    }

    /// First index evaluated. `span == 0` means no trimming.
    pub fn first_index(&self, len: usize, span: usize) -> usize {
        let w = self.predictor.window();
        match self.policy {
            TrimPolicy::Tail if span > 0 => len.saturating_sub(span).max(w),
            _ => w,
        }
    }

    /// `scaled` must be the forward transform of `series` (one row per bar).
    pub fn run(&self, series: &PriceSeries, scaled: &[Vec<f64>], span: usize) -> Result<Vec<EvalPoint>> {
        if scaled.len() != series.len() {
            return Err(ForecastError::Model(format!(
                "scaled rows ({}) do not match series length ({})",
                scaled.len(),
                series.len()
            )));
        }
        let w = self.predictor.window();
        let bars = series.bars();

        let mut out = Vec::new();
        for i in self.first_index(bars.len(), span)..bars.len() {
            let y = self.predictor.step(&scaled[i - w..i])?;
            let predicted = self.scaler.inverse_target(&[y])[0];
            out.push(EvalPoint {
                date: bars[i].date,
                actual: bars[i].close,
                predicted,
            });
        }

        if span > 0 && out.len() > span {
            out.drain(..out.len() - span);
        }
        Ok(out)
    }
}
