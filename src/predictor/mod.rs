//! Single-step sequence models.
//!
//! A [`Predictor`] maps the last `window()` scaled rows to the next scaled close. Calls are
//! synchronous and may be slow; async callers go through [`crate::runtime::WorkerPool`].

mod linear;

pub use linear::LinearWindowModel;

use crate::error::{ForecastError, Result};

pub trait Predictor: Send + Sync {
    /// Number of rows consumed per step.
    fn window(&self) -> usize;

    /// Number of columns per row.
    fn n_features(&self) -> usize;

    /// Next scaled target value for `window` (oldest row first).
    fn step(&self, window: &[Vec<f64>]) -> Result<f64>;
}

/// Shape check shared by implementations.
pub fn check_window(predictor: &dyn Predictor, window: &[Vec<f64>]) -> Result<()> {
    if window.len() != predictor.window() {
        return Err(ForecastError::Model(format!(
            "window has {} rows, model expects {}",
            window.len(),
            predictor.window()
        )));
    }
    if let Some(row) = window.iter().find(|r| r.len() != predictor.n_features()) {
        return Err(ForecastError::Model(format!(
            "row has {} features, model expects {}",
            row.len(),
            predictor.n_features()
        )));
    }
    Ok(())
}
