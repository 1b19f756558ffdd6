pub mod backtest;
pub mod recursive;

pub use backtest::{Backtester, TrimPolicy};
pub use recursive::{
    synthesis_for, ForecastRun, OhlcvHeuristic, RecursiveForecaster, RowSynthesis, TargetOnly,
};
