use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Backtest pair: the model's prediction for `date` made from the preceding window only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalPoint {
    pub date: NaiveDate,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Combined chart payload. Cached verbatim; never modified after assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub history: Vec<HistoryPoint>,
    pub eval: Vec<EvalPoint>,
    pub forecast: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextDayPrediction {
    pub date: NaiveDate,
    pub last_close: f64,
    pub pred_next_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatePrediction {
    pub last_date: NaiveDate,
    pub target_date: NaiveDate,
    pub days_ahead: i64,
    pub predicted_price: f64,
}
