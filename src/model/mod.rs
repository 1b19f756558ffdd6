pub mod bar;
pub mod forecast;

pub use bar::{Bar, Feature, PriceSeries, RawBar};
pub use forecast::{
    DatePrediction, EvalPoint, ForecastPoint, ForecastResult, HistoryPoint, NextDayPrediction,
};
