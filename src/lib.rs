pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod forecast;
pub mod model;
pub mod predictor;
pub mod runtime;
pub mod scaler;
pub mod service;
pub mod source;
