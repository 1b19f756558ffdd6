#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};

use sol_forecast::error::{ForecastError, Result};
use sol_forecast::forecast::TrimPolicy;
use sol_forecast::model::bar::{Feature, RawBar};
use sol_forecast::predictor::{LinearWindowModel, Predictor};
use sol_forecast::scaler::{FeatureScaler, MinMaxScaler};
use sol_forecast::service::{ForecastService, ServiceSettings};
use sol_forecast::source::{PriceKey, PriceSource};

pub fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + ChronoDuration::days(n)
}

/// `n` consecutive daily rows with close = 100 + i.
pub fn daily_rows(n: usize) -> Vec<RawBar> {
    (0..n)
        .map(|i| {
            let close = 100.0 + i as f64;
            RawBar {
                date: day(i as i64),
                open: Some(close - 0.5),
                high: Some(close + 1.0),
                low: Some(close - 1.0),
                close: Some(close),
                volume: Some(1_000.0 + i as f64),
            }
        })
        .collect()
}

pub struct FakeSource {
    rows: Vec<RawBar>,
    delay: Duration,
    fail: bool,
    panic: bool,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(rows: Vec<RawBar>) -> Self {
        Self {
            rows,
            delay: Duration::ZERO,
            fail: false,
            panic: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PriceSource for FakeSource {
    fn fetch(&self, _key: &PriceKey) -> Result<Vec<RawBar>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic {
            panic!("upstream client crashed");
        }
        if self.fail {
            return Err(ForecastError::Fetch("upstream unavailable".to_string()));
        }
        Ok(self.rows.clone())
    }
}

/// Wraps a predictor, counting calls and recording every window it sees.
pub struct RecordingPredictor<P> {
    inner: P,
    pub calls: AtomicUsize,
    pub windows: Mutex<Vec<Vec<Vec<f64>>>>,
}

impl<P: Predictor> RecordingPredictor<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: Predictor> Predictor for RecordingPredictor<P> {
    fn window(&self) -> usize {
        self.inner.window()
    }

    fn n_features(&self) -> usize {
        self.inner.n_features()
    }

    fn step(&self, window: &[Vec<f64>]) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(window.to_vec());
        self.inner.step(window)
    }
}

/// Persistence model that fails every step while `failing` is set.
pub struct SwitchablePredictor {
    inner: LinearWindowModel,
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl SwitchablePredictor {
    pub fn failing(window: usize) -> Self {
        Self {
            inner: persistence(window),
            failing: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for SwitchablePredictor {
    fn window(&self) -> usize {
        self.inner.window()
    }

    fn n_features(&self) -> usize {
        self.inner.n_features()
    }

    fn step(&self, window: &[Vec<f64>]) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ForecastError::Model("inference produced NaN".to_string()));
        }
        self.inner.step(window)
    }
}

/// Wraps a scaler, counting batched inverse calls.
pub struct CountingScaler {
    inner: MinMaxScaler,
    pub inverse_calls: AtomicUsize,
}

impl CountingScaler {
    pub fn new(inner: MinMaxScaler) -> Self {
        Self {
            inner,
            inverse_calls: AtomicUsize::new(0),
        }
    }

    pub fn inverse_calls(&self) -> usize {
        self.inverse_calls.load(Ordering::SeqCst)
    }
}

impl FeatureScaler for CountingScaler {
    fn n_features(&self) -> usize {
        self.inner.n_features()
    }

    fn forward_rows(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        self.inner.forward_rows(rows)
    }

    fn inverse_target(&self, scaled: &[f64]) -> Vec<f64> {
        self.inverse_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.inverse_target(scaled)
    }
}

pub fn close_scaler() -> MinMaxScaler {
    MinMaxScaler::univariate(100.0, 300.0).unwrap()
}

pub fn persistence(window: usize) -> LinearWindowModel {
    LinearWindowModel::persistence(vec![Feature::Close], window).unwrap()
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        symbol: "SOLUSDT".to_string(),
        default_period: "2y".to_string(),
        interval: "1d".to_string(),
        interval_days: 1,
        features: vec![Feature::Close],
        horizon: 30,
        eval_span: 60,
        history_len: 60,
        max_days_ahead: 60,
        backtest_trim: TrimPolicy::Tail,
        price_ttl: Duration::from_secs(300),
        forecast_ttl: Duration::from_secs(600),
        workers: 3,
    }
}

pub struct Harness {
    pub service: ForecastService,
    pub source: Arc<FakeSource>,
    pub predictor: Arc<RecordingPredictor<LinearWindowModel>>,
}

pub fn service_with(source: Arc<FakeSource>, predictor: Arc<dyn Predictor>) -> ForecastService {
    ForecastService::new(
        settings(),
        source as Arc<dyn PriceSource>,
        predictor,
        Arc::new(close_scaler()),
    )
    .unwrap()
}

pub fn harness(source: FakeSource, window: usize) -> Harness {
    let source = Arc::new(source);
    let predictor = Arc::new(RecordingPredictor::new(persistence(window)));
    let service = service_with(
        Arc::clone(&source),
        Arc::clone(&predictor) as Arc<dyn Predictor>,
    );
    Harness {
        service,
        source,
        predictor,
    }
}
