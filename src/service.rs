//! Request-facing orchestration: price cache, forecast cache, and the inference pool.

use anyhow::Context;
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::{parse_period_days, Config};
use crate::error::{ForecastError, Result};
use crate::forecast::{synthesis_for, Backtester, RecursiveForecaster, TrimPolicy};
use crate::model::bar::{Feature, PriceSeries};
use crate::model::forecast::{
    DatePrediction, ForecastPoint, ForecastResult, HistoryPoint, NextDayPrediction,
};
use crate::predictor::{LinearWindowModel, Predictor};
use crate::runtime::WorkerPool;
use crate::scaler::{FeatureScaler, MinMaxScaler};
use crate::source::{PriceKey, PriceSource};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub symbol: String,
    pub default_period: String,
    pub interval: String,
    pub interval_days: i64,
    pub features: Vec<Feature>,
    pub horizon: usize,
    pub eval_span: usize,
    pub history_len: usize,
    pub max_days_ahead: i64,
    pub backtest_trim: TrimPolicy,
    pub price_ttl: Duration,
    pub forecast_ttl: Duration,
    pub workers: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            symbol: config.market.symbol.clone(),
            default_period: config.market.default_period.clone(),
            interval: config.market.interval.clone(),
            interval_days: config.market.interval_days()?,
            features: config.model.features.clone(),
            horizon: config.forecast.horizon,
            eval_span: config.forecast.eval_span,
            history_len: config.forecast.history_len,
            max_days_ahead: config.forecast.max_days_ahead,
            backtest_trim: config.forecast.backtest_trim,
            price_ttl: Duration::from_secs(config.cache.price_ttl_secs),
            forecast_ttl: Duration::from_secs(config.cache.forecast_ttl_secs),
            workers: config.workers.inference,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForecastKey {
    pub period: String,
    pub interval: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ClearedCounts {
    pub prices: usize,
    pub forecasts: usize,
}

/// Process-wide service state. Cloning is cheap and every clone shares the same caches.
#[derive(Clone)]
pub struct ForecastService {
    settings: Arc<ServiceSettings>,
    source: Arc<dyn PriceSource>,
    predictor: Arc<dyn Predictor>,
    scaler: Arc<dyn FeatureScaler>,
    forecaster: RecursiveForecaster,
    backtester: Backtester,
    pool: WorkerPool,
    prices: TtlCache<PriceKey, PriceSeries>,
    forecasts: TtlCache<ForecastKey, Arc<ForecastResult>>,
}

impl ForecastService {
    pub fn new(
        settings: ServiceSettings,
        source: Arc<dyn PriceSource>,
        predictor: Arc<dyn Predictor>,
        scaler: Arc<dyn FeatureScaler>,
    ) -> Result<Self> {
        let n = settings.features.len();
        if predictor.n_features() != n || scaler.n_features() != n {
            return Err(ForecastError::Config(format!(
                "feature count mismatch: config {n}, model {}, scaler {}",
                predictor.n_features(),
                scaler.n_features()
            )));
        }
        if settings.interval_days <= 0 {
            return Err(ForecastError::Config("interval_days must be > 0".to_string()));
        }

        let forecaster = RecursiveForecaster::new(
            Arc::clone(&predictor),
            Arc::clone(&scaler),
            synthesis_for(&settings.features),
        );
        let backtester = Backtester::new(
            Arc::clone(&predictor),
            Arc::clone(&scaler),
            settings.backtest_trim,
        );
        Ok(Self {
            pool: WorkerPool::new(settings.workers),
            prices: TtlCache::new("prices", settings.price_ttl),
            forecasts: TtlCache::new("forecasts", settings.forecast_ttl),
            settings: Arc::new(settings),
            source,
            predictor,
            scaler,
            forecaster,
            backtester,
        })
    }

    /// Load model and scaler artifacts named in `config`. Any failure here is fatal to startup.
    pub fn from_config(config: &Config, source: Arc<dyn PriceSource>) -> anyhow::Result<Self> {
        let settings = ServiceSettings::from_config(config)?;
        let model = LinearWindowModel::from_json_file(&config.model.weights_path)
            .with_context(|| format!("loading model {}", config.model.weights_path.display()))?;
        let scaler = MinMaxScaler::from_json_file(&config.model.scaler_path)
            .with_context(|| format!("loading scaler {}", config.model.scaler_path.display()))?;
        if model.features() != config.model.features.as_slice()
            || scaler.features() != config.model.features.as_slice()
        {
            anyhow::bail!(
                "model.features {:?} do not match artifact columns (model {:?}, scaler {:?})",
                config.model.features,
                model.features(),
                scaler.features()
            );
        }
        if model.window() != config.model.window {
            anyhow::bail!(
                "model.window is {} but the model artifact has {} rows",
                config.model.window,
                model.window()
            );
        }
        Ok(Self::new(settings, source, Arc::new(model), Arc::new(scaler))?)
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn resolve_period<'a>(&'a self, period: Option<&'a str>) -> Result<&'a str> {
        let period = period
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.settings.default_period);
        parse_period_days(period).map_err(|e| ForecastError::Parse(format!("{e:#}")))?;
        Ok(period)
    }

    /// Cached upstream series for `period`. Consumers get their own copy.
    pub async fn price_series(&self, period: &str) -> Result<PriceSeries> {
        let key = PriceKey::new(&self.settings.symbol, period, &self.settings.interval);
        let source = Arc::clone(&self.source);
        let pool = self.pool.clone();
        let fill_key = key.clone();
        let symbol = key.symbol.clone();
        self.prices
            .get_or_fill(key, move || async move {
                let rows = pool
                    .run_as(ForecastError::Fetch, move || source.fetch(&fill_key))
                    .await?;
                let series = PriceSeries::from_raw(rows);
                if series.is_empty() {
                    return Err(ForecastError::Fetch(format!(
                        "upstream returned no complete rows for {symbol}"
                    )));
                }
                Ok(series)
            })
            .await
    }

    /// History, backtest overlay and forward forecast for `period`, cached per period.
    pub async fn forecast_view(&self, period: &str) -> Result<Arc<ForecastResult>> {
        let key = ForecastKey {
            period: period.to_string(),
            interval: self.settings.interval.clone(),
        };
        let svc = self.clone();
        let period = period.to_string();
        self.forecasts
            .get_or_fill(key, move || async move { svc.assemble(&period).await.map(Arc::new) })
            .await
    }

    async fn assemble(&self, period: &str) -> Result<ForecastResult> {
        let series = self.price_series(period).await?;
        let scaled = self.scaled_history(&series)?;
        let last_date = self.last_date(&series)?;

        let forecaster = self.forecaster.clone();
        let horizon = self.settings.horizon;
        let history = scaled.clone();
        let forward = self
            .pool
            .run(move || forecaster.forecast(history, horizon));

        let backtester = self.backtester.clone();
        let span = self.settings.eval_span;
        let bt_series = series.clone();
        let eval = self
            .pool
            .run(move || backtester.run(&bt_series, &scaled, span));

        let (prices, eval) = tokio::try_join!(forward, eval)?;

        let result = ForecastResult {
            history: series
                .tail(self.settings.history_len)
                .iter()
                .map(|b| HistoryPoint {
                    date: b.date,
                    price: b.close,
                })
                .collect(),
            eval,
            forecast: prices
                .into_iter()
                .enumerate()
                .map(|(k, price)| ForecastPoint {
                    date: self.step_date(last_date, k as i64 + 1),
                    price,
                })
                .collect(),
        };
        tracing::info!(
            period,
            rows = series.len(),
            eval = result.eval.len(),
            steps = result.forecast.len(),
            "Forecast assembled"
        );
        Ok(result)
    }

    /// One step past the last observation.
    pub async fn predict_next(&self, period: &str) -> Result<NextDayPrediction> {
        let series = self.price_series(period).await?;
        let scaled = self.scaled_history(&series)?;
        let last = series
            .last()
            .ok_or_else(|| ForecastError::Fetch("empty price series".to_string()))?;

        let forecaster = self.forecaster.clone();
        let prices = self.pool.run(move || forecaster.forecast(scaled, 1)).await?;
        Ok(NextDayPrediction {
            date: last.date,
            last_close: last.close,
            pred_next_day: prices[0],
        })
    }

    /// Recursive forecast out to `target_date` (`YYYY-MM-DD`), at most `max_days_ahead` past the
    /// last known date.
    pub async fn predict_date(&self, target_date: &str, period: &str) -> Result<DatePrediction> {
        let target = NaiveDate::parse_from_str(target_date.trim(), "%Y-%m-%d").map_err(|_| {
            ForecastError::Parse(format!(
                "invalid target_date '{target_date}': expected YYYY-MM-DD"
            ))
        })?;

        let series = self.price_series(period).await?;
        let last_date = self.last_date(&series)?;
        let days_ahead = (target - last_date).num_days();
        if days_ahead <= 0 {
            return Err(ForecastError::Range(format!(
                "target_date {target} must be after the last known date {last_date}"
            )));
        }
        if days_ahead > self.settings.max_days_ahead {
            return Err(ForecastError::Range(format!(
                "target_date {target} is {days_ahead} days ahead; maximum is {}",
                self.settings.max_days_ahead
            )));
        }

        let interval_days = self.settings.interval_days;
        let steps = ((days_ahead + interval_days - 1) / interval_days) as usize;
        let scaled = self.scaled_history(&series)?;
        let forecaster = self.forecaster.clone();
        let prices = self
            .pool
            .run(move || forecaster.forecast(scaled, steps))
            .await?;
        let predicted_price = *prices
            .last()
            .ok_or_else(|| ForecastError::Model("forecast returned no values".to_string()))?;

        Ok(DatePrediction {
            last_date,
            target_date: target,
            days_ahead,
            predicted_price,
        })
    }

    pub fn clear_caches(&self) -> ClearedCounts {
        let cleared = ClearedCounts {
            prices: self.prices.clear(),
            forecasts: self.forecasts.clear(),
        };
        tracing::info!(
            prices = cleared.prices,
            forecasts = cleared.forecasts,
            "Caches cleared"
        );
        cleared
    }

    fn scaled_history(&self, series: &PriceSeries) -> Result<Vec<Vec<f64>>> {
        let w = self.predictor.window();
        if series.len() < w {
            return Err(ForecastError::Fetch(format!(
                "need at least {w} rows of history, upstream returned {}",
                series.len()
            )));
        }
        Ok(self
            .scaler
            .forward_rows(&series.matrix(&self.settings.features)))
    }

    fn last_date(&self, series: &PriceSeries) -> Result<NaiveDate> {
        series
            .last()
            .map(|b| b.date)
            .ok_or_else(|| ForecastError::Fetch("empty price series".to_string()))
    }

    fn step_date(&self, last: NaiveDate, k: i64) -> NaiveDate {
        last + ChronoDuration::days(k * self.settings.interval_days)
    }
}
