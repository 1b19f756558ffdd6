use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::forecast::backtest::TrimPolicy;
use crate::model::bar::Feature;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const DAY_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub market: MarketConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub symbol: String,
    pub rest_base_url: String,
    pub default_period: String,
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub weights_path: PathBuf,
    pub scaler_path: PathBuf,
    pub window: usize,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    pub horizon: usize,
    pub eval_span: usize,
    pub history_len: usize,
    pub max_days_ahead: i64,
    #[serde(default)]
    pub backtest_trim: TrimPolicy,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 30,
            eval_span: 60,
            history_len: 60,
            max_days_ahead: 60,
            backtest_trim: TrimPolicy::Tail,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub price_ttl_secs: u64,
    pub forecast_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price_ttl_secs: 300,
            forecast_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub inference: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { inference: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Parse a kline interval string (e.g. "1s", "1m", "1h", "1d", "1w", "1M") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1d'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => DAY_MS,
        "w" => 7 * DAY_MS,
        "M" => 30 * DAY_MS,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d/w/M",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

/// Interval length in whole calendar days. Sub-day and fractional-day intervals are rejected
/// because series are indexed by trading date.
pub fn interval_days(s: &str) -> Result<i64> {
    let ms = parse_interval_ms(s)?;
    if ms % DAY_MS != 0 {
        bail!(
            "invalid interval '{}': must be a whole number of days for a date-indexed series",
            s
        );
    }
    Ok((ms / DAY_MS) as i64)
}

/// Parse a lookback period ("60d", "12wk", "6mo", "2y", "max") into calendar days.
pub fn parse_period_days(s: &str) -> Result<i64> {
    let s = s.trim();
    if s == "max" {
        // Earliest public klines are from 2017; 10 years covers the whole range.
        return Ok(3_650);
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .with_context(|| format!("invalid period '{}': missing unit", s))?;
    let (num_str, unit) = s.split_at(split);
    let n: i64 = num_str
        .parse()
        .with_context(|| format!("invalid period '{}': quantity must be a positive integer", s))?;
    if n <= 0 {
        bail!("invalid period '{}': quantity must be > 0", s);
    }
    let unit_days = match unit {
        "d" => 1,
        "wk" => 7,
        "mo" => 30,
        "y" => 365,
        _ => bail!(
            "invalid period '{}': unsupported unit '{}', expected one of d/wk/mo/y",
            s,
            unit
        ),
    };
    n.checked_mul(unit_days)
        .with_context(|| format!("invalid period '{}': value is too large", s))
}

impl MarketConfig {
    pub fn interval_days(&self) -> Result<i64> {
        interval_days(&self.interval)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("SOL_FORECAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_path(&path)?;

        if let Ok(bind) = std::env::var("SOL_FORECAST_BIND") {
            config.server.bind = bind;
        }
        if let Ok(port) = std::env::var("SOL_FORECAST_PORT") {
            config.server.port = port
                .parse()
                .with_context(|| format!("SOL_FORECAST_PORT '{}' is not a valid port", port))?;
        }
        if let Ok(symbol) = std::env::var("SOL_FORECAST_SYMBOL") {
            config.market.symbol = symbol.trim().to_ascii_uppercase();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.window == 0 {
            bail!("model.window must be > 0");
        }
        if !self.model.features.contains(&Feature::Close) {
            bail!("model.features must include 'close'");
        }
        if self.forecast.horizon == 0 {
            bail!("forecast.horizon must be > 0");
        }
        if self.forecast.max_days_ahead <= 0 {
            bail!("forecast.max_days_ahead must be > 0");
        }
        if self.workers.inference == 0 {
            bail!("workers.inference must be > 0");
        }
        self.market
            .interval_days()
            .context("market.interval is invalid")?;
        parse_period_days(&self.market.default_period)
            .context("market.default_period is invalid")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0"
port = 8001

[market]
symbol = "SOLUSDT"
rest_base_url = "https://api.binance.com"
default_period = "2y"
interval = "1d"

[model]
weights_path = "artifacts/model.json"
scaler_path = "artifacts/scaler.json"
window = 60
features = ["open", "high", "low", "close", "volume"]

[forecast]
horizon = 30
eval_span = 60
history_len = 60
max_days_ahead = 60
backtest_trim = "full"

[cache]
price_ttl_secs = 120
forecast_ttl_secs = 600

[logging]
level = "debug"
"#;

    #[test]
    fn parse_sample_toml() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.market.symbol, "SOLUSDT");
        assert_eq!(config.model.window, 60);
        assert_eq!(config.model.features.len(), 5);
        assert_eq!(config.forecast.backtest_trim, TrimPolicy::Full);
        assert_eq!(config.cache.price_ttl_secs, 120);
        assert_eq!(config.workers.inference, 3);
        assert!(!config.logging.json);
        config.validate().unwrap();
    }

    #[test]
    fn validate_requires_close_feature() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.model.features = vec![Feature::Open, Feature::Volume];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_interval_valid() {
        assert_eq!(parse_interval_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_interval_ms("2h").unwrap(), 7_200_000);
        assert_eq!(parse_interval_ms("1M").unwrap(), 2_592_000_000);
    }

    #[test]
    fn parse_interval_rejects_invalid_inputs() {
        assert!(parse_interval_ms("").is_err());
        assert!(parse_interval_ms("d").is_err());
        assert!(parse_interval_ms("0d").is_err());
        assert!(parse_interval_ms("1x").is_err());
    }

    #[test]
    fn interval_days_requires_whole_days() {
        assert_eq!(interval_days("1d").unwrap(), 1);
        assert_eq!(interval_days("1w").unwrap(), 7);
        assert!(interval_days("4h").is_err());
    }

    #[test]
    fn parse_period_units() {
        assert_eq!(parse_period_days("60d").unwrap(), 60);
        assert_eq!(parse_period_days("2wk").unwrap(), 14);
        assert_eq!(parse_period_days("6mo").unwrap(), 180);
        assert_eq!(parse_period_days("2y").unwrap(), 730);
        assert!(parse_period_days("max").unwrap() > 730);
        assert!(parse_period_days("y").is_err());
        assert!(parse_period_days("0y").is_err());
        assert!(parse_period_days("3q").is_err());
    }
}
