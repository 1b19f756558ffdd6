use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::OnceLock;

use super::{PriceKey, PriceSource};
use crate::config::{parse_interval_ms, parse_period_days};
use crate::error::{ForecastError, Result};
use crate::model::bar::RawBar;

const KLINES_PAGE_LIMIT: usize = 1000;
const MAX_PAGES: usize = 20;

/// Public spot klines (`/api/v3/klines`). No API key is needed.
pub struct BinanceKlineSource {
    base_url: String,
    // Built on first use from a pool thread; the blocking client must not be created on the
    // async runtime.
    http: OnceLock<reqwest::blocking::Client>,
}

impl BinanceKlineSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: OnceLock::new(),
        }
    }

    fn client(&self) -> &reqwest::blocking::Client {
        self.http.get_or_init(reqwest::blocking::Client::new)
    }

    fn fetch_page(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let start = start_ms.to_string();
        let limit = KLINES_PAGE_LIMIT.to_string();
        let resp = self
            .client()
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval),
                ("startTime", start.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(ForecastError::Fetch(format!(
                "klines request returned {status}: {}",
                compact_error_body(&body)
            )));
        }
        let root: Value = resp.json()?;
        root.as_array()
            .cloned()
            .ok_or_else(|| ForecastError::Fetch("klines response is not an array".to_string()))
    }
}

impl PriceSource for BinanceKlineSource {
    fn fetch(&self, key: &PriceKey) -> Result<Vec<RawBar>> {
        let period_days =
            parse_period_days(&key.period).map_err(|e| ForecastError::Fetch(format!("{e:#}")))?;
        parse_interval_ms(&key.interval).map_err(|e| ForecastError::Fetch(format!("{e:#}")))?;

        let now = Utc::now();
        let mut start_ms = (now - Duration::days(period_days)).timestamp_millis();
        let mut rows = Vec::new();
        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(&key.symbol, &key.interval, start_ms)?;
            let n = page.len();
            let mut last_open = None;
            for kline in &page {
                if let Some(bar) = parse_kline(kline) {
                    rows.push(bar);
                }
                last_open = kline.get(0).and_then(Value::as_i64).or(last_open);
            }
            match last_open {
                Some(t) if n == KLINES_PAGE_LIMIT => start_ms = t + 1,
                _ => break,
            }
        }

        tracing::info!(
            symbol = %key.symbol,
            period = %key.period,
            interval = %key.interval,
            rows = rows.len(),
            "Fetched historical klines"
        );
        if rows.is_empty() {
            return Err(ForecastError::Fetch(format!(
                "no klines returned for {}",
                key.symbol
            )));
        }
        Ok(rows)
    }
}

/// `[open_time, open, high, low, close, volume, close_time, ...]` with prices as strings.
/// Unparseable fields become `None`; a missing open time drops the row.
pub fn parse_kline(kline: &Value) -> Option<RawBar> {
    let arr = kline.as_array()?;
    let open_time = arr.first()?.as_i64()?;
    let date = DateTime::<Utc>::from_timestamp_millis(open_time)?.date_naive();
    let num = |i: usize| {
        arr.get(i).and_then(|v| match v {
            Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        })
    };
    Some(RawBar {
        date,
        open: num(1),
        high: num(2),
        low: num(3),
        close: num(4),
        volume: num(5),
    })
}

fn compact_error_body(body: &str) -> String {
    let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.len() > 180 {
        let cut = (0..=180).rev().find(|i| normalized.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &normalized[..cut])
    } else {
        normalized
    }
}
