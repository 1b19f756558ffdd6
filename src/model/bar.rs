use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One column of the model input. Order in the configured feature list defines the scaler's
/// column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Open,
        Feature::High,
        Feature::Low,
        Feature::Close,
        Feature::Volume,
    ];
}

/// A row as delivered by the upstream source. Any field may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawBar {
    /// Complete row, or `None` if any field is missing or not finite.
    pub fn complete(&self) -> Option<Bar> {
        let field = |v: Option<f64>| v.filter(|x| x.is_finite());
        Some(Bar {
            date: self.date,
            open: field(self.open)?,
            high: field(self.high)?,
            low: field(self.low)?,
            close: field(self.close)?,
            volume: field(self.volume)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn value(&self, feature: Feature) -> f64 {
        match feature {
            Feature::Open => self.open,
            Feature::High => self.high,
            Feature::Low => self.low,
            Feature::Close => self.close,
            Feature::Volume => self.volume,
        }
    }

    pub fn row(&self, features: &[Feature]) -> Vec<f64> {
        features.iter().map(|f| self.value(*f)).collect()
    }
}

/// Date-ordered bars for one upstream query. Strictly increasing by date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build from upstream rows: incomplete rows are dropped, rows are sorted by date and a
    /// repeated date keeps the row delivered last.
    pub fn from_raw(rows: Vec<RawBar>) -> Self {
        let mut bars: Vec<Bar> = rows.iter().filter_map(RawBar::complete).collect();
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(prev) if prev.date == bar.date => *prev = bar,
                _ => deduped.push(bar),
            }
        }
        Self { bars: deduped }
    }

    pub fn from_bars(bars: Vec<Bar>) -> Self {
        Self::from_raw(
            bars.into_iter()
                .map(|b| RawBar {
                    date: b.date,
                    open: Some(b.open),
                    high: Some(b.high),
                    low: Some(b.low),
                    close: Some(b.close),
                    volume: Some(b.volume),
                })
                .collect(),
        )
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    /// Row-major feature matrix in the given column order.
    pub fn matrix(&self, features: &[Feature]) -> Vec<Vec<f64>> {
        self.bars.iter().map(|b| b.row(features)).collect()
    }

    /// Last `n` bars (all bars if fewer exist).
    pub fn tail(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }
}
