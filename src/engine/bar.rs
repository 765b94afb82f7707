use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// One OHLCV record with its precomputed indicator columns.
///
/// Bars are immutable once built; use [`BarBuilder`] to create them.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    indicators: BTreeMap<String, f64>,
}

impl Bar {
    /// Returns the bar timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the open price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Returns the high price.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Returns the low price.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Returns the close price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Returns the traded volume.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Returns the value of an indicator column.
    ///
    /// `None` when the column is absent or still warming up (NaN).
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| v.is_finite())
    }

    /// Returns all indicator columns in name order.
    pub fn indicators(&self) -> &BTreeMap<String, f64> {
        &self.indicators
    }

    /// Returns a copy of the bar with one more indicator value.
    pub fn with_indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }
}

/// Builder for [`Bar`] that validates the OHLC envelope.
#[derive(Debug, Default)]
pub struct BarBuilder {
    timestamp: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
    indicators: BTreeMap<String, f64>,
}

impl BarBuilder {
    /// Starts a new builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the timestamp.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the open price.
    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    /// Sets the high price.
    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    /// Sets the low price.
    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    /// Sets the close price.
    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// Sets the volume.
    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Adds an indicator value. NaN marks a warm-up gap.
    pub fn indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    /// Validates the fields and builds the bar.
    pub fn build(self) -> Result<Bar> {
        let timestamp = self.timestamp.ok_or(Error::MissingField("timestamp"))?;
        let open = self.open.ok_or(Error::MissingField("open"))?;
        let high = self.high.ok_or(Error::MissingField("high"))?;
        let low = self.low.ok_or(Error::MissingField("low"))?;
        let close = self.close.ok_or(Error::MissingField("close"))?;
        let volume = self.volume.unwrap_or(0.0);

        let bar = Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: self.indicators,
        };
        bar.validate()?;
        Ok(bar)
    }
}

impl Bar {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidBar(format!("{name} must be positive and finite (got {value})")));
            }
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(Error::InvalidBar(format!("volume must be non-negative (got {})", self.volume)));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) || self.low > self.high {
            return Err(Error::InvalidBar(format!(
                "OHLC envelope broken at {}: o={} h={} l={} c={}",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }
}

/// A validated, shareable series of bars with strictly increasing timestamps.
///
/// Cloning is cheap: the bars live behind an `Arc`, so parallel runs can share
/// one series without sharing any mutable state.
#[derive(Debug, Clone)]
pub struct Series {
    bars: Arc<[Bar]>,
}

impl Series {
    /// Validates ordering once and wraps the bars.
    ///
    /// Every bar is re-validated too, which catches bars deserialized without
    /// going through [`BarBuilder`].
    pub fn new(bars: impl Into<Arc<[Bar]>>) -> Result<Self> {
        let bars = bars.into();
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()?;
            if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
                return Err(Error::UnorderedSeries { index });
            }
        }
        Ok(Self { bars })
    }

    /// An empty series.
    pub fn empty() -> Self {
        Self { bars: Arc::from(Vec::new()) }
    }

    /// Returns a new series with an indicator column attached to every bar.
    pub fn with_indicator(&self, name: &str, values: &[f64]) -> Result<Self> {
        if values.len() != self.bars.len() {
            return Err(Error::IndicatorLength {
                name: name.to_string(),
                got: values.len(),
                expected: self.bars.len(),
            });
        }
        let bars = self
            .bars
            .iter()
            .zip(values)
            .map(|(bar, value)| bar.clone().with_indicator(name, *value))
            .collect::<Vec<_>>();
        Ok(Self { bars: Arc::from(bars) })
    }

    /// Returns the first `len` bars as a new series.
    pub fn truncated(&self, len: usize) -> Self {
        let len = len.min(self.bars.len());
        Self {
            bars: Arc::from(&self.bars[..len]),
        }
    }

    /// Returns the bars.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Returns the number of bars.
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Returns `true` when the series holds no bars.
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Returns the close prices in order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(Bar::close).collect()
    }
}
