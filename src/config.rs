//! Backtest configuration.
//!
//! [`BacktestConfig`] is validated once, before any bar is processed. With the
//! `serde` feature it can be loaded from a JSON file:
//!
//! ```json
//! {
//!   "initial_balance": 10000.0,
//!   "risk_per_trade": 0.02,
//!   "max_positions": 3,
//!   "symbol": "BTCUSDT",
//!   "timeframe": "1h",
//!   "fee_bps": 10.0
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::errors::{Error, Result};

/// Candle interval of the series. Metadata only: the engine never reads it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeframe {
    /// 1 minute.
    M1,
    /// 3 minutes.
    M3,
    /// 5 minutes.
    M5,
    /// 15 minutes.
    M15,
    /// 30 minutes.
    M30,
    /// 1 hour.
    #[default]
    H1,
    /// 2 hours.
    H2,
    /// 4 hours.
    H4,
    /// 6 hours.
    H6,
    /// 8 hours.
    H8,
    /// 12 hours.
    H12,
    /// 1 day.
    D1,
    /// 3 days.
    D3,
    /// 1 week.
    W1,
}

impl Timeframe {
    /// Exchange interval label (`1m`, `4h`, `1d`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
        }
    }

    /// Nominal length of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Self::M1 => Duration::minutes(1),
            Self::M3 => Duration::minutes(3),
            Self::M5 => Duration::minutes(5),
            Self::M15 => Duration::minutes(15),
            Self::M30 => Duration::minutes(30),
            Self::H1 => Duration::hours(1),
            Self::H2 => Duration::hours(2),
            Self::H4 => Duration::hours(4),
            Self::H6 => Duration::hours(6),
            Self::H8 => Duration::hours(8),
            Self::H12 => Duration::hours(12),
            Self::D1 => Duration::days(1),
            Self::D3 => Duration::days(3),
            Self::W1 => Duration::weeks(1),
        }
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let timeframe = match s {
            "1m" => Self::M1,
            "3m" => Self::M3,
            "5m" => Self::M5,
            "15m" => Self::M15,
            "30m" => Self::M30,
            "1h" => Self::H1,
            "2h" => Self::H2,
            "4h" => Self::H4,
            "6h" => Self::H6,
            "8h" => Self::H8,
            "12h" => Self::H12,
            "1d" => Self::D1,
            "3d" => Self::D3,
            "1w" => Self::W1,
            _ => return Err(Error::UnsupportedTimeframe(s.to_string())),
        };
        Ok(timeframe)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters consumed by the backtest engine.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    /// Starting cash, in quote currency. Must be positive.
    pub initial_balance: f64,
    /// Fraction of the balance risked per trade, in `(0, 1]`.
    pub risk_per_trade: f64,
    /// Maximum number of concurrently open positions, at least 1.
    pub max_positions: usize,
    /// Stop distance assumed when a decision carries no stop, as a fraction
    /// of the entry price.
    pub default_stop_fraction: f64,
    /// Exchange fee in basis points of notional, charged on entry and exit.
    pub fee_bps: f64,
    /// Slippage cost in basis points of notional, charged on entry and exit.
    pub slippage_bps: f64,
    /// Traded symbol (metadata).
    pub symbol: String,
    /// Candle interval (metadata).
    pub timeframe: Timeframe,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            risk_per_trade: 0.02,
            max_positions: 1,
            default_stop_fraction: 0.05,
            fee_bps: 0.0,
            slippage_bps: 0.0,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::default(),
        }
    }
}

impl BacktestConfig {
    /// Sets the initial balance.
    pub fn initial_balance(mut self, initial_balance: f64) -> Self {
        self.initial_balance = initial_balance;
        self
    }

    /// Sets the fraction of the balance risked per trade.
    pub fn risk_per_trade(mut self, risk_per_trade: f64) -> Self {
        self.risk_per_trade = risk_per_trade;
        self
    }

    /// Sets the maximum number of open positions.
    pub fn max_positions(mut self, max_positions: usize) -> Self {
        self.max_positions = max_positions;
        self
    }

    /// Sets the stop distance used when a decision has no stop.
    pub fn default_stop_fraction(mut self, fraction: f64) -> Self {
        self.default_stop_fraction = fraction;
        self
    }

    /// Sets the fee in basis points.
    pub fn fee_bps(mut self, fee_bps: f64) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    /// Sets the slippage cost in basis points.
    pub fn slippage_bps(mut self, slippage_bps: f64) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    /// Sets the symbol.
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Sets the timeframe.
    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    /// Checks every field. Called by the engine before a run starts.
    pub fn validate(&self) -> Result<()> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "initial_balance must be positive (got {})",
                self.initial_balance
            )));
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "risk_per_trade must be in (0, 1] (got {})",
                self.risk_per_trade
            )));
        }
        if self.max_positions == 0 {
            return Err(Error::InvalidConfig("max_positions must be at least 1".to_string()));
        }
        if !(self.default_stop_fraction > 0.0 && self.default_stop_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "default_stop_fraction must be in (0, 1] (got {})",
                self.default_stop_fraction
            )));
        }
        for (name, bps) in [("fee_bps", self.fee_bps), ("slippage_bps", self.slippage_bps)] {
            if !bps.is_finite() || bps < 0.0 {
                return Err(Error::InvalidConfig(format!("{name} must be >= 0 (got {bps})")));
            }
        }
        // a fill must not cost its whole notional
        if self.fee_bps + self.slippage_bps >= 10_000.0 {
            return Err(Error::InvalidConfig(format!(
                "fee_bps + slippage_bps must be below 10000 (got {})",
                self.fee_bps + self.slippage_bps
            )));
        }
        Ok(())
    }

    /// Reads and validates a JSON configuration file.
    #[cfg(feature = "serde")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}
