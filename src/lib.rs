//! # crypto-bts: deterministic candle backtesting
//!
//! **crypto-bts** replays a historical OHLCV series, already enriched with
//! indicator columns, bar by bar through a pluggable strategy. It manages
//! simulated positions and an account, and produces a trade ledger, an equity
//! curve and performance metrics. Identical inputs always give identical outputs.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`Bar` / `Series`** | Validated OHLCV bars with named indicator columns, strictly ordered in time.           |
//! | **`Strategy`** | Turns the bars seen so far into a `Decision` (hold, enter, exit).                            |
//! | **`PositionManager`** | Open positions, risk-based sizing, capacity and the `Account`.                        |
//! | **`ExecutionSimulator`** | Fills at the next open, stop/target exits and fee/slippage costs.                  |
//! | **`Backtest`** | The bar-by-bar loop producing the `Report`.                                                  |
//! | **`Metrics`** | Drawdown, Sharpe and Sortino ratios, win rate, profit factor and more.                       |
//! | **`Optimizer`** | Parallel parameter sweeps *(feature `optimizer`)*.                                         |
//!
//! ## Execution Model
//! - A decision taken at bar *i*'s close fills at bar *i+1*'s open.
//! - Stops and targets fill at their literal level; when one bar touches both, the stop wins.
//! - Positions still open on the last bar are closed at its close with reason `end-of-data`.
//! - Fees and slippage are basis points of notional, charged on entry and exit.
//! - A short is liquidated at the price where its loss plus exit costs reach its
//!   notional, so allocated capital never exceeds the cash balance.
//!
//! ## Getting Started
//! ```rust
//! use crypto_bts::prelude::*;
//! use chrono::{DateTime, Duration};
//!
//! let bars = [100.0, 110.0, 90.0]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &close)| {
//!         BarBuilder::builder()
//!             .timestamp(DateTime::default() + Duration::hours(i as i64))
//!             .open(close)
//!             .high(close + 1.0)
//!             .low(close - 1.0)
//!             .close(close)
//!             .build()
//!     })
//!     .collect::<Result<Vec<_>>>()
//!     .unwrap();
//!
//! let config = BacktestConfig::default().initial_balance(10_000.0).risk_per_trade(0.02);
//! let mut backtest = Backtest::new(Series::new(bars).unwrap(), config).unwrap();
//!
//! // Go long after the first bar, then hold until the data runs out.
//! let strategy = |history: &[Bar], _: &[Position]| {
//!     if history.len() == 1 { Decision::long(None, None) } else { Decision::Hold }
//! };
//! let report = backtest.run(&strategy).unwrap();
//!
//! assert_eq!(report.trades.len(), 1);
//! assert_eq!(report.trades[0].exit_reason, ExitReason::EndOfData);
//! assert!(report.final_equity() < 10_000.0);
//! println!("{}", report.metrics());
//! ```
//!
//! ## Features
//! | Feature     | Purpose                                                                                     |
//! |-------------|---------------------------------------------------------------------------------------------|
//! | `serde` *(default)* | Serialize results, read JSON configs and kline files.                               |
//! | `export`    | CSV trade ledger and equity curve, JSON report.                                             |
//! | `optimizer` | Parallel parameter sweeps with [`rayon`](https://crates.io/crates/rayon).                   |
//! | `cli`       | The `crypto-bts` binary.                                                                    |
//!
//! Indicator columns are computed outside the engine, e.g. with the
//! [`ta`](https://crates.io/crates/ta) crate, and attached with
//! `Series::with_indicator`.
//!
//! ## Error Handling
//! Malformed bars, unordered series and invalid configurations are returned as
//! [`errors::Error`] before any bar is simulated. Rejected or malformed
//! decisions never abort a run: they are recorded in the report's decision log.
#![warn(missing_docs)]

/// Backtest configuration.
pub mod config;

/// Core simulation components: bars, positions, account, execution and the backtest loop.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Caller-owned indicator cache.
pub mod cache;

/// Performance metrics: drawdown, Sharpe ratio, win rate, etc.
pub mod metrics;

/// Strategy contract and built-in strategies.
pub mod strategy;

/// Kline loading.
#[cfg(feature = "serde")]
pub mod utils;

/// CSV and JSON export.
#[cfg(feature = "export")]
pub mod export;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::cache::*;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::metrics::Metrics;
    pub use crate::strategy::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;
}

/// Percent helpers on prices, in points: `10.0` means 10%.
///
/// ```rust
/// use crypto_bts::Percent;
///
/// let close = 200.0_f64;
/// assert_eq!(close.minus_percent(5.0), 190.0);
/// assert_eq!(close.percent_change(220.0), 10.0);
/// ```
pub trait Percent {
    /// Value raised by `percent` percent.
    fn plus_percent(self, percent: f64) -> f64;

    /// Value lowered by `percent` percent.
    fn minus_percent(self, percent: f64) -> f64;

    /// Percent change from the value to `new`.
    fn percent_change(self, new: f64) -> f64;
}

impl Percent for f64 {
    fn plus_percent(self, percent: f64) -> f64 {
        self * (1.0 + percent / 100.0)
    }

    fn minus_percent(self, percent: f64) -> f64 {
        self * (1.0 - percent / 100.0)
    }

    fn percent_change(self, new: f64) -> f64 {
        (new - self) / self * 100.0
    }
}
