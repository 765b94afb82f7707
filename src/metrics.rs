//! Performance metrics for backtesting.
//!
//! This module provides tools to calculate, from a trade ledger and an equity
//! curve:
//! - Max drawdown
//! - Profit factor
//! - Sharpe and Sortino ratios
//! - Win rate, average win/loss and holding time
//!
//! Nothing here touches the engine: a [`Report`](crate::engine::Report) or any
//! ledger loaded from disk can be summarized.

use std::fmt;

use chrono::Duration;

use crate::engine::{EquityPoint, Trade};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Summary statistics of a backtest.
///
/// Ratios are fractions (`0.25` is 25%). Built with [`Metrics::summarize`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metrics {
    /// Starting balance.
    pub initial_balance: f64,
    /// Equity of the last sample.
    pub final_equity: f64,
    /// `final_equity / initial_balance - 1`.
    pub total_return: f64,
    /// Number of closed trades.
    pub trades: usize,
    /// Trades with a positive net P&L.
    pub wins: usize,
    /// Trades with a negative net P&L.
    pub losses: usize,
    /// `wins / trades`.
    pub win_rate: f64,
    /// Mean P&L of winning trades.
    pub avg_win: f64,
    /// Mean P&L of losing trades (negative).
    pub avg_loss: f64,
    /// Sum of winning P&L.
    pub gross_profit: f64,
    /// Sum of losing P&L, as a positive number.
    pub gross_loss: f64,
    /// `gross_profit / gross_loss`, infinite with profits and no loss.
    /// Serialized as the string `"inf"` in that case.
    #[cfg_attr(feature = "serde", serde(with = "infinite_float"))]
    pub profit_factor: f64,
    /// Largest peak-to-trough decline of the equity curve, as a fraction of the peak.
    pub max_drawdown: f64,
    /// Annualized mean/std of per-sample returns.
    pub sharpe_ratio: f64,
    /// Annualized mean/downside deviation of per-sample returns.
    pub sortino_ratio: f64,
    /// Fees and slippage paid.
    pub total_fees: f64,
    /// Mean time between entry and exit, in seconds.
    pub avg_holding_secs: f64,
}

// JSON has no infinity; `+inf` goes out as `"inf"` and comes back from it.
#[cfg(feature = "serde")]
mod infinite_float {
    use serde::{Deserialize, Deserializer, Serializer, de};

    const INF: &str = "inf";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if *value == f64::INFINITY {
            serializer.serialize_str(INF)
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) if text == INF => Ok(f64::INFINITY),
            Repr::Text(text) => Err(de::Error::invalid_value(de::Unexpected::Str(&text), &INF)),
        }
    }
}

impl Metrics {
    /// Computes every metric from the ledger and the equity curve.
    pub fn summarize(trades: &[Trade], equity_curve: &[EquityPoint], initial_balance: f64) -> Self {
        let final_equity = equity_curve.last().map_or(initial_balance, |p| p.equity);

        let winners = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect::<Vec<_>>();
        let losers = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect::<Vec<_>>();
        let gross_profit = winners.iter().sum::<f64>();
        let gross_loss = -losers.iter().sum::<f64>();

        let returns = returns(equity_curve, initial_balance);
        let annualization = periods_per_year(equity_curve).sqrt();

        Self {
            initial_balance,
            final_equity,
            total_return: final_equity / initial_balance - 1.0,
            trades: trades.len(),
            wins: winners.len(),
            losses: losers.len(),
            win_rate: ratio(winners.len() as f64, trades.len() as f64),
            avg_win: mean(&winners),
            avg_loss: mean(&losers),
            gross_profit,
            gross_loss,
            profit_factor: profit_factor(gross_profit, gross_loss),
            max_drawdown: max_drawdown(equity_curve, initial_balance),
            sharpe_ratio: sharpe_ratio(&returns) * annualization,
            sortino_ratio: sortino_ratio(&returns) * annualization,
            total_fees: trades.iter().map(|t| t.fees).sum(),
            avg_holding_secs: mean(
                &trades
                    .iter()
                    .map(|t| t.duration().num_milliseconds() as f64 / 1000.0)
                    .collect::<Vec<_>>(),
            ),
        }
    }

    /// Net profit over the run.
    pub fn pnl(&self) -> f64 {
        self.final_equity - self.initial_balance
    }

    /// Mean holding time.
    pub fn avg_holding(&self) -> Duration {
        Duration::milliseconds((self.avg_holding_secs * 1000.0).round() as i64)
    }
}

/// Largest peak-to-trough decline as a fraction of the peak. The running peak
/// starts at `initial_balance`.
pub fn max_drawdown(equity_curve: &[EquityPoint], initial_balance: f64) -> f64 {
    let mut peak = initial_balance;
    let mut max_drawdown = 0.0_f64;

    for point in equity_curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - point.equity) / peak);
        }
    }
    max_drawdown
}

/// `gross_profit / gross_loss`; infinite without losses, zero without profits.
pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    match (gross_profit > 0.0, gross_loss > 0.0) {
        (false, _) => 0.0,
        (true, false) => f64::INFINITY,
        (true, true) => gross_profit / gross_loss,
    }
}

/// Per-sample simple returns; the first one is measured from `initial_balance`.
pub fn returns(equity_curve: &[EquityPoint], initial_balance: f64) -> Vec<f64> {
    let mut previous = initial_balance;
    equity_curve
        .iter()
        .map(|point| {
            let r = if previous != 0.0 { point.equity / previous - 1.0 } else { 0.0 };
            previous = point.equity;
            r
        })
        .collect()
}

/// Sampling frequency of the curve: a 365-day year over the median spacing
/// of consecutive timestamps. `1.0` when it cannot be inferred.
pub fn periods_per_year(equity_curve: &[EquityPoint]) -> f64 {
    let mut spacings = equity_curve
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .filter(|s| *s > 0.0)
        .collect::<Vec<_>>();
    if spacings.is_empty() {
        return 1.0;
    }
    spacings.sort_by(f64::total_cmp);

    let mid = spacings.len() / 2;
    let median = if spacings.len() % 2 == 0 {
        (spacings[mid - 1] + spacings[mid]) / 2.0
    } else {
        spacings[mid]
    };
    SECONDS_PER_YEAR / median
}

/// Mean over standard deviation of `returns`, not annualized. Zero when the
/// ratio is undefined.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_return = mean(returns);
    let std_dev = (returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
    ratio(mean_return, std_dev)
}

/// Mean over downside deviation of `returns`, not annualized. Zero when the
/// ratio is undefined.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside = (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
    ratio(mean(returns), downside)
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    numerator / denominator
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Metrics ===")?;
        writeln!(f, "Initial Balance: {:.2}", self.initial_balance)?;
        writeln!(f, "Final Equity: {:.2}", self.final_equity)?;
        writeln!(f, "Profit & Loss (P&L): {:.2}", self.pnl())?;
        writeln!(f, "Total Return: {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "Fees paid: {:.2}", self.total_fees)?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(f, "Trades: {} ({} wins, {} losses)", self.trades, self.wins, self.losses)?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "Average Win: {:.2}", self.avg_win)?;
        writeln!(f, "Average Loss: {:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Average Holding Time: {}", self.avg_holding())?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        write!(f, "Sortino Ratio: {:.2}", self.sortino_ratio)
    }
}

#[cfg(test)]
use crate::engine::{ExitReason, PositionSide};
#[cfg(test)]
use chrono::{DateTime, Utc};

#[cfg(test)]
fn t(hours: i64) -> DateTime<Utc> {
    DateTime::<Utc>::default() + Duration::hours(hours)
}

#[cfg(test)]
// Helper function to create a closed long trade with a given net P&L
fn create_trade(pnl: f64, hours: i64) -> Trade {
    Trade {
        position_id: 1,
        side: PositionSide::Long,
        quantity: 1.0,
        entry_price: 100.0,
        entry_timestamp: t(0),
        exit_price: 100.0 + pnl,
        exit_timestamp: t(hours),
        exit_reason: ExitReason::Signal,
        fees: 0.0,
        pnl,
    }
}

#[cfg(test)]
fn curve(equities: &[f64]) -> Vec<EquityPoint> {
    equities
        .iter()
        .enumerate()
        .map(|(i, &equity)| EquityPoint {
            timestamp: t(i as i64),
            cash: equity,
            locked: 0.0,
            unrealized_pnl: 0.0,
            equity,
            open_positions: 0,
        })
        .collect()
}

#[cfg(test)]
#[test]
fn max_drawdown_from_peak() {
    let equity = curve(&[10000.0, 12000.0, 9000.0, 11000.0]);
    assert_eq!(max_drawdown(&equity, 10000.0), 0.25); // (12000 - 9000) / 12000
}

#[cfg(test)]
#[test]
fn max_drawdown_counts_initial_balance_as_peak() {
    let equity = curve(&[9000.0, 9500.0]);
    assert!((max_drawdown(&equity, 10000.0) - 0.1).abs() < 1e-12);
}

#[cfg(test)]
#[test]
fn max_drawdown_no_samples() {
    assert_eq!(max_drawdown(&[], 10000.0), 0.0);
}

#[cfg(test)]
#[test]
fn profit_factor_cases() {
    assert_eq!(profit_factor(20.0, 10.0), 2.0);
    assert_eq!(profit_factor(20.0, 0.0), f64::INFINITY); // no losses
    assert_eq!(profit_factor(0.0, 0.0), 0.0); // no trades
    assert_eq!(profit_factor(0.0, 5.0), 0.0);
}

#[cfg(test)]
#[test]
fn sharpe_ratio_positive() {
    let equity = curve(&[10000.0, 10500.0, 10300.0, 10700.0]);
    let sharpe = sharpe_ratio(&returns(&equity, 10000.0));
    assert!(sharpe > 0.0 && sharpe < 1.0);
}

#[cfg(test)]
#[test]
fn sharpe_ratio_degenerate() {
    assert_eq!(sharpe_ratio(&[]), 0.0);
    assert_eq!(sharpe_ratio(&[0.01]), 0.0);
    assert_eq!(sharpe_ratio(&[0.0, 0.0, 0.0]), 0.0); // flat curve
    assert_eq!(sortino_ratio(&[0.01, 0.02]), 0.0); // no downside
}

#[cfg(test)]
#[test]
fn sortino_ignores_upside_volatility() {
    let returns = [0.05, -0.01, 0.08, -0.01];
    assert!(sortino_ratio(&returns) > sharpe_ratio(&returns));
}

#[cfg(test)]
#[test]
fn periods_per_year_from_median_spacing() {
    // hourly samples with one gap
    let mut equity = curve(&[1.0, 1.0, 1.0, 1.0]);
    equity[3].timestamp = t(10);
    assert_eq!(periods_per_year(&equity), 365.0 * 24.0);
    assert_eq!(periods_per_year(&equity[..1]), 1.0);
}

#[cfg(test)]
#[test]
fn summarize_trades() {
    let trades = vec![create_trade(20.0, 2), create_trade(-10.0, 4), create_trade(30.0, 6)];
    let equity = curve(&[10000.0, 10020.0, 10010.0, 10040.0]);
    let metrics = Metrics::summarize(&trades, &equity, 10000.0);

    assert_eq!(metrics.trades, 3);
    assert_eq!(metrics.wins, 2);
    assert_eq!(metrics.losses, 1);
    assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(metrics.avg_win, 25.0);
    assert_eq!(metrics.avg_loss, -10.0);
    assert_eq!(metrics.gross_profit, 50.0);
    assert_eq!(metrics.gross_loss, 10.0);
    assert_eq!(metrics.profit_factor, 5.0);
    assert_eq!(metrics.final_equity, 10040.0);
    assert!((metrics.total_return - 0.004).abs() < 1e-12);
    assert!((metrics.pnl() - 40.0).abs() < 1e-9);
    assert_eq!(metrics.avg_holding(), Duration::hours(4));
    assert!(metrics.sharpe_ratio > 0.0);
}

#[cfg(test)]
#[test]
fn summarize_nothing() {
    let metrics = Metrics::summarize(&[], &[], 10000.0);
    assert_eq!(metrics.trades, 0);
    assert_eq!(metrics.win_rate, 0.0);
    assert_eq!(metrics.profit_factor, 0.0);
    assert_eq!(metrics.final_equity, 10000.0);
    assert_eq!(metrics.sharpe_ratio, 0.0);
    assert!(metrics.to_string().starts_with("=== Backtest Metrics ==="));
}
