//! Core simulation components.
//!
//! This module provides the types a backtest is made of:
//! - `Bar` / `Series`: validated OHLCV input with indicator columns.
//! - `Decision`: what a strategy asks for after a bar closes.
//! - `PositionManager`: open positions, sizing and the `Account`.
//! - `ExecutionSimulator`: fills, costs and stop/target exits.
//! - `Backtest`: the bar-by-bar loop producing the trade ledger and equity curve.

mod account;
mod bar;
mod decision;
mod execution;
mod manager;
mod position;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::BacktestConfig;
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::strategy::Strategy;

pub use account::*;
pub use bar::*;
pub use decision::*;
pub use execution::*;
pub use manager::*;
pub use position::*;

/// One sample of the equity curve, taken after a bar is fully processed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    /// Timestamp of the bar.
    pub timestamp: DateTime<Utc>,
    /// Cash balance.
    pub cash: f64,
    /// Capital allocated to open positions, never above `cash`.
    pub locked: f64,
    /// Unrealized P&L of the open positions.
    pub unrealized_pnl: f64,
    /// `cash + unrealized_pnl`.
    pub equity: f64,
    /// Number of open positions.
    pub open_positions: usize,
}

/// Everything a finished run produced.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Starting balance.
    pub initial_balance: f64,
    /// Closed trades in closing order.
    pub trades: Vec<Trade>,
    /// One sample per processed bar.
    pub equity_curve: Vec<EquityPoint>,
    /// Outcome of every non-hold decision.
    pub decisions: Vec<DecisionRecord>,
}

impl Report {
    /// Summarizes the run.
    pub fn metrics(&self) -> Metrics {
        Metrics::summarize(&self.trades, &self.equity_curve, self.initial_balance)
    }

    /// Equity after the last bar.
    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().map_or(self.initial_balance, |p| p.equity)
    }
}

/// Bar-by-bar backtest of one strategy over one series.
///
/// A `Backtest` owns its account, positions and ledger, so parallel runs never
/// share mutable state. Per bar, in order:
///
/// 1. the decision queued on the previous bar fills at this bar's open;
/// 2. stops, targets and liquidation prices are checked against the high/low
///    of positions opened before this bar, then open positions are marked at
///    the close;
/// 3. the strategy sees bars `0..=i` and the open positions;
/// 4. a non-hold decision is validated and queued for the next open;
/// 5. one equity sample is recorded. On the final bar every open position is
///    closed at the close (`end-of-data`) before the sample.
#[derive(Debug, Clone)]
pub struct Backtest {
    series: Series,
    config: BacktestConfig,
    manager: PositionManager,
    simulator: ExecutionSimulator,
    index: usize,
    pending: Option<PendingOrder>,
    trades: Vec<Trade>,
    equity: Vec<EquityPoint>,
    decisions: Vec<DecisionRecord>,
}

impl std::ops::Deref for Backtest {
    type Target = Account;

    fn deref(&self) -> &Self::Target {
        self.manager.account()
    }
}

impl Backtest {
    /// Creates a backtest. The configuration is validated here, before any bar
    /// is processed.
    ///
    /// ### Example
    /// ```rust
    /// use crypto_bts::prelude::*;
    /// use chrono::DateTime;
    ///
    /// let bar = BarBuilder::builder()
    ///     .timestamp(DateTime::default())
    ///     .open(100.0)
    ///     .high(110.0)
    ///     .low(95.0)
    ///     .close(105.0)
    ///     .build()
    ///     .unwrap();
    /// let series = Series::new(vec![bar]).unwrap();
    ///
    /// let mut bt = Backtest::new(series, BacktestConfig::default()).unwrap();
    /// let report = bt.run(&|_: &[Bar], _: &[Position]| Decision::Hold).unwrap();
    /// assert!(report.trades.is_empty());
    /// assert_eq!(report.equity_curve.len(), 1);
    /// ```
    pub fn new(series: Series, config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        let manager = PositionManager::new(config.initial_balance, config.max_positions, config.default_stop_fraction)?;
        let simulator = ExecutionSimulator::new(CostModel::new(config.fee_bps, config.slippage_bps), config.risk_per_trade);

        Ok(Self {
            series,
            config,
            manager,
            simulator,
            index: 0,
            pending: None,
            trades: Vec::new(),
            equity: Vec::new(),
            decisions: Vec::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Returns the series.
    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Returns an iterator over the open positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.manager.positions()
    }

    /// Returns the closed trades so far.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Returns the equity samples so far.
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity
    }

    /// Returns the decision audit log so far.
    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Index of the next bar to process.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns `true` once every bar has been processed.
    pub fn is_finished(&self) -> bool {
        self.index >= self.series.len()
    }

    /// Runs the whole series from a clean state and returns the report.
    pub fn run<S>(&mut self, strategy: &S) -> Result<Report>
    where
        S: Strategy + ?Sized,
    {
        self.reset();
        info!(
            strategy = strategy.name(),
            symbol = %self.config.symbol,
            timeframe = %self.config.timeframe,
            bars = self.series.len(),
            "backtest started"
        );

        while self.step(strategy)? {}
        let report = self.report();

        info!(
            trades = report.trades.len(),
            final_equity = report.final_equity(),
            "backtest finished"
        );
        Ok(report)
    }

    /// Processes the next bar. Returns `false` when there was none left.
    ///
    /// Callers may drive the loop themselves and stop between bars; the state
    /// stays consistent after every step.
    pub fn step<S>(&mut self, strategy: &S) -> Result<bool>
    where
        S: Strategy + ?Sized,
    {
        if self.is_finished() {
            return Ok(false);
        }

        let series = self.series.clone();
        let i = self.index;
        let bar = &series.bars()[i];
        let is_last = i + 1 == series.len();

        if let Some(order) = self.pending.take() {
            self.execute_pending(order, bar, i, is_last)?;
        }

        let closed = self.simulator.check_levels(bar, i, &mut self.manager)?;
        self.trades.extend(closed);
        self.manager.mark_to_market(bar);

        let positions = self.manager.positions().cloned().collect::<Vec<_>>();
        let decision = strategy.decide(&series.bars()[..=i], &positions);
        if !decision.is_hold() {
            self.queue(decision, bar, i, is_last);
        }

        if is_last {
            let closed = self.simulator.close_all_at_close(bar, &mut self.manager)?;
            if !closed.is_empty() {
                debug!(count = closed.len(), "closing positions at end of data");
            }
            self.trades.extend(closed);
        }
        self.record_equity(bar.timestamp());

        self.index += 1;
        Ok(true)
    }

    /// Snapshot of the results so far.
    ///
    /// An empty series still reports one equity sample: the initial balance.
    pub fn report(&self) -> Report {
        let mut equity_curve = self.equity.clone();
        if self.series.is_empty() {
            equity_curve.push(EquityPoint {
                timestamp: DateTime::default(),
                cash: self.config.initial_balance,
                locked: 0.0,
                unrealized_pnl: 0.0,
                equity: self.config.initial_balance,
                open_positions: 0,
            });
        }

        Report {
            initial_balance: self.config.initial_balance,
            trades: self.trades.clone(),
            equity_curve,
            decisions: self.decisions.clone(),
        }
    }

    /// Resets the backtest to its initial state.
    pub fn reset(&mut self) {
        self.index = 0;
        self.pending = None;
        self.manager.reset();
        self.trades.clear();
        self.equity.clear();
        self.decisions.clear();
    }

    fn queue(&mut self, decision: Decision, bar: &Bar, i: usize, is_last: bool) {
        let record = |outcome| DecisionRecord {
            bar_index: i,
            timestamp: bar.timestamp(),
            decision,
            outcome,
        };

        if let Err(reason) = decision.check_bracket(bar.close()) {
            warn!(bar = i, %reason, "invalid decision");
            self.decisions.push(record(DecisionOutcome::Invalid(reason)));
            return;
        }
        if is_last {
            debug!(bar = i, "decision on the last bar ignored");
            self.decisions.push(record(DecisionOutcome::Rejected(Rejection::NoNextBar)));
            return;
        }

        self.pending = Some(PendingOrder {
            decision,
            decided_at: i,
            decided_ts: bar.timestamp(),
        });
    }

    fn execute_pending(&mut self, order: PendingOrder, bar: &Bar, i: usize, is_last: bool) -> Result<()> {
        let outcome = if is_last && matches!(order.decision, Decision::Enter { .. }) {
            // it would be closed on the very bar it opened
            debug!(bar = i, "entry discarded on the last bar");
            DecisionOutcome::Rejected(Rejection::NoNextBar)
        } else {
            match self.simulator.fill(&order, bar, i, &mut self.manager)? {
                FillResult::Opened(position) => {
                    if let Some(hit) = ExecutionSimulator::level_hit(&position, bar) {
                        debug!(
                            bar = i,
                            id = position.id(),
                            reason = %hit.reason,
                            price = hit.price,
                            "entry bar crossed a level, watched from the next bar"
                        );
                    }
                    DecisionOutcome::Opened(position.id())
                }
                FillResult::Closed(trades) => {
                    let ids = trades.iter().map(|t| t.position_id).collect();
                    self.trades.extend(trades);
                    DecisionOutcome::Closed(ids)
                }
                FillResult::Rejected(rejection) => {
                    debug!(bar = i, %rejection, "decision ignored");
                    DecisionOutcome::Rejected(rejection)
                }
                FillResult::Invalid(reason) => {
                    warn!(bar = i, %reason, "invalid decision at fill");
                    DecisionOutcome::Invalid(reason)
                }
            }
        };

        self.decisions.push(DecisionRecord {
            bar_index: order.decided_at,
            timestamp: order.decided_ts,
            decision: order.decision,
            outcome,
        });
        Ok(())
    }

    fn record_equity(&mut self, timestamp: DateTime<Utc>) {
        let account = self.manager.account();
        self.equity.push(EquityPoint {
            timestamp,
            cash: account.balance(),
            locked: account.locked(),
            unrealized_pnl: account.unrealized_pnl(),
            equity: account.equity(),
            open_positions: self.manager.len(),
        });
    }
}

#[cfg(test)]
mod bts;
