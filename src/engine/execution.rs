use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    Bar, Decision, ExitReason, ExitScope, InvalidReason, LevelHit, OpenRequest, Position, PositionId,
    PositionManager, PositionSide, Rejection, Trade,
};
use crate::errors::Result;

const BPS: f64 = 10_000.0;

/// Fixed basis-point costs charged on the notional of every fill.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostModel {
    fee_bps: f64,
    slippage_bps: f64,
}

impl CostModel {
    /// Creates a cost model from fee and slippage basis points.
    pub fn new(fee_bps: f64, slippage_bps: f64) -> Self {
        Self { fee_bps, slippage_bps }
    }

    /// Total cost as a fraction of notional.
    pub fn rate(&self) -> f64 {
        (self.fee_bps + self.slippage_bps) / BPS
    }

    /// Cost of a fill with the given notional.
    pub fn cost(&self, notional: f64) -> f64 {
        notional.abs() * self.rate()
    }
}

/// A decision waiting for the next bar's open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingOrder {
    /// The decision to execute.
    pub decision: Decision,
    /// Index of the bar the decision was made on.
    pub decided_at: usize,
    /// Timestamp of that bar.
    pub decided_ts: DateTime<Utc>,
}

/// Result of executing a pending decision.
#[derive(Debug, Clone, PartialEq)]
pub enum FillResult {
    /// A new position.
    Opened(Position),
    /// Closed trades, possibly empty when nothing matched the exit scope.
    Closed(Vec<Trade>),
    /// The decision was valid but could not be honored.
    Rejected(Rejection),
    /// The decision no longer makes sense at the fill price.
    Invalid(InvalidReason),
}

/// Turns decisions into simulated fills.
///
/// Signal-driven entries and exits fill at the open of the bar after the
/// decision. Stop and target exits fill at the literal level: the open is
/// never used because the level may have been touched intrabar.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionSimulator {
    costs: CostModel,
    risk_per_trade: f64,
}

impl ExecutionSimulator {
    /// Creates a simulator.
    pub fn new(costs: CostModel, risk_per_trade: f64) -> Self {
        Self { costs, risk_per_trade }
    }

    /// Returns the cost model.
    pub fn costs(&self) -> &CostModel {
        &self.costs
    }

    /// Executes a pending decision at `bar`'s open.
    pub fn fill(
        &self,
        order: &PendingOrder,
        bar: &Bar,
        bar_index: usize,
        manager: &mut PositionManager,
    ) -> Result<FillResult> {
        let price = bar.open();
        match order.decision {
            Decision::Hold => Ok(FillResult::Closed(Vec::new())),
            Decision::Enter { side, stop, target } => {
                // the open may have gapped through the levels since the decision
                if let Err(reason) = order.decision.check_bracket(price) {
                    return Ok(FillResult::Invalid(reason));
                }
                let request = OpenRequest {
                    side,
                    entry_price: price,
                    entry_timestamp: bar.timestamp(),
                    entry_index: bar_index,
                    risk_per_trade: self.risk_per_trade,
                    stop,
                    target,
                };
                Ok(match manager.open(request, &self.costs) {
                    Ok(position) => FillResult::Opened(position),
                    Err(rejection) => FillResult::Rejected(rejection),
                })
            }
            Decision::Exit(scope) => self.exit(scope, bar, manager),
        }
    }

    fn exit(&self, scope: ExitScope, bar: &Bar, manager: &mut PositionManager) -> Result<FillResult> {
        let price = bar.open();
        let ts = bar.timestamp();

        let ids = match scope {
            ExitScope::All => manager.positions().map(Position::id).collect::<Vec<_>>(),
            ExitScope::Side(side) => manager
                .positions()
                .filter(|p| p.side() == side)
                .map(Position::id)
                .collect(),
            ExitScope::Position(id) => {
                if manager.get(id).is_none() {
                    return Ok(FillResult::Invalid(InvalidReason::UnknownPosition(id)));
                }
                vec![id]
            }
            ExitScope::Partial(id, fraction) => return self.exit_partial(id, fraction, bar, manager),
        };

        let mut trades = Vec::with_capacity(ids.len());
        for id in ids {
            let (price, reason) = match manager.get(id) {
                Some(position) => Self::open_exit(position, price),
                None => (price, ExitReason::Signal),
            };
            trades.push(manager.close(id, price, ts, reason, &self.costs)?);
        }
        Ok(FillResult::Closed(trades))
    }

    // an open beyond the liquidation price fills at that price instead
    fn open_exit(position: &Position, open: f64) -> (f64, ExitReason) {
        match position.liquidation_price() {
            Some(level) if position.is_liquidated_at(open) => (level, ExitReason::Liquidation),
            _ => (open, ExitReason::Signal),
        }
    }

    fn exit_partial(&self, id: PositionId, fraction: f64, bar: &Bar, manager: &mut PositionManager) -> Result<FillResult> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Ok(FillResult::Invalid(InvalidReason::BadFraction(fraction)));
        }
        let Some(position) = manager.get(id) else {
            return Ok(FillResult::Invalid(InvalidReason::UnknownPosition(id)));
        };
        let (price, reason) = Self::open_exit(position, bar.open());
        let quantity = match reason {
            ExitReason::Liquidation => position.quantity(),
            _ => position.quantity() * fraction,
        };
        let trade = manager.close_partial(id, quantity, price, bar.timestamp(), reason, &self.costs)?;
        Ok(FillResult::Closed(vec![trade]))
    }

    /// Finds the stop, target or liquidation price touched by `bar`, if any.
    ///
    /// When the range touches both stop and target, the stop wins: OHLC data
    /// cannot tell which came first, so the worst case is assumed. A short's
    /// liquidation price preempts a stop set beyond it.
    pub fn level_hit(position: &Position, bar: &Bar) -> Option<LevelHit> {
        let (stop_hit, target_hit, liquidation_hit) = match position.side() {
            PositionSide::Long => (
                position.stop().filter(|stop| bar.low() <= *stop),
                position.target().filter(|target| bar.high() >= *target),
                position.liquidation_price().filter(|level| bar.low() <= *level),
            ),
            PositionSide::Short => (
                position.stop().filter(|stop| bar.high() >= *stop),
                position.target().filter(|target| bar.low() <= *target),
                position.liquidation_price().filter(|level| bar.high() >= *level),
            ),
        };
        let reached_first = |stop: f64, level: f64| match position.side() {
            PositionSide::Long => level > stop,
            PositionSide::Short => level < stop,
        };
        let (price, reason) = match (stop_hit, liquidation_hit, target_hit) {
            (Some(stop), Some(level), _) if reached_first(stop, level) => (level, ExitReason::Liquidation),
            (Some(stop), _, _) => (stop, ExitReason::Stop),
            (None, Some(level), _) => (level, ExitReason::Liquidation),
            (None, None, Some(target)) => (target, ExitReason::Target),
            (None, None, None) => return None,
        };
        Some(LevelHit { price, reason })
    }

    /// Closes every position whose stop, target or liquidation price is
    /// touched by `bar`.
    ///
    /// Positions entered on `bar` itself are skipped; their levels are
    /// watched from the next bar on.
    pub fn check_levels(&self, bar: &Bar, bar_index: usize, manager: &mut PositionManager) -> Result<Vec<Trade>> {
        let hits = manager
            .positions()
            .filter(|p| p.entry_index() < bar_index)
            .filter_map(|p| Self::level_hit(p, bar).map(|hit| (p.id(), hit)))
            .collect::<Vec<(PositionId, LevelHit)>>();

        let mut trades = Vec::with_capacity(hits.len());
        for (id, hit) in hits {
            debug!(id, reason = %hit.reason, price = hit.price, "level touched");
            trades.push(manager.close(id, hit.price, bar.timestamp(), hit.reason, &self.costs)?);
        }
        Ok(trades)
    }

    /// Closes every open position at `bar`'s close.
    pub fn close_all_at_close(&self, bar: &Bar, manager: &mut PositionManager) -> Result<Vec<Trade>> {
        let ids = manager.positions().map(Position::id).collect::<Vec<_>>();
        let mut trades = Vec::with_capacity(ids.len());
        for id in ids {
            trades.push(manager.close(id, bar.close(), bar.timestamp(), ExitReason::EndOfData, &self.costs)?);
        }
        Ok(trades)
    }
}
