use std::collections::{VecDeque, vec_deque::Iter};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Account, Bar, CostModel, ExitReason, Position, PositionId, PositionSide, Rejection, Trade};
use crate::errors::{Error, Result};

/// Parameters of a new position, as decided by the execution simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenRequest {
    /// Direction.
    pub side: PositionSide,
    /// Fill price.
    pub entry_price: f64,
    /// Timestamp of the fill bar.
    pub entry_timestamp: DateTime<Utc>,
    /// Index of the fill bar.
    pub entry_index: usize,
    /// Fraction of the balance put at risk.
    pub risk_per_trade: f64,
    /// Protective stop.
    pub stop: Option<f64>,
    /// Profit target.
    pub target: Option<f64>,
}

/// Price at which a position's loss plus its exit costs equal its notional.
///
/// A long cannot lose more than its notional, so it has none. A short opened
/// at `entry` reaches it at `2 × entry / (1 + rate)`.
pub fn liquidation_level(side: PositionSide, entry_price: f64, costs: &CostModel) -> Option<f64> {
    match side {
        PositionSide::Long => None,
        PositionSide::Short => Some(2.0 * entry_price / (1.0 + costs.rate())),
    }
}

/// Owns the open positions and the account they are funded from.
///
/// Sizing follows fixed-fractional risk: the distance between entry and stop,
/// times the quantity, equals `risk_per_trade × balance`. Without a stop the
/// distance is assumed to be `entry × default_stop_fraction`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct PositionManager {
    account: Account,
    positions: VecDeque<Position>,
    next_id: PositionId,
    max_positions: usize,
    default_stop_fraction: f64,
}

impl PositionManager {
    /// Creates a manager funded with `initial_balance`.
    pub fn new(initial_balance: f64, max_positions: usize, default_stop_fraction: f64) -> Result<Self> {
        Ok(Self {
            account: Account::new(initial_balance)?,
            positions: VecDeque::with_capacity(max_positions),
            next_id: 1,
            max_positions,
            default_stop_fraction,
        })
    }

    /// Returns the account.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Returns an iterator over the open positions, oldest first.
    pub fn positions(&self) -> Iter<'_, Position> {
        self.positions.iter()
    }

    /// Returns an open position by id.
    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id() == id)
    }

    /// Returns the number of open positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` when no position is open.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the configured capacity.
    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Computes the quantity for a new position before any capital cap.
    pub fn size(&self, entry_price: f64, stop: Option<f64>, risk_per_trade: f64) -> f64 {
        let distance = match stop {
            Some(stop) => (entry_price - stop).abs(),
            None => entry_price * self.default_stop_fraction,
        };
        if distance <= 0.0 {
            return 0.0;
        }
        risk_per_trade * self.account.balance() / distance
    }

    /// Opens a position, or explains why it cannot be opened.
    pub fn open(&mut self, request: OpenRequest, costs: &CostModel) -> std::result::Result<Position, Rejection> {
        if self.positions.len() >= self.max_positions {
            return Err(Rejection::Capacity {
                max_positions: self.max_positions,
            });
        }

        let mut quantity = self.size(request.entry_price, request.stop, request.risk_per_trade);
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Rejection::NonPositiveQuantity(quantity));
        }

        // notional plus entry costs must fit into free cash
        let free = self.account.free_balance();
        let affordable = free / (request.entry_price * (1.0 + costs.rate()));
        if affordable <= 0.0 {
            return Err(Rejection::InsufficientCapital { free });
        }
        if quantity > affordable {
            debug!(wanted = quantity, affordable, "position size capped by free balance");
            quantity = affordable;
        }

        let notional = request.entry_price * quantity;
        let fees = costs.cost(notional);
        if self.account.lock(notional).is_err() {
            return Err(Rejection::InsufficientCapital { free });
        }
        self.account.sub_fees(fees);

        let id = self.next_id;
        self.next_id += 1;
        let liquidation = liquidation_level(request.side, request.entry_price, costs);
        let position = Position::new(
            id,
            request.side,
            request.entry_price,
            request.entry_timestamp,
            request.entry_index,
            quantity,
            request.stop,
            request.target,
            fees,
        )
        .with_liquidation(liquidation);
        debug!(
            id,
            side = %request.side,
            price = request.entry_price,
            quantity,
            fees,
            liquidation,
            "position opened"
        );
        self.positions.push_back(position.clone());
        Ok(position)
    }

    /// Closes a whole position and returns its trade record.
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: f64,
        exit_timestamp: DateTime<Utc>,
        reason: ExitReason,
        costs: &CostModel,
    ) -> Result<Trade> {
        let quantity = self.get(id).ok_or(Error::PositionNotFound(id))?.quantity();
        self.close_partial(id, quantity, exit_price, exit_timestamp, reason, costs)
    }

    /// Closes `quantity` units of a position. The remainder keeps its entry
    /// terms; closing the full quantity removes the position.
    pub fn close_partial(
        &mut self,
        id: PositionId,
        quantity: f64,
        exit_price: f64,
        exit_timestamp: DateTime<Utc>,
        reason: ExitReason,
        costs: &CostModel,
    ) -> Result<Trade> {
        if exit_price <= 0.0 || !exit_price.is_finite() {
            return Err(Error::InvalidPrice(exit_price));
        }
        let index = self
            .positions
            .iter()
            .position(|p| p.id() == id)
            .ok_or(Error::PositionNotFound(id))?;
        let open_quantity = self.positions[index].quantity();
        if !quantity.is_finite() || quantity <= 0.0 || quantity > open_quantity * (1.0 + 1e-12) {
            return Err(Error::InvalidQuantity(quantity));
        }
        if exit_timestamp <= self.positions[index].entry_timestamp() {
            return Err(Error::ExitBeforeEntry(id));
        }

        let full = quantity >= open_quantity;
        let (snapshot, entry_fees, quantity) = if full {
            let position = self.positions.remove(index).ok_or(Error::PositionNotFound(id))?;
            let fees = position.entry_fees();
            let quantity = position.quantity();
            (position, fees, quantity)
        } else {
            let position = &mut self.positions[index];
            let fees = position.reduce(quantity);
            (position.clone(), fees, quantity)
        };

        let gross = snapshot.side().sign() * (exit_price - snapshot.entry_price()) * quantity;
        let exit_fees = costs.cost(exit_price * quantity);
        self.account.unlock(snapshot.entry_price() * quantity)?;
        self.account.realize(gross);
        self.account.sub_fees(exit_fees);
        self.refresh_unrealized();

        let trade = Trade {
            position_id: id,
            side: snapshot.side(),
            quantity,
            entry_price: snapshot.entry_price(),
            entry_timestamp: snapshot.entry_timestamp(),
            exit_price,
            exit_timestamp,
            exit_reason: reason,
            fees: entry_fees + exit_fees,
            pnl: gross - entry_fees - exit_fees,
        };
        debug!(id, %reason, price = exit_price, quantity, pnl = trade.pnl, "position closed");
        Ok(trade)
    }

    /// Re-marks every open position at the bar's close.
    ///
    /// Only the derived unrealized P&L changes; entry terms are untouched.
    pub fn mark_to_market(&mut self, bar: &Bar) -> f64 {
        let price = bar.close();
        for position in self.positions.iter_mut() {
            let pnl = position.estimate_pnl(price);
            position.set_unrealized_pnl(pnl);
        }
        self.refresh_unrealized()
    }

    fn refresh_unrealized(&mut self) -> f64 {
        let total = self.positions.iter().map(Position::unrealized_pnl).sum::<f64>();
        self.account.set_unrealized_pnl(total);
        total
    }

    /// Drops every position and restores the initial balance.
    pub fn reset(&mut self) {
        self.account.reset();
        self.positions.clear();
        self.next_id = 1;
    }
}
