use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::Percent;
use crate::errors::{Error, Result};

/// Identifier of a position, sequential within one run.
pub type PositionId = u64;

/// Direction of a position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSide {
    /// Profits when the price rises.
    Long,
    /// Profits when the price falls.
    Short,
}

impl PositionSide {
    /// `+1.0` for long, `-1.0` for short.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl FromStr for PositionSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            _ => Err(Error::UnsupportedDirection(s.to_string())),
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Why a position was closed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// The stop price was touched.
    Stop,
    /// The target price was touched.
    Target,
    /// The strategy asked to exit.
    Signal,
    /// The series ended with the position still open.
    EndOfData,
    /// The loss reached the capital allocated to the position.
    Liquidation,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Target => write!(f, "target"),
            Self::Signal => write!(f, "signal"),
            Self::EndOfData => write!(f, "end-of-data"),
            Self::Liquidation => write!(f, "liquidation"),
        }
    }
}

/// An open simulated trade.
///
/// Entry terms are fixed once the position is opened. The only mutable parts
/// are the derived unrealized P&L and the quantity, which shrinks on an
/// explicit partial close.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    id: PositionId,
    side: PositionSide,
    entry_price: f64,
    entry_timestamp: DateTime<Utc>,
    entry_index: usize,
    quantity: f64,
    stop: Option<f64>,
    target: Option<f64>,
    // price at which the loss plus exit costs use up the allocated capital
    liquidation: Option<f64>,
    // entry costs not yet attributed to a closed trade
    entry_fees: f64,
    unrealized_pnl: f64,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PositionId,
        side: PositionSide,
        entry_price: f64,
        entry_timestamp: DateTime<Utc>,
        entry_index: usize,
        quantity: f64,
        stop: Option<f64>,
        target: Option<f64>,
        entry_fees: f64,
    ) -> Self {
        Self {
            id,
            side,
            entry_price,
            entry_timestamp,
            entry_index,
            quantity,
            stop,
            target,
            liquidation: None,
            entry_fees,
            unrealized_pnl: 0.0,
        }
    }

    pub(crate) fn with_liquidation(mut self, level: Option<f64>) -> Self {
        self.liquidation = level;
        self
    }

    /// Returns the position id.
    pub fn id(&self) -> PositionId {
        self.id
    }

    /// Returns the side.
    pub fn side(&self) -> PositionSide {
        self.side
    }

    /// Returns the fill price of the entry.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Returns the timestamp of the entry bar.
    pub fn entry_timestamp(&self) -> DateTime<Utc> {
        self.entry_timestamp
    }

    /// Returns the index of the entry bar in the series.
    pub fn entry_index(&self) -> usize {
        self.entry_index
    }

    /// Returns the open quantity.
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Returns the stop price, if any.
    pub fn stop(&self) -> Option<f64> {
        self.stop
    }

    /// Returns the target price, if any.
    pub fn target(&self) -> Option<f64> {
        self.target
    }

    /// Returns the liquidation price, if the position can lose more than
    /// its allocated capital.
    pub fn liquidation_price(&self) -> Option<f64> {
        self.liquidation
    }

    /// Returns `true` when `price` is at or beyond the liquidation price.
    pub fn is_liquidated_at(&self, price: f64) -> bool {
        match (self.side, self.liquidation) {
            (PositionSide::Long, Some(level)) => price <= level,
            (PositionSide::Short, Some(level)) => price >= level,
            (_, None) => false,
        }
    }

    /// Returns the entry costs still carried by the open quantity.
    pub fn entry_fees(&self) -> f64 {
        self.entry_fees
    }

    /// Returns the last marked unrealized P&L.
    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    /// Capital allocated to the position (`entry_price × quantity`).
    pub fn cost(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// Gross P&L if the whole position were closed at `price`.
    pub fn estimate_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.quantity
    }

    pub(crate) fn set_unrealized_pnl(&mut self, pnl: f64) {
        self.unrealized_pnl = pnl;
    }

    /// Splits off `quantity` units, returning the entry fees attributed to them.
    pub(crate) fn reduce(&mut self, quantity: f64) -> f64 {
        let fraction = quantity / self.quantity;
        let fees = self.entry_fees * fraction;
        self.entry_fees -= fees;
        self.unrealized_pnl -= self.unrealized_pnl * fraction;
        self.quantity -= quantity;
        fees
    }
}

/// Immutable record of a closed position (or a closed part of one).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Id of the position this trade closed.
    pub position_id: PositionId,
    /// Direction.
    pub side: PositionSide,
    /// Closed quantity.
    pub quantity: f64,
    /// Fill price of the entry.
    pub entry_price: f64,
    /// Timestamp of the entry bar.
    pub entry_timestamp: DateTime<Utc>,
    /// Fill price of the exit.
    pub exit_price: f64,
    /// Timestamp of the exit bar.
    pub exit_timestamp: DateTime<Utc>,
    /// Why the position was closed.
    pub exit_reason: ExitReason,
    /// Entry and exit costs attributed to this trade.
    pub fees: f64,
    /// Realized P&L, net of `fees`.
    pub pnl: f64,
}

impl Trade {
    /// Return on allocated capital, net of fees.
    pub fn return_pct(&self) -> f64 {
        let cost = self.entry_price * self.quantity;
        if cost == 0.0 {
            return 0.0;
        }
        cost.percent_change(cost + self.pnl)
    }

    /// Time the position was held.
    pub fn duration(&self) -> chrono::Duration {
        self.exit_timestamp - self.entry_timestamp
    }

    /// Returns `true` for a trade with positive realized P&L.
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(side: PositionSide) -> Position {
        Position::new(1, side, 100.0, DateTime::default(), 0, 2.0, None, None, 0.4)
    }

    #[test]
    fn parse_direction() {
        assert_eq!("long".parse::<PositionSide>().unwrap(), PositionSide::Long);
        assert_eq!("BUY".parse::<PositionSide>().unwrap(), PositionSide::Long);
        assert_eq!(" sell ".parse::<PositionSide>().unwrap(), PositionSide::Short);
        assert!(matches!(
            "sideways".parse::<PositionSide>(),
            Err(Error::UnsupportedDirection(_))
        ));
    }

    #[test]
    fn long_pnl() {
        let position = position(PositionSide::Long);
        assert_eq!(position.cost(), 200.0);
        assert_eq!(position.estimate_pnl(110.0), 20.0);
        assert_eq!(position.estimate_pnl(90.0), -20.0);
    }

    #[test]
    fn short_pnl() {
        let position = position(PositionSide::Short);
        assert_eq!(position.estimate_pnl(110.0), -20.0);
        assert_eq!(position.estimate_pnl(90.0), 20.0);
    }

    #[test]
    fn reduce_splits_fees() {
        let mut position = position(PositionSide::Long);
        position.set_unrealized_pnl(10.0);
        let fees = position.reduce(0.5);
        assert_eq!(fees, 0.1);
        assert_eq!(position.quantity(), 1.5);
        assert!((position.entry_fees() - 0.3).abs() < 1e-12);
        assert_eq!(position.unrealized_pnl(), 7.5);
        assert_eq!(position.entry_price(), 100.0);
    }

    #[test]
    fn trade_return() {
        let trade = Trade {
            position_id: 1,
            side: PositionSide::Short,
            quantity: 2.0,
            entry_price: 100.0,
            entry_timestamp: DateTime::default(),
            exit_price: 90.0,
            exit_timestamp: DateTime::default() + chrono::Duration::hours(2),
            exit_reason: ExitReason::Target,
            fees: 0.0,
            pnl: 20.0,
        };
        assert_eq!(trade.return_pct(), 10.0);
        assert_eq!(trade.duration(), chrono::Duration::hours(2));
        assert!(trade.is_win());
    }

    #[test]
    fn exit_reason_labels() {
        assert_eq!(ExitReason::EndOfData.to_string(), "end-of-data");
        assert_eq!(ExitReason::Stop.to_string(), "stop");
        assert_eq!(ExitReason::Liquidation.to_string(), "liquidation");
    }

    #[test]
    fn liquidation_threshold() {
        let short = position(PositionSide::Short).with_liquidation(Some(200.0));
        assert_eq!(short.liquidation_price(), Some(200.0));
        assert!(!short.is_liquidated_at(199.9));
        assert!(short.is_liquidated_at(200.0));
        assert!(!position(PositionSide::Long).is_liquidated_at(0.01));
    }
}
