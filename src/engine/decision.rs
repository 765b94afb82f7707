use std::fmt;

use chrono::{DateTime, Utc};

use super::{ExitReason, PositionId, PositionSide};

/// What a strategy wants to do after seeing a bar close.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Decision {
    /// Do nothing.
    #[default]
    Hold,
    /// Open a new position.
    Enter {
        /// Direction of the new position.
        side: PositionSide,
        /// Protective stop price; drives position sizing.
        stop: Option<f64>,
        /// Profit target price.
        target: Option<f64>,
    },
    /// Close open positions.
    Exit(ExitScope),
}

impl Decision {
    /// Long entry with optional stop and target.
    pub fn long(stop: Option<f64>, target: Option<f64>) -> Self {
        Self::Enter {
            side: PositionSide::Long,
            stop,
            target,
        }
    }

    /// Short entry with optional stop and target.
    pub fn short(stop: Option<f64>, target: Option<f64>) -> Self {
        Self::Enter {
            side: PositionSide::Short,
            stop,
            target,
        }
    }

    /// Exit every open position.
    pub fn exit_all() -> Self {
        Self::Exit(ExitScope::All)
    }

    /// Returns `true` for [`Decision::Hold`].
    pub fn is_hold(&self) -> bool {
        matches!(self, Self::Hold)
    }

    /// Checks stop and target against a reference entry price.
    ///
    /// A long needs `stop <= price < target`, a short `target < price <= stop`.
    /// A stop sitting exactly on the entry is left to position sizing, which
    /// rejects it as a zero-risk position.
    pub fn check_bracket(&self, price: f64) -> Result<(), InvalidReason> {
        let Self::Enter { side, stop, target } = self else {
            return Ok(());
        };
        for level in [stop, target].into_iter().flatten() {
            if !level.is_finite() || *level <= 0.0 {
                return Err(InvalidReason::NonPositiveLevel(*level));
            }
        }
        match side {
            PositionSide::Long => {
                if let Some(stop) = stop
                    && *stop > price
                {
                    return Err(InvalidReason::StopOnWrongSide { stop: *stop, price });
                }
                if let Some(target) = target
                    && *target <= price
                {
                    return Err(InvalidReason::TargetOnWrongSide { target: *target, price });
                }
            }
            PositionSide::Short => {
                if let Some(stop) = stop
                    && *stop < price
                {
                    return Err(InvalidReason::StopOnWrongSide { stop: *stop, price });
                }
                if let Some(target) = target
                    && *target >= price
                {
                    return Err(InvalidReason::TargetOnWrongSide { target: *target, price });
                }
            }
        }
        Ok(())
    }
}

/// Which positions an exit decision applies to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitScope {
    /// Every open position.
    All,
    /// Every open position on one side.
    Side(PositionSide),
    /// One position.
    Position(PositionId),
    /// A fraction in `(0, 1]` of one position.
    Partial(PositionId, f64),
}

/// Why a decision was refused as malformed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidReason {
    /// A stop or target price that is not positive and finite.
    NonPositiveLevel(f64),
    /// Long stop above the entry, or short stop below it.
    StopOnWrongSide {
        /// Requested stop.
        stop: f64,
        /// Reference entry price.
        price: f64,
    },
    /// Long target at/below the entry, or short target at/above it.
    TargetOnWrongSide {
        /// Requested target.
        target: f64,
        /// Reference entry price.
        price: f64,
    },
    /// Partial exit fraction outside `(0, 1]`.
    BadFraction(f64),
    /// The exit names a position that is not open.
    UnknownPosition(PositionId),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveLevel(level) => write!(f, "price level {level} is not positive"),
            Self::StopOnWrongSide { stop, price } => write!(f, "stop {stop} on the wrong side of entry {price}"),
            Self::TargetOnWrongSide { target, price } => {
                write!(f, "target {target} on the wrong side of entry {price}")
            }
            Self::BadFraction(fraction) => write!(f, "exit fraction {fraction} outside (0, 1]"),
            Self::UnknownPosition(id) => write!(f, "position {id} is not open"),
        }
    }
}

/// Why an otherwise valid entry could not be opened.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Open position count already equals `max_positions`.
    Capacity {
        /// Configured maximum.
        max_positions: usize,
    },
    /// Sizing produced zero or a negative quantity.
    NonPositiveQuantity(f64),
    /// No free capital left to allocate.
    InsufficientCapital {
        /// Free balance at the time of the fill.
        free: f64,
    },
    /// The decision came on the last bar; there is no later bar to fill on.
    NoNextBar,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity { max_positions } => write!(f, "{max_positions} positions already open"),
            Self::NonPositiveQuantity(quantity) => write!(f, "computed quantity {quantity} is not positive"),
            Self::InsufficientCapital { free } => write!(f, "free balance {free} cannot fund the position"),
            Self::NoNextBar => write!(f, "no bar left to fill on"),
        }
    }
}

/// What happened to a non-hold decision.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// A position was opened.
    Opened(PositionId),
    /// Positions were (partially) closed.
    Closed(Vec<PositionId>),
    /// The decision was valid but ignored.
    Rejected(Rejection),
    /// The decision was malformed.
    Invalid(InvalidReason),
}

/// Audit entry for a non-hold decision.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    /// Index of the bar the decision was made on.
    pub bar_index: usize,
    /// Timestamp of that bar.
    pub timestamp: DateTime<Utc>,
    /// The decision itself.
    pub decision: Decision,
    /// Final outcome.
    pub outcome: DecisionOutcome,
}

/// An exit triggered by a price level inside a bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelHit {
    /// Literal fill price (the stop, target or liquidation level).
    pub price: f64,
    /// `Stop`, `Target` or `Liquidation`.
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bracket() {
        assert!(Decision::long(Some(95.0), Some(110.0)).check_bracket(100.0).is_ok());
        assert!(Decision::long(None, None).check_bracket(100.0).is_ok());
        assert!(Decision::long(Some(100.0), None).check_bracket(100.0).is_ok());
        assert!(matches!(
            Decision::long(Some(101.0), None).check_bracket(100.0),
            Err(InvalidReason::StopOnWrongSide { .. })
        ));
        assert!(matches!(
            Decision::long(None, Some(100.0)).check_bracket(100.0),
            Err(InvalidReason::TargetOnWrongSide { .. })
        ));
    }

    #[test]
    fn short_bracket() {
        assert!(Decision::short(Some(105.0), Some(90.0)).check_bracket(100.0).is_ok());
        assert!(matches!(
            Decision::short(Some(99.0), None).check_bracket(100.0),
            Err(InvalidReason::StopOnWrongSide { .. })
        ));
        assert!(matches!(
            Decision::short(None, Some(120.0)).check_bracket(100.0),
            Err(InvalidReason::TargetOnWrongSide { .. })
        ));
    }

    #[test]
    fn non_positive_levels() {
        assert!(matches!(
            Decision::long(Some(-1.0), None).check_bracket(100.0),
            Err(InvalidReason::NonPositiveLevel(_))
        ));
        assert!(matches!(
            Decision::short(Some(f64::NAN), None).check_bracket(100.0),
            Err(InvalidReason::NonPositiveLevel(_))
        ));
    }

    #[test]
    fn exits_and_holds_have_no_bracket() {
        assert!(Decision::Hold.check_bracket(100.0).is_ok());
        assert!(Decision::exit_all().check_bracket(100.0).is_ok());
        assert!(Decision::default().is_hold());
    }
}
