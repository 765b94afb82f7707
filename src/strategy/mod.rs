//! Strategies turn the bars seen so far into a [`Decision`].
//!
//! Any `Fn(&[Bar], &[Position]) -> Decision` closure is a strategy, which is
//! handy for tests and one-off experiments. Three strategies are provided:
//! - [`EmaTrend`]: trades in the direction of aligned exponential moving averages.
//! - [`VolatilityBreakout`]: follows band breakouts on expanding volatility
//!   and fades the bands during a squeeze.
//! - [`CandlePatterns`]: trades single and two-candle reversal patterns.
//!
//! Strategies read precomputed indicator columns from the bars and hold when a
//! column they need is missing.

mod candle_patterns;
mod ema_trend;
mod volatility;

pub use candle_patterns::*;
pub use ema_trend::*;
pub use volatility::*;

use crate::engine::{Bar, Decision, Position, PositionSide};

/// Decision-producing contract driven by the backtest loop.
///
/// `history` holds every bar up to and including the one just closed; the
/// last element is the current bar. Implementations must be deterministic.
pub trait Strategy {
    /// Human readable name, used in logs and reports.
    fn name(&self) -> &str {
        "custom"
    }

    /// Decides what to do after the last bar of `history` closed.
    fn decide(&self, history: &[Bar], positions: &[Position]) -> Decision;
}

impl<F> Strategy for F
where
    F: Fn(&[Bar], &[Position]) -> Decision,
{
    fn decide(&self, history: &[Bar], positions: &[Position]) -> Decision {
        self(history, positions)
    }
}

/// Stop and target placed `stop_atr` and `target_atr` ATRs away from the
/// close. Both are `None` when the bar has no positive `atr` column.
pub(crate) fn atr_bracket(side: PositionSide, bar: &Bar, stop_atr: f64, target_atr: Option<f64>) -> (Option<f64>, Option<f64>) {
    let Some(atr) = bar.indicator("atr").filter(|atr| *atr > 0.0) else {
        return (None, None);
    };
    let close = bar.close();
    let sign = side.sign();

    let stop = Some(close - sign * stop_atr * atr).filter(|s| stop_atr > 0.0 && *s > 0.0);
    let target = target_atr.map(|k| close + sign * k * atr).filter(|t| *t > 0.0 && *t != close);
    (stop, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BarBuilder;
    use chrono::DateTime;

    #[test]
    fn closure_is_a_strategy() {
        let bar = BarBuilder::builder()
            .timestamp(DateTime::default())
            .open(1.0)
            .high(1.0)
            .low(1.0)
            .close(1.0)
            .build()
            .unwrap();
        let strategy = |history: &[Bar], _: &[Position]| {
            if history.len() > 1 { Decision::exit_all() } else { Decision::long(None, None) }
        };

        let boxed: Box<dyn Strategy> = Box::new(strategy);
        assert_eq!(boxed.name(), "custom");
        assert_eq!(boxed.decide(&[bar], &[]), Decision::long(None, None));
    }
}
