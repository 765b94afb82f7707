use std::fmt;

use crate::engine::{Bar, Decision, ExitScope, Position, PositionSide};

use super::{Strategy, atr_bracket};

/// A recognized candlestick pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    /// Tiny body against its wicks.
    Doji,
    /// Long lower wick, small upper wick.
    Hammer,
    /// Long upper wick, small lower wick.
    ShootingStar,
    /// Up candle whose body covers the previous down candle's body.
    BullishEngulfing,
    /// Down candle whose body covers the previous up candle's body.
    BearishEngulfing,
}

impl fmt::Display for CandlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doji => write!(f, "doji"),
            Self::Hammer => write!(f, "hammer"),
            Self::ShootingStar => write!(f, "shooting-star"),
            Self::BullishEngulfing => write!(f, "bullish-engulfing"),
            Self::BearishEngulfing => write!(f, "bearish-engulfing"),
        }
    }
}

fn body(bar: &Bar) -> f64 {
    (bar.close() - bar.open()).abs()
}

fn upper_wick(bar: &Bar) -> f64 {
    bar.high() - bar.open().max(bar.close())
}

fn lower_wick(bar: &Bar) -> f64 {
    bar.open().min(bar.close()) - bar.low()
}

/// A doji: no body at all, or a body at most `threshold` times the two wicks
/// together.
pub fn is_doji(bar: &Bar, threshold: f64) -> bool {
    let body = body(bar);
    if body == 0.0 {
        return true;
    }
    let wicks = upper_wick(bar) + lower_wick(bar);
    wicks > 0.0 && body / wicks <= threshold
}

/// A hammer: a lower wick at least twice the body and an upper wick at most
/// half of it.
pub fn is_hammer(bar: &Bar) -> bool {
    let body = body(bar);
    body > 0.0 && lower_wick(bar) >= 2.0 * body && upper_wick(bar) <= 0.5 * body
}

/// A shooting star: the hammer upside down.
pub fn is_shooting_star(bar: &Bar) -> bool {
    let body = body(bar);
    body > 0.0 && upper_wick(bar) >= 2.0 * body && lower_wick(bar) <= 0.5 * body
}

/// Engulfing pattern formed by `current` over `previous`, as the side it
/// points to.
pub fn engulfing(current: &Bar, previous: &Bar) -> Option<PositionSide> {
    let current_body = current.close() - current.open();
    let previous_body = previous.close() - previous.open();
    // opposite colors only
    if current_body * previous_body >= 0.0 {
        return None;
    }

    if current_body > 0.0 {
        (current.open() <= previous.close() && current.close() >= previous.open()).then_some(PositionSide::Long)
    } else {
        (current.open() >= previous.close() && current.close() <= previous.open()).then_some(PositionSide::Short)
    }
}

/// Reversal trading on candlestick patterns, from OHLC alone.
///
/// On the bar that just closed, a hammer or a bullish engulfing calls for a
/// long and a shooting star or a bearish engulfing for a short. A doji fades
/// the trend of the last `trend_bars` closes: short after a run of rising
/// closes, long otherwise. Conflicting patterns cancel out.
///
/// An open position is exited when the patterns call for the other side.
/// Entries carry an ATR bracket when the bar has an `atr` column.
#[derive(Debug, Clone, PartialEq)]
pub struct CandlePatterns {
    doji_threshold: f64,
    trend_bars: usize,
    allow_short: bool,
    stop_atr: f64,
    target_atr: Option<f64>,
}

impl Default for CandlePatterns {
    fn default() -> Self {
        Self {
            doji_threshold: 0.1,
            trend_bars: 5,
            allow_short: true,
            stop_atr: 2.0,
            target_atr: Some(3.0),
        }
    }
}

impl CandlePatterns {
    /// Maximum body to wicks ratio of a doji.
    pub fn doji_threshold(mut self, threshold: f64) -> Self {
        self.doji_threshold = threshold;
        self
    }

    /// Number of closes a doji looks back on to find the trend.
    pub fn trend_bars(mut self, bars: usize) -> Self {
        self.trend_bars = bars.max(1);
        self
    }

    /// Enables or disables short entries.
    pub fn allow_short(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    /// Stop and target distances in ATR multiples. A non-positive stop
    /// multiple disables the stop.
    pub fn atr_multipliers(mut self, stop: f64, target: Option<f64>) -> Self {
        self.stop_atr = stop;
        self.target_atr = target;
        self
    }

    /// Patterns formed by the last bar of `history`.
    pub fn patterns(&self, history: &[Bar]) -> Vec<CandlePattern> {
        let Some(current) = history.last() else {
            return Vec::new();
        };

        let mut found = Vec::new();
        if is_hammer(current) {
            found.push(CandlePattern::Hammer);
        }
        if is_shooting_star(current) {
            found.push(CandlePattern::ShootingStar);
        }
        if let [.., previous, _] = history {
            match engulfing(current, previous) {
                Some(PositionSide::Long) => found.push(CandlePattern::BullishEngulfing),
                Some(PositionSide::Short) => found.push(CandlePattern::BearishEngulfing),
                None => {}
            }
        }
        if is_doji(current, self.doji_threshold) {
            found.push(CandlePattern::Doji);
        }
        found
    }

    /// Side the patterns of the last bar point to, if they agree.
    pub fn signal(&self, history: &[Bar]) -> Option<PositionSide> {
        let mut long = false;
        let mut short = false;
        for pattern in self.patterns(history) {
            match pattern {
                CandlePattern::Hammer | CandlePattern::BullishEngulfing => long = true,
                CandlePattern::ShootingStar | CandlePattern::BearishEngulfing => short = true,
                CandlePattern::Doji if self.rising(history) => short = true,
                CandlePattern::Doji => long = true,
            }
        }
        match (long, short) {
            (true, false) => Some(PositionSide::Long),
            (false, true) => Some(PositionSide::Short),
            _ => None,
        }
    }

    // closes never fall over the trend window
    fn rising(&self, history: &[Bar]) -> bool {
        let window = &history[history.len().saturating_sub(self.trend_bars)..];
        window.windows(2).all(|pair| pair[1].close() >= pair[0].close())
    }
}

impl Strategy for CandlePatterns {
    fn name(&self) -> &str {
        "candle-patterns"
    }

    fn decide(&self, history: &[Bar], positions: &[Position]) -> Decision {
        let Some(bar) = history.last() else {
            return Decision::Hold;
        };
        let signal = self.signal(history);

        if let Some(open) = positions.first() {
            let side = open.side();
            return match signal {
                Some(wanted) if wanted != side => Decision::Exit(ExitScope::Side(side)),
                _ => Decision::Hold,
            };
        }

        match signal {
            Some(PositionSide::Short) if !self.allow_short => Decision::Hold,
            Some(side) => {
                let (stop, target) = atr_bracket(side, bar, self.stop_atr, self.target_atr);
                Decision::Enter { side, stop, target }
            }
            None => Decision::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BarBuilder;
    use chrono::{DateTime, Duration, Utc};

    fn t(hours: i64) -> DateTime<Utc> {
        DateTime::default() + Duration::hours(hours)
    }

    fn candle(hours: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        BarBuilder::builder()
            .timestamp(t(hours))
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .build()
            .unwrap()
    }

    fn flat(hours: i64, close: f64) -> Bar {
        candle(hours, close, close + 0.5, close - 0.5, close + 0.4)
    }

    fn open(side: PositionSide) -> Position {
        Position::new(1, side, 100.0, t(-1), 0, 1.0, None, None, 0.0)
    }

    #[test]
    fn detect_doji() {
        assert!(is_doji(&candle(0, 100.0, 105.0, 95.0, 100.0), 0.1));
        assert!(is_doji(&candle(0, 100.0, 100.0, 100.0, 100.0), 0.1));
        // body 0.5 over wicks of 9.5
        assert!(is_doji(&candle(0, 100.0, 105.0, 95.0, 100.5), 0.1));
        assert!(!is_doji(&candle(0, 100.0, 105.0, 95.0, 104.0), 0.1));
    }

    #[test]
    fn detect_hammer() {
        assert!(is_hammer(&candle(0, 100.0, 102.2, 94.0, 102.0)));
        // upper wick too long
        assert!(!is_hammer(&candle(0, 100.0, 104.0, 94.0, 102.0)));
        // lower wick too short
        assert!(!is_hammer(&candle(0, 100.0, 102.2, 97.0, 102.0)));
        assert!(!is_hammer(&candle(0, 100.0, 101.0, 94.0, 100.0)));
    }

    #[test]
    fn detect_shooting_star() {
        assert!(is_shooting_star(&candle(0, 102.0, 108.0, 99.8, 100.0)));
        assert!(!is_shooting_star(&candle(0, 102.0, 108.0, 98.0, 100.0)));
        assert!(!is_shooting_star(&candle(0, 100.0, 102.2, 94.0, 102.0)));
    }

    #[test]
    fn detect_engulfing() {
        let down = candle(0, 101.0, 101.5, 99.5, 100.0);
        let up = candle(1, 99.5, 102.5, 99.0, 102.0);
        assert_eq!(engulfing(&up, &down), Some(PositionSide::Long));

        let up = candle(0, 100.0, 101.5, 99.5, 101.0);
        let down = candle(1, 101.5, 102.0, 98.5, 99.0);
        assert_eq!(engulfing(&down, &up), Some(PositionSide::Short));

        // same color, or a body that does not cover the previous one
        assert_eq!(engulfing(&up, &up), None);
        let small = candle(1, 100.5, 101.0, 99.0, 100.2);
        assert_eq!(engulfing(&small, &up), None);
    }

    #[test]
    fn hammer_goes_long_shooting_star_goes_short() {
        let strategy = CandlePatterns::default();
        let hammer = [flat(0, 100.0), candle(1, 100.0, 102.2, 94.0, 102.0)];
        assert_eq!(strategy.patterns(&hammer), vec![CandlePattern::Hammer]);
        assert_eq!(strategy.decide(&hammer, &[]), Decision::long(None, None));

        let star = [flat(0, 100.0), candle(1, 102.0, 108.0, 99.8, 100.0)];
        assert_eq!(strategy.decide(&star, &[]), Decision::short(None, None));
        assert_eq!(strategy.clone().allow_short(false).decide(&star, &[]), Decision::Hold);
    }

    #[test]
    fn engulfing_sets_the_side() {
        let strategy = CandlePatterns::default();
        let bullish = [candle(0, 101.0, 101.5, 99.5, 100.0), candle(1, 99.5, 102.5, 99.0, 102.0)];
        assert_eq!(strategy.patterns(&bullish), vec![CandlePattern::BullishEngulfing]);
        assert_eq!(strategy.signal(&bullish), Some(PositionSide::Long));

        let bearish = [candle(0, 100.0, 101.5, 99.5, 101.0), candle(1, 101.5, 102.0, 98.5, 99.0)];
        assert_eq!(strategy.patterns(&bearish), vec![CandlePattern::BearishEngulfing]);
        assert_eq!(strategy.signal(&bearish), Some(PositionSide::Short));
    }

    #[test]
    fn doji_fades_the_trend() {
        let strategy = CandlePatterns::default();
        let doji = |hours, close| candle(hours, close, close + 5.0, close - 5.0, close);

        let rising = [flat(0, 100.0), flat(1, 101.0), flat(2, 102.0), flat(3, 103.0), doji(4, 104.0)];
        assert_eq!(strategy.patterns(&rising), vec![CandlePattern::Doji]);
        assert_eq!(strategy.signal(&rising), Some(PositionSide::Short));

        let falling = [flat(0, 104.0), flat(1, 103.0), flat(2, 102.0), flat(3, 101.0), doji(4, 100.0)];
        assert_eq!(strategy.signal(&falling), Some(PositionSide::Long));
    }

    #[test]
    fn bracket_from_atr() {
        let strategy = CandlePatterns::default();
        let hammer = candle(1, 100.0, 102.2, 94.0, 102.0).with_indicator("atr", 2.0);
        assert_eq!(
            strategy.decide(&[flat(0, 100.0), hammer], &[]),
            Decision::long(Some(98.0), Some(108.0))
        );
    }

    #[test]
    fn exit_on_opposite_pattern() {
        let strategy = CandlePatterns::default();
        let star = [flat(0, 100.0), candle(1, 102.0, 108.0, 99.8, 100.0)];
        assert_eq!(
            strategy.decide(&star, &[open(PositionSide::Long)]),
            Decision::Exit(ExitScope::Side(PositionSide::Long))
        );
        assert_eq!(strategy.decide(&star, &[open(PositionSide::Short)]), Decision::Hold);
        assert_eq!(strategy.decide(&[flat(0, 100.0)], &[open(PositionSide::Long)]), Decision::Hold);
        assert_eq!(strategy.decide(&[], &[]), Decision::Hold);
    }
}
