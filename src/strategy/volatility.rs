use crate::engine::{Bar, Decision, ExitScope, Position, PositionSide};

use super::{Strategy, atr_bracket};

/// Volatility breakout on Bollinger bands and ATR.
///
/// Entries, checked in order on the bar that just closed:
/// 1. the close breaks up through `bb_upper` (the previous close was at or
///    below it) while the volatility ratio exceeds `vol_threshold`: long;
/// 2. the mirrored break down through `bb_lower`: short;
/// 3. otherwise, during a squeeze (band width below `squeeze_threshold` of its
///    mean) the bands are faded: short above 90% of the band range, long
///    below 10%.
///
/// The volatility ratio is `atr` over its mean across the last `vol_lookback`
/// bars. An open position is exited when that ratio drops under
/// `exit_contraction`, or when the close crosses `bb_middle` against it.
///
/// Columns read: `atr`, `bb_upper`, `bb_middle`, `bb_lower`.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityBreakout {
    vol_lookback: usize,
    vol_threshold: f64,
    squeeze_threshold: f64,
    exit_contraction: f64,
    allow_short: bool,
    stop_atr: f64,
    target_atr: Option<f64>,
}

impl Default for VolatilityBreakout {
    fn default() -> Self {
        Self {
            vol_lookback: 20,
            vol_threshold: 1.5,
            squeeze_threshold: 0.7,
            exit_contraction: 0.7,
            allow_short: true,
            stop_atr: 2.0,
            target_atr: Some(3.0),
        }
    }
}

/// Volatility state of one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityState {
    /// `atr / mean(atr)` over the lookback.
    pub vol_ratio: f64,
    /// Position of the close inside the bands, `0` at the lower band and `1`
    /// at the upper one.
    pub band_position: f64,
    /// Relative band width over its mean over the lookback.
    pub squeeze_ratio: f64,
    /// Band the close just broke through, if any.
    pub breakout: Option<PositionSide>,
}

#[derive(Debug, Clone, Copy)]
struct Bands {
    upper: f64,
    middle: f64,
    lower: f64,
}

impl Bands {
    fn of(bar: &Bar) -> Option<Self> {
        let bands = Self {
            upper: bar.indicator(VolatilityBreakout::UPPER)?,
            middle: bar.indicator(VolatilityBreakout::MIDDLE)?,
            lower: bar.indicator(VolatilityBreakout::LOWER)?,
        };
        (bands.lower <= bands.middle && bands.middle <= bands.upper && bands.middle > 0.0).then_some(bands)
    }

    fn width(&self) -> f64 {
        (self.upper - self.lower) / self.middle
    }
}

impl VolatilityBreakout {
    /// ATR column.
    pub const ATR: &'static str = "atr";
    /// Upper band column.
    pub const UPPER: &'static str = "bb_upper";
    /// Middle band column.
    pub const MIDDLE: &'static str = "bb_middle";
    /// Lower band column.
    pub const LOWER: &'static str = "bb_lower";

    /// Creates the strategy with the lookback and expansion threshold of the
    /// volatility ratio.
    pub fn new(vol_lookback: usize, vol_threshold: f64) -> Self {
        Self {
            vol_lookback: vol_lookback.max(1),
            vol_threshold,
            ..Self::default()
        }
    }

    /// Band width ratio under which the bands are faded.
    pub fn squeeze_threshold(mut self, threshold: f64) -> Self {
        self.squeeze_threshold = threshold;
        self
    }

    /// Volatility ratio under which open positions are exited.
    pub fn exit_contraction(mut self, threshold: f64) -> Self {
        self.exit_contraction = threshold;
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

    /// Volatility state of the last bar of `history`, or `None` when there is
    /// no previous bar or a column is missing in the lookback.
    pub fn state(&self, history: &[Bar]) -> Option<VolatilityState> {
        let [.., previous, current] = history else {
            return None;
        };
        let window = &history[history.len().saturating_sub(self.vol_lookback)..];

        let mut atr_sum = 0.0;
        let mut width_sum = 0.0;
        for bar in window {
            atr_sum += bar.indicator(Self::ATR)?;
            width_sum += Bands::of(bar)?.width();
        }
        let n = window.len() as f64;
        let (atr_mean, width_mean) = (atr_sum / n, width_sum / n);
        if atr_mean <= 0.0 || width_mean <= 0.0 {
            return None;
        }

        let atr = current.indicator(Self::ATR)?;
        let bands = Bands::of(current)?;
        let prev = Bands::of(previous)?;
        let close = current.close();

        let breakout = if close > bands.upper && previous.close() <= prev.upper {
            Some(PositionSide::Long)
        } else if close < bands.lower && previous.close() >= prev.lower {
            Some(PositionSide::Short)
        } else {
            None
        };
        let range = bands.upper - bands.lower;

        Some(VolatilityState {
            vol_ratio: atr / atr_mean,
            band_position: if range > 0.0 { (close - bands.lower) / range } else { 0.5 },
            squeeze_ratio: bands.width() / width_mean,
            breakout,
        })
    }

    fn entry(&self, state: &VolatilityState) -> Option<PositionSide> {
        match state.breakout {
            Some(side) if state.vol_ratio > self.vol_threshold => Some(side),
            _ if state.squeeze_ratio < self.squeeze_threshold => {
                if state.band_position > 0.9 {
                    Some(PositionSide::Short)
                } else if state.band_position < 0.1 {
                    Some(PositionSide::Long)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn middle_crossed(side: PositionSide, previous: &Bar, current: &Bar) -> bool {
        let (Some(prev), Some(bands)) = (Bands::of(previous), Bands::of(current)) else {
            return false;
        };
        match side {
            PositionSide::Long => previous.close() >= prev.middle && current.close() < bands.middle,
            PositionSide::Short => previous.close() <= prev.middle && current.close() > bands.middle,
        }
    }
}

impl Strategy for VolatilityBreakout {
    fn name(&self) -> &str {
        "volatility"
    }

    fn decide(&self, history: &[Bar], positions: &[Position]) -> Decision {
        let Some(state) = self.state(history) else {
            return Decision::Hold;
        };
        let [.., previous, current] = history else {
            return Decision::Hold;
        };

        if let Some(open) = positions.first() {
            let side = open.side();
            return if state.vol_ratio < self.exit_contraction || Self::middle_crossed(side, previous, current) {
                Decision::Exit(ExitScope::Side(side))
            } else {
                Decision::Hold
            };
        }

        match self.entry(&state) {
            Some(PositionSide::Short) if !self.allow_short => Decision::Hold,
            Some(side) => {
                let (stop, target) = atr_bracket(side, current, self.stop_atr, self.target_atr);
                Decision::Enter { side, stop, target }
            }
            None => Decision::Hold,
        }
    }
}
