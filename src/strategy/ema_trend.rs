use crate::engine::{Bar, Decision, ExitScope, Position, PositionSide};

use super::{Strategy, atr_bracket};

/// Trend follower on three exponential moving averages.
///
/// An uptrend needs `ema_short > ema_medium` and a close above `ema_long`; in
/// strict mode `ema_medium > ema_long` is required as well. Downtrends mirror
/// it. The strategy enters when flat and in a trend, and exits a side once the
/// trend backing it is gone.
///
/// Columns read: `ema_{short}`, `ema_{medium}`, `ema_{long}` and, for the
/// bracket, `atr`.
///
/// ### Example
/// ```rust
/// use crypto_bts::strategy::EmaTrend;
///
/// let strategy = EmaTrend::new(9, 21, 50).strict(true).atr_multipliers(1.5, Some(3.0));
/// assert_eq!(strategy.columns()[0], "ema_9");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EmaTrend {
    short: usize,
    medium: usize,
    long: usize,
    strict: bool,
    allow_short: bool,
    stop_atr: f64,
    target_atr: Option<f64>,
    columns: [String; 3],
}

impl Default for EmaTrend {
    fn default() -> Self {
        Self::new(8, 21, 200)
    }
}

impl EmaTrend {
    /// Creates the strategy for the given EMA periods.
    pub fn new(short: usize, medium: usize, long: usize) -> Self {
        Self {
            short,
            medium,
            long,
            strict: false,
            allow_short: true,
            stop_atr: 2.0,
            target_atr: Some(3.0),
            columns: [format!("ema_{short}"), format!("ema_{medium}"), format!("ema_{long}")],
        }
    }

    /// Also require the medium EMA to be on the trend side of the long one.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
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

    /// EMA periods as `(short, medium, long)`.
    pub fn periods(&self) -> (usize, usize, usize) {
        (self.short, self.medium, self.long)
    }

    /// Indicator column names, short to long.
    pub fn columns(&self) -> &[String; 3] {
        &self.columns
    }

    /// Trend of `bar`, or `None` when flat or an EMA is missing.
    pub fn trend(&self, bar: &Bar) -> Option<PositionSide> {
        let short = bar.indicator(&self.columns[0])?;
        let medium = bar.indicator(&self.columns[1])?;
        let long = bar.indicator(&self.columns[2])?;
        let close = bar.close();

        let up = short > medium && close > long && (!self.strict || medium > long);
        let down = short < medium && close < long && (!self.strict || medium < long);
        match (up, down) {
            (true, _) => Some(PositionSide::Long),
            (_, true) => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl Strategy for EmaTrend {
    fn name(&self) -> &str {
        "ema-trend"
    }

    fn decide(&self, history: &[Bar], positions: &[Position]) -> Decision {
        let Some(bar) = history.last() else {
            return Decision::Hold;
        };
        let trend = self.trend(bar);

        if let Some(open) = positions.first() {
            let side = open.side();
            return if trend == Some(side) {
                Decision::Hold
            } else {
                Decision::Exit(ExitScope::Side(side))
            };
        }

        match trend {
            Some(PositionSide::Short) if !self.allow_short => Decision::Hold,
            Some(side) => {
                let (stop, target) = atr_bracket(side, bar, self.stop_atr, self.target_atr);
                Decision::Enter { side, stop, target }
            }
            None => Decision::Hold,
        }
    }
}
