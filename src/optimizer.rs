//! Strategy parameter optimization.
//!
//! This module runs one isolated backtest per parameter combination, spread
//! over a `rayon` thread pool. The `ParameterCombination` trait defines how
//! parameter sets are generated; `Optimizer::sweep` accepts any explicit list.

use tracing::info;

use crate::config::BacktestConfig;
use crate::engine::{Backtest, Series};
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::strategy::Strategy;

use rayon::prelude::*;

/// Trait defining how to generate parameter combinations for optimization.
///
/// The associated type `Output` represents a single parameter combination
/// (e.g., a tuple of EMA periods).
pub trait ParameterCombination {
    /// Type representing a single parameter combination (e.g., `(usize, usize)`).
    type Output: Clone + Send + Sync;

    /// Generates all parameter combinations to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs a strategy over many parameter combinations.
///
/// Every combination gets its own account, positions and ledger; the series is
/// shared read-only.
#[derive(Debug, Clone)]
pub struct Optimizer {
    series: Series,
    config: BacktestConfig,
}

impl From<&Backtest> for Optimizer {
    fn from(value: &Backtest) -> Self {
        Self {
            series: value.series().clone(),
            config: value.config().clone(),
        }
    }
}

impl Optimizer {
    /// Creates an optimizer. The configuration is validated once here.
    pub fn new(series: Series, config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { series, config })
    }

    /// Sweeps every combination produced by `PC`.
    pub fn optimize<PC, C, S>(&self, build: C) -> Result<Vec<(PC::Output, Metrics)>>
    where
        PC: ParameterCombination,
        C: Fn(&PC::Output) -> Result<S> + Sync,
        S: Strategy,
    {
        self.sweep(&PC::generate(), build)
    }

    /// Backtests the strategy built from each combination in parallel.
    ///
    /// Results come back in the order of `combinations`; a failing build or run
    /// aborts the sweep with its error.
    ///
    /// ### Example
    /// ```rust
    /// use crypto_bts::prelude::*;
    /// use chrono::{DateTime, Duration};
    ///
    /// let bars = (0..10)
    ///     .map(|i| {
    ///         let price = 100.0 + i as f64;
    ///         BarBuilder::builder()
    ///             .timestamp(DateTime::default() + Duration::hours(i))
    ///             .open(price)
    ///             .high(price + 1.0)
    ///             .low(price - 1.0)
    ///             .close(price)
    ///             .build()
    ///             .unwrap()
    ///     })
    ///     .collect::<Vec<_>>();
    /// let optimizer = Optimizer::new(Series::new(bars).unwrap(), BacktestConfig::default()).unwrap();
    ///
    /// let results = optimizer
    ///     .sweep(&[2usize, 4, 6], |&every| {
    ///         Ok(move |history: &[Bar], _: &[Position]| {
    ///             if history.len() % every == 0 { Decision::long(None, None) } else { Decision::Hold }
    ///         })
    ///     })
    ///     .unwrap();
    /// assert_eq!(results.len(), 3);
    /// assert_eq!(results[0].0, 2);
    /// ```
    pub fn sweep<P, C, S>(&self, combinations: &[P], build: C) -> Result<Vec<(P, Metrics)>>
    where
        P: Clone + Send + Sync,
        C: Fn(&P) -> Result<S> + Sync,
        S: Strategy,
    {
        let num_cpus = num_cpus::get();
        let chunk_size = combinations.len().div_ceil(num_cpus).max(1);
        info!(combinations = combinations.len(), chunk_size, "parameter sweep started");

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut backtest = Backtest::new(self.series.clone(), self.config.clone())?;
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    let strategy = build(param_set)?;
                    let report = backtest.run(&strategy)?;
                    local_results.push((param_set.clone(), report.metrics()));
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}
