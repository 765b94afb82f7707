//! crypto-bts: run one backtest over a kline file and print its metrics.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use crypto_bts::export::{save_equity, save_report, save_trades};
use crypto_bts::prelude::*;
use crypto_bts::utils::get_data_from_file;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    /// Aligned EMA trend following (`ema_*` and `atr` columns).
    EmaTrend,
    /// Band breakouts on expanding volatility (`atr` and `bb_*` columns).
    Volatility,
    /// Candlestick reversal patterns, OHLC only.
    CandlePatterns,
}

#[derive(Parser)]
#[command(name = "crypto-bts", about = "Bar-by-bar backtest of a strategy over crypto klines")]
struct Cli {
    /// JSON backtest configuration. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of klines, indicator columns included.
    #[arg(long)]
    data: PathBuf,

    /// Strategy to run.
    #[arg(long, value_enum, default_value_t = StrategyKind::EmaTrend)]
    strategy: StrategyKind,

    /// EMA periods for `ema-trend`, short,medium,long.
    #[arg(long, value_delimiter = ',', default_values_t = [8, 21, 200])]
    ema: Vec<usize>,

    /// Require full EMA alignment for `ema-trend`.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Only take long entries.
    #[arg(long, default_value_t = false)]
    long_only: bool,

    /// Write the trade ledger as CSV.
    #[arg(long)]
    trades: Option<PathBuf>,

    /// Write the equity curve as CSV.
    #[arg(long)]
    equity: Option<PathBuf>,

    /// Write the full report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            BacktestConfig::from_file(path).with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => BacktestConfig::default(),
    };
    let series =
        get_data_from_file(&cli.data).with_context(|| format!("failed to load klines {}", cli.data.display()))?;

    let strategy: Box<dyn Strategy> = match cli.strategy {
        StrategyKind::EmaTrend => {
            let [short, medium, long] = cli.ema[..] else {
                bail!("--ema expects three periods, got {}", cli.ema.len());
            };
            Box::new(
                EmaTrend::new(short, medium, long)
                    .strict(cli.strict)
                    .allow_short(!cli.long_only),
            )
        }
        StrategyKind::Volatility => Box::new(VolatilityBreakout::default().allow_short(!cli.long_only)),
        StrategyKind::CandlePatterns => Box::new(CandlePatterns::default().allow_short(!cli.long_only)),
    };

    let mut backtest = Backtest::new(series, config)?;
    let report = backtest.run(strategy.as_ref())?;
    println!("{}", report.metrics());

    if let Some(path) = &cli.trades {
        save_trades(path, &report.trades).with_context(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(path) = &cli.equity {
        save_equity(path, &report.equity_curve).with_context(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(path) = &cli.report {
        save_report(path, &report).with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}
