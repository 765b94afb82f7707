//! Trade ledger and equity curve export.
//!
//! - **CSV**: one row per trade or equity sample, full float precision so a
//!   rerun produces byte-identical files.
//! - **JSON**: the whole report with its metrics.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::engine::{EquityPoint, Report, Trade};
use crate::errors::Result;
use crate::metrics::Metrics;

const TRADE_HEADER: [&str; 11] = [
    "position_id",
    "side",
    "entry_time",
    "entry_price",
    "exit_time",
    "exit_price",
    "exit_reason",
    "quantity",
    "fees",
    "pnl",
    "return_pct",
];

const EQUITY_HEADER: [&str; 6] = ["timestamp", "cash", "locked", "unrealized_pnl", "equity", "open_positions"];

/// Writes the trade ledger as CSV.
pub fn write_trades_csv<W: Write>(writer: W, trades: &[Trade]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(TRADE_HEADER)?;

    for t in trades {
        wtr.write_record([
            t.position_id.to_string(),
            t.side.to_string(),
            t.entry_timestamp.to_rfc3339(),
            t.entry_price.to_string(),
            t.exit_timestamp.to_rfc3339(),
            t.exit_price.to_string(),
            t.exit_reason.to_string(),
            t.quantity.to_string(),
            t.fees.to_string(),
            t.pnl.to_string(),
            t.return_pct().to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes the equity curve as CSV.
pub fn write_equity_csv<W: Write>(writer: W, equity_curve: &[EquityPoint]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EQUITY_HEADER)?;

    for p in equity_curve {
        wtr.write_record([
            p.timestamp.to_rfc3339(),
            p.cash.to_string(),
            p.locked.to_string(),
            p.unrealized_pnl.to_string(),
            p.equity.to_string(),
            p.open_positions.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Report plus its metrics, as written by [`write_report_json`].
#[derive(serde::Serialize)]
struct ReportDocument<'a> {
    metrics: Metrics,
    #[serde(flatten)]
    report: &'a Report,
}

/// Writes the report and its metrics as pretty JSON.
pub fn write_report_json<W: Write>(writer: W, report: &Report) -> Result<()> {
    let document = ReportDocument {
        metrics: report.metrics(),
        report,
    };
    serde_json::to_writer_pretty(writer, &document)?;
    Ok(())
}

/// Creates `path` and writes the trade ledger into it.
pub fn save_trades(path: impl AsRef<Path>, trades: &[Trade]) -> Result<()> {
    write_trades_csv(BufWriter::new(File::create(path)?), trades)
}

/// Creates `path` and writes the equity curve into it.
pub fn save_equity(path: impl AsRef<Path>, equity_curve: &[EquityPoint]) -> Result<()> {
    write_equity_csv(BufWriter::new(File::create(path)?), equity_curve)
}

/// Creates `path` and writes the JSON report into it.
pub fn save_report(path: impl AsRef<Path>, report: &Report) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_report_json(&mut writer, report)?;
    writer.flush()?;
    Ok(())
}
