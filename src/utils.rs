//! Loading exchange klines into a [`Series`].
//!
//! Accepts a JSON array of kline objects such as:
//!
//! ```json
//! {
//!   "open_time": 1759813200000,
//!   "open_price": 124499.99,
//!   "high_price": 124640.76,
//!   "low_price": 124240.37,
//!   "close_price": 124414.17,
//!   "volume": 424.20697,
//!   "close_time": 1759816799999,
//!   "quote_asset_volume": 52795455.4981537,
//!   "number_of_trades": 102055,
//!   "ema_21": 124102.5
//! }
//! ```
//!
//! Times are milliseconds since the epoch. Any other numeric field is kept as
//! an indicator column; `null` reads as a missing value.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::engine::{Bar, BarBuilder, Series};
use crate::errors::Result;

/// Exchange bookkeeping fields that are not indicators.
const IGNORED_FIELDS: [&str; 6] = [
    "close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_volume",
    "taker_buy_quote_volume",
    "ignore",
];

/// One kline as found in exchange exports.
#[derive(Debug, Clone, Deserialize)]
pub struct Kline {
    #[serde(with = "ts_milliseconds", alias = "timestamp")]
    open_time: DateTime<Utc>,
    #[serde(alias = "open_price")]
    open: f64,
    #[serde(alias = "high_price")]
    high: f64,
    #[serde(alias = "low_price")]
    low: f64,
    #[serde(alias = "close_price")]
    close: f64,
    #[serde(default)]
    volume: f64,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl Kline {
    /// Returns the open time, used as the bar timestamp.
    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    /// Returns the close price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Numeric extra fields, exchange bookkeeping excluded.
    pub fn indicators(&self) -> impl Iterator<Item = (&str, f64)> {
        self.extra
            .iter()
            .filter(|(name, _)| !IGNORED_FIELDS.contains(&name.as_str()))
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.as_str(), v)))
    }
}

impl TryFrom<&Kline> for Bar {
    type Error = crate::errors::Error;

    fn try_from(kline: &Kline) -> Result<Self> {
        kline
            .indicators()
            .fold(
                BarBuilder::builder()
                    .timestamp(kline.open_time)
                    .open(kline.open)
                    .high(kline.high)
                    .low(kline.low)
                    .close(kline.close)
                    .volume(kline.volume),
                |builder, (name, value)| builder.indicator(name, value),
            )
            .build()
    }
}

/// Parses klines from a JSON reader.
pub fn read_klines<R: Read>(reader: R) -> Result<Vec<Kline>> {
    Ok(serde_json::from_reader(reader)?)
}

/// Reads klines from `filepath` and returns them as a validated series.
pub fn get_data_from_file(filepath: impl AsRef<Path>) -> Result<Series> {
    use std::{fs::File, io::BufReader};

    let file = File::open(filepath)?;
    let klines = read_klines(BufReader::new(file))?;
    let bars = klines.iter().map(Bar::try_from).collect::<Result<Vec<_>>>()?;
    Series::new(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    const KLINES: &str = r#"[
        {
            "open_time": 1759813200000,
            "open_price": 124499.99,
            "high_price": 124640.76,
            "low_price": 124240.37,
            "close_price": 124414.17,
            "volume": 424.20697,
            "close_time": 1759816799999,
            "quote_asset_volume": 52795455.4981537,
            "number_of_trades": 102055,
            "ema_8": 124400.0,
            "atr": null
        },
        {
            "open_time": 1759816800000,
            "open": 124414.17,
            "high": 124500.0,
            "low": 124000.0,
            "close": 124100.0
        }
    ]"#;

    #[test]
    fn parse_klines_into_bars() {
        let klines = read_klines(KLINES.as_bytes()).unwrap();
        let bars = klines.iter().map(Bar::try_from).collect::<Result<Vec<_>>>().unwrap();
        let series = Series::new(bars).unwrap();

        assert_eq!(series.len(), 2);
        let first = &series.bars()[0];
        assert_eq!(first.timestamp(), DateTime::from_timestamp_millis(1759813200000).unwrap());
        assert_eq!(first.close(), 124414.17);
        assert_eq!(first.volume(), 424.20697);
        assert_eq!(first.indicator("ema_8"), Some(124400.0));
        assert_eq!(first.indicator("atr"), None);
        assert_eq!(first.indicator("number_of_trades"), None);
        assert_eq!(first.indicators().len(), 1);

        assert_eq!(series.bars()[1].volume(), 0.0);
    }

    #[test]
    fn reject_broken_kline() {
        let json = r#"[{"open_time": 0, "open": 10.0, "high": 9.0, "low": 8.0, "close": 9.5}]"#;
        let klines = read_klines(json.as_bytes()).unwrap();
        assert!(matches!(Bar::try_from(&klines[0]), Err(Error::InvalidBar(_))));

        assert!(matches!(read_klines("not json".as_bytes()), Err(Error::JsonError(_))));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(get_data_from_file("does/not/exist.json"), Err(Error::IoError(_))));
    }
}
