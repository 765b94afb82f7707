/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A bar field is not a finite number or breaks the OHLC envelope.
    #[error("Invalid bar: {0}")]
    InvalidBar(String),

    /// A required builder field was never set.
    #[error("Missing bar field: {0}")]
    MissingField(&'static str),

    /// Timestamps must be unique and strictly increasing.
    #[error("Series is not strictly increasing at index {index}")]
    UnorderedSeries {
        /// Index of the first offending bar.
        index: usize,
    },

    /// An indicator column does not line up with the series.
    #[error("Indicator column `{name}` has {got} values, series has {expected} bars")]
    IndicatorLength {
        /// Column name.
        name: String,
        /// Values supplied.
        got: usize,
        /// Bars in the series.
        expected: usize,
    },

    /// The configuration is rejected before any simulation starts.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The initial or current balance is not positive. Trading requires a positive balance.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// The account does not have enough free funds to allocate.
    /// Expected: {0}, Available: {1}
    #[error("Insufficient funds: required {0}, available {1}")]
    InsufficientFunds(f64, f64),

    /// Releasing more capital than is currently allocated.
    #[error("Cannot unlock {1}, only {0} is allocated")]
    UnlockBalance(f64, f64),

    /// The direction string is neither long nor short.
    #[error("Unsupported direction: {0}")]
    UnsupportedDirection(String),

    /// The timeframe string is not a known candle interval.
    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// A fill or exit price is not positive and finite.
    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    /// A partial close quantity is out of range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),

    /// The position was not found.
    #[error("Position {0} not found")]
    PositionNotFound(u64),

    /// A closing timestamp does not come after the entry timestamp.
    #[error("Position {0} cannot be closed at or before its entry timestamp")]
    ExitBeforeEntry(u64),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV writer error occurred.
    #[cfg(feature = "export")]
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}
