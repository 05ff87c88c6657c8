use chrono::{NaiveDate, NaiveDateTime};

/// One daily bar, keyed by (symbol, trade_date)
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Capture time in UTC, not trade time
    pub ingested_at: NaiveDateTime,
}

/// Canonical field order of interchange files and the raw table.
pub const PRICE_BAR_FIELDS: [&str; 8] = [
    "symbol",
    "trade_date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "ingested_at",
];
