use crate::errors::Result;
use crate::models::frame::RawFrame;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Base trait for daily market-data sources
#[async_trait]
pub trait MarketDataSource {
    /// Short name used in log lines
    fn source_name(&self) -> &'static str;

    /// Fetch daily bars for `symbol` over the half-open range `[start, end)`.
    ///
    /// A symbol with no trading data in the range yields an empty frame, not
    /// an error.
    async fn fetch_daily(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<RawFrame>;
}
