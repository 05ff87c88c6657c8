use crate::config::Config;
use crate::errors::Result;
use crate::models::frame::normalize_frame;
use crate::sources::base::MarketDataSource;
use crate::util::{self, parquet_utils};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub files: Vec<PathBuf>,
    pub empty: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub configured: usize,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.files.len()
    }
}

/// Pulls daily bars per symbol and writes one Parquet file per symbol
pub struct Fetcher {
    source: Arc<dyn MarketDataSource + Send + Sync>,
    symbols: Vec<String>,
    data_dir: PathBuf,
    market_timezone: Tz,
}

impl Fetcher {
    pub fn new(config: &Config, source: Arc<dyn MarketDataSource + Send + Sync>) -> Self {
        Self {
            source,
            symbols: config.symbols.clone(),
            data_dir: config.data_dir.clone(),
            market_timezone: config.market_timezone,
        }
    }

    /// Fetch the last `lookback_days` ending today in the market time zone.
    pub async fn run_ingestion(&self, lookback_days: u32) -> FetchReport {
        let today = util::market_today(self.market_timezone);
        self.run_ingestion_on(lookback_days, today).await
    }

    /// Same as [`run_ingestion`](Self::run_ingestion) with an explicit "today".
    ///
    /// A failing or empty symbol never stops the remaining ones.
    pub async fn run_ingestion_on(&self, lookback_days: u32, today: NaiveDate) -> FetchReport {
        let (start, end) = util::date_range(lookback_days, today);
        let mut report = FetchReport {
            configured: self.symbols.len(),
            ..FetchReport::default()
        };

        for symbol in &self.symbols {
            match self.fetch_symbol(symbol, start, end, today).await {
                Ok(Some(path)) => report.files.push(path),
                Ok(None) => report.empty.push(symbol.clone()),
                Err(e) => {
                    error!(target: "fetcher", "Failed to fetch {}: {}", symbol, e);
                    report.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }

        info!(
            target: "fetcher",
            "Ingestion complete. {}/{} symbols saved.",
            report.succeeded(),
            report.configured
        );
        report
    }

    async fn fetch_symbol(&self, symbol: &str, start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<Option<PathBuf>> {
        info!(target: "fetcher", "Fetching {} from {} to {} via {}", symbol, start, end, self.source.source_name());
        let frame = self.source.fetch_daily(symbol, start, end).await?;

        if frame.is_empty() {
            warn!(target: "fetcher", "No data returned for {}", symbol);
            return Ok(None);
        }

        let ingested_at = Utc::now().naive_utc();
        let bars = normalize_frame(symbol, &frame, ingested_at)?;
        if bars.is_empty() {
            warn!(target: "fetcher", "No usable rows for {} ({} raw rows dropped)", symbol, frame.len());
            return Ok(None);
        }

        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.data_dir.join(util::interchange_file_name(symbol, today));
        parquet_utils::write_price_bars(&bars, &path)?;
        Ok(Some(path))
    }
}
