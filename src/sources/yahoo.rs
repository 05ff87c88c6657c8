use crate::errors::{PipelineError, Result};
use crate::models::frame::{Cell, ColumnLabel, RawFrame};
use crate::sources::base::MarketDataSource;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance v8 chart API source.
///
/// Prices are auto-adjusted: when the response carries an `adjclose` series,
/// open/high/low/close are scaled by `adjclose / close`.
pub struct YahooSource {
    client: Client,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
}

impl YahooSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_request: Mutex::new(None),
        })
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        // period2 is exclusive, matching the half-open range
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or_default();
        let period2 = end.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or_default();
        format!(
            "{}/{}?period1={}&period2={}&interval=1d&includeAdjustedClose=true&events=div%2Csplit",
            self.base_url, symbol, period1, period2
        )
    }

    /// Waits so that requests are at least 500 ms apart and returns the
    /// instant recorded as this request's send time.
    ///
    /// The lock is held across the sleep, so concurrent callers queue up.
    async fn wait_for_rate_limit(&self) -> Instant {
        const MIN_INTERVAL: Duration = Duration::from_millis(500);

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_INTERVAL {
                let wait_time = MIN_INTERVAL - elapsed;
                debug!(target: "source::yahoo", "waiting {:?} for rate limit", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let sent_at = Instant::now();
        *last = Some(sent_at);
        sent_at
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn source_name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_daily(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<RawFrame> {
        if start >= end {
            return Ok(RawFrame::new(frame_columns()));
        }

        self.wait_for_rate_limit().await;

        let url = self.chart_url(symbol, start, end);
        info!(target: "source::yahoo", "Fetching {} from {} to {}", symbol, start, end);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: ChartResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(PipelineError::SourceError {
                    symbol: symbol.to_string(),
                    message: format!("HTTP status {}", status),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let frame = parse_chart(symbol, parsed)?;
        debug!(target: "source::yahoo", "{} returned {} rows", symbol, frame.len());
        Ok(frame)
    }
}

fn frame_columns() -> Vec<ColumnLabel> {
    ["Date", "Open", "High", "Low", "Close", "Volume"]
        .iter()
        .map(|c| ColumnLabel::simple(c))
        .collect()
}

fn parse_chart(symbol: &str, response: ChartResponse) -> Result<RawFrame> {
    let source_error = |message: String| PipelineError::SourceError {
        symbol: symbol.to_string(),
        message,
    };

    if let Some(err) = response.chart.error {
        return Err(source_error(format!("{}: {}", err.code, err.description)));
    }

    let mut frame = RawFrame::new(frame_columns());

    let Some(data) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(frame);
    };
    let Some(timestamps) = data.timestamp else {
        return Ok(frame);
    };

    let gmtoffset = data.meta.map(|m| m.gmtoffset).unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = data
        .indicators
        .adjclose
        .and_then(|a| a.into_iter().next())
        .map(|a| a.adjclose);

    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

    for (i, ts) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(ts + gmtoffset, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| source_error(format!("timestamp {} out of range", ts)))?;

        let close = at(&quote.close, i);
        let factor = match (adjclose.as_deref().and_then(|a| at(a, i)), close) {
            (Some(adj), Some(close)) if close != 0.0 => adj / close,
            _ => 1.0,
        };

        let price = |v: Option<f64>| v.map(|v| Cell::Number(v * factor)).unwrap_or(Cell::Missing);

        frame.push_row(vec![
            Cell::Date(date),
            price(at(&quote.open, i)),
            price(at(&quote.high, i)),
            price(at(&quote.low, i)),
            price(close),
            at(&quote.volume, i).map(Cell::Number).unwrap_or(Cell::Missing),
        ]);
    }

    Ok(frame)
}
