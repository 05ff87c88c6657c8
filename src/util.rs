use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

/// Half-open `[today - lookback_days, today)` range.
pub fn date_range(lookback_days: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(i64::from(lookback_days)), today)
}

/// Calendar date "now" in the market's time zone
pub fn market_today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// `{SYMBOL}_{YYYY-MM-DD}.parquet`
pub fn interchange_file_name(symbol: &str, fetch_date: NaiveDate) -> String {
    format!("{}_{}.parquet", symbol, fetch_date.format("%Y-%m-%d"))
}

/// Non-recursive listing of `*.parquet` files in `dir`, sorted by path.
///
/// A directory that does not exist yet yields an empty list.
pub fn list_interchange_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| extension.eq_ignore_ascii_case("parquet"))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Quotes a possibly schema-qualified identifier, e.g. `main_marts.daily_returns`.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

// Parquet interchange files
pub mod parquet_utils {
    use crate::errors::{PipelineError, Result};
    use crate::models::price::{PriceBar, PRICE_BAR_FIELDS};
    use arrow::array::{ArrayRef, StringBuilder};
    use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
    use arrow::record_batch::RecordBatch;
    use arrow_array::{Array, Date32Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use chrono::{DateTime, NaiveDate};
    use log::info;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::arrow::ArrowWriter;
    use parquet::basic::Compression;
    use parquet::file::properties::WriterProperties;
    use std::fs::File;
    use std::path::Path;
    use std::sync::Arc;

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
    }

    pub fn price_bar_schema() -> SchemaRef {
        let types = [
            DataType::Utf8,
            DataType::Date32,
            DataType::Float64,
            DataType::Float64,
            DataType::Float64,
            DataType::Float64,
            DataType::Int64,
            DataType::Timestamp(TimeUnit::Microsecond, None),
        ];
        let fields: Vec<Field> = PRICE_BAR_FIELDS
            .iter()
            .zip(types)
            .map(|(name, data_type)| Field::new(*name, data_type, false))
            .collect();
        Arc::new(Schema::new(fields))
    }

    pub fn price_bars_to_record_batch(bars: &[PriceBar]) -> Result<RecordBatch> {
        let mut symbol_builder = StringBuilder::new();
        for bar in bars {
            symbol_builder.append_value(&bar.symbol);
        }

        let trade_dates: Vec<i32> = bars
            .iter()
            .map(|b| (b.trade_date - epoch()).num_days() as i32)
            .collect();
        let ingested_at: Vec<i64> = bars
            .iter()
            .map(|b| b.ingested_at.and_utc().timestamp_micros())
            .collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(symbol_builder.finish()),
            Arc::new(Date32Array::from(trade_dates)),
            Arc::new(Float64Array::from_iter_values(bars.iter().map(|b| b.open))),
            Arc::new(Float64Array::from_iter_values(bars.iter().map(|b| b.high))),
            Arc::new(Float64Array::from_iter_values(bars.iter().map(|b| b.low))),
            Arc::new(Float64Array::from_iter_values(bars.iter().map(|b| b.close))),
            Arc::new(Int64Array::from_iter_values(bars.iter().map(|b| b.volume))),
            Arc::new(TimestampMicrosecondArray::from(ingested_at)),
        ];

        Ok(RecordBatch::try_new(price_bar_schema(), columns)?)
    }

    /// Writes bars to a new Parquet file, replacing any file at `path`.
    pub fn write_price_bars(bars: &[PriceBar], path: &Path) -> Result<()> {
        let batch = price_bars_to_record_batch(bars)?;
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        info!(target: "fetcher", "Saved {} rows -> {}", bars.len(), path.display());
        Ok(())
    }

    pub fn read_price_bars(path: &Path) -> Result<Vec<PriceBar>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut result = Vec::new();
        for batch in reader {
            let batch = batch?;
            let column = |name: &str| {
                batch
                    .column_by_name(name)
                    .ok_or_else(|| PipelineError::DataError(format!("{}: missing column {}", path.display(), name)))
            };
            let downcast_error = |name: &str| PipelineError::DataError(format!("{}: unexpected type for {}", path.display(), name));

            let symbols = column("symbol")?.as_any().downcast_ref::<StringArray>().ok_or_else(|| downcast_error("symbol"))?;
            let dates = column("trade_date")?.as_any().downcast_ref::<Date32Array>().ok_or_else(|| downcast_error("trade_date"))?;
            let open = column("open")?.as_any().downcast_ref::<Float64Array>().ok_or_else(|| downcast_error("open"))?;
            let high = column("high")?.as_any().downcast_ref::<Float64Array>().ok_or_else(|| downcast_error("high"))?;
            let low = column("low")?.as_any().downcast_ref::<Float64Array>().ok_or_else(|| downcast_error("low"))?;
            let close = column("close")?.as_any().downcast_ref::<Float64Array>().ok_or_else(|| downcast_error("close"))?;
            let volume = column("volume")?.as_any().downcast_ref::<Int64Array>().ok_or_else(|| downcast_error("volume"))?;
            let ingested = column("ingested_at")?
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| downcast_error("ingested_at"))?;

            for i in 0..batch.num_rows() {
                if symbols.is_null(i) || dates.is_null(i) {
                    continue;
                }
                let ingested_at = DateTime::from_timestamp_micros(ingested.value(i))
                    .map(|dt| dt.naive_utc())
                    .ok_or_else(|| PipelineError::DataError(format!("{}: bad ingested_at", path.display())))?;

                result.push(PriceBar {
                    symbol: symbols.value(i).to_string(),
                    trade_date: epoch() + chrono::Duration::days(i64::from(dates.value(i))),
                    open: open.value(i),
                    high: high.value(i),
                    low: low.value(i),
                    close: close.value(i),
                    volume: volume.value(i),
                    ingested_at,
                });
            }
        }

        Ok(result)
    }
}
