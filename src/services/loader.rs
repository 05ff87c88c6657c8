use crate::config::Config;
use crate::errors::Result;
use crate::util::{escape_sql_string, list_interchange_files, path_to_sql};
use crate::warehouse::{self, RAW_TABLE};
use log::{info, warn};
use std::path::PathBuf;

/// Upserts interchange files into `raw.stock_prices`
pub struct Loader {
    data_dir: PathBuf,
    db_path: PathBuf,
}

impl Loader {
    pub fn new(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            db_path: config.db_path.clone(),
        }
    }

    /// Loads `files`, or every `*.parquet` in the data directory when `None`.
    ///
    /// Returns the total row count of the raw table afterwards, or 0 without
    /// touching the database when there is nothing to load.
    pub fn load(&self, files: Option<&[PathBuf]>) -> Result<u64> {
        let files = match files {
            Some([]) => {
                warn!(target: "loader", "No files handed off to load");
                return Ok(0);
            }
            Some(files) => files.to_vec(),
            None => list_interchange_files(&self.data_dir)?,
        };

        if files.is_empty() {
            warn!(target: "loader", "No Parquet files found in {}", self.data_dir.display());
            return Ok(0);
        }

        info!(target: "loader", "Found {} Parquet files to load", files.len());

        // dropped on every return path, which releases the file lock
        let connection = warehouse::open(&self.db_path)?;
        warehouse::ensure_raw_table(&connection)?;

        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = connection
            .execute_batch(upsert_sql(&files).as_str())
            .map_err(Into::into);
        warehouse::finalize_transaction(&connection, result)?;

        let row_count = warehouse::count_rows(&connection, RAW_TABLE)?;
        info!(target: "loader", "{} now has {} rows", RAW_TABLE, row_count);
        Ok(row_count.max(0) as u64)
    }
}

/// One statement over all files. When two files carry the same
/// (symbol, trade_date) the row with the latest `ingested_at` wins.
fn upsert_sql(files: &[PathBuf]) -> String {
    let file_list = files
        .iter()
        .map(|path| format!("'{}'", escape_sql_string(path_to_sql(path).as_str())))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
INSERT OR REPLACE INTO raw.stock_prices
SELECT
    CAST(symbol      AS VARCHAR)   AS symbol,
    CAST(trade_date  AS DATE)      AS trade_date,
    CAST(open        AS DOUBLE)    AS open,
    CAST(high        AS DOUBLE)    AS high,
    CAST(low         AS DOUBLE)    AS low,
    CAST(close       AS DOUBLE)    AS close,
    CAST(volume      AS BIGINT)    AS volume,
    CAST(ingested_at AS TIMESTAMP) AS ingested_at
FROM read_parquet([{file_list}], filename = true)
QUALIFY ROW_NUMBER() OVER (
    PARTITION BY symbol, CAST(trade_date AS DATE)
    ORDER BY CAST(ingested_at AS TIMESTAMP) DESC, filename DESC
) = 1;
"#,
        file_list = file_list,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::price::PriceBar;
    use crate::util::parquet_utils::write_price_bars;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::path::Path;
    use tempfile::tempdir;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn bars(symbol: &str, days: &[u32], close: f64, ingested_at: NaiveDateTime) -> Vec<PriceBar> {
        days.iter()
            .map(|d| PriceBar {
                symbol: symbol.to_string(),
                trade_date: NaiveDate::from_ymd_opt(2025, 3, *d).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 100,
                ingested_at,
            })
            .collect()
    }

    fn loader(root: &Path) -> Loader {
        Loader::new(
            &Config::new()
                .with_data_dir(root.join("raw"))
                .with_db_path(root.join("warehouse.duckdb")),
        )
    }

    #[test]
    fn empty_directory_loads_nothing() {
        let temp = tempdir().expect("tempdir");
        let loader = loader(temp.path());

        assert_eq!(loader.load(None).expect("load"), 0);
        assert!(!temp.path().join("warehouse.duckdb").exists());
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let raw = temp.path().join("raw");
        std::fs::create_dir_all(&raw).expect("mkdir");
        write_price_bars(&bars("AAPL", &[3, 4, 5], 1.0, at(6)), &raw.join("AAPL_2025-03-10.parquet")).expect("write");

        let loader = loader(temp.path());
        assert_eq!(loader.load(None).expect("first"), 3);
        assert_eq!(loader.load(None).expect("second"), 3);
    }

    #[test]
    fn later_files_supersede_overlapping_rows() {
        let temp = tempdir().expect("tempdir");
        let raw = temp.path().join("raw");
        std::fs::create_dir_all(&raw).expect("mkdir");
        write_price_bars(&bars("AAPL", &[3, 4], 1.0, at(6)), &raw.join("AAPL_2025-03-09.parquet")).expect("write");
        write_price_bars(&bars("AAPL", &[4, 5], 2.0, at(7)), &raw.join("AAPL_2025-03-10.parquet")).expect("write");

        let loader = loader(temp.path());
        assert_eq!(loader.load(None).expect("load"), 3);

        let connection = warehouse::open(&temp.path().join("warehouse.duckdb")).expect("open");
        let close: f64 = connection
            .query_row(
                "SELECT close FROM raw.stock_prices WHERE trade_date = DATE '2025-03-04'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(close, 2.0);
    }

    #[test]
    fn explicit_file_list_skips_directory_scan() {
        let temp = tempdir().expect("tempdir");
        let raw = temp.path().join("raw");
        std::fs::create_dir_all(&raw).expect("mkdir");
        let aapl = raw.join("AAPL_2025-03-10.parquet");
        write_price_bars(&bars("AAPL", &[3, 4], 1.0, at(6)), &aapl).expect("write");
        write_price_bars(&bars("MSFT", &[3, 4, 5], 1.0, at(6)), &raw.join("MSFT_2025-03-10.parquet")).expect("write");

        let loader = loader(temp.path());
        assert_eq!(loader.load(Some(&[aapl])).expect("load"), 2);
    }

    #[test]
    fn empty_handed_off_list_ignores_files_on_disk() {
        let temp = tempdir().expect("tempdir");
        let raw = temp.path().join("raw");
        std::fs::create_dir_all(&raw).expect("mkdir");
        write_price_bars(&bars("MSFT", &[3, 4, 5], 1.0, at(6)), &raw.join("MSFT_2025-03-10.parquet")).expect("write");

        let loader = loader(temp.path());
        assert_eq!(loader.load(Some(&[])).expect("empty list"), 0);
        assert!(!temp.path().join("warehouse.duckdb").exists());
    }

    #[test]
    fn missing_file_is_an_error_and_leaves_table_unchanged() {
        let temp = tempdir().expect("tempdir");
        let loader = loader(temp.path());
        let missing = temp.path().join("raw").join("NOPE_2025-03-10.parquet");

        assert!(loader.load(Some(&[missing])).is_err());

        let connection = warehouse::open(&temp.path().join("warehouse.duckdb")).expect("reopen after error");
        assert_eq!(warehouse::count_rows(&connection, RAW_TABLE).expect("count"), 0);
    }
}
