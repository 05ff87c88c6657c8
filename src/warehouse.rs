use crate::errors::{PipelineError, Result};
use crate::models::price::PriceBar;
use crate::util::{escape_sql_string, quote_identifier};
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::{params, Connection};
use std::fs;
use std::path::Path;

pub const RAW_TABLE: &str = "raw.stock_prices";

const RAW_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS raw;

CREATE TABLE IF NOT EXISTS raw.stock_prices (
    symbol       VARCHAR,
    trade_date   DATE,
    open         DOUBLE,
    high         DOUBLE,
    low          DOUBLE,
    close        DOUBLE,
    volume       BIGINT,
    ingested_at  TIMESTAMP,
    PRIMARY KEY (symbol, trade_date)
);
"#;

/// Opens the warehouse file, creating its parent directory if needed.
///
/// The returned connection holds the DuckDB file lock until it is dropped.
pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Connection::open(db_path)?)
}

pub fn ensure_raw_table(connection: &Connection) -> Result<()> {
    connection.execute_batch(RAW_DDL)?;
    Ok(())
}

/// Splits `schema.table`; an unqualified name lives in `main`.
pub fn split_table_name(qualified: &str) -> (&str, &str) {
    match qualified.rsplit_once('.') {
        Some((schema, table)) => (schema, table),
        None => ("main", qualified),
    }
}

pub fn table_exists(connection: &Connection, qualified: &str) -> Result<bool> {
    let (schema, table) = split_table_name(qualified);
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        params![schema, table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_rows(connection: &Connection, qualified: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(qualified));
    Ok(connection.query_row(sql.as_str(), [], |row| row.get(0))?)
}

/// Commits on success, rolls back and returns the original error otherwise.
pub fn finalize_transaction<T>(connection: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Most recent bars from the raw table, newest first.
pub fn latest_bars(connection: &Connection, symbol: Option<&str>, limit: usize) -> Result<Vec<PriceBar>> {
    if !table_exists(connection, RAW_TABLE)? {
        return Ok(Vec::new());
    }

    let filter = match symbol {
        Some(symbol) => format!("WHERE symbol = '{}'", escape_sql_string(symbol)),
        None => String::new(),
    };
    let sql = format!(
        r#"
SELECT symbol, CAST(trade_date AS VARCHAR), open, high, low, close, volume, CAST(ingested_at AS VARCHAR)
FROM raw.stock_prices
{filter}
ORDER BY trade_date DESC, symbol
LIMIT {limit}
"#,
        filter = filter,
        limit = limit,
    );
    let mut statement = connection.prepare(sql.as_str())?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, i64>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut bars = Vec::new();
    for row in rows {
        let (symbol, trade_date, open, high, low, close, volume, ingested_at) = row?;
        bars.push(PriceBar {
            symbol,
            trade_date: NaiveDate::parse_from_str(&trade_date, "%Y-%m-%d")?,
            open,
            high,
            low,
            close,
            volume,
            ingested_at: NaiveDateTime::parse_from_str(&ingested_at, "%Y-%m-%d %H:%M:%S%.f")?,
        });
    }
    Ok(bars)
}

/// `(column name, DuckDB type)` pairs in table order.
pub fn describe_table(connection: &Connection, qualified: &str) -> Result<Vec<(String, String)>> {
    let (schema, table) = split_table_name(qualified);
    let mut statement = connection.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
    )?;
    let columns = statement
        .query_map(params![schema, table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(PipelineError::DataError(format!("table {} does not exist", qualified)));
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn raw_table_creation_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let connection = open(&temp.path().join("nested").join("wh.duckdb")).expect("open");

        ensure_raw_table(&connection).expect("first");
        ensure_raw_table(&connection).expect("second");

        assert!(table_exists(&connection, RAW_TABLE).expect("exists"));
        assert!(!table_exists(&connection, "main_marts.daily_returns").expect("exists"));
        assert_eq!(count_rows(&connection, RAW_TABLE).expect("count"), 0);
    }

    #[test]
    fn describe_lists_columns_in_order() {
        let temp = tempdir().expect("tempdir");
        let connection = open(&temp.path().join("wh.duckdb")).expect("open");
        ensure_raw_table(&connection).expect("ddl");

        let columns = describe_table(&connection, RAW_TABLE).expect("describe");
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, crate::models::price::PRICE_BAR_FIELDS.to_vec());
        assert_eq!(columns[1].1, "DATE");

        let error = describe_table(&connection, "main.absent").expect_err("missing");
        assert!(matches!(error, PipelineError::DataError(_)));
    }

    #[test]
    fn latest_bars_reads_back_rows() {
        let temp = tempdir().expect("tempdir");
        let connection = open(&temp.path().join("wh.duckdb")).expect("open");
        assert!(latest_bars(&connection, None, 5).expect("empty").is_empty());

        ensure_raw_table(&connection).expect("ddl");
        connection
            .execute_batch(
                "INSERT INTO raw.stock_prices VALUES \
                 ('AAPL', DATE '2025-01-02', 1, 2, 0.5, 1.5, 10, TIMESTAMP '2025-01-03 06:00:00'), \
                 ('AAPL', DATE '2025-01-03', 2, 3, 1.5, 2.5, 20, TIMESTAMP '2025-01-03 06:00:00.5'), \
                 ('MSFT', DATE '2025-01-03', 3, 4, 2.5, 3.5, 30, TIMESTAMP '2025-01-03 06:00:00')",
            )
            .expect("insert");

        let aapl = latest_bars(&connection, Some("AAPL"), 5).expect("aapl");
        assert_eq!(aapl.len(), 2);
        assert_eq!(aapl[0].trade_date, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
        assert_eq!(aapl[0].volume, 20);

        let all = latest_bars(&connection, None, 2).expect("all");
        assert_eq!(all.len(), 2);
    }
}
