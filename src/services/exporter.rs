use crate::config::Config;
use crate::errors::Result;
use crate::util::quote_identifier;
use crate::warehouse;
use async_trait::async_trait;
use duckdb::Connection;
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::path::PathBuf;

/// Target table name and the DuckDB table it is copied from.
pub const EXPORT_TABLES: [(&str, &str); 3] = [
    ("daily_returns", "main_marts.daily_returns"),
    ("moving_averages", "main_marts.moving_averages"),
    ("stg_stocks", "main_staging.stg_stocks"),
];

// Postgres caps bind parameters per statement at 65535
const MAX_BIND_PARAMS: usize = 60_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportColumn {
    pub name: String,
    pub duckdb_type: String,
}

impl ExportColumn {
    pub fn postgres_type(&self) -> &'static str {
        postgres_type(&self.duckdb_type)
    }
}

/// Full copy of one table with every value rendered as text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSnapshot {
    pub columns: Vec<ExportColumn>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Maps a DuckDB column type to the Postgres type used for the copy.
pub fn postgres_type(duckdb_type: &str) -> &'static str {
    let upper = duckdb_type.trim().to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" => "TEXT",
        "DATE" => "DATE",
        "DOUBLE" | "FLOAT" | "REAL" | "FLOAT4" | "FLOAT8" | "DECIMAL" | "NUMERIC" => "DOUBLE PRECISION",
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "UTINYINT" | "USMALLINT" | "UINTEGER" => "BIGINT",
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP_US" => "TIMESTAMP",
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => "TIMESTAMPTZ",
        "BOOLEAN" | "BOOL" => "BOOLEAN",
        _ => "TEXT",
    }
}

/// Reads `qualified` in full, casting every value to VARCHAR.
pub fn read_table(connection: &Connection, qualified: &str) -> Result<TableSnapshot> {
    let columns: Vec<ExportColumn> = warehouse::describe_table(connection, qualified)?
        .into_iter()
        .map(|(name, duckdb_type)| ExportColumn { name, duckdb_type })
        .collect();

    let select_list = columns
        .iter()
        .map(|c| format!("CAST({} AS VARCHAR)", quote_identifier(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}", select_list, quote_identifier(qualified));

    let width = columns.len();
    let mut statement = connection.prepare(sql.as_str())?;
    let rows = statement
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i))
                .collect::<duckdb::Result<Vec<Option<String>>>>()
        })?
        .collect::<std::result::Result<Vec<Vec<Option<String>>>, _>>()?;

    Ok(TableSnapshot { columns, rows })
}

/// Destination for exported tables
#[async_trait]
pub trait ExportSink {
    /// Replaces `table` with exactly the snapshot's columns and rows.
    async fn replace_table(&self, table: &str, snapshot: &TableSnapshot) -> Result<u64>;
}

pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn connect(conn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(1).connect(conn).await?;
        Ok(Self { pool })
    }
}

pub fn create_table_sql(table: &str, columns: &[ExportColumn]) -> String {
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.postgres_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_identifier(table), definitions)
}

#[async_trait]
impl ExportSink for PostgresSink {
    async fn replace_table(&self, table: &str, snapshot: &TableSnapshot) -> Result<u64> {
        let target = quote_identifier(table);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_table_sql(table, &snapshot.columns))
            .execute(&mut *tx)
            .await?;

        let column_list = snapshot
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let batch_size = (MAX_BIND_PARAMS / snapshot.columns.len().max(1)).max(1);

        let mut inserted = 0u64;
        for chunk in snapshot.rows.chunks(batch_size) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", target, column_list));
            builder.push_values(chunk, |mut b, row| {
                for (value, column) in row.iter().zip(&snapshot.columns) {
                    b.push("CAST(");
                    b.push_bind_unseparated(value.clone());
                    b.push_unseparated(format!(" AS {})", column.postgres_type()));
                }
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

/// Copies mart and staging tables out of DuckDB, always as a full replace
pub struct Exporter {
    db_path: PathBuf,
    tables: Vec<(String, String)>,
}

impl Exporter {
    pub fn new(config: &Config) -> Self {
        Self {
            db_path: config.db_path.clone(),
            tables: EXPORT_TABLES
                .iter()
                .map(|(target, source)| (target.to_string(), source.to_string()))
                .collect(),
        }
    }

    /// Snapshots every table first, so the DuckDB file is released before
    /// any rows go over the network.
    pub async fn export(&self, sink: &(dyn ExportSink + Send + Sync)) -> Result<Vec<(String, u64)>> {
        let snapshots = {
            let connection = warehouse::open(&self.db_path)?;
            self.tables
                .iter()
                .map(|(target, source)| -> Result<(String, TableSnapshot)> {
                    Ok((target.clone(), read_table(&connection, source)?))
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut exported = Vec::with_capacity(snapshots.len());
        for (table, snapshot) in &snapshots {
            info!(target: "exporter", "Exporting {}...", table);
            let rows = sink.replace_table(table, snapshot).await?;
            info!(target: "exporter", "  {} rows exported", rows);
            exported.push((table.clone(), rows));
        }

        info!(target: "exporter", "All tables exported to Postgres!");
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        tables: Mutex<Vec<(String, TableSnapshot)>>,
    }

    #[async_trait]
    impl ExportSink for RecordingSink {
        async fn replace_table(&self, table: &str, snapshot: &TableSnapshot) -> Result<u64> {
            self.tables.lock().unwrap().push((table.to_string(), snapshot.clone()));
            Ok(snapshot.rows.len() as u64)
        }
    }

    fn seed_marts(db_path: &std::path::Path) {
        let connection = Connection::open(db_path).expect("open");
        connection
            .execute_batch(
                r#"
CREATE SCHEMA main_staging;
CREATE SCHEMA main_marts;
CREATE TABLE main_staging.stg_stocks (symbol VARCHAR, trade_date DATE, close DOUBLE);
INSERT INTO main_staging.stg_stocks VALUES ('AAPL', DATE '2025-03-03', 1.5), ('AAPL', DATE '2025-03-04', NULL);
CREATE TABLE main_marts.daily_returns (symbol VARCHAR, trade_date DATE, daily_return DOUBLE);
INSERT INTO main_marts.daily_returns VALUES ('AAPL', DATE '2025-03-04', 0.25);
CREATE TABLE main_marts.moving_averages (symbol VARCHAR, trade_date DATE, ma_7 DOUBLE, n BIGINT);
"#,
            )
            .expect("seed");
    }

    #[test]
    fn type_mapping_covers_duckdb_types() {
        assert_eq!(postgres_type("VARCHAR"), "TEXT");
        assert_eq!(postgres_type("DECIMAL(18,3)"), "DOUBLE PRECISION");
        assert_eq!(postgres_type("bigint"), "BIGINT");
        assert_eq!(postgres_type("TIMESTAMP WITH TIME ZONE"), "TIMESTAMPTZ");
        assert_eq!(postgres_type("STRUCT(a INTEGER)"), "TEXT");
    }

    #[test]
    fn create_table_quotes_names() {
        let columns = vec![
            ExportColumn { name: "symbol".to_string(), duckdb_type: "VARCHAR".to_string() },
            ExportColumn { name: "ma_7".to_string(), duckdb_type: "DOUBLE".to_string() },
        ];
        assert_eq!(
            create_table_sql("moving_averages", &columns),
            "CREATE TABLE \"moving_averages\" (\"symbol\" TEXT, \"ma_7\" DOUBLE PRECISION)"
        );
    }

    #[test]
    fn read_table_renders_values_as_text() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wh.duckdb");
        seed_marts(&db_path);

        let connection = Connection::open(&db_path).expect("open");
        let snapshot = read_table(&connection, "main_staging.stg_stocks").expect("read");

        assert_eq!(snapshot.columns.len(), 3);
        assert_eq!(snapshot.columns[1].postgres_type(), "DATE");
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0][1].as_deref(), Some("2025-03-03"));
        assert_eq!(snapshot.rows[1][2], None);
    }

    #[tokio::test]
    async fn export_copies_every_table_in_order() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wh.duckdb");
        seed_marts(&db_path);

        let sink = RecordingSink::default();
        let exported = Exporter::new(&Config::new().with_db_path(&db_path))
            .export(&sink)
            .await
            .expect("export");

        assert_eq!(
            exported,
            vec![
                ("daily_returns".to_string(), 1),
                ("moving_averages".to_string(), 0),
                ("stg_stocks".to_string(), 2),
            ]
        );
        let tables = sink.tables.lock().unwrap();
        assert_eq!(tables[1].1.columns.len(), 4);
    }

    #[tokio::test]
    async fn missing_source_table_fails_before_writing() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wh.duckdb");

        let sink = RecordingSink::default();
        let result = Exporter::new(&Config::new().with_db_path(&db_path)).export(&sink).await;

        assert!(result.is_err());
        assert!(sink.tables.lock().unwrap().is_empty());
    }
}
