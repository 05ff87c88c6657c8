use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("DuckDB error: {0}")]
    DuckDbError(#[from] duckdb::Error),

    #[error("Postgres error: {0}")]
    PostgresError(#[from] sqlx::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("Source error for {symbol}: {message}")]
    SourceError { symbol: String, message: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("No rows loaded into DuckDB")]
    NoRowsLoaded,

    #[error("Quality checks FAILED: {failed:?}")]
    QualityCheckFailed { failed: Vec<String> },

    #[error("Transform step `{command}` failed: {status}")]
    TransformFailed { command: String, status: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::DataError(s)
    }
}

impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::DataError(s.to_string())
    }
}
