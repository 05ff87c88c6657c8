use crate::errors::{PipelineError, Result};
use crate::models::price::PriceBar;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// Column label as a market-data source hands it back.
///
/// Some sources label columns with a tuple such as `("Close", "AAPL")`
/// instead of a plain name; both shapes go through [`canonical_field_name`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnLabel {
    Simple(String),
    Compound(Vec<String>),
}

impl ColumnLabel {
    pub fn simple(name: &str) -> Self {
        ColumnLabel::Simple(name.to_string())
    }

    pub fn compound(parts: &[&str]) -> Self {
        ColumnLabel::Compound(parts.iter().map(|p| p.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Date(NaiveDate),
    Number(f64),
    Integer(i64),
    Missing,
}

impl Cell {
    fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Integer(v) => Some(*v),
            Cell::Number(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }
}

/// Tabular result of one source request, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    pub columns: Vec<ColumnLabel>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawFrame {
    pub fn new(columns: Vec<ColumnLabel>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Returns the lower-case field name for a simple or compound label.
///
/// Compound labels keep their first part. Surrounding whitespace is trimmed,
/// inner whitespace becomes `_`, and the date index (`date`/`datetime`) maps
/// to `trade_date`.
pub fn canonical_field_name(label: &ColumnLabel) -> String {
    let raw = match label {
        ColumnLabel::Simple(name) => name.as_str(),
        ColumnLabel::Compound(parts) => parts.first().map(String::as_str).unwrap_or(""),
    };

    let name = raw
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();

    match name.as_str() {
        "date" | "datetime" => "trade_date".to_string(),
        _ => name,
    }
}

const REQUIRED_FIELDS: [&str; 6] = ["trade_date", "open", "high", "low", "close", "volume"];

/// Turns a raw frame into price bars for `symbol`.
///
/// Rows without a date or any of the four prices are dropped, a missing
/// volume becomes 0, and a repeated date keeps its last row. Every bar gets
/// the same `ingested_at`.
pub fn normalize_frame(symbol: &str, frame: &RawFrame, ingested_at: NaiveDateTime) -> Result<Vec<PriceBar>> {
    let names: Vec<String> = frame.columns.iter().map(canonical_field_name).collect();

    let mut index = [0usize; 6];
    for (slot, field) in REQUIRED_FIELDS.iter().enumerate() {
        index[slot] = names.iter().position(|n| n == field).ok_or_else(|| {
            PipelineError::DataError(format!(
                "{}: source frame has no `{}` column (columns: {:?})",
                symbol, field, names
            ))
        })?;
    }
    let [date_ix, open_ix, high_ix, low_ix, close_ix, volume_ix] = index;

    let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
    for row in &frame.rows {
        let cell = |ix: usize| row.get(ix).unwrap_or(&Cell::Missing);

        let Some(trade_date) = cell(date_ix).as_date() else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            cell(open_ix).as_f64(),
            cell(high_ix).as_f64(),
            cell(low_ix).as_f64(),
            cell(close_ix).as_f64(),
        ) else {
            continue;
        };

        by_date.insert(
            trade_date,
            PriceBar {
                symbol: symbol.to_string(),
                trade_date,
                open,
                high,
                low,
                close,
                volume: cell(volume_ix).as_i64().unwrap_or(0),
                ingested_at,
            },
        );
    }

    Ok(by_date.into_values().collect())
}
