use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::warehouse;
use log::{info, warn};
use std::path::PathBuf;

/// A named row-count check against one table
#[derive(Debug, Clone, PartialEq)]
pub struct QualityCheck {
    pub name: String,
    pub table: String,
}

impl QualityCheck {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
        }
    }
}

/// Checks run after every transform.
///
/// Kept in step with the models in `dbt_project/models` by hand.
pub fn default_checks() -> Vec<QualityCheck> {
    vec![
        QualityCheck::new("raw", "raw.stock_prices"),
        QualityCheck::new("staging", "main_staging.stg_stocks"),
        QualityCheck::new("returns", "main_marts.daily_returns"),
        QualityCheck::new("mavg", "main_marts.moving_averages"),
    ]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub counts: Vec<(String, i64)>,
}

pub struct QualityGate {
    db_path: PathBuf,
    checks: Vec<QualityCheck>,
}

impl QualityGate {
    pub fn new(config: &Config) -> Self {
        Self {
            db_path: config.db_path.clone(),
            checks: default_checks(),
        }
    }

    pub fn with_checks(mut self, checks: Vec<QualityCheck>) -> Self {
        self.checks = checks;
        self
    }

    pub fn checks(&self) -> &[QualityCheck] {
        &self.checks
    }

    /// Runs every check; fails with the names of all checks that counted zero.
    ///
    /// A table that does not exist yet counts as zero, and a missing
    /// warehouse file fails every check without being created.
    pub fn run(&self) -> Result<QualityReport> {
        let counts = if !self.db_path.exists() {
            warn!(target: "quality", "warehouse {} does not exist", self.db_path.display());
            self.checks.iter().map(|check| (check.name.clone(), 0)).collect::<Vec<_>>()
        } else {
            let connection = warehouse::open(&self.db_path)?;
            let mut counts = Vec::with_capacity(self.checks.len());
            for check in &self.checks {
                let count = if warehouse::table_exists(&connection, &check.table)? {
                    warehouse::count_rows(&connection, &check.table)?
                } else {
                    warn!(target: "quality", "{}: table {} does not exist", check.name, check.table);
                    0
                };
                info!(target: "quality", "{}: {} rows", check.name, count);
                counts.push((check.name.clone(), count));
            }
            counts
        };

        let failed: Vec<String> = counts
            .iter()
            .filter(|(_, count)| *count == 0)
            .map(|(name, _)| name.clone())
            .collect();

        if !failed.is_empty() {
            return Err(PipelineError::QualityCheckFailed { failed });
        }

        Ok(QualityReport { counts })
    }
}
