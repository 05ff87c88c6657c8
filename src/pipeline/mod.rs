pub mod handoff;

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::services::fetcher::Fetcher;
use crate::services::loader::Loader;
use crate::services::quality::QualityGate;
use crate::services::transformer::Transformer;
use crate::sources::base::MarketDataSource;
use handoff::HandoffStore;
use log::{error, info, warn};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const PARQUET_FILES_KEY: &str = "parquet_files";
pub const ROW_COUNT_KEY: &str = "row_count";

/// Lookback used by the scheduled daily run
pub const DAILY_LOOKBACK_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Load,
    Transform,
    QualityCheck,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Fetch, Stage::Load, Stage::Transform, Stage::QualityCheck];

    pub fn task_id(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch_data",
            Stage::Load => "load_to_duckdb",
            Stage::Transform => "run_dbt_models",
            Stage::QualityCheck => "data_quality_check",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_id())
    }
}

/// Attempts per stage and the fixed pause between them.
///
/// `NoRowsLoaded` is never retried: the load stage would see the same
/// handed-off file list again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.retries,
            delay: config.retry_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Runs fetch, load, transform and quality check in order.
///
/// Each stage gets its own retry budget. The first stage that runs out of
/// attempts ends the run and its error is returned.
pub struct Pipeline {
    config: Config,
    source: Arc<dyn MarketDataSource + Send + Sync>,
    transformer: Arc<dyn Transformer + Send + Sync>,
    handoff: HandoffStore,
    policy: RetryPolicy,
    lookback_days: u32,
}

impl Pipeline {
    /// Builds a pipeline whose handoff store lives at `config.state_path`.
    pub fn new(
        config: Config,
        source: Arc<dyn MarketDataSource + Send + Sync>,
        transformer: Arc<dyn Transformer + Send + Sync>,
    ) -> Result<Self> {
        let handoff = HandoffStore::open(&config.state_path)?;
        let policy = RetryPolicy::from_config(&config);
        Ok(Self {
            config,
            source,
            transformer,
            handoff,
            policy,
            lookback_days: DAILY_LOOKBACK_DAYS,
        })
    }

    pub fn with_handoff(mut self, handoff: HandoffStore) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    pub fn handoff(&self) -> &HandoffStore {
        &self.handoff
    }

    pub async fn run(&mut self) -> Result<()> {
        self.handoff.clear()?;
        for stage in Stage::ALL {
            self.run_stage(stage).await?;
        }
        info!(target: "pipeline", "Pipeline finished: {} stages succeeded", Stage::ALL.len());
        Ok(())
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<()> {
        let attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            info!(target: "pipeline", "[{}] attempt {}/{}", stage, attempt, attempts);
            match self.execute(stage).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(
                        target: "pipeline",
                        "[{}] attempt {} failed: {}; retrying in {:?}",
                        stage, attempt, e, self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(target: "pipeline", "[{}] failed after {} attempt(s): {}", stage, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    async fn execute(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Fetch => {
                let report = Fetcher::new(&self.config, self.source.clone())
                    .run_ingestion(self.lookback_days)
                    .await;
                let files: Vec<String> = report
                    .files
                    .iter()
                    .map(|path| path.to_string_lossy().into_owned())
                    .collect();
                self.handoff.push(stage.task_id(), PARQUET_FILES_KEY, json!(files))
            }
            Stage::Load => {
                let files = self.handoff.pull_paths(Stage::Fetch.task_id(), PARQUET_FILES_KEY);
                let row_count = Loader::new(&self.config).load(files.as_deref())?;
                if row_count == 0 {
                    return Err(PipelineError::NoRowsLoaded);
                }
                self.handoff.push(stage.task_id(), ROW_COUNT_KEY, json!(row_count))
            }
            Stage::Transform => {
                info!(target: "pipeline", "Running {} transformer", self.transformer.name());
                self.transformer.transform().await
            }
            Stage::QualityCheck => {
                let report = QualityGate::new(&self.config).run()?;
                info!(target: "pipeline", "All quality checks passed: {:?}", report.counts);
                Ok(())
            }
        }
    }
}

fn is_retryable(error: &PipelineError) -> bool {
    !matches!(error, PipelineError::NoRowsLoaded)
}
