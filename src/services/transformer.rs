use crate::config::Config;
use crate::errors::{PipelineError, Result};
use async_trait::async_trait;
use log::info;
use std::env;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The SQL-modelling step that builds staging and mart tables from the raw table
#[async_trait]
pub trait Transformer {
    fn name(&self) -> &'static str;

    async fn transform(&self) -> Result<()>;
}

/// Runs `dbt run` then `dbt test` in the dbt project directory
pub struct DbtTransformer {
    executable: String,
    project_dir: PathBuf,
    db_path: PathBuf,
}

impl DbtTransformer {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: "dbt".to_string(),
            project_dir: config.dbt_project_dir.clone(),
            db_path: config.db_path.clone(),
        }
    }

    pub fn with_executable(mut self, executable: &str) -> Self {
        self.executable = executable.to_string();
        self
    }

    /// dbt runs inside the project directory, so a relative warehouse path
    /// has to be resolved against ours first.
    fn absolute_db_path(&self) -> Result<PathBuf> {
        if self.db_path.is_absolute() {
            Ok(self.db_path.clone())
        } else {
            Ok(env::current_dir()?.join(&self.db_path))
        }
    }

    async fn run_step(&self, step: &str, db_path: &Path) -> Result<()> {
        let command = format!("{} {} --profiles-dir .", self.executable, step);
        info!(target: "transformer", "Running `{}` in {}", command, self.project_dir.display());

        let status = Command::new(&self.executable)
            .args([step, "--profiles-dir", "."])
            .current_dir(&self.project_dir)
            .env("DB_PATH", db_path)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::TransformFailed {
                command,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for DbtTransformer {
    fn name(&self) -> &'static str {
        "dbt"
    }

    async fn transform(&self) -> Result<()> {
        let db_path = self.absolute_db_path()?;
        self.run_step("run", &db_path).await?;
        self.run_step("test", &db_path).await?;
        info!(target: "transformer", "dbt models built and tested");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn fake_dbt(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-dbt");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn transformer(root: &Path, executable: &Path) -> DbtTransformer {
        let project = root.join("dbt_project");
        std::fs::create_dir_all(&project).expect("mkdir");
        DbtTransformer::new(
            &Config::new()
                .with_dbt_project_dir(project)
                .with_db_path(root.join("wh.duckdb")),
        )
        .with_executable(executable.to_str().expect("utf-8 path"))
    }

    #[tokio::test]
    async fn runs_models_then_tests_in_project_dir() {
        let temp = tempdir().expect("tempdir");
        let log = temp.path().join("calls.log");
        let script = fake_dbt(
            temp.path(),
            &format!("echo \"$1 $(basename \"$PWD\") $DB_PATH\" >> {}", log.display()),
        );

        transformer(temp.path(), &script).transform().await.expect("transform");

        let calls = std::fs::read_to_string(&log).expect("log");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("run dbt_project "));
        assert!(lines[1].starts_with("test dbt_project "));
        assert!(lines[0].ends_with("wh.duckdb"));
    }

    #[tokio::test]
    async fn failing_step_stops_the_transform() {
        let temp = tempdir().expect("tempdir");
        let script = fake_dbt(temp.path(), "exit 3");

        let error = transformer(temp.path(), &script).transform().await.expect_err("should fail");

        match error {
            PipelineError::TransformFailed { command, .. } => assert!(command.ends_with("run --profiles-dir .")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
