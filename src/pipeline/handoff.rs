use crate::errors::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key-value store for values one task leaves for later tasks.
///
/// Values are grouped by task id. A store opened with [`HandoffStore::open`]
/// rewrites its JSON file on every push.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HandoffStore {
    #[serde(skip)]
    path: Option<PathBuf>,
    values: BTreeMap<String, BTreeMap<String, Value>>,
}

impl HandoffStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store at `path`. A missing file is an empty store, and so
    /// is one that no longer parses; it is overwritten on the next push.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str::<HandoffStore>(&text).unwrap_or_else(|e| {
                warn!(target: "pipeline", "Ignoring unreadable state file {}: {}", path.display(), e);
                HandoffStore::default()
            })
        } else {
            HandoffStore::default()
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn push(&mut self, task_id: &str, key: &str, value: Value) -> Result<()> {
        self.values
            .entry(task_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist()
    }

    pub fn pull(&self, task_id: &str, key: &str) -> Option<&Value> {
        self.values.get(task_id).and_then(|task| task.get(key))
    }

    /// A pushed list of paths, if `key` holds one.
    pub fn pull_paths(&self, task_id: &str, key: &str) -> Option<Vec<PathBuf>> {
        let items = self.pull(task_id, key)?.as_array()?;
        items
            .iter()
            .map(|item| item.as_str().map(PathBuf::from))
            .collect()
    }

    /// Forgets everything from the previous run.
    pub fn clear(&mut self) -> Result<()> {
        self.values.clear();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn pushed_values_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state").join("pipeline_state.json");

        let mut store = HandoffStore::open(&path).expect("open");
        store
            .push("fetch_data", "parquet_files", json!(["a.parquet", "b.parquet"]))
            .expect("push");

        let reopened = HandoffStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.pull_paths("fetch_data", "parquet_files"),
            Some(vec![PathBuf::from("a.parquet"), PathBuf::from("b.parquet")])
        );
        assert!(reopened.pull("load_to_duckdb", "row_count").is_none());
    }

    #[test]
    fn non_path_values_are_not_paths() {
        let mut store = HandoffStore::in_memory();
        store.push("load_to_duckdb", "row_count", json!(3)).expect("push");
        store.push("fetch_data", "parquet_files", json!([1, 2])).expect("push");

        assert_eq!(store.pull("load_to_duckdb", "row_count"), Some(&json!(3)));
        assert_eq!(store.pull_paths("load_to_duckdb", "row_count"), None);
        assert_eq!(store.pull_paths("fetch_data", "parquet_files"), None);
    }

    #[test]
    fn truncated_state_file_opens_empty() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("pipeline_state.json");
        fs::write(&path, "{\"values\": {\"fetch_data\": {\"parquet_fi").expect("write");

        let mut store = HandoffStore::open(&path).expect("open");
        assert!(store.pull("fetch_data", "parquet_files").is_none());

        store.push("fetch_data", "parquet_files", json!(["a.parquet"])).expect("push");
        let reopened = HandoffStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.pull_paths("fetch_data", "parquet_files"),
            Some(vec![PathBuf::from("a.parquet")])
        );
    }

    #[test]
    fn clear_forgets_previous_run() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("pipeline_state.json");
        let mut store = HandoffStore::open(&path).expect("open");
        store.push("fetch_data", "parquet_files", json!([])).expect("push");

        store.clear().expect("clear");

        let reopened = HandoffStore::open(&path).expect("reopen");
        assert!(reopened.pull("fetch_data", "parquet_files").is_none());
    }
}
