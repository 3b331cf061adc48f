//! Reads provider snapshots saved as JSON files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;

/// A directory of `{name}.json` snapshot documents.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Read `{name}.json` and return the array stored under `key`, or the
    /// whole document when it is already an array.
    pub async fn read_list(&self, name: &str, key: &str) -> anyhow::Result<Vec<Value>> {
        let path = self.path_for(name);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;

        match doc {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove(key) {
                Some(Value::Array(items)) => Ok(items),
                Some(other) => anyhow::bail!(
                    "snapshot {}: {key} is not a list (found {})",
                    path.display(),
                    type_name(&other)
                ),
                None => Ok(Vec::new()),
            },
            other => anyhow::bail!(
                "snapshot {} must be a list or an object, found {}",
                path.display(),
                type_name(&other)
            ),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_keyed_and_bare_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keyed.json"), json!({"Items": [1, 2]}).to_string()).unwrap();
        std::fs::write(dir.path().join("bare.json"), json!([3]).to_string()).unwrap();
        std::fs::write(dir.path().join("empty.json"), json!({}).to_string()).unwrap();

        let snapshots = SnapshotDir::new(dir.path());
        assert_eq!(snapshots.read_list("keyed", "Items").await.unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(snapshots.read_list("bare", "Items").await.unwrap(), vec![json!(3)]);
        assert!(snapshots.read_list("empty", "Items").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_or_malformed_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("scalar.json"), "42").unwrap();

        let snapshots = SnapshotDir::new(dir.path());
        let err = snapshots.read_list("absent", "Items").await.unwrap_err();
        assert!(format!("{err:#}").contains("reading snapshot"));
        assert!(snapshots.read_list("bad", "Items").await.is_err());
        assert!(snapshots.read_list("scalar", "Items").await.is_err());
    }
}
