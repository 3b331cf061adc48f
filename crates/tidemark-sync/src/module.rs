//! The contract between the orchestrator and a resource module.
//!
//! A module knows how to fetch raw snapshots for a scope, how to flatten them
//! into records per schema, and which schemas it writes. The orchestrator
//! does everything else.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use tidemark_core::{NodeSchema, Record, SyncContext};

/// One unit of fetching and loading, such as an account/region pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scope {
    /// Stable identity used for locking, logging, and the journal.
    pub id: String,
    /// Injected values every load and cleanup in this scope sees.
    pub values: BTreeMap<String, Value>,
}

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The run's context extended with this scope's injected values.
    pub fn context(&self, base: &SyncContext) -> SyncContext {
        let mut ctx = base.clone();
        for (key, value) in &self.values {
            ctx.insert(key.clone(), value.clone());
        }
        ctx
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Transform output: records grouped by the label of the schema they feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    batches: HashMap<String, Vec<Record>>,
}

impl Transformed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, records: Vec<Record>) {
        self.batches.entry(label.into()).or_default().extend(records);
    }

    pub fn with(mut self, label: impl Into<String>, records: Vec<Record>) -> Self {
        self.insert(label, records);
        self
    }

    /// Records for a label; empty when the transform produced none.
    pub fn records(&self, label: &str) -> &[Record] {
        self.batches.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }
}

#[async_trait]
pub trait ResourceModule: Send + Sync {
    /// Short name used in logs, locks, and the journal (e.g. `ec2`).
    fn name(&self) -> &str;

    /// Schemas in load order: parents before the children that link to them.
    fn schemas(&self) -> &[NodeSchema];

    /// Schemas in cleanup order. Defaults to reverse load order, skipping
    /// schemas without a sub-resource relationship.
    fn cleanup_order(&self) -> Vec<&NodeSchema> {
        self.schemas()
            .iter()
            .rev()
            .filter(|s| s.sub_resource_rel.is_some())
            .collect()
    }

    /// Scopes to clean up after the given scopes loaded. Defaults to the
    /// loaded scopes themselves; modules whose cleanup boundary is coarser
    /// than their fetch unit collapse them here.
    fn cleanup_scopes(&self, loaded: &[Scope]) -> Vec<Scope> {
        loaded.to_vec()
    }

    /// Pull raw snapshot documents for one scope.
    async fn fetch(&self, scope: &Scope) -> anyhow::Result<Vec<Value>>;

    /// Flatten raw documents into records per schema label.
    fn transform(&self, scope: &Scope, raw: Vec<Value>) -> anyhow::Result<Transformed>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_context_adds_values_and_keeps_tag() {
        let scope = Scope::new("acct/us-east-1")
            .with("AWS_ID", "acct")
            .with("Region", "us-east-1");
        let ctx = scope.context(&SyncContext::new(9));
        assert_eq!(ctx.update_tag(), 9);
        assert_eq!(ctx.get("AWS_ID"), Some(&json!("acct")));
        assert_eq!(ctx.get("Region"), Some(&json!("us-east-1")));
        assert_eq!(scope.to_string(), "acct/us-east-1");
    }

    #[test]
    fn transformed_groups_by_label() {
        let mut out = Transformed::new().with("A", vec![Record::new()]);
        out.insert("A", vec![Record::new()]);
        out.insert("B", vec![Record::new()]);
        assert_eq!(out.records("A").len(), 2);
        assert!(out.records("C").is_empty());
        assert_eq!(out.total(), 3);
    }
}
