//! The graph store seam.
//!
//! `load` and `cleanup` resolve records and scopes against a schema, then hand
//! fully-resolved batches to a [`GraphStore`]. Each store call is one
//! transaction: it either commits completely or leaves the graph untouched.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use tidemark_core::{Direction, NodeSchema, Record};

use crate::client::GraphError;

/// One node ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub id: Value,
    /// Resolved domain properties, including `lastupdated`. Null values clear
    /// the property.
    pub properties: Record,
    /// One slot per entry of `schema.relationships()`; `None` when a matcher
    /// value resolved to null and the relationship cannot be formed.
    pub rels: Vec<Option<RelRow>>,
}

/// A resolved relationship for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct RelRow {
    /// One value per matcher pair. A one-to-many value is always a list.
    pub matcher: Vec<Value>,
    pub properties: Record,
}

/// Everything the store needs to upsert one schema's records.
#[derive(Debug)]
pub struct LoadBatch<'a> {
    pub schema: &'a NodeSchema,
    pub rows: Vec<NodeRow>,
    /// Creation timestamp written as `firstseen` on new entities.
    pub now_millis: i64,
    /// Rows per statement; all chunks share one transaction.
    pub chunk_size: usize,
}

impl LoadBatch<'_> {
    /// Rows that carry a usable matcher for relationship `index`.
    pub fn rel_rows(&self, index: usize) -> impl Iterator<Item = (&Value, &RelRow)> {
        self.rows
            .iter()
            .filter_map(move |row| row.rels.get(index)?.as_ref().map(|rel| (&row.id, rel)))
    }
}

/// What the store did for one declared relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelWrite {
    /// Source nodes that found at least one target.
    pub linked: usize,
    /// Relationships merged (one-to-many matchers can produce several per node).
    pub relationships: usize,
    /// Whether any node of the target label existed at write time.
    pub target_label_present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub nodes_written: usize,
    /// Aligned with `schema.relationships()`.
    pub rels: Vec<RelWrite>,
}

/// A validated, scoped cleanup request.
#[derive(Debug)]
pub struct CleanupPlan<'a> {
    pub schema: &'a NodeSchema,
    /// Resolved `(target property, value)` pairs of the sub-resource matcher.
    pub scope: Vec<(String, Value)>,
    pub update_tag: i64,
    /// Upper bound of entities deleted per statement.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub nodes_deleted: usize,
    pub rels_deleted: usize,
}

/// A node as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub labels: Vec<String>,
    pub properties: Record,
}

impl NodeRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A neighbor result: the connecting relationship's properties + the node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub relationship: Record,
    pub node: NodeRecord,
}

/// Storage backend for schema-driven loads and scoped cleanups.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create any missing indexes the schema asks for.
    async fn ensure_indexes(&self, schema: &NodeSchema) -> Result<(), GraphError>;

    /// Upsert every node of the batch, then every declared relationship.
    async fn write_batch(&self, batch: &LoadBatch<'_>) -> Result<WriteOutcome, GraphError>;

    /// Delete stale relationships and nodes inside the plan's scope.
    async fn delete_stale(&self, plan: &CleanupPlan<'_>) -> Result<DeleteOutcome, GraphError>;

    /// Look a node up by label and `id`.
    async fn node(&self, label: &str, id: &Value) -> Result<Option<NodeRecord>, GraphError>;

    async fn count_nodes(&self, label: &str) -> Result<usize, GraphError>;

    /// Nodes of `target_label` connected to `(label {id})` through `rel_label`
    /// in the given direction, relative to the source node.
    async fn related(
        &self,
        label: &str,
        id: &Value,
        rel_label: &str,
        direction: Direction,
        target_label: &str,
    ) -> Result<Vec<Neighbor>, GraphError>;
}
