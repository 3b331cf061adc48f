//! Write operations against Neo4j.
//!
//! All node and relationship writes use UNWIND-batched MERGE statements so
//! re-running a load is idempotent. Every `write_batch` / `delete_stale` call
//! runs inside one transaction and is rolled back on the first failure.

use async_trait::async_trait;
use neo4rs::{query, BoltType, Query, Txn};
use serde_json::Value;

use tidemark_core::{Direction, NodeSchema};

use crate::client::{GraphClient, GraphError};
use crate::cypher;
use crate::store::{
    CleanupPlan, DeleteOutcome, GraphStore, LoadBatch, Neighbor, NodeRecord, RelWrite,
    WriteOutcome,
};

#[async_trait]
impl GraphStore for GraphClient {
    async fn ensure_indexes(&self, schema: &NodeSchema) -> Result<(), GraphError> {
        for spec in schema.index_specs() {
            self.run(query(&cypher::index_statement(&spec))).await?;
        }
        Ok(())
    }

    async fn write_batch(&self, batch: &LoadBatch<'_>) -> Result<WriteOutcome, GraphError> {
        let mut txn = self.start_txn().await?;
        match write_in_txn(&mut txn, batch).await {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback(txn, &batch.schema.label).await;
                Err(e)
            }
        }
    }

    async fn delete_stale(&self, plan: &CleanupPlan<'_>) -> Result<DeleteOutcome, GraphError> {
        let mut txn = self.start_txn().await?;
        match delete_in_txn(&mut txn, plan).await {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback(txn, &plan.schema.label).await;
                Err(e)
            }
        }
    }

    async fn node(&self, label: &str, id: &Value) -> Result<Option<NodeRecord>, GraphError> {
        self.find_node(label, id).await
    }

    async fn count_nodes(&self, label: &str) -> Result<usize, GraphError> {
        self.count_label(label).await
    }

    async fn related(
        &self,
        label: &str,
        id: &Value,
        rel_label: &str,
        direction: Direction,
        target_label: &str,
    ) -> Result<Vec<Neighbor>, GraphError> {
        self.neighbors(label, id, rel_label, direction, target_label)
            .await
    }
}

// ── Load ─────────────────────────────────────────────────────────

async fn write_in_txn(txn: &mut Txn, batch: &LoadBatch<'_>) -> Result<WriteOutcome, GraphError> {
    let schema = batch.schema;
    let chunk_size = batch.chunk_size.max(1);
    let mut outcome = WriteOutcome::default();

    let node_cypher = cypher::node_upsert(schema);
    for chunk in batch.rows.chunks(chunk_size) {
        let mut rows = Vec::with_capacity(chunk.len());
        for row in chunk {
            rows.push(bolt_map([
                ("id", json_to_bolt(&row.id)?),
                ("props", json_to_bolt(&Value::Object(row.properties.clone()))?),
            ]));
        }
        let q = query(&node_cypher)
            .param("rows", BoltType::List(neo4rs::BoltList { value: rows }))
            .param("now", batch.now_millis);
        txn.run(q).await?;
        outcome.nodes_written += chunk.len();
    }

    for (index, rel) in schema.relationships().enumerate() {
        let mut write = RelWrite {
            target_label_present: sum_column(txn, query(&cypher::label_count(&rel.target_label)), "cnt")
                .await?
                > 0,
            ..Default::default()
        };

        let rel_rows: Vec<_> = batch.rel_rows(index).collect();
        if write.target_label_present && !rel_rows.is_empty() {
            let rel_cypher = cypher::rel_upsert(schema, rel);
            for chunk in rel_rows.chunks(chunk_size) {
                let mut rows = Vec::with_capacity(chunk.len());
                for (id, rel_row) in chunk {
                    let mut entries = vec![
                        ("id".to_string(), json_to_bolt(id)?),
                        (
                            "props".to_string(),
                            json_to_bolt(&Value::Object(rel_row.properties.clone()))?,
                        ),
                    ];
                    for (k, value) in rel_row.matcher.iter().enumerate() {
                        entries.push((cypher::matcher_key(k), json_to_bolt(value)?));
                    }
                    rows.push(bolt_map(entries));
                }
                let q = query(&rel_cypher)
                    .param("rows", BoltType::List(neo4rs::BoltList { value: rows }))
                    .param("now", batch.now_millis);

                for row in fetch_rows(txn, q).await? {
                    write.linked += row.get::<i64>("linked").unwrap_or(0) as usize;
                    write.relationships += row.get::<i64>("merged").unwrap_or(0) as usize;
                }
            }
        }

        tracing::debug!(
            label = %schema.label,
            rel = %rel.describe(&schema.label),
            linked = write.linked,
            merged = write.relationships,
            "Relationship batch written"
        );
        outcome.rels.push(write);
    }

    Ok(outcome)
}

// ── Cleanup ──────────────────────────────────────────────────────

async fn delete_in_txn(txn: &mut Txn, plan: &CleanupPlan<'_>) -> Result<DeleteOutcome, GraphError> {
    let schema = plan.schema;
    let sub = schema.sub_resource_rel.as_ref().ok_or_else(|| {
        GraphError::Engine(tidemark_core::TidemarkError::ScopeMismatch {
            label: schema.label.clone(),
            reason: "schema has no sub-resource relationship".to_string(),
        })
    })?;
    let mut outcome = DeleteOutcome::default();

    for rel in &schema.other_rels {
        outcome.rels_deleted +=
            delete_until_done(txn, &cypher::rel_cleanup(schema, sub, rel), plan).await?;
    }
    outcome.nodes_deleted += delete_until_done(txn, &cypher::node_cleanup(schema, sub), plan).await?;
    outcome.rels_deleted +=
        delete_until_done(txn, &cypher::sub_resource_cleanup(schema, sub), plan).await?;

    Ok(outcome)
}

/// Re-run a LIMIT-bounded delete until a statement deletes less than the bound.
async fn delete_until_done(
    txn: &mut Txn,
    cypher: &str,
    plan: &CleanupPlan<'_>,
) -> Result<usize, GraphError> {
    let limit = plan.chunk_size.max(1);
    let mut total = 0;
    loop {
        let mut q = query(cypher)
            .param("update_tag", plan.update_tag)
            .param("limit", limit as i64);
        for (k, (_, value)) in plan.scope.iter().enumerate() {
            q = q.param(&cypher::scope_param(k), json_to_bolt(value)?);
        }

        let deleted = sum_column(txn, q, "deleted").await? as usize;
        total += deleted;
        if deleted < limit {
            return Ok(total);
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

async fn fetch_rows(txn: &mut Txn, q: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
    let mut stream = txn.execute(q).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(row);
    }
    Ok(rows)
}

async fn sum_column(txn: &mut Txn, q: Query, column: &str) -> Result<i64, GraphError> {
    Ok(fetch_rows(txn, q)
        .await?
        .iter()
        .map(|row| row.get::<i64>(column).unwrap_or(0))
        .sum())
}

async fn rollback(txn: Txn, label: &str) {
    if let Err(e) = txn.rollback().await {
        tracing::warn!(label, error = %e, "Rollback failed; server will discard the transaction");
    }
}

fn bolt_map<K: AsRef<str>>(entries: impl IntoIterator<Item = (K, BoltType)>) -> BoltType {
    BoltType::Map(neo4rs::BoltMap {
        value: entries
            .into_iter()
            .map(|(k, v)| (neo4rs::BoltString::new(k.as_ref()), v))
            .collect(),
    })
}

/// Convert a JSON value into a Bolt parameter.
pub(crate) fn json_to_bolt(value: &Value) -> Result<BoltType, GraphError> {
    let bolt = match value {
        Value::Null => BoltType::Null(neo4rs::BoltNull),
        Value::Bool(v) => BoltType::Boolean(neo4rs::BoltBoolean::new(*v)),
        Value::Number(v) => {
            if let Some(i) = v.as_i64() {
                BoltType::Integer(neo4rs::BoltInteger::new(i))
            } else if let Some(f) = v.as_f64() {
                BoltType::Float(neo4rs::BoltFloat::new(f))
            } else {
                return Err(GraphError::Serialization(format!(
                    "Unsupported JSON number: {v}"
                )));
            }
        }
        Value::String(v) => BoltType::String(neo4rs::BoltString::new(v)),
        Value::Array(v) => BoltType::List(neo4rs::BoltList {
            value: v.iter().map(json_to_bolt).collect::<Result<_, _>>()?,
        }),
        Value::Object(v) => BoltType::Map(neo4rs::BoltMap {
            value: v
                .iter()
                .map(|(k, v)| Ok((neo4rs::BoltString::new(k), json_to_bolt(v)?)))
                .collect::<Result<_, GraphError>>()?,
        }),
    };
    Ok(bolt)
}
