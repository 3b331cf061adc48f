//! Idempotent upsert of records through a node schema.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use tidemark_core::{resolve, NodeSchema, Record, RelSchema, SyncContext};

use crate::client::GraphError;
use crate::store::{GraphStore, LoadBatch, NodeRow, RelRow};

/// Rows per store statement unless the caller picks another size.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Outcome of one declared relationship during a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelReport {
    /// `(Label)-[:REL]->(Target)` form of the relationship.
    pub rel: String,
    pub linked: usize,
    pub relationships: usize,
    /// Records with a usable matcher that found no target.
    pub unresolved: usize,
    /// Records whose matcher resolved to null (or an empty list).
    pub no_value: usize,
    /// No node of the target label existed when the load ran.
    pub target_label_unknown: bool,
}

/// Outcome of one `load` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub label: String,
    pub records: usize,
    pub nodes_written: usize,
    /// Ids that appeared more than once with differing content.
    pub duplicate_ids: usize,
    pub rels: Vec<RelReport>,
}

impl LoadReport {
    pub fn unresolved(&self) -> usize {
        self.rels.iter().map(|r| r.unresolved).sum()
    }
}

/// Upsert `records` as nodes of `schema`, then wire every declared
/// relationship to existing targets. The whole call is one store transaction.
pub async fn load<S: GraphStore + ?Sized>(
    store: &S,
    schema: &NodeSchema,
    records: &[Record],
    ctx: &SyncContext,
) -> Result<LoadReport, GraphError> {
    load_batched(store, schema, records, ctx, DEFAULT_BATCH_SIZE).await
}

/// [`load`] with an explicit statement chunk size.
pub async fn load_batched<S: GraphStore + ?Sized>(
    store: &S,
    schema: &NodeSchema,
    records: &[Record],
    ctx: &SyncContext,
    batch_size: usize,
) -> Result<LoadReport, GraphError> {
    schema.validate()?;

    let mut report = LoadReport {
        label: schema.label.clone(),
        records: records.len(),
        ..Default::default()
    };

    let (rows, duplicates) = resolve_rows(schema, records, ctx)?;
    report.duplicate_ids = duplicates;

    if rows.is_empty() {
        tracing::debug!(label = %schema.label, "No records to load");
        report.rels = schema
            .relationships()
            .map(|rel| RelReport {
                rel: rel.describe(&schema.label),
                ..Default::default()
            })
            .collect();
        return Ok(report);
    }

    store.ensure_indexes(schema).await?;

    let batch = LoadBatch {
        schema,
        rows,
        now_millis: Utc::now().timestamp_millis(),
        chunk_size: batch_size.max(1),
    };
    let outcome = store.write_batch(&batch).await?;
    report.nodes_written = outcome.nodes_written;

    for (index, (rel, write)) in schema.relationships().zip(outcome.rels).enumerate() {
        let candidates = batch.rel_rows(index).count();
        let rel_report = RelReport {
            rel: rel.describe(&schema.label),
            linked: write.linked,
            relationships: write.relationships,
            unresolved: candidates.saturating_sub(write.linked),
            no_value: batch.rows.len() - candidates,
            target_label_unknown: !write.target_label_present,
        };

        if rel_report.target_label_unknown && candidates > 0 {
            tracing::warn!(
                label = %schema.label,
                rel = %rel_report.rel,
                target = %rel.target_label,
                "No node of the target label exists; relationship left unresolved"
            );
        } else if rel_report.unresolved > 0 {
            tracing::debug!(
                label = %schema.label,
                rel = %rel_report.rel,
                unresolved = rel_report.unresolved,
                "Some records found no relationship target"
            );
        }
        report.rels.push(rel_report);
    }

    tracing::info!(
        label = %schema.label,
        update_tag = ctx.update_tag(),
        records = report.records,
        nodes = report.nodes_written,
        duplicates = report.duplicate_ids,
        unresolved = report.unresolved(),
        "Loaded records"
    );
    Ok(report)
}

/// Resolve every record into a store row. Later duplicates replace earlier
/// ones in place; returns the rows and the number of conflicting duplicates.
fn resolve_rows(
    schema: &NodeSchema,
    records: &[Record],
    ctx: &SyncContext,
) -> Result<(Vec<NodeRow>, usize), GraphError> {
    let mut rows: Vec<NodeRow> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut duplicates = 0;

    for (index, record) in records.iter().enumerate() {
        let row = resolve_row(schema, record, ctx, index)?;
        let key = row.id.to_string();
        match positions.get(&key) {
            Some(&pos) => {
                if rows[pos] != row {
                    duplicates += 1;
                    tracing::warn!(
                        label = %schema.label,
                        id = %row.id,
                        "Duplicate id in one load; the later record wins"
                    );
                }
                rows[pos] = row;
            }
            None => {
                positions.insert(key, rows.len());
                rows.push(row);
            }
        }
    }
    Ok((rows, duplicates))
}

fn resolve_row(
    schema: &NodeSchema,
    record: &Record,
    ctx: &SyncContext,
    index: usize,
) -> Result<NodeRow, GraphError> {
    let id = resolve(&schema.id, record, ctx)?;
    if id.is_null() {
        return Err(GraphError::InvalidRecord {
            label: schema.label.clone(),
            reason: format!("record {index} has no value for id ({})", schema.id.name),
        });
    }

    let properties = resolve_props(&schema.properties, record, ctx)?;
    let rels = schema
        .relationships()
        .map(|rel| resolve_rel(rel, record, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NodeRow {
        id,
        properties,
        rels,
    })
}

fn resolve_props(
    props: &[(String, tidemark_core::PropertyRef)],
    record: &Record,
    ctx: &SyncContext,
) -> Result<Record, GraphError> {
    let mut out = Record::new();
    for (name, prop) in props {
        out.insert(name.clone(), resolve(prop, record, ctx)?);
    }
    Ok(out)
}

/// `None` when any matcher value is null or a one-to-many list is empty.
fn resolve_rel(
    rel: &RelSchema,
    record: &Record,
    ctx: &SyncContext,
) -> Result<Option<RelRow>, GraphError> {
    let mut matcher = Vec::with_capacity(rel.matcher.pairs.len());
    for (_, prop) in &rel.matcher.pairs {
        let value = match resolve(prop, record, ctx)? {
            Value::Null => return Ok(None),
            Value::Array(items) if prop.one_to_many => {
                let items: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();
                if items.is_empty() {
                    return Ok(None);
                }
                Value::Array(items)
            }
            scalar if prop.one_to_many => Value::Array(vec![scalar]),
            value => value,
        };
        matcher.push(value);
    }

    Ok(Some(RelRow {
        matcher,
        properties: resolve_props(&rel.properties, record, ctx)?,
    }))
}
