//! In-memory property graph implementing [`GraphStore`].
//!
//! Mirrors the semantics of the generated Cypher: MERGE on `(label, id)`,
//! `+=` property maps where null clears a property, relationships merged on
//! `(start, type, end)`, and stamp comparison with `<>` (a missing stamp is
//! never stale). Used by tests and `--dry-run` syncs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use tidemark_core::schema::{IndexSpec, FIRSTSEEN, ID, LASTUPDATED};
use tidemark_core::{Direction, NodeSchema, Record, RelSchema};

use crate::client::GraphError;
use crate::store::{
    CleanupPlan, DeleteOutcome, GraphStore, LoadBatch, Neighbor, NodeRecord, RelWrite,
    WriteOutcome,
};

type NodeKey = u64;

#[derive(Debug, Clone)]
struct StoredNode {
    labels: BTreeSet<String>,
    props: Record,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RelKey {
    start: NodeKey,
    rel_type: String,
    end: NodeKey,
}

#[derive(Debug, Default, Clone)]
struct GraphState {
    next_key: NodeKey,
    nodes: BTreeMap<NodeKey, StoredNode>,
    rels: BTreeMap<RelKey, Record>,
    indexes: BTreeSet<IndexSpec>,
}

/// Thread-safe in-memory graph.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
    failures: AtomicUsize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write or delete calls fail with a transaction failure
    /// without touching the graph.
    pub fn fail_next_calls(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Total number of nodes across all labels.
    pub async fn node_total(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    /// Total number of relationships across all types.
    pub async fn rel_total(&self) -> usize {
        self.state.read().await.rels.len()
    }

    /// Indexes requested so far.
    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.state.read().await.indexes.iter().cloned().collect()
    }

    /// Insert a node directly, bypassing schemas (scope roots in tests, fixtures).
    pub async fn insert_node(&self, labels: &[&str], props: Record) {
        let mut state = self.state.write().await;
        let key = state.allocate();
        state.nodes.insert(
            key,
            StoredNode {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                props,
            },
        );
    }

    fn take_failure(&self) -> Result<(), GraphError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(GraphError::TransactionFailure(
                "injected failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }
}

impl GraphState {
    fn allocate(&mut self) -> NodeKey {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn find(&self, label: &str, props: &[(&str, &Value)]) -> Vec<NodeKey> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(label))
            .filter(|(_, n)| {
                props
                    .iter()
                    .all(|(k, v)| !v.is_null() && n.props.get(*k) == Some(*v))
            })
            .map(|(k, _)| *k)
            .collect()
    }

    fn has_label(&self, label: &str) -> bool {
        self.nodes.values().any(|n| n.labels.contains(label))
    }

    /// MERGE `(label {id})`, returning the node key.
    fn merge_node(&mut self, schema: &NodeSchema, id: &Value, props: &Record, now: i64) -> NodeKey {
        let key = match self.find(&schema.label, &[(ID, id)]).first() {
            Some(key) => *key,
            None => {
                let key = self.allocate();
                let mut created = Record::new();
                created.insert(ID.to_string(), id.clone());
                created.insert(FIRSTSEEN.to_string(), Value::from(now));
                self.nodes.insert(
                    key,
                    StoredNode {
                        labels: BTreeSet::from([schema.label.clone()]),
                        props: created,
                    },
                );
                key
            }
        };

        if let Some(node) = self.nodes.get_mut(&key) {
            apply_props(&mut node.props, props);
            node.labels.extend(schema.extra_labels.iter().cloned());
        }
        key
    }

    fn merge_rel(&mut self, key: RelKey, props: &Record, now: i64) {
        let entry = self.rels.entry(key).or_insert_with(|| {
            let mut created = Record::new();
            created.insert(FIRSTSEEN.to_string(), Value::from(now));
            created
        });
        apply_props(entry, props);
    }

    /// Nodes of the schema's label attached to the scope node(s).
    fn in_scope(&self, schema: &NodeSchema, sub: &RelSchema, scope: &[(String, Value)]) -> Vec<NodeKey> {
        let conditions: Vec<(&str, &Value)> =
            scope.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let roots: BTreeSet<NodeKey> = self.find(&sub.target_label, &conditions).into_iter().collect();

        let mut members: Vec<NodeKey> = self
            .find(&schema.label, &[])
            .into_iter()
            .filter(|n| {
                roots
                    .iter()
                    .any(|root| self.rels.contains_key(&rel_key(*n, sub.direction, &sub.rel_label, *root)))
            })
            .collect();
        members.dedup();
        members
    }

    fn detach_delete(&mut self, key: NodeKey) -> usize {
        let before = self.rels.len();
        self.rels.retain(|k, _| k.start != key && k.end != key);
        self.nodes.remove(&key);
        before - self.rels.len()
    }

    fn to_record(&self, key: NodeKey) -> Option<NodeRecord> {
        self.nodes.get(&key).map(|n| NodeRecord {
            labels: n.labels.iter().cloned().collect(),
            properties: n.props.clone(),
        })
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_indexes(&self, schema: &NodeSchema) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        state.indexes.extend(schema.index_specs());
        Ok(())
    }

    async fn write_batch(&self, batch: &LoadBatch<'_>) -> Result<WriteOutcome, GraphError> {
        self.take_failure()?;
        let schema = batch.schema;
        let mut state = self.state.write().await;
        let mut outcome = WriteOutcome::default();

        let mut keys = BTreeMap::new();
        for row in &batch.rows {
            let key = state.merge_node(schema, &row.id, &row.properties, batch.now_millis);
            keys.insert(canonical(&row.id), key);
            outcome.nodes_written += 1;
        }

        for (index, rel) in schema.relationships().enumerate() {
            let mut write = RelWrite {
                target_label_present: state.has_label(&rel.target_label),
                ..Default::default()
            };

            for (id, rel_row) in batch.rel_rows(index) {
                let Some(&source) = keys.get(&canonical(id)) else {
                    continue;
                };
                let targets = match_targets(&state, rel, &rel_row.matcher);
                if !targets.is_empty() {
                    write.linked += 1;
                }
                for target in targets {
                    let key = rel_key(source, rel.direction, &rel.rel_label, target);
                    state.merge_rel(key, &rel_row.properties, batch.now_millis);
                    write.relationships += 1;
                }
            }
            outcome.rels.push(write);
        }

        Ok(outcome)
    }

    async fn delete_stale(&self, plan: &CleanupPlan<'_>) -> Result<DeleteOutcome, GraphError> {
        self.take_failure()?;
        let schema = plan.schema;
        let sub = schema.sub_resource_rel.as_ref().ok_or_else(|| {
            GraphError::Engine(tidemark_core::TidemarkError::ScopeMismatch {
                label: schema.label.clone(),
                reason: "schema has no sub-resource relationship".to_string(),
            })
        })?;
        let tag = Value::from(plan.update_tag);
        let mut state = self.state.write().await;
        let mut outcome = DeleteOutcome::default();

        let members = state.in_scope(schema, sub, &plan.scope);

        // Declared relationships on in-scope nodes.
        for rel in &schema.other_rels {
            let stale: Vec<RelKey> = state
                .rels
                .iter()
                .filter(|(k, props)| k.rel_type == rel.rel_label && is_stale(props, &tag))
                .filter(|(k, _)| {
                    let (own, other) = match rel.direction {
                        Direction::Outward => (k.start, k.end),
                        Direction::Inward => (k.end, k.start),
                    };
                    members.contains(&own)
                        && state
                            .nodes
                            .get(&other)
                            .is_some_and(|n| n.labels.contains(&rel.target_label))
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                state.rels.remove(&key);
                outcome.rels_deleted += 1;
            }
        }

        // Stale nodes, detached.
        let stale_nodes: Vec<NodeKey> = members
            .iter()
            .copied()
            .filter(|k| state.nodes.get(k).is_some_and(|n| is_stale(&n.props, &tag)))
            .collect();
        for key in stale_nodes {
            state.detach_delete(key);
            outcome.nodes_deleted += 1;
        }

        // Stale scope bindings of surviving nodes.
        let survivors = state.in_scope(schema, sub, &plan.scope);
        let conditions: Vec<(&str, &Value)> =
            plan.scope.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let roots = state.find(&sub.target_label, &conditions);
        let stale_bindings: Vec<RelKey> = survivors
            .iter()
            .flat_map(|n| {
                roots
                    .iter()
                    .map(move |root| rel_key(*n, sub.direction, &sub.rel_label, *root))
            })
            .filter(|k| state.rels.get(k).is_some_and(|props| is_stale(props, &tag)))
            .collect();
        for key in stale_bindings {
            state.rels.remove(&key);
            outcome.rels_deleted += 1;
        }

        Ok(outcome)
    }

    async fn node(&self, label: &str, id: &Value) -> Result<Option<NodeRecord>, GraphError> {
        let state = self.state.read().await;
        Ok(state
            .find(label, &[(ID, id)])
            .first()
            .and_then(|k| state.to_record(*k)))
    }

    async fn count_nodes(&self, label: &str) -> Result<usize, GraphError> {
        Ok(self.state.read().await.find(label, &[]).len())
    }

    async fn related(
        &self,
        label: &str,
        id: &Value,
        rel_label: &str,
        direction: Direction,
        target_label: &str,
    ) -> Result<Vec<Neighbor>, GraphError> {
        let state = self.state.read().await;
        let mut results = Vec::new();
        for source in state.find(label, &[(ID, id)]) {
            for target in state.find(target_label, &[]) {
                let key = rel_key(source, direction, rel_label, target);
                if let (Some(props), Some(node)) = (state.rels.get(&key), state.to_record(target)) {
                    results.push(Neighbor {
                        relationship: props.clone(),
                        node,
                    });
                }
            }
        }
        Ok(results)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// `SET x += props`: null removes, anything else overwrites.
fn apply_props(target: &mut Record, props: &Record) {
    for (k, v) in props {
        if v.is_null() {
            target.remove(k);
        } else {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// `x.lastupdated <> $tag`, where a missing stamp compares as null (not stale).
fn is_stale(props: &Record, tag: &Value) -> bool {
    props.get(LASTUPDATED).is_some_and(|v| v != tag)
}

fn rel_key(node: NodeKey, direction: Direction, rel_type: &str, other: NodeKey) -> RelKey {
    let (start, end) = match direction {
        Direction::Outward => (node, other),
        Direction::Inward => (other, node),
    };
    RelKey {
        start,
        rel_type: rel_type.to_string(),
        end,
    }
}

fn canonical(value: &Value) -> String {
    value.to_string()
}

/// Every target whose matcher properties equal the row's values; one-to-many
/// values match any list element.
fn match_targets(state: &GraphState, rel: &RelSchema, values: &[Value]) -> Vec<NodeKey> {
    let mut alternatives: Vec<Vec<(&str, &Value)>> = vec![Vec::new()];
    for ((prop, prop_ref), value) in rel.matcher.pairs.iter().zip(values) {
        match (prop_ref.one_to_many, value) {
            (true, Value::Array(items)) => {
                alternatives = alternatives
                    .into_iter()
                    .flat_map(|alt| {
                        items.iter().map(move |item| {
                            let mut next = alt.clone();
                            next.push((prop.as_str(), item));
                            next
                        })
                    })
                    .collect();
            }
            _ => {
                for alt in alternatives.iter_mut() {
                    alt.push((prop.as_str(), value));
                }
            }
        }
    }

    let mut found: Vec<NodeKey> = alternatives
        .iter()
        .flat_map(|conditions| state.find(&rel.target_label, conditions))
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_props_null_clears() {
        let mut target = Record::new();
        target.insert("a".into(), json!(1));
        target.insert("b".into(), json!(2));
        let mut props = Record::new();
        props.insert("a".into(), Value::Null);
        props.insert("c".into(), json!(3));
        apply_props(&mut target, &props);
        assert_eq!(Value::Object(target), json!({"b": 2, "c": 3}));
    }

    #[test]
    fn missing_stamp_is_not_stale() {
        let tag = json!(2);
        assert!(!is_stale(&Record::new(), &tag));
        let mut props = Record::new();
        props.insert(LASTUPDATED.into(), json!(1));
        assert!(is_stale(&props, &tag));
        props.insert(LASTUPDATED.into(), json!(2));
        assert!(!is_stale(&props, &tag));
    }

    #[test]
    fn rel_key_orients_by_direction() {
        let out = rel_key(1, Direction::Outward, "R", 2);
        assert_eq!((out.start, out.end), (1, 2));
        let inward = rel_key(1, Direction::Inward, "R", 2);
        assert_eq!((inward.start, inward.end), (2, 1));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let graph = MemoryGraph::new();
        graph.fail_next_calls(1);
        assert!(graph.take_failure().is_err());
        assert!(graph.take_failure().is_ok());
    }
}
