//! Read operations against Neo4j.

use neo4rs::query;
use serde_json::Value;

use tidemark_core::schema::{is_identifier, ID};
use tidemark_core::{Direction, Record};

use crate::client::{GraphClient, GraphError};
use crate::cypher;
use crate::mutations::json_to_bolt;
use crate::store::{Neighbor, NodeRecord};

impl GraphClient {
    // ── Single Node Lookups ──────────────────────────────────────

    /// Get a node by label and id.
    pub async fn find_node(&self, label: &str, id: &Value) -> Result<Option<NodeRecord>, GraphError> {
        let label = checked(label)?;
        let cypher = format!(
            "MATCH (n:{label} {{{ID}: $id}})
             RETURN properties(n) AS props, labels(n) AS labels
             LIMIT 1"
        );

        let q = query(&cypher).param("id", json_to_bolt(id)?);

        match self.query_one(q).await? {
            Some(row) => Ok(Some(row_to_record(&row, "props", "labels")?)),
            None => Ok(None),
        }
    }

    /// Count nodes of a given label.
    pub async fn count_label(&self, label: &str) -> Result<usize, GraphError> {
        let q = query(&cypher::label_count(checked(label)?));

        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0) as usize),
            None => Ok(0),
        }
    }

    // ── Neighbor Queries ─────────────────────────────────────────

    /// Nodes reachable from `(label {id})` over one relationship type.
    pub async fn neighbors(
        &self,
        label: &str,
        id: &Value,
        rel_label: &str,
        direction: Direction,
        target_label: &str,
    ) -> Result<Vec<Neighbor>, GraphError> {
        let cypher = format!(
            "MATCH (n:{label} {{{ID}: $id}}){pattern}(t:{target})
             RETURN properties(r) AS rel, properties(t) AS props, labels(t) AS labels",
            label = checked(label)?,
            pattern = cypher::arrow(direction, "r", checked(rel_label)?),
            target = checked(target_label)?,
        );

        let q = query(&cypher).param("id", json_to_bolt(id)?);

        let rows = self.query_rows(q).await?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let relationship = match row.get::<Value>("rel") {
                Ok(Value::Object(map)) => map,
                Ok(_) => Record::new(),
                Err(e) => {
                    return Err(GraphError::Serialization(format!(
                        "Failed to deserialize relationship: {e}"
                    )))
                }
            };
            results.push(Neighbor {
                relationship,
                node: row_to_record(&row, "props", "labels")?,
            });
        }
        Ok(results)
    }
}

fn checked(name: &str) -> Result<&str, GraphError> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(GraphError::InvalidIdentifier(name.to_string()))
    }
}

/// Convert a `properties(n)` / `labels(n)` row pair into a NodeRecord.
fn row_to_record(row: &neo4rs::Row, props: &str, labels: &str) -> Result<NodeRecord, GraphError> {
    let properties = match row.get::<Value>(props) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(GraphError::Serialization(format!(
                "Expected property map, got {other}"
            )))
        }
        Err(e) => {
            return Err(GraphError::Serialization(format!(
                "Failed to deserialize node: {e}"
            )))
        }
    };
    let labels: Vec<String> = row.get(labels).unwrap_or_default();
    Ok(NodeRecord { labels, properties })
}
