//! Scoped removal of entities the latest sync did not touch.

use serde::Serialize;
use serde_json::Value;

use tidemark_core::resolve::resolve_injected;
use tidemark_core::{NodeSchema, SyncContext, TidemarkError};

use crate::client::GraphError;
use crate::load::DEFAULT_BATCH_SIZE;
use crate::store::{CleanupPlan, GraphStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub label: String,
    pub nodes_deleted: usize,
    pub rels_deleted: usize,
}

/// Delete every in-scope node and relationship of `schema` whose
/// `lastupdated` differs from the context's tag.
///
/// The scope is the node reached through the schema's sub-resource
/// relationship using injected values only. Schemas without a sub-resource
/// relationship, or contexts lacking a usable scope value, are rejected with
/// [`TidemarkError::ScopeMismatch`] before the store is touched.
pub async fn cleanup<S: GraphStore + ?Sized>(
    store: &S,
    schema: &NodeSchema,
    ctx: &SyncContext,
) -> Result<CleanupReport, GraphError> {
    cleanup_batched(store, schema, ctx, DEFAULT_BATCH_SIZE).await
}

/// [`cleanup`] with an explicit per-statement delete bound.
pub async fn cleanup_batched<S: GraphStore + ?Sized>(
    store: &S,
    schema: &NodeSchema,
    ctx: &SyncContext,
    batch_size: usize,
) -> Result<CleanupReport, GraphError> {
    schema.validate()?;
    let plan = CleanupPlan {
        schema,
        scope: resolve_scope(schema, ctx)?,
        update_tag: ctx.update_tag(),
        chunk_size: batch_size.max(1),
    };

    let outcome = store.delete_stale(&plan).await?;

    tracing::info!(
        label = %schema.label,
        scope = ?plan.scope,
        update_tag = plan.update_tag,
        nodes_deleted = outcome.nodes_deleted,
        rels_deleted = outcome.rels_deleted,
        "Cleaned up stale entities"
    );
    Ok(CleanupReport {
        label: schema.label.clone(),
        nodes_deleted: outcome.nodes_deleted,
        rels_deleted: outcome.rels_deleted,
    })
}

/// Resolve the sub-resource matcher into `(target property, value)` pairs.
fn resolve_scope(
    schema: &NodeSchema,
    ctx: &SyncContext,
) -> Result<Vec<(String, Value)>, TidemarkError> {
    let mismatch = |reason: String| TidemarkError::ScopeMismatch {
        label: schema.label.clone(),
        reason,
    };

    let sub = schema
        .sub_resource_rel
        .as_ref()
        .ok_or_else(|| mismatch("schema has no sub-resource relationship".to_string()))?;

    let mut scope = Vec::with_capacity(sub.matcher.pairs.len());
    for (target_prop, prop) in &sub.matcher.pairs {
        let value = resolve_injected(prop, ctx).map_err(|_| {
            mismatch(format!("no injected value for {}", prop.name))
        })?;
        let usable = match &value {
            Value::String(s) => !s.trim().is_empty(),
            Value::Number(_) | Value::Bool(_) => true,
            Value::Null | Value::Array(_) | Value::Object(_) => false,
        };
        if !usable {
            return Err(mismatch(format!(
                "injected value for {} is empty or not a scalar: {value}",
                prop.name
            )));
        }
        scope.push((target_prop.clone(), value));
    }
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_core::{Direction, PropertyRef, RelSchema};

    fn schema() -> NodeSchema {
        NodeSchema::new("EC2SecurityGroup", PropertyRef::field("GroupId")).sub_resource(
            RelSchema::new("AWSAccount", "RESOURCE", Direction::Inward)
                .matching("id", PropertyRef::injected("AWS_ID")),
        )
    }

    #[test]
    fn scope_resolves_from_context() {
        let ctx = SyncContext::new(1).with("AWS_ID", "acct1");
        let scope = resolve_scope(&schema(), &ctx).unwrap();
        assert_eq!(scope, vec![("id".to_string(), json!("acct1"))]);
    }

    #[test]
    fn missing_or_blank_scope_is_a_mismatch() {
        for ctx in [
            SyncContext::new(1),
            SyncContext::new(1).with("AWS_ID", ""),
            SyncContext::new(1).with("AWS_ID", Value::Null),
            SyncContext::new(1).with("AWS_ID", json!(["a", "b"])),
        ] {
            let err = resolve_scope(&schema(), &ctx).unwrap_err();
            assert!(matches!(err, TidemarkError::ScopeMismatch { .. }), "{ctx:?}");
        }
    }

    #[test]
    fn root_schema_cannot_be_cleaned() {
        let root = NodeSchema::new("AWSAccount", PropertyRef::injected("AWS_ID"));
        let ctx = SyncContext::new(1).with("AWS_ID", "acct1");
        let err = resolve_scope(&root, &ctx).unwrap_err();
        assert!(err.to_string().contains("no sub-resource"));
    }
}
