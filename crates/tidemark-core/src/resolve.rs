//! Resolution of property references against records and the sync context.

use serde_json::Value;

use crate::context::SyncContext;
use crate::error::TidemarkError;
use crate::schema::PropertyRef;
use crate::Record;

/// Resolve a property reference to its value.
///
/// Injected refs read from the context and fail when the key is missing.
/// Record refs read the named field; an absent field resolves to `Null`,
/// since heterogeneous records (optional ports, optional names) are normal.
pub fn resolve(
    prop: &PropertyRef,
    record: &Record,
    ctx: &SyncContext,
) -> Result<Value, TidemarkError> {
    if prop.injected {
        return resolve_injected(prop, ctx);
    }
    Ok(record.get(&prop.name).cloned().unwrap_or(Value::Null))
}

/// Resolve a ref that must be injected (scope matchers during cleanup).
pub fn resolve_injected(prop: &PropertyRef, ctx: &SyncContext) -> Result<Value, TidemarkError> {
    ctx.get(&prop.name)
        .cloned()
        .ok_or_else(|| TidemarkError::MissingInjectedValue {
            name: prop.name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    #[test]
    fn reads_record_field() {
        let r = record(json!({"GroupId": "sg-1", "FromPort": 443}));
        let ctx = SyncContext::new(1);
        assert_eq!(
            resolve(&PropertyRef::field("GroupId"), &r, &ctx).unwrap(),
            json!("sg-1")
        );
        assert_eq!(
            resolve(&PropertyRef::field("FromPort"), &r, &ctx).unwrap(),
            json!(443)
        );
    }

    #[test]
    fn absent_field_is_null() {
        let r = record(json!({"GroupId": "sg-1"}));
        let ctx = SyncContext::new(1);
        assert_eq!(
            resolve(&PropertyRef::field("ToPort"), &r, &ctx).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn injected_reads_context() {
        let r = Record::new();
        let ctx = SyncContext::new(9).with("AWS_ID", "acct1");
        assert_eq!(
            resolve(&PropertyRef::injected("AWS_ID"), &r, &ctx).unwrap(),
            json!("acct1")
        );
        assert_eq!(
            resolve(&PropertyRef::update_tag(), &r, &ctx).unwrap(),
            json!(9)
        );
    }

    #[test]
    fn injected_ignores_same_named_record_field() {
        let r = record(json!({"AWS_ID": "from-record"}));
        let ctx = SyncContext::new(1).with("AWS_ID", "from-context");
        assert_eq!(
            resolve(&PropertyRef::injected("AWS_ID"), &r, &ctx).unwrap(),
            json!("from-context")
        );
    }

    #[test]
    fn missing_injected_value_fails() {
        let r = Record::new();
        let ctx = SyncContext::new(1);
        let err = resolve(&PropertyRef::injected("AWS_ID"), &r, &ctx).unwrap_err();
        assert!(matches!(
            err,
            TidemarkError::MissingInjectedValue { ref name } if name == "AWS_ID"
        ));
    }
}
