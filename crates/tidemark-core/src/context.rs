//! Explicit per-call context: the sync tag plus caller-supplied constants.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::UPDATE_TAG;

/// Values injected once per load or cleanup call.
///
/// Carries the sync tag under [`UPDATE_TAG`] and any scope identifiers
/// (account id, region, tenant id) a schema's injected property refs name.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncContext {
    update_tag: i64,
    values: BTreeMap<String, Value>,
}

impl SyncContext {
    pub fn new(update_tag: i64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(UPDATE_TAG.to_string(), Value::from(update_tag));
        Self { update_tag, values }
    }

    /// Add or replace an injected value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == UPDATE_TAG {
            tracing::warn!("Ignoring attempt to override {UPDATE_TAG} through insert");
            return;
        }
        self.values.insert(key, value.into());
    }

    pub fn update_tag(&self) -> i64 {
        self.update_tag
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Every injected value except the sync tag, for logging and journaling.
    pub fn constants(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter(|(k, _)| k.as_str() != UPDATE_TAG)
            .map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_injected() {
        let ctx = SyncContext::new(42).with("AWS_ID", "acct1");
        assert_eq!(ctx.update_tag(), 42);
        assert_eq!(ctx.get(UPDATE_TAG), Some(&Value::from(42)));
        assert_eq!(ctx.get("AWS_ID"), Some(&Value::from("acct1")));
        assert_eq!(ctx.get("Region"), None);
    }

    #[test]
    fn tag_cannot_be_overridden() {
        let ctx = SyncContext::new(7).with(UPDATE_TAG, 8);
        assert_eq!(ctx.get(UPDATE_TAG), Some(&Value::from(7)));
    }

    #[test]
    fn constants_exclude_tag() {
        let ctx = SyncContext::new(1).with("AWS_ID", "a").with("Region", "us-east-1");
        let keys: Vec<_> = ctx.constants().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["AWS_ID", "Region"]);
    }
}
