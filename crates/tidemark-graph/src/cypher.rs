//! Cypher generation for schema-driven loads and cleanups.
//!
//! Labels and property names are interpolated (they are validated as plain
//! identifiers by `NodeSchema::validate`); every value travels as a parameter.
//!
//! Parameters used by the generated statements:
//! - `$rows`: list of row maps (`id`, `props`, `m0..mN`)
//! - `$now`: creation timestamp for `firstseen`
//! - `$update_tag`: current sync tag
//! - `$limit`: per-statement delete bound
//! - `$scope_0..$scope_N`: sub-resource matcher values

use tidemark_core::schema::{IndexSpec, FIRSTSEEN, ID, LASTUPDATED};
use tidemark_core::{Direction, NodeSchema, RelSchema};

/// Parameter name for matcher value `index` inside a row map.
pub fn matcher_key(index: usize) -> String {
    format!("m{index}")
}

/// Parameter name for scope value `index`.
pub fn scope_param(index: usize) -> String {
    format!("scope_{index}")
}

pub fn index_statement(spec: &IndexSpec) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS FOR (n:{label}) ON (n.{property})",
        label = spec.label,
        property = spec.property
    )
}

/// Count nodes carrying a label.
pub fn label_count(label: &str) -> String {
    format!("MATCH (t:{label}) RETURN count(t) AS cnt")
}

/// MERGE every row's node on `(label, id)` and overwrite its properties.
pub fn node_upsert(schema: &NodeSchema) -> String {
    let extra = if schema.extra_labels.is_empty() {
        String::new()
    } else {
        format!(", i:{}", schema.extra_labels.join(":"))
    };
    format!(
        "UNWIND $rows AS item
         MERGE (i:{label} {{{ID}: item.id}})
         ON CREATE SET i.{FIRSTSEEN} = $now
         SET i += item.props{extra}",
        label = schema.label,
    )
}

/// MERGE one declared relationship for every row against existing targets.
pub fn rel_upsert(schema: &NodeSchema, rel: &RelSchema) -> String {
    let mut unwinds = String::new();
    let mut conditions = Vec::with_capacity(rel.matcher.pairs.len());
    for (k, (target_prop, value)) in rel.matcher.pairs.iter().enumerate() {
        let key = matcher_key(k);
        if value.one_to_many {
            unwinds.push_str(&format!("\n         UNWIND item.{key} AS {key}"));
            conditions.push(format!("{target_prop}: {key}"));
        } else {
            conditions.push(format!("{target_prop}: item.{key}"));
        }
    }

    format!(
        "UNWIND $rows AS item
         MATCH (i:{label} {{{ID}: item.id}}){unwinds}
         MATCH (t:{target} {{{conditions}}})
         MERGE (i){pattern}(t)
         ON CREATE SET r.{FIRSTSEEN} = $now
         SET r += item.props
         RETURN count(DISTINCT item.id) AS linked, count(r) AS merged",
        label = schema.label,
        target = rel.target_label,
        conditions = conditions.join(", "),
        pattern = arrow(rel.direction, "r", &rel.rel_label),
    )
}

/// Delete stale in-scope nodes of the schema's label, detaching them.
pub fn node_cleanup(schema: &NodeSchema, sub: &RelSchema) -> String {
    format!(
        "MATCH {scope}
         WHERE n.{LASTUPDATED} <> $update_tag
         WITH DISTINCT n LIMIT $limit
         DETACH DELETE n
         RETURN count(n) AS deleted",
        scope = scope_pattern(schema, sub, ""),
    )
}

/// Delete stale relationships of one declared rel on in-scope nodes.
pub fn rel_cleanup(schema: &NodeSchema, sub: &RelSchema, rel: &RelSchema) -> String {
    format!(
        "MATCH {scope}
         MATCH (n){pattern}(:{target})
         WHERE r.{LASTUPDATED} <> $update_tag
         WITH DISTINCT r LIMIT $limit
         DELETE r
         RETURN count(r) AS deleted",
        scope = scope_pattern(schema, sub, ""),
        pattern = arrow(rel.direction, "r", &rel.rel_label),
        target = rel.target_label,
    )
}

/// Delete stale sub-resource relationships between fresh nodes and the scope.
pub fn sub_resource_cleanup(schema: &NodeSchema, sub: &RelSchema) -> String {
    format!(
        "MATCH {scope}
         WHERE s.{LASTUPDATED} <> $update_tag
         WITH DISTINCT s LIMIT $limit
         DELETE s
         RETURN count(s) AS deleted",
        scope = scope_pattern(schema, sub, "s"),
    )
}

/// `(n:Label)<-[s:REL]-(:Scope {p: $scope_0})`; the rel variable is optional.
fn scope_pattern(schema: &NodeSchema, sub: &RelSchema, rel_var: &str) -> String {
    let conditions: Vec<String> = sub
        .matcher
        .pairs
        .iter()
        .enumerate()
        .map(|(k, (prop, _))| format!("{prop}: ${}", scope_param(k)))
        .collect();
    format!(
        "(n:{label}){pattern}(:{target} {{{conditions}}})",
        label = schema.label,
        pattern = arrow(sub.direction, rel_var, &sub.rel_label),
        target = sub.target_label,
        conditions = conditions.join(", "),
    )
}

/// Relationship arrow as seen from the source node.
pub fn arrow(direction: Direction, var: &str, rel_label: &str) -> String {
    match direction {
        Direction::Outward => format!("-[{var}:{rel_label}]->"),
        Direction::Inward => format!("<-[{var}:{rel_label}]-"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::PropertyRef;

    fn squash(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn rule_schema() -> NodeSchema {
        NodeSchema::new("IpRule", PropertyRef::field("RuleId"))
            .extra_label("IpPermissionInbound")
            .property("protocol", PropertyRef::field("IpProtocol"))
            .sub_resource(
                RelSchema::new("AWSAccount", "RESOURCE", Direction::Inward)
                    .matching("id", PropertyRef::injected("AWS_ID")),
            )
            .relationship(
                RelSchema::new("EC2SecurityGroup", "MEMBER_OF_EC2_SECURITY_GROUP", Direction::Outward)
                    .matching("id", PropertyRef::field("GroupId")),
            )
            .relationship(
                RelSchema::new("EC2SecurityGroup", "REFERENCES_GROUP", Direction::Outward)
                    .matching("id", PropertyRef::field("ReferencedGroupIds").one_to_many())
                    .matching("region", PropertyRef::injected("Region")),
            )
    }

    #[test]
    fn node_upsert_merges_on_id_and_sets_extra_labels() {
        let q = squash(&node_upsert(&rule_schema()));
        assert_eq!(
            q,
            "UNWIND $rows AS item MERGE (i:IpRule {id: item.id}) \
             ON CREATE SET i.firstseen = $now \
             SET i += item.props, i:IpPermissionInbound"
        );
    }

    #[test]
    fn node_upsert_without_extra_labels() {
        let schema = NodeSchema::new("Thing", PropertyRef::field("id"));
        assert!(squash(&node_upsert(&schema)).ends_with("SET i += item.props"));
    }

    #[test]
    fn rel_upsert_scalar_matcher() {
        let schema = rule_schema();
        let q = squash(&rel_upsert(&schema, &schema.other_rels[0]));
        assert_eq!(
            q,
            "UNWIND $rows AS item MATCH (i:IpRule {id: item.id}) \
             MATCH (t:EC2SecurityGroup {id: item.m0}) \
             MERGE (i)-[r:MEMBER_OF_EC2_SECURITY_GROUP]->(t) \
             ON CREATE SET r.firstseen = $now SET r += item.props \
             RETURN count(DISTINCT item.id) AS linked, count(r) AS merged"
        );
    }

    #[test]
    fn rel_upsert_one_to_many_unwinds() {
        let schema = rule_schema();
        let q = squash(&rel_upsert(&schema, &schema.other_rels[1]));
        assert!(q.contains("UNWIND item.m0 AS m0"));
        assert!(q.contains("MATCH (t:EC2SecurityGroup {id: m0, region: item.m1})"));
    }

    #[test]
    fn inward_sub_resource_arrow() {
        let schema = rule_schema();
        let sub = schema.sub_resource_rel.as_ref().unwrap();
        let q = squash(&rel_upsert(&schema, sub));
        assert!(q.contains("MERGE (i)<-[r:RESOURCE]-(t)"));
    }

    #[test]
    fn node_cleanup_is_scoped() {
        let schema = rule_schema();
        let sub = schema.sub_resource_rel.as_ref().unwrap();
        let q = squash(&node_cleanup(&schema, sub));
        assert_eq!(
            q,
            "MATCH (n:IpRule)<-[:RESOURCE]-(:AWSAccount {id: $scope_0}) \
             WHERE n.lastupdated <> $update_tag \
             WITH DISTINCT n LIMIT $limit DETACH DELETE n \
             RETURN count(n) AS deleted"
        );
    }

    #[test]
    fn rel_cleanup_matches_declared_target() {
        let schema = rule_schema();
        let sub = schema.sub_resource_rel.as_ref().unwrap();
        let q = squash(&rel_cleanup(&schema, sub, &schema.other_rels[0]));
        assert!(q.starts_with("MATCH (n:IpRule)<-[:RESOURCE]-(:AWSAccount {id: $scope_0})"));
        assert!(q.contains("MATCH (n)-[r:MEMBER_OF_EC2_SECURITY_GROUP]->(:EC2SecurityGroup)"));
        assert!(q.contains("WHERE r.lastupdated <> $update_tag"));
    }

    #[test]
    fn sub_resource_cleanup_binds_rel_variable() {
        let schema = rule_schema();
        let sub = schema.sub_resource_rel.as_ref().unwrap();
        let q = squash(&sub_resource_cleanup(&schema, sub));
        assert!(q.starts_with("MATCH (n:IpRule)<-[s:RESOURCE]-(:AWSAccount {id: $scope_0})"));
        assert!(q.contains("DELETE s"));
    }

    #[test]
    fn index_statement_is_idempotent_ddl() {
        let spec = IndexSpec::new("IpRule", "id");
        assert_eq!(
            index_statement(&spec),
            "CREATE INDEX IF NOT EXISTS FOR (n:IpRule) ON (n.id)"
        );
    }
}
