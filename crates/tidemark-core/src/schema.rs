//! Declarative node and relationship schemas.
//!
//! A [`NodeSchema`] describes one entity type in the graph: its labels, the
//! property that identifies it, where every property value comes from, the
//! sub-resource relationship binding it to its owning scope, and any other
//! relationships to entities of other types. Schemas are plain immutable
//! values built once at startup and handed to the generic load and cleanup
//! routines.

use crate::error::TidemarkError;

/// Graph property holding the identity of every node.
pub const ID: &str = "id";

/// Graph property holding the sync tag that last touched a node or relationship.
pub const LASTUPDATED: &str = "lastupdated";

/// Graph property holding the creation timestamp (epoch millis).
pub const FIRSTSEEN: &str = "firstseen";

/// Injected key under which the current sync tag is supplied.
pub const UPDATE_TAG: &str = "UPDATE_TAG";

// ── Property References ──────────────────────────────────────────

/// Where a schema property gets its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    /// Record field name, or the injected key when `injected` is set.
    pub name: String,
    /// Supplied once per call from the [`crate::SyncContext`] instead of per record.
    pub injected: bool,
    /// The store should maintain a lookup index on this property.
    pub index_hint: bool,
    /// The value is a list; a matcher using it connects to every element.
    pub one_to_many: bool,
}

impl PropertyRef {
    /// A value read from each input record.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            injected: false,
            index_hint: false,
            one_to_many: false,
        }
    }

    /// A value injected once per load/cleanup call.
    pub fn injected(name: impl Into<String>) -> Self {
        Self {
            injected: true,
            ..Self::field(name)
        }
    }

    /// The current sync tag.
    pub fn update_tag() -> Self {
        Self::injected(UPDATE_TAG)
    }

    pub fn indexed(mut self) -> Self {
        self.index_hint = true;
        self
    }

    pub fn one_to_many(mut self) -> Self {
        self.one_to_many = true;
        self
    }
}

// ── Relationships ────────────────────────────────────────────────

/// Direction of a relationship relative to the node being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `(target)-[:REL]->(node)`
    Inward,
    /// `(node)-[:REL]->(target)`
    Outward,
}

/// Equality rule used to find relationship targets.
///
/// Each pair binds a property on the target node to a value resolved from the
/// current record (or the sync context). All pairs must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetMatcher {
    pub pairs: Vec<(String, PropertyRef)>,
}

impl TargetMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `target.property = value` condition.
    pub fn on(mut self, target_property: impl Into<String>, value: PropertyRef) -> Self {
        self.pairs.push((target_property.into(), value));
        self
    }

    /// True when every value comes from the sync context.
    pub fn is_injected_only(&self) -> bool {
        self.pairs.iter().all(|(_, r)| r.injected)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A relationship declared on a node schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelSchema {
    pub target_label: String,
    pub matcher: TargetMatcher,
    pub direction: Direction,
    pub rel_label: String,
    /// Properties written on the relationship; always carries `lastupdated`.
    pub properties: Vec<(String, PropertyRef)>,
}

impl RelSchema {
    pub fn new(
        target_label: impl Into<String>,
        rel_label: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            target_label: target_label.into(),
            matcher: TargetMatcher::new(),
            direction,
            rel_label: rel_label.into(),
            properties: vec![(LASTUPDATED.to_string(), PropertyRef::update_tag())],
        }
    }

    /// Add a matcher condition on the target node.
    pub fn matching(mut self, target_property: impl Into<String>, value: PropertyRef) -> Self {
        self.matcher = self.matcher.on(target_property, value);
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: PropertyRef) -> Self {
        upsert_property(&mut self.properties, name.into(), value);
        self
    }

    /// `(node)-[:REL]->(target)` or `(node)<-[:REL]-(target)` for display.
    pub fn describe(&self, label: &str) -> String {
        match self.direction {
            Direction::Outward => {
                format!("({label})-[:{}]->({})", self.rel_label, self.target_label)
            }
            Direction::Inward => {
                format!("({label})<-[:{}]-({})", self.rel_label, self.target_label)
            }
        }
    }

    fn validate(&self, owner: &str) -> Result<(), TidemarkError> {
        check_identifier(owner, "target label", &self.target_label)?;
        check_identifier(owner, "relationship label", &self.rel_label)?;

        if self.matcher.is_empty() {
            return Err(TidemarkError::invalid_schema(
                owner,
                format!("{} has an empty matcher", self.describe(owner)),
            ));
        }
        for (prop, _) in &self.matcher.pairs {
            check_identifier(owner, "matcher property", prop)?;
        }
        if self.matcher.pairs.iter().filter(|(_, r)| r.one_to_many).count() > 1 {
            return Err(TidemarkError::invalid_schema(
                owner,
                format!(
                    "{} has more than one one-to-many matcher value",
                    self.describe(owner)
                ),
            ));
        }

        check_properties(owner, &self.properties)?;
        match self.properties.iter().find(|(name, _)| name == LASTUPDATED) {
            Some((_, r)) if r.injected && r.name == UPDATE_TAG => Ok(()),
            _ => Err(TidemarkError::invalid_schema(
                owner,
                format!(
                    "{} must stamp {LASTUPDATED} from {UPDATE_TAG}",
                    self.describe(owner)
                ),
            )),
        }
    }
}

// ── Nodes ────────────────────────────────────────────────────────

/// Declarative description of one node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSchema {
    pub label: String,
    pub extra_labels: Vec<String>,
    /// Identity of each node; stored under the `id` property.
    pub id: PropertyRef,
    /// Ordered domain properties; always carries `lastupdated`.
    pub properties: Vec<(String, PropertyRef)>,
    /// Binds every node to its owning scope. Schemas without one can be
    /// loaded but never cleaned up.
    pub sub_resource_rel: Option<RelSchema>,
    pub other_rels: Vec<RelSchema>,
}

impl NodeSchema {
    pub fn new(label: impl Into<String>, id: PropertyRef) -> Self {
        Self {
            label: label.into(),
            extra_labels: Vec::new(),
            id,
            properties: vec![(LASTUPDATED.to_string(), PropertyRef::update_tag())],
            sub_resource_rel: None,
            other_rels: Vec::new(),
        }
    }

    pub fn extra_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.extra_labels.contains(&label) {
            self.extra_labels.push(label);
        }
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: PropertyRef) -> Self {
        upsert_property(&mut self.properties, name.into(), value);
        self
    }

    pub fn sub_resource(mut self, rel: RelSchema) -> Self {
        self.sub_resource_rel = Some(rel);
        self
    }

    pub fn relationship(mut self, rel: RelSchema) -> Self {
        self.other_rels.push(rel);
        self
    }

    /// Sub-resource relationship first, then the others in declaration order.
    pub fn relationships(&self) -> impl Iterator<Item = &RelSchema> {
        self.sub_resource_rel.iter().chain(self.other_rels.iter())
    }

    /// Primary label followed by the extra labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str()).chain(self.extra_labels.iter().map(String::as_str))
    }

    /// Every (label, property) pair the store should index for this schema.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        let mut specs = vec![
            IndexSpec::new(&self.label, ID),
            IndexSpec::new(&self.label, LASTUPDATED),
        ];
        for (name, prop) in &self.properties {
            if prop.index_hint {
                specs.push(IndexSpec::new(&self.label, name));
            }
        }
        for rel in self.relationships() {
            for (target_prop, _) in &rel.matcher.pairs {
                specs.push(IndexSpec::new(&rel.target_label, target_prop));
            }
        }
        specs.sort();
        specs.dedup();
        specs
    }

    /// Check the structural invariants the load and cleanup routines rely on.
    pub fn validate(&self) -> Result<(), TidemarkError> {
        let label = self.label.as_str();
        check_identifier(label, "label", label)?;
        for extra in &self.extra_labels {
            check_identifier(label, "extra label", extra)?;
        }

        check_properties(label, &self.properties)?;
        for (name, _) in &self.properties {
            if name == ID || name == FIRSTSEEN {
                return Err(TidemarkError::invalid_schema(
                    label,
                    format!("property {name} is managed by the engine"),
                ));
            }
        }
        match self.properties.iter().find(|(name, _)| name == LASTUPDATED) {
            Some((_, r)) if r.injected && r.name == UPDATE_TAG => {}
            _ => {
                return Err(TidemarkError::invalid_schema(
                    label,
                    format!("{LASTUPDATED} must be bound to the injected {UPDATE_TAG}"),
                ))
            }
        }
        if self.id.one_to_many {
            return Err(TidemarkError::invalid_schema(label, "id cannot be one-to-many"));
        }

        if let Some(sub) = &self.sub_resource_rel {
            sub.validate(label)?;
            if !sub.matcher.is_injected_only() {
                return Err(TidemarkError::invalid_schema(
                    label,
                    "sub-resource matcher must use injected values only",
                ));
            }
            if sub.matcher.pairs.iter().any(|(_, r)| r.one_to_many) {
                return Err(TidemarkError::invalid_schema(
                    label,
                    "sub-resource matcher cannot be one-to-many",
                ));
            }
        }
        for rel in &self.other_rels {
            rel.validate(label)?;
        }
        Ok(())
    }
}

/// A single-property index the store should maintain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexSpec {
    pub label: String,
    pub property: String,
}

impl IndexSpec {
    pub fn new(label: &str, property: &str) -> Self {
        Self {
            label: label.to_string(),
            property: property.to_string(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn upsert_property(props: &mut Vec<(String, PropertyRef)>, name: String, value: PropertyRef) {
    match props.iter_mut().find(|(existing, _)| *existing == name) {
        Some(slot) => slot.1 = value,
        None => props.push((name, value)),
    }
}

fn check_properties(owner: &str, props: &[(String, PropertyRef)]) -> Result<(), TidemarkError> {
    for (i, (name, _)) in props.iter().enumerate() {
        check_identifier(owner, "property", name)?;
        if props[..i].iter().any(|(other, _)| other == name) {
            return Err(TidemarkError::invalid_schema(
                owner,
                format!("duplicate property {name}"),
            ));
        }
    }
    Ok(())
}

/// Labels and property names are interpolated into Cypher, so they are
/// restricted to plain identifiers.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(owner: &str, kind: &str, value: &str) -> Result<(), TidemarkError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(TidemarkError::invalid_schema(
            owner,
            format!("{kind} {value:?} is not a plain identifier"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_rel() -> RelSchema {
        RelSchema::new("AWSAccount", "RESOURCE", Direction::Inward)
            .matching("id", PropertyRef::injected("AWS_ID"))
    }

    fn group_schema() -> NodeSchema {
        NodeSchema::new("EC2SecurityGroup", PropertyRef::field("GroupId"))
            .extra_label("Firewall")
            .property("name", PropertyRef::field("GroupName"))
            .property("vpcid", PropertyRef::field("VpcId").indexed())
            .sub_resource(account_rel())
    }

    #[test]
    fn builders_stamp_lastupdated() {
        let schema = group_schema();
        assert_eq!(schema.properties[0].0, LASTUPDATED);
        assert_eq!(schema.properties[0].1, PropertyRef::update_tag());

        let rel = account_rel();
        assert!(rel.properties.iter().any(|(n, _)| n == LASTUPDATED));
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn property_overrides_replace_in_place() {
        let schema = group_schema().property("name", PropertyRef::field("Name"));
        let names: Vec<_> = schema.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![LASTUPDATED, "name", "vpcid"]);
        assert_eq!(schema.properties[1].1.name, "Name");
    }

    #[test]
    fn rejects_lastupdated_from_record() {
        let schema = group_schema().property(LASTUPDATED, PropertyRef::field("ts"));
        assert!(matches!(
            schema.validate(),
            Err(TidemarkError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let schema = NodeSchema::new("Bad Label", PropertyRef::field("id"));
        assert!(schema.validate().is_err());

        let schema = group_schema().property("x}) DETACH DELETE n //", PropertyRef::field("a"));
        assert!(schema.validate().is_err());

        assert!(is_identifier("_ok1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn rejects_engine_managed_properties() {
        let schema = group_schema().property(FIRSTSEEN, PropertyRef::field("created"));
        assert!(schema.validate().is_err());
        let schema = group_schema().property(ID, PropertyRef::field("GroupId"));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn sub_resource_matcher_must_be_injected() {
        let schema = NodeSchema::new("Thing", PropertyRef::field("id")).sub_resource(
            RelSchema::new("AWSAccount", "RESOURCE", Direction::Inward)
                .matching("id", PropertyRef::field("account")),
        );
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("injected"));
    }

    #[test]
    fn rejects_empty_matcher_and_double_one_to_many() {
        let schema = group_schema().relationship(RelSchema::new(
            "EC2Instance",
            "MEMBER_OF",
            Direction::Inward,
        ));
        assert!(schema.validate().is_err());

        let schema = group_schema().relationship(
            RelSchema::new("EC2Instance", "MEMBER_OF", Direction::Inward)
                .matching("a", PropertyRef::field("a").one_to_many())
                .matching("b", PropertyRef::field("b").one_to_many()),
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn index_specs_cover_id_stamp_hints_and_matchers() {
        let specs = group_schema().index_specs();
        assert!(specs.contains(&IndexSpec::new("EC2SecurityGroup", ID)));
        assert!(specs.contains(&IndexSpec::new("EC2SecurityGroup", LASTUPDATED)));
        assert!(specs.contains(&IndexSpec::new("EC2SecurityGroup", "vpcid")));
        assert!(specs.contains(&IndexSpec::new("AWSAccount", "id")));
        assert!(!specs.contains(&IndexSpec::new("EC2SecurityGroup", "name")));
    }

    #[test]
    fn relationships_yield_sub_resource_first() {
        let schema = group_schema().relationship(
            RelSchema::new("EC2Instance", "MEMBER_OF", Direction::Inward)
                .matching("id", PropertyRef::field("InstanceId")),
        );
        let rels: Vec<_> = schema.relationships().map(|r| r.rel_label.as_str()).collect();
        assert_eq!(rels, vec!["RESOURCE", "MEMBER_OF"]);
        let labels: Vec<_> = schema.labels().collect();
        assert_eq!(labels, vec!["EC2SecurityGroup", "Firewall"]);
    }

    #[test]
    fn describe_renders_direction() {
        let rel = account_rel();
        assert_eq!(rel.describe("X"), "(X)<-[:RESOURCE]-(AWSAccount)");
    }
}
