//! EC2 security groups: groups, their inbound rules, and the address ranges
//! those rules admit.
//!
//! Snapshots are `DescribeSecurityGroups` responses saved per region as
//! `{snapshot_dir}/{region}.json`. Every scope is one account/region pair;
//! cleanup runs once per account because every node hangs off the
//! `AWSAccount` through a `RESOURCE` relationship.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use async_trait::async_trait;
use ipnet::IpNet;
use serde_json::{json, Value};
use uuid::Uuid;

use tidemark_core::{Direction, NodeSchema, PropertyRef, Record, RelSchema};

use crate::module::{ResourceModule, Scope, Transformed};
use crate::snapshot::SnapshotDir;

/// Injected key holding the AWS account id.
pub const ACCOUNT_ID: &str = "AWS_ID";
/// Injected key holding the region of the scope.
pub const REGION: &str = "Region";

pub const ACCOUNT_LABEL: &str = "AWSAccount";
pub const GROUP_LABEL: &str = "EC2SecurityGroup";
pub const RULE_LABEL: &str = "IpRule";
pub const RANGE_LABEL: &str = "IpRange";

/// Namespace for deterministic rule ids.
const RULE_NS: Uuid = Uuid::from_bytes([
    0x3c, 0x1e, 0x5a, 0x52, 0x7b, 0x0d, 0x4f, 0x61, 0x9a, 0x27, 0x52, 0xc4, 0x11, 0x8e, 0xd0, 0x6b,
]);

// ── Schemas ──────────────────────────────────────────────────────

fn account_resource() -> RelSchema {
    RelSchema::new(ACCOUNT_LABEL, "RESOURCE", Direction::Inward)
        .matching("id", PropertyRef::injected(ACCOUNT_ID))
}

/// The account root. Loaded every run so groups can bind to it; never cleaned.
pub fn account_schema() -> NodeSchema {
    NodeSchema::new(ACCOUNT_LABEL, PropertyRef::injected(ACCOUNT_ID))
}

pub fn group_schema() -> NodeSchema {
    NodeSchema::new(GROUP_LABEL, PropertyRef::field("GroupId"))
        .property("name", PropertyRef::field("GroupName"))
        .property("description", PropertyRef::field("Description"))
        .property("vpcid", PropertyRef::field("VpcId").indexed())
        .property("region", PropertyRef::injected(REGION))
        .sub_resource(account_resource())
}

pub fn rule_schema() -> NodeSchema {
    NodeSchema::new(RULE_LABEL, PropertyRef::field("RuleId"))
        .extra_label("IpPermissionInbound")
        .property("protocol", PropertyRef::field("IpProtocol"))
        .property("fromport", PropertyRef::field("FromPort"))
        .property("toport", PropertyRef::field("ToPort"))
        .sub_resource(account_resource())
        .relationship(
            RelSchema::new(GROUP_LABEL, "MEMBER_OF_EC2_SECURITY_GROUP", Direction::Outward)
                .matching("id", PropertyRef::field("GroupId")),
        )
        .relationship(
            RelSchema::new(GROUP_LABEL, "REFERENCES_GROUP", Direction::Outward)
                .matching("id", PropertyRef::field("ReferencedGroupIds").one_to_many()),
        )
}

pub fn range_schema() -> NodeSchema {
    NodeSchema::new(RANGE_LABEL, PropertyRef::field("RangeId"))
        .property("range", PropertyRef::field("Range"))
        .property("prefixlen", PropertyRef::field("PrefixLen"))
        .sub_resource(account_resource())
        .relationship(
            RelSchema::new(RULE_LABEL, "MEMBER_OF_IP_RULE", Direction::Outward)
                .matching("id", PropertyRef::field("RuleIds").one_to_many()),
        )
}

// ── Module ───────────────────────────────────────────────────────

pub struct Ec2Module {
    snapshots: SnapshotDir,
    schemas: Vec<NodeSchema>,
}

impl Ec2Module {
    pub fn new(snapshots: SnapshotDir) -> Self {
        Self {
            snapshots,
            schemas: vec![account_schema(), group_schema(), rule_schema(), range_schema()],
        }
    }

    /// One scope per region of the account.
    pub fn scopes(account_id: &str, regions: &[String]) -> Vec<Scope> {
        regions
            .iter()
            .map(|region| {
                Scope::new(format!("{account_id}/{region}"))
                    .with(ACCOUNT_ID, account_id)
                    .with(REGION, region.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl ResourceModule for Ec2Module {
    fn name(&self) -> &str {
        "ec2"
    }

    fn schemas(&self) -> &[NodeSchema] {
        &self.schemas
    }

    /// Collapse account/region scopes into one scope per account.
    fn cleanup_scopes(&self, loaded: &[Scope]) -> Vec<Scope> {
        let accounts: BTreeSet<&str> = loaded
            .iter()
            .filter_map(|s| s.values.get(ACCOUNT_ID).and_then(Value::as_str))
            .collect();
        accounts
            .into_iter()
            .map(|account| Scope::new(account).with(ACCOUNT_ID, account))
            .collect()
    }

    async fn fetch(&self, scope: &Scope) -> anyhow::Result<Vec<Value>> {
        let region = scope
            .values
            .get(REGION)
            .and_then(Value::as_str)
            .with_context(|| format!("scope {scope} has no {REGION}"))?;
        self.snapshots.read_list(region, "SecurityGroups").await
    }

    fn transform(&self, scope: &Scope, raw: Vec<Value>) -> anyhow::Result<Transformed> {
        transform_groups(raw).with_context(|| format!("transforming security groups for {scope}"))
    }
}

// ── Transform ────────────────────────────────────────────────────

/// Flatten security groups into group, rule, and range records.
pub fn transform_groups(raw: Vec<Value>) -> anyhow::Result<Transformed> {
    let mut groups = Vec::with_capacity(raw.len());
    let mut rules = Vec::new();
    let mut ranges: BTreeMap<String, (IpNet, BTreeSet<String>)> = BTreeMap::new();

    for (index, group) in raw.iter().enumerate() {
        let group_id = group
            .get("GroupId")
            .and_then(Value::as_str)
            .with_context(|| format!("security group {index} has no GroupId"))?;

        groups.push(record(json!({
            "GroupId": group_id,
            "GroupName": group.get("GroupName"),
            "Description": group.get("Description"),
            "VpcId": group.get("VpcId"),
        })));

        for permission in list(group, "IpPermissions") {
            let protocol = permission.get("IpProtocol").cloned().unwrap_or(Value::Null);
            let from_port = permission.get("FromPort").cloned().unwrap_or(Value::Null);
            let to_port = permission.get("ToPort").cloned().unwrap_or(Value::Null);
            let rule_id = rule_id(group_id, &protocol, &from_port, &to_port);

            let referenced: Vec<&str> = list(permission, "UserIdGroupPairs")
                .filter_map(|pair| pair.get("GroupId").and_then(Value::as_str))
                .collect();

            rules.push(record(json!({
                "RuleId": rule_id,
                "GroupId": group_id,
                "IpProtocol": protocol,
                "FromPort": from_port,
                "ToPort": to_port,
                "ReferencedGroupIds": referenced,
            })));

            let cidrs = list(permission, "IpRanges")
                .filter_map(|r| r.get("CidrIp").and_then(Value::as_str))
                .chain(
                    list(permission, "Ipv6Ranges")
                        .filter_map(|r| r.get("CidrIpv6").and_then(Value::as_str)),
                );
            for cidr in cidrs {
                match normalize_cidr(cidr) {
                    Some(net) => {
                        ranges
                            .entry(net.to_string())
                            .or_insert_with(|| (net, BTreeSet::new()))
                            .1
                            .insert(rule_id.clone());
                    }
                    None => {
                        tracing::warn!(group_id, cidr, "Skipping unparseable CIDR");
                    }
                }
            }
        }
    }

    let ranges = ranges
        .into_iter()
        .map(|(id, (net, rule_ids))| {
            record(json!({
                "RangeId": id,
                "Range": net.to_string(),
                "PrefixLen": net.prefix_len(),
                "RuleIds": rule_ids,
            }))
        })
        .collect();

    Ok(Transformed::new()
        .with(ACCOUNT_LABEL, vec![Record::new()])
        .with(GROUP_LABEL, groups)
        .with(RULE_LABEL, rules)
        .with(RANGE_LABEL, ranges))
}

/// Deterministic id for an inbound rule of a group.
pub fn rule_id(group_id: &str, protocol: &Value, from_port: &Value, to_port: &Value) -> String {
    Uuid::new_v5(
        &RULE_NS,
        format!("{group_id}:inbound:{protocol}:{from_port}:{to_port}").as_bytes(),
    )
    .to_string()
}

/// Canonical network form: host bits cleared (`10.0.0.7/8` → `10.0.0.0/8`).
/// Bare addresses become host routes.
pub fn normalize_cidr(raw: &str) -> Option<IpNet> {
    let raw = raw.trim();
    if let Ok(net) = raw.parse::<IpNet>() {
        return Some(net.trunc());
    }
    raw.parse::<std::net::IpAddr>().ok().map(IpNet::from)
}

fn list<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
