//! Cluster object model
//!
//! Two layers live here. The `*Record` structs mirror the JSON the management
//! API returns and are only ever deserialized. The domain types (`Node`, `Vm`,
//! `HaGroup`, ...) are what the inventory hands to the rest of the crate:
//! sorted, filtered and annotated snapshots that are never cached across
//! reconciliation passes.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MaintError;

/// Resource type of compute VMs in `/cluster/resources`
pub const QEMU_RESOURCE_TYPE: &str = "qemu";

/// Node status as reported by `/nodes`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    Online,
    Offline,
    #[default]
    Unknown,
    Other(String),
}

impl From<String> for NodeStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "online" => NodeStatus::Online,
            "offline" => NodeStatus::Offline,
            "unknown" | "" => NodeStatus::Unknown,
            _ => NodeStatus::Other(s),
        }
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Offline => write!(f, "offline"),
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Run state of a VM as reported by `/cluster/resources`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    #[default]
    Unknown,
    Other(String),
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, VmStatus::Running)
    }
}

impl From<String> for VmStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            "paused" => VmStatus::Paused,
            "unknown" | "" => VmStatus::Unknown,
            _ => VmStatus::Other(s),
        }
    }
}

impl From<VmStatus> for String {
    fn from(status: VmStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Running => write!(f, "running"),
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Paused => write!(f, "paused"),
            VmStatus::Unknown => write!(f, "unknown"),
            VmStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Requested HA state of a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum HaState {
    #[default]
    Started,
    Stopped,
    Enabled,
    Disabled,
    Ignored,
    Other(String),
}

impl From<String> for HaState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "started" => HaState::Started,
            "stopped" => HaState::Stopped,
            "enabled" => HaState::Enabled,
            "disabled" => HaState::Disabled,
            "ignored" => HaState::Ignored,
            _ => HaState::Other(s),
        }
    }
}

impl From<HaState> for String {
    fn from(state: HaState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaState::Started => write!(f, "started"),
            HaState::Stopped => write!(f, "stopped"),
            HaState::Enabled => write!(f, "enabled"),
            HaState::Disabled => write!(f, "disabled"),
            HaState::Ignored => write!(f, "ignored"),
            HaState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Kind prefix of an HA resource SID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidKind {
    Vm,
    Ct,
}

impl SidKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SidKind::Vm => "vm",
            SidKind::Ct => "ct",
        }
    }
}

/// HA resource identifier, `vm:<vmid>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid {
    pub kind: SidKind,
    pub id: u32,
}

impl Sid {
    pub fn vm(vmid: u32) -> Self {
        Self {
            kind: SidKind::Vm,
            id: vmid,
        }
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Sid {
    type Err = MaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| MaintError::InvalidSid(s.to_string()))?;
        let kind = match kind {
            "vm" => SidKind::Vm,
            "ct" => SidKind::Ct,
            _ => return Err(MaintError::InvalidSid(s.to_string())),
        };
        let id = id
            .parse::<u32>()
            .map_err(|_| MaintError::InvalidSid(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

impl Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One `node[:priority]` entry of an HA group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupMember {
    pub node: String,
    pub priority: Option<u32>,
}

impl GroupMember {
    pub fn new(node: impl Into<String>, priority: u32) -> Self {
        Self {
            node: node.into(),
            priority: Some(priority),
        }
    }
}

impl fmt::Display for GroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.priority {
            Some(priority) => write!(f, "{}:{}", self.node, priority),
            None => write!(f, "{}", self.node),
        }
    }
}

impl FromStr for GroupMember {
    type Err = MaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((node, priority)) => {
                let priority = priority.parse::<u32>().map_err(|_| {
                    MaintError::configuration("group.nodes", format!("invalid priority in '{}'", s))
                })?;
                Ok(Self {
                    node: node.to_string(),
                    priority: Some(priority),
                })
            }
            None if !s.is_empty() => Ok(Self {
                node: s.to_string(),
                priority: None,
            }),
            None => Err(MaintError::configuration("group.nodes", "empty member entry")),
        }
    }
}

/// Ordered node membership of an HA group
///
/// Serialized on the wire as a comma-joined `node:priority` string. The order
/// given by the API is kept; comparisons go through [`Membership::sorted`] so
/// that they do not depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Membership(Vec<GroupMember>);

impl Membership {
    pub fn new(members: Vec<GroupMember>) -> Self {
        Self(members)
    }

    /// Parse the API's comma-joined representation
    pub fn parse(s: &str) -> Result<Self, MaintError> {
        s.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(GroupMember::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn members(&self) -> &[GroupMember] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries ordered by their rendered `node:priority` text
    pub fn sorted(&self) -> Membership {
        let mut members = self.0.clone();
        members.sort_by_key(|m| m.to_string());
        Membership(members)
    }

    /// Node names without priorities, sorted
    pub fn node_names(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.0.iter().map(|m| m.node.as_str()).collect();
        nodes.sort_unstable();
        nodes
    }

    /// Priority configured for a node, if the node is a member
    pub fn priority_of(&self, node: &str) -> Option<u32> {
        self.0
            .iter()
            .find(|m| m.node == node)
            .and_then(|m| m.priority)
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, member) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", member)?;
        }
        Ok(())
    }
}

impl FromIterator<GroupMember> for Membership {
    fn from_iter<I: IntoIterator<Item = GroupMember>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// API records
// ---------------------------------------------------------------------------

/// Entry of `GET /nodes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: String,
    #[serde(default)]
    pub status: NodeStatus,
}

/// Entry of `GET /cluster/resources`
///
/// The list is heterogeneous (VMs, containers, storage, nodes, pools); only
/// the fields needed to recognise and describe a VM are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hastate: Option<String>,
}

/// Entry of `GET /cluster/ha/groups`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaGroupRecord {
    pub group: String,
    #[serde(default)]
    pub nodes: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub restricted: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub nofailback: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Entry of `GET /cluster/ha/resources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaResourceRecord {
    pub sid: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub state: Option<HaState>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

/// The API reports boolean flags as `0`/`1`, some versions as JSON booleans.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_u64().map(|n| n != 0).unwrap_or(false),
        serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Domain snapshots
// ---------------------------------------------------------------------------

/// Summary of a VM running on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningVm {
    pub name: String,
    pub status: VmStatus,
}

/// Cluster node with the VMs currently running on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node: String,
    pub status: NodeStatus,
    pub running_vms: Vec<RunningVm>,
}

/// A QEMU virtual machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub status: VmStatus,
    /// HA state reported by the cluster, if the VM is HA-managed
    pub ha_state: Option<HaState>,
    /// Set once the VM has been matched to an HA resource
    pub sid: Option<Sid>,
}

impl Vm {
    /// Build a VM from a cluster resource entry, if it is a QEMU VM
    pub fn from_resource(resource: &ClusterResource) -> Option<Self> {
        if resource.resource_type != QEMU_RESOURCE_TYPE {
            return None;
        }
        let vmid = resource.vmid?;
        Some(Self {
            vmid,
            name: resource.name.clone().unwrap_or_else(|| format!("VM {}", vmid)),
            node: resource.node.clone().unwrap_or_default(),
            status: resource
                .status
                .clone()
                .map(VmStatus::from)
                .unwrap_or_default(),
            ha_state: resource.hastate.clone().map(HaState::from),
            sid: None,
        })
    }

    /// SID this VM would be registered under as an HA resource
    pub fn expected_sid(&self) -> Sid {
        Sid::vm(self.vmid)
    }
}

/// HA group with its resolved member VMs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaGroup {
    pub name: String,
    pub members: Membership,
    pub digest: Option<String>,
    pub restricted: bool,
    pub nofailback: bool,
    pub comment: Option<String>,
    /// VMs assigned to this group, sorted by name
    pub vms: Vec<Vm>,
}

impl HaGroup {
    pub fn from_record(record: HaGroupRecord) -> Result<Self, MaintError> {
        Ok(Self {
            members: Membership::parse(&record.nodes)?,
            name: record.group,
            digest: record.digest,
            restricted: record.restricted,
            nofailback: record.nofailback,
            comment: record.comment,
            vms: Vec::new(),
        })
    }

    pub fn has_members(&self) -> bool {
        !self.vms.is_empty()
    }
}

/// An HA resource to (re)register: VM SID, target group and requested state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAssignment {
    pub sid: Sid,
    pub group: String,
    pub state: HaState,
}

impl ResourceAssignment {
    pub fn resource_type(&self) -> &'static str {
        self.sid.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sid_parse_and_display() {
        let sid: Sid = "vm:100".parse().unwrap();
        assert_eq!(sid, Sid::vm(100));
        assert_eq!(sid.to_string(), "vm:100");

        let ct: Sid = "ct:7".parse().unwrap();
        assert_eq!(ct.kind, SidKind::Ct);

        assert!("vm".parse::<Sid>().is_err());
        assert!("qemu:100".parse::<Sid>().is_err());
        assert!("vm:abc".parse::<Sid>().is_err());
    }

    #[test]
    fn test_membership_parse_keeps_order_and_bare_nodes() {
        let members = Membership::parse("prox02:1,prox01:100,prox03").unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members.members()[0], GroupMember::new("prox02", 1));
        assert_eq!(members.members()[2].priority, None);
        assert_eq!(members.to_string(), "prox02:1,prox01:100,prox03");
        assert_eq!(members.sorted().to_string(), "prox01:100,prox02:1,prox03");
        assert_eq!(members.node_names(), vec!["prox01", "prox02", "prox03"]);
        assert_eq!(members.priority_of("prox01"), Some(100));
    }

    #[test]
    fn test_membership_parse_empty_and_invalid() {
        assert!(Membership::parse("").unwrap().is_empty());
        assert!(Membership::parse("prox01:high").is_err());
    }

    #[test]
    fn test_vm_from_resource_filters_non_qemu() {
        let lxc = ClusterResource {
            resource_type: "lxc".to_string(),
            id: "lxc/200".to_string(),
            node: Some("prox01".to_string()),
            vmid: Some(200),
            name: Some("ct".to_string()),
            status: Some("running".to_string()),
            hastate: None,
        };
        assert!(Vm::from_resource(&lxc).is_none());

        let qemu = ClusterResource {
            resource_type: "qemu".to_string(),
            id: "qemu/100".to_string(),
            vmid: Some(100),
            hastate: Some("started".to_string()),
            ..lxc
        };
        let vm = Vm::from_resource(&qemu).unwrap();
        assert_eq!(vm.vmid, 100);
        assert!(vm.status.is_running());
        assert_eq!(vm.ha_state, Some(HaState::Started));
        assert_eq!(vm.expected_sid().to_string(), "vm:100");
    }

    #[test]
    fn test_group_record_flags_accept_ints_and_bools() {
        let record: HaGroupRecord = serde_json::from_str(
            r#"{"group":"g","nodes":"prox01:100","digest":"abc","restricted":1,"nofailback":false,"type":"group"}"#,
        )
        .unwrap();
        assert!(record.restricted);
        assert!(!record.nofailback);

        let group = HaGroup::from_record(record).unwrap();
        assert_eq!(group.members.to_string(), "prox01:100");
        assert!(!group.has_members());
    }

    #[test]
    fn test_status_strings_round_trip_unknown_values() {
        let status: NodeStatus = serde_json::from_str(r#""maintenance""#).unwrap();
        assert_eq!(status, NodeStatus::Other("maintenance".to_string()));
        assert_eq!(serde_json::to_string(&status).unwrap(), r#""maintenance""#);

        let state: HaState = serde_json::from_str(r#""stopped""#).unwrap();
        assert_eq!(state, HaState::Stopped);
    }
}
