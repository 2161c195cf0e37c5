//! Desired HA group layout
//!
//! Every node gets three kinds of group:
//! - a single cluster-wide "any" group holding every node at equal priority
//! - a "primary" group per node, preferring that node and falling back to
//!   the others
//! - an "exclusive" group per node, holding only that node
//!
//! The kinds are not checked for drift the same way. The any-group is only
//! ever created, the primary group is compared on node names alone and the
//! exclusive group on its full `node:priority` list.

use serde::Serialize;
use std::fmt;

use crate::config::GroupNaming;
use crate::types::{GroupMember, Membership, Node};

/// Priority of a node a group prefers
pub const PREFERRED_PRIORITY: u32 = 100;

/// Priority of a fallback node in a primary group
pub const FALLBACK_PRIORITY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Any,
    Primary,
    Exclusive,
}

impl GroupKind {
    /// How an existing group of this kind is compared with its definition
    pub fn drift_check(&self) -> DriftCheck {
        match self {
            GroupKind::Any => DriftCheck::Never,
            GroupKind::Primary => DriftCheck::NodeSet,
            GroupKind::Exclusive => DriftCheck::Exact,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Any => write!(f, "any"),
            GroupKind::Primary => write!(f, "primary"),
            GroupKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Comparison applied to an existing group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftCheck {
    /// Existing groups are left alone
    Never,
    /// Node names must match, priorities are ignored
    NodeSet,
    /// The sorted `node:priority` list must match exactly
    Exact,
}

impl DriftCheck {
    pub fn matches(&self, desired: &Membership, actual: &Membership) -> bool {
        match self {
            DriftCheck::Never => true,
            DriftCheck::NodeSet => desired.node_names() == actual.node_names(),
            DriftCheck::Exact => desired.sorted().to_string() == actual.sorted().to_string(),
        }
    }
}

/// A group as the policy wants it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredGroup {
    pub kind: GroupKind,
    pub name: String,
    pub members: Membership,
}

impl DesiredGroup {
    /// Whether an existing membership needs no repair
    pub fn is_satisfied_by(&self, actual: &Membership) -> bool {
        self.kind.drift_check().matches(&self.members, actual)
    }
}

/// Computes desired groups from the node list
#[derive(Debug, Clone, Default)]
pub struct GroupPolicy {
    naming: GroupNaming,
}

impl GroupPolicy {
    pub fn new(naming: GroupNaming) -> Self {
        Self { naming }
    }

    pub fn naming(&self) -> &GroupNaming {
        &self.naming
    }

    pub fn any_group(&self, nodes: &[Node]) -> DesiredGroup {
        let members = nodes
            .iter()
            .map(|n| GroupMember::new(n.node.clone(), PREFERRED_PRIORITY))
            .collect::<Membership>()
            .sorted();

        DesiredGroup {
            kind: GroupKind::Any,
            name: self.naming.any_name.clone(),
            members,
        }
    }

    pub fn primary_group(&self, node: &str, nodes: &[Node]) -> DesiredGroup {
        let members = nodes
            .iter()
            .map(|n| {
                let priority = if n.node == node {
                    PREFERRED_PRIORITY
                } else {
                    FALLBACK_PRIORITY
                };
                GroupMember::new(n.node.clone(), priority)
            })
            .collect::<Membership>()
            .sorted();

        DesiredGroup {
            kind: GroupKind::Primary,
            name: self.naming.primary_name(node),
            members,
        }
    }

    pub fn exclusive_group(&self, node: &str) -> DesiredGroup {
        DesiredGroup {
            kind: GroupKind::Exclusive,
            name: self.naming.exclusive_name(node),
            members: Membership::new(vec![GroupMember::new(node, PREFERRED_PRIORITY)]),
        }
    }

    /// Every group the cluster should have
    ///
    /// The any-group comes first, then the primary groups, then the exclusive
    /// groups, each in node order.
    pub fn desired_groups(&self, nodes: &[Node]) -> Vec<DesiredGroup> {
        let mut groups = Vec::with_capacity(1 + nodes.len() * 2);
        groups.push(self.any_group(nodes));
        groups.extend(nodes.iter().map(|n| self.primary_group(&n.node, nodes)));
        groups.extend(nodes.iter().map(|n| self.exclusive_group(&n.node)));
        groups
    }
}
