//! Reconciliation pass
//!
//! A pass reads the cluster, plans the group changes needed to match the
//! [`GroupPolicy`], applies them in order through the [`GroupMutator`] and
//! re-reads the cluster to confirm nothing is left to do. Planning is a pure
//! function over one snapshot so it can be inspected (and tested) without a
//! cluster.
//!
//! The first failing mutation aborts the pass; changes already applied stay
//! applied.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::MaintResult;
use crate::inventory::ClusterInventory;
use crate::mutator::GroupMutator;
use crate::policy::{DesiredGroup, GroupKind, GroupPolicy};
use crate::types::{HaGroup, Node};

/// One change required to converge
#[derive(Debug, Clone, PartialEq)]
pub enum GroupAction {
    /// The group does not exist
    Create { desired: DesiredGroup },
    /// The group exists with a membership that fails its drift check
    Update {
        desired: DesiredGroup,
        current: HaGroup,
    },
}

impl GroupAction {
    pub fn desired(&self) -> &DesiredGroup {
        match self {
            GroupAction::Create { desired } | GroupAction::Update { desired, .. } => desired,
        }
    }

    pub fn name(&self) -> &str {
        &self.desired().name
    }

    pub fn kind(&self) -> GroupKind {
        self.desired().kind
    }
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupAction::Create { desired } => write!(
                f,
                "create {} group {} with {}",
                desired.kind, desired.name, desired.members
            ),
            GroupAction::Update { desired, current } => write!(
                f,
                "update {} group {} from {} to {}",
                desired.kind,
                desired.name,
                current.members.sorted(),
                desired.members
            ),
        }
    }
}

/// Compute the actions that bring `groups` in line with the policy
///
/// Actions come out in policy order: the any-group, then primary groups, then
/// exclusive groups. Groups the policy does not name are ignored.
pub fn plan(nodes: &[Node], groups: &[HaGroup], policy: &GroupPolicy) -> Vec<GroupAction> {
    policy
        .desired_groups(nodes)
        .into_iter()
        .filter_map(|desired| match groups.iter().find(|g| g.name == desired.name) {
            None => Some(GroupAction::Create { desired }),
            Some(current) if !desired.is_satisfied_by(&current.members) => {
                Some(GroupAction::Update {
                    desired,
                    current: current.clone(),
                })
            }
            Some(current) => {
                debug!("Group {} matches ({})", current.name, current.members);
                None
            }
        })
        .collect()
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Every planned action, rendered
    pub planned: Vec<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    /// Groups still drifting after the changes were applied
    pub remaining_drift: Vec<String>,
}

impl ReconcileReport {
    pub fn is_converged(&self) -> bool {
        self.remaining_drift.is_empty() && (!self.dry_run || self.planned.is_empty())
    }
}

/// Drives reconciliation passes
pub struct Reconciler {
    mutator: GroupMutator,
    policy: GroupPolicy,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(mutator: GroupMutator, policy: GroupPolicy) -> Self {
        Self {
            mutator,
            policy,
            dry_run: false,
        }
    }

    /// Only log the plan, do not mutate anything
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn inventory(&self) -> &ClusterInventory {
        self.mutator.inventory()
    }

    /// Run one full pass
    pub async fn run(&self) -> MaintResult<ReconcileReport> {
        let nodes = self.inventory().list_nodes().await?;
        let groups = self.inventory().list_groups(None).await?;
        let desired = self.policy.desired_groups(&nodes);
        info!("Reconciling {} groups for {} nodes", desired.len(), nodes.len());

        let actions = plan(&nodes, &groups, &self.policy);
        let mut report = ReconcileReport {
            dry_run: self.dry_run,
            planned: actions.iter().map(ToString::to_string).collect(),
            unchanged: desired
                .into_iter()
                .map(|g| g.name)
                .filter(|name| !actions.iter().any(|a| a.name() == name))
                .collect(),
            ..Default::default()
        };

        if actions.is_empty() {
            info!("All groups match the policy");
            return Ok(report);
        }

        if self.dry_run {
            for action in &actions {
                info!("Would {}", action);
            }
            return Ok(report);
        }

        for action in actions {
            self.apply(action, &mut report).await?;
        }

        self.verify(&mut report).await?;
        Ok(report)
    }

    async fn apply(&self, action: GroupAction, report: &mut ReconcileReport) -> MaintResult<()> {
        match action {
            GroupAction::Create { desired } => {
                info!("The {} group {} was not found, creating it", desired.kind, desired.name);
                self.mutator.create_group(&desired.name, &desired.members).await?;
                report.created.push(desired.name);
            }
            GroupAction::Update { desired, current } => {
                warn!("Fixing incorrect member list for {}", desired.name);
                warn!("expected {}", desired.members);
                warn!("found    {}", current.members.sorted());
                self.mutator.update_group(&current, &desired.members).await?;
                report.updated.push(desired.name);
            }
        }
        Ok(())
    }

    async fn verify(&self, report: &mut ReconcileReport) -> MaintResult<()> {
        let nodes = self.inventory().list_nodes().await?;
        let groups = self.inventory().list_groups(None).await?;

        report.remaining_drift = plan(&nodes, &groups, &self.policy)
            .iter()
            .map(|action| {
                warn!("Still drifting after reconciliation: {}", action);
                action.name().to_string()
            })
            .collect();

        if report.remaining_drift.is_empty() {
            info!("Verified all groups match the policy");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Membership, NodeStatus};

    fn nodes(names: &[&str]) -> Vec<Node> {
        names
            .iter()
            .map(|name| Node {
                node: name.to_string(),
                status: NodeStatus::Online,
                running_vms: Vec::new(),
            })
            .collect()
    }

    fn group(name: &str, members: &str) -> HaGroup {
        HaGroup {
            name: name.to_string(),
            members: Membership::parse(members).unwrap(),
            digest: None,
            restricted: false,
            nofailback: false,
            comment: None,
            vms: Vec::new(),
        }
    }

    #[test]
    fn test_plan_creates_everything_on_empty_cluster() {
        let actions = plan(&nodes(&["a", "b"]), &[], &GroupPolicy::default());
        assert_eq!(actions.len(), 5);
        assert!(actions.iter().all(|a| matches!(a, GroupAction::Create { .. })));
        assert_eq!(actions[0].to_string(), "create any group test_any_node with a:100,b:100");
    }

    #[test]
    fn test_plan_never_touches_existing_any_group() {
        let policy = GroupPolicy::default();
        let groups = vec![
            group("test_any_node", "a:5"),
            group("test_a_primary", "a:100,b:1"),
            group("test_b_primary", "a:1,b:100"),
            group("test_a_only", "a:100"),
            group("test_b_only", "b:100"),
        ];
        assert!(plan(&nodes(&["a", "b"]), &groups, &policy).is_empty());
    }

    #[test]
    fn test_plan_updates_exclusive_group_on_priority_drift() {
        let policy = GroupPolicy::default();
        let groups = vec![
            group("test_any_node", "a:100"),
            group("test_a_primary", "a:100"),
            group("test_a_only", "a:1"),
        ];

        let actions = plan(&nodes(&["a"]), &groups, &policy);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name(), "test_a_only");
        assert_eq!(actions[0].kind(), GroupKind::Exclusive);
        assert_eq!(actions[0].to_string(), "update exclusive group test_a_only from a:1 to a:100");
    }

    #[test]
    fn test_plan_updates_primary_group_on_node_drift() {
        let policy = GroupPolicy::default();
        let groups = vec![
            group("test_any_node", "a:100,b:100"),
            group("test_a_primary", "a:100"),
            group("test_b_primary", "b:100,a:100"),
            group("test_a_only", "a:100"),
            group("test_b_only", "b:100"),
        ];

        let actions = plan(&nodes(&["a", "b"]), &groups, &policy);
        let names: Vec<&str> = actions.iter().map(GroupAction::name).collect();
        assert_eq!(names, vec!["test_a_primary"]);
    }

    #[test]
    fn test_report_convergence() {
        let mut report = ReconcileReport::default();
        assert!(report.is_converged());

        report.dry_run = true;
        report.planned.push("create any group x with a:100".to_string());
        assert!(!report.is_converged());

        report.dry_run = false;
        report.remaining_drift.push("x".to_string());
        assert!(!report.is_converged());
    }
}
