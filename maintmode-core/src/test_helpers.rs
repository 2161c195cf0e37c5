//! In-memory cluster for tests
//!
//! [`FakeCluster`] implements [`ClusterApi`] over plain vectors and enforces
//! the management API rules the engine has to work around:
//! - a group cannot be created twice
//! - a group that still has HA resources cannot be deleted
//! - resources can only be added to existing groups
//!
//! Collections come back in insertion order, never sorted, so callers have to
//! do their own ordering. Deleted HA resources can be made to linger for a
//! number of reads to mimic the asynchronous removal of the real HA manager.
//! Every mutating call is recorded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::api::ClusterApi;
use crate::error::{MaintError, MaintResult};
use crate::types::{
    ClusterResource, HaGroupRecord, HaResourceRecord, HaState, Membership, NodeRecord,
    NodeStatus, ResourceAssignment, Sid,
};

/// API operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOperation {
    Nodes,
    ClusterResources,
    HaGroups,
    HaResources,
    CreateGroup,
    DeleteGroup,
    CreateResource,
    DeleteResource,
}

/// A recorded mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCall {
    CreateGroup { name: String, nodes: String },
    DeleteGroup { name: String },
    CreateResource { sid: String, group: String, state: String },
    DeleteResource { sid: String },
}

#[derive(Debug, Clone)]
struct StoredResource {
    record: HaResourceRecord,
    /// Reads left before a deleted resource disappears
    removal_in: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    successes_left: u32,
    status: u16,
}

#[derive(Debug, Default)]
struct FakeState {
    nodes: Vec<NodeRecord>,
    resources: Vec<ClusterResource>,
    groups: Vec<HaGroupRecord>,
    ha_resources: Vec<StoredResource>,
    mutations: Vec<MutationCall>,
    reads: HashMap<FakeOperation, u32>,
    failures: HashMap<FakeOperation, InjectedFailure>,
    settle_reads: u32,
    /// `hastate` reported for a VM instead of its requested state
    runtime_hastate: HashMap<u32, String>,
    digest: u64,
}

impl FakeState {
    fn next_digest(&mut self) -> String {
        self.digest += 1;
        format!("{:040x}", self.digest)
    }

    fn check_failure(&mut self, operation: FakeOperation) -> MaintResult<()> {
        if let Some(failure) = self.failures.get_mut(&operation) {
            if failure.successes_left == 0 {
                return Err(server_error(operation, failure.status, "injected failure"));
            }
            failure.successes_left -= 1;
        }
        Ok(())
    }

    fn count_read(&mut self, operation: FakeOperation) {
        *self.reads.entry(operation).or_insert(0) += 1;
    }
}

/// In-memory implementation of the management API
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- builders -------------------------------------------------------

    pub fn with_node(self, name: &str, status: NodeStatus) -> Self {
        self.lock().nodes.push(NodeRecord {
            node: name.to_string(),
            status,
        });
        self
    }

    pub fn with_vm(self, vmid: u32, name: &str, node: &str, status: &str) -> Self {
        self.lock().resources.push(ClusterResource {
            resource_type: "qemu".to_string(),
            id: format!("qemu/{}", vmid),
            node: Some(node.to_string()),
            vmid: Some(vmid),
            name: Some(name.to_string()),
            status: Some(status.to_string()),
            hastate: None,
        });
        self
    }

    pub fn with_container(self, vmid: u32, name: &str, node: &str) -> Self {
        self.lock().resources.push(ClusterResource {
            resource_type: "lxc".to_string(),
            id: format!("lxc/{}", vmid),
            node: Some(node.to_string()),
            vmid: Some(vmid),
            name: Some(name.to_string()),
            status: Some("running".to_string()),
            hastate: None,
        });
        self
    }

    pub fn with_storage(self, storage: &str, node: &str) -> Self {
        self.lock().resources.push(ClusterResource {
            resource_type: "storage".to_string(),
            id: format!("storage/{}/{}", node, storage),
            node: Some(node.to_string()),
            vmid: None,
            name: None,
            status: Some("available".to_string()),
            hastate: None,
        });
        self
    }

    pub fn with_group(self, name: &str, nodes: &str) -> Self {
        {
            let mut state = self.lock();
            let digest = state.next_digest();
            state.groups.push(HaGroupRecord {
                group: name.to_string(),
                nodes: nodes.to_string(),
                digest: Some(digest),
                restricted: false,
                nofailback: false,
                comment: None,
            });
        }
        self
    }

    pub fn with_assignment(self, vmid: u32, group: &str, state: HaState) -> Self {
        self.with_raw_assignment(&Sid::vm(vmid).to_string(), group, state)
    }

    pub fn with_raw_assignment(self, sid: &str, group: &str, ha_state: HaState) -> Self {
        self.lock().ha_resources.push(StoredResource {
            record: HaResourceRecord {
                sid: sid.to_string(),
                group: Some(group.to_string()),
                state: Some(ha_state),
                resource_type: Some("vm".to_string()),
                digest: None,
            },
            removal_in: None,
        });
        self
    }

    /// Report `hastate` for a VM as a manager state such as `migrate`
    pub fn with_runtime_hastate(self, vmid: u32, hastate: &str) -> Self {
        self.lock().runtime_hastate.insert(vmid, hastate.to_string());
        self
    }

    /// Keep deleted HA resources visible for `reads` further resource reads
    pub fn with_settle_reads(self, reads: u32) -> Self {
        self.lock().settle_reads = reads;
        self
    }

    /// Deleted HA resources never disappear
    pub fn with_stuck_deletions(self) -> Self {
        self.with_settle_reads(u32::MAX)
    }

    /// Fail every call of `operation` with `status`
    pub fn fail_on(self, operation: FakeOperation, status: u16) -> Self {
        self.fail_after(operation, 0, status)
    }

    /// Let `successes` calls of `operation` through, then fail with `status`
    pub fn fail_after(self, operation: FakeOperation, successes: u32, status: u16) -> Self {
        self.lock().failures.insert(
            operation,
            InjectedFailure {
                successes_left: successes,
                status,
            },
        );
        self
    }

    // --- inspection -----------------------------------------------------

    /// Every mutating call received so far, in order
    pub fn mutations(&self) -> Vec<MutationCall> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Number of read calls received for `operation`
    pub fn read_count(&self, operation: FakeOperation) -> u32 {
        self.lock().reads.get(&operation).copied().unwrap_or(0)
    }

    /// Raw `nodes` string of a group
    pub fn group_nodes(&self, name: &str) -> Option<String> {
        self.lock()
            .groups
            .iter()
            .find(|g| g.group == name)
            .map(|g| g.nodes.clone())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.lock().groups.iter().map(|g| g.group.clone()).collect()
    }

    /// Live (not pending removal) assignments of a group as `(sid, state)`
    pub fn assignments_of(&self, group: &str) -> Vec<(String, HaState)> {
        let mut assignments: Vec<(String, HaState)> = self
            .lock()
            .ha_resources
            .iter()
            .filter(|r| r.removal_in.is_none() && r.record.group.as_deref() == Some(group))
            .map(|r| (r.record.sid.clone(), r.record.state.clone().unwrap_or_default()))
            .collect();
        assignments.sort_by(|a, b| a.0.cmp(&b.0));
        assignments
    }

    /// Change a group's membership behind the engine's back
    pub fn set_group_nodes(&self, name: &str, nodes: &str) {
        if let Some(group) = self.lock().groups.iter_mut().find(|g| g.group == name) {
            group.nodes = nodes.to_string();
        }
    }
}

fn server_error(operation: FakeOperation, status: u16, message: &str) -> MaintError {
    MaintError::Transport {
        operation: format!("{:?}", operation),
        status,
        reason: message.to_string(),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn nodes(&self) -> MaintResult<Vec<NodeRecord>> {
        let mut state = self.lock();
        state.count_read(FakeOperation::Nodes);
        state.check_failure(FakeOperation::Nodes)?;
        Ok(state.nodes.clone())
    }

    async fn cluster_resources(&self) -> MaintResult<Vec<ClusterResource>> {
        let mut state = self.lock();
        state.count_read(FakeOperation::ClusterResources);
        state.check_failure(FakeOperation::ClusterResources)?;

        // HA-managed VMs report their requested state unless a runtime one was set
        let resources: Vec<ClusterResource> = state
            .resources
            .iter()
            .cloned()
            .map(|mut resource| {
                if let Some(vmid) = resource.vmid.filter(|_| resource.resource_type == "qemu") {
                    let sid = Sid::vm(vmid).to_string();
                    let requested = state
                        .ha_resources
                        .iter()
                        .find(|r| r.record.sid == sid)
                        .and_then(|r| r.record.state.clone())
                        .map(String::from);
                    resource.hastate = requested
                        .map(|r| state.runtime_hastate.get(&vmid).cloned().unwrap_or(r));
                }
                resource
            })
            .collect();
        Ok(resources)
    }

    async fn ha_groups(&self) -> MaintResult<Vec<HaGroupRecord>> {
        let mut state = self.lock();
        state.count_read(FakeOperation::HaGroups);
        state.check_failure(FakeOperation::HaGroups)?;
        Ok(state.groups.clone())
    }

    async fn ha_resources(&self) -> MaintResult<Vec<HaResourceRecord>> {
        let mut state = self.lock();
        state.count_read(FakeOperation::HaResources);
        state.check_failure(FakeOperation::HaResources)?;

        let visible: Vec<HaResourceRecord> = state.ha_resources.iter().map(|r| r.record.clone()).collect();

        for resource in state.ha_resources.iter_mut() {
            if let Some(left) = resource.removal_in.as_mut() {
                *left = left.saturating_sub(1);
            }
        }
        state.ha_resources.retain(|r| r.removal_in != Some(0));

        Ok(visible)
    }

    async fn create_ha_group(&self, name: &str, members: &Membership) -> MaintResult<()> {
        let mut state = self.lock();
        state.check_failure(FakeOperation::CreateGroup)?;
        if state.groups.iter().any(|g| g.group == name) {
            return Err(server_error(
                FakeOperation::CreateGroup,
                500,
                &format!("ha group '{}' already defined", name),
            ));
        }

        let nodes = members.to_string();
        state.mutations.push(MutationCall::CreateGroup {
            name: name.to_string(),
            nodes: nodes.clone(),
        });
        let digest = state.next_digest();
        state.groups.push(HaGroupRecord {
            group: name.to_string(),
            nodes,
            digest: Some(digest),
            restricted: false,
            nofailback: false,
            comment: None,
        });
        Ok(())
    }

    async fn delete_ha_group(&self, name: &str) -> MaintResult<()> {
        let mut state = self.lock();
        state.check_failure(FakeOperation::DeleteGroup)?;
        if !state.groups.iter().any(|g| g.group == name) {
            return Err(server_error(
                FakeOperation::DeleteGroup,
                500,
                &format!("no such ha group '{}'", name),
            ));
        }
        if state
            .ha_resources
            .iter()
            .any(|r| r.record.group.as_deref() == Some(name))
        {
            return Err(server_error(
                FakeOperation::DeleteGroup,
                500,
                &format!("ha group '{}' is used by ha resources", name),
            ));
        }

        state.mutations.push(MutationCall::DeleteGroup {
            name: name.to_string(),
        });
        state.groups.retain(|g| g.group != name);
        Ok(())
    }

    async fn create_ha_resource(&self, assignment: &ResourceAssignment) -> MaintResult<()> {
        let mut state = self.lock();
        state.check_failure(FakeOperation::CreateResource)?;

        let sid = assignment.sid.to_string();
        if !state.groups.iter().any(|g| g.group == assignment.group) {
            return Err(server_error(
                FakeOperation::CreateResource,
                500,
                &format!("no such ha group '{}'", assignment.group),
            ));
        }
        if state.ha_resources.iter().any(|r| r.record.sid == sid) {
            return Err(server_error(
                FakeOperation::CreateResource,
                500,
                &format!("resource ID '{}' already defined", sid),
            ));
        }

        state.mutations.push(MutationCall::CreateResource {
            sid: sid.clone(),
            group: assignment.group.clone(),
            state: assignment.state.to_string(),
        });
        state.ha_resources.push(StoredResource {
            record: HaResourceRecord {
                sid,
                group: Some(assignment.group.clone()),
                state: Some(assignment.state.clone()),
                resource_type: Some(assignment.resource_type().to_string()),
                digest: None,
            },
            removal_in: None,
        });
        Ok(())
    }

    async fn delete_ha_resource(&self, sid: &Sid) -> MaintResult<()> {
        let mut state = self.lock();
        state.check_failure(FakeOperation::DeleteResource)?;

        let sid = sid.to_string();
        let settle_reads = state.settle_reads;
        let resource = state
            .ha_resources
            .iter_mut()
            .find(|r| r.record.sid == sid && r.removal_in.is_none())
            .ok_or_else(|| {
                server_error(
                    FakeOperation::DeleteResource,
                    500,
                    &format!("no such resource '{}'", sid),
                )
            })?;

        if settle_reads == 0 {
            state.ha_resources.retain(|r| r.record.sid != sid);
        } else {
            resource.removal_in = Some(settle_reads);
        }
        state.mutations.push(MutationCall::DeleteResource { sid });
        Ok(())
    }
}
