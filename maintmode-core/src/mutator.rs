//! HA group mutations
//!
//! The management API refuses to delete a group that still has HA resources
//! and has no way to edit a group's node list in place. Creating and deleting
//! groups are single calls; changing a group's membership goes through
//! [`UpdateSaga`], which drains the group, waits for the HA manager to let go
//! of every resource, recreates the group and puts the resources back.
//!
//! The saga records what it drained in [`UpdateProgress`] before moving on, so
//! a failure part way through reports exactly which assignments were not yet
//! restored.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{MaintError, MaintResult};
use crate::inventory::ClusterInventory;
use crate::types::{HaGroup, Membership, ResourceAssignment};

/// How long to wait for a drained group to become empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two reads of the group
    pub interval: Duration,
    /// Reads before giving up with [`MaintError::WaitTimeout`]
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 300,
        }
    }
}

/// Step of a membership update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Draining,
    Deleting,
    Recreating,
    Restoring,
    Done,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdatePhase::Draining => "draining members",
            UpdatePhase::Deleting => "deleting group",
            UpdatePhase::Recreating => "recreating group",
            UpdatePhase::Restoring => "restoring members",
            UpdatePhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Durable record of an in-flight membership update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateProgress {
    pub group: String,
    pub phase: UpdatePhase,
    /// Assignments removed from the group, in removal order
    pub drained: Vec<ResourceAssignment>,
    /// How many of `drained` have been recreated
    pub restored: usize,
    /// Reads spent waiting for the group to empty
    pub poll_attempts: u32,
}

impl UpdateProgress {
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            phase: UpdatePhase::Draining,
            drained: Vec::new(),
            restored: 0,
            poll_attempts: 0,
        }
    }

    /// Drained assignments that still have to be recreated
    pub fn pending(&self) -> &[ResourceAssignment] {
        &self.drained[self.restored.min(self.drained.len())..]
    }
}

/// Creates, deletes and updates HA groups
#[derive(Clone)]
pub struct GroupMutator {
    inventory: ClusterInventory,
    poll: PollConfig,
}

impl GroupMutator {
    pub fn new(inventory: ClusterInventory, poll: PollConfig) -> Self {
        Self { inventory, poll }
    }

    pub fn inventory(&self) -> &ClusterInventory {
        &self.inventory
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    /// Create a group and return it as read back from the cluster
    pub async fn create_group(&self, name: &str, members: &Membership) -> MaintResult<HaGroup> {
        warn!("Creating group {} with nodes {}", name, members);

        if let Err(e) = self.inventory.api().create_ha_group(name, members).await {
            error!("Creating group {} failed: {}", name, e);
            return Err(MaintError::GroupCreation {
                group: name.to_string(),
                source: Box::new(e),
            });
        }

        warn!("Group {} created", name);

        self.inventory
            .get_group(name)
            .await?
            .ok_or_else(|| MaintError::GroupNotFound {
                group: name.to_string(),
            })
    }

    /// Delete a group that has no VMs assigned
    ///
    /// A group with members is refused without contacting the API.
    pub async fn delete_group(&self, group: &HaGroup) -> MaintResult<()> {
        if group.has_members() {
            error!(
                "Group {} still has {} VMs, refusing to delete it",
                group.name,
                group.vms.len()
            );
            return Err(MaintError::GroupNotEmpty {
                group: group.name.clone(),
                members: group.vms.len(),
            });
        }

        warn!("Deleting group {}", group.name);

        if let Err(e) = self.inventory.api().delete_ha_group(&group.name).await {
            error!("Deleting group {} failed: {}", group.name, e);
            return Err(MaintError::GroupDeletion {
                group: group.name.clone(),
                source: Box::new(e),
            });
        }

        warn!("Group {} deleted", group.name);
        Ok(())
    }

    /// Replace a group's membership while keeping its VM assignments
    pub async fn update_group(&self, group: &HaGroup, members: &Membership) -> MaintResult<HaGroup> {
        UpdateSaga::new(self, group, members).run().await
    }
}

/// One membership update, driven phase by phase
pub struct UpdateSaga<'a> {
    mutator: &'a GroupMutator,
    current: HaGroup,
    desired: Membership,
    progress: UpdateProgress,
    updated: Option<HaGroup>,
}

impl<'a> UpdateSaga<'a> {
    pub fn new(mutator: &'a GroupMutator, group: &HaGroup, desired: &Membership) -> Self {
        let mut progress = UpdateProgress::new(&group.name);
        if !group.has_members() {
            progress.phase = UpdatePhase::Deleting;
        }
        Self {
            mutator,
            current: group.clone(),
            desired: desired.clone(),
            progress,
            updated: None,
        }
    }

    pub fn progress(&self) -> &UpdateProgress {
        &self.progress
    }

    /// Run every remaining phase
    ///
    /// Any failure is returned as [`MaintError::GroupUpdate`] carrying the
    /// progress made so far.
    pub async fn run(mut self) -> MaintResult<HaGroup> {
        info!(
            "Updating group {} from {} to {}",
            self.current.name, self.current.members, self.desired
        );

        while self.progress.phase != UpdatePhase::Done {
            if let Err(e) = self.step().await {
                error!(
                    "Updating group {} failed while {}: {}",
                    self.progress.group, self.progress.phase, e
                );
                if !self.progress.pending().is_empty() {
                    error!(
                        "Assignments not restored: {}",
                        self.progress
                            .pending()
                            .iter()
                            .map(|a| a.sid.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                return Err(MaintError::GroupUpdate {
                    group: self.progress.group.clone(),
                    progress: Box::new(self.progress),
                    source: Box::new(e),
                });
            }
        }

        self.updated.ok_or_else(|| MaintError::GroupNotFound {
            group: self.progress.group.clone(),
        })
    }

    async fn step(&mut self) -> MaintResult<()> {
        match self.progress.phase {
            UpdatePhase::Draining => {
                self.drain().await?;
                self.wait_until_empty().await?;
                self.progress.phase = UpdatePhase::Deleting;
            }
            UpdatePhase::Deleting => {
                self.mutator.delete_group(&self.current).await?;
                self.progress.phase = UpdatePhase::Recreating;
            }
            UpdatePhase::Recreating => {
                self.current = self
                    .mutator
                    .create_group(&self.progress.group, &self.desired)
                    .await?;
                self.progress.phase = UpdatePhase::Restoring;
            }
            UpdatePhase::Restoring => {
                self.restore().await?;
                let group = self
                    .mutator
                    .inventory
                    .get_group(&self.progress.group)
                    .await?
                    .ok_or_else(|| MaintError::GroupNotFound {
                        group: self.progress.group.clone(),
                    })?;
                self.updated = Some(group);
                self.progress.phase = UpdatePhase::Done;
            }
            UpdatePhase::Done => {}
        }
        Ok(())
    }

    /// Remove every assignment, remembering each one once it is gone
    async fn drain(&mut self) -> MaintResult<()> {
        let api = self.mutator.inventory.api();

        for vm in &self.current.vms {
            let assignment = ResourceAssignment {
                sid: vm.sid.unwrap_or_else(|| vm.expected_sid()),
                group: self.progress.group.clone(),
                state: vm.ha_state.clone().unwrap_or_default(),
            };

            warn!("Removing {} ({}) from group {}", vm.name, assignment.sid, assignment.group);
            api.delete_ha_resource(&assignment.sid).await?;
            self.progress.drained.push(assignment);
        }
        Ok(())
    }

    async fn wait_until_empty(&mut self) -> MaintResult<()> {
        let poll = self.mutator.poll;

        while self.progress.poll_attempts < poll.max_attempts {
            self.progress.poll_attempts += 1;

            let group = self
                .mutator
                .inventory
                .get_group(&self.progress.group)
                .await?
                .ok_or_else(|| MaintError::GroupNotFound {
                    group: self.progress.group.clone(),
                })?;

            if !group.has_members() {
                info!("All VMs have been removed from group {}", group.name);
                self.current = group;
                return Ok(());
            }

            debug!(
                "Group {} still lists {} VMs (attempt {}/{})",
                group.name,
                group.vms.len(),
                self.progress.poll_attempts,
                poll.max_attempts
            );
            if self.progress.poll_attempts < poll.max_attempts {
                tokio::time::sleep(poll.interval).await;
            }
        }

        Err(MaintError::WaitTimeout {
            group: self.progress.group.clone(),
            attempts: self.progress.poll_attempts,
        })
    }

    async fn restore(&mut self) -> MaintResult<()> {
        let api = self.mutator.inventory.api();

        while self.progress.restored < self.progress.drained.len() {
            let assignment = &self.progress.drained[self.progress.restored];
            warn!(
                "Restoring {} to group {} as {}",
                assignment.sid, assignment.group, assignment.state
            );
            api.create_ha_resource(assignment).await?;
            self.progress.restored += 1;
        }
        Ok(())
    }
}
