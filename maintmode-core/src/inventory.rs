//! Cluster inventory reader
//!
//! Assembles sorted, denormalized snapshots from the raw API collections:
//! nodes annotated with their running VMs, and HA groups annotated with the
//! VMs assigned to them. Nothing is cached; every call re-reads the API.

use std::sync::Arc;
use tracing::debug;

use crate::api::ClusterApi;
use crate::error::{MaintError, MaintResult};
use crate::types::{HaGroup, Node, RunningVm, Sid, Vm};

/// Reader for nodes, VMs and HA groups
#[derive(Clone)]
pub struct ClusterInventory {
    api: Arc<dyn ClusterApi>,
}

impl ClusterInventory {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    /// All nodes sorted by name, each with its running VMs sorted by name
    pub async fn list_nodes(&self) -> MaintResult<Vec<Node>> {
        let mut records = self.api.nodes().await?;
        records.sort_by(|a, b| a.node.cmp(&b.node));

        let vms = self.list_vms().await?;

        let nodes: Vec<Node> = records
            .into_iter()
            .map(|record| {
                // `vms` is already sorted by name, so the filtered list is too
                let running_vms = vms
                    .iter()
                    .filter(|vm| vm.node == record.node && vm.status.is_running())
                    .map(|vm| RunningVm {
                        name: vm.name.clone(),
                        status: vm.status.clone(),
                    })
                    .collect();
                Node {
                    node: record.node,
                    status: record.status,
                    running_vms,
                }
            })
            .collect();

        debug!("Read {} nodes", nodes.len());
        Ok(nodes)
    }

    /// QEMU VMs sorted by name; containers and other resources are dropped
    pub async fn list_vms(&self) -> MaintResult<Vec<Vm>> {
        let resources = self.api.cluster_resources().await?;
        let mut vms: Vec<Vm> = resources.iter().filter_map(Vm::from_resource).collect();
        vms.sort_by(|a, b| a.name.cmp(&b.name).then(a.vmid.cmp(&b.vmid)));

        debug!("Read {} VMs out of {} cluster resources", vms.len(), resources.len());
        Ok(vms)
    }

    /// HA groups sorted by name, optionally restricted to one exact name
    ///
    /// Each group's `vms` lists the VMs assigned to it through an HA resource,
    /// sorted by name and annotated with the resource SID and requested state. An assignment whose
    /// SID matches no VM in the inventory fails with
    /// [`MaintError::StaleAssignment`].
    pub async fn list_groups(&self, name: Option<&str>) -> MaintResult<Vec<HaGroup>> {
        let mut records = self.api.ha_groups().await?;
        records.sort_by(|a, b| a.group.cmp(&b.group));
        if let Some(name) = name {
            records.retain(|record| record.group == name);
        }

        let mut resources = self.api.ha_resources().await?;
        resources.sort_by(|a, b| a.sid.cmp(&b.sid));

        let vms = self.list_vms().await?;

        let mut groups = Vec::with_capacity(records.len());
        for record in records {
            let mut group = HaGroup::from_record(record)?;

            for resource in resources
                .iter()
                .filter(|r| r.group.as_deref() == Some(group.name.as_str()))
            {
                let mut vm = vms
                    .iter()
                    .find(|vm| vm.expected_sid().to_string() == resource.sid)
                    .cloned()
                    .ok_or_else(|| MaintError::StaleAssignment {
                        sid: resource.sid.clone(),
                        group: group.name.clone(),
                    })?;

                vm.sid = Some(resource.sid.parse::<Sid>()?);
                // `hastate` can be a transient manager state (migrate, fence)
                // that the API refuses on create; the requested state cannot
                if let Some(state) = &resource.state {
                    vm.ha_state = Some(state.clone());
                }
                group.vms.push(vm);
            }

            group.vms.sort_by(|a, b| a.name.cmp(&b.name));
            groups.push(group);
        }

        debug!("Read {} HA groups", groups.len());
        Ok(groups)
    }

    /// The single group with this exact name, if it exists
    pub async fn get_group(&self, name: &str) -> MaintResult<Option<HaGroup>> {
        Ok(self.list_groups(Some(name)).await?.into_iter().next())
    }
}
