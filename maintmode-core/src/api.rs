use async_trait::async_trait;

use crate::error::MaintResult;
use crate::types::{
    ClusterResource, HaGroupRecord, HaResourceRecord, Membership, NodeRecord, ResourceAssignment,
    Sid,
};

/// Abstract interface to the cluster management API
///
/// The inventory reader and the group mutator only talk to the cluster
/// through this trait. [`crate::transport::ProxmoxClient`] implements it over
/// HTTPS; tests use the in-memory `FakeCluster`.
///
/// Reads return the full, unpaginated collection in whatever order the API
/// produced it. Mutations are independent requests: a successful return only
/// means the API accepted the request, and callers re-read to observe the
/// effect.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `GET /nodes`
    async fn nodes(&self) -> MaintResult<Vec<NodeRecord>>;

    /// `GET /cluster/resources`
    async fn cluster_resources(&self) -> MaintResult<Vec<ClusterResource>>;

    /// `GET /cluster/ha/groups`
    async fn ha_groups(&self) -> MaintResult<Vec<HaGroupRecord>>;

    /// `GET /cluster/ha/resources`
    async fn ha_resources(&self) -> MaintResult<Vec<HaResourceRecord>>;

    /// `POST /cluster/ha/groups`
    async fn create_ha_group(&self, name: &str, members: &Membership) -> MaintResult<()>;

    /// `DELETE /cluster/ha/groups/{name}`
    async fn delete_ha_group(&self, name: &str) -> MaintResult<()>;

    /// `POST /cluster/ha/resources`
    async fn create_ha_resource(&self, assignment: &ResourceAssignment) -> MaintResult<()>;

    /// `DELETE /cluster/ha/resources/{sid}`
    async fn delete_ha_resource(&self, sid: &Sid) -> MaintResult<()>;
}
