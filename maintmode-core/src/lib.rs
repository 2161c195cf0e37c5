//! Keeps Proxmox VE HA groups in line with a per-node placement policy.
//!
//! Data flows one way per pass: [`inventory`] reads the cluster,
//! [`reconciler`] plans against [`policy`], [`mutator`] applies the plan and
//! the inventory is read again to verify.

pub mod api;
pub mod config;
pub mod error;
pub mod inventory;
pub mod mutator;
pub mod policy;
pub mod reconciler;
pub mod report;
pub mod transport;
pub mod types;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use api::ClusterApi;
pub use config::Settings;
pub use error::{MaintError, MaintResult};
pub use inventory::ClusterInventory;
pub use mutator::{GroupMutator, PollConfig, UpdatePhase, UpdateProgress};
pub use policy::{GroupKind, GroupPolicy};
pub use reconciler::{plan, GroupAction, ReconcileReport, Reconciler};
pub use transport::ProxmoxClient;
