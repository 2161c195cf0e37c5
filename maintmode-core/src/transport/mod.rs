//! Transport to the cluster management API
//!
//! The only transport is the Proxmox VE JSON API over HTTPS. Everything it
//! exposes to the rest of the crate goes through [`crate::api::ClusterApi`].

pub mod proxmox;

pub use proxmox::{ProxmoxClient, Session};
