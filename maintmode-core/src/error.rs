//! Error types for maintmode
//!
//! Every failure in an inventory read, a group mutation or a reconciliation
//! pass is reported as a [`MaintError`]. The engine never terminates the
//! process itself: errors travel up to the binary, which maps them onto the
//! process exit codes with [`MaintError::exit_code`].
//!
//! ## Exit codes
//!
//! ```text
//! 1  configuration, transport reads, inconsistent remote state
//! 2  authentication rejected by the management API
//! 5  HA group creation failed, also when recreating during an update
//! 6  HA group deletion / update failed (including a non-empty group,
//!    an exhausted drain wait and a failed member restoration)
//! ```

use thiserror::Error;

use crate::mutator::UpdateProgress;

/// Exit code for authentication failures
pub const EXIT_AUTHENTICATION: i32 = 2;
/// Exit code for group creation failures
pub const EXIT_GROUP_CREATION: i32 = 5;
/// Exit code for group deletion and update failures
pub const EXIT_GROUP_MUTATION: i32 = 6;
/// Exit code for everything else
pub const EXIT_GENERAL: i32 = 1;

#[derive(Error, Debug)]
pub enum MaintError {
    #[error("Authentication failed: {status} {reason}")]
    Authentication { status: u16, reason: String },

    #[error("Request '{operation}' failed")]
    Request {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request '{operation}' returned {status} {reason}")]
    Transport {
        operation: String,
        status: u16,
        reason: String,
    },

    #[error("Failed to decode response for '{operation}'")]
    Deserialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error creating group {group}")]
    GroupCreation {
        group: String,
        #[source]
        source: Box<MaintError>,
    },

    #[error("Error deleting group {group}")]
    GroupDeletion {
        group: String,
        #[source]
        source: Box<MaintError>,
    },

    #[error("Cannot delete group {group}: it still has {members} member(s)")]
    GroupNotEmpty { group: String, members: usize },

    #[error("Updating group {group} failed while {}", .progress.phase)]
    GroupUpdate {
        group: String,
        progress: Box<UpdateProgress>,
        #[source]
        source: Box<MaintError>,
    },

    #[error("Group {group} not found")]
    GroupNotFound { group: String },

    #[error("HA resource {sid} in group {group} does not match any VM")]
    StaleAssignment { sid: String, group: String },

    #[error("Group {group} still had members after {attempts} polls")]
    WaitTimeout { group: String, attempts: u32 },

    #[error("Invalid resource SID '{0}'")]
    InvalidSid(String),

    #[error("Configuration error in {component}: {message}")]
    Configuration { component: String, message: String },
}

pub type MaintResult<T> = std::result::Result<T, MaintError>;

impl MaintError {
    /// Create a configuration error for a component
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        MaintError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Wrap a `reqwest` failure with the operation that was running
    pub fn request(operation: impl Into<String>, source: reqwest::Error) -> Self {
        MaintError::Request {
            operation: operation.into(),
            source,
        }
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self {
            MaintError::Authentication { .. } => EXIT_AUTHENTICATION,
            MaintError::GroupCreation { .. } => EXIT_GROUP_CREATION,
            // Recreating the group is part of an update and keeps its own code
            MaintError::GroupUpdate { source, .. }
                if matches!(**source, MaintError::GroupCreation { .. }) =>
            {
                EXIT_GROUP_CREATION
            }
            MaintError::GroupDeletion { .. }
            | MaintError::GroupNotEmpty { .. }
            | MaintError::GroupUpdate { .. }
            | MaintError::WaitTimeout { .. } => EXIT_GROUP_MUTATION,
            _ => EXIT_GENERAL,
        }
    }

    /// HTTP status carried by this error or its immediate cause
    pub fn http_status(&self) -> Option<u16> {
        match self {
            MaintError::Authentication { status, .. } | MaintError::Transport { status, .. } => {
                Some(*status)
            }
            MaintError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            MaintError::GroupCreation { source, .. }
            | MaintError::GroupDeletion { source, .. }
            | MaintError::GroupUpdate { source, .. } => source.http_status(),
            _ => None,
        }
    }
}
