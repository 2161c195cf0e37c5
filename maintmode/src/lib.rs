pub mod runner;

pub use runner::{MaintenanceRunner, RunOptions};

// Re-export commonly used types
pub use maintmode_core::{
    config::Settings,
    error::{MaintError, MaintResult},
    reconciler::ReconcileReport,
};
