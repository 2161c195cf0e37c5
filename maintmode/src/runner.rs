use std::sync::Arc;

use maintmode_core::{
    api::ClusterApi,
    config::Settings,
    error::MaintResult,
    inventory::ClusterInventory,
    mutator::GroupMutator,
    policy::GroupPolicy,
    reconciler::{ReconcileReport, Reconciler},
    report::{GroupTable, NodeTable},
    transport::ProxmoxClient,
};

/// Switches for a single run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Plan only, issue no mutating calls
    pub dry_run: bool,
    /// Log the node and group tables at info level instead of debug
    pub show_inventory: bool,
}

/// One maintenance run against a cluster
///
/// Wires the inventory reader, the group mutator and the reconciler around a
/// single authenticated API session. The session is held for the lifetime of
/// the runner.
pub struct MaintenanceRunner {
    inventory: ClusterInventory,
    reconciler: Reconciler,
    options: RunOptions,
}

impl MaintenanceRunner {
    /// Log in to the management API and build a runner around the session
    pub async fn connect(settings: &Settings, options: RunOptions) -> MaintResult<Self> {
        tracing::info!("Logging in to {} as {}", settings.api.host, settings.api.username);
        let client = ProxmoxClient::login(&settings.api).await?;
        Ok(Self::with_api(Arc::new(client), settings, options))
    }

    /// Build a runner around an existing API implementation
    pub fn with_api(api: Arc<dyn ClusterApi>, settings: &Settings, options: RunOptions) -> Self {
        let inventory = ClusterInventory::new(api);
        let mutator = GroupMutator::new(inventory.clone(), settings.update.poll_config());
        let reconciler = Reconciler::new(mutator, GroupPolicy::new(settings.groups.clone()))
            .with_dry_run(options.dry_run);

        Self {
            inventory,
            reconciler,
            options,
        }
    }

    pub async fn run(&self) -> MaintResult<ReconcileReport> {
        self.log_inventory().await?;

        let report = self.reconciler.run().await?;

        tracing::info!(
            "Run finished: {} created, {} updated, {} unchanged",
            report.created.len(),
            report.updated.len(),
            report.unchanged.len()
        );
        if report.dry_run && !report.planned.is_empty() {
            tracing::info!("Dry run: {} change(s) not applied", report.planned.len());
        }
        Ok(report)
    }

    async fn log_inventory(&self) -> MaintResult<()> {
        if !self.options.show_inventory && !tracing::enabled!(tracing::Level::DEBUG) {
            return Ok(());
        }

        let nodes = self.inventory.list_nodes().await?;
        let groups = self.inventory.list_groups(None).await?;

        if self.options.show_inventory {
            tracing::info!("\n{}", NodeTable(&nodes));
            tracing::info!("\n{}", GroupTable(&groups));
        } else {
            tracing::debug!("\n{}", NodeTable(&nodes));
            tracing::debug!("\n{}", GroupTable(&groups));
        }
        Ok(())
    }
}
