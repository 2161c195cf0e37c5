//! Full runs against the in-memory cluster

use maintmode::{MaintenanceRunner, RunOptions, Settings};
use maintmode_core::test_helpers::{FakeCluster, MutationCall};
use maintmode_core::types::NodeStatus;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.update.poll_interval = Duration::from_millis(1);
    settings.groups.any_name = "ha_any".to_string();
    settings
}

fn cluster() -> Arc<FakeCluster> {
    Arc::new(
        FakeCluster::new()
            .with_node("prox01", NodeStatus::Online)
            .with_node("prox02", NodeStatus::Online)
            .with_vm(100, "web", "prox01", "running"),
    )
}

#[tokio::test]
async fn test_run_converges_with_configured_names() {
    let cluster = cluster();
    let runner = MaintenanceRunner::with_api(cluster.clone(), &settings(), RunOptions::default());

    let report = runner.run().await.unwrap();

    assert_eq!(report.created.len(), 5);
    assert!(cluster.group_names().contains(&"ha_any".to_string()));
    assert_eq!(cluster.group_nodes("ha_any").as_deref(), Some("prox01:100,prox02:100"));
}

#[tokio::test]
async fn test_dry_run_with_inventory_tables() {
    let cluster = cluster();
    let options = RunOptions {
        dry_run: true,
        show_inventory: true,
    };
    let runner = MaintenanceRunner::with_api(cluster.clone(), &settings(), options);

    let report = runner.run().await.unwrap();

    assert_eq!(cluster.mutations(), Vec::<MutationCall>::new());
    assert_eq!(report.planned.len(), 5);
    assert!(report.dry_run);
}
