//! Group creation, deletion and membership updates against the fake cluster

use maintmode_core::test_helpers::{FakeCluster, FakeOperation, MutationCall};
use maintmode_core::types::{GroupMember, HaState, Membership, NodeStatus};
use maintmode_core::{ClusterInventory, GroupMutator, MaintError, PollConfig, UpdatePhase};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn poll(max_attempts: u32) -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(1),
        max_attempts,
    }
}

fn mutator_for(cluster: &Arc<FakeCluster>) -> GroupMutator {
    GroupMutator::new(ClusterInventory::new(cluster.clone()), poll(20))
}

fn three_nodes() -> FakeCluster {
    FakeCluster::new()
        .with_node("prox01", NodeStatus::Online)
        .with_node("prox02", NodeStatus::Online)
        .with_node("prox03", NodeStatus::Offline)
}

proptest! {
    #[test]
    fn test_created_membership_reads_back(
        entries in prop::collection::btree_map("[a-z][a-z0-9]{0,7}", 0u32..1000, 1..6)
    ) {
        let members: Membership = entries
            .into_iter()
            .map(|(node, priority)| GroupMember::new(node, priority))
            .collect();

        let cluster = Arc::new(three_nodes());
        let mutator = mutator_for(&cluster);
        let group = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(mutator.create_group("roundtrip", &members))
            .unwrap();

        prop_assert_eq!(group.members.sorted(), members.sorted());
    }
}

#[tokio::test]
async fn test_create_duplicate_group_fails_with_creation_error() {
    let cluster = Arc::new(three_nodes().with_group("g", "prox01:100"));
    let mutator = mutator_for(&cluster);

    let err = mutator
        .create_group("g", &Membership::parse("prox02:100").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, MaintError::GroupCreation { .. }));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(err.http_status(), Some(500));
}

#[tokio::test]
async fn test_delete_nonempty_group_issues_no_requests() {
    let cluster = Arc::new(
        three_nodes()
            .with_vm(100, "web", "prox01", "running")
            .with_group("g", "prox01:100")
            .with_assignment(100, "g", HaState::Started),
    );
    let mutator = mutator_for(&cluster);
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();

    let err = mutator.delete_group(&group).await.unwrap_err();

    assert_eq!(err.exit_code(), 6);
    assert!(matches!(err, MaintError::GroupNotEmpty { .. }));
    assert_eq!(cluster.mutations(), Vec::<MutationCall>::new());
    assert_eq!(cluster.group_names(), vec!["g".to_string()]);
}

#[tokio::test]
async fn test_update_moves_members_to_new_membership() {
    let cluster = Arc::new(
        three_nodes()
            .with_vm(100, "web", "prox01", "running")
            .with_vm(101, "db", "prox02", "stopped")
            .with_vm(102, "cache", "prox03", "running")
            .with_group("g", "prox01:100,prox02:100")
            .with_group("other", "prox03:100")
            .with_assignment(100, "g", HaState::Started)
            .with_assignment(101, "g", HaState::Stopped)
            .with_assignment(102, "other", HaState::Started)
            .with_settle_reads(3),
    );
    let mutator = mutator_for(&cluster);
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();
    let desired = Membership::parse("prox01:100,prox02:1,prox03:1").unwrap();

    let updated = mutator.update_group(&group, &desired).await.unwrap();

    assert_eq!(updated.members.sorted(), desired.sorted());
    assert_eq!(
        cluster.assignments_of("g"),
        vec![
            ("vm:100".to_string(), HaState::Started),
            ("vm:101".to_string(), HaState::Stopped),
        ]
    );
    assert_eq!(
        cluster.assignments_of("other"),
        vec![("vm:102".to_string(), HaState::Started)]
    );

    // The old group must be gone before the new one is created
    let mutations = cluster.mutations();
    let deleted = mutations
        .iter()
        .position(|m| matches!(m, MutationCall::DeleteGroup { .. }))
        .unwrap();
    let created = mutations
        .iter()
        .position(|m| matches!(m, MutationCall::CreateGroup { .. }))
        .unwrap();
    assert!(deleted < created);
}

#[tokio::test]
async fn test_update_bounded_wait_on_stuck_cluster() {
    let cluster = Arc::new(
        three_nodes()
            .with_vm(100, "web", "prox01", "running")
            .with_group("g", "prox01:100")
            .with_assignment(100, "g", HaState::Started)
            .with_stuck_deletions(),
    );
    let mutator = GroupMutator::new(ClusterInventory::new(cluster.clone()), poll(7));
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();
    let before = cluster.read_count(FakeOperation::HaGroups);

    let err = mutator
        .update_group(&group, &Membership::parse("prox02:100").unwrap())
        .await
        .unwrap_err();

    assert_eq!(cluster.read_count(FakeOperation::HaGroups) - before, 7);
    match &err {
        MaintError::GroupUpdate { progress, source, .. } => {
            assert_eq!(progress.phase, UpdatePhase::Draining);
            assert_eq!(progress.pending().len(), 1);
            assert!(matches!(**source, MaintError::WaitTimeout { attempts: 7, .. }));
        }
        other => panic!("Expected GroupUpdate, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 6);
}

#[tokio::test]
async fn test_update_recreate_failure_keeps_creation_exit_code() {
    let cluster = Arc::new(
        three_nodes()
            .with_group("g", "prox01:100")
            .fail_on(FakeOperation::CreateGroup, 500),
    );
    let mutator = mutator_for(&cluster);
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();

    let err = mutator
        .update_group(&group, &Membership::parse("prox02:100").unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 5);
    assert!(cluster.group_names().is_empty());
}

#[tokio::test]
async fn test_update_aborts_when_a_member_cannot_be_removed() {
    let cluster = Arc::new(
        three_nodes()
            .with_vm(100, "alpha", "prox01", "running")
            .with_vm(101, "bravo", "prox01", "running")
            .with_vm(102, "charlie", "prox02", "stopped")
            .with_group("g", "prox01:100")
            .with_assignment(100, "g", HaState::Started)
            .with_assignment(101, "g", HaState::Started)
            .with_assignment(102, "g", HaState::Stopped)
            .fail_after(FakeOperation::DeleteResource, 2, 503),
    );
    let mutator = mutator_for(&cluster);
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();

    let err = mutator
        .update_group(&group, &Membership::parse("prox02:100").unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 6);
    match &err {
        MaintError::GroupUpdate { progress, source, .. } => {
            assert_eq!(progress.phase, UpdatePhase::Draining);
            let pending: Vec<String> =
                progress.pending().iter().map(|a| a.sid.to_string()).collect();
            assert_eq!(pending, vec!["vm:100".to_string(), "vm:101".to_string()]);
            assert_eq!(source.http_status(), Some(503));
        }
        other => panic!("Expected GroupUpdate, got {:?}", other),
    }

    // Nothing past the failed delete was touched
    assert_eq!(
        cluster.assignments_of("g"),
        vec![("vm:102".to_string(), HaState::Stopped)]
    );
    assert_eq!(cluster.group_names(), vec!["g".to_string()]);
}

#[tokio::test]
async fn test_delete_rejected_by_cluster_is_deletion_error() {
    let cluster = Arc::new(
        three_nodes()
            .with_group("g", "prox01:100")
            .fail_on(FakeOperation::DeleteGroup, 500),
    );
    let mutator = mutator_for(&cluster);
    let group = mutator.inventory().get_group("g").await.unwrap().unwrap();

    let err = mutator.delete_group(&group).await.unwrap_err();

    assert!(matches!(err, MaintError::GroupDeletion { .. }));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(err.http_status(), Some(500));
    assert_eq!(cluster.group_names(), vec!["g".to_string()]);
}
