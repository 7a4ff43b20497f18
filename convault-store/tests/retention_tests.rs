mod support;

use convault_store::{
    create_retention_scheduler, ConversationStore, RetentionSweeper, Role, StoreConfig,
    SweepState,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use support::{open_store, test_config};

/// Config whose message rows are expired the moment they are written.
fn expired_config() -> StoreConfig {
    StoreConfig {
        message_retention: Duration::ZERO,
        analysis_retention: Duration::ZERO,
        ..test_config()
    }
}

#[test]
fn sweep_deletes_expired_rows_and_certifies() {
    let store = open_store(&expired_config());
    for i in 0..3 {
        store
            .store("U1", &format!("m{i}"), Role::User, "counsel", "text", "stale")
            .unwrap();
    }
    store.store_analysis("U1", "sentiment", "{}").unwrap();

    let sweeper = RetentionSweeper::new(store.clone());
    assert_eq!(sweeper.state(), SweepState::Idle);

    let summary = sweeper.sweep().unwrap();
    assert_eq!(summary.messages_deleted, 3);
    assert_eq!(summary.analysis_deleted, 1);
    assert_eq!(summary.batches, 2);
    let cert_id = summary.certificate_id.unwrap();

    assert!(store.fetch("U1", 10).unwrap().is_empty());
    assert!(store.fetch_analysis("U1", 10).unwrap().is_empty());

    // The certificate was persisted and counts what was deleted.
    let certs = store.certificates(10).unwrap();
    assert_eq!(certs.len(), 1);
    assert_eq!(certs[0].certificate_id, cert_id);
    assert!(certs[0].subject.starts_with("retention-sweep-"));
    let total: usize = certs[0].deleted.iter().map(|tc| tc.rows_deleted).sum();
    assert_eq!(total, 4);
}

#[test]
fn second_sweep_is_a_no_op() {
    let store = open_store(&expired_config());
    store
        .store("U1", "m1", Role::User, "counsel", "text", "stale")
        .unwrap();

    let sweeper = RetentionSweeper::new(store.clone());
    assert_eq!(sweeper.sweep().unwrap().total_deleted(), 1);

    let second = sweeper.sweep().unwrap();
    assert_eq!(second.total_deleted(), 0);
    assert!(second.certificate_id.is_none());
    // No second certificate either.
    assert_eq!(store.certificates(10).unwrap().len(), 1);
}

#[test]
fn unexpired_rows_survive_a_sweep() {
    let store = open_store(&test_config());
    store
        .store("U1", "m1", Role::User, "counsel", "text", "fresh")
        .unwrap();
    store.store_analysis("U1", "sentiment", "{}").unwrap();

    let summary = RetentionSweeper::new(store.clone()).sweep().unwrap();
    assert_eq!(summary.total_deleted(), 0);

    assert_eq!(store.fetch("U1", 10).unwrap().len(), 1);
    assert_eq!(store.fetch_analysis("U1", 10).unwrap().len(), 1);
}

#[test]
fn large_backlog_is_deleted_in_batches() {
    let store = open_store(&expired_config());
    for i in 0..1_100 {
        store
            .store("U1", &format!("m{i}"), Role::User, "counsel", "text", "stale")
            .unwrap();
    }

    let summary = RetentionSweeper::new(store.clone()).sweep().unwrap();
    assert_eq!(summary.messages_deleted, 1_100);
    // 500 + 500 + 100
    assert_eq!(summary.batches, 3);
    assert_eq!(
        store
            .audit()
            .count_for_event("scheduled_deletion")
            .unwrap(),
        3
    );
    assert!(store.fetch("U1", 10).unwrap().is_empty());
}

#[tokio::test]
async fn scheduler_runs_manual_sweeps() {
    let store = open_store(&expired_config());
    store
        .store("U1", "m1", Role::User, "counsel", "text", "stale")
        .unwrap();

    let sweeper = RetentionSweeper::new(store.clone());
    let (scheduler, handle) = create_retention_scheduler(sweeper, Duration::from_secs(3_600));
    let task = tokio::spawn(scheduler.run());

    handle.sweep_now().await.unwrap();
    // Give the blocking sweep a moment to land.
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if fetch_len(&store) == 0 {
            break;
        }
    }
    assert_eq!(fetch_len(&store), 0);

    handle.stop().await.unwrap();
    task.await.unwrap();
}

fn fetch_len(store: &ConversationStore) -> usize {
    store.fetch("U1", 10).unwrap().len()
}
