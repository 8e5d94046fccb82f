//! End-to-end replication runs against the in-memory host

mod common;

use common::{at, context, replicator, with_config, FakeHost, VM_ID};
use zreplica_common::{Error, Outcome, Snapshot, SnapshotKind, TransferMode};
use zreplica_engine::replication::{delete_all, purge_all, FallbackReason, ModeRequest};

const DISK0: &str = "rpool/data/vm-100-disk-0";
const DISK1: &str = "rpool/data/vm-100-disk-1";

const FULL_0101: &str = "replicate-20250101-000000-full";

const VM_CONF: &str = "\
boot: order=scsi0
memory: 4096
onboot: 1
parent: replicate-20250101-000000-full
scsi0: local-zfs:vm-100-disk-0,size=32G

[replicate-20250101-000000-full]
memory: 4096
scsi0: local-zfs:vm-100-disk-0,size=32G
snaptime: 1735689600
";

fn chain_with_incrementals(count: u32) -> Vec<String> {
    let mut names = vec![FULL_0101.to_string()];
    for day in 0..count {
        names.push(format!("replicate-202501{:02}-000000-inc", day + 2));
    }
    names
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn test_first_run_is_full() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Auto, at(1, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Full);
    assert_eq!(report.snapshot, FULL_0101);
    assert!(report.created);
    assert!(report.is_success());
    for ds in &report.datasets {
        assert_eq!(ds.outcome, Outcome::Succeeded);
        assert_eq!(ds.mode, TransferMode::Full);
    }

    assert_eq!(host.vm_snapshots(), vec![FULL_0101]);
    assert_eq!(host.remote_snapshots(DISK0), vec![FULL_0101]);
    assert_eq!(host.remote_snapshots(DISK1), vec![FULL_0101]);
}

#[tokio::test]
async fn test_incremental_after_single_full() {
    let host = FakeHost::new(&[DISK0]);
    host.seed(&[FULL_0101]);

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Auto, at(2, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Incremental);
    assert_eq!(report.snapshot, "replicate-20250102-000000-inc");

    let ds = &report.datasets[0];
    assert_eq!(ds.outcome, Outcome::Succeeded);
    assert_eq!(ds.mode, TransferMode::Incremental);
    assert_eq!(ds.base.as_deref(), Some(FULL_0101));
    assert!(ds.fallback.is_none());

    let receives = host.receives();
    assert_eq!(receives.len(), 1);
    assert_eq!(
        receives[0].0.base.as_deref(),
        Some("rpool/data/vm-100-disk-0@replicate-20250101-000000-full")
    );

    assert!(report.pruned.deleted.is_empty());
    assert_eq!(
        host.remote_snapshots(DISK0),
        vec![FULL_0101, "replicate-20250102-000000-inc"]
    );
}

#[tokio::test]
async fn test_base_is_most_recent_older_snapshot() {
    let host = FakeHost::new(&[DISK0]);
    let chain = chain_with_incrementals(2);
    host.seed(&as_strs(&chain));

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Auto, at(9, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Incremental);
    assert_eq!(
        report.datasets[0].base.as_deref(),
        Some("replicate-20250103-000000-inc")
    );
}

#[tokio::test]
async fn test_full_chain_is_replaced_by_new_full() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    let chain = chain_with_incrementals(5);
    host.seed(&as_strs(&chain));

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Auto, at(10, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Full);
    assert_eq!(report.snapshot, "replicate-20250110-000000-full");
    assert_eq!(report.pruned.deleted.len(), 6);
    assert_eq!(report.pruned.deleted, chain);

    assert_eq!(host.vm_snapshots(), vec!["replicate-20250110-000000-full"]);
    // Remote copies were cleared before the full send
    assert_eq!(
        host.remote_snapshots(DISK0),
        vec!["replicate-20250110-000000-full"]
    );
    assert_eq!(
        host.remote_snapshots(DISK1),
        vec!["replicate-20250110-000000-full"]
    );
}

#[tokio::test]
async fn test_forced_full_leaves_one_local_snapshot() {
    let host = FakeHost::new(&[DISK0]);
    let replicator = replicator(&host);

    replicator
        .run(&context(&host, 3, ModeRequest::Auto, at(1, 0)))
        .await
        .unwrap();
    replicator
        .run(&context(&host, 3, ModeRequest::Auto, at(2, 0)))
        .await
        .unwrap();
    assert_eq!(host.vm_snapshots().len(), 2);

    let report = replicator
        .run(&context(&host, 3, ModeRequest::Full, at(3, 0)))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(host.vm_snapshots(), vec!["replicate-20250103-000000-full"]);
}

#[tokio::test]
async fn test_retention_drops_oldest_regardless_of_kind() {
    let host = FakeHost::new(&[DISK0]);
    host.seed(&[FULL_0101, "replicate-20250102-000000-inc"]);

    let report = replicator(&host)
        .run(&context(&host, 2, ModeRequest::Auto, at(3, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Incremental);
    assert_eq!(report.pruned.deleted, vec![FULL_0101]);
    assert_eq!(
        host.vm_snapshots(),
        vec!["replicate-20250102-000000-inc", "replicate-20250103-000000-inc"]
    );

    // With the full gone the next run starts a new chain
    let report = replicator(&host)
        .run(&context(&host, 2, ModeRequest::Auto, at(4, 0)))
        .await
        .unwrap();
    assert_eq!(report.kind, SnapshotKind::Full);
}

#[tokio::test]
async fn test_incremental_failure_falls_back_once() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    host.seed(&[FULL_0101]);
    host.state().fail_incremental.insert(DISK0.to_string());

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Auto, at(2, 0)))
        .await
        .unwrap();

    let disk0 = &report.datasets[0];
    assert_eq!(disk0.outcome, Outcome::Succeeded);
    assert_eq!(disk0.mode, TransferMode::IncrementalFallbackToFull);
    assert!(matches!(
        disk0.fallback,
        Some(FallbackReason::IncrementalFailed(ref msg)) if msg.contains("Connection reset")
    ));

    // Sibling dataset is unaffected
    let disk1 = &report.datasets[1];
    assert_eq!(disk1.outcome, Outcome::Succeeded);
    assert_eq!(disk1.mode, TransferMode::Incremental);

    let disk0_receives: Vec<_> = host
        .receives()
        .into_iter()
        .filter(|(_, ds)| ds == DISK0)
        .collect();
    assert_eq!(disk0_receives.len(), 2);
    assert!(disk0_receives[0].0.is_incremental());
    assert!(!disk0_receives[1].0.is_incremental());

    assert_eq!(report.fallbacks().count(), 1);
    assert!(report.is_success());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["datasets"][0]["mode"], "incremental_fallback_to_full");
    assert_eq!(json["datasets"][0]["fallback"]["reason"], "incremental_failed");
    assert_eq!(json["datasets"][1]["outcome"], "succeeded");
    assert_eq!(
        host.remote_snapshots(DISK0),
        vec!["replicate-20250102-000000-inc"]
    );
}

#[tokio::test]
async fn test_failed_fallback_is_reported_and_run_continues() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    host.seed(&[FULL_0101]);
    {
        let mut state = host.state();
        state.fail_incremental.insert(DISK0.to_string());
        state.fail_full.insert(DISK0.to_string());
    }

    let ctx = with_config(context(&host, 5, ModeRequest::Auto, at(2, 0)), VM_CONF);
    let report = replicator(&host).run(&ctx).await.unwrap();

    let disk0 = &report.datasets[0];
    assert_eq!(disk0.outcome, Outcome::Failed);
    let error = disk0.error.as_deref().unwrap();
    assert!(error.contains(DISK0));
    assert!(error.contains("incremental->full"));

    // Exactly one fallback, no retry of the fallback itself
    let disk0_receives = host
        .receives()
        .into_iter()
        .filter(|(_, ds)| ds == DISK0)
        .count();
    assert_eq!(disk0_receives, 2);

    assert_eq!(report.datasets[1].outcome, Outcome::Succeeded);
    assert!(!report.is_success());
    assert_eq!(report.failed_datasets().count(), 1);

    // Configuration is withheld, local chain still managed
    assert!(!report.config_pushed);
    assert!(host.state().pushed.is_empty());
    assert_eq!(host.vm_snapshots().len(), 2);
}

#[tokio::test]
async fn test_missing_base_degrades_to_full() {
    let host = FakeHost::new(&[DISK0]);

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Incremental, at(1, 0)))
        .await
        .unwrap();

    assert_eq!(report.kind, SnapshotKind::Incremental);
    let ds = &report.datasets[0];
    assert_eq!(ds.outcome, Outcome::Succeeded);
    assert_eq!(ds.fallback, Some(FallbackReason::NoBaseSnapshot));
    assert!(ds.base.is_none());
    assert!(ds.error.is_none());

    let receives = host.receives();
    assert_eq!(receives.len(), 1);
    assert!(!receives[0].0.is_incremental());
}

#[tokio::test]
async fn test_dataset_without_storage_is_skipped() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    host.state().missing.insert(DISK0.to_string());

    let ctx = with_config(context(&host, 5, ModeRequest::Auto, at(1, 0)), VM_CONF);
    let report = replicator(&host).run(&ctx).await.unwrap();

    assert_eq!(report.datasets[0].outcome, Outcome::SkippedNoLocalSnapshot);
    assert_eq!(report.datasets[1].outcome, Outcome::Succeeded);
    assert!(report.is_success());
    assert!(report.config_pushed);
    assert!(host.remote_snapshots(DISK0).is_empty());
}

#[tokio::test]
async fn test_listing_failure_aborts_run() {
    let host = FakeHost::new(&[DISK0]);
    host.state().listing_fails = true;

    let ctx = with_config(context(&host, 5, ModeRequest::Auto, at(1, 0)), VM_CONF);
    let err = replicator(&host).run(&ctx).await.unwrap_err();

    assert!(matches!(err, Error::SnapshotListing(_)));
    let state = host.state();
    assert_eq!(state.creations, 0);
    assert!(state.receives.is_empty());
    assert!(state.pushed.is_empty());
}

#[tokio::test]
async fn test_listing_failure_after_transfer_skips_prune_and_push() {
    let host = FakeHost::new(&[DISK0]);
    host.seed(&[FULL_0101, "replicate-20250102-000000-inc"]);
    // Initial catalog and snapshot creation succeed, the re-read fails
    host.state().fail_listing_from = Some(2);

    let ctx = with_config(context(&host, 2, ModeRequest::Auto, at(3, 0)), VM_CONF);
    let err = replicator(&host).run(&ctx).await.unwrap_err();

    assert!(matches!(err, Error::SnapshotListing(_)));
    assert_eq!(host.state().listings, 3);
    assert_eq!(
        host.remote_snapshots(DISK0),
        vec![
            FULL_0101,
            "replicate-20250102-000000-inc",
            "replicate-20250103-000000-inc"
        ]
    );

    // The oldest snapshot would normally be pruned at this retention
    assert_eq!(
        host.vm_snapshots(),
        vec![
            FULL_0101,
            "replicate-20250102-000000-inc",
            "replicate-20250103-000000-inc"
        ]
    );
    assert!(host.state().pushed.is_empty());
}

#[tokio::test]
async fn test_snapshot_creation_is_idempotent() {
    let host = FakeHost::new(&[DISK0]);
    let replicator = replicator(&host);
    let snapshot = Snapshot::new(at(1, 0), SnapshotKind::Full);

    assert!(replicator.ensure_snapshot(VM_ID, &snapshot).await.unwrap());
    assert!(!replicator.ensure_snapshot(VM_ID, &snapshot).await.unwrap());
    assert_eq!(host.state().creations, 1);

    // A rerun with the same name reuses the snapshot
    let report = replicator
        .run(&context(&host, 5, ModeRequest::Full, at(1, 0)))
        .await
        .unwrap();
    assert!(!report.created);
    assert!(report.is_success());
    assert_eq!(host.vm_snapshots(), vec![FULL_0101]);
}

#[tokio::test]
async fn test_config_pushed_sanitized_after_clean_run() {
    let host = FakeHost::new(&[DISK0]);

    let ctx = with_config(context(&host, 5, ModeRequest::Auto, at(1, 0)), VM_CONF);
    let report = replicator(&host).run(&ctx).await.unwrap();
    assert!(report.config_pushed);

    let state = host.state();
    let pushed = state.pushed.get("/etc/pve/qemu-server/100.conf").unwrap();
    assert!(pushed.contains("onboot: 0"));
    assert!(pushed.contains("scsi0: local-zfs:vm-100-disk-0,size=32G"));
    assert!(!pushed.contains("parent:"));
    assert!(!pushed.contains("snaptime"));
    assert!(!pushed.contains('['));
}

#[tokio::test]
async fn test_config_push_failure_is_reported() {
    let host = FakeHost::new(&[DISK0]);
    host.state().fail_push = true;

    let ctx = with_config(context(&host, 5, ModeRequest::Auto, at(1, 0)), VM_CONF);
    let report = replicator(&host).run(&ctx).await.unwrap();

    assert!(!report.config_pushed);
    assert!(report.config_error.is_some());
    assert!(!report.is_success());
    assert_eq!(report.datasets[0].outcome, Outcome::Succeeded);
}

#[tokio::test]
async fn test_prune_failure_does_not_fail_run() {
    let host = FakeHost::new(&[DISK0]);
    host.seed(&[FULL_0101, "replicate-20250102-000000-inc"]);
    host.state().fail_delete.insert(FULL_0101.to_string());

    let report = replicator(&host)
        .run(&context(&host, 5, ModeRequest::Full, at(3, 0)))
        .await
        .unwrap();

    assert_eq!(report.pruned.deleted, vec!["replicate-20250102-000000-inc"]);
    assert_eq!(report.pruned.failed.len(), 1);
    assert_eq!(report.pruned.failed[0].0, FULL_0101);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_delete_all_removes_only_reserved() {
    let host = FakeHost::new(&[DISK0]);
    let chain = chain_with_incrementals(2);
    host.seed(&as_strs(&chain));
    host.state().vm_snapshots.insert(0, "before-upgrade".to_string());

    let report = delete_all(host.as_ref(), VM_ID).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.deleted,
        vec![
            "replicate-20250103-000000-inc",
            "replicate-20250102-000000-inc",
            FULL_0101,
        ]
    );
    assert_eq!(host.vm_snapshots(), vec!["before-upgrade"]);
    // Replica untouched
    assert_eq!(host.remote_snapshots(DISK0).len(), 3);
}

#[tokio::test]
async fn test_delete_all_continues_past_failures() {
    let host = FakeHost::new(&[DISK0]);
    let chain = chain_with_incrementals(2);
    host.seed(&as_strs(&chain));
    host.state()
        .fail_delete
        .insert("replicate-20250102-000000-inc".to_string());

    let report = delete_all(host.as_ref(), VM_ID).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(host.vm_snapshots(), vec!["replicate-20250102-000000-inc"]);
}

#[tokio::test]
async fn test_purge_all_spans_every_dataset() {
    let host = FakeHost::new(&[DISK0, DISK1]);
    host.seed(&[FULL_0101, "replicate-20250102-000000-inc"]);
    host.state()
        .local
        .get_mut(DISK1)
        .unwrap()
        .push("before-upgrade".to_string());

    let report = purge_all(host.as_ref()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.deleted.len(), 4);
    let state = host.state();
    assert!(state.local[DISK0].is_empty());
    assert_eq!(state.local[DISK1], vec!["before-upgrade"]);
    assert_eq!(state.remote[DISK0].len(), 2);
}
