//! Integration tests for admission control: validation, capacity,
//! duplicate handling, and stale-entry reclamation.

use std::sync::Arc;

use hls_relay::session::{output_dir_for, RequesterMeta, Session};
use hls_relay::supervisor::StartOutcome;
use hls_relay::{AppError, Supervisor};

use super::test_helpers::{test_config, write_engine, READY_ENGINE};

// ── Input validation ─────────────────────────────────────────

#[tokio::test]
async fn rejects_disallowed_scheme_without_side_effects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let root = dir.path().join("streams");
    let supervisor = Supervisor::new(test_config(&root, &engine, 4));

    let err = supervisor
        .start_session("file:///etc/passwd", "cam1", RequesterMeta::default())
        .await
        .expect_err("should reject");
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(supervisor.registry().live_count(), 0);
    assert!(!root.join("cam1").exists());
}

#[tokio::test]
async fn rejects_empty_session_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let supervisor = Supervisor::new(test_config(&dir.path().join("streams"), &engine, 4));

    let err = supervisor
        .start_session("rtsp://cam.local/ch0", "  ", RequesterMeta::default())
        .await
        .expect_err("should reject");
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(supervisor.registry().live_count(), 0);
}

// ── Capacity ─────────────────────────────────────────────────

#[tokio::test]
async fn over_capacity_start_is_rejected_and_spawns_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let root = dir.path().join("streams");
    let supervisor = Supervisor::new(test_config(&root, &engine, 1));

    let first = supervisor
        .start_session("rtsp://cam.local/ch0", "cam1", RequesterMeta::default())
        .await
        .expect("first start");
    assert!(matches!(first, StartOutcome::Started { .. }));

    let err = supervisor
        .start_session("rtsp://cam.local/ch1", "cam2", RequesterMeta::default())
        .await
        .expect_err("should reject");
    match err {
        AppError::CapacityExceeded { active, max } => {
            assert_eq!(active, 1);
            assert_eq!(max, 1);
        }
        other => panic!("expected CapacityExceeded, got {other}"),
    }

    // Nothing was spawned for the rejected id.
    assert_eq!(supervisor.registry().live_count(), 1);
    assert!(!root.join("cam2").exists());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn racing_starts_cannot_oversubscribe_the_cap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let supervisor = Arc::new(Supervisor::new(test_config(
        &dir.path().join("streams"),
        &engine,
        1,
    )));

    // Eight distinct ids contend for one slot at the same time; the
    // admission claim must hand out exactly one.
    let mut tasks = Vec::new();
    for n in 0..8 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move {
            supervisor
                .start_session(
                    "rtsp://cam.local/ch0",
                    &format!("cam{n}"),
                    RequesterMeta::default(),
                )
                .await
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(StartOutcome::Started { .. }) => admitted += 1,
            Ok(StartOutcome::AlreadyActive { .. }) => panic!("ids are distinct"),
            Err(AppError::CapacityExceeded { max: 1, .. }) => {}
            Err(other) => panic!("expected CapacityExceeded, got {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(supervisor.registry().live_count(), 1);

    supervisor.stop_all().await;
}

// ── Duplicate ids ────────────────────────────────────────────

#[tokio::test]
async fn racing_starts_for_one_id_spawn_a_single_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let supervisor = Arc::new(Supervisor::new(test_config(
        &dir.path().join("streams"),
        &engine,
        4,
    )));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(async move {
            supervisor
                .start_session("rtsp://cam.local/ch0", "cam1", RequesterMeta::default())
                .await
        }));
    }

    let mut fresh = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(StartOutcome::Started { .. }) => fresh += 1,
            // Losers either observe the live winner or arrive while its
            // start is still in flight.
            Ok(StartOutcome::AlreadyActive { .. }) | Err(AppError::StartInProgress(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(supervisor.registry().live_count(), 1);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn live_duplicate_returns_already_active_without_second_spawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let supervisor = Supervisor::new(test_config(&dir.path().join("streams"), &engine, 4));

    let first = supervisor
        .start_session("rtsp://cam.local/ch0", "cam1", RequesterMeta::default())
        .await
        .expect("first start");
    let StartOutcome::Started { descriptor } = first else {
        panic!("expected fresh start");
    };

    let second = supervisor
        .start_session("rtsp://cam.local/ch0", "cam1", RequesterMeta::default())
        .await
        .expect("second start");
    match second {
        StartOutcome::AlreadyActive { descriptor: existing } => {
            assert_eq!(existing.id, descriptor.id);
            assert_eq!(existing.manifest_url, descriptor.manifest_url);
            assert_eq!(existing.started_at, descriptor.started_at);
        }
        StartOutcome::Started { .. } => panic!("must not spawn a second process"),
    }

    assert_eq!(supervisor.registry().live_count(), 1);
    supervisor.stop_all().await;
}

#[tokio::test]
async fn stale_entry_is_reclaimed_and_metrics_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = write_engine(dir.path(), READY_ENGINE);
    let root = dir.path().join("streams");
    let config = test_config(&root, &engine, 4);
    let supervisor = Supervisor::new(Arc::clone(&config));

    // Plant a registry entry whose process has already exited, with
    // non-zero counters, bypassing the exit watcher.
    let output_dir = output_dir_for(&config.output_root, "cam1");
    std::fs::create_dir_all(&output_dir).expect("mkdir");
    let child = tokio::process::Command::new("sh")
        .args(["-c", "exit 0"])
        .kill_on_drop(true)
        .spawn()
        .expect("spawn");
    let stale = Arc::new(Session::new(
        "cam1".to_owned(),
        "rtsp://cam.local/ch0".to_owned(),
        output_dir,
        child,
        RequesterMeta::default(),
    ));
    for _ in 0..5 {
        stale.metrics.apply(&hls_relay::classify::EngineEvent::Error {
            fatal: false,
            detail: "old failure".into(),
        });
    }
    supervisor.registry().insert(Arc::clone(&stale));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // A fresh start under the same id purges the stale record first.
    let outcome = supervisor
        .start_session("rtsp://cam.local/ch0", "cam1", RequesterMeta::default())
        .await
        .expect("restart");
    assert!(matches!(outcome, StartOutcome::Started { .. }));

    let metrics = supervisor
        .registry()
        .metrics_for("cam1")
        .expect("fresh metrics");
    assert_eq!(metrics.snapshot().error_count, 0);
    assert_eq!(supervisor.registry().live_count(), 1);

    supervisor.stop_all().await;
}
