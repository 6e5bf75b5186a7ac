use std::time::Duration;

use procdeck::models::debug::DebugSession;
use procdeck::models::process_state::TerminationReason;
use procdeck::reconcile::{Reconciler, StateChanged};
use procdeck::storage::{encode_pid, StoreArea};

use super::test_helpers::{host, host_from, test_config};

fn codes() -> Vec<String> {
    vec!["SRV".to_owned(), "JOBS".to_owned()]
}

#[tokio::test]
async fn first_tick_reports_every_code_then_settles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let host = host(temp.path(), &temp.path().join("store"));
    let engine = Reconciler::new(&host.ctx, codes());

    assert!(engine.state("SRV").is_none());
    let first = engine.refresh().expect("initial change");
    assert_eq!(first.codes, codes());
    assert_eq!(engine.refresh(), None);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].code, "SRV");
    assert_eq!(snapshot[1].code, "JOBS");
    assert!(snapshot.iter().all(|state| !state.alive && !state.locked));
}

#[tokio::test]
async fn observes_another_instance() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let ours = temp.path().join("ours");
    let theirs = temp.path().join("theirs");
    std::fs::create_dir(&ours).expect("mkdir");
    std::fs::create_dir(&theirs).expect("mkdir");

    let observer = host(&ours, &storage);
    let other = host(&theirs, &storage);
    let engine = Reconciler::new(&observer.ctx, codes());
    engine.refresh();

    let handle = other
        .ctx
        .tracker()
        .spawn("SRV", "echo up; exec sleep 30", &[], &[])
        .await
        .expect("spawn succeeds");

    let change = engine.refresh().expect("spawn observed");
    assert_eq!(change.codes, vec!["SRV".to_owned()]);
    let state = engine.state("SRV").expect("state");
    assert!(state.alive);
    assert!(!state.has_output, "sink belongs to the other instance");
    assert_eq!(state.workspace_hash.as_deref(), Some(other.ctx.workspace.hash()));
    assert!(!state.owned_by_workspace);

    // Stop from the observing instance; the owner classifies the exit.
    observer.ctx.tracker().stop("SRV").await.expect("stop");
    let outcome = handle.wait().await.expect("supervisor");
    assert_eq!(outcome.reason, TerminationReason::UserRequested);

    let change = engine.refresh().expect("stop observed");
    assert_eq!(change.codes, vec!["SRV".to_owned()]);
    let state = engine.state("SRV").expect("state");
    assert!(!state.alive);
    assert_eq!(state.termination_reason, TerminationReason::UserRequested);
    assert_eq!(state.workspace_hash, None);
}

#[tokio::test]
async fn own_process_is_owned_by_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let host = host(temp.path(), &temp.path().join("store"));
    let engine = Reconciler::new(&host.ctx, codes());
    let tracker = host.ctx.tracker();

    let handle = tracker
        .spawn("JOBS", "echo up; exec sleep 30", &[], &[])
        .await
        .expect("spawn succeeds");
    engine.refresh();

    let state = engine.state("JOBS").expect("state");
    assert!(state.alive);
    assert!(state.has_output);
    assert!(state.owned_by_workspace);

    tracker.stop("JOBS").await.expect("stop");
    handle.wait().await.expect("supervisor");
}

#[tokio::test]
async fn lock_changes_are_observed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let observer = host(temp.path(), &storage);
    let other = host(temp.path(), &storage);
    let engine = Reconciler::new(&observer.ctx, codes());
    engine.refresh();

    let locks = other.ctx.locks();
    locks
        .acquire("JOBS", Duration::from_secs(1), Duration::from_millis(20))
        .await
        .expect("acquire");
    assert_eq!(
        engine.refresh(),
        Some(StateChanged {
            codes: vec!["JOBS".to_owned()]
        })
    );
    assert!(engine.state("JOBS").expect("state").locked);

    locks.release("JOBS").expect("release");
    assert!(engine.refresh().is_some());
    assert!(!engine.state("JOBS").expect("state").locked);
}

#[tokio::test]
async fn crash_without_local_output_is_not_surfaced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let owner = host(temp.path(), &storage);
    let observer = host(temp.path(), &storage);

    owner
        .ctx
        .tracker()
        .spawn("SRV", "echo up; sleep 0.2; exit 1", &[], &[])
        .await
        .expect("spawn succeeds")
        .wait()
        .await
        .expect("supervisor");

    let remote = Reconciler::new(&observer.ctx, codes());
    remote.refresh();
    let state = remote.state("SRV").expect("state");
    assert_eq!(state.recorded_reason, TerminationReason::Crashed);
    assert_eq!(state.termination_reason, TerminationReason::None);
    assert!(!state.has_output);

    let local = Reconciler::new(&owner.ctx, codes());
    local.refresh();
    let state = local.state("SRV").expect("state");
    assert_eq!(state.termination_reason, TerminationReason::Crashed);
    assert!(state.has_output);

    // The durable record keeps the crash.
    assert_eq!(
        observer.ctx.tracker().termination_reason("SRV"),
        TerminationReason::Crashed
    );
}

#[tokio::test]
async fn debug_sessions_toggle_debug_active() {
    let temp = tempfile::tempdir().expect("tempdir");
    let host = host(temp.path(), &temp.path().join("store"));
    let engine = Reconciler::new(&host.ctx, codes());
    engine.refresh();

    engine.register_debug_session("JOBS", DebugSession::new("node", "wrong adapter"));
    assert_eq!(engine.refresh(), None);

    let session = DebugSession::new("rdbg", "Attach SRV");
    let id = session.id;
    engine.register_debug_session("SRV", session);
    let change = engine.refresh().expect("debug observed");
    assert_eq!(change.codes, vec!["SRV".to_owned()]);
    assert!(engine.state("SRV").expect("state").debug_active);

    // A replacement engine sees registrations made through the old one.
    let replacement = Reconciler::new(&host.ctx, codes());
    replacement.refresh();
    assert!(replacement.state("SRV").expect("state").debug_active);

    engine.unregister_debug_session(id);
    assert!(engine.refresh().is_some());
    assert!(!engine.state("SRV").expect("state").debug_active);
}

#[tokio::test]
async fn timer_emits_consolidated_changes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let observer = host(temp.path(), &storage);
    let other = host(temp.path(), &storage);

    let engine = Reconciler::start(&observer.ctx, codes());
    let mut changes = engine.subscribe();

    let initial = tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("initial tick")
        .expect("channel open");
    assert_eq!(initial.codes, codes());

    let locks = other.ctx.locks();
    locks
        .acquire("SRV", Duration::from_secs(1), Duration::from_millis(20))
        .await
        .expect("acquire SRV");
    locks
        .acquire("JOBS", Duration::from_secs(1), Duration::from_millis(20))
        .await
        .expect("acquire JOBS");

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .expect("lock change observed")
            .expect("channel open");
        seen.extend(change.codes);
    }
    seen.sort();
    assert_eq!(seen, vec!["JOBS".to_owned(), "SRV".to_owned()]);

    locks.release("SRV").expect("release");
    locks.release("JOBS").expect("release");
    engine.dispose();
}

#[tokio::test]
async fn dispose_is_idempotent_and_stops_ticking() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let observer = host(temp.path(), &storage);

    let engine = Reconciler::start(&observer.ctx, codes());
    let mut changes = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("initial tick")
        .expect("channel open");

    assert!(!engine.is_disposed());
    engine.dispose();
    engine.dispose();
    assert!(engine.is_disposed());
    while changes.try_recv().is_ok() {}

    observer
        .ctx
        .store
        .write(StoreArea::Locks, "SRV", &encode_pid(std::process::id()))
        .expect("lock record");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), changes.recv())
            .await
            .is_err(),
        "no ticks after dispose"
    );
    assert_eq!(engine.refresh(), None);
    observer.ctx.store.delete(StoreArea::Locks, "SRV").expect("cleanup");
}

#[tokio::test]
async fn storage_events_trigger_early_ticks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let storage = temp.path().join("store");
    let mut config = test_config(temp.path(), &storage);
    config.watch_state_dir = true;
    config.timeouts.poll_interval_ms = 60_000;
    let observer = host_from(config);
    let other = host(temp.path(), &storage);
    // Watch the area directory from the start instead of racing its creation.
    std::fs::create_dir_all(storage.join(StoreArea::Locks.dir_name())).expect("mkdir");

    let engine = Reconciler::start(&observer.ctx, codes());
    let mut changes = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("initial tick")
        .expect("channel open");

    let locks = other.ctx.locks();
    locks
        .acquire("SRV", Duration::from_secs(1), Duration::from_millis(20))
        .await
        .expect("acquire");

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("watcher woke the reconciler")
        .expect("channel open");
    assert_eq!(change.codes, vec!["SRV".to_owned()]);

    locks.release("SRV").expect("release");
    engine.dispose();
}
