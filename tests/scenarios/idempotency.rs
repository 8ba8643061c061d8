//! Test: satisfied steps skip their action and touch nothing

use crate::helpers::*;
use stackup::core::{StepState, StepStatus};
use stackup::stack::daemons;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_satisfied_check_skips_action() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("composer", &journal, &[("COMPOSER", "installed")]).skip_if_fn(|| async { true }),
        recording_step("panel-download", &journal, &[]),
    ]);

    let (result, states) = run_recording_states(&p).await;

    assert_eq!(journal.entries(), vec!["action:panel-download"]);
    let composer = result.outcome("composer").unwrap();
    assert_eq!(composer.status, StepStatus::Skipped);
    assert!(composer.bound.is_empty());
    assert!(!result.context.contains("COMPOSER"));
    assert!(states.contains(&("composer".to_string(), StepState::Skipped)));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_daemon_step_still_probes() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    *host.db_up.lock().unwrap() = true;
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);

    let result = run(&pipeline(vec![daemons::database_server(&config, &c)])).await;

    let outcome = result.outcome("database-server").unwrap();
    assert_eq!(outcome.status, StepStatus::Skipped);
    assert_eq!(outcome.probe_attempts, 1);
    assert!(!journal.contains("database:start"));
}

#[tokio::test(start_paused = true)]
async fn test_skipped_step_with_failing_probe_fails() {
    let journal = Journal::new();
    let evaluations = Arc::new(AtomicU32::new(0));
    let p = pipeline(vec![recording_step("cache-server", &journal, &[])
        .skip_if_fn(|| async { true })
        .probe(counting_probe(0, evaluations.clone()), policy(1, 3))]);

    let result = run(&p).await;

    assert_eq!(result.outcome("cache-server").unwrap().status, StepStatus::Failed);
    assert_eq!(evaluations.load(Ordering::SeqCst), 3);
    assert!(journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rerun_skips_what_the_first_run_did() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let p = pipeline(vec![daemons::database_server(&config, &c)]);

    let first = run(&p).await;
    let second = run(&p).await;

    assert_eq!(first.outcome("database-server").unwrap().status, StepStatus::Ready);
    assert_eq!(second.outcome("database-server").unwrap().status, StepStatus::Skipped);
    assert_eq!(
        journal.entries().iter().filter(|e| *e == "database:start").count(),
        1
    );
}
