//! Test: probes are polled on a fixed interval within a bounded attempt budget

use crate::helpers::*;
use stackup::core::{StepError, StepState, StepStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_ready_on_first_check_does_not_wait() {
    let journal = Journal::new();
    let evaluations = Arc::new(AtomicU32::new(0));
    let p = pipeline(vec![recording_step("database-server", &journal, &[])
        .probe(counting_probe(1, evaluations.clone()), policy(1, 30))]);

    let result = run(&p).await;

    let outcome = result.outcome("database-server").unwrap();
    assert_eq!(outcome.status, StepStatus::Ready);
    assert_eq!(outcome.probe_attempts, 1);
    assert_eq!(outcome.probe_elapsed, Some(Duration::ZERO));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_on_third_check() {
    let journal = Journal::new();
    let evaluations = Arc::new(AtomicU32::new(0));
    let p = pipeline(vec![recording_step("container-runtime", &journal, &[])
        .probe(counting_probe(3, evaluations), policy(2, 15))]);

    let (result, states) = run_recording_states(&p).await;

    let outcome = result.outcome("container-runtime").unwrap();
    assert_eq!(outcome.probe_attempts, 3);
    assert_eq!(outcome.probe_elapsed, Some(Duration::from_secs(4)));

    let attempts: Vec<u32> = states
        .iter()
        .filter_map(|(_, s)| match s {
            StepState::Probing { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_exactly_max_attempts() {
    let journal = Journal::new();
    let evaluations = Arc::new(AtomicU32::new(0));
    let p = pipeline(vec![
        recording_step("database-server", &journal, &[])
            .probe(counting_probe(0, evaluations.clone()), policy(1, 30)),
        recording_step("cache-server", &journal, &[]),
    ]);

    let result = run(&p).await;

    let outcome = result.outcome("database-server").unwrap();
    assert_eq!(outcome.error_kind, Some("ProbeTimeout"));
    assert_eq!(outcome.probe_attempts, 30);
    // No sleep after the final evaluation
    assert_eq!(outcome.probe_elapsed, Some(Duration::from_secs(29)));
    assert_eq!(evaluations.load(Ordering::SeqCst), 30);
    assert_eq!(outcome.diagnostic.as_deref(), Some("not ready on evaluation 30"));
    assert!(!journal.contains("action:cache-server"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_is_not_probed() {
    let journal = Journal::new();
    let evaluations = Arc::new(AtomicU32::new(0));
    let p = pipeline(vec![failing_step("web-server", &journal, "nginx: bind() failed")
        .probe(counting_probe(1, evaluations.clone()), policy(1, 15))]);

    let result = run(&p).await;

    let outcome = result.outcome("web-server").unwrap();
    assert_eq!(outcome.error_kind, Some("ActionError"));
    assert_eq!(outcome.probe_attempts, 0);
    assert_eq!(evaluations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_probe_timeout_error_names_attempts() {
    let err = StepError::ProbeTimeout {
        attempts: 15,
        diagnostic: None,
    };
    assert!(err.to_string().contains("15"));
}
