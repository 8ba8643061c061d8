//! Test: soft failures are recorded and the pipeline continues

use crate::helpers::*;
use stackup::core::{PipelineStatus, Severity, StepStatus};

#[tokio::test]
async fn test_soft_failure_continues() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("queue-worker", &journal, &[]),
        failing_step("scheduler-cron", &journal, "crontab not found").soft(),
        recording_step("panel-public-check", &journal, &[]),
    ]);

    let result = run(&p).await;

    assert_eq!(result.status, PipelineStatus::Complete);
    assert_eq!(result.exit_code(), 0);
    assert!(journal.contains("action:panel-public-check"));

    let cron = result.outcome("scheduler-cron").unwrap();
    assert_eq!(cron.status, StepStatus::Failed);
    assert_eq!(cron.severity, Severity::Soft);
    assert!(!cron.is_fatal_failure());
    assert_eq!(result.failures().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_soft_probe_timeout_continues() {
    let journal = Journal::new();
    let evaluations = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let p = pipeline(vec![
        recording_step("swap", &journal, &[])
            .soft()
            .probe(counting_probe(0, evaluations), policy(1, 2)),
        recording_step("panel-download", &journal, &[]),
    ]);

    let result = run(&p).await;

    assert!(result.completed());
    assert_eq!(result.outcome("swap").unwrap().error_kind, Some("ProbeTimeout"));
    assert!(journal.contains("action:panel-download"));
}
