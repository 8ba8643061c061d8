//! Test: a fatal failure stops the pipeline and later steps never run

use crate::helpers::*;
use stackup::core::{PipelineStatus, StepStatus};

#[tokio::test]
async fn test_fatal_failure_stops_pipeline() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("packages", &journal, &[]),
        failing_step("database-server", &journal, "mariadbd exited"),
        recording_step("database-provision", &journal, &[]),
        recording_step("panel-env", &journal, &[]),
    ]);

    let result = run(&p).await;

    assert_eq!(
        result.status,
        PipelineStatus::Aborted {
            step: "database-server".to_string()
        }
    );
    assert_eq!(result.exit_code(), 1);
    assert!(!journal.contains("action:database-provision"));
    assert!(!journal.contains("action:panel-env"));
    assert_eq!(result.not_run, vec!["database-provision", "panel-env"]);

    let failed = result.outcome("database-server").unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.error_kind, Some("ActionError"));
    assert_eq!(result.last_diagnostic(), Some("last lines of the daemon log"));
}

#[tokio::test]
async fn test_first_step_failure_runs_nothing_else() {
    let journal = Journal::new();
    let p = pipeline(vec![
        failing_step("system-packages", &journal, "apt-get exited with code 100"),
        recording_step("package-repositories", &journal, &[]),
    ]);

    let result = run(&p).await;

    assert_eq!(result.outcomes.len(), 1);
    assert_eq!(journal.entries(), vec!["action:system-packages"]);
    assert_eq!(result.failed_step(), Some("system-packages"));
}
