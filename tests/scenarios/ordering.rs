//! Test: steps run strictly in declaration order, one at a time

use crate::helpers::*;
use stackup::core::{PipelineStatus, StepState, StepStatus};

#[tokio::test]
async fn test_steps_run_in_declaration_order() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("packages", &journal, &[]),
        recording_step("database", &journal, &[]),
        recording_step("panel", &journal, &[]),
    ]);

    let result = run(&p).await;

    assert_eq!(result.status, PipelineStatus::Complete);
    assert_eq!(
        journal.entries(),
        vec!["action:packages", "action:database", "action:panel"]
    );
    let ids: Vec<&str> = result.outcomes.iter().map(|o| o.step_id.as_str()).collect();
    assert_eq!(ids, vec!["packages", "database", "panel"]);
    assert!(result.outcomes.iter().all(|o| o.status == StepStatus::Ready));
}

#[tokio::test]
async fn test_each_step_reaches_terminal_state_before_next_starts() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("first", &journal, &[]),
        recording_step("second", &journal, &[]),
    ]);

    let (_, states) = run_recording_states(&p).await;

    let first_ready = states
        .iter()
        .position(|(id, s)| id == "first" && *s == StepState::Ready)
        .unwrap();
    let second_running = states
        .iter()
        .position(|(id, s)| id == "second" && *s == StepState::Running)
        .unwrap();
    assert!(first_ready < second_running);
}

#[tokio::test]
async fn test_context_flows_forward() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("host-compatibility", &journal, &[("VIRT_TYPE", "kvm")]),
        consuming_step("report", &journal, "VIRT_TYPE"),
    ]);

    let result = run(&p).await;

    assert!(result.completed());
    assert!(journal.contains("action:report:kvm"));
    let binding = result.context.binding("VIRT_TYPE").unwrap();
    assert_eq!(binding.bound_by, "host-compatibility");
}
