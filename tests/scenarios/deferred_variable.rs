//! Test: values discovered late are bound once and only read afterwards

use crate::helpers::*;
use stackup::core::{PipelineStatus, StepError, StepStatus};
use stackup::stack::{daemons, panel};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_reading_unbound_name_is_dependency_unresolved() {
    let journal = Journal::new();
    let p = pipeline(vec![
        consuming_step("panel-public-url", &journal, "PUBLIC_URL"),
        recording_step("tunnel-endpoint", &journal, &[("PUBLIC_URL", "https://late.example")]),
    ]);

    let result = run(&p).await;

    let outcome = result.outcome("panel-public-url").unwrap();
    assert_eq!(outcome.status, StepStatus::Failed);
    assert_eq!(outcome.error_kind, Some("DependencyUnresolved"));
    assert!(outcome.error.as_deref().unwrap().contains("PUBLIC_URL"));
    assert!(!journal.contains("action:tunnel-endpoint"));
}

#[tokio::test]
async fn test_panel_public_url_without_endpoint_writes_nothing() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.panel.dir = dir.path().to_path_buf();
    let config = Arc::new(config);
    let c = host.collaborators(&config);

    let result = run(&pipeline(vec![
        panel::panel_public_url(&config, &c),
        panel::panel_env(&config),
    ]))
    .await;

    assert_eq!(result.failed_step(), Some("panel-public-url"));
    assert_eq!(result.not_run, vec!["panel-env"]);
    let outcome = result.outcome("panel-public-url").unwrap();
    assert_eq!(outcome.error_kind, Some("DependencyUnresolved"));
    assert!(outcome.error.as_deref().unwrap().contains("PUBLIC_URL"));
    assert!(!dir.path().join(".env").exists());
}

#[tokio::test]
async fn test_rebinding_a_name_is_a_conflict() {
    let journal = Journal::new();
    let p = pipeline(vec![
        recording_step("tunnel-endpoint", &journal, &[("PUBLIC_URL", "https://first.example")]),
        recording_step("other", &journal, &[("PUBLIC_URL", "https://second.example")]),
    ]);

    let result = run(&p).await;

    assert_eq!(result.outcome("other").unwrap().error_kind, Some("ContextConflict"));
    assert_eq!(result.context.get("PUBLIC_URL"), Some("https://first.example"));
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_endpoint_is_discovered_then_consumed() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    *host.endpoint.lock().unwrap() = Some("https://ab12.ngrok-free.app".to_string());
    // idempotency check and first probe evaluation see no endpoint yet
    host.endpoint_after.store(2, Ordering::SeqCst);

    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let p = pipeline(vec![
        daemons::tunnel(&config, &c),
        daemons::tunnel_endpoint(&c),
        consuming_step("panel-public-url", &journal, "PUBLIC_URL"),
    ]);

    let result = run(&p).await;

    assert!(result.completed());
    assert!(journal.contains("tunnel:start:80"));
    let tunnel = result.outcome("tunnel").unwrap();
    assert_eq!(tunnel.probe_attempts, 2);
    assert_eq!(tunnel.probe_elapsed, Some(Duration::from_secs(1)));
    assert_eq!(result.outcome("tunnel-endpoint").unwrap().bound, vec!["PUBLIC_URL"]);
    assert!(journal.contains("action:panel-public-url:https://ab12.ngrok-free.app"));
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_without_endpoint_never_binds_public_url() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);

    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let p = pipeline(vec![
        daemons::tunnel(&config, &c),
        daemons::tunnel_endpoint(&c),
        consuming_step("panel-public-url", &journal, "PUBLIC_URL"),
    ]);

    let result = run(&p).await;

    assert_eq!(
        result.status,
        PipelineStatus::Aborted {
            step: "tunnel".to_string()
        }
    );
    let tunnel = result.outcome("tunnel").unwrap();
    assert_eq!(tunnel.error_kind, Some("ProbeTimeout"));
    assert_eq!(tunnel.probe_attempts, 5);
    assert!(result.context.get("PUBLIC_URL").is_none());
    assert!(!journal.entries().iter().any(|e| e.starts_with("action:panel-public-url")));
}

#[tokio::test]
async fn test_endpoint_step_fails_when_tunnel_has_no_url() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let step = daemons::tunnel_endpoint(&c);

    let err = step.action().run(stackup::core::Context::new()).await.unwrap_err();
    assert!(matches!(err, StepError::Action { .. }));
    assert!(err.to_string().contains("tunnel URL"));
}
