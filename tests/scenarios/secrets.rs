//! Test: credentials reach the operator before anything uses them

use crate::helpers::*;
use stackup::core::StepStatus;
use stackup::secret::{Secret, SecretVault};
use stackup::stack::panel;
use std::sync::Arc;

fn journaling_vault(journal: &Journal) -> Arc<SecretVault> {
    let journal = journal.clone();
    Arc::new(
        SecretVault::new(
            12,
            Arc::new(move |secret: &Secret| journal.record(format!("secret:{}", secret.name))),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_secret_surfaced_before_use() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let vault = journaling_vault(&journal);

    let result = run(&pipeline(vec![panel::database_provision(&config, &c, &vault)])).await;

    assert!(result.completed());
    let entries = journal.entries();
    let surfaced = entries.iter().position(|e| e == "secret:DB_PASSWORD").unwrap();
    let executed = entries
        .iter()
        .position(|e| e.starts_with("database:execute:"))
        .unwrap();
    assert!(surfaced < executed);
    assert!(journal.contains(&format!("database:login:{}", config.database.user)));

    let binding = result.context.binding("DB_PASSWORD").unwrap();
    assert!(binding.secret);
    assert_eq!(binding.value.len(), 16);
    assert_eq!(vault.get("DB_PASSWORD").unwrap().value, binding.value);
}

#[tokio::test]
async fn test_failed_login_still_surfaces_secret() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    *host.login_ok.lock().unwrap() = false;
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let vault = journaling_vault(&journal);

    let result = run(&pipeline(vec![
        panel::database_provision(&config, &c, &vault),
        panel::panel_env(&config),
    ]))
    .await;

    assert_eq!(result.failed_step(), Some("database-provision"));
    assert_eq!(result.not_run, vec!["panel-env"]);
    assert!(journal.contains("secret:DB_PASSWORD"));
    assert_eq!(vault.secrets().len(), 1);
    assert!(!result.context.contains("DB_PASSWORD"));

    let outcome = result.outcome("database-provision").unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("Failed to connect"));
    assert!(outcome.diagnostic.as_deref().unwrap().contains("Access denied"));
}

#[tokio::test]
async fn test_existing_admin_mints_no_password() {
    let journal = Journal::new();
    let host = FakeHost::new(&journal);
    let config = Arc::new(fast_config());
    let c = host.collaborators(&config);
    let vault = journaling_vault(&journal);

    let result = run(&pipeline(vec![panel::panel_admin(&config, &c, &vault)])).await;

    assert_eq!(result.outcome("panel-admin").unwrap().status, StepStatus::Skipped);
    assert!(vault.get("ADMIN_PASSWORD").is_none());
    assert!(!journal.contains("secret:ADMIN_PASSWORD"));
}

#[test]
fn test_each_name_is_generated_once() {
    let vault = SecretVault::new(12, Arc::new(|_: &Secret| {})).unwrap();
    let first = vault.generate("DB_PASSWORD").unwrap();
    assert!(vault.generate("DB_PASSWORD").is_err());
    let second = vault.generate("ADMIN_PASSWORD").unwrap();
    assert_ne!(first.value, second.value);
}
