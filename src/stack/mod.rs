//! The panel + agent stack as one fixed pipeline

pub mod agent;
pub mod daemons;
pub mod host;
pub mod panel;
pub mod services;
pub mod shell;
pub mod templates;

use crate::core::config::StackConfig;
use crate::core::{Pipeline, PipelineError};
use crate::execution::RunResult;
use crate::secret::SecretVault;
use std::sync::Arc;

pub use services::{
    CacheEngine, Collaborators, ContainerInfo, ContainerRuntime, DatabaseEngine, PackageManager, Tunnel, WebServer,
};
pub use shell::Shell;

/// Build the stack pipeline; order is fixed and each step depends only on
/// the ones before it.
pub fn build_pipeline(
    config: &StackConfig,
    collaborators: &Collaborators,
    vault: &Arc<SecretVault>,
) -> Result<Pipeline, PipelineError> {
    let config = Arc::new(config.clone());
    let c = collaborators;
    let steps = vec![
        host::system_packages(c),
        host::package_repositories(&config, c),
        host::runtime_packages_step(&config, c),
        daemons::database_server(&config, c),
        daemons::cache_server(&config, c),
        host::composer(&config, c),
        host::host_compatibility(c),
        host::container_runtime_install(&config, c),
        daemons::container_runtime(&config, c),
        host::swap(&config, c),
        panel::panel_download(&config, c),
        panel::database_provision(&config, c, vault),
        panel::panel_env(&config),
        panel::panel_dependencies(&config, c),
        panel::panel_app_key(&config, c),
        panel::panel_migrate(&config, c),
        panel::panel_admin(&config, c, vault),
        panel::panel_permissions(&config, c),
        daemons::php_fpm(&config, c),
        daemons::web_config(&config, c),
        daemons::web_server(&config, c),
        daemons::tunnel_install(&config, c),
        daemons::tunnel_config(&config),
        daemons::tunnel(&config, c),
        daemons::tunnel_endpoint(c),
        panel::panel_public_url(&config, c),
        panel::queue_worker(&config, c),
        panel::scheduler_cron(&config, c),
        panel::panel_public_check(c),
        agent::agent_install(&config, c),
        agent::agent_config(&config),
    ];
    Pipeline::new(config.name.clone(), steps)
}

/// Closing instructions for the operator
pub fn summary_notes(config: &StackConfig, result: &RunResult) -> Vec<String> {
    let public_url = result.context.get("PUBLIC_URL");
    let mut notes = Vec::new();
    match public_url {
        Some(url) => notes.push(format!("Panel is accessible at: {}", url)),
        None => notes.push(format!(
            "Panel public URL was not discovered; local address is {}",
            config.panel.local_url
        )),
    }
    notes.push(format!(
        "Admin login: {} / {}",
        config.panel.admin_username, config.panel.admin_email
    ));
    if result.completed() {
        notes.push(format!(
            "Create a location and node in the panel, then run: cd {} && {} configure --panel-url {} --token <node_token> --node <node_id>",
            config.agent.config_dir.display(),
            config.agent.binary.display(),
            public_url.unwrap_or("<panel_url>")
        ));
        notes.push("Then start the agent in the foreground with: stackup agent".to_string());
    }
    notes
}
