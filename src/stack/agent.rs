//! Game-server agent: install, configure, and run in the foreground

use crate::core::config::StackConfig;
use crate::core::template::{render, write_config};
use crate::core::{Context, ContextDelta, Step, StepError};
use crate::stack::services::Collaborators;
use crate::stack::shell::{cmd, Shell};
use crate::stack::templates;
use anyhow::{Context as _, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Release architecture suffix for a Rust target architecture
pub fn release_arch(arch: &str) -> &'static str {
    if arch == "x86_64" {
        "amd64"
    } else {
        "arm64"
    }
}

pub fn agent_install(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let binary = config.agent.binary.clone();
    Step::from_fn("agent-install", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let agent = &cfg.agent;
            for dir in [&agent.config_dir, &agent.data_dir, &agent.log_dir] {
                shell.run(cmd("mkdir").arg("-p").arg(dir.display().to_string())).await?;
            }
            let url = format!(
                "{}/wings_linux_{}",
                agent.release_url_base.trim_end_matches('/'),
                release_arch(std::env::consts::ARCH)
            );
            let target = agent.binary.display().to_string();
            shell
                .run(cmd("curl").args(["-fL", "-o", target.as_str(), url.as_str()]))
                .await?;
            shell.run(cmd("chmod").args(["u+x", target.as_str()])).await?;
            if !agent.binary.exists() {
                return Err(StepError::action(format!("Agent binary missing at {}", target)));
            }
            info!("Agent installed at {}", target);
            Ok(ContextDelta::none())
        }
    })
    .describe("Install the wings agent")
    .skip_if_fn(move || {
        let exists = binary.exists();
        async move { exists }
    })
}

pub fn agent_config(config: &Arc<StackConfig>) -> Step {
    let path = config.agent.config_dir.join("config.yml");
    let check_path = path.clone();
    Step::from_fn("agent-config", move |ctx: Context| {
        let path = path.clone();
        async move {
            let contents = render(templates::AGENT_CONFIG, &ctx, &HashMap::new())?;
            write_config(&path, &contents).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Configure the agent for host networking")
    .skip_if_fn(move || {
        let exists = check_path.exists();
        async move { exists }
    })
}

/// First address printed by `hostname -I`
pub fn primary_address(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

/// Print the host address, then run the agent attached to this terminal.
/// Returns the agent's exit code.
pub async fn run_foreground(config: &StackConfig) -> Result<i32> {
    let shell = Shell::new(config.sudo);
    match shell.run(cmd("hostname").arg("-I")).await {
        Ok(out) => match primary_address(&out) {
            Some(ip) => println!("IP Address: {}", ip),
            None => warn!("hostname -I printed no address"),
        },
        Err(e) => warn!("Failed to retrieve IP address: {}", e),
    }

    tokio::fs::create_dir_all(&config.agent.log_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.agent.log_dir.display()))?;

    let binary = config.agent.binary.display().to_string();
    let mut command = if config.sudo {
        let mut c = Command::new("sudo");
        c.arg(&binary);
        c
    } else {
        Command::new(&binary)
    };
    command.current_dir(&config.agent.config_dir);

    info!("Starting {} in the foreground; stop it with Ctrl-C", binary);
    let status = command
        .status()
        .await
        .with_context(|| format!("Failed to start {}", binary))?;
    Ok(status.code().unwrap_or(1))
}
