//! Detached daemon startup
//!
//! There is no init system to hand daemons to, so the supervisor starts each
//! one in its own process group with output captured to a log file and then
//! lets go of it. Liveness is decided by readiness probes, never by the
//! child's exit status.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to open log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Program, arguments, and environment of a daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl DaemonCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Wrap the command in `sudo` when privileged execution is requested
    pub fn privileged(self, sudo: bool) -> Self {
        if !sudo {
            return self;
        }
        let mut args = Vec::new();
        if !self.env.is_empty() {
            let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
            args.push(format!("--preserve-env={}", keys.join(",")));
        }
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            env: self.env,
            current_dir: self.current_dir,
        }
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A daemon started by the supervisor. Its lifetime is not owned by the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub log_path: PathBuf,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

impl ProcessHandle {
    /// Last `lines` lines the daemon has written
    pub fn log_tail(&self, lines: usize) -> Option<String> {
        crate::probe::tail_lines(&self.log_path, lines)
    }
}

/// Starts detached daemons
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Start `command` detached with stdout and stderr appended to `log_path`
    pub fn spawn(&self, command: &DaemonCommand, log_path: &Path) -> Result<ProcessHandle, SupervisorError> {
        let log_err = |source| SupervisorError::Log {
            path: log_path.to_path_buf(),
            source,
        };

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(log_err)?;
        }
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_path)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(false);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        debug!("Spawning {} > {}", command.display(), log_path.display());
        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: command.display(),
            source,
        })?;

        let handle = ProcessHandle {
            pid: child.id(),
            log_path: log_path.to_path_buf(),
            command: command.display(),
            started_at: Utc::now(),
        };
        info!(
            "Started {} (pid {}), log at {}",
            command.program,
            handle.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
            log_path.display()
        );

        // Hand-off: dropping the child neither waits on nor signals it.
        drop(child);
        Ok(handle)
    }
}
