//! Foreground command execution for step actions and checks

use crate::core::StepError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lines of command output kept as a diagnostic
const DIAGNOSTIC_LINES: usize = 40;

/// A command to run to completion
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dir: Option<PathBuf>,
    stdin: Option<String>,
    timeout: Option<Duration>,
    sensitive: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
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
        self.dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Arguments carry credentials; only the program name is ever logged
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        if self.sensitive {
            return format!("{} [arguments hidden]", self.program);
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `sudo --preserve-env=K,.. program args...`; values stay in the environment
    fn privileged(self) -> Self {
        let mut args: Vec<String> = Vec::new();
        if !self.env.is_empty() {
            let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
            args.push(format!("--preserve-env={}", keys.join(",")));
        }
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            ..self
        }
    }
}

/// Shorthand for [`Invocation::new`]
pub fn cmd(program: impl Into<String>) -> Invocation {
    Invocation::new(program)
}

/// `sh -c <script>`
pub fn sh(script: impl Into<String>) -> Invocation {
    Invocation::new("sh").arg("-c").arg(script)
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr if present, otherwise stdout, trimmed to the last lines
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..].join("\n")
    }
}

/// Runs commands to completion, optionally through sudo
#[derive(Debug, Clone, Default)]
pub struct Shell {
    sudo: bool,
}

impl Shell {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    /// Run and capture output; only a failure to start is an error
    pub async fn output(&self, invocation: Invocation) -> Result<CommandOutput, StepError> {
        let invocation = if self.sudo {
            invocation.privileged()
        } else {
            invocation
        };
        let shown = invocation.display();
        debug!("Running {}", shown);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| StepError::action(format!("Failed to execute {}: {}", shown, e)))?;

        if let Some(input) = &invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| StepError::action(format!("Failed to write stdin of {}: {}", shown, e)))?;
            }
        }

        let output = match invocation.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| StepError::action(format!("{} timed out after {:?}", shown, limit)))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| StepError::action(format!("Failed to execute {}: {}", shown, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and require a zero exit status; returns stdout
    pub async fn run(&self, invocation: Invocation) -> Result<String, StepError> {
        let shown = invocation.display();
        let output = self.output(invocation).await?;
        if !output.success() {
            let code = output.code.unwrap_or(-1);
            warn!("{} exited with code {}", shown, code);
            return Err(StepError::action_with(
                format!("{} exited with code {}", shown, code),
                output.diagnostic(),
            ));
        }
        Ok(output.stdout)
    }

    /// True when the command starts and exits successfully
    pub async fn succeeds(&self, invocation: Invocation) -> bool {
        matches!(self.output(invocation).await, Ok(output) if output.success())
    }
}

/// Whether `binary` resolves on `PATH` (or is an existing path)
pub fn on_path(binary: &str) -> bool {
    if binary.contains('/') {
        return Path::new(binary).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

/// Whether every binary resolves on `PATH`
pub fn all_on_path(binaries: &[&str]) -> bool {
    binaries.iter().all(|b| on_path(b))
}
