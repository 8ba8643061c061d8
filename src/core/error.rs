//! Step failure taxonomy

use crate::core::context::ContextError;
use crate::secret::SecretError;
use std::path::PathBuf;
use thiserror::Error;

/// Error produced by a step's action, probe, or config rendering
#[derive(Debug, Error)]
pub enum StepError {
    /// An external command or collaborator call failed
    #[error("{message}")]
    Action {
        message: String,
        diagnostic: Option<String>,
    },

    /// The readiness predicate never held within the retry budget
    #[error("not ready after {attempts} attempts")]
    ProbeTimeout {
        attempts: u32,
        diagnostic: Option<String>,
    },

    /// A required context variable was never bound
    #[error("required variable '{name}' was never bound")]
    DependencyUnresolved { name: String },

    /// A step tried to rebind an existing context variable
    #[error("variable '{name}' is already bound")]
    ContextConflict { name: String },

    /// Rendering or persisting configuration failed
    #[error("failed to write {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl StepError {
    /// Action failure without collaborator output
    pub fn action(message: impl Into<String>) -> Self {
        StepError::Action {
            message: message.into(),
            diagnostic: None,
        }
    }

    /// Action failure carrying a diagnostic excerpt (usually a log tail)
    pub fn action_with(message: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        StepError::Action {
            message: message.into(),
            diagnostic: if diagnostic.trim().is_empty() {
                None
            } else {
                Some(diagnostic)
            },
        }
    }

    pub fn config_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StepError::ConfigWrite {
            path: path.into(),
            source,
        }
    }

    /// The most recent collaborator output captured with this error
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            StepError::Action { diagnostic, .. } | StepError::ProbeTimeout { diagnostic, .. } => {
                diagnostic.as_deref()
            }
            _ => None,
        }
    }

    /// Short taxonomy label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Action { .. } => "ActionError",
            StepError::ProbeTimeout { .. } => "ProbeTimeout",
            StepError::DependencyUnresolved { .. } => "DependencyUnresolved",
            StepError::ContextConflict { .. } => "ContextConflict",
            StepError::ConfigWrite { .. } => "ConfigWriteError",
            StepError::Secret(_) => "SecretError",
        }
    }
}

impl From<ContextError> for StepError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Unresolved { name } => StepError::DependencyUnresolved { name },
            ContextError::Conflict { name, .. } => StepError::ContextConflict { name },
        }
    }
}
