//! stackup - bootstraps a panel + agent service stack on hosts without an init system

pub mod cli;
pub mod core;
pub mod execution;
pub mod probe;
pub mod secret;
pub mod stack;

// Re-export commonly used types
pub use core::{Context, ContextDelta, Pipeline, Severity, Step, StepError, StepOutcome, StepStatus};
pub use execution::{ExecutionEngine, ExecutionEvent, ProcessSupervisor, RunResult};
pub use probe::{ProbeCheck, ReadinessProbe, RetryPolicy};
pub use secret::{Secret, SecretVault};
