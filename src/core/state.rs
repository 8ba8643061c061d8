//! Execution state models

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a step failure affects the rest of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure halts the pipeline immediately
    Fatal,
    /// Failure is recorded and execution continues
    Soft,
}

/// Live state of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// Not reached yet
    Pending,
    /// Idempotency check or action in progress
    Running,
    /// Waiting for the readiness probe
    Probing { attempt: u32, max_attempts: u32 },
    /// Action skipped because the step was already satisfied
    Skipped,
    /// Action (and probe, if any) succeeded
    Ready,
    /// Action, probe, or context update failed
    Failed { error: String },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Skipped | StepState::Ready | StepState::Failed { .. }
        )
    }
}

/// Terminal state reported for a finished step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Skipped,
    Ready,
    Failed,
}

impl StepStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Ready => "READY",
            StepStatus::Failed => "FAILED",
        }
    }
}

/// Overall pipeline status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Running,
    /// Every step reached a terminal state without a fatal failure
    Complete,
    /// A fatal step failed; nothing after it ran
    Aborted { step: String },
}

/// Result of one step, as recorded by the engine
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub severity: Severity,
    pub status: StepStatus,

    /// Rendered error (kind and message) when the step failed
    pub error: Option<String>,

    /// Error taxonomy label when the step failed
    pub error_kind: Option<&'static str>,

    /// Last collaborator output captured for the failure
    pub diagnostic: Option<String>,

    /// Probe evaluations performed (0 when no probe ran)
    pub probe_attempts: u32,

    /// Time spent polling the probe
    pub probe_elapsed: Option<Duration>,

    /// Wall time of the whole step
    pub elapsed: Duration,

    /// Names this step bound into the context
    pub bound: Vec<String>,
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_fatal_failure(&self) -> bool {
        self.is_failed() && self.severity == Severity::Fatal
    }
}
