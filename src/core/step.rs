//! Step domain model

use crate::core::{
    context::{Context, ContextDelta},
    error::StepError,
    state::Severity,
};
use crate::probe::{ReadinessProbe, RetryPolicy};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;

/// The side-effecting part of a step
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Run against a snapshot of the context and return new bindings
    async fn run(&self, ctx: Context) -> Result<ContextDelta, StepError>;
}

/// Decides whether a step's action can be skipped
#[async_trait]
pub trait IdempotencyCheck: Send + Sync {
    async fn is_satisfied(&self) -> bool;
}

/// Adapter turning an async closure into a [`StepAction`]
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ContextDelta, StepError>> + Send,
{
    async fn run(&self, ctx: Context) -> Result<ContextDelta, StepError> {
        (self.0)(ctx).await
    }
}

/// Adapter turning an async closure into an [`IdempotencyCheck`]
pub struct FnCheck<F>(F);

#[async_trait]
impl<F, Fut> IdempotencyCheck for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn is_satisfied(&self) -> bool {
        (self.0)().await
    }
}

/// Readiness probe plus the policy it is polled with
pub struct ProbeSpec {
    pub probe: Box<dyn ReadinessProbe>,
    pub retry: RetryPolicy,
}

/// One provisioning unit in a pipeline
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// Whether a failure halts the pipeline
    pub severity: Severity,

    check: Option<Box<dyn IdempotencyCheck>>,
    action: Box<dyn StepAction>,
    probe: Option<ProbeSpec>,
}

impl Step {
    /// Create a fatal step with no idempotency check and no probe
    pub fn new(id: impl Into<String>, action: impl StepAction + 'static) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            severity: Severity::Fatal,
            check: None,
            action: Box::new(action),
            probe: None,
        }
    }

    /// Create a step from an async closure
    pub fn from_fn<F, Fut>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ContextDelta, StepError>> + Send + 'static,
    {
        Self::new(id, FnAction(action))
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the step as non-fatal
    pub fn soft(mut self) -> Self {
        self.severity = Severity::Soft;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Skip the action when the check reports the work is already done
    pub fn skip_if(mut self, check: impl IdempotencyCheck + 'static) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    pub fn skip_if_fn<F, Fut>(self, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.skip_if(FnCheck(check))
    }

    /// Poll a readiness probe after the action (or after a skip)
    pub fn probe(mut self, probe: impl ReadinessProbe + 'static, retry: RetryPolicy) -> Self {
        self.probe = Some(ProbeSpec {
            probe: Box::new(probe),
            retry,
        });
        self
    }

    pub fn check(&self) -> Option<&dyn IdempotencyCheck> {
        self.check.as_deref()
    }

    pub fn action(&self) -> &dyn StepAction {
        self.action.as_ref()
    }

    pub fn probe_spec(&self) -> Option<&ProbeSpec> {
        self.probe.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("has_check", &self.check.is_some())
            .field("retry", &self.probe.as_ref().map(|p| p.retry))
            .finish()
    }
}
