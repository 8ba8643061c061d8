//! Readiness probes and the bounded retry loop that polls them

pub mod checks;
pub mod retry;

use async_trait::async_trait;
use std::future::Future;

pub use checks::{fetch_body, tail_lines, HttpProbe, UnixSocketProbe};
pub use retry::{PolicyError, ProbeResult, RetryPolicy};

/// Result of a single probe evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCheck {
    Ready,
    NotReady {
        /// What the collaborator said, usually the tail of its log
        diagnostic: Option<String>,
    },
}

impl ProbeCheck {
    pub fn not_ready() -> Self {
        ProbeCheck::NotReady { diagnostic: None }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeCheck::Ready)
    }

    pub fn from_bool(ready: bool) -> Self {
        if ready {
            ProbeCheck::Ready
        } else {
            ProbeCheck::not_ready()
        }
    }
}

/// A success predicate evaluated against an externally observable signal
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self) -> ProbeCheck;

    /// What is being waited on, for progress output
    fn describe(&self) -> String {
        "readiness".to_string()
    }
}

/// Probe backed by an async closure
pub struct FnProbe<F> {
    check: F,
    label: String,
}

impl<F> FnProbe<F> {
    pub fn new(check: F) -> Self {
        Self {
            check,
            label: "readiness".to_string(),
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[async_trait]
impl<F, Fut> ReadinessProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeCheck> + Send,
{
    async fn check(&self) -> ProbeCheck {
        (self.check)().await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
