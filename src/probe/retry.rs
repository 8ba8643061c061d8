//! Fixed-interval, bounded retry policy

use crate::probe::{ProbeCheck, ReadinessProbe};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("retry interval must be greater than zero")]
    ZeroInterval,

    #[error("max attempts must be greater than zero")]
    ZeroAttempts,
}

/// Interval and attempt bound governing a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyConfig", into = "RetryPolicyConfig")]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: u32,
}

/// Serialized form of a policy (`interval_secs` / `max_attempts`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RetryPolicyConfig {
    interval_secs: u64,
    max_attempts: u32,
}

impl TryFrom<RetryPolicyConfig> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(config: RetryPolicyConfig) -> Result<Self, Self::Error> {
        RetryPolicy::new(Duration::from_secs(config.interval_secs), config.max_attempts)
    }
}

impl From<RetryPolicy> for RetryPolicyConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            interval_secs: policy.interval.as_secs(),
            max_attempts: policy.max_attempts,
        }
    }
}

/// Outcome of polling a probe under a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Ready {
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        /// Diagnostic captured on the last failed evaluation
        diagnostic: Option<String>,
    },
}

impl ProbeResult {
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeResult::Ready { attempts, .. } | ProbeResult::TimedOut { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ProbeResult::Ready { elapsed, .. } | ProbeResult::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Result<Self, PolicyError> {
        if interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        Ok(Self {
            interval,
            max_attempts,
        })
    }

    pub fn from_secs(interval_secs: u64, max_attempts: u32) -> Result<Self, PolicyError> {
        Self::new(Duration::from_secs(interval_secs), max_attempts)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Worst-case time spent waiting between attempts
    pub fn budget(&self) -> Duration {
        self.interval * (self.max_attempts - 1)
    }

    /// Poll `probe` until it reports ready or the attempts run out
    ///
    /// `on_attempt` is called before each evaluation with the 1-based attempt
    /// number. There is no sleep after the final failed attempt.
    pub async fn poll(
        &self,
        probe: &dyn ReadinessProbe,
        mut on_attempt: impl FnMut(u32),
    ) -> ProbeResult {
        let started = Instant::now();
        let mut diagnostic = None;

        for attempt in 1..=self.max_attempts {
            on_attempt(attempt);
            match probe.check().await {
                ProbeCheck::Ready => {
                    return ProbeResult::Ready {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                ProbeCheck::NotReady { diagnostic: d } => {
                    debug!(
                        "{} not ready (attempt {}/{})",
                        probe.describe(),
                        attempt,
                        self.max_attempts
                    );
                    diagnostic = d;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        ProbeResult::TimedOut {
            attempts: self.max_attempts,
            elapsed: started.elapsed(),
            diagnostic,
        }
    }
}
