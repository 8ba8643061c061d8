//! Main execution engine - runs the pipeline's steps strictly in order

use crate::{
    core::{
        Context, Pipeline, PipelineStatus, Severity, Step, StepError, StepOutcome, StepState,
        StepStatus,
    },
    probe::ProbeResult,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
        description: String,
        index: usize,
        total: usize,
    },
    StateChanged {
        step_id: String,
        state: StepState,
    },
    ProbeStarted {
        step_id: String,
        target: String,
        max_attempts: u32,
    },
    StepFinished {
        outcome: StepOutcome,
    },
    PipelineFinished {
        run_id: Uuid,
        status: PipelineStatus,
        elapsed: Duration,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Summary of one pipeline run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: PipelineStatus,

    /// Outcomes of the steps that executed, in order
    pub outcomes: Vec<StepOutcome>,

    /// Steps never reached because of a fatal abort
    pub not_run: Vec<String>,

    /// Final context snapshot
    pub context: Context,

    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunResult {
    /// True when every step ran and no fatal step failed
    pub fn completed(&self) -> bool {
        self.status == PipelineStatus::Complete
    }

    /// The fatal step that aborted the run
    pub fn failed_step(&self) -> Option<&str> {
        match &self.status {
            PipelineStatus::Aborted { step } => Some(step),
            _ => None,
        }
    }

    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step_id == step_id)
    }

    /// Every failed step, fatal or soft
    pub fn failures(&self) -> Vec<&StepOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed()).collect()
    }

    /// The most recent collaborator diagnostic recorded by a failed step
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.outcomes
            .iter()
            .rev()
            .filter(|o| o.is_failed())
            .find_map(|o| o.diagnostic.as_deref())
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.completed() {
            0
        } else {
            1
        }
    }
}

/// Sequential pipeline execution engine
///
/// The engine performs no external side effects itself; everything happens
/// inside the actions, checks, and probes the steps carry.
#[derive(Default)]
pub struct ExecutionEngine {
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    fn transition(&self, step_id: &str, state: StepState) {
        debug!("{} -> {:?}", step_id, state);
        self.emit_event(ExecutionEvent::StateChanged {
            step_id: step_id.to_string(),
            state,
        });
    }

    /// Execute the entire pipeline with an empty context
    pub async fn run(&self, pipeline: &Pipeline) -> RunResult {
        self.run_with(pipeline, Context::new()).await
    }

    /// Execute the entire pipeline starting from a seeded context
    pub async fn run_with(&self, pipeline: &Pipeline, mut context: Context) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let total = pipeline.len();

        info!("Starting pipeline execution: {} ({})", pipeline.name, run_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: total,
        });

        for step in pipeline.steps() {
            self.transition(&step.id, StepState::Pending);
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut status = PipelineStatus::Running;

        for (index, step) in pipeline.steps().iter().enumerate() {
            self.emit_event(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                description: step.description.clone(),
                index,
                total,
            });

            let outcome = self.execute_step(step, &mut context).await;
            let abort = outcome.is_fatal_failure();
            self.emit_event(ExecutionEvent::StepFinished {
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);

            if abort {
                error!("Step {} failed; aborting pipeline", step.id);
                status = PipelineStatus::Aborted {
                    step: step.id.clone(),
                };
                break;
            }
        }

        if status == PipelineStatus::Running {
            status = PipelineStatus::Complete;
        }

        let not_run = pipeline
            .steps()
            .iter()
            .skip(outcomes.len())
            .map(|s| s.id.clone())
            .collect();
        let elapsed = started.elapsed();

        info!(
            "Pipeline execution finished: {} - {:?} in {:.1}s",
            pipeline.name,
            status,
            elapsed.as_secs_f64()
        );
        self.emit_event(ExecutionEvent::PipelineFinished {
            run_id,
            status: status.clone(),
            elapsed,
        });

        RunResult {
            run_id,
            pipeline_name: pipeline.name.clone(),
            status,
            outcomes,
            not_run,
            context,
            started_at,
            elapsed,
        }
    }

    /// Execute a single step: check, action, probe
    async fn execute_step(&self, step: &Step, context: &mut Context) -> StepOutcome {
        let started = Instant::now();
        self.transition(&step.id, StepState::Running);

        let skipped = match step.check() {
            Some(check) => check.is_satisfied().await,
            None => false,
        };

        let mut bound = Vec::new();
        let mut result: Result<(), StepError> = Ok(());

        if skipped {
            info!("Step {} already satisfied, skipping action", step.id);
            self.transition(&step.id, StepState::Skipped);
        } else {
            info!("Executing step: {}", step.id);
            result = match step.action().run(context.clone()).await {
                Ok(delta) => {
                    let names: Vec<String> = delta.names().into_iter().map(str::to_string).collect();
                    match context.apply(delta, &step.id) {
                        Ok(()) => {
                            bound = names;
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                }
                Err(e) => Err(e),
            };
        }

        let mut probe_attempts = 0;
        let mut probe_elapsed = None;

        if result.is_ok() {
            if let Some(spec) = step.probe_spec() {
                let max_attempts = spec.retry.max_attempts();
                self.emit_event(ExecutionEvent::ProbeStarted {
                    step_id: step.id.clone(),
                    target: spec.probe.describe(),
                    max_attempts,
                });

                let probe_result = spec
                    .retry
                    .poll(spec.probe.as_ref(), |attempt| {
                        self.transition(
                            &step.id,
                            StepState::Probing {
                                attempt,
                                max_attempts,
                            },
                        )
                    })
                    .await;

                probe_attempts = probe_result.attempts();
                probe_elapsed = Some(probe_result.elapsed());
                if let ProbeResult::TimedOut {
                    attempts,
                    diagnostic,
                    ..
                } = probe_result
                {
                    result = Err(StepError::ProbeTimeout {
                        attempts,
                        diagnostic,
                    });
                }
            }
        }

        let (status, state, error, error_kind, diagnostic) = match &result {
            Ok(()) if skipped => (StepStatus::Skipped, StepState::Skipped, None, None, None),
            Ok(()) => (StepStatus::Ready, StepState::Ready, None, None, None),
            Err(e) => {
                match step.severity {
                    Severity::Fatal => error!("Step {} failed: {}", step.id, e),
                    Severity::Soft => warn!("Step {} failed (non-fatal): {}", step.id, e),
                }
                (
                    StepStatus::Failed,
                    StepState::Failed {
                        error: e.to_string(),
                    },
                    Some(e.to_string()),
                    Some(e.kind()),
                    e.diagnostic().map(str::to_string),
                )
            }
        };

        // A skipped step already announced its terminal state
        if !(skipped && status == StepStatus::Skipped) {
            self.transition(&step.id, state);
        }

        StepOutcome {
            step_id: step.id.clone(),
            severity: step.severity,
            status,
            error,
            error_kind,
            diagnostic,
            probe_attempts,
            probe_elapsed,
            elapsed: started.elapsed(),
            bound,
        }
    }
}
