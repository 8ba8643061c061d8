//! Progress and summary reporting for a provisioning run
//!
//! The reporter is wired in twice: as an engine event handler for per-step
//! progress, and as the secret vault's sink so every credential is printed
//! the moment it exists.

use crate::cli::output::*;
use crate::core::{StepOutcome, StepState, StepStatus};
use crate::execution::{ExecutionEvent, RunResult};
use crate::secret::{Secret, SecretSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lines of diagnostic shown when a step fails
const DIAGNOSTIC_LINES: usize = 20;

/// Console reporter
pub struct Reporter {
    spinner: Mutex<Option<ProgressBar>>,
    step_index: Mutex<(usize, usize)>,
}

impl Reporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            spinner: Mutex::new(None),
            step_index: Mutex::new((0, 0)),
        })
    }

    /// Print a line without tearing an active spinner
    fn println(&self, line: &str) {
        let spinner = self.spinner.lock().unwrap_or_else(|p| p.into_inner());
        match spinner.as_ref() {
            Some(bar) => bar.suspend(|| println!("{}", line)),
            None => println!("{}", line),
        }
    }

    fn start_spinner(&self, message: String) {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(120));
        *self.spinner.lock().unwrap_or_else(|p| p.into_inner()) = Some(bar);
    }

    fn stop_spinner(&self) {
        if let Some(bar) = self.spinner.lock().unwrap_or_else(|p| p.into_inner()).take() {
            bar.finish_and_clear();
        }
    }

    /// Engine event handler
    pub fn handle_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::PipelineStarted {
                run_id,
                pipeline_name,
                total_steps,
            } => self.println(&format!(
                "{} Provisioning {} ({} steps, run {})",
                ROCKET,
                style(pipeline_name).bold(),
                total_steps,
                style(&run_id.to_string()[..8]).dim()
            )),
            ExecutionEvent::StepStarted {
                description,
                index,
                total,
                ..
            } => {
                *self.step_index.lock().unwrap_or_else(|p| p.into_inner()) = (index + 1, *total);
                self.println(&format!(
                    "{} [{}/{}] {}",
                    SPINNER,
                    style(index + 1).cyan(),
                    style(total).dim(),
                    description
                ));
            }
            ExecutionEvent::ProbeStarted {
                step_id,
                target,
                max_attempts,
            } => self.start_spinner(format!(
                "{}: waiting for {} (up to {} attempts)",
                step_id, target, max_attempts
            )),
            ExecutionEvent::StateChanged {
                step_id,
                state: StepState::Probing {
                    attempt,
                    max_attempts,
                },
            } => {
                if let Some(bar) = self.spinner.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
                    bar.set_message(format!("{}: attempt {}/{}", step_id, attempt, max_attempts));
                }
            }
            ExecutionEvent::StateChanged { .. } => {}
            ExecutionEvent::StepFinished { outcome } => {
                self.stop_spinner();
                let (index, total) = *self.step_index.lock().unwrap_or_else(|p| p.into_inner());
                self.println(&format_outcome(outcome, index, total));
                if outcome.is_failed() {
                    if let Some(diagnostic) = &outcome.diagnostic {
                        for line in format_output(diagnostic, DIAGNOSTIC_LINES).lines() {
                            self.println(&format!("    {}", style(line).dim()));
                        }
                    }
                }
            }
            ExecutionEvent::PipelineFinished { status, elapsed, .. } => self.println(&format!(
                "{} Pipeline {} in {}",
                INFO,
                format_pipeline_status(status),
                format_duration(*elapsed)
            )),
        }
    }

    /// Print a freshly generated secret
    pub fn print_secret(&self, secret: &Secret) {
        self.println(&format!(
            "{} {} IS: {}",
            KEY,
            style(&secret.name).bold(),
            style(&secret.value).yellow().bold()
        ));
        self.println(&format!(
            "   {}",
            style("Write this down now; it is not stored anywhere else.").dim()
        ));
    }

    /// A sink for the secret vault that prints immediately
    pub fn secret_sink(self: &Arc<Self>) -> SecretSink {
        let reporter = Arc::clone(self);
        Arc::new(move |secret: &Secret| reporter.print_secret(secret))
    }

    pub fn print_summary(&self, result: &RunResult, secrets: &[Secret], notes: &[String]) {
        self.stop_spinner();
        println!("{}", render_summary(result, secrets, notes));
    }

    /// Write the abort diagnostic to stderr
    pub fn print_abort(&self, result: &RunResult) {
        self.stop_spinner();
        let step = result.failed_step().unwrap_or("unknown");
        eprintln!("{} {} failed; later steps were not run", CROSS, style(step).red().bold());
        if let Some(outcome) = result.outcome(step) {
            if let Some(error) = &outcome.error {
                eprintln!("  {}", error);
            }
        }
        match result.last_diagnostic() {
            Some(diagnostic) => {
                eprintln!("{}", style("Last collaborator output:").bold());
                eprintln!("{}", diagnostic);
            }
            None => eprintln!("{}", style("No collaborator output was captured.").dim()),
        }
    }
}

/// One line per finished step: index, id, terminal state, probe timing
pub fn format_outcome(outcome: &StepOutcome, index: usize, total: usize) -> String {
    let icon = match outcome.status {
        StepStatus::Ready => CHECK,
        StepStatus::Skipped => SKIP,
        StepStatus::Failed => CROSS,
    };
    let mut line = format!(
        "{} [{}/{}] {} {}",
        icon,
        index,
        total,
        style(&outcome.step_id).bold(),
        format_step_status(outcome.status)
    );
    if let Some(probe) = outcome.probe_elapsed {
        let _ = write!(
            line,
            " (probe {}, {} attempt{})",
            format_duration(probe),
            outcome.probe_attempts,
            if outcome.probe_attempts == 1 { "" } else { "s" }
        );
    }
    if let (Some(kind), Some(error)) = (outcome.error_kind, &outcome.error) {
        let soft = if outcome.is_fatal_failure() { "" } else { " [non-fatal]" };
        let _ = write!(line, " {}: {}{}", kind, error, soft);
    }
    line
}

/// End-of-run summary; secret values are shown in full
pub fn render_summary(result: &RunResult, secrets: &[Secret], notes: &[String]) -> String {
    let mut out = String::new();
    let rule = separator();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "{} {} {} in {}",
        if result.completed() { CHECK } else { CROSS },
        style(&result.pipeline_name).bold(),
        format_pipeline_status(&result.status),
        format_duration(result.elapsed)
    );

    let count = |status: StepStatus| result.outcomes.iter().filter(|o| o.status == status).count();
    let _ = writeln!(
        out,
        "  ready: {}  skipped: {}  failed: {}  not run: {}",
        count(StepStatus::Ready),
        count(StepStatus::Skipped),
        count(StepStatus::Failed),
        result.not_run.len()
    );

    let failures = result.failures();
    if !failures.is_empty() {
        let _ = writeln!(out, "{} Failures:", WARN);
        for outcome in failures {
            let _ = writeln!(
                out,
                "  {} - {}{}",
                outcome.step_id,
                outcome.error.as_deref().unwrap_or("failed"),
                if outcome.is_fatal_failure() { "" } else { " (non-fatal)" }
            );
        }
    }

    let discovered: Vec<_> = result.context.iter().filter(|(_, b)| !b.secret).collect();
    if !discovered.is_empty() {
        let _ = writeln!(out, "{} Discovered values:", INFO);
        for (name, binding) in discovered {
            let _ = writeln!(out, "  {} = {} (from {})", name, binding.value, binding.bound_by);
        }
    }

    for note in notes {
        let _ = writeln!(out, "{}", note);
    }

    if !secrets.is_empty() {
        let _ = writeln!(out, "{} Generated secrets (shown once, not stored):", KEY);
        for secret in secrets {
            let _ = writeln!(
                out,
                "  {}: {} (generated {})",
                secret.name,
                secret.value,
                secret.generated_at.format("%H:%M:%S UTC")
            );
        }
    }
    let _ = write!(out, "{}", rule);
    out
}
