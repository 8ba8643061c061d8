//! CLI output formatting

use crate::core::{PipelineStatus, StepStatus};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static KEY: Emoji<'_, '_> = Emoji("🔑 ", "* ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a terminal step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Skipped => style(status.label()).dim().to_string(),
        StepStatus::Ready => style(status.label()).green().to_string(),
        StepStatus::Failed => style(status.label()).red().to_string(),
    }
}

/// Format the overall pipeline status for display
pub fn format_pipeline_status(status: &PipelineStatus) -> String {
    match status {
        PipelineStatus::Running => style("RUNNING").yellow().to_string(),
        PipelineStatus::Complete => style("COMPLETE").green().to_string(),
        PipelineStatus::Aborted { step } => style(format!("ABORTED@{}", step)).red().to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Keep the last `max_lines` lines of collaborator output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let kept = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}\n{}",
            style(format!("... ({} earlier lines)", lines.len() - max_lines)).dim(),
            kept
        )
    }
}

/// Horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80)
        .min(100);
    "─".repeat(width)
}
