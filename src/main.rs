use anyhow::{Context, Result};
use stackup::cli::output::{style, INFO};
use stackup::cli::reporter::Reporter;
use stackup::cli::{Cli, Command};
use stackup::core::config::StackConfig;
use stackup::execution::ExecutionEngine;
use stackup::secret::SecretVault;
use stackup::stack::{self, Collaborators};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the flag
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = StackConfig::load(cli.config.as_deref())
        .context("Failed to load stack configuration")?;

    match cli.command() {
        Command::Up => provision(config).await,
        Command::Agent => {
            let code = stack::agent::run_foreground(&config).await?;
            std::process::exit(code);
        }
    }
}

async fn provision(config: StackConfig) -> Result<()> {
    let reporter = Reporter::new();
    let vault = Arc::new(
        SecretVault::new(config.secret_bytes, reporter.secret_sink())
            .context("Failed to initialise secret generation")?,
    );

    let collaborators = Collaborators::system(&config);
    let pipeline = stack::build_pipeline(&config, &collaborators, &vault)
        .context("Failed to build stack pipeline")?;

    println!(
        "{} Loaded pipeline: {} ({} steps)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.len()
    );

    let mut engine = ExecutionEngine::new();
    let events = Arc::clone(&reporter);
    engine.add_event_handler(move |event| events.handle_event(&event));

    let result = engine.run(&pipeline).await;

    let notes = stack::summary_notes(&config, &result);
    reporter.print_summary(&result, &vault.secrets(), &notes);

    if !result.completed() {
        error!(
            "Pipeline aborted at {}",
            result.failed_step().unwrap_or("unknown step")
        );
        reporter.print_abort(&result);
        std::process::exit(result.exit_code());
    }

    Ok(())
}
