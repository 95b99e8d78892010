use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pdfmerge::MergeError;
use pdfmerge::cli::Cli;
use pdfmerge::engine::MergeEngine;
use pdfmerge::output::ConsoleReporter;
use pdfmerge::output::formatter::OutputFormatter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long an interrupted merge gets to wind down before exiting.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::parse_normalized(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<MergeError>()
                .map_or(1, MergeError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.quiet, cli.verbose);
    let config = cli.load_config().context("Invalid configuration")?;
    let inputs = cli.input_paths()?;

    let engine = MergeEngine::new(config).context("Failed to start merge engine")?;
    let reporter = Arc::new(ConsoleReporter::new(formatter));
    engine.subscribe(reporter.subscriber());

    formatter.info(&format!("Merging {} PDF files...", inputs.len()));
    if formatter.is_verbose() {
        for (index, path) in inputs.iter().enumerate() {
            formatter.list_item(index + 1, &path.display().to_string());
        }
    }

    let job_id = if cli.batch {
        engine.submit_batch(inputs, &cli.output)?
    } else {
        let mut rest = inputs;
        let main = rest.remove(0);
        engine.submit(main, rest, &cli.output)?
    };
    info!(job_id = %job_id, "Job submitted");

    let report = tokio::select! {
        result = engine.wait() => result?,
        _ = tokio::signal::ctrl_c() => {
            formatter.warning("Interrupted, cancelling merge...");
            if let Err(e) = engine.graceful_cancel(INTERRUPT_GRACE).await {
                formatter.warning(&format!("Cancellation did not finish cleanly: {e}"));
            }
            engine.shutdown();
            return Err(MergeError::Cancelled.into());
        }
    };

    reporter.summary(&report);
    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the verbosity flag.
fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("pdfmerge=debug,warn")
        } else {
            EnvFilter::new("pdfmerge=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
