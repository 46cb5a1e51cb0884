use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use aisentiment_core::{
    CoreResult,
    config::Config,
    model::{CallRequest, Outcome},
    orchestrator::CallOrchestrator,
    telemetry::{LogSink, MetricsRecorder},
};
use clap::{Parser, Subcommand};
use futures_util::{StreamExt, stream};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "AI sentiment analyzer CLI", long_about = None)]
struct Cli {
    /// JSON or TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one piece of text
    Analyze {
        #[arg(short, long, help = "Text to analyze")]
        text: String,
    },
    /// Analyze every non-empty line of a file
    Batch {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Print the service status
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Health => {
            println!(
                "{}",
                serde_json::json!({"status": "UP", "service": "AI Sentiment Analyzer"})
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze { text } => {
            let orch = orchestrator(&cfg)?;
            let request = match call_request(&cfg, &text) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(status = e.http_status(), "rejected input: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            let ok = print_outcome(orch.run(request).await)?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Batch { file, concurrency } => {
            let orch = orchestrator(&cfg)?;
            let body = std::fs::read_to_string(&file)?;
            let mut requests = Vec::new();
            for (n, line) in body.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match call_request(&cfg, line) {
                    Ok(r) => requests.push(r),
                    Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping input line"),
                }
            }

            let orch_ref = &orch;
            let outcomes: Vec<Outcome> = stream::iter(requests)
                .map(|r| orch_ref.run(r))
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

            let mut all_ok = true;
            for outcome in outcomes {
                all_ok &= print_outcome(outcome)?;
            }
            print!("{}", orch.metrics().render_text()?);
            Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

fn orchestrator(cfg: &Config) -> anyhow::Result<CallOrchestrator> {
    let orch = CallOrchestrator::from_config(
        cfg,
        Arc::new(LogSink),
        Arc::new(MetricsRecorder::new()?),
    )?;
    Ok(orch)
}

fn call_request(cfg: &Config, text: &str) -> CoreResult<CallRequest> {
    CallRequest::new(
        text,
        cfg.api.model.clone(),
        cfg.api.max_tokens,
        cfg.call.max_input_chars,
    )
}

/// Prints the response or error body as one JSON line; `true` on success.
fn print_outcome(outcome: Outcome) -> anyhow::Result<bool> {
    match outcome.into_response() {
        Ok(body) => {
            println!("{}", serde_json::to_string(&body)?);
            Ok(true)
        }
        Err((status, Some(body))) => {
            tracing::debug!(status, "call failed");
            println!("{}", serde_json::to_string(&body)?);
            Ok(false)
        }
        Err((status, None)) => {
            tracing::debug!(status, "call abandoned");
            Ok(false)
        }
    }
}
