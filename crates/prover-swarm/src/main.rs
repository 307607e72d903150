use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use prover_swarm::{list_configs, run_problem};

#[derive(Parser)]
#[command(name = "prover-swarm", about = "Recursive multi-agent theorem-proving runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a problem through a named configuration.
    Run {
        /// Path to a file containing the problem statement.
        #[arg(long)]
        input: PathBuf,
        /// Where to write the final Markdown report; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Named configuration to use.
        #[arg(long, default_value = "default")]
        config: String,
        /// Optional JSONL trace file.
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Override the global step ceiling.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// List the available configuration names.
    ListConfigs,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            input,
            output,
            config,
            trace,
            max_steps,
        } => {
            let completed = run_problem(
                &input,
                output.as_deref(),
                &config,
                trace.as_deref(),
                max_steps,
            )
            .await?;
            if !completed {
                warn!("run stopped before producing a confirmed solution");
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ListConfigs => {
            for name in list_configs() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
