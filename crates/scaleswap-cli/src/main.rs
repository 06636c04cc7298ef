use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "scaleswap",
    about = "scaleswap: blue/green deployments for VM scale sets",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task-parameter document against a simulated cloud.
    ///
    /// The cloud document is read, mutated by the task, and written back.
    /// The task result is printed as JSON.
    Run {
        /// Task parameters (JSON)
        #[arg(short, long)]
        task: PathBuf,
        /// Simulated cloud document (JSON); created if missing
        #[arg(short, long)]
        cloud: PathBuf,
        /// scaleswap.toml
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory holding persisted setup snapshots
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Print the latest persisted setup of an owner.
    Snapshot {
        #[arg(short, long)]
        owner: String,
        #[arg(long)]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,scaleswap=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Run {
            task,
            cloud,
            config,
            state_dir,
        } => {
            let result =
                commands::run::run(&task, &cloud, config.as_deref(), state_dir.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Snapshot { owner, state_dir } => commands::snapshot::snapshot(&owner, &state_dir),
    }
}
