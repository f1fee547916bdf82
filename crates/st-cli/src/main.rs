//! studio-sync CLI -- follow AI task streams of a studio project from the
//! terminal.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use st_core::config::Config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "studio-sync", version, about)]
struct Cli {
    /// Config file (default: ~/.studio-sync/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `client.api_url`.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a project's event stream and print finalized messages.
    Watch {
        /// Project ID.
        project: String,
        /// Tasks started from this terminal (eligible for auto-continue).
        #[arg(long = "task")]
        tasks: Vec<String>,
        /// Print messages as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Replay a single task's stream until it finishes.
    Follow {
        /// Task ID.
        task: String,
        #[arg(long)]
        json: bool,
    },

    /// Ask the backend to stop a running task.
    Cancel {
        /// Task ID.
        task: String,
    },

    /// Show a task's status.
    Status {
        /// Task ID.
        task: String,
    },

    /// Classify an AI error message.
    Classify {
        /// Error text as returned by the backend.
        text: String,
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    if let Some(url) = &cli.api_url {
        cfg.client.api_url = url.clone();
        cfg.validate().context("invalid --api-url")?;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    st_telemetry::logging::init_with_format(
        "studio-sync",
        &cfg.logging.level,
        cli.json_logs || cfg.logging.json,
    );

    match cli.command {
        Commands::Watch {
            project,
            tasks,
            json,
        } => commands::watch::run(&cfg, &project, tasks, json).await?,
        Commands::Follow { task, json } => commands::follow::run(&cfg, &task, json).await?,
        Commands::Cancel { task } => commands::cancel::run(&cfg, &task).await?,
        Commands::Status { task } => commands::status::run(&cfg, &task).await?,
        Commands::Classify { text, json } => commands::classify::run(&text, json)?,
        Commands::Config => print!("{}", cfg.to_toml()?),
    }

    Ok(())
}
