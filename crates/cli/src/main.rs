//! Stepwise CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Ask the agent once, or chat interactively
//! - `tools`   — List the built-in tools
//! - `config`  — Print the default configuration or the config path

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise — a tool-using agent loop for the terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent
    Run {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Wait for complete model replies instead of streaming them
        #[arg(long)]
        no_stream: bool,

        /// Override the thought budget
        #[arg(long)]
        max_thoughts: Option<u32>,

        /// Answer directly, without steps or tools
        #[arg(long)]
        direct: bool,
    },

    /// List the built-in tools
    Tools,

    /// Print the default configuration
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command {
        Commands::Run {
            message,
            no_stream,
            max_thoughts,
            direct,
        } => {
            commands::run::run(commands::run::RunOptions {
                message,
                no_stream,
                max_thoughts,
                direct,
            })
            .await?
        }
        Commands::Tools => commands::tools::run().await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show_default().await?
            }
        }
    }

    Ok(())
}
