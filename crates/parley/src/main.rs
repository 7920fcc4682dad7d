mod commands;

use std::net::IpAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use parley::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// Parley - a session-scoped relay between chat clients and a text-generation backend
#[derive(Parser, Debug)]
#[command(version = parley::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start an interactive chat session
    Chat {
        /// Server URL to connect to
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,

        /// Reuse a session id instead of generating one
        #[arg(long, value_name = "SESSION_ID")]
        session: Option<String>,

        /// Run the relay in-process instead of connecting to a server
        #[arg(long, conflicts_with = "server")]
        local: bool,

        /// Path to configuration file (used with --local)
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => commands::serve::run(&config, host, port).await,
        Commands::Chat {
            server,
            session,
            local,
            config,
        } => {
            if local {
                commands::chat::run_local(&config, session.as_deref()).await
            } else {
                commands::chat::run(&server, session.as_deref()).await
            }
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
