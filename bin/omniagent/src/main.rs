mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "omniagent")]
#[command(about = "An LLM-driven page automation agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize omniagent configuration
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show configuration and tool server status
    Status,

    /// List tools advertised by the configured tool servers
    Tools,

    /// Run an instruction against a page surface
    Run {
        /// Natural-language instruction
        instruction: String,

        /// Fixture page file (JSON); the built-in demo page if omitted
        #[arg(long)]
        page: Option<std::path::PathBuf>,

        /// Autonomy mode override (manual|semi|auto)
        #[arg(long)]
        autonomy: Option<String>,

        /// Conversation id to continue ("new" starts a fresh one)
        #[arg(short, long, default_value = "default")]
        conversation: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Onboard { force } => commands::onboard::run(force),
        Commands::Status => commands::status::run().await,
        Commands::Tools => commands::tools::run().await,
        Commands::Run {
            instruction,
            page,
            autonomy,
            conversation,
        } => commands::run::run(&instruction, page.as_deref(), autonomy.as_deref(), &conversation).await,
    }
}
