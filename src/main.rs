use std::path::PathBuf;

use clap::{Parser, Subcommand};
use funnel_mcp::config::Config;
use funnel_mcp::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "funnel-mcp")]
#[command(about = "MCP multiplexing gateway with an embedded JavaScript debugger", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server listening on STDIO
    Serve {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Set log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Path to an explicit config file, merged on top of the
        /// user-global and project-local documents
        #[arg(long)]
        config: Option<PathBuf>,

        /// Expose the embedded JavaScript debugger operations on the
        /// dispatcher in addition to the proxy's tool surface
        #[arg(long)]
        debugger: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            verbose,
            log_level,
            config,
            debugger,
        } => {
            let level = if verbose { "debug" } else { &log_level };
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            let config = Config::load(config.as_deref())?;
            funnel_mcp::serve(config, debugger).await?;
        }
    }

    Ok(())
}
