//! CLI entry point - the composition root.
//!
//! Exit codes: 0 on a clean signal-driven drain, 1 on a fatal startup error
//! (missing required configuration, unbindable port).

use clap::{Parser, Subcommand};

use voicegate_core::config::Settings;
use voicegate_core::logging;

#[derive(Parser)]
#[command(name = "voicegate", about = "Voice session gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket gateway (the default).
    Serve {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    // Environment file first, so Settings::from_env sees it.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("voicegate: {e}");
            std::process::exit(1);
        }
    };

    let Commands::Serve { port } = cli.command.unwrap_or(Commands::Serve { port: None });
    if let Some(port) = port {
        settings.port = port;
    }

    logging::init_logging(settings.run_mode);

    if let Err(e) = voicegate_axum::start_server(settings).await {
        tracing::error!(error = %e, "Fatal server error");
        eprintln!("voicegate: {e}");
        std::process::exit(1);
    }
}
