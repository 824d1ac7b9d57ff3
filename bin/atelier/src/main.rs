mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Bridge between automation agents and creative applications", long_about = None)]
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
    /// Start the relay server (long-running)
    Relay {
        /// Port to listen on (overrides config relay.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config relay.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage saved browser sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },

    /// Show configuration and store status
    Status,
}

#[derive(Subcommand)]
enum SessionsCommands {
    /// List saved sessions
    List,

    /// Print the decoded session record for a platform
    Show { platform: String },

    /// Delete the saved session for a platform
    Delete { platform: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Relay { port, host } => {
            commands::relay::run(host, port).await?;
        }
        Commands::Sessions { command } => match command {
            SessionsCommands::List => {
                commands::sessions::list().await?;
            }
            SessionsCommands::Show { platform } => {
                commands::sessions::show(&platform).await?;
            }
            SessionsCommands::Delete { platform } => {
                commands::sessions::delete(&platform).await?;
            }
        },
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
