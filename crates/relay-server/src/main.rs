//! Relay session gateway binary.

use clap::Parser;
use relay_server::cli::{Cli, Commands, LogFormat};
use relay_server::{EchoHandler, GatewayServer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }

    match cli.command {
        Commands::Serve(args) => {
            let config = args.server_config();
            let jwt = args.jwt_manager()?;
            let server = GatewayServer::new(config, jwt, EchoHandler)?;

            info!(addr = %server.config().bind_addr, "Starting relay gateway");

            let signal_server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            });

            server.run().await?;
        }
        Commands::Token(args) => {
            println!("{}", args.mint()?);
        }
    }

    Ok(())
}
