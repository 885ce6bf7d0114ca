//! Tic-tac-toe room server - CLI entry point

#![warn(missing_docs)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use tictactoe_server::{AppState, GameRepository, ServerConfig, SessionRegistry, router};
use tracing::{error, info, instrument};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = ServerConfig::load_or_default(&cli.config)?.apply_env()?;
    initialize_tracing(config.log_filter());

    match cli.command {
        Command::Serve {
            port,
            host,
            database_url,
        } => {
            let config = config.with_bind(host, port).with_database_url(database_url);
            run_server(config).await
        }
        Command::Migrate { database_url } => {
            let config = config.with_database_url(database_url);
            run_migrations(&config)
        }
    }
}

/// Apply embedded migrations and exit
#[instrument(skip(config), fields(database_url = %config.database_url()))]
fn run_migrations(config: &ServerConfig) -> Result<()> {
    let repository = GameRepository::new(config.database_url().clone())?;
    repository.run_migrations()?;
    info!("Database is up to date");
    Ok(())
}

/// Run the HTTP and WebSocket server until Ctrl-C
#[instrument(skip(config), fields(bind = %config.bind_address()))]
async fn run_server(config: ServerConfig) -> Result<()> {
    let repository = GameRepository::new(config.database_url().clone())?;
    repository.run_migrations()?;

    let registry = Arc::new(SessionRegistry::new(*config.default_board_size()));
    let app = router(AppState::new(&config, repository, Arc::clone(&registry)));

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!("Server ready at http://{}/", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&registry)))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutting down");
    match registry.close_all() {
        Ok(closed) => info!(closed, "Room sessions closed"),
        Err(e) => error!(error = %e, "Failed to close room sessions"),
    }
}

fn initialize_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
