//! Command-line interface for the tic-tac-toe room server.

use clap::{Parser, Subcommand};

/// Tic-tac-toe room server with WebSocket gameplay
#[derive(Parser, Debug)]
#[command(name = "tictactoe_server")]
#[command(about = "Two-player tic-tac-toe room server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the TOML config file (optional)
    #[arg(short, long, global = true, default_value = "tictactoe.toml")]
    pub config: std::path::PathBuf,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Path to the database file (created if it doesn't exist)
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Apply pending database migrations and exit
    Migrate {
        /// Path to the database file
        #[arg(long)]
        database_url: Option<String>,
    },
}
