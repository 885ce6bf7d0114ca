//! Tic-tac-toe room server library
//!
//! Two players meet in a persisted room, connect over a WebSocket, and play
//! on a shared board kept in memory by the server.
//!
//! # Architecture
//!
//! - **Rooms**: session registry, connection manager, game engine, fan-out
//! - **Directory**: room listings with live occupancy
//! - **Auth**: bcrypt passwords and HS256 bearer tokens
//! - **Db**: SQLite persistence via diesel
//! - **Http**: axum router and WebSocket transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tictactoe_server::{AppState, GameRepository, ServerConfig, SessionRegistry, router};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::default();
//! let repository = GameRepository::new(config.database_url().clone())?;
//! repository.run_migrations()?;
//!
//! let registry = Arc::new(SessionRegistry::new(*config.default_board_size()));
//! let app = router(AppState::new(&config, repository, registry));
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod auth;
mod config;
mod db;
mod directory;
mod http;
pub mod rooms;

// Crate-level exports - Auth
pub use auth::{AuthError, AuthErrorKind, AuthService, Identity, SignUp, hash_password, verify_password};

// Crate-level exports - Configuration
pub use config::{ConfigError, ServerConfig};

// Crate-level exports - Database
pub use db::{DbError, GameOutcome, GameRepository, NewRoom, NewScore, NewUser, Room, Score, ScoreStore, User};

// Crate-level exports - Room directory
pub use directory::{CreateRoom, DirectoryError, RoomDirectory, RoomInfo, RoomListing};

// Crate-level exports - HTTP transport
pub use http::{
    ApiError, ApiErrorKind, AppState, CreateRoomRequest, Envelope, FieldErrors, SignInRequest,
    SignUpRequest, TokenView, UserView, bearer_token, router,
};

// Crate-level exports - Rooms core
pub use rooms::{
    Action, Admission, CloseCode, Command, Connection, ConnectionManager, Event, Flow, GameEngine,
    GameResult, GameStatus, JoinError, Occupant, Outbound, Position, ProtocolError, RoomContext,
    RoomId, RoomSession, RoomSnapshot, Seat, SeatContext, SeatSnapshot, SessionError,
    SessionRegistry, Symbol, decode, opposite_symbol,
};
