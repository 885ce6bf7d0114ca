//! Persistence layer for users, rooms and scores.

mod error;
mod models;
mod repository;
mod schema;

pub use error::DbError;
pub use models::{GameOutcome, NewRoom, NewScore, NewUser, Room, Score, User};
pub use repository::{GameRepository, ScoreStore};
