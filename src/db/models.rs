//! Database models and domain types.

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use serde::Serialize;
use tracing::instrument;

use crate::db::schema;

/// User account database model.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::users)]
pub struct User {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    deleted_at: Option<NaiveDateTime>,
}

/// Insertable user model for sign-up.
#[derive(Debug, Clone, Insertable, new, Getters)]
#[diesel(table_name = schema::users)]
pub struct NewUser {
    id: String,
    name: String,
    email: String,
    password_hash: String,
}

/// Persisted room record.
///
/// Rooms are soft-deleted: `deleted_at` is set instead of removing the row.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::rooms)]
pub struct Room {
    id: i32,
    name: String,
    is_private: bool,
    creator_id: String,
    password_hash: String,
    capacity: i32,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    deleted_at: Option<NaiveDateTime>,
}

impl Room {
    /// Returns true when joining requires a password check.
    #[instrument(skip(self), fields(room_id = self.id))]
    pub fn requires_password(&self) -> bool {
        self.is_private && !self.password_hash.is_empty()
    }
}

/// Insertable room model.
#[derive(Debug, Clone, Insertable, new, Getters)]
#[diesel(table_name = schema::rooms)]
pub struct NewRoom {
    name: String,
    is_private: bool,
    creator_id: String,
    password_hash: String,
    capacity: i32,
}

/// One player's result for one concluded game. Append-only.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::scores)]
pub struct Score {
    #[serde(skip)]
    id: i32,
    #[serde(skip)]
    user_id: String,
    is_won: bool,
    nickname: String,
    created_at: NaiveDateTime,
}

impl Score {
    /// Outcome of the game from the score owner's perspective.
    pub fn outcome(&self) -> GameOutcome {
        GameOutcome::from(self.is_won)
    }
}

/// Insertable score model.
#[derive(Debug, Clone, PartialEq, Eq, Insertable, new, Getters)]
#[diesel(table_name = schema::scores)]
pub struct NewScore {
    user_id: String,
    is_won: bool,
    nickname: String,
}

/// Game outcome from the player's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum GameOutcome {
    /// Player won the game.
    Win,
    /// Player lost the game.
    Loss,
}

impl GameOutcome {
    /// Returns the stored boolean form.
    pub fn is_won(self) -> bool {
        matches!(self, Self::Win)
    }
}

impl From<bool> for GameOutcome {
    fn from(is_won: bool) -> Self {
        if is_won { Self::Win } else { Self::Loss }
    }
}
