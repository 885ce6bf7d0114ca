//! Database repository for users, rooms and scores.

use chrono::Utc;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info, instrument};

use crate::db::{DbError, NewRoom, NewScore, NewUser, Room, Score, User, schema};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Sink for finished-game results.
///
/// The game engine records scores through this seam so that gameplay does
/// not depend on a concrete database.
pub trait ScoreStore: Send + Sync + 'static {
    /// Appends one score record.
    fn append_score(&self, score: NewScore) -> Result<(), DbError>;
}

/// Database repository for user, room and score operations.
#[derive(Debug, Clone)]
pub struct GameRepository {
    db_path: String,
}

impl GameRepository {
    /// Creates a new repository connected to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the path is empty.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Result<Self, DbError> {
        if db_path.trim().is_empty() {
            return Err(DbError::new("Database path must not be empty"));
        }
        info!(path = %db_path, "Creating GameRepository");
        Ok(Self { db_path })
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        let mut conn = SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))?;
        diesel::sql_query("PRAGMA busy_timeout = 5000").execute(&mut conn)?;
        Ok(conn)
    }

    /// Applies all pending embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a migration fails.
    #[instrument(skip(self))]
    pub fn run_migrations(&self) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migration failed: {}", e)))?;
        info!(count = applied.len(), "Migrations applied");
        Ok(())
    }

    /// Creates a new user account.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the email is already taken or a database error occurs.
    #[instrument(skip(self, new_user), fields(email = %new_user.email()))]
    pub fn create_user(&self, new_user: NewUser) -> Result<User, DbError> {
        let mut conn = self.connection()?;

        let user = diesel::insert_into(schema::users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)?;

        info!(user_id = %user.id(), "User created");
        Ok(user)
    }

    /// Gets a live (not deleted) user by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, DbError> {
        let mut conn = self.connection()?;

        let user = schema::users::table
            .filter(schema::users::id.eq(user_id))
            .filter(schema::users::deleted_at.is_null())
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;

        debug!(found = user.is_some(), "User lookup by id");
        Ok(user)
    }

    /// Gets a live user by email.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let mut conn = self.connection()?;

        let user = schema::users::table
            .filter(schema::users::email.eq(email))
            .filter(schema::users::deleted_at.is_null())
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;

        debug!(found = user.is_some(), "User lookup by email");
        Ok(user)
    }

    /// Persists a new room.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, room), fields(name = %room.name(), creator_id = %room.creator_id()))]
    pub fn create_room(&self, room: NewRoom) -> Result<Room, DbError> {
        let mut conn = self.connection()?;

        let created = diesel::insert_into(schema::rooms::table)
            .values(&room)
            .returning(Room::as_returning())
            .get_result(&mut conn)?;

        info!(room_id = created.id(), "Room created");
        Ok(created)
    }

    /// Gets a room by id, ignoring soft-deleted rooms.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn find_room(&self, room_id: i32) -> Result<Option<Room>, DbError> {
        let mut conn = self.connection()?;

        let room = schema::rooms::table
            .filter(schema::rooms::id.eq(room_id))
            .filter(schema::rooms::deleted_at.is_null())
            .select(Room::as_select())
            .first(&mut conn)
            .optional()?;

        debug!(found = room.is_some(), "Room lookup");
        Ok(room)
    }

    /// Lists all rooms that have not been soft-deleted, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn list_rooms(&self) -> Result<Vec<Room>, DbError> {
        let mut conn = self.connection()?;

        let rooms = schema::rooms::table
            .filter(schema::rooms::deleted_at.is_null())
            .order(schema::rooms::id.asc())
            .select(Room::as_select())
            .load(&mut conn)?;

        debug!(count = rooms.len(), "Rooms loaded");
        Ok(rooms)
    }

    /// Soft-deletes a room. Returns `false` if no live room had that id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn soft_delete_room(&self, room_id: i32) -> Result<bool, DbError> {
        let mut conn = self.connection()?;
        let now = Utc::now().naive_utc();

        let updated = diesel::update(
            schema::rooms::table
                .filter(schema::rooms::id.eq(room_id))
                .filter(schema::rooms::deleted_at.is_null()),
        )
        .set((
            schema::rooms::deleted_at.eq(Some(now)),
            schema::rooms::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

        info!(room_id, deleted = updated > 0, "Room soft-deleted");
        Ok(updated > 0)
    }

    /// Lists a user's scores, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn list_scores(&self, user_id: &str) -> Result<Vec<Score>, DbError> {
        let mut conn = self.connection()?;

        let scores = schema::scores::table
            .filter(schema::scores::user_id.eq(user_id))
            .order((schema::scores::created_at.desc(), schema::scores::id.desc()))
            .select(Score::as_select())
            .load(&mut conn)?;

        debug!(count = scores.len(), "Scores loaded");
        Ok(scores)
    }

    /// Appends a score record and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, score), fields(user_id = %score.user_id(), is_won = score.is_won()))]
    pub fn record_score(&self, score: NewScore) -> Result<Score, DbError> {
        let mut conn = self.connection()?;

        let recorded = diesel::insert_into(schema::scores::table)
            .values(&score)
            .returning(Score::as_returning())
            .get_result(&mut conn)?;

        info!(score_id = recorded.id(), "Score recorded");
        Ok(recorded)
    }

    /// Counts a user's won games.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn count_wins(&self, user_id: &str) -> Result<i64, DbError> {
        let mut conn = self.connection()?;

        let wins = schema::scores::table
            .filter(schema::scores::user_id.eq(user_id))
            .filter(schema::scores::is_won.eq(true))
            .count()
            .get_result(&mut conn)?;

        Ok(wins)
    }
}

impl ScoreStore for GameRepository {
    fn append_score(&self, score: NewScore) -> Result<(), DbError> {
        self.record_score(score).map(|_| ())
    }
}
