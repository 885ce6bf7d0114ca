//! Room listings, creation and deletion.
//!
//! Bridges persisted room records with live occupancy from the
//! [`SessionRegistry`].

use std::sync::Arc;

use derive_more::{Display, Error};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthError, Identity, hash_password};
use crate::db::{DbError, GameRepository, NewRoom, Room};
use crate::rooms::{MAX_SEATS, RoomId, RoomSnapshot, SessionError, SessionRegistry};

/// Room directory failures.
#[derive(Debug, Clone, Display, Error)]
pub enum DirectoryError {
    /// The requesting identity does not resolve to a user.
    #[display("creator {user_id} does not exist")]
    InvalidOwner {
        /// Unresolved user id.
        user_id: String,
    },
    /// No live record with this id.
    #[display("room {room_id} not found")]
    NotFound {
        /// Requested room id.
        room_id: RoomId,
    },
    /// Only the creator may do this.
    #[display("room {room_id} belongs to another user")]
    Forbidden {
        /// Requested room id.
        room_id: RoomId,
    },
    /// Room password could not be hashed.
    #[display("{_0}")]
    Hashing(AuthError),
    /// Storage failure.
    #[display("{_0}")]
    Db(DbError),
    /// Live state unusable.
    #[display("{_0}")]
    Session(SessionError),
}

impl From<AuthError> for DirectoryError {
    fn from(err: AuthError) -> Self {
        Self::Hashing(err)
    }
}

impl From<DbError> for DirectoryError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}

impl From<SessionError> for DirectoryError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

/// A room as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomListing {
    /// Room id.
    pub id: RoomId,
    /// Room name.
    pub name: String,
    /// Whether joining needs a password.
    pub is_private: bool,
    /// Seat count.
    pub capacity: i32,
    /// Seats currently taken.
    pub player_in: usize,
}

impl RoomListing {
    fn new(room: &Room, player_in: usize) -> Self {
        Self {
            id: *room.id(),
            name: room.name().clone(),
            is_private: *room.is_private(),
            capacity: *room.capacity(),
            player_in,
        }
    }
}

/// Persisted room plus its live occupants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    /// Room id.
    pub id: RoomId,
    /// Room name.
    pub name: String,
    /// Creator's user id.
    pub creator_id: String,
    /// Whether joining needs a password.
    pub is_private: bool,
    /// Seat count.
    pub capacity: i32,
    /// Live state, absent when nobody has joined.
    #[serde(flatten)]
    pub live: Option<RoomSnapshot>,
}

/// Room creation form after validation.
#[derive(Debug, Clone)]
pub struct CreateRoom {
    /// Room name.
    pub name: String,
    /// Whether joining needs a password.
    pub is_private: bool,
    /// Plain room password; ignored for public rooms.
    pub password: Option<String>,
}

/// Room directory service.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    repository: GameRepository,
    registry: Arc<SessionRegistry>,
    bcrypt_cost: u32,
}

impl RoomDirectory {
    /// Creates a directory over `repository` and `registry`.
    #[instrument(skip(repository, registry))]
    pub fn new(repository: GameRepository, registry: Arc<SessionRegistry>, bcrypt_cost: u32) -> Self {
        info!("Creating RoomDirectory");
        Self {
            repository,
            registry,
            bcrypt_cost,
        }
    }

    /// Rooms with a free seat.
    #[instrument(skip(self))]
    pub fn list_available(&self) -> Result<Vec<RoomListing>, DirectoryError> {
        let mut listings = Vec::new();
        for room in self.repository.list_rooms()? {
            let player_in = self.registry.occupancy(*room.id())?;
            if player_in < MAX_SEATS {
                listings.push(RoomListing::new(&room, player_in));
            }
        }
        debug!(count = listings.len(), "Listed available rooms");
        Ok(listings)
    }

    /// Rooms `identity` created or currently sits in, full or not.
    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub fn list_mine(&self, identity: &Identity) -> Result<Vec<RoomListing>, DirectoryError> {
        let mut listings = Vec::new();
        for room in self.repository.list_rooms()? {
            let snapshot = self.registry.snapshot(*room.id())?;
            let player_in = snapshot.as_ref().map_or(0, |s| s.users.len());
            let seated = snapshot
                .as_ref()
                .is_some_and(|s| s.users.iter().any(|u| u.id == identity.id));
            if room.creator_id() == &identity.id || seated {
                listings.push(RoomListing::new(&room, player_in));
            }
        }
        debug!(count = listings.len(), "Listed own rooms");
        Ok(listings)
    }

    /// Persists a new room owned by `identity`.
    ///
    /// Public rooms never store a password; private rooms store its bcrypt
    /// hash. A private room with an empty password is stored as public.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidOwner`] if `identity` is not a user.
    #[instrument(skip(self, identity, form), fields(user_id = %identity.id, name = %form.name))]
    pub fn create_room(&self, identity: &Identity, form: CreateRoom) -> Result<Room, DirectoryError> {
        if self.repository.find_user_by_id(&identity.id)?.is_none() {
            warn!("Room creator not found");
            return Err(DirectoryError::InvalidOwner {
                user_id: identity.id.clone(),
            });
        }

        let password = form
            .password
            .filter(|p| form.is_private && !p.is_empty());
        let (is_private, password_hash) = match password {
            Some(password) => (true, hash_password(&password, self.bcrypt_cost)?),
            None => (false, String::new()),
        };

        let room = self.repository.create_room(NewRoom::new(
            form.name,
            is_private,
            identity.id.clone(),
            password_hash,
            MAX_SEATS as i32,
        ))?;
        info!(room_id = room.id(), is_private, "Room created");
        Ok(room)
    }

    /// Persisted room with its live occupants.
    #[instrument(skip(self))]
    pub fn room_info(&self, room_id: RoomId) -> Result<RoomInfo, DirectoryError> {
        let room = self.find(room_id)?;
        let live = self.registry.snapshot(room_id)?;
        Ok(RoomInfo {
            id: *room.id(),
            name: room.name().clone(),
            creator_id: room.creator_id().clone(),
            is_private: *room.is_private(),
            capacity: *room.capacity(),
            live,
        })
    }

    /// Persisted, non-deleted room.
    #[instrument(skip(self))]
    pub fn find(&self, room_id: RoomId) -> Result<Room, DirectoryError> {
        self.repository
            .find_room(room_id)?
            .ok_or(DirectoryError::NotFound { room_id })
    }

    /// Soft-deletes the persisted record.
    ///
    /// Live session cleanup is separate; see [`RoomDirectory::delete_room`].
    #[instrument(skip(self))]
    pub fn close_room(&self, room_id: RoomId) -> Result<(), DirectoryError> {
        if !self.repository.soft_delete_room(room_id)? {
            return Err(DirectoryError::NotFound { room_id });
        }
        info!(room_id, "Room soft-deleted");
        Ok(())
    }

    /// Creator-only delete: soft-deletes the record and closes any live session.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Forbidden`] for anyone but the creator.
    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub fn delete_room(&self, identity: &Identity, room_id: RoomId) -> Result<(), DirectoryError> {
        let room = self.find(room_id)?;
        if room.creator_id() != &identity.id {
            warn!("Delete refused for non-creator");
            return Err(DirectoryError::Forbidden { room_id });
        }
        self.close_room(room_id)?;
        if self.registry.close(room_id, "room is closed")? {
            info!(room_id, "Live session closed");
        }
        Ok(())
    }
}
