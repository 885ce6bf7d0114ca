//! Live room state and the registry that owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use derive_more::{Display, Error};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::rooms::{CloseCode, Connection, Position, Symbol, opposite_symbol};

/// Persisted room id.
pub type RoomId = i32;

/// Live room shared between connection tasks.
pub type SharedSession = Arc<Mutex<RoomSession>>;

/// Maximum number of seats in a room.
pub const MAX_SEATS: usize = 2;

/// Board side length used until the creator resizes.
pub const DEFAULT_BOARD_SIZE: u32 = 3;

/// Phase of the game in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum GameStatus {
    /// Players still need symbols.
    #[serde(rename = "choose symbol")]
    #[strum(serialize = "choose symbol")]
    AwaitingSymbolChoice,
    /// Marks are being placed.
    #[serde(rename = "in process")]
    #[strum(serialize = "in process")]
    InProgress,
    /// A result was reported.
    #[serde(rename = "game end")]
    #[strum(serialize = "game end")]
    Ended,
}

/// Errors touching shared room state.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SessionError {
    /// A task panicked while holding a room or registry lock.
    #[display("state lock for room {room_id:?} is poisoned")]
    Poisoned {
        /// Room whose lock is poisoned, `None` for the registry map.
        room_id: Option<RoomId>,
    },
}

/// One player's presence in a room.
#[derive(Debug, Clone)]
pub struct Seat {
    pub(crate) user_id: String,
    pub(crate) display_name: String,
    pub(crate) symbol: Option<Symbol>,
    pub(crate) connection: Option<Connection>,
    pub(crate) connected: bool,
    /// Passed the room password check at least once.
    pub(crate) admitted: bool,
    /// The attached connection passed the room password check.
    pub(crate) authorized: bool,
}

impl Seat {
    pub(crate) fn new(user_id: String, display_name: String, connection: Connection) -> Self {
        Self {
            user_id,
            display_name,
            symbol: None,
            connection: Some(connection),
            connected: true,
            admitted: false,
            authorized: false,
        }
    }

    /// User occupying the seat.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Display name captured at join time.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Assigned symbol, if any.
    pub fn symbol(&self) -> Option<Symbol> {
        self.symbol
    }

    /// Whether a live connection is attached.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Attached connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Whether the attached connection has joined with the room password.
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Whether `connection_id` is the attached connection.
    pub(crate) fn holds(&self, connection_id: Uuid) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == connection_id)
    }

    /// Marks the attached connection as having passed the password check.
    pub(crate) fn authorize(&mut self) {
        self.admitted = true;
        self.authorized = true;
    }

    /// Detaches the connection, closing it politely.
    pub(crate) fn disconnect(&mut self, code: CloseCode, reason: &str) {
        if let Some(connection) = self.connection.take() {
            connection.close(code, reason);
        }
        self.connected = false;
        self.authorized = false;
    }
}

/// Serializable view of a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatSnapshot {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Assigned symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    /// Whether the seat has a live connection.
    pub connected: bool,
}

/// Serializable, consistent view of a room taken under its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    /// Occupants in join order.
    pub users: Vec<SeatSnapshot>,
    /// Placed marks.
    pub positions: Vec<Position>,
    /// Board side length.
    pub board_size: u32,
    /// Game phase.
    pub status: GameStatus,
}

/// In-memory gameplay state of one room.
#[derive(Debug)]
pub struct RoomSession {
    id: RoomId,
    pub(crate) seats: Vec<Seat>,
    pub(crate) board: Vec<Position>,
    pub(crate) board_size: u32,
    pub(crate) status: GameStatus,
    pub(crate) closed: bool,
}

impl RoomSession {
    /// Creates an empty room session.
    #[instrument]
    pub fn new(id: RoomId, board_size: u32) -> Self {
        debug!(room_id = id, "Creating room session");
        Self {
            id,
            seats: Vec::with_capacity(MAX_SEATS),
            board: Vec::new(),
            board_size,
            status: GameStatus::AwaitingSymbolChoice,
            closed: false,
        }
    }

    /// Room id.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Seats in join order.
    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// Placed marks in order.
    pub fn board(&self) -> &[Position] {
        &self.board
    }

    /// Board side length.
    pub fn board_size(&self) -> u32 {
        self.board_size
    }

    /// Game phase.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Whether the room was closed and dropped from the registry.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of occupied seats.
    pub fn occupancy(&self) -> usize {
        self.seats.len()
    }

    /// Seat held by `user_id`.
    pub fn seat(&self, user_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.user_id == user_id)
    }

    pub(crate) fn seat_mut(&mut self, user_id: &str) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.user_id == user_id)
    }

    /// Symbol expected to move next.
    ///
    /// Opposite of the last placed mark, or the first seat's symbol on an
    /// empty board.
    pub fn side_to_move(&self) -> Option<Symbol> {
        match self.board.last() {
            Some(last) => Some(last.symbol.opponent()),
            None => self.seats.first().and_then(|s| s.symbol),
        }
    }

    /// Whether every seat of a full room holds a symbol.
    pub fn symbols_complete(&self) -> bool {
        self.seats.len() == MAX_SEATS && self.seats.iter().all(|s| s.symbol.is_some())
    }

    /// Gives a symbol-less seat the opposite of the other seat's symbol.
    ///
    /// Only applies to a full room where exactly one seat has a symbol.
    /// Returns the index of the seat that was assigned.
    pub(crate) fn assign_missing_symbol(&mut self) -> Option<usize> {
        if self.seats.len() != MAX_SEATS {
            return None;
        }
        let taken = self.seats.iter().find_map(|s| s.symbol);
        let missing = self.seats.iter().position(|s| s.symbol.is_none())?;
        let symbol = opposite_symbol(taken)?;
        self.seats[missing].symbol = Some(symbol);
        debug!(room_id = self.id, user_id = %self.seats[missing].user_id, %symbol, "Auto-assigned symbol");
        Some(missing)
    }

    /// Whether no seat has a live connection and no mark is on the board.
    ///
    /// Such a room holds nothing a reconnect could resume.
    pub fn is_abandoned(&self) -> bool {
        self.board.is_empty() && self.seats.iter().all(|s| !s.connected)
    }

    /// Consistent copy for listings and info endpoints.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            users: self
                .seats
                .iter()
                .map(|s| SeatSnapshot {
                    id: s.user_id.clone(),
                    name: s.display_name.clone(),
                    symbol: s.symbol,
                    connected: s.connected,
                })
                .collect(),
            positions: self.board.clone(),
            board_size: self.board_size,
            status: self.status,
        }
    }
}

/// Locks a room, mapping poisoning to [`SessionError`].
pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, RoomSession>, SessionError> {
    session.lock().map_err(|poisoned| {
        let room_id = poisoned.get_ref().id;
        warn!(room_id, "Room lock poisoned");
        SessionError::Poisoned {
            room_id: Some(room_id),
        }
    })
}

/// Owns every live [`RoomSession`], keyed by room id.
///
/// Lock order is always registry map first, then room. No code path takes
/// the map lock while holding a room lock.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<RoomId, SharedSession>>,
    default_board_size: u32,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[instrument]
    pub fn new(default_board_size: u32) -> Self {
        info!(default_board_size, "Creating session registry");
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_board_size: default_board_size.max(1),
        }
    }

    fn map(&self) -> Result<MutexGuard<'_, HashMap<RoomId, SharedSession>>, SessionError> {
        self.sessions.lock().map_err(|_| {
            warn!("Session registry lock poisoned");
            SessionError::Poisoned { room_id: None }
        })
    }

    /// Board size new sessions start with.
    pub fn default_board_size(&self) -> u32 {
        self.default_board_size
    }

    /// Returns the live session for `room_id`, creating an empty one if absent.
    ///
    /// A session that was closed but is still present is replaced.
    #[instrument(skip(self))]
    pub fn get_or_create(&self, room_id: RoomId) -> Result<SharedSession, SessionError> {
        let mut sessions = self.map()?;
        if let Some(existing) = sessions.get(&room_id) {
            if !lock_session(existing)?.closed {
                return Ok(Arc::clone(existing));
            }
        }
        let session = Arc::new(Mutex::new(RoomSession::new(room_id, self.default_board_size)));
        sessions.insert(room_id, Arc::clone(&session));
        info!(room_id, "Room session created");
        Ok(session)
    }

    /// Returns the session for `room_id`, if live.
    #[instrument(skip(self))]
    pub fn get(&self, room_id: RoomId) -> Result<Option<SharedSession>, SessionError> {
        Ok(self.map()?.get(&room_id).cloned())
    }

    /// Drops the session for `room_id`.
    ///
    /// Callers must already have closed every seat connection.
    #[instrument(skip(self))]
    pub fn remove(&self, room_id: RoomId) -> Result<Option<SharedSession>, SessionError> {
        let removed = self.map()?.remove(&room_id);
        if removed.is_some() {
            info!(room_id, "Room session removed");
        }
        Ok(removed)
    }

    /// Drops the session only if it is still `session` and not a newer one.
    #[instrument(skip(self, session))]
    pub fn remove_if_current(
        &self,
        room_id: RoomId,
        session: &SharedSession,
    ) -> Result<bool, SessionError> {
        let mut sessions = self.map()?;
        match sessions.get(&room_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&room_id);
                info!(room_id, "Room session removed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Live seat count for `room_id`; zero when no session exists.
    #[instrument(skip(self))]
    pub fn occupancy(&self, room_id: RoomId) -> Result<usize, SessionError> {
        match self.get(room_id)? {
            Some(session) => Ok(lock_session(&session)?.occupancy()),
            None => Ok(0),
        }
    }

    /// Consistent snapshot of a room, if live.
    #[instrument(skip(self))]
    pub fn snapshot(&self, room_id: RoomId) -> Result<Option<RoomSnapshot>, SessionError> {
        match self.get(room_id)? {
            Some(session) => Ok(Some(lock_session(&session)?.snapshot())),
            None => Ok(None),
        }
    }

    /// Ids of all live sessions.
    #[instrument(skip(self))]
    pub fn room_ids(&self) -> Result<Vec<RoomId>, SessionError> {
        Ok(self.map()?.keys().copied().collect())
    }

    /// Disconnects every seat of `room_id` and drops the session.
    ///
    /// Returns `false` if no session was live.
    #[instrument(skip(self))]
    pub fn close(&self, room_id: RoomId, reason: &str) -> Result<bool, SessionError> {
        let Some(session) = self.get(room_id)? else {
            return Ok(false);
        };
        {
            let mut room = lock_session(&session)?;
            for seat in room.seats.iter_mut() {
                seat.disconnect(CloseCode::Normal, reason);
            }
            room.closed = true;
        }
        self.remove_if_current(room_id, &session)
    }

    /// Closes every live session. Used at shutdown.
    #[instrument(skip(self))]
    pub fn close_all(&self) -> Result<usize, SessionError> {
        let mut closed = 0;
        for room_id in self.room_ids()? {
            if self.close(room_id, "server is shutting down")? {
                closed += 1;
            }
        }
        info!(closed, "All room sessions closed");
        Ok(closed)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BOARD_SIZE)
    }
}
