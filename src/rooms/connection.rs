//! Binding of transport connections to seats.

use std::sync::Arc;

use derive_more::{Display, Error};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::rooms::{MAX_SEATS, RoomId, Seat, SessionError, SessionRegistry, lock_session};

/// Close codes sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000, polite close.
    Normal,
    /// 1008, authorization failure.
    PolicyViolation,
    /// 1011, server-side failure such as a missing room.
    InternalError,
    /// 1013, room is full.
    TryAgainLater,
}

impl CloseCode {
    /// Numeric WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::PolicyViolation => 1008,
            Self::InternalError => 1011,
            Self::TryAgainLater => 1013,
        }
    }
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<str>),
    /// Close frame; the writer stops after sending it.
    Close {
        /// Close code.
        code: CloseCode,
        /// Human-readable reason.
        reason: String,
    },
}

/// Handle to one client connection.
///
/// Sending never blocks: frames are queued for the connection's writer
/// task, which owns the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// The writer task has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("connection {id} is closed")]
pub struct ConnectionClosed {
    /// Connection id.
    pub id: Uuid,
}

impl Connection {
    /// Creates a connection handle and the receiving end for its writer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Connection id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] if the writer is gone.
    pub fn send_text(&self, text: Arc<str>) -> Result<(), ConnectionClosed> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| ConnectionClosed { id: self.id })
    }

    /// Queues a close frame. Returns `false` if the writer is already gone.
    pub fn close(&self, code: CloseCode, reason: &str) -> bool {
        debug!(connection_id = %self.id, code = code.code(), reason, "Closing connection");
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }
}

/// Who is joining a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
}

/// Why a connection could not take a seat.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum JoinError {
    /// Both seats are held by other users.
    #[display("room is full")]
    RoomFull,
    /// Shared state is unusable.
    #[display("{_0}")]
    Session(SessionError),
}

impl From<SessionError> for JoinError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

/// Whether a new connection may play before proving the room password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// Public room; seats are playable as soon as they are taken.
    Open,
    /// Private room; the connection must join with the password first.
    PasswordRequired,
}

/// Manages seat lifecycles for connections.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    registry: Arc<SessionRegistry>,
}

impl ConnectionManager {
    /// Creates a manager over `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this manager mutates.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Seats `occupant` in the public room `room_id` over `connection`.
    ///
    /// See [`ConnectionManager::join_with`].
    pub fn join(
        &self,
        occupant: &Occupant,
        room_id: RoomId,
        connection: Connection,
    ) -> Result<Seat, JoinError> {
        self.join_with(occupant, room_id, connection, Admission::Open)
    }

    /// Seats `occupant` in `room_id` over `connection`.
    ///
    /// A user who already holds a seat gets the new connection attached to
    /// it; the superseded connection is closed and board state is kept.
    /// Under [`Admission::PasswordRequired`] the connection cannot play
    /// until it joins with the room password.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::RoomFull`] when two other users hold the seats.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    pub fn join_with(
        &self,
        occupant: &Occupant,
        room_id: RoomId,
        connection: Connection,
        admission: Admission,
    ) -> Result<Seat, JoinError> {
        let open = admission == Admission::Open;
        loop {
            let session = self.registry.get_or_create(room_id)?;
            let mut room = lock_session(&session)?;
            if room.closed {
                // Closed between lookup and lock; a fresh session replaces it.
                continue;
            }

            if let Some(seat) = room.seat_mut(&occupant.user_id) {
                let new_id = connection.id();
                if let Some(previous) = seat.connection.replace(connection) {
                    if previous.id() != new_id {
                        previous.close(CloseCode::Normal, "replaced by a new connection");
                    }
                }
                seat.connected = true;
                seat.authorized = open;
                info!(user_id = %occupant.user_id, "Seat reconnected");
                return Ok(seat.clone());
            }

            if room.seats.len() >= MAX_SEATS {
                warn!(user_id = %occupant.user_id, "Room is full");
                return Err(JoinError::RoomFull);
            }

            let mut seat = Seat::new(
                occupant.user_id.clone(),
                occupant.display_name.clone(),
                connection,
            );
            if open {
                seat.authorize();
            }
            room.seats.push(seat.clone());
            info!(user_id = %occupant.user_id, occupancy = room.seats.len(), "Seat taken");
            return Ok(seat);
        }
    }

    /// Detaches `connection_id` from its seat and closes it politely.
    ///
    /// The seat itself stays, so a reconnect keeps its symbol, unless it was
    /// never admitted to its private room. A room left with no live
    /// connection and an empty board is dropped from the registry.
    #[instrument(skip(self))]
    pub fn leave(&self, room_id: RoomId, connection_id: Uuid) -> Result<(), SessionError> {
        let Some(session) = self.registry.get(room_id)? else {
            debug!("Room already gone");
            return Ok(());
        };
        let abandoned = {
            let mut room = lock_session(&session)?;
            let Some(idx) = room.seats.iter().position(|s| s.holds(connection_id)) else {
                debug!("Connection no longer attached to a seat");
                return Ok(());
            };
            let seat = &mut room.seats[idx];
            seat.disconnect(CloseCode::Normal, "connection is close");
            info!(user_id = %seat.user_id, "Seat disconnected");
            if !seat.admitted {
                room.seats.remove(idx);
                debug!("Seat was never admitted, released");
            }
            let abandoned = room.seats.is_empty() || room.is_abandoned();
            if abandoned {
                room.closed = true;
            }
            abandoned
        };
        if abandoned {
            info!("Room abandoned");
            self.registry.remove_if_current(room_id, &session)?;
        }
        Ok(())
    }

    /// Turns away `connection_id` after it failed the room password check.
    ///
    /// A seat admitted by an earlier connection keeps its symbol and only
    /// loses this connection. A seat this connection created is given up as
    /// if the join never happened. The connection is closed with
    /// [`CloseCode::PolicyViolation`] and `reason`.
    ///
    /// Returns whether a seat was removed.
    #[instrument(skip(self))]
    pub fn release(
        &self,
        room_id: RoomId,
        user_id: &str,
        connection_id: Uuid,
        reason: &str,
    ) -> Result<bool, SessionError> {
        let Some(session) = self.registry.get(room_id)? else {
            return Ok(false);
        };
        let (removed, empty) = {
            let mut room = lock_session(&session)?;
            let Some(idx) = room
                .seats
                .iter()
                .position(|s| s.user_id == user_id && s.holds(connection_id))
            else {
                debug!("Connection no longer attached to a seat");
                return Ok(false);
            };
            let seat = &mut room.seats[idx];
            seat.disconnect(CloseCode::PolicyViolation, reason);
            let removed = !seat.admitted;
            if removed {
                room.seats.remove(idx);
                info!(user_id, "Seat released");
            } else {
                info!(user_id, "Admitted seat kept, connection refused");
            }
            let empty = room.seats.is_empty() || room.is_abandoned();
            if empty {
                room.closed = true;
            }
            (removed, empty)
        };
        if empty {
            self.registry.remove_if_current(room_id, &session)?;
        }
        Ok(removed)
    }
}
