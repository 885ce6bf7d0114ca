//! Room and game coordination core.
//!
//! - [`SessionRegistry`] owns live [`RoomSession`]s.
//! - [`ConnectionManager`] binds connections to seats.
//! - [`GameEngine`] applies decoded [`Command`]s.
//! - [`broadcast`] fans events out to seats.

pub mod broadcast;
mod connection;
mod engine;
mod protocol;
mod session;
mod symbol;

pub use connection::{
    Admission, CloseCode, Connection, ConnectionClosed, ConnectionManager, JoinError, Occupant,
    Outbound,
};
pub use engine::{Flow, GameEngine, RoomContext, SeatContext};
pub use protocol::{Action, Command, Event, GameResult, Position, ProtocolError, decode};
pub use session::{
    DEFAULT_BOARD_SIZE, GameStatus, MAX_SEATS, RoomId, RoomSession, RoomSnapshot, Seat,
    SeatSnapshot, SessionError, SessionRegistry, SharedSession, lock_session,
};
pub use symbol::{Symbol, opposite_symbol};
