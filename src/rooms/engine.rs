//! Turn-taking state machine driven by inbound commands.
//!
//! Each command runs inside one critical section on its room: the state is
//! mutated and the resulting events are queued before the lock is released,
//! so no client can observe a transition the server has not committed.
//! Score writes happen after the lock is released and are best-effort.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::auth::verify_password;
use crate::db::{NewScore, Room, ScoreStore};
use crate::rooms::{
    Admission, CloseCode, Command, Connection, ConnectionManager, Event, GameResult, GameStatus,
    Occupant, Position, RoomId, RoomSession, SessionError, SharedSession, Symbol, broadcast,
    lock_session,
};

/// Persisted room facts the engine needs while a connection is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContext {
    /// Room id.
    pub id: RoomId,
    /// User allowed to resize the board.
    pub creator_id: String,
    /// Bcrypt hash checked on join, `None` for public rooms.
    pub password_hash: Option<String>,
}

impl From<&Room> for RoomContext {
    fn from(room: &Room) -> Self {
        Self {
            id: *room.id(),
            creator_id: room.creator_id().clone(),
            password_hash: room
                .requires_password()
                .then(|| room.password_hash().clone()),
        }
    }
}

impl RoomContext {
    /// How connections are admitted to this room.
    pub fn admission(&self) -> Admission {
        if self.password_hash.is_some() {
            Admission::PasswordRequired
        } else {
            Admission::Open
        }
    }
}

/// Everything known about the connection a command arrived on.
#[derive(Debug, Clone)]
pub struct SeatContext {
    /// Room the connection is bound to.
    pub room: RoomContext,
    /// Player behind the connection.
    pub occupant: Occupant,
    /// The connection itself.
    pub connection: Connection,
}

/// Whether the read loop should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next frame.
    Continue,
    /// The connection is finished.
    Stop,
}

/// Applies commands to room sessions.
#[derive(Clone)]
pub struct GameEngine {
    connections: ConnectionManager,
    scores: Arc<dyn ScoreStore>,
}

impl GameEngine {
    /// Creates an engine that records scores into `scores`.
    pub fn new(connections: ConnectionManager, scores: Arc<dyn ScoreStore>) -> Self {
        Self {
            connections,
            scores,
        }
    }

    /// Connection manager shared with the transport.
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Applies one command from `ctx`'s connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the room lock is poisoned; only the
    /// calling connection should be torn down.
    #[instrument(
        skip(self, ctx, command),
        fields(room_id = ctx.room.id, user_id = %ctx.occupant.user_id, action = %command.action())
    )]
    pub async fn handle(&self, ctx: &SeatContext, command: Command) -> Result<Flow, SessionError> {
        debug!("Handling command");
        if !matches!(command, Command::JoinRoom { .. }) && self.awaiting_password(ctx)? {
            warn!("Command sent before joining with the room password");
            self.connections.release(
                ctx.room.id,
                &ctx.occupant.user_id,
                ctx.connection.id(),
                "password is required",
            )?;
            return Ok(Flow::Stop);
        }
        match command {
            Command::JoinRoom { password } => self.join_room(ctx, password).await,
            Command::PlaceMark(position) => self.place_mark(ctx, position),
            Command::SelectSymbol(symbol) => self.select_symbol(ctx, symbol),
            Command::ResizeBoard { size, raw } => self.resize_board(ctx, size, &raw),
            Command::ResetGame => self.reset_game(ctx),
            Command::GameEnded(result) => self.game_ended(ctx, result).await,
            Command::ExitRoom => self.exit_room(ctx).await,
            Command::CloseRoom => self.close_room(ctx),
        }
    }

    /// Whether `ctx`'s seat is in a private room and its connection has not
    /// joined with the password yet.
    fn awaiting_password(&self, ctx: &SeatContext) -> Result<bool, SessionError> {
        if ctx.room.password_hash.is_none() {
            return Ok(false);
        }
        let Some(session) = self.connections.registry().get(ctx.room.id)? else {
            return Ok(false);
        };
        let room = lock_session(&session)?;
        Ok(room.seats.iter().any(|s| {
            s.user_id == ctx.occupant.user_id && s.holds(ctx.connection.id()) && !s.authorized
        }))
    }

    /// Runs `mutate` under the room lock if `ctx` still owns its seat.
    fn with_room<R>(
        &self,
        ctx: &SeatContext,
        mutate: impl FnOnce(&mut RoomSession) -> R,
    ) -> Result<Option<(R, SharedSession)>, SessionError> {
        let Some(session) = self.connections.registry().get(ctx.room.id)? else {
            debug!("Room session is gone");
            return Ok(None);
        };
        let result = {
            let mut room = lock_session(&session)?;
            let attached = room
                .seats
                .iter()
                .any(|s| s.user_id == ctx.occupant.user_id && s.holds(ctx.connection.id()));
            if room.closed || !attached {
                debug!("Connection no longer owns a seat");
                return Ok(None);
            }
            mutate(&mut *room)
        };
        Ok(Some((result, session)))
    }

    fn flow<R>(outcome: Option<R>) -> Flow {
        if outcome.is_some() {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    async fn join_room(
        &self,
        ctx: &SeatContext,
        password: Option<String>,
    ) -> Result<Flow, SessionError> {
        if let Some(hash) = ctx.room.password_hash.clone() {
            let supplied = password.unwrap_or_default();
            let valid = tokio::task::spawn_blocking(move || verify_password(&supplied, &hash))
                .await
                .unwrap_or(false);
            if !valid {
                warn!("Room password rejected");
                self.connections.release(
                    ctx.room.id,
                    &ctx.occupant.user_id,
                    ctx.connection.id(),
                    "password is not valid",
                )?;
                return Ok(Flow::Stop);
            }
        }

        let default_size = self.connections.registry().default_board_size();
        let user_id = ctx.occupant.user_id.as_str();
        let outcome = self.with_room(ctx, |room| {
            if let Some(seat) = room.seat_mut(user_id) {
                seat.authorize();
            }
            if room.board_size == 0 {
                room.board_size = default_size;
            }
            broadcast::to_all(room, &Event::new_connection(user_id));
            broadcast::to_all(room, &Event::resize(room.board_size));

            room.status = GameStatus::AwaitingSymbolChoice;
            if let Some(first) = room.seats.first().map(|s| s.user_id.clone()) {
                broadcast::to_all(room, &Event::choose_symbol(first));
            }
            broadcast::to_all(room, &Event::positions(&room.board, room.side_to_move()));

            if let Some(idx) = room.assign_missing_symbol() {
                let assigned = room.seats[idx].user_id.clone();
                if let Some(symbol) = room.seats[idx].symbol {
                    broadcast::to_seat(room, &assigned, &Event::sync_symbol(symbol));
                }
            }
            if room.symbols_complete() {
                room.status = GameStatus::InProgress;
            }
            info!(occupancy = room.occupancy(), status = %room.status, "Player joined");
        })?;
        Ok(Self::flow(outcome))
    }

    fn place_mark(&self, ctx: &SeatContext, position: Position) -> Result<Flow, SessionError> {
        let outcome = self.with_room(ctx, |room| {
            let next = Some(position.symbol.opponent());
            room.board.push(position);
            room.status = GameStatus::InProgress;
            broadcast::to_all(room, &Event::positions(&room.board, next));
            debug!(moves = room.board.len(), "Mark placed");
        })?;
        Ok(Self::flow(outcome))
    }

    fn select_symbol(&self, ctx: &SeatContext, requested: Symbol) -> Result<Flow, SessionError> {
        let user_id = ctx.occupant.user_id.as_str();
        let outcome = self.with_room(ctx, |room| {
            if room.seat(user_id).is_some_and(|s| s.symbol.is_some()) {
                debug!("Seat already has a symbol");
                return;
            }
            let taken = room
                .seats
                .iter()
                .filter(|s| s.user_id != user_id)
                .find_map(|s| s.symbol);
            let symbol = match taken {
                Some(other) if other == requested => {
                    warn!(%requested, "Symbol already taken, assigning the other one");
                    other.opponent()
                }
                _ => requested,
            };
            for seat in room.seats.iter_mut().filter(|s| s.symbol.is_none()) {
                seat.symbol = Some(if seat.user_id == user_id {
                    symbol
                } else {
                    symbol.opponent()
                });
            }
            if room.symbols_complete() {
                room.status = GameStatus::InProgress;
            }
            broadcast::to_others(room, user_id, &Event::selected_symbol(Some(symbol.opponent())));
            info!(%symbol, "Symbol selected");
        })?;
        Ok(Self::flow(outcome))
    }

    fn resize_board(&self, ctx: &SeatContext, size: u32, raw: &str) -> Result<Flow, SessionError> {
        let user_id = ctx.occupant.user_id.as_str();
        if user_id != ctx.room.creator_id {
            warn!(size, "Only the room creator may resize the board");
            return Ok(Flow::Continue);
        }
        let outcome = self.with_room(ctx, |room| {
            if room.status == GameStatus::InProgress && !room.board.is_empty() {
                warn!(size, "Board cannot be resized while a game is being played");
                return;
            }
            room.board_size = size;
            broadcast::relay_to_others(room, user_id, raw);
            info!(size, "Board resized");
        })?;
        Ok(Self::flow(outcome))
    }

    fn reset_game(&self, ctx: &SeatContext) -> Result<Flow, SessionError> {
        let outcome = self.with_room(ctx, |room| {
            room.board.clear();
            broadcast::to_all(room, &Event::reset_game());
            info!("Board reset");
        })?;
        Ok(Self::flow(outcome))
    }

    async fn game_ended(&self, ctx: &SeatContext, result: GameResult) -> Result<Flow, SessionError> {
        let user_id = ctx.occupant.user_id.as_str();
        let outcome = self.with_room(ctx, |room| {
            room.status = GameStatus::Ended;
            broadcast::to_others(room, user_id, &Event::restart_game());
        })?;
        if outcome.is_none() {
            return Ok(Flow::Stop);
        }
        info!(subject = %result.user_id, won = result.won, "Game ended");
        self.persist_scores(vec![NewScore::new(
            result.user_id,
            result.won,
            result.opponent_name,
        )])
        .await;
        Ok(Flow::Continue)
    }

    async fn exit_room(&self, ctx: &SeatContext) -> Result<Flow, SessionError> {
        let me = &ctx.occupant;
        let outcome = self.with_room(ctx, |room| {
            let mut scores = Vec::new();
            let opponent = room
                .seats
                .iter()
                .find(|s| s.user_id != me.user_id)
                .map(|s| (s.user_id.clone(), s.display_name.clone()));

            if let Some((opponent_id, opponent_name)) = &opponent {
                if room.status == GameStatus::InProgress {
                    scores.push(NewScore::new(
                        opponent_id.clone(),
                        true,
                        me.display_name.clone(),
                    ));
                    scores.push(NewScore::new(
                        me.user_id.clone(),
                        false,
                        opponent_name.clone(),
                    ));
                }
            }

            if let Some(seat) = room.seat_mut(&me.user_id) {
                seat.disconnect(CloseCode::Normal, "connection is close");
            }
            room.seats.retain(|s| s.user_id != me.user_id);
            room.board.clear();
            room.status = GameStatus::AwaitingSymbolChoice;

            if let Some((opponent_id, _)) = &opponent {
                if let Some(seat) = room.seat_mut(opponent_id) {
                    seat.symbol = None;
                }
                broadcast::to_seat(room, opponent_id, &Event::choose_symbol(opponent_id.clone()));
                broadcast::to_seat(room, opponent_id, &Event::positions(&[], None));
            }
            let empty = room.seats.is_empty();
            if empty {
                room.closed = true;
            }
            info!(remaining = room.occupancy(), "Player exited");
            (scores, empty)
        })?;

        if let Some(((scores, empty), session)) = outcome {
            if empty {
                self.connections
                    .registry()
                    .remove_if_current(ctx.room.id, &session)?;
            }
            self.persist_scores(scores).await;
        }
        Ok(Flow::Stop)
    }

    fn close_room(&self, ctx: &SeatContext) -> Result<Flow, SessionError> {
        let outcome = self.with_room(ctx, |room| {
            for seat in room.seats.iter_mut() {
                seat.disconnect(CloseCode::Normal, "room is closed");
            }
            room.closed = true;
            info!(seats = room.occupancy(), "Room closed");
        })?;
        if let Some(((), session)) = outcome {
            self.connections
                .registry()
                .remove_if_current(ctx.room.id, &session)?;
        }
        Ok(Flow::Stop)
    }

    async fn persist_scores(&self, scores: Vec<NewScore>) {
        if scores.is_empty() {
            return;
        }
        let store = Arc::clone(&self.scores);
        let written = tokio::task::spawn_blocking(move || {
            scores
                .into_iter()
                .filter(|score| match store.append_score(score.clone()) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, user_id = %score.user_id(), "Failed to record score");
                        false
                    }
                })
                .count()
        })
        .await;
        match written {
            Ok(count) => debug!(count, "Scores recorded"),
            Err(e) => error!(error = %e, "Score task failed"),
        }
    }
}
