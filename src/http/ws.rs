//! WebSocket upgrade and per-connection loops.
//!
//! Each connection gets a writer task draining its outbound channel into the
//! socket, so fan-out never waits on the network. The reader loop decodes
//! frames and hands them to the [`GameEngine`] one at a time.

use axum::Extension;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::Identity;
use crate::db::Room;
use crate::http::AppState;
use crate::rooms::{
    CloseCode, Connection, Flow, GameEngine, JoinError, Occupant, Outbound, RoomContext, RoomId,
    SeatContext, decode,
};

/// `GET /rooms/{id}`: upgrades and plays in the room.
#[instrument(skip(ws, state, identity), fields(user_id = %identity.id))]
pub async fn join_room(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Extension(identity): Extension<Identity>,
) -> Response {
    let directory = state.directory.clone();
    let room = match tokio::task::spawn_blocking(move || directory.find(room_id)).await {
        Ok(Ok(room)) => Some(room),
        Ok(Err(e)) => {
            warn!(room_id, error = %e, "Room lookup failed");
            None
        }
        Err(e) => {
            error!(room_id, error = %e, "Room lookup task failed");
            None
        }
    };
    ws.on_upgrade(move |socket| serve_socket(socket, state, identity, room_id, room))
}

#[instrument(skip_all, fields(room_id = room_id, user_id = %identity.id))]
async fn serve_socket(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    room_id: RoomId,
    room: Option<Room>,
) {
    let (mut sink, mut stream) = socket.split();
    let Some(room) = room else {
        close_socket(&mut sink, CloseCode::InternalError, "cannot find room").await;
        return;
    };

    let room = RoomContext::from(&room);
    let (connection, outbound) = Connection::new();
    let occupant = Occupant {
        user_id: identity.id.clone(),
        display_name: identity.name.clone(),
    };
    if let Err(e) = state.engine.connections().join_with(
        &occupant,
        room_id,
        connection.clone(),
        room.admission(),
    ) {
        let (code, reason) = match e {
            JoinError::RoomFull => (CloseCode::TryAgainLater, "room is full"),
            JoinError::Session(_) => (CloseCode::InternalError, "room is unavailable"),
        };
        warn!(error = %e, "Join refused");
        close_socket(&mut sink, code, reason).await;
        return;
    }
    info!(connection_id = %connection.id(), "Connection joined room");

    let mut writer = tokio::spawn(write_outbound(sink, outbound));
    let ctx = SeatContext {
        room,
        occupant,
        connection,
    };

    tokio::select! {
        _ = read_commands(&mut stream, &state.engine, &ctx) => {}
        _ = &mut writer => {
            debug!("Writer finished first");
        }
    }

    if let Err(e) = state.engine.connections().leave(room_id, ctx.connection.id()) {
        error!(error = %e, "Failed to release connection");
    }
    drop(ctx);
    if !writer.is_finished() {
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
    }
    info!("Connection finished");
}

async fn read_commands(stream: &mut SplitStream<WebSocket>, engine: &GameEngine, ctx: &SeatContext) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Peer closed connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Read failed");
                break;
            }
        };

        let command = match decode(text.as_str()) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                continue;
            }
        };

        match engine.handle(ctx, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) => {
                error!(error = %e, "Room state unusable, dropping connection");
                break;
            }
        }
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.as_ref().into())).await {
                    debug!(error = %e, "Write failed");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                close_socket(&mut sink, code, &reason).await;
                break;
            }
        }
    }
}

async fn close_socket(sink: &mut SplitSink<WebSocket, Message>, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code: code.code(),
        reason: reason.into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close frame not delivered");
    }
}
