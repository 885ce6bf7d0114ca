//! Fan-out of events to seat connections.
//!
//! Callers hold the room lock. The seat connections are copied into a
//! snapshot before any frame is queued, and queueing never waits on the
//! network, so a slow or dead peer cannot stall the room.

use std::sync::Arc;

use tracing::{instrument, trace, warn};

use crate::rooms::{Connection, Event, RoomSession, Seat};

fn deliver(room_id: i32, targets: Vec<(String, Connection)>, text: Arc<str>) -> usize {
    let mut delivered = 0;
    for (user_id, connection) in targets {
        match connection.send_text(Arc::clone(&text)) {
            Ok(()) => delivered += 1,
            Err(e) => warn!(room_id, user_id = %user_id, error = %e, "Write to seat failed"),
        }
    }
    trace!(room_id, delivered, "Frame fanned out");
    delivered
}

fn live_targets<'a>(
    seats: impl Iterator<Item = &'a Seat>,
) -> Vec<(String, Connection)> {
    seats
        .filter_map(|s| s.connection.clone().map(|c| (s.user_id.clone(), c)))
        .collect()
}

/// Sends `event` to every connected seat. Returns the number delivered.
#[instrument(skip(room, event), fields(room_id = room.id(), action = %event.action))]
pub fn to_all(room: &RoomSession, event: &Event) -> usize {
    let targets = live_targets(room.seats.iter());
    deliver(room.id(), targets, Arc::from(event.to_text()))
}

/// Sends `event` to every connected seat except `excluded_user_id`'s.
#[instrument(skip(room, event), fields(room_id = room.id(), action = %event.action))]
pub fn to_others(room: &RoomSession, excluded_user_id: &str, event: &Event) -> usize {
    relay_to_others(room, excluded_user_id, &event.to_text())
}

/// Sends already-encoded `text` to every connected seat except `excluded_user_id`'s.
#[instrument(skip(room, text), fields(room_id = room.id()))]
pub fn relay_to_others(room: &RoomSession, excluded_user_id: &str, text: &str) -> usize {
    let targets = live_targets(room.seats.iter().filter(|s| s.user_id != excluded_user_id));
    deliver(room.id(), targets, Arc::from(text))
}

/// Sends `event` to a single seat. Returns whether it was queued.
#[instrument(skip(room, event), fields(room_id = room.id(), action = %event.action))]
pub fn to_seat(room: &RoomSession, user_id: &str, event: &Event) -> bool {
    let targets = live_targets(room.seats.iter().filter(|s| s.user_id == user_id));
    deliver(room.id(), targets, Arc::from(event.to_text())) > 0
}
