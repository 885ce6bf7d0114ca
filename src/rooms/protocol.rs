//! JSON wire format of the room channel.
//!
//! Inbound frames look like `{ "action": ..., "data"?: ..., "password"?: ...,
//! "size"?: ..., "symbol"?: ... }` and are decoded once, here, into a
//! [`Command`]. Outbound frames are built from [`Event`].

use std::str::FromStr;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{instrument, trace};

use crate::rooms::Symbol;

/// Every action name that travels over the channel, in either direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::IntoStaticStr, strum::Display,
)]
pub enum Action {
    /// A mark was placed (inbound).
    #[strum(serialize = "step")]
    Step,
    /// A seat was auto-assigned a symbol (outbound).
    #[strum(serialize = "sync symbol")]
    SyncSymbol,
    /// A seat is prompted to pick a symbol (outbound).
    #[strum(serialize = "choose symbol")]
    ChooseSymbol,
    /// Full move history plus side to move (outbound).
    #[strum(serialize = "get positions")]
    GetPositions,
    /// A seat picks a symbol (inbound).
    #[strum(serialize = "select symbol")]
    SelectSymbol,
    /// The opponent picked, here is yours (outbound).
    #[strum(serialize = "selected symbol")]
    SelectedSymbol,
    /// Board size change (both directions).
    #[strum(serialize = "resize")]
    Resize,
    /// Board cleared (both directions).
    #[strum(serialize = "reset game")]
    ResetGame,
    /// A client reports the game result (inbound).
    #[strum(serialize = "game end")]
    GameEnd,
    /// Opponent should offer a rematch (outbound).
    #[strum(serialize = "restart game")]
    RestartGame,
    /// Room is being torn down (inbound).
    #[strum(serialize = "close room")]
    CloseRoom,
    /// A player leaves for good (inbound).
    #[strum(serialize = "exit room")]
    ExitRoom,
    /// A player joins (both directions).
    #[strum(serialize = "new connection to room")]
    NewConnectionToRoom,
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.into())
    }
}

/// A placed mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Cell identifier as supplied by the client.
    pub id: String,
    /// Mark placed in the cell.
    pub symbol: Symbol,
}

/// Result reported with `game end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResult {
    /// Whether `user_id` won.
    pub won: bool,
    /// User the result belongs to.
    pub user_id: String,
    /// Opponent's display name at the time of the game.
    pub opponent_name: String,
}

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Announce presence and receive the current room state.
    JoinRoom {
        /// Room password, checked for private rooms.
        password: Option<String>,
    },
    /// Append a mark to the board.
    PlaceMark(Position),
    /// Pick a symbol.
    SelectSymbol(Symbol),
    /// Change the board size; `raw` is relayed unmodified.
    ResizeBoard {
        /// New side length.
        size: u32,
        /// Original frame text.
        raw: String,
    },
    /// Clear the board.
    ResetGame,
    /// Record a finished game.
    GameEnded(GameResult),
    /// Leave the room for good.
    ExitRoom,
    /// Tear the room down.
    CloseRoom,
}

impl Command {
    /// Wire name of the command.
    pub fn action(&self) -> Action {
        match self {
            Self::JoinRoom { .. } => Action::NewConnectionToRoom,
            Self::PlaceMark(_) => Action::Step,
            Self::SelectSymbol(_) => Action::SelectSymbol,
            Self::ResizeBoard { .. } => Action::Resize,
            Self::ResetGame => Action::ResetGame,
            Self::GameEnded(_) => Action::GameEnd,
            Self::ExitRoom => Action::ExitRoom,
            Self::CloseRoom => Action::CloseRoom,
        }
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ProtocolError {
    /// Not JSON, or not the expected envelope.
    #[display("malformed message: {reason}")]
    Malformed {
        /// Parser message.
        reason: String,
    },
    /// Action name is unknown or only valid server-to-client.
    #[display("unsupported action '{action}'")]
    UnknownAction {
        /// Action as received.
        action: String,
    },
    /// A field the action needs is absent or has the wrong type.
    #[display("action '{action}' is missing field '{field}'")]
    MissingField {
        /// Action being decoded.
        action: Action,
        /// Field name.
        field: &'static str,
    },
    /// Symbol is neither `X` nor `O`.
    #[display("invalid symbol '{symbol}'")]
    InvalidSymbol {
        /// Symbol as received.
        symbol: String,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    size: Option<u32>,
    #[serde(default)]
    symbol: Option<String>,
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the frame is not a supported command.
#[instrument(skip(text), fields(len = text.len()))]
pub fn decode(text: &str) -> Result<Command, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })?;
    let action =
        Action::from_str(&envelope.action).map_err(|_| ProtocolError::UnknownAction {
            action: envelope.action.clone(),
        })?;
    trace!(%action, "Decoding command");

    let command = match action {
        Action::NewConnectionToRoom => Command::JoinRoom {
            password: envelope.password,
        },
        Action::Step => Command::PlaceMark(decode_position(envelope.data.as_ref())?),
        Action::SelectSymbol => {
            let raw = envelope.symbol.ok_or(ProtocolError::MissingField {
                action,
                field: "symbol",
            })?;
            Command::SelectSymbol(parse_symbol(&raw)?)
        }
        Action::Resize => match envelope.size {
            Some(size) if size > 0 => Command::ResizeBoard {
                size,
                raw: text.to_owned(),
            },
            _ => {
                return Err(ProtocolError::MissingField {
                    action,
                    field: "size",
                });
            }
        },
        Action::ResetGame => Command::ResetGame,
        Action::GameEnd => Command::GameEnded(decode_game_result(envelope.data.as_ref())?),
        Action::ExitRoom => Command::ExitRoom,
        Action::CloseRoom => Command::CloseRoom,
        Action::SyncSymbol
        | Action::ChooseSymbol
        | Action::GetPositions
        | Action::SelectedSymbol
        | Action::RestartGame => {
            return Err(ProtocolError::UnknownAction {
                action: envelope.action,
            });
        }
    };
    Ok(command)
}

fn parse_symbol(raw: &str) -> Result<Symbol, ProtocolError> {
    Symbol::from_str(raw).map_err(|_| ProtocolError::InvalidSymbol {
        symbol: raw.to_owned(),
    })
}

fn decode_position(data: Option<&Value>) -> Result<Position, ProtocolError> {
    let missing = |field| ProtocolError::MissingField {
        action: Action::Step,
        field,
    };
    let data = data.ok_or(missing("data"))?;
    let id = match data.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(missing("id")),
    };
    let symbol = data
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or(missing("symbol"))?;
    Ok(Position {
        id,
        symbol: parse_symbol(symbol)?,
    })
}

fn decode_game_result(data: Option<&Value>) -> Result<GameResult, ProtocolError> {
    let missing = |field| ProtocolError::MissingField {
        action: Action::GameEnd,
        field,
    };
    let data = data.ok_or(missing("data"))?;
    let won = match data.get("is_won") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => return Err(missing("is_won")),
    };
    let user_id = data
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or(missing("user_id"))?;
    let opponent_name = data
        .get("versus_player_nickname")
        .and_then(Value::as_str)
        .ok_or(missing("versus_player_nickname"))?;
    Ok(GameResult {
        won,
        user_id: user_id.to_owned(),
        opponent_name: opponent_name.to_owned(),
    })
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event name.
    pub action: Action,
    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Board size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Symbol, meaning depends on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    /// User the event is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Event {
    fn bare(action: Action) -> Self {
        Self {
            action,
            data: None,
            size: None,
            symbol: None,
            user_id: None,
        }
    }

    /// `new connection to room` naming the joining user.
    pub fn new_connection(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::bare(Action::NewConnectionToRoom)
        }
    }

    /// `resize` carrying the board size.
    pub fn resize(size: u32) -> Self {
        Self {
            size: Some(size),
            ..Self::bare(Action::Resize)
        }
    }

    /// `choose symbol` naming the seat that picks.
    pub fn choose_symbol(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::bare(Action::ChooseSymbol)
        }
    }

    /// `get positions` with the move history and the side to move.
    pub fn positions(board: &[Position], next: Option<Symbol>) -> Self {
        Self {
            data: Some(json!({ "positions": board })),
            symbol: next,
            ..Self::bare(Action::GetPositions)
        }
    }

    /// `sync symbol` telling a seat its auto-assigned symbol.
    pub fn sync_symbol(symbol: Symbol) -> Self {
        Self {
            symbol: Some(symbol),
            ..Self::bare(Action::SyncSymbol)
        }
    }

    /// `selected symbol` telling the other seat its symbol.
    pub fn selected_symbol(symbol: Option<Symbol>) -> Self {
        Self {
            symbol,
            ..Self::bare(Action::SelectedSymbol)
        }
    }

    /// `reset game`.
    pub fn reset_game() -> Self {
        Self::bare(Action::ResetGame)
    }

    /// `restart game`.
    pub fn restart_game() -> Self {
        Self::bare(Action::RestartGame)
    }

    /// Serializes the event to its wire text.
    pub fn to_text(&self) -> String {
        // Serializing plain strings and numbers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_step_with_numeric_cell() {
        let cmd = decode(r#"{"action":"step","data":{"id":0,"symbol":"X"}}"#).unwrap();
        assert_eq!(
            cmd,
            Command::PlaceMark(Position {
                id: "0".into(),
                symbol: Symbol::X
            })
        );
    }

    #[test]
    fn decodes_join_with_password() {
        let cmd = decode(r#"{"action":"new connection to room","password":"secret"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::JoinRoom {
                password: Some("secret".into())
            }
        );
    }

    #[test]
    fn resize_keeps_raw_frame() {
        let text = r#"{"action":"resize","size":5}"#;
        assert_eq!(
            decode(text).unwrap(),
            Command::ResizeBoard {
                size: 5,
                raw: text.into()
            }
        );
    }

    #[test]
    fn game_end_accepts_numeric_flag() {
        let cmd = decode(
            r#"{"action":"game end","data":{"is_won":1,"user_id":"u1","versus_player_nickname":"bob"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::GameEnded(GameResult {
                won: true,
                user_id: "u1".into(),
                opponent_name: "bob".into()
            })
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(
            decode(r#"{"action":"dance"}"#),
            Err(ProtocolError::UnknownAction { .. })
        ));
        assert!(matches!(
            decode(r#"{"action":"sync symbol"}"#),
            Err(ProtocolError::UnknownAction { .. })
        ));
        assert!(matches!(
            decode(r#"{"action":"select symbol","symbol":"Z"}"#),
            Err(ProtocolError::InvalidSymbol { .. })
        ));
        assert!(matches!(
            decode(r#"{"action":"step"}"#),
            Err(ProtocolError::MissingField { field: "data", .. })
        ));
    }

    #[test]
    fn events_omit_empty_fields() {
        let text = Event::reset_game().to_text();
        assert_eq!(text, r#"{"action":"reset game"}"#);

        let value: Value = serde_json::from_str(&Event::positions(&[], None).to_text()).unwrap();
        assert_eq!(value["action"], "get positions");
        assert_eq!(value["data"]["positions"], json!([]));
        assert!(value.get("symbol").is_none());
    }
}
