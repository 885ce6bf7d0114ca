//! Scenario tests for the game protocol engine.
//!
//! Connections are plain mpsc receivers; scores go to an in-memory store.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use tictactoe_server::{
    CloseCode, Connection, ConnectionManager, DbError, Flow, GameEngine, GameStatus, JoinError,
    NewScore, Occupant, Outbound, RoomContext, RoomSnapshot, ScoreStore, SeatContext,
    SessionRegistry, Symbol, decode, hash_password,
};

#[derive(Default)]
struct RecordingScores {
    scores: Mutex<Vec<NewScore>>,
}

impl ScoreStore for RecordingScores {
    fn append_score(&self, score: NewScore) -> Result<(), DbError> {
        self.scores.lock().unwrap().push(score);
        Ok(())
    }
}

impl RecordingScores {
    fn recorded(&self) -> Vec<NewScore> {
        self.scores.lock().unwrap().clone()
    }
}

struct Player {
    ctx: SeatContext,
    rx: UnboundedReceiver<Outbound>,
}

impl Player {
    fn frames(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn events(&mut self) -> Vec<Value> {
        self.frames()
            .iter()
            .filter_map(|f| match f {
                Outbound::Text(text) => Some(serde_json::from_str(text).unwrap()),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    fn close(&mut self) -> Option<(CloseCode, String)> {
        self.frames().into_iter().find_map(|f| match f {
            Outbound::Close { code, reason } => Some((code, reason)),
            Outbound::Text(_) => None,
        })
    }
}

struct Table {
    engine: GameEngine,
    scores: Arc<RecordingScores>,
    room: RoomContext,
}

impl Table {
    fn new() -> Self {
        Self::with_room(RoomContext {
            id: 1,
            creator_id: "u1".to_string(),
            password_hash: None,
        })
    }

    fn with_room(room: RoomContext) -> Self {
        let scores = Arc::new(RecordingScores::default());
        let registry = Arc::new(SessionRegistry::default());
        let engine = GameEngine::new(ConnectionManager::new(registry), scores.clone());
        Self {
            engine,
            scores,
            room,
        }
    }

    fn try_connect(&self, user_id: &str) -> Result<Player, JoinError> {
        let occupant = Occupant {
            user_id: user_id.to_string(),
            display_name: format!("{}-name", user_id),
        };
        let (connection, rx) = Connection::new();
        self.engine.connections().join_with(
            &occupant,
            self.room.id,
            connection.clone(),
            self.room.admission(),
        )?;
        Ok(Player {
            ctx: SeatContext {
                room: self.room.clone(),
                occupant,
                connection,
            },
            rx,
        })
    }

    fn connect(&self, user_id: &str) -> Player {
        self.try_connect(user_id).unwrap()
    }

    async fn send(&self, player: &Player, frame: &str) -> Flow {
        let command = decode(frame).unwrap();
        self.engine.handle(&player.ctx, command).await.unwrap()
    }

    fn snapshot(&self) -> Option<RoomSnapshot> {
        self.engine
            .connections()
            .registry()
            .snapshot(self.room.id)
            .unwrap()
    }

    fn symbol_of(&self, user_id: &str) -> Option<Symbol> {
        self.snapshot()?
            .users
            .into_iter()
            .find(|u| u.id == user_id)
            .and_then(|u| u.symbol)
    }
}

const JOIN: &str = r#"{"action":"new connection to room"}"#;

fn actions(events: &[Value]) -> Vec<&str> {
    events.iter().filter_map(|e| e["action"].as_str()).collect()
}

/// Two seated players with X and O, game in progress.
async fn game_in_progress(table: &Table) -> (Player, Player) {
    let mut p1 = table.connect("u1");
    table.send(&p1, JOIN).await;
    table
        .send(&p1, r#"{"action":"select symbol","symbol":"X"}"#)
        .await;
    let mut p2 = table.connect("u2");
    table.send(&p2, JOIN).await;
    p1.frames();
    p2.frames();
    (p1, p2)
}

#[tokio::test]
async fn test_scenario_a_first_player_chooses_second_is_auto_assigned() {
    let table = Table::new();
    let mut p1 = table.connect("u1");

    assert_eq!(table.send(&p1, JOIN).await, Flow::Continue);
    let events = p1.events();
    assert_eq!(
        actions(&events),
        vec!["new connection to room", "resize", "choose symbol", "get positions"]
    );
    assert_eq!(events[0]["user_id"], "u1");
    assert_eq!(events[1]["size"], 3);
    assert_eq!(events[2]["user_id"], "u1");
    assert_eq!(events[3]["data"]["positions"], serde_json::json!([]));

    assert_eq!(
        table
            .send(&p1, r#"{"action":"select symbol","symbol":"X"}"#)
            .await,
        Flow::Continue
    );
    assert!(p1.events().is_empty());
    assert_eq!(table.symbol_of("u1"), Some(Symbol::X));
    assert_eq!(
        table.snapshot().unwrap().status,
        GameStatus::AwaitingSymbolChoice
    );

    let mut p2 = table.connect("u2");
    table.send(&p2, JOIN).await;

    let events = p2.events();
    let sync: Vec<_> = events
        .iter()
        .filter(|e| e["action"] == "sync symbol")
        .collect();
    assert_eq!(sync.len(), 1);
    assert_eq!(sync[0]["symbol"], "O");
    assert!(p1.events().iter().all(|e| e["action"] != "sync symbol"));
    assert_eq!(table.symbol_of("u2"), Some(Symbol::O));
    assert_eq!(table.snapshot().unwrap().status, GameStatus::InProgress);
}

#[tokio::test]
async fn test_scenario_b_mark_is_broadcast_with_next_symbol() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;

    let flow = table
        .send(&p1, r#"{"action":"step","data":{"id":0,"symbol":"X"}}"#)
        .await;

    assert_eq!(flow, Flow::Continue);
    for events in [p1.events(), p2.events()] {
        assert_eq!(actions(&events), vec!["get positions"]);
        assert_eq!(events[0]["symbol"], "O");
        let positions = events[0]["data"]["positions"].as_array().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0]["id"], "0");
        assert_eq!(positions[0]["symbol"], "X");
    }
}

#[tokio::test]
async fn test_scenario_c_third_player_is_refused() {
    let table = Table::new();
    let (_p1, _p2) = game_in_progress(&table).await;

    let err = table.try_connect("u3").err().unwrap();

    assert_eq!(err, JoinError::RoomFull);
    let users = table.snapshot().unwrap().users;
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.id != "u3"));
}

#[tokio::test]
async fn test_scenario_d_exit_mid_game_records_scores_and_resets_opponent() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;
    table
        .send(&p1, r#"{"action":"step","data":{"id":4,"symbol":"X"}}"#)
        .await;
    p2.frames();

    let flow = table.send(&p1, r#"{"action":"exit room"}"#).await;

    assert_eq!(flow, Flow::Stop);
    assert_eq!(
        table.scores.recorded(),
        vec![
            NewScore::new("u2".to_string(), true, "u1-name".to_string()),
            NewScore::new("u1".to_string(), false, "u2-name".to_string()),
        ]
    );
    let snapshot = table.snapshot().unwrap();
    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.users[0].id, "u2");
    assert_eq!(snapshot.users[0].symbol, None);
    assert!(snapshot.positions.is_empty());
    assert_eq!(snapshot.status, GameStatus::AwaitingSymbolChoice);

    let events = p2.events();
    assert_eq!(actions(&events), vec!["choose symbol", "get positions"]);
    assert_eq!(events[0]["user_id"], "u2");
    assert_eq!(events[1]["data"]["positions"], serde_json::json!([]));
    assert_eq!(p1.close().map(|(code, _)| code), Some(CloseCode::Normal));
}

#[tokio::test]
async fn test_scenario_e_close_room_disconnects_everyone() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;

    let flow = table.send(&p2, r#"{"action":"close room"}"#).await;

    assert_eq!(flow, Flow::Stop);
    assert!(table.snapshot().is_none());
    for player in [&mut p1, &mut p2] {
        assert_eq!(
            player.close(),
            Some((CloseCode::Normal, "room is closed".to_string()))
        );
    }
    assert_eq!(
        table.send(&p1, r#"{"action":"reset game"}"#).await,
        Flow::Stop
    );
}

#[tokio::test]
async fn test_exit_before_game_starts_records_nothing() {
    let table = Table::new();
    let p1 = table.connect("u1");
    table.send(&p1, JOIN).await;
    let p2 = table.connect("u2");
    table.send(&p2, JOIN).await;

    table.send(&p2, r#"{"action":"exit room"}"#).await;

    assert!(table.scores.recorded().is_empty());
    assert_eq!(table.snapshot().unwrap().users.len(), 1);
}

#[tokio::test]
async fn test_last_seat_exit_removes_session() {
    let table = Table::new();
    let p1 = table.connect("u1");
    table.send(&p1, JOIN).await;

    table.send(&p1, r#"{"action":"exit room"}"#).await;

    assert!(table.snapshot().is_none());
}

#[tokio::test]
async fn test_reset_twice_leaves_empty_board() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;
    table
        .send(&p1, r#"{"action":"step","data":{"id":"1","symbol":"X"}}"#)
        .await;
    p1.frames();
    p2.frames();

    for _ in 0..2 {
        assert_eq!(
            table.send(&p2, r#"{"action":"reset game"}"#).await,
            Flow::Continue
        );
        assert!(table.snapshot().unwrap().positions.is_empty());
    }
    assert_eq!(actions(&p1.events()), vec!["reset game", "reset game"]);
    assert_eq!(actions(&p2.events()), vec!["reset game", "reset game"]);
}

#[tokio::test]
async fn test_select_symbol_assigns_opposite_to_other_seat() {
    let table = Table::new();
    let mut p1 = table.connect("u1");
    table.send(&p1, JOIN).await;
    let mut p2 = table.connect("u2");
    table.send(&p2, JOIN).await;
    p1.frames();
    p2.frames();

    table
        .send(&p2, r#"{"action":"select symbol","symbol":"X"}"#)
        .await;

    assert_eq!(table.symbol_of("u2"), Some(Symbol::X));
    assert_eq!(table.symbol_of("u1"), Some(Symbol::O));
    assert_eq!(table.snapshot().unwrap().status, GameStatus::InProgress);
    let events = p1.events();
    assert_eq!(actions(&events), vec!["selected symbol"]);
    assert_eq!(events[0]["symbol"], "O");
    assert!(p2.events().is_empty());

    table
        .send(&p1, r#"{"action":"select symbol","symbol":"X"}"#)
        .await;
    assert_eq!(table.symbol_of("u1"), Some(Symbol::O));
}

#[tokio::test]
async fn test_taken_symbol_request_gets_the_other_one() {
    let table = Table::new();
    let p1 = table.connect("u1");
    table.send(&p1, JOIN).await;
    table
        .send(&p1, r#"{"action":"select symbol","symbol":"O"}"#)
        .await;
    let p2 = table.connect("u2");

    table
        .send(&p2, r#"{"action":"select symbol","symbol":"O"}"#)
        .await;

    assert_eq!(table.symbol_of("u1"), Some(Symbol::O));
    assert_eq!(table.symbol_of("u2"), Some(Symbol::X));
}

#[tokio::test]
async fn test_only_creator_may_resize() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;
    let raw = r#"{"action":"resize","size":5}"#;

    assert_eq!(table.send(&p2, raw).await, Flow::Continue);
    assert_eq!(table.snapshot().unwrap().board_size, 3);
    assert!(p1.events().is_empty());

    table.send(&p1, raw).await;
    assert_eq!(table.snapshot().unwrap().board_size, 5);
    match p2.frames().as_slice() {
        [Outbound::Text(text)] => assert_eq!(text.as_ref(), raw),
        other => panic!("unexpected frames: {:?}", other),
    }
    assert!(p1.events().is_empty());
}

#[tokio::test]
async fn test_game_end_records_score_and_prompts_restart() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;

    let flow = table
        .send(
            &p1,
            r#"{"action":"game end","data":{"is_won":1,"user_id":"u1","versus_player_nickname":"u2-name"}}"#,
        )
        .await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(table.snapshot().unwrap().status, GameStatus::Ended);
    assert_eq!(
        table.scores.recorded(),
        vec![NewScore::new("u1".to_string(), true, "u2-name".to_string())]
    );
    assert_eq!(actions(&p2.events()), vec!["restart game"]);
    assert!(p1.events().is_empty());
}

#[tokio::test]
async fn test_reconnect_keeps_symbol_and_board() {
    let table = Table::new();
    let (p1, _p2) = game_in_progress(&table).await;
    table
        .send(&p1, r#"{"action":"step","data":{"id":2,"symbol":"X"}}"#)
        .await;

    let mut stale = p1;
    let fresh = table.connect("u1");

    assert_eq!(table.symbol_of("u1"), Some(Symbol::X));
    assert_eq!(table.snapshot().unwrap().positions.len(), 1);
    assert_eq!(
        stale.close(),
        Some((CloseCode::Normal, "replaced by a new connection".to_string()))
    );
    assert_eq!(
        table.send(&stale, r#"{"action":"reset game"}"#).await,
        Flow::Stop
    );
    assert_eq!(table.snapshot().unwrap().positions.len(), 1);
    assert_eq!(
        table.send(&fresh, r#"{"action":"reset game"}"#).await,
        Flow::Continue
    );
}

fn private_table() -> Table {
    let hash = hash_password("secret-pass", 4).unwrap();
    Table::with_room(RoomContext {
        id: 9,
        creator_id: "u1".to_string(),
        password_hash: Some(hash),
    })
}

const PRIVATE_JOIN: &str = r#"{"action":"new connection to room","password":"secret-pass"}"#;

#[tokio::test]
async fn test_wrong_room_password_releases_seat() {
    let table = private_table();
    let mut intruder = table.connect("u2");

    let flow = table
        .send(
            &intruder,
            r#"{"action":"new connection to room","password":"guess"}"#,
        )
        .await;

    assert_eq!(flow, Flow::Stop);
    assert_eq!(
        intruder.close(),
        Some((CloseCode::PolicyViolation, "password is not valid".to_string()))
    );
    assert!(table.snapshot().is_none());
}

#[tokio::test]
async fn test_right_room_password_joins() {
    let table = private_table();
    let mut player = table.connect("u1");

    let flow = table.send(&player, PRIVATE_JOIN).await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(player.events().len(), 4);
}

#[tokio::test]
async fn test_symbols_stay_opposite_through_a_session() {
    let table = Table::new();
    let (p1, p2) = game_in_progress(&table).await;
    table.send(&p1, r#"{"action":"reset game"}"#).await;
    table
        .send(&p2, r#"{"action":"select symbol","symbol":"O"}"#)
        .await;

    let users = table.snapshot().unwrap().users;
    assert_eq!(users.len(), 2);
    let (a, b) = (users[0].symbol.unwrap(), users[1].symbol.unwrap());
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_private_room_refuses_commands_before_password_join() {
    let table = private_table();
    let owner = table.connect("u1");
    assert_eq!(table.send(&owner, PRIVATE_JOIN).await, Flow::Continue);
    let mut intruder = table.connect("u2");

    let flow = table
        .send(&intruder, r#"{"action":"step","data":{"id":"0-0","symbol":"X"}}"#)
        .await;

    assert_eq!(flow, Flow::Stop);
    assert_eq!(
        intruder.close(),
        Some((CloseCode::PolicyViolation, "password is required".to_string()))
    );
    let snapshot = table.snapshot().unwrap();
    assert!(snapshot.positions.is_empty());
    assert_eq!(snapshot.status, GameStatus::AwaitingSymbolChoice);
    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.users[0].id, "u1");

    assert_eq!(
        table.send(&intruder, r#"{"action":"close room"}"#).await,
        Flow::Stop
    );
    assert!(table.snapshot().is_some());
    assert!(table.try_connect("u3").is_ok());
}

#[tokio::test]
async fn test_wrong_password_on_reconnect_keeps_seat_and_game() {
    let table = private_table();
    let p1 = table.connect("u1");
    table.send(&p1, PRIVATE_JOIN).await;
    table
        .send(&p1, r#"{"action":"select symbol","symbol":"X"}"#)
        .await;
    let mut p2 = table.connect("u2");
    table.send(&p2, PRIVATE_JOIN).await;
    table
        .send(&p1, r#"{"action":"step","data":{"id":"0-0","symbol":"X"}}"#)
        .await;
    p2.frames();

    let mut retry = table.connect("u1");
    let flow = table
        .send(
            &retry,
            r#"{"action":"new connection to room","password":"typo"}"#,
        )
        .await;

    assert_eq!(flow, Flow::Stop);
    assert_eq!(
        retry.close(),
        Some((CloseCode::PolicyViolation, "password is not valid".to_string()))
    );
    let snapshot = table.snapshot().unwrap();
    assert_eq!(snapshot.users.len(), 2);
    let u1 = snapshot.users.iter().find(|u| u.id == "u1").unwrap();
    assert_eq!(u1.symbol, Some(Symbol::X));
    assert!(!u1.connected);
    assert_eq!(snapshot.positions.len(), 1);
    assert_eq!(snapshot.status, GameStatus::InProgress);
    assert!(p2.events().is_empty());

    let back = table.connect("u1");
    assert_eq!(table.send(&back, PRIVATE_JOIN).await, Flow::Continue);
    assert_eq!(table.symbol_of("u1"), Some(Symbol::X));
    assert_eq!(table.snapshot().unwrap().positions.len(), 1);
}

#[tokio::test]
async fn test_resize_is_ignored_while_marks_are_on_the_board() {
    let table = Table::new();
    let (mut p1, mut p2) = game_in_progress(&table).await;
    table
        .send(&p2, r#"{"action":"step","data":{"id":"1","symbol":"O"}}"#)
        .await;
    p1.frames();
    p2.frames();

    let flow = table.send(&p1, r#"{"action":"resize","size":4}"#).await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(table.snapshot().unwrap().board_size, 3);
    assert!(p2.frames().is_empty());

    table.send(&p1, r#"{"action":"reset game"}"#).await;
    table.send(&p1, r#"{"action":"resize","size":4}"#).await;
    assert_eq!(table.snapshot().unwrap().board_size, 4);
}

#[tokio::test]
async fn test_disconnected_room_with_marks_stays_live() {
    let table = Table::new();
    let (p1, p2) = game_in_progress(&table).await;
    table
        .send(&p1, r#"{"action":"step","data":{"id":"4","symbol":"X"}}"#)
        .await;
    let connections = table.engine.connections();

    connections
        .leave(table.room.id, p1.ctx.connection.id())
        .unwrap();
    connections
        .leave(table.room.id, p2.ctx.connection.id())
        .unwrap();

    let snapshot = table.snapshot().unwrap();
    assert!(snapshot.users.iter().all(|u| !u.connected));
    assert_eq!(snapshot.positions.len(), 1);
}
