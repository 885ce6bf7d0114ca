//! Tests for room listings, creation and deletion.

use std::sync::Arc;

use tempfile::NamedTempFile;

use tictactoe_server::{
    CloseCode, Connection, ConnectionManager, CreateRoom, DirectoryError, GameRepository,
    Identity, NewUser, Occupant, Outbound, RoomDirectory, SessionRegistry, verify_password,
};

struct Fixture {
    _db: NamedTempFile,
    directory: RoomDirectory,
    registry: Arc<SessionRegistry>,
    alice: Identity,
    bob: Identity,
}

fn identity(repo: &GameRepository, id: &str) -> Identity {
    let email = format!("{}@example.com", id);
    repo.create_user(NewUser::new(
        id.to_string(),
        id.to_string(),
        email.clone(),
        "hash".to_string(),
    ))
    .expect("Create user failed");
    Identity {
        id: id.to_string(),
        name: id.to_string(),
        email,
    }
}

fn setup() -> Fixture {
    let db = NamedTempFile::new().expect("Failed to create temp file");
    let repo = GameRepository::new(db.path().to_str().unwrap().to_string())
        .expect("Failed to create repository");
    repo.run_migrations().expect("Migrations failed");
    let alice = identity(&repo, "alice");
    let bob = identity(&repo, "bob");
    let registry = Arc::new(SessionRegistry::default());
    Fixture {
        _db: db,
        directory: RoomDirectory::new(repo, Arc::clone(&registry), 4),
        registry,
        alice,
        bob,
    }
}

fn public(name: &str) -> CreateRoom {
    CreateRoom {
        name: name.to_string(),
        is_private: false,
        password: None,
    }
}

fn seat(registry: &Arc<SessionRegistry>, room_id: i32, user: &Identity) -> tokio::sync::mpsc::UnboundedReceiver<Outbound> {
    let (connection, rx) = Connection::new();
    ConnectionManager::new(Arc::clone(registry))
        .join(
            &Occupant {
                user_id: user.id.clone(),
                display_name: user.name.clone(),
            },
            room_id,
            connection,
        )
        .expect("Join failed");
    rx
}

#[test]
fn test_create_room_requires_known_owner() {
    let f = setup();
    let ghost = Identity {
        id: "ghost".to_string(),
        name: "ghost".to_string(),
        email: "ghost@example.com".to_string(),
    };
    let err = f.directory.create_room(&ghost, public("room1")).unwrap_err();
    assert!(matches!(err, DirectoryError::InvalidOwner { .. }));
}

#[test]
fn test_public_room_drops_password() {
    let f = setup();
    let room = f
        .directory
        .create_room(
            &f.alice,
            CreateRoom {
                name: "room1".to_string(),
                is_private: false,
                password: Some("ignored-pass".to_string()),
            },
        )
        .expect("Create failed");
    assert!(!room.is_private());
    assert!(room.password_hash().is_empty());
    assert_eq!(*room.capacity(), 2);
}

#[test]
fn test_private_room_stores_hash() {
    let f = setup();
    let room = f
        .directory
        .create_room(
            &f.alice,
            CreateRoom {
                name: "secret".to_string(),
                is_private: true,
                password: Some("room-pass".to_string()),
            },
        )
        .expect("Create failed");
    assert!(room.requires_password());
    assert!(verify_password("room-pass", room.password_hash()));
}

#[test]
fn test_private_room_with_empty_password_is_public() {
    let f = setup();
    let room = f
        .directory
        .create_room(
            &f.alice,
            CreateRoom {
                name: "secret".to_string(),
                is_private: true,
                password: Some(String::new()),
            },
        )
        .expect("Create failed");
    assert!(!room.is_private());
}

#[test]
fn test_available_rooms_hide_full_ones() {
    let f = setup();
    let open = *f.directory.create_room(&f.alice, public("open")).unwrap().id();
    let full = *f.directory.create_room(&f.alice, public("full")).unwrap().id();
    let _a = seat(&f.registry, open, &f.alice);
    let _b = seat(&f.registry, full, &f.alice);
    let _c = seat(&f.registry, full, &f.bob);

    let listings = f.directory.list_available().expect("List failed");

    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].id, open);
    assert_eq!(listings[0].player_in, 1);
}

#[test]
fn test_my_rooms_include_created_and_occupied() {
    let f = setup();
    let mine = *f.directory.create_room(&f.alice, public("mine")).unwrap().id();
    let theirs = *f.directory.create_room(&f.bob, public("theirs")).unwrap().id();
    let _other = *f.directory.create_room(&f.bob, public("other")).unwrap().id();
    let _a = seat(&f.registry, theirs, &f.alice);
    let _b = seat(&f.registry, theirs, &f.bob);

    let ids: Vec<i32> = f
        .directory
        .list_mine(&f.alice)
        .expect("List failed")
        .iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(ids, vec![mine, theirs]);
}

#[test]
fn test_room_info_includes_live_occupants() {
    let f = setup();
    let id = *f.directory.create_room(&f.alice, public("room1")).unwrap().id();

    let empty = f.directory.room_info(id).expect("Info failed");
    assert!(empty.live.is_none());

    let _a = seat(&f.registry, id, &f.bob);
    let info = f.directory.room_info(id).expect("Info failed");
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["creator_id"], "alice");
    assert_eq!(json["users"][0]["id"], "bob");
    assert_eq!(json["board_size"], 3);
}

#[test]
fn test_room_info_missing_room() {
    let f = setup();
    assert!(matches!(
        f.directory.room_info(404),
        Err(DirectoryError::NotFound { room_id: 404 })
    ));
}

#[test]
fn test_only_creator_may_delete() {
    let f = setup();
    let id = *f.directory.create_room(&f.alice, public("room1")).unwrap().id();
    let err = f.directory.delete_room(&f.bob, id).unwrap_err();
    assert!(matches!(err, DirectoryError::Forbidden { .. }));
    assert!(f.directory.find(id).is_ok());
}

#[test]
fn test_delete_soft_deletes_and_closes_session() {
    let f = setup();
    let id = *f.directory.create_room(&f.alice, public("room1")).unwrap().id();
    let mut rx = seat(&f.registry, id, &f.bob);

    f.directory.delete_room(&f.alice, id).expect("Delete failed");

    assert!(matches!(f.directory.find(id), Err(DirectoryError::NotFound { .. })));
    assert!(f.registry.get(id).unwrap().is_none());
    assert!(f.directory.list_available().unwrap().is_empty());
    assert_eq!(
        rx.try_recv().ok(),
        Some(Outbound::Close {
            code: CloseCode::Normal,
            reason: "room is closed".to_string(),
        })
    );
}

#[test]
fn test_close_room_twice_is_not_found() {
    let f = setup();
    let id = *f.directory.create_room(&f.alice, public("room1")).unwrap().id();
    f.directory.close_room(id).expect("Close failed");
    assert!(matches!(
        f.directory.close_room(id),
        Err(DirectoryError::NotFound { .. })
    ));
}
