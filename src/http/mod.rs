//! HTTP and WebSocket transport.

mod error;
mod handlers;
mod middleware;
mod validation;
mod ws;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tracing::{info, instrument};

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::db::GameRepository;
use crate::directory::RoomDirectory;
use crate::rooms::{ConnectionManager, GameEngine, SessionRegistry};

pub use error::{ApiError, ApiErrorKind};
pub use handlers::{TokenView, UserView};
pub use middleware::bearer_token;
pub use validation::{CreateRoomRequest, FieldErrors, SignInRequest, SignUpRequest};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Storage.
    pub repository: GameRepository,
    /// Token and credential checks.
    pub auth: AuthService,
    /// Room listings and lifecycle.
    pub directory: RoomDirectory,
    /// Gameplay core.
    pub engine: GameEngine,
}

impl AppState {
    /// Wires every service around one repository and one registry.
    #[instrument(skip_all)]
    pub fn new(config: &ServerConfig, repository: GameRepository, registry: Arc<SessionRegistry>) -> Self {
        let auth = AuthService::new(
            repository.clone(),
            config.jwt_secret(),
            *config.token_ttl_secs(),
            *config.bcrypt_cost(),
        );
        let directory = RoomDirectory::new(repository.clone(), Arc::clone(&registry), *config.bcrypt_cost());
        let engine = GameEngine::new(ConnectionManager::new(registry), Arc::new(repository.clone()));
        Self {
            repository,
            auth,
            directory,
            engine,
        }
    }

    /// Live session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.engine.connections().registry()
    }
}

/// Response body shape shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Per-field validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    /// Human-readable note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub(crate) fn respond<T: Serialize>(status: StatusCode, data: Option<T>, message: Option<&str>) -> Response {
    let body = Envelope {
        data,
        errors: None,
        message: message.map(str::to_owned),
    };
    (status, Json(body)).into_response()
}

/// Builds the application router.
#[instrument(skip_all)]
pub fn router(state: AppState) -> Router {
    let auth = axum::middleware::from_fn_with_state(state.clone(), middleware::require_identity);

    Router::new()
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/sign-up", post(handlers::sign_up))
        .route(
            "/rooms",
            get(handlers::list_rooms).merge(post(handlers::create_room).route_layer(auth.clone())),
        )
        .route("/rooms/my", get(handlers::my_rooms).route_layer(auth.clone()))
        .route(
            "/rooms/{id}",
            get(ws::join_room)
                .delete(handlers::delete_room)
                .route_layer(auth.clone()),
        )
        .route("/rooms/{id}/info", get(handlers::room_info).route_layer(auth.clone()))
        .route("/users/current", get(handlers::current_user).route_layer(auth.clone()))
        .route("/scores", get(handlers::scores).route_layer(auth))
        .layer(ServiceBuilder::new().map_request(|req: Request<Body>| {
            info!(method = %req.method(), uri = %req.uri().path(), "Incoming HTTP request");
            req
        }))
        .with_state(state)
}
