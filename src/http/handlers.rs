//! JSON endpoints.

use axum::Extension;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, instrument};

use crate::auth::Identity;
use crate::db::Score;
use crate::directory::RoomListing;
use crate::http::error::{ApiError, ApiErrorKind};
use crate::http::validation::{CreateRoomRequest, SignInRequest, SignUpRequest};
use crate::http::{AppState, respond};
use crate::rooms::RoomId;

/// Runs blocking storage or hashing work off the async runtime.
async fn blocking<T, E, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?.map_err(Into::into)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::new(ApiErrorKind::BadRequest, e.body_text()))
}

/// Public user fields.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Wins so far, only on `/users/current`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_won_score: Option<i64>,
    /// Account creation time.
    pub created_at: NaiveDateTime,
}

/// Token issued by sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    /// Bearer token.
    pub token: String,
}

/// `POST /auth/sign-up`
#[instrument(skip_all)]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let form = body(payload)?.validate()?;
    let auth = state.auth.clone();
    let user = blocking(move || auth.sign_up(form)).await?;
    info!(user_id = %user.id(), "Sign-up complete");
    let view = UserView {
        id: user.id().clone(),
        name: user.name().clone(),
        email: user.email().clone(),
        current_won_score: None,
        created_at: *user.created_at(),
    };
    Ok(respond(StatusCode::CREATED, Some(view), Some("user created")))
}

/// `POST /auth/sign-in`
#[instrument(skip_all)]
pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let form = body(payload)?;
    form.validate()?;
    let auth = state.auth.clone();
    let token = blocking(move || auth.authenticate(&form.email, &form.password)).await?;
    Ok(respond(StatusCode::OK, Some(TokenView { token }), None))
}

/// `GET /rooms`
#[instrument(skip_all)]
pub async fn list_rooms(State(state): State<AppState>) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    let rooms = blocking(move || directory.list_available()).await?;
    Ok(respond(StatusCode::OK, Some(rooms), None))
}

/// `GET /rooms/my`
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn my_rooms(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    let rooms = blocking(move || directory.list_mine(&identity)).await?;
    Ok(respond(StatusCode::OK, Some(rooms), None))
}

/// `POST /rooms`
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn create_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let form = body(payload)?.validate()?;
    let directory = state.directory.clone();
    let room = blocking(move || directory.create_room(&identity, form)).await?;
    let listing = RoomListing {
        id: *room.id(),
        name: room.name().clone(),
        is_private: *room.is_private(),
        capacity: *room.capacity(),
        player_in: 0,
    };
    Ok(respond(StatusCode::CREATED, Some(listing), Some("room created")))
}

/// `GET /rooms/{id}/info`
#[instrument(skip(state))]
pub async fn room_info(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    let info = blocking(move || directory.room_info(room_id)).await?;
    Ok(respond(StatusCode::OK, Some(info), None))
}

/// `DELETE /rooms/{id}`
#[instrument(skip(state, identity), fields(user_id = %identity.id))]
pub async fn delete_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<RoomId>,
) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    blocking(move || directory.delete_room(&identity, room_id)).await?;
    Ok(respond::<()>(StatusCode::OK, None, Some("room deleted")))
}

/// `GET /users/current`
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn current_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    let repository = state.repository.clone();
    let (user, wins) = blocking(move || {
        let user = repository.find_user_by_id(&identity.id)?;
        let wins = repository.count_wins(&identity.id)?;
        Ok::<_, crate::db::DbError>((user, wins))
    })
    .await?;
    let user = user.ok_or_else(|| ApiError::new(ApiErrorKind::NotFound, "user not found"))?;
    let view = UserView {
        id: user.id().clone(),
        name: user.name().clone(),
        email: user.email().clone(),
        current_won_score: Some(wins),
        created_at: *user.created_at(),
    };
    Ok(respond(StatusCode::OK, Some(view), None))
}

/// `GET /scores`
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn scores(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    let repository = state.repository.clone();
    let scores: Vec<Score> = blocking(move || repository.list_scores(&identity.id)).await?;
    Ok(respond(StatusCode::OK, Some(scores), None))
}
