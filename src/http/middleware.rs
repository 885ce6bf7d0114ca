//! Bearer-token authentication.

use std::collections::HashMap;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Uri, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, instrument};

use crate::http::AppState;
use crate::http::error::{ApiError, ApiErrorKind};

/// Token from the `Authorization` header, else from a `token` query parameter.
///
/// Browsers cannot set headers on a WebSocket upgrade, hence the fallback.
pub fn bearer_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(value) = from_header {
        return Some(value.to_owned());
    }
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove("token"))
        .filter(|token| !token.trim().is_empty())
}

/// Resolves the caller and stores its [`Identity`](crate::auth::Identity)
/// in request extensions.
#[instrument(skip_all, fields(uri = %request.uri()))]
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers(), request.uri())
        .ok_or_else(|| ApiError::new(ApiErrorKind::Unauthorized, "token is missing"))?;
    let auth = state.auth.clone();
    let identity = tokio::task::spawn_blocking(move || auth.verify(&token)).await??;
    debug!(user_id = %identity.id, "Request authenticated");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
