//! Credential checks, password hashing and bearer tokens.

use chrono::Utc;
use derive_more::{Display, Error};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{GameRepository, NewUser, User};

/// Authenticated caller attached to requests and connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id().clone(),
            name: user.name().clone(),
            email: user.email().clone(),
        }
    }
}

/// Category of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum AuthErrorKind {
    /// Unknown email or wrong password.
    InvalidCredentials,
    /// Email already registered.
    Conflict,
    /// Token expired.
    TokenExpired,
    /// Token malformed or signed with another key.
    TokenInvalid,
    /// Token is valid but its user no longer exists.
    UnknownUser,
    /// Hashing or signing failed.
    Crypto,
    /// Storage failure.
    Storage,
}

/// Authentication error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Auth error ({}): {} at {}:{}", kind, message, file, line)]
pub struct AuthError {
    /// Error category.
    pub kind: AuthErrorKind,
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl AuthError {
    /// Creates a new auth error with caller location tracking.
    #[track_caller]
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

impl From<crate::db::DbError> for AuthError {
    #[track_caller]
    fn from(err: crate::db::DbError) -> Self {
        let kind = if err.unique_violation {
            AuthErrorKind::Conflict
        } else {
            AuthErrorKind::Storage
        };
        Self::new(kind, err.message)
    }
}

/// Hashes a password with bcrypt.
///
/// # Errors
///
/// Returns [`AuthErrorKind::Crypto`] if hashing fails.
#[instrument(skip(password))]
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost)
        .map_err(|e| AuthError::new(AuthErrorKind::Crypto, format!("Hashing failed: {}", e)))
}

/// Checks a password against a bcrypt hash. Malformed hashes never match.
#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or_else(|e| {
        warn!(error = %e, "Stored hash could not be checked");
        false
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    exp: i64,
}

/// Sign-up form after validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUp {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Plain password.
    pub password: String,
}

/// Issues and verifies HS256 bearer tokens backed by the user table.
#[derive(Clone)]
pub struct AuthService {
    repository: GameRepository,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl_secs: i64,
    bcrypt_cost: u32,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Creates the service.
    #[instrument(skip(repository, secret))]
    pub fn new(repository: GameRepository, secret: &str, token_ttl_secs: u64, bcrypt_cost: u32) -> Self {
        info!("Creating AuthService");
        Self {
            repository,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl_secs: i64::try_from(token_ttl_secs).unwrap_or(i64::MAX / 2),
            bcrypt_cost,
        }
    }

    /// Cost used for room and user password hashes.
    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    /// Registers a new user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthErrorKind::Conflict`] if the email is taken.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub fn sign_up(&self, form: SignUp) -> Result<User, AuthError> {
        let email = form.email.trim().to_owned();
        if self.repository.find_user_by_email(&email)?.is_some() {
            warn!("Email already registered");
            return Err(AuthError::new(
                AuthErrorKind::Conflict,
                "user with this email already exists",
            ));
        }
        let password_hash = hash_password(form.password.trim(), self.bcrypt_cost)?;
        let user = self.repository.create_user(NewUser::new(
            Uuid::new_v4().to_string(),
            form.name.trim().to_owned(),
            email,
            password_hash,
        ))?;
        info!(user_id = %user.id(), "User signed up");
        Ok(user)
    }

    /// Checks credentials and returns a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthErrorKind::InvalidCredentials`] for an unknown email or
    /// wrong password.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .repository
            .find_user_by_email(email.trim())?
            .ok_or_else(|| AuthError::new(AuthErrorKind::InvalidCredentials, "user not found"))?;
        if !verify_password(password.trim(), user.password_hash()) {
            warn!(user_id = %user.id(), "Wrong password");
            return Err(AuthError::new(
                AuthErrorKind::InvalidCredentials,
                "password is not valid",
            ));
        }
        self.issue_token(&user)
    }

    /// Signs a token for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthErrorKind::Crypto`] if signing fails.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub fn issue_token(&self, user: &User) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user.id().clone(),
            email: user.email().clone(),
            exp: Utc::now().timestamp().saturating_add(self.token_ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::new(AuthErrorKind::Crypto, format!("Signing failed: {}", e)))
    }

    /// Resolves a token, with or without a `Bearer ` prefix, to its user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthErrorKind::TokenExpired`], [`AuthErrorKind::TokenInvalid`]
    /// or [`AuthErrorKind::UnknownUser`].
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AuthError::new(AuthErrorKind::TokenExpired, "token is expired")
                }
                _ => AuthError::new(AuthErrorKind::TokenInvalid, "your token is invalid"),
            },
        )?;

        let user = self
            .repository
            .find_user_by_id(&data.claims.sub)?
            .ok_or_else(|| AuthError::new(AuthErrorKind::UnknownUser, "user not found"))?;
        debug!(user_id = %user.id(), "Token verified");
        Ok(Identity::from(&user))
    }
}
