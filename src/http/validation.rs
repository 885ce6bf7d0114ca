//! Request bodies and their validation rules.
//!
//! Validation runs before anything reaches the auth service, directory or
//! game core. Lengths count characters, not bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::auth::SignUp;
use crate::directory::CreateRoom;
use crate::http::error::ApiError;

/// Field name to failure messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    fn length(&mut self, field: &'static str, value: &str, min: usize, max: usize) {
        let len = value.trim().chars().count();
        if len == 0 {
            self.push(field, "is required");
        } else if len < min {
            self.push(field, format!("must be at least {} characters", min));
        } else if len > max {
            self.push(field, format!("must be at most {} characters", max));
        }
    }

    /// Whether `field` failed.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Whether every field passed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self))
        }
    }
}

/// `POST /auth/sign-up` body.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Must equal `password`.
    #[serde(default)]
    pub password_confirmation: String,
}

impl SignUpRequest {
    /// Checks the form and converts it for the auth service.
    pub fn validate(self) -> Result<SignUp, ApiError> {
        let mut errors = FieldErrors::default();
        errors.length("name", &self.name, 4, 255);
        errors.length("email", &self.email, 8, 255);
        if !self.email.contains('@') {
            errors.push("email", "must be a valid email address");
        }
        errors.length("password", &self.password, 8, 255);
        errors.length("password_confirmation", &self.password_confirmation, 8, 255);
        if self.password != self.password_confirmation {
            errors.push("password", "must match password_confirmation");
        }
        errors.finish()?;
        Ok(SignUp {
            name: self.name,
            email: self.email,
            password: self.password,
        })
    }
}

/// `POST /auth/sign-in` body.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

impl SignInRequest {
    /// Checks field lengths.
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::default();
        errors.length("email", &self.email, 4, 255);
        errors.length("password", &self.password, 8, 64);
        errors.finish()
    }
}

/// `POST /rooms` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    /// Room name.
    #[serde(default)]
    pub name: String,
    /// Whether joining needs a password.
    pub is_private: Option<bool>,
    /// Room password, required when private.
    pub password: Option<String>,
}

impl CreateRoomRequest {
    /// Checks the form and converts it for the directory.
    pub fn validate(self) -> Result<CreateRoom, ApiError> {
        let mut errors = FieldErrors::default();
        errors.length("name", &self.name, 4, 255);
        let is_private = match self.is_private {
            Some(is_private) => is_private,
            None => {
                errors.push("is_private", "is required");
                false
            }
        };
        match self.password.as_deref() {
            Some(password) if password.chars().count() > 255 => {
                errors.push("password", "must be at most 255 characters");
            }
            None if is_private => errors.push("password", "is required for a private room"),
            _ => {}
        }
        errors.finish()?;
        Ok(CreateRoom {
            name: self.name.trim().to_owned(),
            is_private,
            password: self.password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up(name: &str, email: &str, password: &str, confirmation: &str) -> SignUpRequest {
        SignUpRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            password_confirmation: confirmation.into(),
        }
    }

    #[test]
    fn valid_sign_up_passes() {
        let form = sign_up("alice", "alice@example.com", "password1", "password1")
            .validate()
            .unwrap();
        assert_eq!(form.email, "alice@example.com");
    }

    #[test]
    fn sign_up_reports_every_bad_field() {
        let err = sign_up("al", "nope", "short", "other").validate().unwrap_err();
        let errors = err.errors.unwrap();
        assert!(errors.contains("name"));
        assert!(errors.contains("email"));
        assert!(errors.contains("password"));
        assert!(errors.contains("password_confirmation"));
    }

    #[test]
    fn sign_up_requires_matching_confirmation() {
        let err = sign_up("alice", "alice@example.com", "password1", "password2")
            .validate()
            .unwrap_err();
        let errors = err.errors.unwrap();
        assert!(errors.contains("password"));
        assert!(!errors.contains("password_confirmation"));
    }

    #[test]
    fn sign_in_password_is_capped_at_64() {
        let form = SignInRequest {
            email: "bob@example.com".into(),
            password: "x".repeat(65),
        };
        assert!(form.validate().unwrap_err().errors.unwrap().contains("password"));
    }

    #[test]
    fn private_room_needs_password() {
        let form = CreateRoomRequest {
            name: "room1".into(),
            is_private: Some(true),
            password: None,
        };
        assert!(form.validate().unwrap_err().errors.unwrap().contains("password"));
    }

    #[test]
    fn public_room_without_password_passes() {
        let form = CreateRoomRequest {
            name: "  room1  ".into(),
            is_private: Some(false),
            password: None,
        }
        .validate()
        .unwrap();
        assert_eq!(form.name, "room1");
        assert!(!form.is_private);
    }

    #[test]
    fn room_privacy_flag_is_required() {
        let form = CreateRoomRequest {
            name: "room1".into(),
            is_private: None,
            password: None,
        };
        assert!(form.validate().unwrap_err().errors.unwrap().contains("is_private"));
    }
}
