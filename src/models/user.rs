// src/models/user.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::lenient::null_as_default;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,          // Rider
    Driver,
    PendingDriver, // Applied to drive, not yet approved
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    pub phone_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
    pub role: UserRole,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

// Tokens never reach logs.
impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access", &"[redacted]")
            .field("refresh", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VerifyOtpResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    pub tokens: AuthTokens,
    pub user: User,
}

/// `register/` echoes a subset of the profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisteredUser {
    pub id: String,
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    pub phone_number: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    pub user: RegisteredUser,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.email.is_none()
    }
}

/// `POST auth/token/refresh/` answer. The refresh token only rotates
/// when the backend is configured to do so.
#[derive(Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
