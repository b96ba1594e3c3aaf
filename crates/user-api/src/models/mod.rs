//! User API models.
//!
//! Contains data types used across the User API service.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{Details, FieldValue};

/// Maximum username length in characters.
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Maximum full name length in characters.
pub const MAX_FULL_NAME_LENGTH: usize = 100;

/// Default page size for user listing.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Largest accepted page size for user listing.
pub const MAX_LIST_LIMIT: i64 = 1000;

/// User record as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Flat audit snapshot of the user, keys prefixed with `prefix`.
    pub fn snapshot(&self, prefix: &str) -> Details {
        let mut details = Details::new();
        let mut put = |key: &str, value: FieldValue| {
            details.insert(format!("{prefix}{key}"), value);
        };
        put("id", self.id.into());
        put("username", self.username.as_str().into());
        put("email", self.email.as_str().into());
        put("full_name", self.full_name.clone().into());
        put("is_active", self.is_active.into());
        put(
            "created_at",
            self.created_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .into(),
        );
        details
    }
}

/// Request to create a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateUserRequest {
    /// Validate the request parameters.
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_full_name(self.full_name.as_deref())
    }
}

/// Partial update of a user. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateUserRequest {
    /// Validate the request parameters.
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        validate_full_name(self.full_name.as_deref())
    }

    /// Changed fields as audit details, keys prefixed with `prefix`.
    pub fn changes(&self, prefix: &str) -> Details {
        let mut details = Details::new();
        if let Some(username) = &self.username {
            details.insert(format!("{prefix}username"), username.as_str().into());
        }
        if let Some(email) = &self.email {
            details.insert(format!("{prefix}email"), email.as_str().into());
        }
        if let Some(full_name) = &self.full_name {
            details.insert(format!("{prefix}full_name"), full_name.as_str().into());
        }
        if let Some(is_active) = self.is_active {
            details.insert(format!("{prefix}is_active"), is_active.into());
        }
        details
    }
}

fn validate_username(username: &str) -> Result<(), &'static str> {
    let length = username.trim().chars().count();
    if length == 0 {
        return Err("Username is required");
    }
    if length > MAX_USERNAME_LENGTH {
        return Err("Username must be at most 50 characters");
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), &'static str> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Email must be a valid address");
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || email.contains(' ') {
        return Err("Email must be a valid address");
    }
    Ok(())
}

fn validate_full_name(full_name: Option<&str>) -> Result<(), &'static str> {
    match full_name {
        Some(name) if name.chars().count() > MAX_FULL_NAME_LENGTH => {
            Err("Full name must be at most 100 characters")
        }
        _ => Ok(()),
    }
}

/// Pagination for `GET /api/v1/users`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListUsersQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl ListUsersQuery {
    /// `(offset, limit)` with defaults applied and the limit capped.
    pub fn bounds(&self) -> (i64, i64) {
        let skip = self.skip.unwrap_or(0).max(0);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(0, MAX_LIST_LIMIT);
        (skip, limit)
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub endpoints: ServiceEndpoints,
}

/// Entry points advertised by the banner.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEndpoints {
    pub users: String,
    pub metrics: String,
    pub health: String,
}
