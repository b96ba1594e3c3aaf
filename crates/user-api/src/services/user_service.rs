//! User domain service.
//!
//! Wraps the repository with validation and emits one user action per
//! successful mutation. Create carries the stored user; update and delete
//! carry the user as it was before the change.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::audit::Details;
use crate::errors::ApiError;
use crate::models::{CreateUserRequest, ListUsersQuery, UpdateUserRequest, User};
use crate::repositories::UsersRepository;

/// Successful domain mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Created,
    Updated,
    Deleted,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Created => "user_created",
            UserAction::Updated => "user_updated",
            UserAction::Deleted => "user_deleted",
        }
    }
}

/// Receives domain events. Implementations must not block.
pub trait UserActionSink: Send + Sync {
    fn user_action(&self, user_id: i64, action: UserAction, details: Details);
}

#[derive(Clone)]
pub struct UserService {
    pool: SqlitePool,
    actions: Arc<dyn UserActionSink>,
}

impl UserService {
    pub fn new(pool: SqlitePool, actions: Arc<dyn UserActionSink>) -> Self {
        Self { pool, actions }
    }

    pub async fn create(&self, request: &CreateUserRequest) -> Result<User, ApiError> {
        request
            .validate()
            .map_err(|reason| ApiError::BadRequest(reason.to_string()))?;

        let user = UsersRepository::create(&self.pool, request).await?;
        self.actions
            .user_action(user.id, UserAction::Created, user.snapshot(""));

        Ok(user)
    }

    pub async fn get(&self, user_id: i64) -> Result<User, ApiError> {
        UsersRepository::get(&self.pool, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn list(&self, query: ListUsersQuery) -> Result<Vec<User>, ApiError> {
        let (skip, limit) = query.bounds();
        UsersRepository::list(&self.pool, skip, limit).await
    }

    pub async fn update(
        &self,
        user_id: i64,
        request: &UpdateUserRequest,
    ) -> Result<User, ApiError> {
        request
            .validate()
            .map_err(|reason| ApiError::BadRequest(reason.to_string()))?;

        let before = self.get(user_id).await?;
        let after = UsersRepository::update(&self.pool, user_id, request)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        let mut details = before.snapshot("before.");
        details.extend(request.changes("after."));
        self.actions
            .user_action(user_id, UserAction::Updated, details);

        Ok(after)
    }

    pub async fn delete(&self, user_id: i64) -> Result<(), ApiError> {
        let before = self.get(user_id).await?;
        if !UsersRepository::delete(&self.pool, user_id).await? {
            return Err(ApiError::NotFound("User not found".to_string()));
        }

        self.actions
            .user_action(user_id, UserAction::Deleted, before.snapshot("before."));
        Ok(())
    }

    /// `(total, active)` user counts.
    pub async fn counts(&self) -> Result<(i64, i64), ApiError> {
        UsersRepository::counts(&self.pool).await
    }
}
