//! Users repository for database operations.
//!
//! All queries use parameterized statements. Unique violations surface as
//! `ApiError::AlreadyExists` through the `sqlx::Error` conversion.

use crate::errors::ApiError;
use crate::models::{CreateUserRequest, UpdateUserRequest, User};
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::instrument;

const USER_COLUMNS: &str = "id, username, email, full_name, is_active, created_at, updated_at";

/// Users repository for database operations.
pub struct UsersRepository;

impl UsersRepository {
    /// Create the users table if it does not exist.
    pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, name = "user_api.repo.create_user")]
    pub async fn create(pool: &SqlitePool, request: &CreateUserRequest) -> Result<User, ApiError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, full_name, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {USER_COLUMNS}"
        ))
        .bind(request.username.trim())
        .bind(&request.email)
        .bind(&request.full_name)
        .bind(request.is_active)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        map_row_to_user(&row)
    }

    #[instrument(skip_all, name = "user_api.repo.get_user", fields(user_id = user_id))]
    pub async fn get(pool: &SqlitePool, user_id: i64) -> Result<Option<User>, ApiError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

        row.as_ref().map(map_row_to_user).transpose()
    }

    #[instrument(skip_all, name = "user_api.repo.list_users")]
    pub async fn list(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<User>, ApiError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await?;

        rows.iter().map(map_row_to_user).collect()
    }

    /// Apply a partial update. Returns `None` if the user does not exist.
    #[instrument(skip_all, name = "user_api.repo.update_user", fields(user_id = user_id))]
    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        request: &UpdateUserRequest,
    ) -> Result<Option<User>, ApiError> {
        let row = sqlx::query(&format!(
            "UPDATE users SET \
                username = COALESCE(?1, username), \
                email = COALESCE(?2, email), \
                full_name = COALESCE(?3, full_name), \
                is_active = COALESCE(?4, is_active), \
                updated_at = ?5 \
             WHERE id = ?6 RETURNING {USER_COLUMNS}"
        ))
        .bind(request.username.as_deref().map(str::trim))
        .bind(&request.email)
        .bind(&request.full_name)
        .bind(request.is_active)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(map_row_to_user).transpose()
    }

    /// Delete a user. Returns `false` if the user did not exist.
    #[instrument(skip_all, name = "user_api.repo.delete_user", fields(user_id = user_id))]
    pub async fn delete(pool: &SqlitePool, user_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `(total, active)` user counts.
    pub async fn counts(pool: &SqlitePool) -> Result<(i64, i64), ApiError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active FROM users",
        )
        .fetch_one(pool)
        .await?;

        Ok((row.try_get("total")?, row.try_get("active")?))
    }
}

/// Map a database row to a User struct.
fn map_row_to_user(row: &SqliteRow) -> Result<User, ApiError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
