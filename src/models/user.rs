//! User account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub uid: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Signup/login request body.
///
/// The legacy dashboard posts the identifier as `aadhaar`, the SPA as `uid`;
/// both land in the same field. Captcha fields are only read when captcha
/// enforcement is enabled.
#[derive(Debug, Deserialize, Validate)]
pub struct AuthRequest {
    #[serde(alias = "aadhaar")]
    #[validate(length(min = 1, max = 64, message = "Identifier is required"))]
    pub uid: String,

    #[validate(length(min = 4, max = 128, message = "Password must be at least 4 characters"))]
    pub password: String,

    pub captcha_id: Option<Uuid>,
    pub captcha_answer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: &'static str,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub uid: String,
}

impl User {
    pub async fn create(
        pool: &SqlitePool,
        uid: &str,
        password_hash: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, uid, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(uid)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_uid(pool: &SqlitePool, uid: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE uid = ?")
            .bind(uid)
            .fetch_optional(pool)
            .await
    }

    pub async fn update_last_login(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            uid: self.uid.clone(),
        }
    }
}
