//! Authentication handlers

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AuthRequest, LoginResponse, SignupResponse, User};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub uid: String, // Account identifier
    pub exp: usize,  // Expiration timestamp
    pub iat: usize,  // Issued at
}

/// Signup endpoint
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> AppResult<Json<SignupResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    check_captcha(&state, &req)?;

    // Check if identifier already exists
    if User::find_by_uid(&state.pool, &req.uid).await?.is_some() {
        return Err(AppError::AlreadyExists("User already exists".to_string()));
    }

    // Hash password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .to_string();

    let user = User::create(&state.pool, &req.uid, &password_hash)
        .await
        .map_err(|e| match &e {
            // Concurrent signup slipping past the lookup lands on the UNIQUE
            // column instead of a 500
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::AlreadyExists("User already exists".to_string())
            }
            _ => AppError::from(e),
        })?;

    tracing::info!("New account created: {}", user.uid);

    Ok(Json(SignupResponse {
        message: "Signup successful!",
        user: user.to_info(),
    }))
}

/// Login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> AppResult<Json<LoginResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    check_captcha(&state, &req)?;

    // Find user by identifier
    let user = User::find_by_uid(&state.pool, &req.uid)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::InvalidCredentials)?;

    // Update last login
    User::update_last_login(&state.pool, &user.id).await?;

    // Generate JWT
    let token = generate_jwt(&user, &state.config.jwt_secret, state.config.jwt_expiration_hours)?;

    tracing::info!("Login: {}", user.uid);

    Ok(Json(LoginResponse {
        message: "Login successful!",
        token,
        user: user.to_info(),
    }))
}

/// Consume the captcha challenge carried by the request, when enforcement is
/// enabled
fn check_captcha(state: &AppState, req: &AuthRequest) -> Result<(), AppError> {
    if !state.config.require_captcha {
        return Ok(());
    }

    let (id, answer) = match (req.captcha_id, req.captcha_answer.as_deref()) {
        (Some(id), Some(answer)) => (id, answer),
        _ => {
            return Err(AppError::Validation(
                "Captcha answer is required".to_string(),
            ))
        }
    };

    if !state.captcha.verify(id, answer) {
        return Err(AppError::Validation(
            "Incorrect captcha answer".to_string(),
        ));
    }

    Ok(())
}

/// Generate JWT token
fn generate_jwt(user: &User, secret: &str, expiration_hours: u64) -> AppResult<String> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiration_hours as i64);

    let claims = Claims {
        sub: user.id.clone(),
        uid: user.uid.clone(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}
