//! Captcha challenge handler

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;

#[derive(Serialize)]
pub struct CaptchaResponse {
    pub challenge_id: Uuid,
    pub question: String,
}

/// Issue a fresh single-use challenge for the signup/login forms
pub async fn challenge(State(state): State<AppState>) -> Json<CaptchaResponse> {
    let (challenge_id, question) = state.captcha.issue();
    Json(CaptchaResponse {
        challenge_id,
        question,
    })
}
