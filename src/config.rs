//! Configuration module

use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server port
    pub port: u16,

    /// JWT secret key
    pub jwt_secret: String,

    /// JWT expiration in hours
    pub jwt_expiration_hours: u64,

    /// Trained model artifact; when absent, /predict serves the demo result
    pub model_path: PathBuf,

    /// Classifier script invoked per prediction request
    pub predict_script: PathBuf,

    /// Interpreter used to run the classifier script
    pub python_bin: String,

    /// Directory for temporary image uploads
    pub upload_dir: PathBuf,

    /// Upload size ceiling in bytes
    pub max_upload_bytes: usize,

    /// Classifier subprocess timeout in seconds
    pub predict_timeout_secs: u64,

    /// Concurrent classifier subprocess limit
    pub max_concurrent_predictions: usize,

    /// Whether signup/login require a captcha round-trip
    pub require_captcha: bool,

    /// Captcha challenge lifetime in seconds
    pub captcha_ttl_secs: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://meditrack.db".to_string()),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4000),

            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "meditrack-dev-secret-change-in-production".to_string()),

            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(24),

            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    PathBuf::from("./pretrained_models/bone_fracture_model.pth")
                }),

            predict_script: env::var("PREDICT_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./scripts/predict_api.py")),

            python_bin: env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),

            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or(10 * 1024 * 1024),

            predict_timeout_secs: env::var("PREDICT_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(60),

            max_concurrent_predictions: env::var("MAX_CONCURRENT_PREDICTIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(4),

            require_captcha: env::var("REQUIRE_CAPTCHA")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),

            captcha_ttl_secs: env::var("CAPTCHA_TTL_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(300),
        }
    }
}
