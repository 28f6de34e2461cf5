//! End-to-end API tests over an in-memory database.
//!
//! The classifier is stood in for by shell scripts so the full route ->
//! relay -> subprocess path runs without any Python environment.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use tower::util::ServiceExt;

use meditrack_server::captcha::CaptchaStore;
use meditrack_server::config::Config;
use meditrack_server::relay::PredictRelay;
use meditrack_server::{create_router, db, AppState};

const ECHO_CLASSIFIER: &str = r#"echo '{"prediction": "fractured", "confidence": 91.2, "probabilities": {"fractured": 91.2, "not fractured": 8.8}}'
"#;

struct TestServer {
    app: Router,
    upload_dir: PathBuf,
    tmp: TempDir,
}

async fn spawn_app(require_captcha: bool, deploy_model: bool, script_body: &str) -> TestServer {
    let tmp = TempDir::new().unwrap();

    let script = tmp.path().join("classifier.sh");
    std::fs::write(&script, script_body).unwrap();

    let model_path = tmp.path().join("model.pth");
    if deploy_model {
        std::fs::write(&model_path, b"weights").unwrap();
    }

    let upload_dir = tmp.path().join("uploads");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_expiration_hours: 1,
        model_path,
        predict_script: script,
        python_bin: "sh".to_string(),
        upload_dir: upload_dir.clone(),
        max_upload_bytes: 10 * 1024 * 1024,
        predict_timeout_secs: 10,
        max_concurrent_predictions: 2,
        require_captcha,
        captcha_ttl_secs: 300,
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();

    let captcha = Arc::new(CaptchaStore::new(config.captcha_ttl_secs));
    let relay = Arc::new(PredictRelay::from_config(&config));
    let app = create_router(AppState {
        pool,
        config,
        captcha,
        relay,
    });

    TestServer {
        app,
        upload_dir,
        tmp,
    }
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(
    uri: &str,
    token: Option<&str>,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    let boundary = "meditrack-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; \
             filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let mut builder = Request::builder().method("POST").uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={boundary}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Sign up and log in, returning a bearer token
async fn auth_token(app: &Router, uid: &str) -> String {
    let resp = app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": uid, "password": "p@ssword"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({"uid": uid, "password": "p@ssword"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    body_json(resp).await["token"].as_str().unwrap().to_string()
}

fn upload_dir_is_empty(dir: &PathBuf) -> bool {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true, // never created
    }
}

#[tokio::test]
async fn signup_succeeds_then_rejects_duplicate() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "12345678901", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Signup successful!");
    assert_eq!(body["user"]["uid"], "12345678901");
    assert!(body["user"].get("password_hash").is_none());

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "12345678901", "password": "other-pass"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["message"], "User already exists");
}

#[tokio::test]
async fn login_verifies_credentials() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;
    server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "12345678901", "password": "p@ss"}),
        ))
        .await
        .unwrap();

    // Correct credentials
    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({"uid": "12345678901", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Login successful!");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    // Wrong password
    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({"uid": "12345678901", "password": "wrong"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["message"], "Invalid password");

    // Unknown identifier
    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({"uid": "00000000000", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["message"], "User not found");
}

#[tokio::test]
async fn signup_accepts_aadhaar_field_name() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"aadhaar": "98765432109", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({"aadhaar": "98765432109", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn rejects_invalid_request_bodies() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "12345678901", "password": "abc"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn predict_requires_authentication() {
    let server = spawn_app(false, true, ECHO_CLASSIFIER).await;

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            None,
            "xray.png",
            "image/png",
            b"fake png bytes",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            Some("not-a-real-token"),
            "xray.png",
            "image/png",
            b"fake png bytes",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn predict_rejects_non_image_before_classifier_runs() {
    // The classifier script drops a marker file when invoked
    let server = spawn_app(
        false,
        true,
        "touch \"$(dirname \"$0\")/invoked\"\necho '{}'\n",
    )
    .await;
    let token = auth_token(&server.app, "12345678901").await;

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            Some(&token),
            "report.txt",
            "text/plain",
            b"not an image",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert!(!server.tmp.path().join("invoked").exists());
    assert!(upload_dir_is_empty(&server.upload_dir));
}

#[tokio::test]
async fn predict_returns_demo_result_without_model() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;
    let token = auth_token(&server.app, "12345678901").await;

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            Some(&token),
            "xray.png",
            "image/png",
            b"fake png bytes",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({
            "prediction": "not fractured",
            "confidence": 87.5,
            "probabilities": {"fractured": 12.5, "not fractured": 87.5}
        })
    );

    // The upload is discarded along with the demo response
    assert!(upload_dir_is_empty(&server.upload_dir));
}

#[tokio::test]
async fn predict_relays_classifier_output() {
    let server = spawn_app(false, true, ECHO_CLASSIFIER).await;
    let token = auth_token(&server.app, "12345678901").await;

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            Some(&token),
            "xray.jpg",
            "image/jpeg",
            b"fake jpeg bytes",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["prediction"], "fractured");
    assert_eq!(body["confidence"], 91.2);

    assert!(upload_dir_is_empty(&server.upload_dir));
}

#[tokio::test]
async fn predict_surfaces_classifier_failure() {
    let server = spawn_app(false, true, "echo model exploded >&2\nexit 1\n").await;
    let token = auth_token(&server.app, "12345678901").await;

    let resp = server
        .app
        .clone()
        .oneshot(multipart_request(
            "/predict",
            Some(&token),
            "xray.png",
            "image/png",
            b"fake png bytes",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(resp).await;
    assert_eq!(body["message"], "Prediction failed");
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.contains("model exploded")));

    // Cleanup still happens on failure
    assert!(upload_dir_is_empty(&server.upload_dir));
}

#[tokio::test]
async fn captcha_gates_signup_when_enabled() {
    let server = spawn_app(true, false, ECHO_CLASSIFIER).await;

    // No challenge attached
    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({"uid": "12345678901", "password": "p@ss"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Fetch a challenge and solve it
    let resp = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/captcha")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let challenge = body_json(resp).await;
    let id = challenge["challenge_id"].as_str().unwrap().to_string();
    let question = challenge["question"].as_str().unwrap();
    let answer: u32 = question
        .trim_end_matches('?')
        .split('+')
        .map(|p| p.trim().parse::<u32>().unwrap())
        .sum();

    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/signup",
            json!({
                "uid": "12345678901",
                "password": "p@ss",
                "captcha_id": id,
                "captcha_answer": answer.to_string()
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Challenges are single use: replaying the same one fails
    let resp = server
        .app
        .clone()
        .oneshot(json_request(
            "/login",
            json!({
                "uid": "12345678901",
                "password": "p@ss",
                "captcha_id": id,
                "captcha_answer": answer.to_string()
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let server = spawn_app(false, false, ECHO_CLASSIFIER).await;

    let resp = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(!bytes.is_empty());

    let resp = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "healthy");
}
