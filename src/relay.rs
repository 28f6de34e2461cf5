//! Prediction relay - bridges image uploads to the external classifier.
//!
//! The classifier is a single-shot script that takes an image path argument
//! and prints a JSON result on stdout. Each invocation holds a permit from a
//! bounded pool and runs under a timeout. A missing model artifact
//! short-circuits to a canned demo response instead of an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Errors that can occur while relaying a prediction request
#[derive(Error, Debug)]
pub enum RelayError {
    /// Classifier exited with a non-zero status
    #[error("Process exited with an error: {0}")]
    ProcessFailed(String),

    /// Classifier exceeded the per-request timeout
    #[error("Classifier timed out after {0} seconds")]
    Timeout(u64),

    /// Failed to spawn the classifier process
    #[error("Failed to spawn classifier: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Classifier stdout was not valid UTF-8
    #[error("Invalid output encoding: {0}")]
    InvalidEncoding(String),

    /// Classifier stdout did not parse as a prediction result
    #[error("Could not parse classifier output: {0}")]
    InvalidOutput(String),

    /// Classifier ran but reported a failure in its JSON output
    #[error("Classifier reported an error: {0}")]
    Classifier(String),

    /// The worker pool was shut down
    #[error("Prediction worker pool is closed")]
    PoolClosed,
}

/// Classification label for a processed X-ray image.
///
/// The wire spelling (`"not fractured"`, with a space) follows the
/// classifier's output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "fractured")]
    Fractured,
    #[serde(rename = "not fractured", alias = "not_fractured")]
    NotFractured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A localized finding from the detection variant of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Result of one classifier invocation. Transient: produced per request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: Label,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<Detection>,
}

/// Canned response served when no trained model artifact is deployed
pub fn demo_result() -> PredictionResult {
    PredictionResult {
        prediction: Label::NotFractured,
        confidence: 87.5,
        probabilities: BTreeMap::from([
            ("fractured".to_string(), 12.5),
            ("not fractured".to_string(), 87.5),
        ]),
        detections: Vec::new(),
    }
}

/// Executor for classifier subprocess invocations
pub struct PredictRelay {
    python_bin: String,
    script: PathBuf,
    model_path: PathBuf,
    timeout: Duration,
    permits: Semaphore,
}

impl PredictRelay {
    pub fn new(
        python_bin: impl Into<String>,
        script: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            python_bin: python_bin.into(),
            script: script.into(),
            model_path: model_path.into(),
            timeout,
            permits: Semaphore::new(max_concurrent),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.python_bin.clone(),
            config.predict_script.clone(),
            config.model_path.clone(),
            Duration::from_secs(config.predict_timeout_secs),
            config.max_concurrent_predictions,
        )
    }

    /// Classify the image at `image_path`.
    ///
    /// Falls back to [`demo_result`] when the model artifact is absent. The
    /// caller owns the uploaded file and is responsible for removing it.
    pub async fn predict(&self, image_path: &Path) -> Result<PredictionResult, RelayError> {
        if !self.model_path.exists() {
            info!(
                model = %self.model_path.display(),
                "No model artifact deployed, returning demo result"
            );
            return Ok(demo_result());
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RelayError::PoolClosed)?;

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg(&self.script)
            .arg(image_path)
            .arg("--model")
            .arg(&self.model_path);

        debug!(
            command = %self.python_bin,
            script = %self.script.display(),
            image = %image_path.display(),
            "Spawning classifier"
        );

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    let stdout = String::from_utf8(output.stdout).map_err(|e| {
                        RelayError::InvalidEncoding(format!("Failed to decode stdout: {}", e))
                    })?;
                    parse_output(&stdout)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let exit_code = output.status.code().unwrap_or(-1);

                    warn!(exit_code, stderr = %stderr, "Classifier process failed");

                    Err(RelayError::ProcessFailed(format!(
                        "Process exited with code {}: {}",
                        exit_code, stderr
                    )))
                }
            }
            Ok(Err(e)) => Err(RelayError::SpawnFailed(e)),
            Err(_) => Err(RelayError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Parse classifier stdout into a result.
///
/// The script may emit library warnings before the result; the JSON document
/// is the last non-empty line. A top-level `error` key means the classifier
/// ran but could not process the image.
fn parse_output(stdout: &str) -> Result<PredictionResult, RelayError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| RelayError::InvalidOutput("classifier produced no output".to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(line.trim()).map_err(|e| RelayError::InvalidOutput(e.to_string()))?;

    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(RelayError::Classifier(err.to_string()));
    }

    serde_json::from_value(value).map_err(|e| RelayError::InvalidOutput(e.to_string()))
}
