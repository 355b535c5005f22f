use focus_core::config::ClassifierConfig;
use focus_core::error::FocusError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs the eye-detection script on a saved image and returns its verdict.
///
/// The script is invoked as `<python> <script> <image>` and must print a
/// single JSON object on stdout. Its content is not interpreted here.
pub struct ImageClassifier {
    python: String,
    script: PathBuf,
    timeout_secs: u64,
}

impl ImageClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            python: config.python.clone(),
            script: config.script.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    pub async fn classify(&self, image: &Path) -> Result<Map<String, Value>, FocusError> {
        debug!(
            "Running classifier: {} {} {}",
            self.python,
            self.script.display(),
            image.display()
        );

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.python)
                .arg(&self.script)
                .arg(image)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| FocusError::Classifier {
            message: format!("classifier timed out after {}s", self.timeout_secs),
            stderr: String::new(),
        })?
        .map_err(|e| FocusError::Classifier {
            message: format!("failed to spawn {}: {}", self.python, e),
            stderr: String::new(),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(FocusError::Classifier {
                message: format!("classifier exited with {}", output.status),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        serde_json::from_str(stdout.trim()).map_err(|e| FocusError::ClassifierOutput {
            message: e.to_string(),
            output: stdout,
        })
    }
}
