use crate::error::FocusError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub summary: SummaryConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from default path (~/.config/focuslens/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("focuslens")
            .join("config.toml")
    }

    /// Fill environment-provided settings (credentials, interpreter path,
    /// bucket name) using `lookup`. Called once at startup; nothing else in
    /// the workspace reads the process environment. Empty values count as
    /// unset, and values already present in the file win.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if self.summary.credentials_path.is_none() {
            self.summary.credentials_path = get(&self.summary.credentials_env).map(PathBuf::from);
        }
        if self.summary.api_key.is_none() {
            self.summary.api_key = get(&self.summary.api_key_env);
        }
        if let Some(python) = get(&self.classifier.python_env) {
            self.classifier.python = python;
        }
        if self.storage.bucket.is_none() {
            self.storage.bucket = get(&self.storage.bucket_env);
        }
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), FocusError> {
        if self.storage.backend == StorageBackend::Gcs && self.storage.bucket.is_none() {
            return Err(FocusError::Config(format!(
                "storage backend 'gcs' requires a bucket name (set storage.bucket or {})",
                self.storage.bucket_env
            )));
        }
        if self.summary.timeout_secs == 0 {
            return Err(FocusError::Config("summary.timeout_secs must be positive".into()));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(FocusError::Config(
                "classifier.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Origins allowed by CORS. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec!["http://localhost:3000".into()],
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Text-generation settings for session summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,
    pub model: String,
    /// API key. Usually left empty and read from `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    /// Service-account JSON key file. Takes precedence over the API key.
    pub credentials_path: Option<PathBuf>,
    pub credentials_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Threshold applied to every harm category, e.g. `BLOCK_MEDIUM_AND_ABOVE`.
    pub safety_threshold: String,
    /// Upper bound for the whole generation call, token exchange included.
    pub timeout_secs: u64,
    /// Prompt with `{placeholder}` fields filled from the analysis.
    pub prompt_template: String,
}

pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Here is how a study session went:
- Total time: {total_minutes} minutes
- Time spent attentive: {attentive_minutes} minutes
- Attention ratio: {attention_percent}%
- Number of distractions: {distraction_count}
- Average distraction length: {avg_distraction_seconds} seconds
- Attention dipped at the start: {start_cycle_slump}
- Attention dipped at the end: {end_cycle_fatigue}

Write a warm, encouraging summary of this session in 2-3 sentences, speaking \
to the student as \"you\". Mention what went well and offer one gentle \
suggestion for next time.";

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-pro".into(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".into(),
            credentials_path: None,
            credentials_env: "GOOGLE_APPLICATION_CREDENTIALS".into(),
            temperature: 0.7,
            max_output_tokens: 256,
            safety_threshold: "BLOCK_MEDIUM_AND_ABOVE".into(),
            timeout_secs: 10,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.into(),
        }
    }
}

/// Image classifier subprocess configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Python interpreter used to run the script.
    pub python: String,
    /// Environment variable that overrides `python`.
    pub python_env: String,
    /// Script invoked as `python script <image>`; prints a JSON object.
    pub script: PathBuf,
    /// Execution timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            python_env: "PYTHON_PATH".into(),
            script: PathBuf::from("model/PythonEyeDetection.py"),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Gcs,
}

/// Where uploaded images are kept while they are classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Scratch directory for uploads. Used by both backends, since the
    /// classifier reads from local disk.
    pub upload_dir: PathBuf,
    /// Bucket name for the `gcs` backend.
    pub bucket: Option<String>,
    pub bucket_env: String,
    /// Base URL of the object upload API.
    pub upload_endpoint: String,
    /// Base URL used to build the returned public object URL.
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            upload_dir: PathBuf::from("uploads"),
            bucket: None,
            bucket_env: "GCS_BUCKET_NAME".into(),
            upload_endpoint: "https://storage.googleapis.com/upload/storage/v1".into(),
            public_base_url: "https://storage.googleapis.com".into(),
        }
    }
}
