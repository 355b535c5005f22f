use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::SummaryConfig;
use crate::credentials::{Credential, ServiceAccountKey, CLOUD_PLATFORM_SCOPE};
use crate::error::{FocusError, Result};

/// Harm categories the safety threshold is applied to.
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Something that can turn a prompt into text.
///
/// Implementations never fail loudly: any problem is logged and reported as
/// `None`, and the caller uses its own fallback.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Option<String>;
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
pub struct RequestPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: &str, generation: &GenerationConfig, safety_threshold: &str) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: generation.clone(),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: (*category).to_string(),
                    threshold: safety_threshold.to_string(),
                })
                .collect(),
        }
    }
}

/// Pull the first candidate's first text part out of a response body.
pub fn extract_text(body: &[u8]) -> Result<String> {
    let response: GenerateResponse = serde_json::from_slice(body)?;
    let text = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| FocusError::Provider("response has no candidates".into()))?
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(FocusError::Provider("first candidate has no text".into()));
    }
    Ok(text)
}

// ── Gemini ──────────────────────────────────────────────────────────────

/// Client for the `generateContent` endpoint, authenticated either with an
/// API key or with a service-account bearer token.
pub struct GeminiSummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    credential: Credential,
    generation: GenerationConfig,
    safety_threshold: String,
    timeout: Duration,
}

impl GeminiSummarizer {
    pub fn new(config: &SummaryConfig, credential: Credential) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        // `timeout` bounds the whole call in `generate`, token exchange included.
        let client = reqwest::Client::builder()
            .user_agent(concat!("focuslens/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credential,
            generation: GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
            safety_threshold: config.safety_threshold.clone(),
            timeout,
        })
    }

    /// Build a summarizer for whichever credential is configured, if any.
    pub fn from_config(config: &SummaryConfig) -> Result<Option<Self>> {
        match Credential::from_config(config) {
            Some(credential) => Ok(Some(Self::new(config, credential)?)),
            None => Ok(None),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn generate_url(&self) -> Result<Url> {
        let raw = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        Url::parse(&raw).map_err(|e| FocusError::Config(format!("invalid endpoint {}: {}", raw, e)))
    }

    async fn try_generate(&self, prompt: &str) -> Result<String> {
        let mut url = self.generate_url()?;
        let body = GenerateRequest::new(prompt, &self.generation, &self.safety_threshold);

        let mut request = match &self.credential {
            Credential::ApiKey(key) => {
                url.query_pairs_mut().append_pair("key", key);
                self.client.post(url)
            }
            Credential::ServiceAccount { key_path } => {
                let key = ServiceAccountKey::load(key_path).await?;
                let token = key
                    .access_token(&self.client, CLOUD_PLATFORM_SCOPE)
                    .await?;
                self.client.post(url).bearer_auth(token)
            }
        };
        request = request.json(&body);

        // Errors carry the request URL, which may hold the API key.
        let resp = request.send().await.map_err(|e| e.without_url())?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| e.without_url())?;

        if !status.is_success() {
            return Err(FocusError::Provider(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&bytes)
            )));
        }

        extract_text(&bytes)
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    fn name(&self) -> &str {
        self.credential.kind()
    }

    async fn generate(&self, prompt: &str) -> Option<String> {
        debug!(model = %self.model, credential = self.name(), "Requesting generated summary");
        match tokio::time::timeout(self.timeout, self.try_generate(prompt)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!(credential = self.name(), "Summary generation failed: {}", e);
                None
            }
            Err(_) => {
                warn!(credential = self.name(), "Summary generation timed out");
                None
            }
        }
    }
}
