//! Short-lived storage for uploaded frames.
//!
//! Images always land in a local scratch directory, since the classifier
//! reads them from disk. The `gcs` backend additionally copies each image
//! into a bucket and reports its public URL.

use async_trait::async_trait;
use focus_core::config::StorageConfig;
use focus_core::credentials::ServiceAccountKey;
use focus_core::error::{FocusError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// An image that has been written by an [`ImageStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// File the classifier should read.
    pub local_path: PathBuf,
    /// Public object URL, for backends that keep a remote copy.
    pub object_url: Option<String>,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, file_name: &str, content_type: Option<&str>, bytes: &[u8]) -> Result<StoredImage>;

    /// Remove the local copy. Failures are logged, not returned.
    async fn discard(&self, image: &StoredImage);
}

/// Unique, filesystem-safe name for an uploaded file.
pub fn unique_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = if cleaned.is_empty() { "image" } else { cleaned };

    format!(
        "{}_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &Uuid::new_v4().simple().to_string()[..8],
        cleaned
    )
}

// ── Local ───────────────────────────────────────────────────────────────

pub struct LocalImageStore {
    dir: PathBuf,
}

impl LocalImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes).await?;
        debug!("Saved upload to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, file_name: &str, _content_type: Option<&str>, bytes: &[u8]) -> Result<StoredImage> {
        let local_path = self.write(&unique_name(file_name), bytes).await?;
        Ok(StoredImage {
            local_path,
            object_url: None,
        })
    }

    async fn discard(&self, image: &StoredImage) {
        if let Err(e) = tokio::fs::remove_file(&image.local_path).await {
            warn!("Failed to remove {}: {}", image.local_path.display(), e);
        }
    }
}

// ── Google Cloud Storage ────────────────────────────────────────────────

pub struct GcsImageStore {
    local: LocalImageStore,
    bucket: String,
    upload_endpoint: String,
    public_base_url: String,
    credentials_path: Option<PathBuf>,
    client: reqwest::Client,
}

impl GcsImageStore {
    pub fn new(config: &StorageConfig, credentials_path: Option<PathBuf>) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| FocusError::Config("gcs storage requires a bucket name".into()))?;
        if credentials_path.is_none() {
            warn!("gcs storage has no service-account credentials; uploads will fail");
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            local: LocalImageStore::new(&config.upload_dir),
            bucket,
            upload_endpoint: config.upload_endpoint.trim_end_matches('/').to_string(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            credentials_path,
            client,
        })
    }

    fn upload_url(&self, object: &str) -> Result<Url> {
        let raw = format!("{}/b/{}/o", self.upload_endpoint, self.bucket);
        let mut url = Url::parse(&raw)
            .map_err(|e| FocusError::Config(format!("invalid upload endpoint {}: {}", raw, e)))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(url)
    }

    pub fn object_url(&self, object: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, object)
    }

    async fn upload(&self, object: &str, content_type: &str, bytes: &[u8]) -> Result<()> {
        let key_path = self
            .credentials_path
            .as_deref()
            .ok_or_else(|| FocusError::Storage("no service-account credentials configured".into()))?;
        let key = ServiceAccountKey::load(key_path).await?;
        let token = key.access_token(&self.client, STORAGE_SCOPE).await?;

        let resp = self
            .client
            .post(self.upload_url(object)?)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FocusError::Storage(format!(
                "object upload returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for GcsImageStore {
    async fn save(&self, file_name: &str, content_type: Option<&str>, bytes: &[u8]) -> Result<StoredImage> {
        let name = unique_name(file_name);
        let local_path = self.local.write(&name, bytes).await?;

        let content_type = content_type.unwrap_or("application/octet-stream");
        if let Err(e) = self.upload(&name, content_type, bytes).await {
            self.local.discard(&StoredImage {
                local_path: local_path.clone(),
                object_url: None,
            })
            .await;
            return Err(e);
        }

        Ok(StoredImage {
            local_path,
            object_url: Some(self.object_url(&name)),
        })
    }

    async fn discard(&self, image: &StoredImage) {
        self.local.discard(image).await;
    }
}
