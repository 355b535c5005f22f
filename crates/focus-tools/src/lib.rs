pub mod classifier;
pub mod storage;

use focus_core::config::{AppConfig, StorageBackend};
use focus_core::error::Result;
use std::sync::Arc;

pub use classifier::ImageClassifier;
pub use storage::{GcsImageStore, ImageStore, LocalImageStore, StoredImage};

/// Build the image store selected by `storage.backend`.
pub fn build_image_store(config: &AppConfig) -> Result<Arc<dyn ImageStore>> {
    let store: Arc<dyn ImageStore> = match config.storage.backend {
        StorageBackend::Local => Arc::new(LocalImageStore::new(&config.storage.upload_dir)),
        StorageBackend::Gcs => Arc::new(GcsImageStore::new(
            &config.storage,
            config.summary.credentials_path.clone(),
        )?),
    };
    Ok(store)
}
