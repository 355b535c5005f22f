use focus_analytics::SessionAnalyzer;
use focus_core::config::AppConfig;
use focus_tools::{build_image_store, ImageClassifier, ImageStore};
use std::sync::Arc;

/// Shared application state for the server. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub analyzer: Arc<SessionAnalyzer>,
    pub classifier: Arc<ImageClassifier>,
    pub image_store: Arc<dyn ImageStore>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let analyzer = SessionAnalyzer::from_config(&config.summary)?;
        let classifier = ImageClassifier::new(&config.classifier);
        let image_store = build_image_store(&config)?;

        Ok(Self {
            config,
            analyzer: Arc::new(analyzer),
            classifier: Arc::new(classifier),
            image_store,
        })
    }
}
