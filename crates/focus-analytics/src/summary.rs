//! Human-readable session summaries.
//!
//! A generated summary is attempted when a [`Summarizer`] is configured; the
//! templated sentence from [`default_summary`] is used otherwise, and
//! whenever generation comes back empty.

use std::sync::Arc;

use focus_core::config::SummaryConfig;
use focus_core::provider::{GeminiSummarizer, Summarizer};
use focus_core::types::{Analysis, SessionRecord};
use tracing::{debug, info};

use crate::analyzer::compute_metrics;

/// The deterministic one-line summary.
pub fn default_summary(attention_ratio: f64, distraction_count: u32, avg_distraction_ms: f64) -> String {
    format!(
        "Overall attention {:.1}%, {} distractions (avg {:.1} s)",
        attention_ratio * 100.0,
        distraction_count,
        avg_distraction_ms / 1000.0
    )
}

/// Fill a prompt template with the analysis, expressed in minutes, percent
/// and seconds. Unknown placeholders are left untouched.
pub fn render_prompt(template: &str, analysis: &Analysis) -> String {
    let fields = [
        (
            "{total_minutes}",
            format!("{:.1}", analysis.total_duration as f64 / 60_000.0),
        ),
        (
            "{attentive_minutes}",
            format!("{:.1}", analysis.attentive_duration as f64 / 60_000.0),
        ),
        (
            "{attention_percent}",
            format!("{:.1}", analysis.attention_ratio * 100.0),
        ),
        ("{distraction_count}", analysis.distraction_count.to_string()),
        (
            "{avg_distraction_seconds}",
            format!("{:.1}", analysis.avg_distraction_duration / 1000.0),
        ),
        ("{start_cycle_slump}", analysis.start_cycle_slump.to_string()),
        ("{end_cycle_fatigue}", analysis.end_cycle_fatigue.to_string()),
    ];

    fields
        .iter()
        .fold(template.to_string(), |prompt, (key, value)| prompt.replace(key, value))
}

/// Produces a complete [`Analysis`] (metrics plus summary) for a session.
///
/// Holds no per-request state; one instance is shared by all requests.
#[derive(Clone)]
pub struct SessionAnalyzer {
    summarizer: Option<Arc<dyn Summarizer>>,
    prompt_template: String,
}

impl SessionAnalyzer {
    pub fn new(summarizer: Option<Arc<dyn Summarizer>>, prompt_template: impl Into<String>) -> Self {
        Self {
            summarizer,
            prompt_template: prompt_template.into(),
        }
    }

    /// Build an analyzer backed by the generation client for whichever
    /// credential the config resolves to.
    pub fn from_config(config: &SummaryConfig) -> focus_core::error::Result<Self> {
        let summarizer = GeminiSummarizer::from_config(config)?;
        match &summarizer {
            Some(s) => info!("Session summaries use generated text ({} credential)", s.name()),
            None => info!("No generation credential configured; using templated summaries"),
        }
        Ok(Self::new(
            summarizer.map(|s| Arc::new(s) as Arc<dyn Summarizer>),
            config.prompt_template.clone(),
        ))
    }

    /// An analyzer that only produces templated summaries.
    pub fn templated() -> Self {
        Self::new(None, String::new())
    }

    pub fn summarizer_name(&self) -> Option<&str> {
        self.summarizer.as_deref().map(|s| s.name())
    }

    /// Metrics plus summary. Only an out-of-range session span fails; the
    /// summary itself always falls back to the templated text.
    pub async fn analyze(&self, record: &SessionRecord) -> focus_core::error::Result<Analysis> {
        let mut analysis = compute_metrics(record)?;
        analysis.summary = self.summarize(&analysis).await;
        Ok(analysis)
    }

    /// One generation attempt at most; the templated text on any failure.
    pub async fn summarize(&self, analysis: &Analysis) -> String {
        if let Some(summarizer) = &self.summarizer {
            let prompt = render_prompt(&self.prompt_template, analysis);
            if let Some(text) = summarizer.generate(&prompt).await {
                return text;
            }
            debug!("Falling back to templated summary");
        }
        default_summary(
            analysis.attention_ratio,
            analysis.distraction_count,
            analysis.avg_distraction_duration,
        )
    }
}
