use serde::{Deserialize, Serialize};

use crate::error::{FocusError, Result};

/// Status string reported by the classifier for an attentive frame.
pub const ATTENTIVE: &str = "attentive";

/// Longest session accepted for analysis: one day.
pub const MAX_SESSION_MS: i64 = 24 * 60 * 60 * 1000;

/// A single point-in-time attention reading from the client.
///
/// The reading marks the start of a state that lasts until the next
/// sample (or the end of the session).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub status: String,
    /// Classifier confidence. Carried through, never used for metrics.
    pub confidence: f64,
}

impl StatusSample {
    pub fn new(timestamp: i64, status: impl Into<String>) -> Self {
        Self {
            timestamp,
            status: status.into(),
            confidence: 0.0,
        }
    }

    /// Every status other than `"attentive"` counts as not attentive.
    pub fn is_attentive(&self) -> bool {
        self.status == ATTENTIVE
    }
}

/// Study-session settings chosen on the client. Not consumed by the analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    pub duration: i64,
    pub break_interval: i64,
    pub cycles: i64,
    pub goal: String,
    pub tags: Vec<String>,
}

/// A finished study session as posted to `/analyze`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub config: SessionSettings,
    pub logs: Vec<StatusSample>,
}

impl SessionRecord {
    pub fn new(start_time: i64, end_time: i64, logs: Vec<StatusSample>) -> Self {
        Self {
            start_time,
            end_time,
            logs,
            ..Self::default()
        }
    }

    /// Wall-clock length of the session in milliseconds. May be negative for
    /// malformed input; saturates instead of overflowing.
    pub fn total_duration(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time)
    }

    /// Reject sessions whose span cannot be analysed. A session that ends
    /// before it starts is accepted and analyses to zeros.
    pub fn validate(&self) -> Result<()> {
        match self.end_time.checked_sub(self.start_time) {
            None => Err(FocusError::InvalidInput(format!(
                "session span from {} to {} is out of range",
                self.start_time, self.end_time
            ))),
            Some(total) if total > MAX_SESSION_MS => Err(FocusError::InvalidInput(format!(
                "session lasts {} ms, longer than the {} ms limit",
                total, MAX_SESSION_MS
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Attentiveness over one fixed-width window of the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start: i64,
    pub duration: i64,
    pub ratio: f64,
}

/// Result of analysing a [`SessionRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub total_duration: i64,
    pub attentive_duration: i64,
    pub attention_ratio: f64,
    pub distraction_count: u32,
    pub avg_distraction_duration: f64,
    pub time_series: Vec<TimeBucket>,
    pub start_cycle_slump: bool,
    pub end_cycle_fatigue: bool,
    pub summary: String,
}
