//! Attention analytics for focuslens study sessions.
//!
//! Turns a session's status samples into aggregate metrics, a per-minute
//! time series and slump/fatigue flags, then attaches a summary.

pub mod analyzer;
pub mod summary;

pub use analyzer::compute_metrics;
pub use summary::{default_summary, render_prompt, SessionAnalyzer};
