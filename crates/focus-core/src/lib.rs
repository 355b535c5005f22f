//! Core types and collaborators shared by the focuslens crates.

pub mod config;
pub mod credentials;
pub mod error;
pub mod provider;
pub mod types;

pub use config::AppConfig;
pub use credentials::Credential;
pub use error::FocusError;
pub use provider::{GeminiSummarizer, Summarizer};
pub use types::{Analysis, SessionRecord, StatusSample, TimeBucket};
