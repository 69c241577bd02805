//! Error types for the analysis core and settings validation.

/// Result type for per-subject analysis
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failures scoped to one subject-night. The caller logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("no samples in recording for subject {0}")]
    EmptyRecording(String),

    #[error("no samples inside the night window ({start} to {stop}) for subject {subject}")]
    EmptyNight {
        subject: String,
        start: chrono::NaiveTime,
        stop: chrono::NaiveTime,
    },
}

/// Error type for settings parsing and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Malformed setting: {0}")]
    Malformed(String),

    #[error("Invalid setting `{key}`: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Malformed(e.to_string())
    }
}
