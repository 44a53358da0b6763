//! Error types for the finance advisor pipeline.

use std::fmt;
use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures fetching the raw transaction dataset.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Source {source_name} rejected credentials (HTTP {status})")]
    Unauthorized { source_name: String, status: u16 },

    #[error("Source {source_name} returned HTTP {status}: {body}")]
    Http {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("Transport error talking to {source_name}: {reason}")]
    Transport { source_name: String, reason: String },

    #[error("Invalid response from {source_name}: {reason}")]
    InvalidResponse { source_name: String, reason: String },

    #[error("Dataset is missing a required column: {0}")]
    MissingColumn(String),

    #[error("Row {row} is malformed: {reason}")]
    MalformedRow { row: usize, reason: String },
}

/// Ledger store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Failures assigning spend categories.
#[derive(Debug, thiserror::Error)]
pub enum CategorizationError {
    #[error("Classifier unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed classifier response: {0}")]
    Malformed(String),

    #[error("Classifier returned {got} labels for {expected} transactions")]
    CardinalityMismatch { expected: usize, got: usize },

    #[error("Classifier returned label '{label}' outside the taxonomy")]
    UnknownLabel { label: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures producing the advice payload.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Response is missing the '{0}' field")]
    MissingField(String),

    #[error("Generated advice is empty")]
    EmptyAdvice,

    #[error("No transaction history to advise on")]
    EmptyHistory,

    #[error("Malformed generator response: {0}")]
    Malformed(String),
}

/// A single recipient's delivery failure. Recorded, never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider rejected message: {0}")]
    Rejected(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

/// One step of the fixed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Filter,
    Categorize,
    Persist,
    Retrieve,
    Generate,
    Notify,
}

impl Stage {
    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Filter => "filter",
            Self::Categorize => "categorize",
            Self::Persist => "persist",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying cause of a stage failure.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Categorization(#[from] CategorizationError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Terminal pipeline failure: which stage failed, and why.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline failed at stage '{stage}': {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_stage_and_cause() {
        let err = PipelineError::new(
            Stage::Generate,
            GenerationError::MissingField("advice".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("generate"));
        assert!(msg.contains("advice"));
        assert!(matches!(
            err.source,
            StageError::Generation(GenerationError::MissingField(_))
        ));
    }

    #[test]
    fn timeout_display() {
        let err = PipelineError::new(
            Stage::Fetch,
            StageError::Timeout {
                after: Duration::from_secs(3),
            },
        );
        assert!(err.to_string().contains("timed out after 3s"));
    }

    #[test]
    fn top_level_error_keeps_stage_in_message() {
        let err: Error = PipelineError::new(
            Stage::Persist,
            StoreError::Write("disk full".into()),
        )
        .into();
        assert!(matches!(err, Error::Pipeline(ref p) if p.stage == Stage::Persist));
        assert!(err.to_string().contains("'persist'"));

        let err: Error = ConfigError::MissingEnvVar("FINADVISOR_SHEET_ID".into()).into();
        assert!(err.to_string().starts_with("Configuration error:"));
    }
}
