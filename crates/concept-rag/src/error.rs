//! Domain errors with stable codes.
//!
//! Every error that can cross the tool boundary carries a stable code and
//! enough structured context to serialize as `{code, message, context}`.
//! Transient classes (rate limit, timeout, circuit open) are the only ones
//! the retry policy will reattempt.

use std::time::Duration;

use serde_json::{json, Value};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("concept not found: '{name}'")]
    ConceptNotFound { name: String },

    #[error("source not found: '{source}'")]
    SourceNotFound { source: String },

    #[error("invalid embeddings: {reason}")]
    InvalidEmbeddings { reason: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("schema validation failed for '{field}': {reason}")]
    SchemaValidation { field: String, reason: String },

    #[error("database operation '{op}' failed: {message}")]
    DatabaseOperation { op: &'static str, message: String },

    #[error("missing required parameter: '{name}'")]
    MissingParameter { name: &'static str },

    #[error("rate limited by upstream")]
    RateLimit { retry_after: Option<Duration> },

    #[error("operation timed out after {deadline:?}")]
    Timeout { deadline: Duration },

    #[error("circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },

    #[error("authentication rejected by upstream (HTTP {status})")]
    Auth { status: u16 },

    #[error("upstream call to '{endpoint}' failed: {message}")]
    Upstream { endpoint: String, message: String },
}

impl Error {
    /// Stable machine-readable code, part of the tool contract.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConceptNotFound { .. } => "CONCEPT_NOT_FOUND",
            Error::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            Error::InvalidEmbeddings { .. } => "INVALID_EMBEDDINGS",
            Error::InvalidQuery { .. } => "INVALID_QUERY",
            Error::SchemaValidation { .. } => "SCHEMA_VALIDATION_ERROR",
            Error::DatabaseOperation { .. } => "DATABASE_OPERATION_ERROR",
            Error::MissingParameter { .. } => "MISSING_PARAMETER",
            Error::RateLimit { .. } => "RATE_LIMIT",
            Error::Timeout { .. } => "TIMEOUT",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::Auth { .. } => "AUTH_ERROR",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }

    /// Whether the retry policy may reattempt the failed call.
    /// Validation and not-found errors never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimit { .. } | Error::Timeout { .. } | Error::CircuitOpen { .. }
        )
    }

    /// Structured context for the tool boundary.
    fn context(&self) -> Value {
        match self {
            Error::ConceptNotFound { name } => json!({ "concept": name }),
            Error::SourceNotFound { source } => json!({ "source": source }),
            Error::InvalidEmbeddings { reason } => json!({ "reason": reason }),
            Error::InvalidQuery { reason } => json!({ "reason": reason }),
            Error::SchemaValidation { field, reason } => {
                json!({ "field": field, "reason": reason })
            }
            Error::DatabaseOperation { op, message } => {
                json!({ "operation": op, "cause": message })
            }
            Error::MissingParameter { name } => json!({ "parameter": name }),
            Error::RateLimit { retry_after } => {
                json!({ "retry_after_secs": retry_after.map(|d| d.as_secs()) })
            }
            Error::Timeout { deadline } => json!({ "deadline_secs": deadline.as_secs() }),
            Error::CircuitOpen { endpoint } => json!({ "endpoint": endpoint }),
            Error::Auth { status } => json!({ "status": status }),
            Error::Upstream { endpoint, message } => {
                json!({ "endpoint": endpoint, "cause": message })
            }
        }
    }

    /// Serialize as the single JSON object the tool boundary emits.
    pub fn to_tool_json(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "context": self.context(),
        })
    }

    /// Wrap a store-level failure with the operation name.
    pub fn database(op: &'static str, err: impl std::fmt::Display) -> Self {
        Error::DatabaseOperation {
            op,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::ConceptNotFound { name: "x".into() }.code(),
            "CONCEPT_NOT_FOUND"
        );
        assert_eq!(
            Error::Timeout { deadline: Duration::from_secs(5) }.code(),
            "TIMEOUT"
        );
        assert_eq!(
            Error::CircuitOpen { endpoint: "llm".into() }.code(),
            "CIRCUIT_OPEN"
        );
    }

    #[test]
    fn only_transient_classes_retry() {
        assert!(Error::RateLimit { retry_after: None }.is_retryable());
        assert!(Error::Timeout { deadline: Duration::from_secs(1) }.is_retryable());
        assert!(!Error::InvalidQuery { reason: "empty".into() }.is_retryable());
        assert!(!Error::SchemaValidation { field: "vector".into(), reason: "len".into() }
            .is_retryable());
    }

    #[test]
    fn tool_json_shape() {
        let err = Error::SourceNotFound { source: "/x.pdf".into() };
        let v = err.to_tool_json();
        assert_eq!(v["code"], "SOURCE_NOT_FOUND");
        assert_eq!(v["context"]["source"], "/x.pdf");
        assert!(v["message"].as_str().unwrap().contains("/x.pdf"));
    }
}
