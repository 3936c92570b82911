//! Error types for the Storyloom core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from interacting with LLM providers (Anthropic, OpenAI, Ollama).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// LLM provider rate limit hit.
    #[error("LLM rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The call exceeded its wall-clock deadline.
    #[error("LLM call timed out after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded.
        seconds: u64,
    },

    /// LLM response could not be parsed.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// Structured extraction from the response text failed.
    ///
    /// Carries the raw text and the expected schema so the caller can
    /// decide between a tightened retry and failing the stage.
    #[error("failed to extract {expected} from LLM response at offset {offset}")]
    Extract {
        /// The raw response text the extractor was given.
        raw: String,
        /// Byte offset the extractor reached before giving up.
        offset: usize,
        /// Description of the expected structure (e.g. field names).
        expected: String,
    },

    /// No LLM provider configured.
    #[error("no LLM provider configured")]
    NotConfigured,
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A stored value violates a schema or domain constraint.
    ///
    /// This is a programmer error (e.g. an unknown status string in a
    /// row); it fails fast rather than being retried.
    #[error("storage constraint violation: {message}")]
    ConstraintViolation {
        /// What was violated.
        message: String,
    },
}

impl LlmError {
    /// Whether this error is transient and worth retrying at the call site.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Request(_) | LlmError::RateLimited { .. } | LlmError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_field_message() {
        let err = ConfigError::MissingField {
            field: "llm.api_key".to_string(),
        };
        assert_eq!(err.to_string(), "missing required config field: llm.api_key");
    }

    #[test]
    fn config_error_invalid_value_message() {
        let err = ConfigError::InvalidValue {
            field: "llm.provider".to_string(),
            message: "must be openai, anthropic, or ollama".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for config field 'llm.provider': must be openai, anthropic, or ollama"
        );
    }

    #[test]
    fn llm_error_rate_limited_message() {
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "LLM rate limited, retry after 30 seconds");
    }

    #[test]
    fn llm_error_timeout_message() {
        let err = LlmError::Timeout { seconds: 300 };
        assert_eq!(err.to_string(), "LLM call timed out after 300s");
    }

    #[test]
    fn llm_error_extract_message_omits_raw() {
        let err = LlmError::Extract {
            raw: "some very long model output".to_string(),
            offset: 17,
            expected: "JSON object with field 'premises'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 17"));
        assert!(msg.contains("premises"));
        assert!(!msg.contains("very long model output"));
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::Timeout { seconds: 1 }.is_transient());
        assert!(LlmError::RateLimited {
            retry_after_secs: 5
        }
        .is_transient());
        assert!(!LlmError::Parse("bad".into()).is_transient());
        assert!(!LlmError::NotConfigured.is_transient());
    }

    #[test]
    fn storage_constraint_violation_message() {
        let err = StorageError::ConstraintViolation {
            message: "unknown story status 'frozen'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "storage constraint violation: unknown story status 'frozen'"
        );
    }
}
