use thiserror::Error;

/// Top-level error type for the AHER assistant.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for AherError` (or the reverse) so that the `?`
/// operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported {kind} provider: {name}")]
    UnsupportedProvider { kind: &'static str, name: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for AherError {
    fn from(err: toml::de::Error) -> Self {
        AherError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AherError {
    fn from(err: toml::ser::Error) -> Self {
        AherError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AherError {
    fn from(err: serde_json::Error) -> Self {
        AherError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for AHER operations.
pub type Result<T> = std::result::Result<T, AherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AherError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_unsupported_provider_names_the_identifier() {
        let err = AherError::UnsupportedProvider {
            kind: "chat",
            name: "watson".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported chat provider: watson");
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = AherError::DimensionMismatch {
            expected: 768,
            actual: 1536,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 768, got 1536"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AherError = io_err.into();
        assert!(matches!(err, AherError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let aher_err: AherError = err.unwrap_err().into();
        assert!(matches!(aher_err, AherError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let aher_err: AherError = err.unwrap_err().into();
        assert!(matches!(aher_err, AherError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
