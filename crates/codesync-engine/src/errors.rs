//! Error taxonomy for the sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation failed: {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Not authorized: {resource}")]
    AuthorizationError { resource: String },

    #[error("Derivation failed: {message}")]
    DerivationFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Derivation returned {actual} results for {expected} inputs")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Cache unavailable: {operation}")]
    CacheUnavailable {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Vector storage failed: {operation}")]
    StorageFailure {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Could not process {path}")]
    FileProcessingError {
        path: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Segmentation failed: {reason}")]
    ChunkingError { reason: String },

    #[error("Invalid configuration: {field}")]
    ConfigurationError {
        field: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Upstream call failed: {service}")]
    ExternalServiceError {
        service: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl SyncError {
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError { field: field.into(), message: message.into() }
    }

    pub fn authorization_error(resource: impl Into<String>) -> Self {
        Self::AuthorizationError { resource: resource.into() }
    }

    pub fn derivation_failure(message: impl Into<String>) -> Self {
        Self::DerivationFailure { message: message.into(), source: None }
    }

    pub fn derivation_failure_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DerivationFailure { message: message.into(), source: Some(source.into()) }
    }

    pub fn arity_mismatch(expected: usize, actual: usize) -> Self {
        Self::ArityMismatch { expected, actual }
    }

    pub fn cache_unavailable_with_source(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::CacheUnavailable { operation: operation.into(), source: Some(source.into()) }
    }

    pub fn storage_failure(operation: impl Into<String>) -> Self {
        Self::StorageFailure { operation: operation.into(), source: None }
    }

    pub fn storage_failure_with_source(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StorageFailure { operation: operation.into(), source: Some(source.into()) }
    }

    pub fn file_processing_error_with_source(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::FileProcessingError { path: path.into(), source: Some(Box::new(source)) }
    }

    pub fn chunking_error(reason: impl Into<String>) -> Self {
        Self::ChunkingError { reason: reason.into() }
    }

    pub fn configuration_error(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into(), source: None }
    }

    pub fn configuration_error_with_source(
        field: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigurationError { field: field.into(), source: Some(Box::new(source)) }
    }

    pub fn external_service_error_with_source(
        service: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ExternalServiceError { service: service.into(), source: Some(source.into()) }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Wire code, HTTP status and retry hint for each variant. An arity
    /// mismatch is retryable since a retry re-derives the whole batch.
    fn profile(&self) -> (&'static str, u16, bool) {
        match self {
            Self::ValidationError { .. } => ("VALIDATION_ERROR", 400, false),
            Self::AuthorizationError { .. } => ("AUTHORIZATION_ERROR", 403, false),
            Self::DerivationFailure { .. } => ("DERIVATION_FAILURE", 502, true),
            Self::ArityMismatch { .. } => ("ARITY_MISMATCH", 500, true),
            Self::CacheUnavailable { .. } => ("CACHE_UNAVAILABLE", 503, true),
            Self::StorageFailure { .. } => ("STORAGE_FAILURE", 500, true),
            Self::FileProcessingError { .. } => ("FILE_PROCESSING_ERROR", 500, false),
            Self::ChunkingError { .. } => ("CHUNKING_ERROR", 500, false),
            Self::ConfigurationError { .. } => ("CONFIGURATION_ERROR", 400, false),
            Self::ExternalServiceError { .. } => ("EXTERNAL_SERVICE_ERROR", 502, true),
            Self::InternalError { .. } => ("INTERNAL_ERROR", 500, false),
        }
    }

    /// Code used in HTTP error bodies and per-item chunk errors
    pub fn error_code(&self) -> &'static str {
        self.profile().0
    }

    pub fn http_status_code(&self) -> u16 {
        self.profile().1
    }

    pub fn is_retryable(&self) -> bool {
        self.profile().2
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError { message: format!("{err:#}") }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::InternalError { message: format!("I/O error: {err}") }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError { message: format!("JSON error: {err}") }
    }
}

/// Convert qdrant_client::QdrantError to SyncError
impl From<qdrant_client::QdrantError> for SyncError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Self::storage_failure_with_source("Qdrant operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_error_classification() {
        let fixture = [
            (SyncError::validation_error("root", "missing"), "VALIDATION_ERROR", 400, false),
            (SyncError::authorization_error("tenant a"), "AUTHORIZATION_ERROR", 403, false),
            (SyncError::arity_mismatch(3, 2), "ARITY_MISMATCH", 500, true),
            (SyncError::storage_failure("upsert"), "STORAGE_FAILURE", 500, true),
        ];

        for (error, code, status, retryable) in fixture {
            assert_eq!(error.error_code(), code);
            assert_eq!(error.http_status_code(), status);
            assert_eq!(error.is_retryable(), retryable);
        }
    }

    #[test]
    fn test_arity_message() {
        let actual = SyncError::arity_mismatch(3, 2).to_string();
        let expected = "Derivation returned 2 results for 3 inputs";
        assert_eq!(actual, expected);
    }
}
