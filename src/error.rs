//! Error types for the AEP provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while deriving schemas or running resource operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The interface description could not be turned into a resource schema.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A value could not be converted between state and the wire format.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A resource URL could not be built or a path did not match its pattern.
    #[error("Path error: {0}")]
    Path(String),

    /// The server's canonical path disagrees with the identifier held in state.
    #[error("Identity mismatch: {0}")]
    Identity(String),

    /// The remote API reported a failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP transport failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Remote messages are returned exactly as the server sent them.
    pub fn message(&self) -> &str {
        match self {
            Self::Schema(msg) => msg,
            Self::Conversion(msg) => msg,
            Self::Path(msg) => msg,
            Self::Identity(msg) => msg,
            Self::Remote(msg) => msg,
            Self::NotFound(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Http(_err) => "http error (see Debug output)",
        }
    }

    /// Short summary used when the error is reported to the host.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Schema(_) => "Schema error",
            Self::Conversion(_) => "Conversion error",
            Self::Path(_) => "Path error",
            Self::Identity(_) => "Resource identity mismatch",
            Self::Remote(_) | Self::Http(_) => "Client error",
            Self::NotFound(_) => "Resource not found",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Configuration(_) => "Configuration error",
            Self::Validation(_) => "Validation error",
            Self::Serialization(_) => "Serialization error",
        }
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        Diagnostic::error(err.summary()).with_detail(err.to_string())
    }
}
