use thiserror::Error;

/// Registry client error types
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Invalid registry URL or transport setup failure
    #[error("Construction error: {registry} - {message}")]
    ConstructionError { registry: String, message: String },

    /// Credential provider failed or returned unusable credentials
    #[error("Authorization error: {registry} - {message}")]
    AuthError { registry: String, message: String },

    /// Reference does not resolve in the remote registry
    #[error("Not found: {repository}@{reference}")]
    NotFoundError {
        repository: String,
        reference: String,
    },

    /// Network or protocol failure not otherwise classified
    #[error("Transport error: {message}")]
    TransportError {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    /// Registry rejected an OCI artifact manifest
    #[error("Registry does not support OCI artifacts: {repository} - {message}")]
    UnsupportedArtifactError { repository: String, message: String },

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Content does not hash to the expected digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Malformed repository reference or digest
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Local content store error
    #[error("Content store error: {0}")]
    StoreError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RegistryError {
    /// Build a transport error carrying only a message.
    pub fn transport(message: impl Into<String>) -> Self {
        RegistryError::TransportError {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// HTTP status attached to a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::TransportError { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the caller can recover by choosing another encoding.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RegistryError::UnsupportedArtifactError { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFoundError { .. })
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
