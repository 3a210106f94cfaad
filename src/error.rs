//! Error types for the entity operator framework

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity fields missing or malformed
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A raw object could not be turned into an entity
    #[error("Conversion error for '{object}': {reason}")]
    Conversion { object: String, reason: String },

    /// The watch could not be built or started
    #[error("{operator} startup failed for namespace {namespace}: {source}")]
    WatchEstablishment {
        operator: String,
        namespace: String,
        #[source]
        source: Box<Error>,
    },

    /// CRD registration failed
    #[error("CRD deployment error: {0}")]
    CrdDeployment(String),

    /// Operation requires a started operator
    #[error("Operator not started: {0}")]
    NotStarted(String),

    /// User handler failure
    #[error("Handler error: {0}")]
    Handler(#[source] anyhow::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an integrity error
    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }

    /// Create a conversion error for the named object
    pub fn conversion(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Conversion {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create a CRD deployment error
    pub fn crd(msg: impl Into<String>) -> Self {
        Error::CrdDeployment(msg.into())
    }

    /// True for 404 responses from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
