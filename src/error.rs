//! Error types for the service layer.

use std::path::PathBuf;
use thiserror::Error;

/// Request-scoped failures. Every variant surfaces to the client as a
/// structured error response; none of them terminates the server.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Operation requires an initialized engine.
    #[error("Engine not initialized. Call initialize first.")]
    NotInitialized,

    /// The configured data directory does not exist.
    #[error("data directory '{}' does not exist", .0.display())]
    DataDirMissing(PathBuf),

    /// The requested preset name is not in the preset table.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// No API key for the selected provider, neither explicit nor in the
    /// environment.
    #[error("credential not configured")]
    CredentialMissing,

    /// Failure inside the analysis engine, contained at the facade.
    #[error("{0}")]
    Engine(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
