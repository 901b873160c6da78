// src/utils/errors.rs
//! Error types for the policy layer

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors raised by the policy layer
///
/// Handler faults and gate faults are absorbed at their boundaries and only
/// show up here when a caller explicitly asks for them (install, export).
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The interception engine refused to hook a point
    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    /// A handler was registered with a mode that differs from the chain's
    #[error("chain mode mismatch on {point}: chain is {existing}, handler asked for {requested}")]
    ChainModeMismatch {
        point: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// The resource gate failed to suppress or restore
    #[error("gate failed: {0}")]
    GateFailed(String),

    /// Audit export failed
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The process-wide runtime was already installed
    #[error("policy runtime already installed")]
    AlreadyInstalled,

    /// Re-issuing process termination failed
    #[error("termination failed: {0}")]
    TerminationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for PolicyError {
    fn from(err: config::ConfigError) -> Self {
        PolicyError::ConfigError(err.to_string())
    }
}
