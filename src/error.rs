//! Error types for archetype-overlay

use thiserror::Error;

/// Crate-wide error type.
///
/// Expected control-flow outcomes of the applicator (permission denied,
/// already applied, no backup, conflicts) are returned as
/// [`crate::core::applicator::Rejection`] values; only the CLI lifts them
/// into [`OverlayError::Rejected`].
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The persistence collaborator (flag store or item factory) failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A versioned commit observed a revision other than the one it read.
    #[error("stale revision for {scope}: expected {expected}, found {found}")]
    StaleRevision {
        scope: String,
        expected: u64,
        found: u64,
    },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// An applicator rejection surfaced as a command failure.
    #[error("{0}")]
    Rejected(#[from] crate::core::applicator::Rejection),
}

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl OverlayError {
    /// Short machine-readable code used in robot output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Config(_) | Self::MissingConfig(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Persistence(_) => "persistence_failure",
            Self::StaleRevision { .. } => "stale_revision",
            Self::TransactionFailed(_) => "transaction_failed",
            Self::Rejected(rejection) => rejection.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
