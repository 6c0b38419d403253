//! Error types for force-curve feature extraction

use thiserror::Error;

/// Failure of one analysis stage.
///
/// Stage-local failures (one peak) are absorbed by the pipeline; curve-level
/// failures (no contact point, no baseline) abort that curve only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A fit ran but its result failed a sanity check or did not converge.
    #[error("poor fit: {0}")]
    PoorFit(String),

    /// Too few points for the requested operation.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A configuration value is outside its valid domain.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn poor_fit<S: Into<String>>(message: S) -> Self {
        Error::PoorFit(message.into())
    }

    pub fn insufficient<S: Into<String>>(message: S) -> Self {
        Error::InsufficientData(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
