// ABOUTME: Application-wide error types for converge.
// ABOUTME: Uses thiserror for ergonomic error handling with preserved rich types.

use thiserror::Error;

use crate::convergence::ConvergeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("convergence failed: {0}")]
    Converge(#[from] ConvergeError),
}

impl Error {
    /// Returns the convergence error if this is a `Converge` variant.
    pub fn as_converge_error(&self) -> Option<&ConvergeError> {
        match self {
            Error::Converge(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
