// ABOUTME: Error types for the convergence engine using SNAFU with an ErrorKind pattern.
// ABOUTME: Opaque error with kind() accessor, mirroring the top-level Error/DeployError split.

use snafu::Snafu;

use crate::engine::EngineError;

/// Categories of convergence errors, per the §7 error taxonomy.
///
/// Use `ConvergeError::kind()` to get this value for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConvergeErrorKind {
    InvalidConfig,
    MissingDependency,
    Engine,
    Timeout,
    Cancelled,
    InternalError,
}

/// Opaque error type for `crate::convergence`. Use `kind()` to branch on the
/// error category; the `Display` impl carries the full message chain.
#[derive(Debug)]
pub struct ConvergeError(InnerConvergeError);

impl std::fmt::Display for ConvergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConvergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl ConvergeError {
    pub fn kind(&self) -> ConvergeErrorKind {
        match &self.0 {
            InnerConvergeError::InvalidConfig { .. } => ConvergeErrorKind::InvalidConfig,
            InnerConvergeError::MissingDependency { .. } => ConvergeErrorKind::MissingDependency,
            InnerConvergeError::EngineFailed { .. } | InnerConvergeError::EngineFailedMsg { .. } => {
                ConvergeErrorKind::Engine
            }
            InnerConvergeError::Timeout { .. } => ConvergeErrorKind::Timeout,
            InnerConvergeError::Cancelled => ConvergeErrorKind::Cancelled,
            InnerConvergeError::InternalError { .. } => ConvergeErrorKind::InternalError,
        }
    }

    /// The service this error concerns, when the variant carries one.
    pub fn service(&self) -> Option<&str> {
        match &self.0 {
            InnerConvergeError::MissingDependency { service, .. } => Some(service),
            InnerConvergeError::Timeout { service, .. } => Some(service),
            _ => None,
        }
    }
}

#[derive(Debug, Snafu)]
enum InnerConvergeError {
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("missing dependency for service {service}: {message}"))]
    MissingDependency { service: String, message: String },

    #[snafu(display("engine operation failed: {source}"))]
    EngineFailed { source: EngineError },

    #[snafu(display("engine operation failed: {message}"))]
    EngineFailedMsg { message: String },

    #[snafu(display("timeout waiting for dependencies of {service}"))]
    Timeout { service: String },

    #[snafu(display("convergence cancelled"))]
    Cancelled,

    #[snafu(display("internal error: {message}"))]
    InternalError { message: String },
}

use snafu::ResultExt;

pub trait EngineErrorExt<T> {
    fn context_engine(self) -> Result<T, ConvergeError>;
}

impl<T> EngineErrorExt<T> for Result<T, EngineError> {
    fn context_engine(self) -> Result<T, ConvergeError> {
        self.context(EngineFailedSnafu).map_err(ConvergeError)
    }
}

impl ConvergeError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ConvergeError(InnerConvergeError::InvalidConfig {
            message: message.into(),
        })
    }

    pub fn missing_dependency(service: impl Into<String>, message: impl Into<String>) -> Self {
        ConvergeError(InnerConvergeError::MissingDependency {
            service: service.into(),
            message: message.into(),
        })
    }

    pub fn engine_failed(message: impl Into<String>) -> Self {
        ConvergeError(InnerConvergeError::EngineFailedMsg {
            message: message.into(),
        })
    }

    pub fn timeout(service: impl Into<String>) -> Self {
        ConvergeError(InnerConvergeError::Timeout {
            service: service.into(),
        })
    }

    pub fn cancelled() -> Self {
        ConvergeError(InnerConvergeError::Cancelled)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ConvergeError(InnerConvergeError::InternalError {
            message: message.into(),
        })
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
