// ABOUTME: Errors surfaced by the engine port.
// ABOUTME: Flat enum; callers match on it directly (no opaque-wrapper needed at this layer).

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),

    #[error("container not running: {0}")]
    ContainerNotRunning(String),

    #[error("container already running: {0}")]
    ContainerAlreadyRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("network already exists: {0}")]
    NetworkAlreadyExists(String),

    #[error("invalid container configuration: {0}")]
    InvalidConfig(String),

    #[error("engine runtime error: {0}")]
    Runtime(String),
}
