// ABOUTME: Engine port (C1): a capability surface of pure I/O operations over a container
// ABOUTME: runtime, abstracting the difference between the bollard-backed implementation
// ABOUTME: used in production and the in-memory fake used by the test suite.

mod bollard_engine;
mod fake;
mod sealed;
mod types;

pub use error::EngineError;
pub use fake::FakeEngine;
pub use types::{
    ContainerConfig, ContainerDetail, ContainerState, EndpointSettings, HealthState,
    HealthcheckConfig, NetworkConfig, PortMapping, Protocol, ResourceLimits, RestartPolicyConfig,
    VolumeMount,
};

mod error;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{ContainerId, NetworkId};
use sealed::Sealed;

/// The engine port. Every mutation the convergence engine performs against
/// the outside world goes through this trait; nothing in `crate::convergence`
/// talks to a container runtime directly.
///
/// Sealed: only `BollardEngine` and `FakeEngine` implement it. This lets the
/// port grow (new methods, widened signatures) without a semver break for
/// hypothetical external implementors.
#[async_trait]
pub trait Engine: Sealed + Send + Sync {
    /// Create a container. Does not start it.
    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId, EngineError>;

    /// Fetch the current observed state of a single container.
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetail, EngineError>;

    /// Start a created (or stopped) container.
    async fn start(&self, id: &ContainerId) -> Result<(), EngineError>;

    /// Stop a running container, sending the configured stop signal and
    /// waiting up to `timeout` before a forced kill.
    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), EngineError>;

    /// Remove a stopped container.
    async fn remove(&self, id: &ContainerId) -> Result<(), EngineError>;

    /// Rename a container in place; used by the recreate protocol's cutover
    /// step (C8) instead of create-then-delete-old, to keep the gap between
    /// "old gone" and "new live" as small as possible.
    async fn rename(&self, id: &ContainerId, new_name: &str) -> Result<(), EngineError>;

    /// Attach a container to a network with the given aliases/fixed IP.
    async fn connect_network(
        &self,
        network: &NetworkId,
        container: &ContainerId,
        endpoint: &EndpointSettings,
    ) -> Result<(), EngineError>;

    /// Resolve a network name to an ID, creating it if `create_if_missing`
    /// and it does not already exist.
    async fn ensure_network(
        &self,
        config: &NetworkConfig,
        create_if_missing: bool,
    ) -> Result<NetworkId, EngineError>;

    /// Pull an image if not already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError>;

    /// Engine version string, surfaced in diagnostics and logged once at
    /// startup.
    async fn version(&self) -> Result<String, EngineError>;

    /// List every container carrying the given label (used by orphan
    /// detection to find managed-but-unknown containers).
    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerDetail>, EngineError>;
}
