// ABOUTME: In-memory fake implementation of the engine port.
// ABOUTME: Used by the convergence engine's own test suite and by property tests; never
// ABOUTME: touches a real container runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{ContainerId, NetworkId};

use super::error::EngineError;
use super::sealed::Sealed;
use super::types::{
    ContainerConfig, ContainerDetail, ContainerState, EndpointSettings, HealthState, NetworkConfig,
};
use super::Engine;

struct FakeContainer {
    detail: ContainerDetail,
    config: ContainerConfig,
}

/// A fully in-process stand-in for a container runtime.
///
/// Containers created here never run anything; `start` simply flips state to
/// `Running`, and health is driven by `set_health` so tests can script a
/// healthcheck's time-to-healthy without a real sleep loop.
pub struct FakeEngine {
    containers: Mutex<HashMap<ContainerId, FakeContainer>>,
    networks: Mutex<HashMap<String, NetworkId>>,
    next_id: AtomicU64,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            networks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n:06}")
    }

    /// Force a container's health state, bypassing any healthcheck timing.
    /// Used by C7 wait-loop tests to simulate "becomes healthy after N polls".
    pub fn set_health(&self, id: &ContainerId, health: HealthState) {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.detail.health = Some(health);
        }
    }

    /// Force a container to Exited with the given code, for
    /// `service_completed_successfully` wait-condition tests.
    pub fn set_exited(&self, id: &ContainerId, exit_code: i64) {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.detail.state = ContainerState::Exited;
            c.detail.exit_code = Some(exit_code);
        }
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().len()
    }
}

impl Sealed for FakeEngine {}

#[async_trait]
impl Engine for FakeEngine {
    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId, EngineError> {
        let mut containers = self.containers.lock();
        if containers.values().any(|c| c.detail.name == config.name) {
            return Err(EngineError::ContainerAlreadyExists(config.name.clone()));
        }

        let id = ContainerId::new(self.fresh_id("container"));
        let mut labels = config.labels.clone();
        let config_hash_label = labels.get("converge.config-hash").cloned();
        let image_digest_label = labels.get("converge.image-digest").cloned();
        labels.entry("converge.managed".to_string()).or_insert_with(|| "true".to_string());

        let detail = ContainerDetail {
            id: id.clone(),
            name: config.name.clone(),
            image: config.image.to_string(),
            state: ContainerState::Created,
            health: config.healthcheck.as_ref().map(|_| HealthState::Starting),
            exit_code: None,
            created: "1970-01-01T00:00:00Z".to_string(),
            labels,
            networks: vec![],
            mounts: config.volumes.clone(),
            config_hash_label,
            image_digest_label,
        };

        containers.insert(
            id.clone(),
            FakeContainer {
                detail,
                config: config.clone(),
            },
        );
        Ok(id)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetail, EngineError> {
        self.containers
            .lock()
            .get(id)
            .map(|c| c.detail.clone())
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))
    }

    async fn start(&self, id: &ContainerId) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))?;
        if c.detail.state.is_running() {
            return Err(EngineError::ContainerAlreadyRunning(id.to_string()));
        }
        c.detail.state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, _timeout: Duration) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))?;
        if !c.detail.state.is_running() {
            return Err(EngineError::ContainerNotRunning(id.to_string()));
        }
        c.detail.state = ContainerState::Exited;
        c.detail.exit_code = Some(0);
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.containers
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))
    }

    async fn rename(&self, id: &ContainerId, new_name: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        if containers.values().any(|c| c.detail.name == new_name) {
            return Err(EngineError::ContainerAlreadyExists(new_name.to_string()));
        }
        let c = containers
            .get_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))?;
        c.detail.name = new_name.to_string();
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &NetworkId,
        container: &ContainerId,
        _endpoint: &EndpointSettings,
    ) -> Result<(), EngineError> {
        let mut containers = self.containers.lock();
        let c = containers
            .get_mut(container)
            .ok_or_else(|| EngineError::ContainerNotFound(container.to_string()))?;
        if !c.detail.networks.contains(network) {
            c.detail.networks.push(network.clone());
        }
        Ok(())
    }

    async fn ensure_network(
        &self,
        config: &NetworkConfig,
        _create_if_missing: bool,
    ) -> Result<NetworkId, EngineError> {
        let mut networks = self.networks.lock();
        if let Some(id) = networks.get(&config.name) {
            return Ok(id.clone());
        }
        let id = NetworkId::new(self.fresh_id("network"));
        networks.insert(config.name.clone(), id.clone());
        Ok(id)
    }

    async fn ensure_image(&self, _image: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok("fake-engine/0.0.0".to_string())
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerDetail>, EngineError> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| c.detail.labels.get(key).map(|v| v.as_str()) == Some(value))
            .map(|c| c.detail.clone())
            .collect())
    }
}
