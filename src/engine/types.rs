// ABOUTME: Shared types for the engine port: container/network configuration and observations.
// ABOUTME: Deliberately runtime-agnostic; bollard- or podman-specific shapes stop at the impl.

use std::collections::HashMap;
use std::time::Duration;

use crate::types::{ContainerId, ImageRef, NetworkAlias, NetworkId};

/// Everything the engine needs to create one container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: ImageRef,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub restart_policy: RestartPolicyConfig,
    pub resources: Option<ResourceLimits>,
    pub healthcheck: Option<HealthcheckConfig>,
    pub stop_timeout: Option<Duration>,
    pub stop_signal: Option<String>,
    /// `network_mode`/`ipc`/`pid` namespace sharing, already resolved to a
    /// concrete container ID by the reference resolver (C3).
    pub network_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub volumes_from: Vec<String>,
    /// Primary network to join at create time; further attachments go
    /// through `Engine::connect_network` in priority order.
    pub network: Option<String>,
    pub network_aliases: Vec<NetworkAlias>,
}

#[derive(Debug, Clone)]
pub struct PortMapping {
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub enum RestartPolicyConfig {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure {
        max_retries: Option<u32>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub memory: Option<u64>,
    pub cpus: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HealthcheckConfig {
    pub path: String,
    pub port: u16,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// Everything `Engine::inspect` reports back about a container.
#[derive(Debug, Clone)]
pub struct ContainerDetail {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub health: Option<HealthState>,
    pub exit_code: Option<i64>,
    pub created: String,
    pub labels: HashMap<String, String>,
    pub networks: Vec<NetworkId>,
    pub mounts: Vec<VolumeMount>,
    pub config_hash_label: Option<String>,
    pub image_digest_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn is_running(self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
    /// No healthcheck is configured on the container.
    None,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Per-container endpoint settings applied by `Engine::connect_network`.
#[derive(Debug, Clone, Default)]
pub struct EndpointSettings {
    pub aliases: Vec<NetworkAlias>,
    pub fixed_ip: Option<String>,
}
