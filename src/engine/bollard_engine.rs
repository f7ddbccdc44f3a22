// ABOUTME: bollard-backed production implementation of the engine port.
// ABOUTME: Talks to a Docker- or Podman-compatible API over its Unix socket.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, EndpointSettings as BollardEndpointSettings, HealthConfig, HostConfig,
    Mount, MountTypeEnum, NetworkConnectRequest, NetworkCreateRequest, NetworkingConfig,
    PortBinding, RestartPolicy as BollardRestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, InspectNetworkOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};

use crate::types::{ContainerId, NetworkId};

use super::error::EngineError;
use super::sealed::Sealed;
use super::types::{
    ContainerConfig, ContainerDetail, ContainerState, EndpointSettings, HealthState, NetworkConfig,
    Protocol, RestartPolicyConfig,
};
use super::Engine;

/// Engine backed by `bollard`, speaking the Docker-compatible HTTP API.
/// Works unmodified against Podman's Docker-compatibility socket.
pub struct BollardEngine {
    client: Docker,
}

impl BollardEngine {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    pub fn connect_with_local_defaults() -> Result<Self, EngineError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Runtime(format!("failed to connect to engine: {e}")))?;
        Ok(Self::new(client))
    }
}

impl Sealed for BollardEngine {}

fn map_create_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::ImageNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::ContainerAlreadyExists(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

fn map_start_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::ContainerNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            message,
        } => EngineError::ContainerAlreadyRunning(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

fn map_stop_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::ContainerNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            message,
        } => EngineError::ContainerNotRunning(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

fn map_not_found_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::ContainerNotFound(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

fn map_network_create_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::NetworkAlreadyExists(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

fn map_network_connect_error(e: bollard::errors::Error) -> EngineError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NetworkNotFound(message.clone()),
        _ => EngineError::Runtime(e.to_string()),
    }
}

#[async_trait]
impl Engine for BollardEngine {
    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId, EngineError> {
        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut host_config = HostConfig {
            restart_policy: Some(BollardRestartPolicy {
                name: Some(match &config.restart_policy {
                    RestartPolicyConfig::No => RestartPolicyNameEnum::NO,
                    RestartPolicyConfig::Always => RestartPolicyNameEnum::ALWAYS,
                    RestartPolicyConfig::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
                    RestartPolicyConfig::OnFailure { .. } => RestartPolicyNameEnum::ON_FAILURE,
                }),
                maximum_retry_count: match &config.restart_policy {
                    RestartPolicyConfig::OnFailure { max_retries } => {
                        max_retries.map(|r| r as i64)
                    }
                    _ => None,
                },
            }),
            ..Default::default()
        };

        if let Some(ref resources) = config.resources {
            if let Some(memory) = resources.memory {
                host_config.memory = Some(memory as i64);
            }
            if let Some(cpus) = resources.cpus {
                host_config.nano_cpus = Some((cpus * 1_000_000_000.0) as i64);
            }
        }

        let mounts: Vec<Mount> = config
            .volumes
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();
        if !mounts.is_empty() {
            host_config.mounts = Some(mounts);
        }

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: Vec<String> = Vec::new();
        for port in &config.ports {
            let proto = match port.protocol {
                Protocol::Tcp => "tcp",
                Protocol::Udp => "udp",
            };
            let key = format!("{}/{proto}", port.container_port);
            exposed_ports.push(key.clone());
            if let Some(host_port) = port.host_port {
                port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: port.host_ip.clone(),
                        host_port: Some(host_port.to_string()),
                    }]),
                );
            }
        }
        if !port_bindings.is_empty() {
            host_config.port_bindings = Some(port_bindings);
        }

        if let Some(ref network) = config.network {
            host_config.network_mode = Some(network.clone());
        }
        if let Some(ref mode) = config.network_mode {
            host_config.network_mode = Some(mode.clone());
        }
        if let Some(ref ipc) = config.ipc_mode {
            host_config.ipc_mode = Some(ipc.clone());
        }
        if let Some(ref pid) = config.pid_mode {
            host_config.pid_mode = Some(pid.clone());
        }
        if !config.volumes_from.is_empty() {
            host_config.volumes_from = Some(config.volumes_from.clone());
        }

        let healthcheck = config.healthcheck.as_ref().map(|hc| HealthConfig {
            test: Some(vec![
                "CMD".to_string(),
                "wget".to_string(),
                "-q".to_string(),
                "-O".to_string(),
                "-".to_string(),
                format!("http://localhost:{}{}", hc.port, hc.path),
            ]),
            interval: Some(hc.interval.as_nanos() as i64),
            timeout: Some(hc.timeout.as_nanos() as i64),
            retries: Some(hc.retries as i64),
            start_period: Some(hc.start_period.as_nanos() as i64),
            start_interval: None,
        });

        let networking_config = if config.network.is_some() && !config.network_aliases.is_empty()
        {
            let network_name = config.network.clone().unwrap();
            let aliases: Vec<String> =
                config.network_aliases.iter().map(|a| a.to_string()).collect();
            let mut endpoints = HashMap::new();
            endpoints.insert(
                network_name,
                BollardEndpointSettings {
                    aliases: Some(aliases),
                    ..Default::default()
                },
            );
            Some(NetworkingConfig {
                endpoints_config: Some(endpoints),
            })
        } else {
            None
        };

        let body = ContainerCreateBody {
            image: Some(config.image.to_string()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            cmd: config.command.clone(),
            entrypoint: config.entrypoint.clone(),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            host_config: Some(host_config),
            healthcheck,
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            networking_config,
            stop_timeout: config.stop_timeout.map(|d| d.as_secs() as i64),
            stop_signal: config.stop_signal.clone(),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(map_create_error)?;

        Ok(ContainerId::new(response.id))
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetail, EngineError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_not_found_error)?;

        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| match s {
                bollard::models::ContainerStateStatusEnum::CREATED => ContainerState::Created,
                bollard::models::ContainerStateStatusEnum::RUNNING => ContainerState::Running,
                bollard::models::ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
                bollard::models::ContainerStateStatusEnum::RESTARTING => {
                    ContainerState::Restarting
                }
                bollard::models::ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
                bollard::models::ContainerStateStatusEnum::EXITED => ContainerState::Exited,
                bollard::models::ContainerStateStatusEnum::DEAD => ContainerState::Dead,
                _ => ContainerState::Exited,
            })
            .unwrap_or(ContainerState::Exited);

        let health = details
            .state
            .as_ref()
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status)
            .map(|s| match s {
                bollard::models::HealthStatusEnum::STARTING => HealthState::Starting,
                bollard::models::HealthStatusEnum::HEALTHY => HealthState::Healthy,
                bollard::models::HealthStatusEnum::UNHEALTHY => HealthState::Unhealthy,
                _ => HealthState::None,
            });

        let exit_code = details.state.as_ref().and_then(|s| s.exit_code);

        let labels = details
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        let config_hash_label = labels.get("converge.config-hash").cloned();
        let image_digest_label = labels.get("converge.image-digest").cloned();

        let networks = details
            .network_settings
            .as_ref()
            .and_then(|ns| ns.networks.as_ref())
            .map(|nets| {
                nets.values()
                    .filter_map(|e| e.network_id.clone())
                    .map(NetworkId::new)
                    .collect()
            })
            .unwrap_or_default();

        let mounts = details
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| {
                // Named-volume mounts carry the volume name separately from
                // `source` (which is the host-side storage path); bind mounts
                // have no `name` and `source` is the path the caller declared.
                let source = m.name.or(m.source).unwrap_or_default();
                super::types::VolumeMount {
                    source,
                    target: m.destination.unwrap_or_default(),
                    read_only: !m.rw.unwrap_or(true),
                }
            })
            .collect();

        Ok(ContainerDetail {
            id: id.clone(),
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: details
                .config
                .as_ref()
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            state,
            health,
            exit_code,
            created: details.created.map(|dt| dt.to_string()).unwrap_or_default(),
            labels,
            networks,
            mounts,
            config_hash_label,
            image_digest_label,
        })
    }

    async fn start(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(map_start_error)
    }

    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), EngineError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };
        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(map_stop_error)
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), EngineError> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_not_found_error)
    }

    async fn rename(&self, id: &ContainerId, new_name: &str) -> Result<(), EngineError> {
        self.client
            .rename_container(
                id.as_str(),
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(|e| match &e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => EngineError::ContainerNotFound(message.clone()),
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409,
                    message,
                } => EngineError::ContainerAlreadyExists(message.clone()),
                _ => EngineError::Runtime(e.to_string()),
            })
    }

    async fn connect_network(
        &self,
        network: &NetworkId,
        container: &ContainerId,
        endpoint: &EndpointSettings,
    ) -> Result<(), EngineError> {
        let request = NetworkConnectRequest {
            container: container.to_string(),
            endpoint_config: Some(BollardEndpointSettings {
                aliases: if endpoint.aliases.is_empty() {
                    None
                } else {
                    Some(endpoint.aliases.iter().map(|a| a.to_string()).collect())
                },
                ip_address: endpoint.fixed_ip.clone(),
                ..Default::default()
            }),
        };
        self.client
            .connect_network(network.as_str(), request)
            .await
            .map_err(map_network_connect_error)
    }

    async fn ensure_network(
        &self,
        config: &NetworkConfig,
        create_if_missing: bool,
    ) -> Result<NetworkId, EngineError> {
        match self
            .client
            .inspect_network(&config.name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(n) => return Ok(NetworkId::new(n.id.unwrap_or_default())),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) if create_if_missing => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            }) => return Err(EngineError::NetworkNotFound(message)),
            Err(e) => return Err(EngineError::Runtime(e.to_string())),
        }

        let request = NetworkCreateRequest {
            name: config.name.clone(),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            ..Default::default()
        };
        let response = self
            .client
            .create_network(request)
            .await
            .map_err(map_network_create_error)?;
        Ok(NetworkId::new(response.id))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let opts = bollard::query_parameters::CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        use futures::StreamExt;
        let mut stream = self.client.create_image(Some(opts), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| EngineError::ImageNotFound(format!("{image}: {e}")))?;
        }
        Ok(())
    }

    async fn version(&self) -> Result<String, EngineError> {
        let info = self
            .client
            .version()
            .await
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        Ok(info.version.unwrap_or_default())
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerDetail>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{key}={value}")]);

        let opts = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let summaries = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        let mut details = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(id) = summary.id {
                details.push(self.inspect(&ContainerId::new(id)).await?);
            }
        }
        Ok(details)
    }
}
