// ABOUTME: Projects a resolved Service into the engine-level ContainerConfig the port expects.
// ABOUTME: Pure; the only place project-level and engine-level shapes meet.

use std::collections::HashMap;

use crate::engine;
use crate::project::{resolve_env_map, RestartPolicy, Service, VolumeMount as ProjectVolumeMount};
use crate::types::ConfigHash;

use super::error::{ConvergeError, Result};
use super::observed::{LABEL_CONFIG_HASH, LABEL_IMAGE_DIGEST, LABEL_NUMBER, LABEL_PROJECT, LABEL_SERVICE};

/// Build the engine-level configuration for one container of `service`,
/// carrying the labels §6 mandates on every managed container.
pub fn container_config(
    project_name: &str,
    service: &Service,
    container_name: &str,
    number: u32,
    hash: &ConfigHash,
) -> Result<engine::ContainerConfig> {
    let env = resolve_env_map(&service.env).map_err(|e| ConvergeError::invalid_config(e.to_string()))?;

    let mut labels = service.labels.clone();
    labels.insert(LABEL_PROJECT.to_string(), project_name.to_string());
    labels.insert(LABEL_SERVICE.to_string(), service.name.to_string());
    labels.insert(LABEL_NUMBER.to_string(), number.to_string());
    labels.insert(LABEL_CONFIG_HASH.to_string(), hash.as_str().to_string());
    if let Some(digest) = &service.image_digest {
        labels.insert(LABEL_IMAGE_DIGEST.to_string(), digest.clone());
    }

    let volumes = service
        .resolved_volumes()
        .iter()
        .map(project_to_engine_volume)
        .collect();

    let primary_network = service
        .networks
        .iter()
        .min_by_key(|n| n.priority)
        .map(|n| n.name.clone());
    let primary_aliases = service
        .resolved_networks()
        .map_err(ConvergeError::invalid_config)?
        .into_iter()
        .find(|n| Some(&n.name) == primary_network.as_ref())
        .map(|n| n.aliases)
        .unwrap_or_default();

    Ok(engine::ContainerConfig {
        name: container_name.to_string(),
        image: service.image.clone(),
        env,
        labels,
        ports: service.ports.iter().filter_map(|p| parse_port(p)).collect(),
        volumes,
        command: None,
        entrypoint: None,
        working_dir: None,
        user: None,
        restart_policy: project_to_engine_restart(&service.restart),
        resources: service.resources.as_ref().map(project_to_engine_resources),
        healthcheck: service.healthcheck.as_ref().map(project_to_engine_healthcheck),
        stop_timeout: service.stop.as_ref().map(|s| s.timeout),
        stop_signal: service.stop.as_ref().map(|s| s.signal.clone()),
        network_mode: service.network_mode.clone(),
        ipc_mode: service.ipc.clone(),
        pid_mode: service.pid.clone(),
        volumes_from: service.volumes_from.clone(),
        network: primary_network,
        network_aliases: primary_aliases,
    })
}

fn project_to_engine_volume(v: &ProjectVolumeMount) -> engine::VolumeMount {
    match v {
        ProjectVolumeMount::Bind {
            source,
            target,
            read_only,
        } => engine::VolumeMount {
            source: source.clone(),
            target: target.clone(),
            read_only: *read_only,
        },
        ProjectVolumeMount::Named {
            source,
            target,
            read_only,
        } => engine::VolumeMount {
            source: source.clone(),
            target: target.clone(),
            read_only: *read_only,
        },
        ProjectVolumeMount::Tmpfs { target } => engine::VolumeMount {
            source: String::new(),
            target: target.clone(),
            read_only: false,
        },
    }
}

fn project_to_engine_restart(policy: &RestartPolicy) -> engine::RestartPolicyConfig {
    match policy {
        RestartPolicy::No => engine::RestartPolicyConfig::No,
        RestartPolicy::Always => engine::RestartPolicyConfig::Always,
        RestartPolicy::UnlessStopped => engine::RestartPolicyConfig::UnlessStopped,
        RestartPolicy::OnFailure { max_retries } => engine::RestartPolicyConfig::OnFailure {
            max_retries: *max_retries,
        },
    }
}

fn project_to_engine_resources(r: &crate::project::ResourcesConfig) -> engine::ResourceLimits {
    engine::ResourceLimits {
        memory: r.memory.as_deref().and_then(parse_memory),
        cpus: r.cpus.as_deref().and_then(|s| s.parse().ok()),
    }
}

fn project_to_engine_healthcheck(h: &crate::project::HealthcheckConfig) -> engine::HealthcheckConfig {
    engine::HealthcheckConfig {
        path: h.path.clone(),
        port: h.port,
        interval: h.interval,
        timeout: h.timeout,
        retries: h.retries,
        start_period: h.start_period,
    }
}

fn parse_memory(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(d) = s.strip_suffix("Gi").or_else(|| s.strip_suffix('g')) {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("Mi").or_else(|| s.strip_suffix('m')) {
        (d, 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("Ki").or_else(|| s.strip_suffix('k')) {
        (d, 1024)
    } else {
        (s, 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

fn parse_port(spec: &str) -> Option<engine::PortMapping> {
    let (host_part, container_part) = spec.split_once(':').unwrap_or(("", spec));
    let (container_port_str, protocol) = match container_part.split_once('/') {
        Some((p, proto)) => (p, proto),
        None => (container_part, "tcp"),
    };
    let container_port = container_port_str.parse().ok()?;
    let host_port = if host_part.is_empty() {
        None
    } else {
        host_part.parse().ok()
    };
    Some(engine::PortMapping {
        host_port,
        container_port,
        protocol: if protocol.eq_ignore_ascii_case("udp") {
            engine::Protocol::Udp
        } else {
            engine::Protocol::Tcp
        },
        host_ip: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageRef, ServiceName};
    use std::collections::HashMap as Map;

    fn template() -> Service {
        Service {
            name: ServiceName::new("web").unwrap(),
            image: ImageRef::parse("nginx:latest").unwrap(),
            scale: 1,
            container_name: None,
            image_digest: None,
            networks: vec![],
            volumes: vec![],
            links: vec![],
            external_links: vec![],
            network_mode: None,
            ipc: None,
            pid: None,
            volumes_from: vec![],
            depends_on: Map::new(),
            provider: None,
            post_start: None,
            enabled: true,
            env: Map::new(),
            labels: Map::new(),
            ports: vec!["8080:80".to_string()],
            restart: Default::default(),
            healthcheck: None,
            resources: None,
            stop: None,
            recreate: Default::default(),
        }
    }

    #[test]
    fn carries_mandated_labels() {
        let service = template();
        let hash = ConfigHash::new("deadbeef".to_string());
        let config = container_config("demo", &service, "demo-web-1", 1, &hash).unwrap();
        assert_eq!(config.labels.get("project"), Some(&"demo".to_string()));
        assert_eq!(config.labels.get("service"), Some(&"web".to_string()));
        assert_eq!(config.labels.get("container-number"), Some(&"1".to_string()));
        assert_eq!(config.labels.get("config-hash"), Some(&"deadbeef".to_string()));
    }

    #[test]
    fn parses_host_and_container_port() {
        let port = parse_port("8080:80").unwrap();
        assert_eq!(port.host_port, Some(8080));
        assert_eq!(port.container_port, 80);
    }

    #[test]
    fn parses_memory_suffix() {
        assert_eq!(parse_memory("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("2Gi"), Some(2 * 1024 * 1024 * 1024));
    }
}
