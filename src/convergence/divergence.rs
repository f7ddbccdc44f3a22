// ABOUTME: Divergence detector (C4): pure predicate deciding whether an observed container
// ABOUTME: must be recreated to match its service's declared config.

use std::collections::HashSet;

use crate::project::{config_hash, RecreatePolicy, Service};
use crate::types::NetworkId;

use super::error::Result;
use super::observed::ObservedContainer;

/// Networks currently resolvable to an id, keyed by declared network name.
/// A network whose id maps to the sentinel means "not yet visible"; treated
/// as not-attached-yet rather than divergent (see §4.4).
pub const NETWORK_NOT_YET_VISIBLE: &str = "";

pub struct DivergenceContext<'a> {
    pub network_ids: &'a std::collections::HashMap<String, String>,
}

/// `mustRecreate(desiredService, observed, policy)`.
pub fn must_recreate(
    service: &Service,
    observed: &ObservedContainer,
    ctx: &DivergenceContext<'_>,
) -> Result<bool> {
    match service.recreate {
        RecreatePolicy::Never => return Ok(false),
        RecreatePolicy::Force => return Ok(true),
        RecreatePolicy::Diverged => {}
    }

    let expected_hash = config_hash(service)?;
    if observed.config_hash.as_deref() != Some(expected_hash.as_str()) {
        return Ok(true);
    }

    if observed.image_digest.as_deref() != service.image_digest.as_deref() {
        return Ok(true);
    }

    if observed.state.is_running() {
        let attached: HashSet<&str> = observed
            .networks
            .iter()
            .map(NetworkId::as_str)
            .collect();
        for network in &service.networks {
            let Some(id) = ctx.network_ids.get(&network.name) else {
                continue;
            };
            if id.as_str() == NETWORK_NOT_YET_VISIBLE {
                continue;
            }
            if !attached.contains(id.as_str()) {
                return Ok(true);
            }
        }
    }

    for volume in service.resolved_volumes() {
        let Some(source) = volume.named_source() else {
            continue;
        };
        if source.is_empty() {
            continue;
        }
        let target = volume.target();
        let matches = observed
            .mounts
            .iter()
            .any(|m| m.target == target && m.source == source);
        if !matches {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerState;
    use crate::types::{ContainerId, ImageRef, ServiceName};
    use std::collections::HashMap;

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
            depends_on: HashMap::new(),
            provider: None,
            post_start: None,
            enabled: true,
            env: HashMap::new(),
            labels: HashMap::new(),
            ports: vec![],
            restart: Default::default(),
            healthcheck: None,
            resources: None,
            stop: None,
            recreate: Default::default(),
        }
    }

    fn observed_matching(service: &Service) -> ObservedContainer {
        ObservedContainer {
            id: ContainerId::new("web-1".to_string()),
            name: "web-1".to_string(),
            state: ContainerState::Running,
            health: None,
            exit_code: None,
            created: "t0".to_string(),
            labels: HashMap::new(),
            networks: vec![],
            mounts: vec![],
            number: Some(1),
            config_hash: Some(config_hash(service).unwrap().as_str().to_string()),
            image_digest: service.image_digest.clone(),
            one_off: false,
        }
    }

    fn empty_ctx() -> DivergenceContext<'static> {
        static NETS: std::sync::OnceLock<HashMap<String, String>> = std::sync::OnceLock::new();
        DivergenceContext {
            network_ids: NETS.get_or_init(HashMap::new),
        }
    }

    #[test]
    fn never_policy_never_recreates() {
        let mut service = template();
        service.recreate = RecreatePolicy::Never;
        let mut observed = observed_matching(&service);
        observed.config_hash = Some("stale".to_string());
        assert!(!must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn force_policy_always_recreates() {
        let service = template();
        let observed = observed_matching(&service);
        let mut service_force = service.clone();
        service_force.recreate = RecreatePolicy::Force;
        assert!(must_recreate(&service_force, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn matching_hash_and_digest_does_not_recreate() {
        let service = template();
        let observed = observed_matching(&service);
        assert!(!must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn stale_config_hash_recreates() {
        let service = template();
        let mut observed = observed_matching(&service);
        observed.config_hash = Some("stale-hash".to_string());
        assert!(must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn mismatched_image_digest_recreates() {
        let mut service = template();
        service.image_digest = Some("sha256:aaa".to_string());
        let mut observed = observed_matching(&service);
        observed.image_digest = Some("sha256:bbb".to_string());
        assert!(must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    fn with_named_volume(source: &str, target: &str) -> Service {
        let mut service = template();
        service.volumes = vec![crate::project::VolumeMountSpec::Volume {
            source: source.to_string(),
            target: target.to_string(),
            read_only: false,
        }];
        service
    }

    #[test]
    fn missing_named_volume_mount_recreates() {
        let service = with_named_volume("data", "/var/lib/data");
        let mut observed = observed_matching(&service);
        observed.mounts = vec![];
        assert!(must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn changed_named_volume_source_recreates() {
        let service = with_named_volume("data", "/var/lib/data");
        let mut observed = observed_matching(&service);
        observed.mounts = vec![crate::engine::VolumeMount {
            source: "old-data".to_string(),
            target: "/var/lib/data".to_string(),
            read_only: false,
        }];
        assert!(must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }

    #[test]
    fn matching_named_volume_mount_does_not_recreate() {
        let service = with_named_volume("data", "/var/lib/data");
        let mut observed = observed_matching(&service);
        observed.mounts = vec![crate::engine::VolumeMount {
            source: "data".to_string(),
            target: "/var/lib/data".to_string(),
            read_only: false,
        }];
        assert!(!must_recreate(&service, &observed, &empty_ctx()).unwrap());
    }
}
