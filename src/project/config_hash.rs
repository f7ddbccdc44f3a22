// ABOUTME: Deterministic digest of a service's effective, identity-affecting config.
// ABOUTME: Pure function: same Service value always hashes to the same ConfigHash.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::ConfigHash;

use super::service::Service;

/// Compute the digest compared against a container's `config-hash` label by the
/// divergence detector (C4). Only fields that affect container *identity*
/// participate — see `Service`'s `Serialize` impl for the exact field list.
pub fn config_hash(service: &Service) -> Result<ConfigHash> {
    let canonical = serde_json::to_vec(service)
        .map_err(|e| Error::InternalError(format!("failed to serialize service config: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();

    Ok(ConfigHash::new(hex_encode(&digest)))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageRef, ServiceName};
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

    #[test]
    fn identical_services_hash_identically() {
        let a = template();
        let b = template();
        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn changing_image_changes_hash() {
        let a = template();
        let mut b = template();
        b.image = ImageRef::parse("nginx:1.27").unwrap();
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn changing_scale_does_not_change_hash() {
        // scale is not part of container identity: it governs replica count,
        // not the shape of any individual container.
        let a = template();
        let mut b = template();
        b.scale = 3;
        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn changing_env_changes_hash() {
        let a = template();
        let mut b = template();
        b.env.insert(
            "FOO".to_string(),
            super::super::EnvValue::Literal("bar".to_string()),
        );
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    /// `HashMap` iteration order is randomized per-process; a service with
    /// two or more env vars (or labels) must still hash identically
    /// regardless of the order its map happens to iterate in.
    #[test]
    fn multi_entry_env_and_labels_hash_independent_of_insertion_order() {
        use super::super::EnvValue;

        let mut a = template();
        a.env.insert("FOO".to_string(), EnvValue::Literal("1".to_string()));
        a.env.insert("BAR".to_string(), EnvValue::Literal("2".to_string()));
        a.labels.insert("team".to_string(), "web".to_string());
        a.labels.insert("tier".to_string(), "frontend".to_string());

        let mut b = template();
        b.labels.insert("tier".to_string(), "frontend".to_string());
        b.labels.insert("team".to_string(), "web".to_string());
        b.env.insert("BAR".to_string(), EnvValue::Literal("2".to_string()));
        b.env.insert("FOO".to_string(), EnvValue::Literal("1".to_string()));

        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }
}
