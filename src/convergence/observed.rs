// ABOUTME: The observed-container model (§3) and the deterministic ordering used by C3/C5.
// ABOUTME: Plain data; no I/O. Built from `engine::ContainerDetail` plus label parsing.

use std::collections::HashMap;

use crate::engine::{ContainerDetail, ContainerState, HealthState, VolumeMount};
use crate::types::ContainerId;

pub const LABEL_PROJECT: &str = "project";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_NUMBER: &str = "container-number";
pub const LABEL_CONFIG_HASH: &str = "config-hash";
pub const LABEL_IMAGE_DIGEST: &str = "image-digest";
pub const LABEL_ONE_OFF: &str = "one-off";
pub const LABEL_REPLACE: &str = "replace";

/// One container as seen through the engine's `inspect` result, with the
/// labels the convergence engine cares about already parsed out.
#[derive(Debug, Clone)]
pub struct ObservedContainer {
    pub id: ContainerId,
    pub name: String,
    pub state: ContainerState,
    pub health: Option<HealthState>,
    pub exit_code: Option<i64>,
    pub created: String,
    pub labels: HashMap<String, String>,
    pub networks: Vec<crate::types::NetworkId>,
    pub mounts: Vec<VolumeMount>,
    /// `None` when the label is absent or unparseable; such containers sort last.
    pub number: Option<u32>,
    pub config_hash: Option<String>,
    pub image_digest: Option<String>,
    pub one_off: bool,
}

impl ObservedContainer {
    pub fn from_detail(detail: ContainerDetail) -> Self {
        let number = detail
            .labels
            .get(LABEL_NUMBER)
            .and_then(|s| s.parse::<u32>().ok());
        let one_off = detail
            .labels
            .get(LABEL_ONE_OFF)
            .map(|s| s == "True")
            .unwrap_or(false);
        let config_hash = detail
            .config_hash_label
            .clone()
            .or_else(|| detail.labels.get(LABEL_CONFIG_HASH).cloned());
        let image_digest = detail
            .image_digest_label
            .clone()
            .or_else(|| detail.labels.get(LABEL_IMAGE_DIGEST).cloned());

        ObservedContainer {
            id: detail.id,
            name: detail.name,
            state: detail.state,
            health: detail.health,
            exit_code: detail.exit_code,
            created: detail.created,
            labels: detail.labels,
            networks: detail.networks,
            mounts: detail.mounts,
            number,
            config_hash,
            image_digest,
            one_off,
        }
    }
}

/// Deterministic ordering per §4.3: ascending container number (missing/unparseable
/// last), ties by ascending `created`, final tie by id.
pub fn deterministic_order(containers: &mut [ObservedContainer]) {
    containers.sort_by(|a, b| {
        a.number
            .unwrap_or(u32::MAX)
            .cmp(&b.number.unwrap_or(u32::MAX))
            .then_with(|| a.created.cmp(&b.created))
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
}

/// The first container of a set in deterministic order, as used by the
/// reference resolver to pick the representative container of a dependency.
pub fn first_in_order(containers: &[ObservedContainer]) -> Option<&ObservedContainer> {
    containers.iter().min_by(|a, b| {
        a.number
            .unwrap_or(u32::MAX)
            .cmp(&b.number.unwrap_or(u32::MAX))
            .then_with(|| a.created.cmp(&b.created))
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    })
}
