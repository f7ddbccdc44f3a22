// ABOUTME: Observed state store (C2): service name -> list of observed containers.
// ABOUTME: Single mutex, read-copy-update discipline; the only source of truth during a run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::ServiceName;

use super::observed::ObservedContainer;

/// `get`/`set` over the service → containers map, guarded by a single mutex.
/// Callers receive owned snapshots; writers replace a service's whole list
/// atomically, never mutate individual entries in place.
#[derive(Clone, Default)]
pub struct ObservedStore {
    inner: Arc<Mutex<HashMap<ServiceName, Vec<ObservedContainer>>>>,
}

impl ObservedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from an initial `ContainerSnapshot` (one-off containers
    /// already filtered out by the caller).
    pub fn seed(containers: HashMap<ServiceName, Vec<ObservedContainer>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(containers)),
        }
    }

    pub fn get(&self, service: &ServiceName) -> Vec<ObservedContainer> {
        self.inner.lock().get(service).cloned().unwrap_or_default()
    }

    pub fn set(&self, service: &ServiceName, containers: Vec<ObservedContainer>) {
        self.inner.lock().insert(service.clone(), containers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::observed::ObservedContainer;
    use crate::engine::ContainerState;
    use crate::types::ContainerId;
    use std::collections::HashMap as Map;

    fn container(id: &str) -> ObservedContainer {
        ObservedContainer {
            id: ContainerId::new(id.to_string()),
            name: id.to_string(),
            state: ContainerState::Running,
            health: None,
            exit_code: None,
            created: "t0".to_string(),
            labels: Map::new(),
            networks: vec![],
            mounts: vec![],
            number: Some(1),
            config_hash: None,
            image_digest: None,
            one_off: false,
        }
    }

    #[test]
    fn get_on_unseen_service_returns_empty() {
        let store = ObservedStore::new();
        assert!(store.get(&ServiceName::new("web").unwrap()).is_empty());
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = ObservedStore::new();
        let web = ServiceName::new("web").unwrap();
        store.set(&web, vec![container("web-1")]);
        let got = store.get(&web);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id.as_str(), "web-1");
    }

    #[test]
    fn set_replaces_whole_list() {
        let store = ObservedStore::new();
        let web = ServiceName::new("web").unwrap();
        store.set(&web, vec![container("web-1"), container("web-2")]);
        store.set(&web, vec![container("web-1")]);
        assert_eq!(store.get(&web).len(), 1);
    }
}
