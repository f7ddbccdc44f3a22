// ABOUTME: Reference resolver (C3): rewrites intra-project references into concrete container
// ABOUTME: IDs using the observed-state store, ahead of a service's reconcile.

use crate::project::{NamespaceRef, Service, VolumesFromRef};

use super::error::{ConvergeError, Result};
use super::observed::{deterministic_order, first_in_order};
use super::store::ObservedStore;

/// A service with every `service:X` / bare-service reference it declares
/// already rewritten to `container:<id>` form.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub service: Service,
}

/// Resolve `volumesFrom`, `networkMode`, `ipc`, and `pid` against the current
/// observed state. Returns `MissingDependency` when a referenced service has
/// no observed containers.
pub fn resolve(service: &Service, store: &ObservedStore) -> Result<ResolvedService> {
    let mut resolved = service.clone();

    resolved.network_mode =
        resolve_namespace(&service.network_mode, service.network_mode_ref(), service, store)?;
    resolved.ipc = resolve_namespace(&service.ipc, service.ipc_ref(), service, store)?;
    resolved.pid = resolve_namespace(&service.pid, service.pid_ref(), service, store)?;

    let volumes_from_refs = service
        .volumes_from_refs()
        .map_err(ConvergeError::invalid_config)?;
    resolved.volumes_from = volumes_from_refs
        .into_iter()
        .map(|r| resolve_volumes_from(r, store))
        .collect::<Result<Vec<_>>>()?;

    Ok(ResolvedService { service: resolved })
}

fn resolve_namespace(
    raw: &Option<String>,
    reference: Option<NamespaceRef>,
    service: &Service,
    store: &ObservedStore,
) -> Result<Option<String>> {
    match reference {
        // Not a `service:`/`container:` form (absent, or e.g. "bridge"/"host"); unchanged.
        None => Ok(raw.clone()),
        Some(NamespaceRef::Container(id)) => Ok(Some(format!("container:{id}"))),
        Some(NamespaceRef::Service(name)) => {
            let mut observed = store.get(&name);
            deterministic_order(&mut observed);
            let first = first_in_order(&observed).ok_or_else(|| {
                ConvergeError::missing_dependency(
                    service.name.to_string(),
                    format!("no observed containers for referenced service '{name}'"),
                )
            })?;
            Ok(Some(format!("container:{}", first.id.as_str())))
        }
    }
}

fn resolve_volumes_from(reference: VolumesFromRef, store: &ObservedStore) -> Result<String> {
    match reference {
        VolumesFromRef::Container(id) => Ok(id),
        VolumesFromRef::Service { name, mode } => {
            let mut observed = store.get(&name);
            deterministic_order(&mut observed);
            let first = first_in_order(&observed).ok_or_else(|| {
                ConvergeError::missing_dependency(
                    name.to_string(),
                    format!("no observed containers for volumes_from target '{name}'"),
                )
            })?;
            Ok(match mode {
                Some(mode) => format!("{}:{mode}", first.id.as_str()),
                None => first.id.as_str().to_string(),
            })
        }
    }
}
