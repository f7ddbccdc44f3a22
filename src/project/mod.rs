// ABOUTME: Declarative project model: named services, scale, dependencies, lifecycle policy.
// ABOUTME: Loading and deep schema validation are external collaborators; this module only
// ABOUTME: carries the data and the invariants the convergence engine itself depends on.

mod config_hash;
mod env_value;
mod restart_policy;
mod service;

pub use config_hash::config_hash;
pub use env_value::{resolve_env_map, EnvValue};
pub use restart_policy::RestartPolicy;
pub use service::{
    Condition, DependsOn, HealthcheckConfig, NamespaceRef, NetworkAttachment,
    NetworkAttachmentSpec, PostStartHook, RecreatePolicy, ResourcesConfig, Service, StopConfig,
    VolumeMount, VolumeMountSpec, VolumesFromRef,
};

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{ProjectName, ServiceName};

/// A loaded, declarative project: the input to `crate::convergence::converge`.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub name: ProjectName,
    pub services: HashMap<ServiceName, Service>,
}

impl Project {
    /// Parse a project from YAML. Loading from disk, includes/overlays, and
    /// full schema validation are external collaborators (see spec §1); this
    /// only does what `serde_yaml` gives us plus the invariants below.
    pub fn from_yaml(input: &str) -> Result<Self> {
        let project: Project = serde_yaml::from_str(input)?;
        project.validate()?;
        Ok(project)
    }

    pub fn service(&self, name: &ServiceName) -> Option<&Service> {
        self.services.get(name)
    }

    /// Names of services this service declares a `depends_on` edge to.
    pub fn dependency_names(&self, service: &ServiceName) -> Vec<&ServiceName> {
        self.services
            .get(service)
            .map(|s| s.depends_on.keys().collect())
            .unwrap_or_default()
    }

    /// Every enabled service, in an arbitrary but stable (name-sorted) order.
    pub fn enabled_services(&self) -> Vec<&Service> {
        let mut services: Vec<&Service> = self.services.values().filter(|s| s.enabled).collect();
        services.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        services
    }

    fn validate(&self) -> Result<()> {
        for service in self.services.values() {
            service
                .validate()
                .map_err(|e| Error::InvalidConfig(e.to_string()))?;

            for dep_name in service.depends_on.keys() {
                if !self.services.contains_key(dep_name) {
                    return Err(Error::InvalidConfig(format!(
                        "service '{}' depends on unknown service '{}'",
                        service.name, dep_name
                    )));
                }
            }
        }
        Ok(())
    }
}
