// ABOUTME: Declarative service definition: identity, scale, dependencies, lifecycle policy.
// ABOUTME: Immutable as loaded; the reconciler works from a cloned, reference-resolved copy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;

use crate::types::{ImageRef, NetworkAlias, ServiceName};

use super::env_value::EnvValue;
use super::restart_policy::RestartPolicy;

/// A reference to another container, either already-resolved or still a service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRef {
    Service(ServiceName),
    Container(String),
}

impl NamespaceRef {
    /// Parse the `service:<name>` / `container:<id>` forms used for
    /// `network_mode`, `ipc`, and `pid`.
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(name) = value.strip_prefix("service:") {
            ServiceName::new(name).ok().map(NamespaceRef::Service)
        } else if let Some(id) = value.strip_prefix("container:") {
            Some(NamespaceRef::Container(id.to_string()))
        } else {
            None
        }
    }
}

/// A `volumes_from` entry, either `container:<id>` or `<service>[:mode]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumesFromRef {
    Container(String),
    Service { name: ServiceName, mode: Option<String> },
}

impl VolumesFromRef {
    pub fn parse(value: &str) -> Result<Self, String> {
        if let Some(id) = value.strip_prefix("container:") {
            return Ok(VolumesFromRef::Container(id.to_string()));
        }

        let (name_part, mode) = match value.split_once(':') {
            Some((n, m)) => (n, Some(m.to_string())),
            None => (value, None),
        };

        let name = ServiceName::new(name_part)
            .map_err(|e| format!("invalid volumes_from service name '{}': {}", name_part, e))?;
        Ok(VolumesFromRef::Service { name, mode })
    }
}

/// One mount declared on a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeMount {
    Bind {
        source: String,
        target: String,
        read_only: bool,
    },
    Named {
        source: String,
        target: String,
        read_only: bool,
    },
    Tmpfs {
        target: String,
    },
}

impl VolumeMount {
    pub fn target(&self) -> &str {
        match self {
            VolumeMount::Bind { target, .. } => target,
            VolumeMount::Named { target, .. } => target,
            VolumeMount::Tmpfs { target } => target,
        }
    }

    /// Source name for named-volume mounts only; used by the divergence detector.
    pub fn named_source(&self) -> Option<&str> {
        match self {
            VolumeMount::Named { source, .. } if !source.is_empty() => Some(source),
            _ => None,
        }
    }
}

/// A declared network attachment, in the priority order the service lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub name: String,
    pub priority: i64,
    pub aliases: Vec<NetworkAlias>,
    pub fixed_ip: Option<String>,
}

/// The condition a dependent waits for before its own start phase begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Started,
    RunningOrHealthy,
    Healthy,
    CompletedSuccessfully,
    /// Any value not recognized above; treated as "warn and skip" by the waiter.
    Unknown(String),
}

impl FromStr for Condition {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "service_started" => Condition::Started,
            "service_running_or_healthy" => Condition::RunningOrHealthy,
            "service_healthy" => Condition::Healthy,
            "service_completed_successfully" => Condition::CompletedSuccessfully,
            other => Condition::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Started => write!(f, "service_started"),
            Condition::RunningOrHealthy => write!(f, "service_running_or_healthy"),
            Condition::Healthy => write!(f, "service_healthy"),
            Condition::CompletedSuccessfully => write!(f, "service_completed_successfully"),
            Condition::Unknown(s) => write!(f, "{}", s),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("Condition::from_str is infallible"))
    }
}

/// One `depends_on` edge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependsOn {
    pub condition: Condition,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub restart: bool,
}

fn default_true() -> bool {
    true
}

/// Recreate policy: when a divergent container is replaced outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecreatePolicy {
    Never,
    Force,
    #[default]
    Diverged,
}

impl FromStr for RecreatePolicy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "never" => RecreatePolicy::Never,
            "force" => RecreatePolicy::Force,
            _ => RecreatePolicy::Diverged,
        })
    }
}

impl<'de> Deserialize<'de> for RecreatePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("RecreatePolicy::from_str is infallible"))
    }
}

/// HTTP healthcheck declaration; presence is what the `healthy`/`running_or_healthy`
/// wait conditions and the divergence detector consult.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthcheckConfig {
    pub path: String,
    pub port: u16,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_retries() -> u32 {
    3
}
fn default_start_period() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourcesConfig {
    pub memory: Option<String>,
    pub cpus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopConfig {
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_signal")]
    pub signal: String,
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_signal() -> String {
    "SIGTERM".to_string()
}

impl Default for StopConfig {
    fn default() -> Self {
        StopConfig {
            timeout: default_stop_timeout(),
            signal: default_signal(),
        }
    }
}

/// Lifecycle hook run once per freshly-created or recreated container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostStartHook {
    pub command: Vec<String>,
}

/// A named service within a project: the desired state the convergence engine
/// reconciles observed containers towards.
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub name: ServiceName,
    pub image: ImageRef,

    #[serde(default = "default_scale")]
    pub scale: u32,

    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(default)]
    pub image_digest: Option<String>,

    #[serde(default)]
    pub networks: Vec<NetworkAttachmentSpec>,

    #[serde(default)]
    pub volumes: Vec<VolumeMountSpec>,

    #[serde(default)]
    pub links: Vec<String>,

    #[serde(default)]
    pub external_links: Vec<String>,

    #[serde(default)]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub ipc: Option<String>,

    #[serde(default)]
    pub pid: Option<String>,

    #[serde(default)]
    pub volumes_from: Vec<String>,

    #[serde(default)]
    pub depends_on: HashMap<ServiceName, DependsOn>,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub post_start: Option<PostStartHook>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,

    #[serde(default)]
    pub resources: Option<ResourcesConfig>,

    #[serde(default)]
    pub stop: Option<StopConfig>,

    #[serde(default)]
    pub recreate: RecreatePolicy,
}

fn default_scale() -> u32 {
    1
}

/// Raw, still-stringly-typed network attachment as it appears in project YAML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkAttachmentSpec {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Raw volume mount spec, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VolumeMountSpec {
    Bind {
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
    Volume {
        #[serde(default)]
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
    Tmpfs {
        target: String,
    },
}

impl From<&VolumeMountSpec> for VolumeMount {
    fn from(spec: &VolumeMountSpec) -> Self {
        match spec {
            VolumeMountSpec::Bind {
                source,
                target,
                read_only,
            } => VolumeMount::Bind {
                source: source.clone(),
                target: target.clone(),
                read_only: *read_only,
            },
            VolumeMountSpec::Volume {
                source,
                target,
                read_only,
            } => VolumeMount::Named {
                source: source.clone(),
                target: target.clone(),
                read_only: *read_only,
            },
            VolumeMountSpec::Tmpfs { target } => VolumeMount::Tmpfs {
                target: target.clone(),
            },
        }
    }
}

impl Service {
    /// The scale>1-with-custom-name violation named by the data model invariants;
    /// checked before any engine mutation in `reconcile` step 2.
    pub fn validate(&self) -> Result<(), String> {
        if self.scale > 1 && self.container_name.is_some() {
            return Err(format!(
                "service '{}' has scale {} but also a fixed container_name; \
                 a fixed name requires scale <= 1",
                self.name, self.scale
            ));
        }
        Ok(())
    }

    pub fn resolved_volumes(&self) -> Vec<VolumeMount> {
        self.volumes.iter().map(VolumeMount::from).collect()
    }

    pub fn resolved_networks(&self) -> Result<Vec<NetworkAttachment>, String> {
        self.networks
            .iter()
            .map(|spec| {
                let aliases = spec
                    .aliases
                    .iter()
                    .map(|a| NetworkAlias::new(a).map_err(|e| e.to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NetworkAttachment {
                    name: spec.name.clone(),
                    priority: spec.priority,
                    aliases,
                    fixed_ip: spec.ip.clone(),
                })
            })
            .collect()
    }

    pub fn network_mode_ref(&self) -> Option<NamespaceRef> {
        self.network_mode.as_deref().and_then(NamespaceRef::parse)
    }

    pub fn ipc_ref(&self) -> Option<NamespaceRef> {
        self.ipc.as_deref().and_then(NamespaceRef::parse)
    }

    pub fn pid_ref(&self) -> Option<NamespaceRef> {
        self.pid.as_deref().and_then(NamespaceRef::parse)
    }

    pub fn volumes_from_refs(&self) -> Result<Vec<VolumesFromRef>, String> {
        self.volumes_from
            .iter()
            .map(|s| VolumesFromRef::parse(s))
            .collect()
    }
}

// Serialize is needed so `config_hash` can feed a canonical representation
// through `serde_json` without a bespoke writer.
impl Serialize for Service {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        // Only fields that affect container identity participate in the hash;
        // `recreate`, `enabled`, and `depends_on` are policy, not container shape.
        // `env`/`labels` go through a `BTreeMap` so key order is sorted rather
        // than whatever `HashMap`'s per-process random seed happens to yield -
        // otherwise the same Service value hashes differently run to run.
        let env: std::collections::BTreeMap<&String, &EnvValue> = self.env.iter().collect();
        let labels: std::collections::BTreeMap<&String, &String> = self.labels.iter().collect();

        let mut state = serializer.serialize_struct("Service", 10)?;
        state.serialize_field("image", &self.image.to_string())?;
        state.serialize_field("image_digest", &self.image_digest)?;
        state.serialize_field("env", &env)?;
        state.serialize_field("labels", &labels)?;
        state.serialize_field("ports", &self.ports)?;
        state.serialize_field("volumes", &self.volumes)?;
        state.serialize_field("restart", &self.restart.to_string())?;
        state.serialize_field("resources", &self.resources)?;
        state.serialize_field("networks", &self.networks)?;
        state.serialize_field(
            "healthcheck",
            &self.healthcheck.as_ref().map(|h| (h.path.clone(), h.port)),
        )?;
        state.end()
    }
}

impl Serialize for VolumeMountSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("VolumeMountSpec", 4)?;
        match self {
            VolumeMountSpec::Bind {
                source,
                target,
                read_only,
            } => {
                state.serialize_field("type", "bind")?;
                state.serialize_field("source", source)?;
                state.serialize_field("target", target)?;
                state.serialize_field("read_only", read_only)?;
            }
            VolumeMountSpec::Volume {
                source,
                target,
                read_only,
            } => {
                state.serialize_field("type", "volume")?;
                state.serialize_field("source", source)?;
                state.serialize_field("target", target)?;
                state.serialize_field("read_only", read_only)?;
            }
            VolumeMountSpec::Tmpfs { target } => {
                state.serialize_field("type", "tmpfs")?;
                state.serialize_field("source", "")?;
                state.serialize_field("target", target)?;
                state.serialize_field("read_only", &false)?;
            }
        }
        state.end()
    }
}

impl Serialize for NetworkAttachmentSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("NetworkAttachmentSpec", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("priority", &self.priority)?;
        state.serialize_field("aliases", &self.aliases)?;
        state.serialize_field("ip", &self.ip)?;
        state.end()
    }
}
