// ABOUTME: Per-service reconciler (C5): sorts observed containers, scales down excess,
// ABOUTME: recreates divergent containers, starts stopped ones, scales up missing replicas.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::engine::{ContainerState, Engine, NetworkConfig};
use crate::project::{Project, RecreatePolicy, Service};
use crate::types::ConfigHash;

use super::build::container_config;
use super::divergence::{must_recreate, DivergenceContext, NETWORK_NOT_YET_VISIBLE};
use super::error::{ConvergeError, EngineErrorExt, Result};
use super::observed::{deterministic_order, ObservedContainer};
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use super::recreate::recreate;
use super::resolver::resolve;
use super::store::ObservedStore;

/// Opaque hook for `provider`-delegated services (§4.1/§9): the core invokes
/// it and treats its outcome as the full reconcile result. Project loading,
/// image building, and provider plugins are external collaborators (§1) —
/// this crate doesn't implement any provider itself.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn up(&self, service: &Service) -> Result<()>;
}

pub struct ReconcileContext<'a> {
    pub project: &'a Project,
    pub engine: &'a dyn Engine,
    pub store: &'a ObservedStore,
    pub start_lock: &'a Arc<AsyncMutex<()>>,
    pub progress: &'a dyn ProgressSink,
    pub provider: Option<&'a dyn Provider>,
}

/// `reconcile(project, service, recreatePolicy, timeout)` per §4.5.
///
/// `recreate_override` corresponds to a global force-recreate flag; when
/// set, it takes precedence over the service's own `recreate` policy.
pub async fn reconcile(
    ctx: &ReconcileContext<'_>,
    service: &Service,
    recreate_override: Option<RecreatePolicy>,
    stop_timeout: Duration,
) -> Result<()> {
    if let Some(provider_name) = &service.provider {
        let id = format!("Service {}", service.name);
        return match ctx.provider {
            Some(provider) => provider.up(service).await,
            None => {
                ctx.progress.emit(
                    ProgressEvent::new(&id, ProgressStatus::Skipped)
                        .with_message(format!("provider '{provider_name}' not wired in")),
                );
                Ok(())
            }
        };
    }

    service.validate().map_err(ConvergeError::invalid_config)?;

    let expected = service.scale as usize;

    let resolved = resolve(service, ctx.store)?;
    let mut service = resolved.service;
    if let Some(policy) = recreate_override {
        service.recreate = policy;
    }
    let service = &service;

    let mut observed = ctx.store.get(&service.name);
    deterministic_order(&mut observed);

    let network_ids = resolve_network_ids(ctx.engine, service).await;
    let div_ctx = DivergenceContext {
        network_ids: &network_ids,
    };

    let mut decorated: Vec<(ObservedContainer, bool)> = Vec::with_capacity(observed.len());
    for container in observed {
        let divergent = must_recreate(service, &container, &div_ctx)?;
        decorated.push((container, divergent));
    }

    // §4.5 step 5: divergent-first, then ascending number, then ascending
    // creation time; then reverse. See the regression test pinning the
    // expected == len(observed) boundary.
    decorated.sort_by(|(a, da), (b, db)| {
        db.cmp(da)
            .then_with(|| a.number.unwrap_or(u32::MAX).cmp(&b.number.unwrap_or(u32::MAX)))
            .then_with(|| a.created.cmp(&b.created))
    });
    decorated.reverse();

    let next_number = decorated
        .iter()
        .filter_map(|(c, _)| c.number)
        .max()
        .map(|n| n + 1)
        .unwrap_or(1);

    let mut tasks: Vec<Task> = Vec::with_capacity(decorated.len().max(expected));
    let mut filled: HashSet<usize> = HashSet::new();
    for (i, (container, divergent)) in decorated.into_iter().enumerate() {
        if i >= expected {
            tasks.push(Task::ScaleDown { container });
        } else if divergent {
            tasks.push(Task::Recreate { index: i, container });
            filled.insert(i);
        } else {
            tasks.push(Task::EnsureRunning { index: i, container });
            filled.insert(i);
        }
    }

    let scale_up_slots: Vec<usize> = (0..expected).filter(|i| !filled.contains(i)).collect();
    for (k, index) in scale_up_slots.into_iter().enumerate() {
        tasks.push(Task::ScaleUp {
            index,
            number: next_number + k as u32,
        });
    }

    let needs_dependents_stopped = tasks.iter().any(|t| matches!(t, Task::Recreate { .. }));
    if needs_dependents_stopped {
        stop_dependents(ctx, service).await;
    }

    let hash = crate::project::config_hash(service)
        .map_err(|e| ConvergeError::invalid_config(e.to_string()))?;

    let mut updated: Vec<Option<ObservedContainer>> = (0..expected).map(|_| None).collect();
    let mut first_error = None;

    for task in tasks {
        match run_task(task, ctx, service, &hash, stop_timeout).await {
            Ok(Some((index, container))) => {
                if index < updated.len() {
                    updated[index] = Some(container);
                }
            }
            Ok(None) => {}
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    // Step 9: write whatever succeeded even when a later task failed.
    let final_containers: Vec<ObservedContainer> = updated.into_iter().flatten().collect();
    ctx.store.set(&service.name, final_containers);

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(())
}

enum Task {
    ScaleDown {
        container: ObservedContainer,
    },
    Recreate {
        index: usize,
        container: ObservedContainer,
    },
    EnsureRunning {
        index: usize,
        container: ObservedContainer,
    },
    ScaleUp {
        index: usize,
        number: u32,
    },
}

async fn run_task(
    task: Task,
    ctx: &ReconcileContext<'_>,
    service: &Service,
    hash: &ConfigHash,
    stop_timeout: Duration,
) -> Result<Option<(usize, ObservedContainer)>> {
    match task {
        Task::ScaleDown { container } => {
            scale_down(ctx, &container, stop_timeout).await?;
            Ok(None)
        }
        Task::Recreate { index, container } => {
            let name = container_name(ctx.project.name.as_str(), service, container.number.unwrap_or(0));
            let config = container_config(
                ctx.project.name.as_str(),
                service,
                &name,
                container.number.unwrap_or(0),
                hash,
            )?;
            let new_id = recreate(
                ctx.engine,
                ctx.start_lock,
                &container.id,
                &name,
                config,
                stop_timeout,
                ctx.progress,
            )
            .await?;
            let detail = ctx.engine.inspect(&new_id).await.context_engine()?;
            let fresh = ObservedContainer::from_detail(detail);
            maybe_run_post_start(ctx, service, &name).await;
            Ok(Some((index, fresh)))
        }
        Task::EnsureRunning { index, container } => {
            let id = format!("Container {}", container.name);
            if container.state.is_running() {
                return Ok(Some((index, container)));
            }
            ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Starting));
            ctx.engine.start(&container.id).await.context_engine()?;
            let detail = ctx.engine.inspect(&container.id).await.context_engine()?;
            ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Started));
            Ok(Some((index, ObservedContainer::from_detail(detail))))
        }
        Task::ScaleUp { index, number } => {
            let name = container_name(ctx.project.name.as_str(), service, number);
            let config = container_config(ctx.project.name.as_str(), service, &name, number, hash)?;
            let id = format!("Container {name}");
            ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Creating));
            let new_id = ctx.engine.create(&config).await.context_engine()?;
            ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Created));
            {
                let _guard = ctx.start_lock.lock().await;
                ctx.engine.start(&new_id).await.context_engine()?;
            }
            ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Started));
            maybe_run_post_start(ctx, service, &name).await;
            let detail = ctx.engine.inspect(&new_id).await.context_engine()?;
            Ok(Some((index, ObservedContainer::from_detail(detail))))
        }
    }
}

async fn scale_down(
    ctx: &ReconcileContext<'_>,
    container: &ObservedContainer,
    stop_timeout: Duration,
) -> Result<()> {
    let id = format!("Container {}", container.name);
    ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Working));
    if container.state.is_running() {
        ctx.engine.stop(&container.id, stop_timeout).await.context_engine()?;
    }
    ctx.engine.remove(&container.id).await.context_engine()?;
    ctx.progress.emit(ProgressEvent::new(&id, ProgressStatus::Done));
    Ok(())
}

/// For every service depending on `service` with `restart: true`, stop it
/// and mark its observed containers exited, so the next reconcile of that
/// dependent restarts them once this recreate settles.
async fn stop_dependents(ctx: &ReconcileContext<'_>, service: &Service) {
    for dependent in ctx.project.services.values() {
        let Some(edge) = dependent.depends_on.get(&service.name) else {
            continue;
        };
        if !edge.restart {
            continue;
        }

        let containers = ctx.store.get(&dependent.name);
        let mut updated = Vec::with_capacity(containers.len());
        for mut container in containers {
            if container.state.is_running() {
                let _ = ctx.engine.stop(&container.id, Duration::from_secs(10)).await;
            }
            container.state = ContainerState::Exited;
            updated.push(container);
        }
        ctx.store.set(&dependent.name, updated);
    }
}

async fn maybe_run_post_start(ctx: &ReconcileContext<'_>, service: &Service, container_name: &str) {
    if let Some(hook) = &service.post_start {
        super::hooks::run_post_start(hook, container_name, ctx.progress).await;
    }
}

fn container_name(project_name: &str, service: &Service, number: u32) -> String {
    if service.scale <= 1 {
        if let Some(custom) = &service.container_name {
            return custom.clone();
        }
    }
    format!("{project_name}-{}-{number}", service.name)
}

/// Named-volume existence isn't exposed by the engine port (§1 scope: volume
/// *creation* is project data, not a core decision); network ids are, since
/// `Engine::ensure_network` is the port's one network-identity lookup.
async fn resolve_network_ids(engine: &dyn Engine, service: &Service) -> HashMap<String, String> {
    let mut network_ids = HashMap::new();
    for network in &service.networks {
        match engine
            .ensure_network(
                &NetworkConfig {
                    name: network.name.clone(),
                    labels: HashMap::new(),
                },
                false,
            )
            .await
        {
            Ok(id) => {
                network_ids.insert(network.name.clone(), id.as_str().to_string());
            }
            Err(_) => {
                network_ids.insert(network.name.clone(), NETWORK_NOT_YET_VISIBLE.to_string());
            }
        }
    }
    network_ids
}
