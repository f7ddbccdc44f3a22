// ABOUTME: Dependency scheduler (C6): Kahn's-algorithm cycle check, then parallel fan-out
// ABOUTME: of per-service reconciliation in dependency order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::project::{Project, RecreatePolicy};
use crate::types::ServiceName;

use super::error::{ConvergeError, Result};
use super::progress::ProgressSink;
use super::reconcile::{reconcile, Provider, ReconcileContext};
use super::store::ObservedStore;
use super::wait::wait_dependencies;

/// Outcome of one service's attempt to converge within a `schedule` run.
#[derive(Debug, Clone)]
pub enum ServiceOutcome {
    Converged,
    Failed(String),
    /// A dependency this service requires never completed; this service was
    /// never attempted. Not itself an error (§9: a fatal ancestor failure
    /// isn't re-reported once per descendant).
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct ConvergenceReport {
    pub outcomes: HashMap<ServiceName, ServiceOutcome>,
}

/// Validate the dependency graph and run every enabled service's
/// reconcile, in dependency order, fanning out nodes whose dependencies
/// have all settled.
///
/// Cycle detection (Kahn's algorithm) runs to completion before touching
/// anything; a cycle is reported as `InvalidConfig` and nothing is mutated.
#[allow(clippy::too_many_arguments)]
pub async fn schedule(
    project: &Project,
    engine: &dyn Engine,
    store: &ObservedStore,
    start_lock: &Arc<AsyncMutex<()>>,
    progress: &dyn ProgressSink,
    provider: Option<&dyn Provider>,
    recreate_override: Option<RecreatePolicy>,
    stop_timeout: Duration,
    dependency_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ConvergenceReport> {
    let services = project.enabled_services();
    let names: HashSet<ServiceName> = services.iter().map(|s| s.name.clone()).collect();

    let mut dependents: HashMap<ServiceName, Vec<ServiceName>> =
        names.iter().cloned().map(|n| (n, Vec::new())).collect();
    let mut in_degree: HashMap<ServiceName, usize> = names.iter().cloned().map(|n| (n, 0)).collect();

    for service in &services {
        for dep_name in service.depends_on.keys() {
            if !names.contains(dep_name) {
                continue; // dependency disabled: treat as already satisfied
            }
            *in_degree.get_mut(&service.name).unwrap() += 1;
            dependents.get_mut(dep_name).unwrap().push(service.name.clone());
        }
    }

    let mut remaining = in_degree.clone();
    let mut queue: VecDeque<ServiceName> = remaining
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    let mut order = Vec::with_capacity(names.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        for dependent in &dependents[&node] {
            let degree = remaining.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent.clone());
            }
        }
    }
    if order.len() != names.len() {
        return Err(ConvergeError::invalid_config(
            "dependency graph contains a cycle",
        ));
    }

    let ctx = ReconcileContext {
        project,
        engine,
        store,
        start_lock,
        progress,
        provider,
    };

    let mut report = ConvergenceReport::default();
    let mut completed: HashSet<ServiceName> = HashSet::new();
    let mut resolved: HashSet<ServiceName> = HashSet::new();

    while resolved.len() < names.len() {
        if cancel.is_cancelled() {
            for service in &services {
                if !resolved.contains(&service.name) {
                    report
                        .outcomes
                        .insert(service.name.clone(), ServiceOutcome::Skipped);
                    resolved.insert(service.name.clone());
                }
            }
            break;
        }

        let mut runnable = Vec::new();
        let mut skippable = Vec::new();
        for service in &services {
            if resolved.contains(&service.name) {
                continue;
            }
            let deps: Vec<&ServiceName> = service
                .depends_on
                .keys()
                .filter(|d| names.contains(*d))
                .collect();
            if deps.iter().all(|d| completed.contains(*d)) {
                runnable.push(*service);
            } else if deps.iter().all(|d| resolved.contains(*d)) {
                skippable.push(*service);
            }
        }

        if runnable.is_empty() && skippable.is_empty() {
            // Cycle check already passed, so this can't happen; guard
            // against an infinite loop regardless.
            break;
        }

        for service in skippable {
            report
                .outcomes
                .insert(service.name.clone(), ServiceOutcome::Skipped);
            resolved.insert(service.name.clone());
        }

        let attempts = runnable.into_iter().map(|service| async move {
            let wait_result = wait_dependencies(
                project,
                service,
                engine,
                store,
                cancel,
                dependency_timeout,
                progress,
            )
            .await;

            let outcome = match wait_result {
                Ok(()) => match reconcile(&ctx, service, recreate_override, stop_timeout).await {
                    Ok(()) => Ok(()),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            (service.name.clone(), outcome)
        });

        for (name, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => {
                    report.outcomes.insert(name.clone(), ServiceOutcome::Converged);
                    completed.insert(name.clone());
                }
                Err(e) => {
                    report.outcomes.insert(name.clone(), ServiceOutcome::Failed(e.to_string()));
                }
            }
            resolved.insert(name);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FakeEngine;
    use crate::convergence::progress::TracingSink;
    use crate::project::Service;
    use crate::types::{ImageRef, ProjectName, ServiceName};
    use std::collections::HashMap as Map;

    fn service(name: &str) -> Service {
        Service {
            name: ServiceName::new(name).unwrap(),
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
            ports: vec![],
            restart: Default::default(),
            healthcheck: None,
            resources: None,
            stop: None,
            recreate: Default::default(),
        }
    }

    fn project_with(services: Vec<Service>) -> Project {
        Project {
            name: ProjectName::new("demo").unwrap(),
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    #[tokio::test]
    async fn converges_a_linear_chain_in_order() {
        let mut db = service("db");
        let mut web = service("web");
        web.depends_on.insert(
            db.name.clone(),
            crate::project::DependsOn {
                condition: crate::project::Condition::Started,
                required: true,
                restart: false,
            },
        );
        db.scale = 1;

        let project = project_with(vec![db, web]);
        let engine = FakeEngine::new();
        let store = ObservedStore::new();
        let lock = Arc::new(AsyncMutex::new(()));
        let sink = TracingSink;
        let cancel = CancellationToken::new();

        let report = schedule(
            &project,
            &engine,
            &store,
            &lock,
            &sink,
            None,
            None,
            Duration::from_secs(5),
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert!(matches!(
            report.outcomes[&ServiceName::new("db").unwrap()],
            ServiceOutcome::Converged
        ));
        assert!(matches!(
            report.outcomes[&ServiceName::new("web").unwrap()],
            ServiceOutcome::Converged
        ));
    }

    #[tokio::test]
    async fn detects_cycle_before_any_mutation() {
        let mut a = service("a");
        let mut b = service("b");
        a.depends_on.insert(
            b.name.clone(),
            crate::project::DependsOn {
                condition: crate::project::Condition::Started,
                required: true,
                restart: false,
            },
        );
        b.depends_on.insert(
            a.name.clone(),
            crate::project::DependsOn {
                condition: crate::project::Condition::Started,
                required: true,
                restart: false,
            },
        );

        let project = project_with(vec![a, b]);
        let engine = FakeEngine::new();
        let store = ObservedStore::new();
        let lock = Arc::new(AsyncMutex::new(()));
        let sink = TracingSink;
        let cancel = CancellationToken::new();

        let result = schedule(
            &project,
            &engine,
            &store,
            &lock,
            &sink,
            None,
            None,
            Duration::from_secs(5),
            None,
            &cancel,
        )
        .await;

        assert_eq!(
            result.unwrap_err().kind(),
            crate::convergence::error::ConvergeErrorKind::InvalidConfig
        );
        assert_eq!(engine.container_count(), 0);
    }
}
