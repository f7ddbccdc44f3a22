// ABOUTME: Wait-for-dependency (C7): poll-based wait on a dependency's containers for a
// ABOUTME: declared condition, with required/optional and timeout semantics.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, HealthState};
use crate::project::{Condition, DependsOn, Project, Service};
use crate::types::ServiceName;

use super::error::{ConvergeError, Result};
use super::observed::ObservedContainer;
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use super::store::ObservedStore;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `waitDependencies(project, dependant, deps, observed, timeout)`.
///
/// Independent dependency waits run concurrently; the first fatal failure
/// (a `required` dependency that can never satisfy its condition) is
/// returned to the caller. Dependencies in `started` condition are not
/// waited on here: C6's scheduling order already satisfies them.
pub async fn wait_dependencies(
    project: &Project,
    dependant: &Service,
    engine: &dyn Engine,
    store: &ObservedStore,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);

    let waits = dependant.depends_on.iter().map(|(dep_name, edge)| {
        wait_one(
            project,
            dependant,
            dep_name,
            edge,
            engine,
            store,
            cancel,
            deadline,
            progress,
        )
    });

    let results = join_all(waits).await;
    for result in results {
        result?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn wait_one(
    project: &Project,
    dependant: &Service,
    dep_name: &ServiceName,
    edge: &DependsOn,
    engine: &dyn Engine,
    store: &ObservedStore,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    progress: &dyn ProgressSink,
) -> Result<()> {
    if matches!(edge.condition, Condition::Started) {
        return Ok(());
    }

    let Some(dep) = project.service(dep_name) else {
        return Ok(());
    };
    if !dep.enabled || dep.provider.is_some() || dep.scale == 0 {
        return Ok(());
    }

    let observed: Vec<ObservedContainer> = store
        .get(dep_name)
        .into_iter()
        .filter(|c| !c.one_off)
        .collect();

    if observed.is_empty() {
        return downgrade(
            edge.required,
            ConvergeError::missing_dependency(
                dependant.name.to_string(),
                format!("dependency '{dep_name}' has no observed containers"),
            ),
            dep_name,
            progress,
        );
    }

    let id = format!("Service {dep_name}");
    progress.emit(ProgressEvent::new(&id, ProgressStatus::Waiting));

    let outcome = poll_condition(&edge.condition, &observed, engine, cancel, deadline).await;

    match outcome {
        PollOutcome::Satisfied => {
            progress.emit(ProgressEvent::new(&id, ProgressStatus::Healthy));
            Ok(())
        }
        PollOutcome::UnknownCondition => {
            progress.emit(
                ProgressEvent::new(&id, ProgressStatus::Skipped)
                    .with_message(format!("unknown condition '{}'", edge.condition)),
            );
            Ok(())
        }
        PollOutcome::Timeout => downgrade(
            edge.required,
            ConvergeError::timeout(dep_name.to_string()),
            dep_name,
            progress,
        ),
        PollOutcome::Cancelled => Err(ConvergeError::cancelled()),
        PollOutcome::Failed(message) => downgrade(
            edge.required,
            ConvergeError::engine_failed(message),
            dep_name,
            progress,
        ),
        PollOutcome::NoHealthcheck(message) => downgrade(
            edge.required,
            ConvergeError::invalid_config(message),
            dep_name,
            progress,
        ),
    }
}

fn downgrade(
    required: bool,
    error: ConvergeError,
    dep_name: &ServiceName,
    progress: &dyn ProgressSink,
) -> Result<()> {
    if required {
        let id = format!("Service {dep_name}");
        progress.emit(ProgressEvent::new(&id, ProgressStatus::Error).with_message(error.to_string()));
        Err(error)
    } else {
        let id = format!("Service {dep_name}");
        progress.emit(ProgressEvent::new(&id, ProgressStatus::Warning).with_message(error.to_string()));
        Ok(())
    }
}

enum PollOutcome {
    Satisfied,
    Timeout,
    Cancelled,
    UnknownCondition,
    Failed(String),
    NoHealthcheck(String),
}

async fn poll_condition(
    condition: &Condition,
    containers: &[ObservedContainer],
    engine: &dyn Engine,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> PollOutcome {
    if matches!(condition, Condition::Unknown(_)) {
        return PollOutcome::UnknownCondition;
    }

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return PollOutcome::Timeout;
            }
        }

        match check_once(condition, containers, engine).await {
            Checked::Satisfied => return PollOutcome::Satisfied,
            Checked::Failed(message) => return PollOutcome::Failed(message),
            Checked::NoHealthcheck(message) => return PollOutcome::NoHealthcheck(message),
            Checked::Pending => {}
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
        }
    }
}

enum Checked {
    Satisfied,
    Pending,
    Failed(String),
    NoHealthcheck(String),
}

async fn check_once(condition: &Condition, containers: &[ObservedContainer], engine: &dyn Engine) -> Checked {
    let mut details = Vec::with_capacity(containers.len());
    for c in containers {
        match engine.inspect(&c.id).await {
            Ok(d) => details.push(d),
            Err(e) => return Checked::Failed(e.to_string()),
        }
    }

    match condition {
        Condition::Started => Checked::Satisfied,
        Condition::Healthy => {
            for d in &details {
                match d.health {
                    Some(HealthState::Healthy) => continue,
                    Some(HealthState::Unhealthy) => {
                        return Checked::Failed(format!("{} reported unhealthy", d.name))
                    }
                    None | Some(HealthState::None) => {
                        return Checked::NoHealthcheck(format!(
                            "{} has no healthcheck configured",
                            d.name
                        ))
                    }
                    Some(HealthState::Starting) => return Checked::Pending,
                }
            }
            Checked::Satisfied
        }
        Condition::RunningOrHealthy => {
            for d in &details {
                match d.health {
                    Some(HealthState::Healthy) => continue,
                    Some(HealthState::Unhealthy) => {
                        return Checked::Failed(format!("{} reported unhealthy", d.name))
                    }
                    Some(HealthState::Starting) => return Checked::Pending,
                    None | Some(HealthState::None) => {
                        if d.state.is_running() {
                            continue;
                        }
                        return Checked::Pending;
                    }
                }
            }
            Checked::Satisfied
        }
        Condition::CompletedSuccessfully => {
            for d in &details {
                if let Some(code) = d.exit_code {
                    if code == 0 {
                        return Checked::Satisfied;
                    }
                    return Checked::Failed(format!("{} exited with code {code}", d.name));
                }
            }
            Checked::Pending
        }
        Condition::Unknown(_) => unreachable!("filtered out in poll_condition"),
    }
}
