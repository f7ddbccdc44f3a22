// ABOUTME: Convergence engine entry point: seeds observed state from a snapshot, serializes
// ABOUTME: per-project runs, and drives the dependency scheduler to reconcile every service.

pub mod build;
pub mod divergence;
pub mod error;
pub mod hooks;
pub mod observed;
pub mod progress;
pub mod reconcile;
pub mod recreate;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod wait;

pub use error::{ConvergeError, ConvergeErrorKind};
pub use observed::ObservedContainer;
pub use progress::{ProgressEvent, ProgressSink, ProgressStatus, RecordingSink, TracingSink};
pub use reconcile::{Provider, ReconcileContext};
pub use scheduler::{ConvergenceReport, ServiceOutcome};
pub use store::ObservedStore;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::engine::{ContainerDetail, Engine};
use crate::project::{Project, RecreatePolicy};
use crate::types::{ProjectName, ServiceName};

use error::Result;

/// Every running `converge` holds this lock for the duration of its run, so
/// two concurrent calls for the same project serialize rather than racing
/// on the observed-state store. Keyed in-process; simplified from the
/// cross-host file lock a multi-server deploy tool needs, since this crate
/// runs against a single engine endpoint.
fn project_lock(name: &ProjectName) -> Arc<AsyncMutex<()>> {
    static LOCKS: OnceLock<SyncMutex<HashMap<ProjectName, Arc<AsyncMutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| SyncMutex::new(HashMap::new()));
    let mut registry = registry.lock();
    registry
        .entry(name.clone())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

/// One convergence run over every enabled service in `project`.
///
/// `snapshot` is the engine's current container listing, grouped by the
/// service label (§3/§6) — gathering it is the caller's job (a single
/// `list_by_label` call against the engine, typically), since only the
/// caller knows how containers not carrying these labels should be
/// treated. One-off containers are filtered out of the seeded state; they
/// are never reconciliation targets (§2 Non-goals).
#[allow(clippy::too_many_arguments)]
pub async fn converge(
    project: &Project,
    engine: &dyn Engine,
    snapshot: HashMap<ServiceName, Vec<ContainerDetail>>,
    progress: &dyn ProgressSink,
    provider: Option<&dyn Provider>,
    recreate_override: Option<RecreatePolicy>,
    stop_timeout: Duration,
    dependency_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ConvergenceReport> {
    let lock = project_lock(&project.name);
    let _guard = lock.lock().await;

    let store = ObservedStore::new();
    for (name, containers) in snapshot {
        let observed: Vec<ObservedContainer> = containers
            .into_iter()
            .map(ObservedContainer::from_detail)
            .filter(|c| !c.one_off)
            .collect();
        store.set(&name, observed);
    }

    let start_lock = Arc::new(AsyncMutex::new(()));

    async {
        tracing::info!(services = project.services.len(), "starting convergence run");
        let report = scheduler::schedule(
            project,
            engine,
            &store,
            &start_lock,
            progress,
            provider,
            recreate_override,
            stop_timeout,
            dependency_timeout,
            cancel,
        )
        .await?;

        let converged = report
            .outcomes
            .values()
            .filter(|o| matches!(o, ServiceOutcome::Converged))
            .count();
        let failed = report
            .outcomes
            .values()
            .filter(|o| matches!(o, ServiceOutcome::Failed(_)))
            .count();
        tracing::info!(converged, failed, "convergence run complete");
        Ok(report)
    }
    .instrument(tracing::info_span!("converge", project = %project.name))
    .await
}
