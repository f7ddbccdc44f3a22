// ABOUTME: Recreate protocol (C8): create-with-temp-name -> stop-old -> remove-old -> rename.
// ABOUTME: Typestate progression so the five steps cannot be invoked out of order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::engine::{ContainerConfig, Engine};
use crate::types::ContainerId;

use super::error::{ConvergeError, EngineErrorExt, Result};
use super::observed::LABEL_REPLACE;
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};

/// Created: the replacement container exists under its transient name, the
/// victim is still running.
#[derive(Debug, Clone)]
pub struct Created {
    pub new_id: ContainerId,
}

/// OldStopped: the victim has been stopped but not yet removed.
#[derive(Debug, Clone)]
pub struct OldStopped {
    pub new_id: ContainerId,
}

/// OldRemoved: the victim is gone; the replacement still carries its
/// transient name.
#[derive(Debug, Clone)]
pub struct OldRemoved {
    pub new_id: ContainerId,
}

/// Renamed: the replacement now carries the canonical name. Terminal state.
#[derive(Debug, Clone)]
pub struct Renamed {
    pub new_id: ContainerId,
}

/// A recreate in progress, parameterized by its current step. Each
/// transition consumes `self`, so a victim cannot be renamed-over before
/// it's removed, or removed before it's stopped, at the type level.
pub struct Recreate<S> {
    victim: ContainerId,
    canonical_name: String,
    timeout: Duration,
    state: S,
}

impl Recreate<Created> {
    /// Step 1-2: compute the transient name, create the replacement. On any
    /// failure here nothing has happened to the victim yet.
    pub async fn create(
        engine: &dyn Engine,
        victim: &ContainerId,
        canonical_name: &str,
        mut config: ContainerConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let tmp = transient_name(victim, canonical_name);
        config.name = tmp.clone();
        config
            .labels
            .insert(LABEL_REPLACE.to_string(), canonical_name.to_string());

        let new_id = engine.create(&config).await.context_engine()?;

        Ok(Recreate {
            victim: victim.clone(),
            canonical_name: canonical_name.to_string(),
            timeout,
            state: Created {
                new_id: new_id.clone(),
            },
        })
    }

    /// Step 3: stop the victim.
    pub async fn stop_old(self, engine: &dyn Engine) -> Result<Recreate<OldStopped>> {
        engine
            .stop(&self.victim, self.timeout)
            .await
            .context_engine()?;
        Ok(Recreate {
            victim: self.victim,
            canonical_name: self.canonical_name,
            timeout: self.timeout,
            state: OldStopped {
                new_id: self.state.new_id,
            },
        })
    }
}

impl Recreate<OldStopped> {
    /// Step 4: remove the victim.
    pub async fn remove_old(self, engine: &dyn Engine) -> Result<Recreate<OldRemoved>> {
        engine.remove(&self.victim).await.context_engine()?;
        Ok(Recreate {
            victim: self.victim,
            canonical_name: self.canonical_name,
            timeout: self.timeout,
            state: OldRemoved {
                new_id: self.state.new_id,
            },
        })
    }
}

impl Recreate<OldRemoved> {
    /// Step 5: rename the replacement from its transient name to the
    /// canonical name.
    pub async fn rename(self, engine: &dyn Engine) -> Result<Recreate<Renamed>> {
        engine
            .rename(&self.state.new_id, &self.canonical_name)
            .await
            .context_engine()?;
        Ok(Recreate {
            victim: self.victim,
            canonical_name: self.canonical_name,
            timeout: self.timeout,
            state: Renamed {
                new_id: self.state.new_id,
            },
        })
    }
}

impl Recreate<Renamed> {
    pub fn new_container_id(&self) -> &ContainerId {
        &self.state.new_id
    }
}

fn transient_name(victim: &ContainerId, canonical_name: &str) -> String {
    let id = victim.as_str();
    let prefix: String = id.chars().take(12).collect();
    format!("{prefix}_{canonical_name}")
}

/// Drive a full recreate to completion, emitting progress events along the
/// way. On a failure after `create`, the replacement is left under its
/// transient name; per §4.8 step 6 there is no automatic rollback, and the
/// next convergence run's divergence check adopts or sweeps it up.
pub async fn recreate(
    engine: &dyn Engine,
    start_lock: &Arc<AsyncMutex<()>>,
    victim: &ContainerId,
    canonical_name: &str,
    config: ContainerConfig,
    timeout: Duration,
    progress: &dyn ProgressSink,
) -> Result<ContainerId> {
    let id_for_events = format!("Container {canonical_name}");
    progress.emit(ProgressEvent::new(&id_for_events, ProgressStatus::Creating));

    let created = match Recreate::<Created>::create(engine, victim, canonical_name, config, timeout).await
    {
        Ok(c) => c,
        Err(e) => {
            progress.emit(
                ProgressEvent::new(&id_for_events, ProgressStatus::Error)
                    .with_message(e.to_string()),
            );
            return Err(e);
        }
    };
    progress.emit(ProgressEvent::new(&id_for_events, ProgressStatus::Created));

    let stopped = created.stop_old(engine).await.inspect_err(|e| {
        progress.emit(
            ProgressEvent::new(&id_for_events, ProgressStatus::Error).with_message(e.to_string()),
        );
    })?;

    let removed = stopped.remove_old(engine).await.inspect_err(|e| {
        progress.emit(
            ProgressEvent::new(&id_for_events, ProgressStatus::Error).with_message(e.to_string()),
        );
    })?;

    let new_id = {
        let _guard = start_lock.lock().await;
        let renamed = removed.rename(engine).await.inspect_err(|e| {
            progress.emit(
                ProgressEvent::new(&id_for_events, ProgressStatus::Error)
                    .with_message(e.to_string()),
            );
        })?;
        let new_id = renamed.new_container_id().clone();
        engine.start(&new_id).await.context_engine().inspect_err(|e| {
            progress.emit(
                ProgressEvent::new(&id_for_events, ProgressStatus::Error)
                    .with_message(e.to_string()),
            );
        })?;
        new_id
    };

    progress.emit(ProgressEvent::new(&id_for_events, ProgressStatus::Started));
    Ok(new_id)
}
