// ABOUTME: Compile-fail test verifying remove_old() cannot be called before
// ABOUTME: stop_old() has run. Validates typestate ordering.

use std::collections::HashMap;
use std::time::Duration;

use converge::convergence::recreate::Recreate;
use converge::engine::{ContainerConfig, Engine, FakeEngine};
use converge::types::{ContainerId, ImageRef};

fn config(name: &str) -> ContainerConfig {
    ContainerConfig {
        name: name.to_string(),
        image: ImageRef::parse("nginx:latest").unwrap(),
        env: HashMap::new(),
        labels: HashMap::new(),
        ports: vec![],
        volumes: vec![],
        command: None,
        entrypoint: None,
        working_dir: None,
        user: None,
        restart_policy: Default::default(),
        resources: None,
        healthcheck: None,
        stop_timeout: None,
        stop_signal: None,
        network_mode: None,
        ipc_mode: None,
        pid_mode: None,
        volumes_from: vec![],
        network: None,
        network_aliases: vec![],
    }
}

async fn try_invalid_remove(engine: &FakeEngine, victim: &ContainerId) {
    let created = Recreate::create(engine, victim, "demo-web-1", config("tmp"), Duration::from_secs(5))
        .await
        .unwrap();

    // ERROR: remove_old() doesn't exist on Recreate<Created> - the victim is
    // still running, it hasn't been stopped yet.
    created.remove_old(engine).await.unwrap();
}

fn main() {}
