// ABOUTME: End-to-end convergence scenarios driven through `converge()` against `FakeEngine`.
// ABOUTME: Exercises scale-up/down, forced recreate, wait conditions, and the cyclic-deps guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use converge::convergence::{converge, ConvergenceReport, RecordingSink, ServiceOutcome};
use converge::engine::{Engine, FakeEngine, HealthState};
use converge::project::{Condition, DependsOn, Project, RecreatePolicy, Service};
use converge::types::{ImageRef, ProjectName, ServiceName};
use tokio_util::sync::CancellationToken;

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
        depends_on: HashMap::new(),
        provider: None,
        post_start: None,
        enabled: true,
        env: HashMap::new(),
        labels: HashMap::new(),
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

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn run(
    project: &Project,
    engine: &FakeEngine,
    snapshot: HashMap<ServiceName, Vec<converge::engine::ContainerDetail>>,
) -> ConvergenceReport {
    init_tracing();
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    converge(
        project,
        engine,
        snapshot,
        &sink,
        None,
        None,
        Duration::from_secs(5),
        Some(Duration::from_secs(2)),
        &cancel,
    )
    .await
    .unwrap()
}

fn outcome<'a>(report: &'a ConvergenceReport, name: &str) -> &'a ServiceOutcome {
    &report.outcomes[&ServiceName::new(name).unwrap()]
}

/// Scenario: pure scale-up. An empty snapshot against a scale-3 service
/// creates exactly three containers, all running.
#[tokio::test]
async fn pure_scale_up_creates_every_replica() {
    let mut web = service("web");
    web.scale = 3;
    let project = project_with(vec![web]);
    let engine = FakeEngine::new();

    let report = run(&project, &engine, HashMap::new()).await;

    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
    assert_eq!(engine.container_count(), 3);
}

/// Scenario: scale-down. Three non-divergent observed containers against a
/// scale-1 service leaves exactly one running (§4.5 step 5: divergent-first
/// then ascending number/age, reversed — the surviving slot is filled from
/// the end of that order, not simply "lowest number wins").
#[tokio::test]
async fn scale_down_removes_excess_replicas() {
    let web = service("web");
    let project = project_with(vec![web.clone()]);
    let engine = FakeEngine::new();
    let matching_hash = converge::project::config_hash(&web).unwrap();

    let mut snapshot = HashMap::new();
    let mut containers = Vec::new();
    for n in 1..=3u32 {
        let name = format!("demo-web-{n}");
        let config = make_config(&name, &project.name, &web, n, matching_hash.as_str());
        let id = engine.create(&config).await.unwrap();
        engine.start(&id).await.unwrap();
        containers.push(engine.inspect(&id).await.unwrap());
    }
    snapshot.insert(web.name.clone(), containers);

    let report = run(&project, &engine, snapshot).await;

    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
    assert_eq!(engine.container_count(), 1);
    let survivor = all_containers(&engine).await;
    assert_eq!(survivor.len(), 1);
    assert_eq!(survivor[0].name, "demo-web-3");
}

/// Scenario: forced recreate restarts a dependent with `restart: true`.
#[tokio::test]
async fn forced_recreate_restarts_dependent_with_restart_edge() {
    let mut db = service("db");
    db.recreate = RecreatePolicy::Force;
    let mut web = service("web");
    web.depends_on.insert(
        db.name.clone(),
        DependsOn {
            condition: Condition::Started,
            required: true,
            restart: true,
        },
    );

    let project = project_with(vec![db.clone(), web.clone()]);
    let engine = FakeEngine::new();
    let web_hash = converge::project::config_hash(&web).unwrap();

    let mut snapshot = HashMap::new();
    let db_config = make_config("demo-db-1", &project.name, &db, 1, "whatever-db-runs-now");
    let db_id = engine.create(&db_config).await.unwrap();
    engine.start(&db_id).await.unwrap();
    snapshot.insert(db.name.clone(), vec![engine.inspect(&db_id).await.unwrap()]);

    let web_config = make_config("demo-web-1", &project.name, &web, 1, web_hash.as_str());
    let web_id = engine.create(&web_config).await.unwrap();
    engine.start(&web_id).await.unwrap();
    snapshot.insert(web.name.clone(), vec![engine.inspect(&web_id).await.unwrap()]);

    let report = run(&project, &engine, snapshot).await;

    assert!(matches!(outcome(&report, "db"), ServiceOutcome::Converged));
    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
    // db is always recreated (Force); web is not divergent, so it survives
    // under the same id but is stopped and restarted once by the
    // `restart: true` edge rather than recreated outright.
    assert_eq!(engine.container_count(), 2);
    let web_detail = engine.inspect(&web_id).await.unwrap();
    assert_eq!(web_detail.name, "demo-web-1");
    assert!(web_detail.state.is_running());
    let db_detail = engine.inspect(&db_id).await;
    assert!(db_detail.is_err(), "db's old container should have been removed");

    let new_db = all_containers(&engine)
        .await
        .into_iter()
        .find(|c| c.name == "demo-db-1")
        .expect("recreated db container under its canonical name");
    assert!(
        new_db.state.is_running(),
        "recreated db container should be started, not left in Created state"
    );
}

/// Scenario: a `service_healthy` wait succeeds once the dependency flips
/// from `Starting` to `Healthy` mid-poll.
#[tokio::test]
async fn healthy_wait_succeeds_after_starting_to_healthy_transition() {
    let mut db = service("db");
    db.healthcheck = Some(converge::project::HealthcheckConfig {
        path: "/health".to_string(),
        port: 80,
        interval: Duration::from_millis(50),
        timeout: Duration::from_secs(1),
        retries: 3,
        start_period: Duration::from_secs(1),
    });
    let mut web = service("web");
    web.depends_on.insert(
        db.name.clone(),
        DependsOn {
            condition: Condition::Healthy,
            required: true,
            restart: false,
        },
    );

    let project = project_with(vec![db.clone(), web]);
    let engine = Arc::new(FakeEngine::new());
    let db_hash = converge::project::config_hash(&db).unwrap();

    let mut snapshot = HashMap::new();
    let db_config = make_config("demo-db-1", &project.name, &db, 1, db_hash.as_str());
    let db_id = engine.create(&db_config).await.unwrap();
    engine.start(&db_id).await.unwrap();
    engine.set_health(&db_id, HealthState::Starting);
    snapshot.insert(db.name.clone(), vec![engine.inspect(&db_id).await.unwrap()]);

    tokio::spawn({
        let engine = Arc::clone(&engine);
        let id = db_id.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            engine.set_health(&id, HealthState::Healthy);
        }
    });

    let report = run(&project, engine.as_ref(), snapshot).await;

    assert!(matches!(outcome(&report, "db"), ServiceOutcome::Converged));
    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
}

/// Scenario: `service_completed_successfully` aborts the dependant when the
/// dependency exits non-zero.
#[tokio::test]
async fn completed_successfully_with_nonzero_exit_fails_dependant() {
    let job = service("migrate");
    let mut web = service("web");
    web.depends_on.insert(
        job.name.clone(),
        DependsOn {
            condition: Condition::CompletedSuccessfully,
            required: true,
            restart: false,
        },
    );

    let project = project_with(vec![job.clone(), web]);
    let engine = FakeEngine::new();
    let job_hash = converge::project::config_hash(&job).unwrap();

    let mut snapshot = HashMap::new();
    let job_config = make_config("demo-migrate-1", &project.name, &job, 1, job_hash.as_str());
    let job_id = engine.create(&job_config).await.unwrap();
    engine.start(&job_id).await.unwrap();
    engine.set_exited(&job_id, 1);
    snapshot.insert(job.name.clone(), vec![engine.inspect(&job_id).await.unwrap()]);

    let report = run(&project, &engine, snapshot).await;

    assert!(matches!(outcome(&report, "migrate"), ServiceOutcome::Converged));
    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Failed(_)));
}

/// Scenario: an unknown `networkMode: service:missing` reference fails with
/// `MissingDependency` and mutates nothing.
#[tokio::test]
async fn unknown_service_reference_is_missing_dependency_with_no_mutation() {
    let mut web = service("web");
    web.network_mode = Some("service:ghost".to_string());
    let project = project_with(vec![web]);
    let engine = FakeEngine::new();

    let report = run(&project, &engine, HashMap::new()).await;

    match outcome(&report, "web") {
        ServiceOutcome::Failed(message) => {
            assert!(message.contains("ghost") || message.contains("missing"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(engine.container_count(), 0);
}

/// Property: a second convergence run over the first run's resulting
/// snapshot mutates nothing (idempotence).
#[tokio::test]
async fn converging_twice_is_idempotent() {
    let mut web = service("web");
    web.scale = 2;
    let project = project_with(vec![web]);
    let engine = FakeEngine::new();

    let first = run(&project, &engine, HashMap::new()).await;
    assert!(matches!(outcome(&first, "web"), ServiceOutcome::Converged));
    assert_eq!(engine.container_count(), 2);

    let mut snapshot = HashMap::new();
    let mut details = Vec::new();
    for c in all_containers(&engine).await {
        details.push(c);
    }
    snapshot.insert(ServiceName::new("web").unwrap(), details);

    let second = run(&project, &engine, snapshot).await;
    assert!(matches!(outcome(&second, "web"), ServiceOutcome::Converged));
    assert_eq!(engine.container_count(), 2);
}

/// Property: `policy = never` never recreates, even when every field
/// diverges from the declared config.
#[tokio::test]
async fn never_policy_preserves_divergent_container() {
    let mut web = service("web");
    web.recreate = RecreatePolicy::Never;
    let project = project_with(vec![web.clone()]);
    let engine = FakeEngine::new();

    let config = make_config("demo-web-1", &project.name, &web, 1, "stale-hash-value");
    let id = engine.create(&config).await.unwrap();
    engine.start(&id).await.unwrap();
    let mut snapshot = HashMap::new();
    snapshot.insert(web.name.clone(), vec![engine.inspect(&id).await.unwrap()]);

    let report = run(&project, &engine, snapshot).await;

    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
    // Same id survives; nothing was recreated.
    assert!(engine.inspect(&id).await.is_ok());
    assert_eq!(engine.container_count(), 1);
}

/// Property: `required = false` on a failing dependency warns but doesn't
/// fail the dependant's run.
#[tokio::test]
async fn optional_dependency_failure_does_not_fail_dependant() {
    // `cache` has no healthcheck declared; `web`'s optional `service_healthy`
    // wait against it hits the "no healthcheck configured" InvalidConfig
    // failure, which required=false must downgrade to a warning rather than
    // failing `web`'s own reconcile.
    let cache = service("cache");
    let mut web = service("web");
    web.depends_on.insert(
        cache.name.clone(),
        DependsOn {
            condition: Condition::Healthy,
            required: false,
            restart: false,
        },
    );

    let project = project_with(vec![cache, web]);
    let engine = FakeEngine::new();

    let report = run(&project, &engine, HashMap::new()).await;

    assert!(matches!(outcome(&report, "cache"), ServiceOutcome::Converged));
    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
}

/// Property: a cyclic dependency graph fails `InvalidConfig` before any
/// engine mutation, for every service in the project, not just the cycle.
#[tokio::test]
async fn cyclic_dependency_graph_mutates_nothing() {
    let mut a = service("a");
    let mut b = service("b");
    a.depends_on.insert(
        b.name.clone(),
        DependsOn {
            condition: Condition::Started,
            required: true,
            restart: false,
        },
    );
    b.depends_on.insert(
        a.name.clone(),
        DependsOn {
            condition: Condition::Started,
            required: true,
            restart: false,
        },
    );
    let project = project_with(vec![a, b]);
    let engine = FakeEngine::new();
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let err = converge(
        &project,
        &engine,
        HashMap::new(),
        &sink,
        None,
        None,
        Duration::from_secs(5),
        None,
        &cancel,
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.kind(),
        converge::convergence::ConvergeErrorKind::InvalidConfig
    );
    assert_eq!(engine.container_count(), 0);
}

/// Property: `scale = 0` removes every observed replica for that service.
#[tokio::test]
async fn scale_zero_removes_all_replicas() {
    let mut web = service("web");
    let project_scaled = project_with(vec![web.clone()]);
    let engine = FakeEngine::new();

    let config = make_config("demo-web-1", &project_scaled.name, &web, 1, "hash-1");
    let id = engine.create(&config).await.unwrap();
    engine.start(&id).await.unwrap();
    let mut snapshot = HashMap::new();
    snapshot.insert(web.name.clone(), vec![engine.inspect(&id).await.unwrap()]);

    web.scale = 0;
    let project = project_with(vec![web]);
    let report = run(&project, &engine, snapshot).await;

    assert!(matches!(outcome(&report, "web"), ServiceOutcome::Converged));
    assert_eq!(engine.container_count(), 0);
}

async fn all_containers(engine: &FakeEngine) -> Vec<converge::engine::ContainerDetail> {
    // `list_by_label` with the always-present managed label surfaces every
    // container the fake is holding, regardless of which service created it.
    engine
        .list_by_label("converge.managed", "true")
        .await
        .unwrap()
}

fn make_config(
    name: &str,
    project_name: &ProjectName,
    service: &Service,
    number: u32,
    hash: &str,
) -> converge::engine::ContainerConfig {
    let config_hash = converge::types::ConfigHash::new(hash.to_string());
    let mut config = converge::convergence::build::container_config(
        project_name.as_str(),
        service,
        name,
        number,
        &config_hash,
    )
    .unwrap();
    config.name = name.to_string();
    config
}
