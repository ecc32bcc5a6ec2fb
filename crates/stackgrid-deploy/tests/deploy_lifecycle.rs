//! End-to-end orchestrator scenarios against an in-memory cluster, a local
//! HTTP responder for health checks, and an in-memory tenant database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stackgrid_core::{Classify, Deadline, ErrorKind, ZoneConfig};
use stackgrid_deploy::{DeploySettings, Orchestrator, TemplateSet};
use stackgrid_health::test_server::{routes, serve, Routes};
use stackgrid_health::{HealthProber, ProbeClient};
use stackgrid_kube::memory::{MemoryCluster, Verb};
use stackgrid_kube::{ClusterClient, ClusterObject, RegionClientPool};
use stackgrid_migrate::memory::{MemoryConnector, MemoryTenantDb};
use stackgrid_migrate::LocalObjectStorage;
use stackgrid_state::{
    Instance, InstanceState, Stack, StackFeatures, StateStore, VapiPackage, VapiRelease,
};
use tempfile::TempDir;

const INSTANCE: &str = "i1";
const DATABASE_URL: &str = "postgres://tenant@db/acme";

struct Harness {
    orchestrator: Orchestrator,
    cluster: Arc<MemoryCluster>,
    db: MemoryTenantDb,
    routes: Routes,
    objects: TempDir,
}

impl Harness {
    fn config_maps(&self) -> Vec<String> {
        self.cluster
            .objects()
            .into_iter()
            .filter(|o| o.kind() == "ConfigMap")
            .map(|o| o.name().to_string())
            .collect()
    }

    fn instance(&self) -> Instance {
        self.orchestrator.state().instance(INSTANCE).unwrap()
    }

    fn set_route(&self, path: &str, status: u16) {
        self.routes.lock().unwrap().insert(path.to_string(), status);
    }
}

fn config_map_template(name: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  labels:\n    stackgrid.io/stack: \"{{{{ stack.id }}}}\"\ndata:\n  host: \"{{{{ host }}}}\"\n"
    )
}

fn templates() -> TemplateSet {
    TemplateSet::from_sources([
        ("base/network.yaml".to_string(), config_map_template("network")),
        ("base/ingress.yaml".to_string(), config_map_template("ingress")),
        ("base/config.yaml".to_string(), config_map_template("config")),
        ("auth.yaml".to_string(), config_map_template("auth")),
        ("storage.yaml".to_string(), config_map_template("storage")),
        ("postgrest.yaml".to_string(), config_map_template("postgrest")),
        (
            "vapi.yaml".to_string(),
            config_map_template("vapi-{{ vapi.package }}-v{{ vapi.major }}"),
        ),
    ])
}

fn ready_pod() -> ClusterObject {
    ClusterObject::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "auth-0",
            "namespace": "stack-acme",
            "labels": { "stackgrid.io/project": "p1", "stackgrid.io/stack": "s1" },
        },
        "status": {
            "phase": "Running",
            "conditions": [{ "type": "Ready", "status": "True" }],
        },
    }))
    .unwrap()
}

fn release_archive() -> Vec<u8> {
    let body = "create schema search;";
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "migrations/20240101000000_init.sql", body.as_bytes())
        .unwrap();
    builder.into_inner().unwrap()
}

fn seed(state: &StateStore) {
    state
        .transaction(|tx| {
            tx.put_vapi_package(&VapiPackage {
                id: "pkg-search".into(),
                name: "search".into(),
            })?;
            tx.put_vapi_release(&VapiRelease {
                id: "search-1.0.0".into(),
                package_id: "pkg-search".into(),
                version: "1.0.0".into(),
                dependencies: vec![],
                published: true,
                tar_file_path: "search/1.0.0.tar".into(),
            })?;
            tx.put_stack(&Stack {
                id: "s1".into(),
                project_id: "p1".into(),
                slug: "acme".into(),
                default_zone: "default".into(),
                features: StackFeatures {
                    auth: true,
                    ..Default::default()
                },
                vapi_release_ids: vec!["search-1.0.0".into()],
                database_url: DATABASE_URL.into(),
                created_at: 0,
                updated_at: 0,
            })?;
            tx.put_instance(&Instance {
                id: INSTANCE.into(),
                stack_id: "s1".into(),
                zone: "default".into(),
                name: "acme-main".into(),
                num_replicas: 1,
                max_replicas: 2,
                state: InstanceState::None,
                applied_k8s_yaml: String::new(),
                created_at: 0,
                updated_at: 0,
                deleted_at: None,
            })
        })
        .unwrap();
}

async fn harness_with(configure: impl FnOnce(&mut DeploySettings)) -> Harness {
    let routes = routes(&[
        ("/auth/v1/health", 200),
        ("/vapi/search/v1/_internal/health", 200),
    ]);
    let addr = serve(routes.clone()).await;

    let state = StateStore::open_in_memory().unwrap();
    seed(&state);

    let cluster = Arc::new(MemoryCluster::new());
    cluster.insert(ready_pod());
    let mut clients: HashMap<String, Arc<dyn ClusterClient>> = HashMap::new();
    clients.insert("eu-west".into(), cluster.clone());
    let regions = RegionClientPool::new("eu-west", clients);

    let objects = tempfile::tempdir().unwrap();
    let bucket = objects.path().join("vapi-releases/search");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(bucket.join("1.0.0.tar"), release_archive()).unwrap();

    let connector = MemoryConnector::new();
    let db = connector.database(DATABASE_URL);

    let mut zones = BTreeMap::new();
    zones.insert(
        "eu-west".to_string(),
        ZoneConfig {
            context: None,
            kubeconfig: None,
            domain: "eu.stacks.test".into(),
            probe_url: Some(format!("http://{addr}")),
        },
    );
    let mut settings = DeploySettings {
        zones,
        scheme: "http".into(),
        skip_health_checks: false,
        reload_schema: true,
        vapi_bucket: "vapi-releases".into(),
        tenant_migrations_dir: None,
    };
    configure(&mut settings);

    let prober = HealthProber::new(ProbeClient::new().unwrap(), Duration::from_secs(1));
    let orchestrator = Orchestrator::new(
        state,
        regions,
        Arc::new(templates()),
        prober,
        Arc::new(LocalObjectStorage::new(objects.path())),
        Arc::new(connector),
        settings,
    );

    Harness {
        orchestrator,
        cluster,
        db,
        routes,
        objects,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

#[tokio::test]
async fn new_instance_with_auth_and_one_vapi_reaches_running() {
    let h = harness().await;

    let instance = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(instance.state, InstanceState::Running);
    assert!(!instance.applied_k8s_yaml.is_empty());
    assert_eq!(h.instance().applied_k8s_yaml, instance.applied_k8s_yaml);

    let mut names = h.config_maps();
    names.sort();
    assert_eq!(names, vec!["auth", "config", "ingress", "network", "vapi-search-v1"]);
    assert!(h
        .cluster
        .objects()
        .iter()
        .any(|o| o.kind() == "Namespace" && o.name() == "stack-acme"));

    assert_eq!(h.db.executed(), vec!["create schema search;"]);

    let available = h
        .orchestrator
        .is_available(INSTANCE, Duration::from_secs(1), &deadline())
        .await
        .unwrap();
    let expected: BTreeMap<String, bool> = [("auth".to_string(), true), ("search".to_string(), true)]
        .into_iter()
        .collect();
    assert_eq!(available, expected);
}

#[tokio::test]
async fn identical_redeploy_writes_nothing() {
    let h = harness().await;
    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    h.cluster.reset_writes();
    let again = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(again.state, InstanceState::Running);
    assert_eq!(h.cluster.write_count(), 0);
    // The VAPI migration is recorded, so its body ran once.
    assert_eq!(h.db.executed().len(), 1);
}

#[tokio::test]
async fn failing_health_check_reverts_cluster_changes() {
    let h = harness().await;
    h.set_route("/auth/v1/health", 503);

    let err = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(h.config_maps().is_empty(), "created objects must be removed");
    let instance = h.instance();
    assert_eq!(instance.state, InstanceState::Initialize);
    assert!(instance.applied_k8s_yaml.is_empty());
    assert!(h.db.executed().is_empty());
}

#[tokio::test]
async fn failed_migration_reverts_cluster_and_applied_manifest() {
    let h = harness().await;
    h.db.fail_statements_containing("create schema");

    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(h.config_maps().is_empty(), "applied objects must be removed");
    let instance = h.instance();
    // The first transition was committed; the manifest follows the cluster back.
    assert_eq!(instance.state, InstanceState::Initialize);
    assert!(instance.applied_k8s_yaml.is_empty());
    assert!(h.db.executed().is_empty());

    h.db.clear_failures();
    let instance = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(instance.state, InstanceState::Running);
    let mut names = h.config_maps();
    names.sort();
    assert_eq!(names, vec!["auth", "config", "ingress", "network", "vapi-search-v1"]);
    assert_eq!(h.db.executed(), vec!["create schema search;"]);
}

#[tokio::test]
async fn late_failure_on_redeploy_restores_previous_manifest() {
    let h = harness().await;
    let first = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    // Enable storage, then make the release archive unavailable so the
    // deploy fails after the upgrade has already gone through.
    h.set_route("/storage/v1/status", 200);
    let state = h.orchestrator.state();
    let mut stack = state.stack("s1").unwrap();
    stack.features.storage = true;
    state.transaction(|tx| tx.put_stack(&stack)).unwrap();
    std::fs::remove_file(h.objects.path().join("vapi-releases/search/1.0.0.tar")).unwrap();

    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(!h.config_maps().contains(&"storage".to_string()));
    let instance = h.instance();
    assert_eq!(instance.state, InstanceState::Running);
    assert_eq!(instance.applied_k8s_yaml, first.applied_k8s_yaml);

    std::fs::write(
        h.objects.path().join("vapi-releases/search/1.0.0.tar"),
        release_archive(),
    )
    .unwrap();
    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(h.config_maps().contains(&"storage".to_string()));
    assert_ne!(h.instance().applied_k8s_yaml, first.applied_k8s_yaml);
}

#[tokio::test]
async fn skipped_health_checks_only_wait_for_pods() {
    let h = harness_with(|s| s.skip_health_checks = true).await;
    h.set_route("/auth/v1/health", 503);

    let instance = h
        .orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(instance.state, InstanceState::Running);
}

#[tokio::test]
async fn postgrest_stacks_reload_schema_after_migrations() {
    let h = harness().await;
    h.set_route("/rest-admin/v1/live", 200);
    h.set_route("/rest-admin/v1/ready", 200);
    let state = h.orchestrator.state();
    let mut stack = state.stack("s1").unwrap();
    stack.features.postgrest = true;
    state.transaction(|tx| tx.put_stack(&stack)).unwrap();

    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(h.db.notifications(), 1);
    assert!(h.config_maps().contains(&"postgrest".to_string()));
}

#[tokio::test]
async fn stop_and_launch_both_delete_applied_objects() {
    let h = harness().await;
    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();
    let applied = h.instance().applied_k8s_yaml;

    let stopped = h.orchestrator.stop_instance(INSTANCE, &deadline()).await.unwrap();
    assert_eq!(stopped.state, InstanceState::Ready);
    assert!(h.config_maps().is_empty());

    h.cluster.reset_writes();
    let launched = h.orchestrator.launch_instance(INSTANCE, &deadline()).await.unwrap();
    assert_eq!(launched.state, InstanceState::Running);
    // Launch tears the applied set down too; nothing is re-created.
    assert!(h.config_maps().is_empty());
    assert!(h.cluster.writes().iter().all(|w| w.verb == Verb::Delete));
    assert_eq!(h.instance().applied_k8s_yaml, applied);
}

#[tokio::test]
async fn launch_and_stop_guard_the_source_state() {
    let h = harness().await;

    let err = h.orchestrator.launch_instance(INSTANCE, &deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();
    let err = h.orchestrator.launch_instance(INSTANCE, &deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    h.orchestrator.stop_instance(INSTANCE, &deadline()).await.unwrap();
    let err = h.orchestrator.stop_instance(INSTANCE, &deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(h.instance().state, InstanceState::Ready);
}

#[tokio::test]
async fn restart_stops_then_launches() {
    let h = harness().await;
    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();

    let restarted = h.orchestrator.restart_instance(INSTANCE, &deadline()).await.unwrap();
    assert_eq!(restarted.state, InstanceState::Running);
}

#[tokio::test]
async fn failed_teardown_restores_objects() {
    let h = harness().await;
    h.orchestrator
        .deploy_stack(INSTANCE, Duration::from_secs(10))
        .await
        .unwrap();
    h.cluster.fail_on(Verb::Delete, "auth");

    let err = h.orchestrator.stop_instance(INSTANCE, &deadline()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);

    let mut names = h.config_maps();
    names.sort();
    assert_eq!(names, vec!["auth", "config", "ingress", "network", "vapi-search-v1"]);
    // The state flip was committed before the teardown and stays.
    assert_eq!(h.instance().state, InstanceState::Ready);
}

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let h = harness().await;
    let err = h
        .orchestrator
        .deploy_stack("missing", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn tenant_migrations_need_a_directory() {
    let h = harness().await;
    let err = h
        .orchestrator
        .migrate_database("s1", &deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn tenant_migrations_apply_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("1_roles.sql"), "create role app;").unwrap();
    std::fs::write(dir.path().join("2_grants.sql"), "grant app to tenant;").unwrap();
    let path = dir.path().to_path_buf();
    let h = harness_with(move |s| s.tenant_migrations_dir = Some(path)).await;

    let first = h.orchestrator.migrate_database("s1", &deadline()).await.unwrap();
    assert_eq!(first.applied, vec![1, 2]);
    let second = h.orchestrator.migrate_database("s1", &deadline()).await.unwrap();
    assert_eq!(second.skipped, vec![1, 2]);
    assert_eq!(h.db.executed(), vec!["create role app;", "grant app to tenant;"]);
}
