//! Orchestrator — drives an instance from its tenant's desired state to the
//! cluster and through its lifecycle.
//!
//! Every cluster mutation made on behalf of one call is registered in a
//! [`Rollback`] owned by that call. A failing call reverts its cluster
//! changes and puts the instance's applied manifest back to match; other
//! store writes it already committed (state transitions) stay.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stackgrid_core::{Deadline, StackgridConfig, ZoneConfig};
use stackgrid_health::{
    postgrest_ready, stack_targets, HealthProber, ProbeTarget, VapiCheck, READY_POLL_INTERVAL,
};
use stackgrid_kube::{
    apply_object, apply_objects, delete_objects, parse_manifest, wait_deleted, ClusterError,
    DeleteOptions, RegionClientPool,
};
use stackgrid_migrate::{
    migrations_from_dir, migrations_from_tar, run_migrations, MigrationReport, MigrationScope,
    ObjectStorage, TenantConnector,
};
use stackgrid_rollout::{upgrade, HealthGate, Rollback};
use stackgrid_state::{Instance, InstanceState, Stack, StateStore};
use stackgrid_vapi::{all_dependencies_of, ResolvedRelease};
use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult};
use crate::gate::StackHealthGate;
use crate::manifest::{namespace_object, render_stack_manifest, stack_selector};
use crate::render::ManifestRenderer;

/// Pause between the stop and launch halves of a restart.
pub const RESTART_PAUSE: Duration = Duration::from_millis(150);

/// Knobs the orchestrator reads from configuration.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub zones: BTreeMap<String, ZoneConfig>,
    /// Scheme for public stack URLs (`https` in production).
    pub scheme: String,
    pub skip_health_checks: bool,
    pub reload_schema: bool,
    /// Object storage bucket holding VAPI release archives.
    pub vapi_bucket: String,
    pub tenant_migrations_dir: Option<PathBuf>,
}

impl DeploySettings {
    pub fn from_config(config: &StackgridConfig) -> Self {
        Self {
            zones: config.regions.zones.clone(),
            scheme: config.deploy.scheme.clone(),
            skip_health_checks: config.deploy.skip_health_checks,
            reload_schema: config.deploy.reload_schema,
            vapi_bucket: config.storage.vapi_bucket.clone(),
            tenant_migrations_dir: config.migrations.as_ref().map(|m| m.tenant_dir.clone()),
        }
    }
}

/// Run `fut` unless `deadline` fires first.
async fn bounded<T, E>(deadline: &Deadline, fut: impl Future<Output = Result<T, E>>) -> DeployResult<T>
where
    DeployError: From<E>,
{
    Ok(deadline.run(fut).await??)
}

pub struct Orchestrator {
    state: StateStore,
    regions: RegionClientPool,
    renderer: Arc<dyn ManifestRenderer>,
    prober: HealthProber,
    storage: Arc<dyn ObjectStorage>,
    databases: Arc<dyn TenantConnector>,
    settings: DeploySettings,
}

impl Orchestrator {
    pub fn new(
        state: StateStore,
        regions: RegionClientPool,
        renderer: Arc<dyn ManifestRenderer>,
        prober: HealthProber,
        storage: Arc<dyn ObjectStorage>,
        databases: Arc<dyn TenantConnector>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            state,
            regions,
            renderer,
            prober,
            storage,
            databases,
            settings,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Bring the instance's cluster objects in line with its stack and mark
    /// it `Running`, giving up after `timeout`.
    pub async fn deploy_stack(&self, instance_id: &str, timeout: Duration) -> DeployResult<Instance> {
        self.deploy_stack_until(instance_id, &Deadline::after(timeout)).await
    }

    pub async fn deploy_stack_until(&self, instance_id: &str, deadline: &Deadline) -> DeployResult<Instance> {
        let mut rollback = Rollback::new(format!("deploy {instance_id}"));
        match self.deploy_steps(instance_id, deadline, &mut rollback).await {
            Ok(instance) => {
                rollback.commit();
                info!(instance = %instance_id, "deploy complete");
                Ok(instance)
            }
            Err(e) => {
                warn!(instance = %instance_id, error = %e, "deploy failed, reverting cluster changes");
                let report = rollback.abort().await;
                if !report.is_clean() {
                    warn!(instance = %instance_id, failed = report.failed.len(), "deploy revert was incomplete");
                }
                Err(e)
            }
        }
    }

    async fn deploy_steps(
        &self,
        instance_id: &str,
        deadline: &Deadline,
        rollback: &mut Rollback,
    ) -> DeployResult<Instance> {
        let mut instance = self.state.instance(instance_id)?;
        if instance.state == InstanceState::None {
            instance = self.state.transition_instance(instance_id, InstanceState::Initialize)?;
        }
        let stack = self.state.stack(&instance.stack_id)?;
        let zone = self.zone(&instance.zone)?;
        let vapis = self.resolve_vapis(&stack)?;

        let host = format!("{}.{}", stack.slug, zone.domain);
        let manifest = render_stack_manifest(self.renderer.as_ref(), &instance, &stack, &host, &vapis)?;

        if manifest == instance.applied_k8s_yaml {
            info!(instance = %instance_id, "manifest unchanged, nothing to apply");
        } else {
            let client = self.regions.client(&instance.zone)?;
            bounded(deadline, apply_object(client.as_ref(), &namespace_object(&stack)?)).await?;

            let old = parse_manifest(&instance.applied_k8s_yaml)?;
            let new = parse_manifest(&manifest)?;
            let mut gate = StackHealthGate::new(
                client.clone(),
                stack.namespace(),
                stack_selector(&stack).to_string(),
            );
            if !self.settings.skip_health_checks {
                gate = gate.with_checks(self.prober.clone(), self.targets(&stack, zone, &vapis));
            }
            let summary = upgrade(&client, &old, &new, Some(&gate as &dyn HealthGate), deadline, rollback).await?;
            debug!(instance = %instance_id, ?summary, "manifest applied");

            self.state
                .transaction(|tx| tx.set_applied_manifest(instance_id, &manifest))?;
            // The stored manifest has to follow the cluster if a later step reverts it.
            let store = self.state.clone();
            let id = instance_id.to_string();
            let previous = instance.applied_k8s_yaml.clone();
            rollback.register("restore applied manifest", move || async move {
                store.transaction(|tx| tx.set_applied_manifest(&id, &previous))?;
                Ok(())
            });
        }

        self.install_vapi_schemas(&stack, zone, &vapis, deadline).await?;

        let instance = self.state.transition_instance(instance_id, InstanceState::Running)?;
        Ok(instance)
    }

    /// Run each VAPI's schema migrations, then have the REST layer reload.
    async fn install_vapi_schemas(
        &self,
        stack: &Stack,
        zone: &ZoneConfig,
        vapis: &[ResolvedRelease],
        deadline: &Deadline,
    ) -> DeployResult<()> {
        let reload = self.settings.reload_schema && stack.features.postgrest;
        if vapis.is_empty() && !reload {
            return Ok(());
        }

        let mut session = bounded(deadline, self.databases.connect(&stack.database_url)).await?;
        for vapi in vapis {
            let archive = bounded(
                deadline,
                self.storage
                    .download(&self.settings.vapi_bucket, &vapi.release.tar_file_path),
            )
            .await?;
            let migrations = migrations_from_tar(&archive)?;
            if migrations.is_empty() {
                continue;
            }
            let scope = MigrationScope::Vapi {
                package_id: vapi.package.id.clone(),
            };
            let report = bounded(deadline, run_migrations(session.as_mut(), &scope, &migrations)).await?;
            info!(
                stack = %stack.id,
                vapi = %vapi.package.name,
                version = %vapi.version,
                applied = report.applied.len(),
                "vapi schema installed"
            );
        }

        if reload {
            bounded(deadline, session.notify_schema_reload()).await?;
            debug!(stack = %stack.id, "requested schema reload");
            if !self.settings.skip_health_checks {
                let base_url = zone.stack_base_url(&self.settings.scheme, &stack.slug);
                self.prober
                    .wait_until_available(&[postgrest_ready(&base_url)], READY_POLL_INTERVAL, deadline)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// `Ready → Running`, then remove the applied objects from the cluster.
    pub async fn launch_instance(&self, instance_id: &str, deadline: &Deadline) -> DeployResult<Instance> {
        self.flip_and_tear_down(instance_id, "launch", InstanceState::Ready, InstanceState::Running, deadline)
            .await
    }

    /// `Running → Ready`, then remove the applied objects from the cluster.
    pub async fn stop_instance(&self, instance_id: &str, deadline: &Deadline) -> DeployResult<Instance> {
        self.flip_and_tear_down(instance_id, "stop", InstanceState::Running, InstanceState::Ready, deadline)
            .await
    }

    pub async fn restart_instance(&self, instance_id: &str, deadline: &Deadline) -> DeployResult<Instance> {
        self.stop_instance(instance_id, deadline).await?;
        deadline.sleep(RESTART_PAUSE).await?;
        self.launch_instance(instance_id, deadline).await
    }

    /// Both launch and stop delete the instance's applied object set after
    /// flipping state. If the deletion fails the objects are re-applied.
    async fn flip_and_tear_down(
        &self,
        instance_id: &str,
        action: &'static str,
        expected: InstanceState,
        target: InstanceState,
        deadline: &Deadline,
    ) -> DeployResult<Instance> {
        let instance = self.state.instance(instance_id)?;
        if instance.state != expected {
            return Err(DeployError::WrongState {
                id: instance_id.to_string(),
                action,
                actual: instance.state,
                expected,
            });
        }
        let client = self.regions.client(&instance.zone)?;
        let objects = parse_manifest(&instance.applied_k8s_yaml)?;

        let updated = self.state.transition_instance(instance_id, target)?;

        let mut rollback = Rollback::new(format!("{action} {instance_id}"));
        let undo_client = client.clone();
        let reapply = objects.clone();
        rollback.register(format!("re-apply {} objects", reapply.len()), move || async move {
            apply_objects(undo_client.as_ref(), &reapply).await?;
            Ok(())
        });

        let teardown = async {
            bounded(deadline, delete_objects(client.as_ref(), &objects, DeleteOptions::foreground())).await?;
            wait_deleted(client.as_ref(), &objects, deadline).await?;
            Ok::<_, DeployError>(())
        };
        match teardown.await {
            Ok(()) => {
                rollback.commit();
                info!(instance = %instance_id, %action, removed = objects.len(), state = %updated.state, "instance objects removed");
                Ok(updated)
            }
            Err(e) => {
                warn!(instance = %instance_id, %action, error = %e, "teardown failed, restoring objects");
                rollback.abort().await;
                Err(e)
            }
        }
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Probe every enabled feature and resolved VAPI of the instance once.
    pub async fn is_available(
        &self,
        instance_id: &str,
        per_check_timeout: Duration,
        deadline: &Deadline,
    ) -> DeployResult<BTreeMap<String, bool>> {
        let instance = self.state.instance(instance_id)?;
        let stack = self.state.stack(&instance.stack_id)?;
        let zone = self.zone(&instance.zone)?;
        let vapis = self.resolve_vapis(&stack)?;
        let targets = self.targets(&stack, zone, &vapis);
        let results = self
            .prober
            .with_timeout(per_check_timeout)
            .probe_all(&targets, deadline)
            .await?;
        Ok(results)
    }

    // ── Tenant database ────────────────────────────────────────────

    /// Apply the platform's tenant migrations to the stack's database.
    pub async fn migrate_database(&self, stack_id: &str, deadline: &Deadline) -> DeployResult<MigrationReport> {
        let dir = self
            .settings
            .tenant_migrations_dir
            .as_ref()
            .ok_or(DeployError::MigrationsNotConfigured)?;
        let stack = self.state.stack(stack_id)?;
        let migrations = migrations_from_dir(dir)?;
        let mut session = bounded(deadline, self.databases.connect(&stack.database_url)).await?;
        let report = bounded(
            deadline,
            run_migrations(session.as_mut(), &MigrationScope::Tenant, &migrations),
        )
        .await?;
        info!(stack = %stack_id, applied = report.applied.len(), skipped = report.skipped.len(), "tenant migrations done");
        Ok(report)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn zone(&self, zone: &str) -> DeployResult<&ZoneConfig> {
        let resolved = self.regions.resolve_zone(zone)?;
        self.settings
            .zones
            .get(resolved)
            .ok_or_else(|| ClusterError::ZoneNotFound(resolved.to_string()).into())
    }

    fn resolve_vapis(&self, stack: &Stack) -> DeployResult<Vec<ResolvedRelease>> {
        if stack.vapi_release_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(all_dependencies_of(&self.state, &stack.vapi_release_ids)?)
    }

    fn targets(&self, stack: &Stack, zone: &ZoneConfig, vapis: &[ResolvedRelease]) -> Vec<ProbeTarget> {
        let checks: Vec<VapiCheck> = vapis
            .iter()
            .map(|v| VapiCheck {
                package: v.package.name.clone(),
                major: v.major(),
            })
            .collect();
        let base_url = zone.stack_base_url(&self.settings.scheme, &stack.slug);
        stack_targets(&base_url, &stack.features, &checks)
    }
}
