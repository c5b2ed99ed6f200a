//! Cluster reconciler.
//!
//! Diffs the cluster's declared roles against the role resources carrying
//! its label, then:
//! 1. deletes roles no longer declared (or declared with zero replicas)
//! 2. walks the declared roles in order, propagating spec edits to existing
//!    roles and creating absent ones once their start quorum is met
//! 3. ensures the discovery service exists
//! 4. writes the aggregated per-role status
//!
//! A failure on one role does not stop the others; the first error is
//! returned after the pass so the dispatcher retries.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use gridop_api::{
    annotations, labels, ClusterResource, DiscoveryService, ObjectKey, ObjectMeta, Resource,
    ResourceKind, RoleResource, RoleSpec, RoleStatus, RoleStatusSnapshot,
};
use gridop_reconcile::ReconcileOutcome;
use tracing::{debug, info, instrument, warn};

use super::quorum;
use super::role::snapshot_of;
use super::{Context, Reconciler};
use crate::error::{ControllerError, ControllerResult};
use crate::events::{reasons, Event};
use crate::store::StoreError;

/// Reconciles `ClusterResource`s.
pub struct ClusterReconciler {
    ctx: Context,
}

/// Per-pass bookkeeping.
#[derive(Default)]
struct Pass {
    snapshots: Vec<RoleStatusSnapshot>,
    first_error: Option<ControllerError>,
    service_ensured: bool,
}

impl Pass {
    fn fail(&mut self, err: ControllerError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }
}

impl ClusterReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(namespace = %key.namespace, cluster = %key.name))]
    async fn reconcile_cluster(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        let Some(cluster) = self.ctx.store.get_cluster(key).await? else {
            debug!("cluster no longer exists");
            return Ok(ReconcileOutcome::Done);
        };

        let desired: Vec<RoleSpec> = cluster
            .desired_roles()
            .into_iter()
            .filter(|spec| spec.replicas_or_default() > 0)
            .collect();
        let desired_names: BTreeSet<String> = desired
            .iter()
            .map(|spec| spec.role_name().to_string())
            .collect();

        let selector = BTreeMap::from([(labels::CLUSTER.to_string(), cluster.name().to_string())]);
        let existing: BTreeMap<String, RoleResource> = self
            .ctx
            .store
            .list_roles(Some(&key.namespace), &selector)
            .await?
            .into_iter()
            .map(|role| (role.role_name().to_string(), role))
            .collect();

        let mut pass = Pass::default();

        for (name, role) in &existing {
            if !desired_names.contains(name) {
                self.delete_role(&cluster, role, &mut pass).await;
            }
        }

        // Quorum sees the snapshots produced earlier in this pass.
        let mut view = cluster.status.clone();
        for spec in &desired {
            let snapshot = match existing.get(spec.role_name()) {
                Some(role) => self.propagate(&cluster, role, spec, &mut pass).await,
                None => self.create_role(&cluster, spec, &view, &mut pass).await,
            };
            view.set_role_status(snapshot.clone());
            pass.snapshots.push(snapshot);
        }

        if !pass.service_ensured {
            if let Err(e) = self.ensure_service(&cluster).await {
                pass.fail(e);
            }
        }

        if let Err(e) = self.write_status(key, &pass.snapshots, &desired_names).await {
            pass.fail(e);
        }

        match pass.first_error {
            Some(e) => Err(e),
            None => Ok(ReconcileOutcome::Done),
        }
    }

    async fn delete_role(&self, cluster: &ClusterResource, role: &RoleResource, pass: &mut Pass) {
        let involved = cluster.resource_key();
        match self.ctx.store.delete_role(&role.key()).await {
            Ok(()) => {
                info!(role = %role.metadata.name, "deleted role");
                self.ctx.recorder.record(Event::normal(
                    involved,
                    reasons::SUCCESSFUL_DELETE,
                    format!(
                        "deleted role '{}' in cluster '{}' successful",
                        role.metadata.name,
                        cluster.name()
                    ),
                ));
            }
            Err(e) if e.is_not_found() => {
                debug!(role = %role.metadata.name, "role already deleted");
            }
            Err(e) => {
                warn!(role = %role.metadata.name, error = %e, "failed to delete role");
                self.ctx.recorder.record(Event::warning(
                    involved,
                    reasons::FAILED_DELETE,
                    format!(
                        "delete role '{}' in cluster '{}' failed: {}",
                        role.metadata.name,
                        cluster.name(),
                        e
                    ),
                ));
                pass.fail(e.into());
            }
        }
    }

    /// Bring an existing role's spec in line with the cluster entry.
    ///
    /// Only roles stamped with an older cluster generation are touched; a
    /// role stamped with the current generation whose spec differs was
    /// edited directly and is left to the role reconciler.
    async fn propagate(
        &self,
        cluster: &ClusterResource,
        role: &RoleResource,
        spec: &RoleSpec,
        pass: &mut Pass,
    ) -> RoleStatusSnapshot {
        let generation = cluster.metadata.generation.to_string();
        if role.metadata.annotation(annotations::CLUSTER_GENERATION) == Some(generation.as_str()) {
            return snapshot_of(role);
        }

        let spec_changed = role.spec != *spec;
        let mut updated = role.clone();
        updated.spec = spec.clone();
        updated
            .metadata
            .annotations
            .insert(annotations::CLUSTER_GENERATION.to_string(), generation);

        let result = self.ctx.store.update_role(updated).await;
        if !spec_changed {
            if let Err(e) = result {
                pass.fail(e.into());
            }
            return snapshot_of(role);
        }

        let involved = cluster.resource_key();
        match result {
            Ok(_) => {
                info!(role = %role.metadata.name, "updated role");
                self.ctx.recorder.record(Event::normal(
                    involved,
                    reasons::SUCCESSFUL_UPDATE,
                    format!(
                        "updated role '{}' in cluster '{}' successful",
                        role.metadata.name,
                        cluster.name()
                    ),
                ));
            }
            Err(e) => {
                warn!(role = %role.metadata.name, error = %e, "failed to update role");
                self.ctx.recorder.record(Event::warning(
                    involved,
                    reasons::FAILED_UPDATE,
                    format!(
                        "update role '{}' in cluster '{}' failed: {}",
                        role.metadata.name,
                        cluster.name(),
                        e
                    ),
                ));
                pass.fail(e.into());
            }
        }
        snapshot_of(role)
    }

    /// Create an absent role if its start quorum is met.
    async fn create_role(
        &self,
        cluster: &ClusterResource,
        spec: &RoleSpec,
        view: &gridop_api::ClusterStatus,
        pass: &mut Pass,
    ) -> RoleStatusSnapshot {
        let role_name = spec.role_name().to_string();
        let full_name = cluster.full_role_name(&role_name);

        let verdict = quorum::evaluate(&spec.start_quorum, view);
        if !verdict.can_create {
            info!(role = %full_name, reason = %verdict.reason, "role creation deferred");
            return RoleStatusSnapshot {
                role_name,
                ready: false,
                count: 0,
                status: RoleStatus::Waiting,
                reason: Some(verdict.reason),
            };
        }

        if !pass.service_ensured {
            match self.ensure_service(cluster).await {
                Ok(()) => pass.service_ensured = true,
                Err(e) => pass.fail(e),
            }
        }

        let metadata = ObjectMeta::new(cluster.metadata.namespace.clone(), full_name.clone())
            .with_label(labels::CLUSTER, cluster.name())
            .with_label(labels::ROLE, role_name.clone())
            .with_annotation(
                annotations::CLUSTER_GENERATION,
                cluster.metadata.generation.to_string(),
            )
            .with_owner(cluster.as_owner());
        let role = RoleResource::new(metadata, spec.clone());

        let involved = cluster.resource_key();
        match self.ctx.store.create_role(role).await {
            Ok(_) => {
                info!(role = %full_name, "created role");
                self.ctx.recorder.record(Event::normal(
                    involved,
                    reasons::SUCCESSFUL_CREATE,
                    format!(
                        "created role '{}' in cluster '{}' successful",
                        full_name,
                        cluster.name()
                    ),
                ));
                RoleStatusSnapshot {
                    role_name,
                    ready: false,
                    count: 0,
                    status: RoleStatus::Created,
                    reason: None,
                }
            }
            Err(e) => {
                warn!(role = %full_name, error = %e, "failed to create role");
                let reason = format!("create failed: {e}");
                self.ctx.recorder.record(Event::warning(
                    involved,
                    reasons::FAILED_CREATE,
                    format!(
                        "create role '{}' in cluster '{}' failed: {}",
                        full_name,
                        cluster.name(),
                        e
                    ),
                ));
                pass.fail(e.into());
                RoleStatusSnapshot {
                    role_name,
                    ready: false,
                    count: 0,
                    status: RoleStatus::Failed,
                    reason: Some(reason),
                }
            }
        }
    }

    /// Create the `<cluster>-wka` discovery service if it is missing.
    async fn ensure_service(&self, cluster: &ClusterResource) -> ControllerResult<()> {
        let mut service =
            DiscoveryService::for_cluster(&cluster.metadata.namespace, cluster.name());
        service.metadata.owner = Some(cluster.as_owner());

        if self.ctx.store.get_service(&service.key()).await?.is_some() {
            return Ok(());
        }

        match self.ctx.store.create_service(service).await {
            Ok(created) => {
                debug!(service = %created.metadata.name, "created discovery service");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge this pass's snapshots into a fresh read of the cluster status.
    async fn write_status(
        &self,
        key: &ObjectKey,
        snapshots: &[RoleStatusSnapshot],
        desired_names: &BTreeSet<String>,
    ) -> ControllerResult<()> {
        let Some(fresh) = self.ctx.store.get_cluster(key).await? else {
            return Ok(());
        };

        let mut next = fresh.clone();
        for snapshot in snapshots {
            next.status.set_role_status(snapshot.clone());
        }
        next.status.retain_roles(desired_names);
        next.status.role_count = desired_names.len() as i32;

        if next.status != fresh.status {
            debug!(role_count = next.status.role_count, "updating cluster status");
            self.ctx.store.update_cluster_status(next).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    async fn reconcile(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        self.reconcile_cluster(key).await
    }
}
