//! Role reconciler.
//!
//! Converges one role's workload to the role's canonical spec:
//!
//! | current vs desired | upgrade | action                                       |
//! |--------------------|---------|----------------------------------------------|
//! | equal              | no      | sync status, push snapshot to the cluster    |
//! | equal              | yes     | upgrade in place                             |
//! | current < desired  | yes     | upgrade at the current size, requeue         |
//! | current < desired  | no      | scale                                        |
//! | current > desired  | either  | scale, requeue for the upgrade once reached  |
//!
//! Upgrading before growing means new members start on the new template;
//! shrinking before upgrading means fewer members have to roll.

use std::cmp::Ordering;

use async_trait::async_trait;
use gridop_api::{
    annotations, labels, role_selector, ClusterResource, ObjectKey, ObjectMeta, Resource,
    ResourceKind, RoleResource, RoleSpec, RoleStatus, RoleStatusSnapshot, WorkloadResource,
};
use gridop_reconcile::ReconcileOutcome;
use tracing::{debug, info, instrument};

use super::materialize::{is_upgrade, materialize};
use super::{Context, Reconciler, ScalingEngine};
use crate::error::ControllerResult;
use crate::events::{reasons, Event};

/// The cluster status entry describing `role`.
pub(crate) fn snapshot_of(role: &RoleResource) -> RoleStatusSnapshot {
    let status = role.status.status.unwrap_or(RoleStatus::Created);
    RoleStatusSnapshot {
        role_name: role.role_name().to_string(),
        ready: status == RoleStatus::Ready,
        count: role.status.ready_replicas,
        status,
        reason: role.status.message.clone(),
    }
}

/// Reconciles `RoleResource`s.
pub struct RoleReconciler {
    ctx: Context,
    scaling: ScalingEngine,
}

impl RoleReconciler {
    pub fn new(ctx: Context) -> Self {
        Self {
            scaling: ScalingEngine::new(ctx.clone()),
            ctx,
        }
    }

    #[instrument(skip(self), fields(namespace = %key.namespace, role = %key.name))]
    async fn reconcile_role(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        let Some(role) = self.ctx.store.get_role(key).await? else {
            debug!("role no longer exists");
            return Ok(ReconcileOutcome::Done);
        };

        let cluster_name = role
            .cluster_name()
            .or_else(|| role.metadata.owner.as_ref().map(|o| o.name.as_str()))
            .unwrap_or_default()
            .to_string();
        let cluster_key = ObjectKey::new(key.namespace.clone(), cluster_name.clone());
        let Some(cluster) = self.ctx.store.get_cluster(&cluster_key).await? else {
            return self.mark_orphaned(role, &cluster_name).await;
        };

        let role_name = role.role_name().to_string();
        let Some(canonical) = cluster.canonical_role(&role_name) else {
            debug!("role is no longer declared by its cluster");
            return Ok(ReconcileOutcome::Done);
        };

        if role.spec != canonical {
            return self.resolve_divergence(role, cluster, canonical).await;
        }

        let desired = role.desired_replicas();
        if desired <= 0 {
            // Zero-replica roles are deleted by the cluster reconciler.
            return Ok(ReconcileOutcome::Done);
        }

        let Some(workload) = self.ctx.store.get_workload(key).await? else {
            return self.create_workload(&cluster, &role, desired).await;
        };

        let current = workload.spec.cluster_size;
        let target = materialize(
            cluster.name(),
            &role.spec,
            Some(&workload.spec),
            &self.ctx.settings.default_image,
            desired,
        );
        let upgrade = is_upgrade(&target, &workload.spec)?;
        debug!(current, desired, upgrade, "role decision");

        match current.cmp(&desired) {
            Ordering::Equal if !upgrade => {
                self.sync_status(&cluster, &role, &workload, desired).await?;
                Ok(ReconcileOutcome::Done)
            }
            Ordering::Equal => {
                self.upgrade(&role, &workload, target, current).await?;
                Ok(ReconcileOutcome::Done)
            }
            Ordering::Less if upgrade => {
                self.upgrade(&role, &workload, target, current).await?;
                Ok(ReconcileOutcome::RequeueNow)
            }
            Ordering::Less => self.scaling.scale(&role, &workload, current, desired).await,
            Ordering::Greater => {
                let outcome = self.scaling.scale(&role, &workload, current, desired).await?;
                if upgrade && outcome == ReconcileOutcome::Done {
                    Ok(ReconcileOutcome::RequeueNow)
                } else {
                    Ok(outcome)
                }
            }
        }
    }

    /// The parent cluster is gone: mark the role failed once.
    async fn mark_orphaned(
        &self,
        role: RoleResource,
        cluster_name: &str,
    ) -> ControllerResult<ReconcileOutcome> {
        if role.status.status == Some(RoleStatus::Failed) {
            return Ok(ReconcileOutcome::Done);
        }

        let involved = role.resource_key();
        let message = format!(
            "invalid role '{}' cannot find parent cluster '{}'",
            role.metadata.name, cluster_name
        );

        let mut failed = role;
        failed.status.status = Some(RoleStatus::Failed);
        failed.status.message = Some(message.clone());
        self.ctx.store.update_role_status(failed).await?;

        info!(cluster = %cluster_name, "parent cluster not found");
        self.ctx
            .recorder
            .record(Event::warning(involved, reasons::FAILED, message));
        Ok(ReconcileOutcome::Done)
    }

    /// The role spec no longer matches the cluster's entry.
    ///
    /// If the cluster has not yet propagated its latest edit to this role,
    /// the cluster reconciler will do so and nothing happens here. Otherwise
    /// the role was edited directly: a replica change is pushed into the
    /// cluster, anything else is reset to the cluster's entry.
    async fn resolve_divergence(
        &self,
        role: RoleResource,
        cluster: ClusterResource,
        canonical: RoleSpec,
    ) -> ControllerResult<ReconcileOutcome> {
        let stamped = role
            .metadata
            .annotation(annotations::CLUSTER_GENERATION)
            .and_then(|g| g.parse::<i64>().ok());
        if stamped != Some(cluster.metadata.generation) {
            debug!(
                stamped = ?stamped,
                generation = cluster.metadata.generation,
                "waiting for cluster to propagate its spec"
            );
            return Ok(ReconcileOutcome::Done);
        }

        let role_replicas = role.desired_replicas();
        let mut replicas_aligned = role.spec.clone();
        replicas_aligned.replicas = canonical.replicas;

        if replicas_aligned == canonical && Some(role_replicas) != canonical.replicas {
            let role_name = role.role_name().to_string();
            let mut updated = cluster;
            if updated.set_role_replicas(&role_name, role_replicas) {
                info!(replicas = role_replicas, "pushing role replicas to cluster");
                self.ctx.store.update_cluster(updated).await?;
                return Ok(ReconcileOutcome::RequeueNow);
            }
        }

        info!("resetting role spec to the cluster's entry");
        let mut reset = role;
        reset.spec = canonical;
        self.ctx.store.update_role(reset).await?;
        Ok(ReconcileOutcome::RequeueNow)
    }

    async fn create_workload(
        &self,
        cluster: &ClusterResource,
        role: &RoleResource,
        desired: i32,
    ) -> ControllerResult<ReconcileOutcome> {
        let role_name = role.role_name().to_string();
        let spec = materialize(
            cluster.name(),
            &role.spec,
            None,
            &self.ctx.settings.default_image,
            desired,
        );
        let metadata = ObjectMeta::new(role.metadata.namespace.clone(), role.metadata.name.clone())
            .with_label(labels::CLUSTER, cluster.name())
            .with_label(labels::ROLE, role_name.clone())
            .with_label(labels::COMPONENT, labels::COMPONENT_POD)
            .with_label(labels::WKA_MEMBER, spec.wka_member.to_string())
            .with_owner(role.as_owner());

        if let Err(e) = self
            .ctx
            .store
            .create_workload(WorkloadResource::new(metadata, spec))
            .await
        {
            self.ctx.recorder.record(Event::warning(
                role.resource_key(),
                reasons::FAILED_CREATE,
                format!(
                    "create workload for role '{}' in cluster '{}' failed: {}",
                    role.metadata.name,
                    cluster.name(),
                    e
                ),
            ));
            return Err(e.into());
        }

        let mut created = role.clone();
        created.status.status = Some(RoleStatus::Created);
        created.status.replicas = desired;
        created.status.selector = Some(role_selector(cluster.name(), &role_name));
        self.ctx.store.update_role_status(created).await?;

        info!(replicas = desired, "created workload");
        self.ctx.recorder.record(Event::normal(
            role.resource_key(),
            reasons::SUCCESSFUL_CREATE,
            format!(
                "created workload for role '{}' in cluster '{}' with {} replicas",
                role.metadata.name,
                cluster.name(),
                desired
            ),
        ));
        Ok(ReconcileOutcome::Done)
    }

    /// Apply `target` (resized to `size`) as the workload's new template.
    async fn upgrade(
        &self,
        role: &RoleResource,
        workload: &WorkloadResource,
        mut target: gridop_api::MaterializedWorkloadSpec,
        size: i32,
    ) -> ControllerResult<()> {
        target.cluster_size = size;
        let mut upgraded = workload.clone();
        upgraded.spec = target;

        if let Err(e) = self.ctx.store.update_workload(upgraded).await {
            self.ctx.recorder.record(Event::warning(
                role.resource_key(),
                reasons::FAILED_UPDATE,
                format!("upgrade of role '{}' failed: {}", role.metadata.name, e),
            ));
            return Err(e.into());
        }

        let mut rolling = role.clone();
        rolling.status.status = Some(RoleStatus::RollingUpgrade);
        rolling.status.replicas = size;
        rolling.status.message = None;
        self.ctx.store.update_role_status(rolling).await?;

        info!(replicas = size, "started rolling upgrade");
        self.ctx.recorder.record(Event::normal(
            role.resource_key(),
            reasons::SUCCESSFUL_UPDATE,
            format!(
                "rolling upgrade of role '{}' at {} replicas",
                role.metadata.name, size
            ),
        ));
        Ok(())
    }

    /// Copy observed workload counts into the role status and the cluster
    /// snapshot. Writes only what changed.
    async fn sync_status(
        &self,
        cluster: &ClusterResource,
        role: &RoleResource,
        workload: &WorkloadResource,
        desired: i32,
    ) -> ControllerResult<()> {
        let mut next = role.clone();
        next.status.replicas = desired;
        next.status.current_replicas = workload.status.current_replicas;
        next.status.ready_replicas = workload.status.ready_replicas;
        next.status.message = None;
        if workload.status.ready_replicas == desired {
            next.status.status = Some(RoleStatus::Ready);
        } else if next.status.status.is_none() {
            next.status.status = Some(RoleStatus::Created);
        }

        if next.status != role.status {
            debug!(
                ready = next.status.ready_replicas,
                current = next.status.current_replicas,
                "syncing role status"
            );
            next = self.ctx.store.update_role_status(next).await?;
        }

        let mut updated = cluster.clone();
        if updated.status.set_role_status(snapshot_of(&next)) {
            self.ctx.store.update_cluster_status(updated).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RoleReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    async fn reconcile(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome> {
        self.reconcile_role(key).await
    }
}
