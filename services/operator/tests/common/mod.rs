//! Shared fixtures for the operator integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gridop_api::{
    full_role_name, ClusterResource, ClusterSpec, ObjectKey, ObjectMeta, RoleResource,
    WorkloadResource,
};
use gridop_operator::controller::{
    ClusterReconciler, Context, ControllerSettings, Reconciler, RoleReconciler,
};
use gridop_operator::error::ControllerResult;
use gridop_operator::events::MemoryRecorder;
use gridop_operator::health::{ClusterHealth, StaticHealth};
use gridop_operator::runtime::LocalRuntime;
use gridop_operator::store::{MemoryStore, ResourceStore};
use gridop_reconcile::ReconcileOutcome;

pub const NS: &str = "test-ns";
pub const CLUSTER: &str = "test-cluster";

/// Reconcilers wired to an in-memory store, driven by hand.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub recorder: Arc<MemoryRecorder>,
    pub health: Arc<StaticHealth>,
    pub clusters: ClusterReconciler,
    pub roles: RoleReconciler,
    pub runtime: LocalRuntime,
}

pub fn settings() -> ControllerSettings {
    ControllerSettings {
        status_ha_retry: Duration::from_secs(60),
        health_timeout: Duration::from_millis(200),
        default_image: "grid:default".to_string(),
    }
}

impl Harness {
    pub fn new() -> Self {
        let health = Arc::new(StaticHealth::new(true));
        Self::build(health.clone(), health)
    }

    /// A harness whose scaling engine consults `health`.
    pub fn with_health(health: Arc<dyn ClusterHealth>) -> Self {
        Self::build(Arc::new(StaticHealth::new(true)), health)
    }

    fn build(static_health: Arc<StaticHealth>, health: Arc<dyn ClusterHealth>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(MemoryRecorder::new());
        let ctx = Context::new(store.clone(), recorder.clone(), health, settings());

        Self {
            clusters: ClusterReconciler::new(ctx.clone()),
            roles: RoleReconciler::new(ctx),
            runtime: LocalRuntime::new(store.clone()),
            store,
            recorder,
            health: static_health,
        }
    }

    pub async fn create_cluster(&self, spec: serde_json::Value) -> ClusterResource {
        let spec: ClusterSpec = serde_json::from_value(spec).unwrap();
        self.store
            .create_cluster(ClusterResource::new(ObjectMeta::new(NS, CLUSTER), spec))
            .await
            .unwrap()
    }

    pub async fn cluster(&self) -> ClusterResource {
        self.store
            .get_cluster(&ObjectKey::new(NS, CLUSTER))
            .await
            .unwrap()
            .unwrap()
    }

    /// Read-modify-write the cluster spec.
    pub async fn edit_cluster(&self, edit: impl FnOnce(&mut ClusterSpec)) -> ClusterResource {
        let mut cluster = self.cluster().await;
        edit(&mut cluster.spec);
        self.store.update_cluster(cluster).await.unwrap()
    }

    pub async fn reconcile_cluster(&self) -> ControllerResult<ReconcileOutcome> {
        self.clusters
            .reconcile(&ObjectKey::new(NS, CLUSTER))
            .await
    }

    pub async fn reconcile_role(&self, role: &str) -> ControllerResult<ReconcileOutcome> {
        self.roles
            .reconcile(&ObjectKey::new(NS, full_role_name(CLUSTER, role)))
            .await
    }

    pub async fn role(&self, role: &str) -> Option<RoleResource> {
        self.store
            .get_role(&ObjectKey::new(NS, full_role_name(CLUSTER, role)))
            .await
            .unwrap()
    }

    pub async fn workload(&self, role: &str) -> Option<WorkloadResource> {
        self.store
            .get_workload(&ObjectKey::new(NS, full_role_name(CLUSTER, role)))
            .await
            .unwrap()
    }

    /// Let the local runtime catch up with the role's workload.
    pub async fn observe(&self, role: &str) {
        self.runtime
            .observe(&ObjectKey::new(NS, full_role_name(CLUSTER, role)))
            .await
            .unwrap();
    }

    /// Reconcile a role (with the runtime observing in between) until a
    /// pass finishes without writing anything.
    pub async fn settle_role(&self, role: &str) {
        for _ in 0..30 {
            let before = self.store.write_count();
            let outcome = self.reconcile_role(role).await.unwrap();
            self.observe(role).await;
            if outcome == ReconcileOutcome::Done && self.store.write_count() == before {
                return;
            }
        }
        panic!("role {role} did not settle");
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
