//! In-memory store.
//!
//! Used by the integration tests and by the standalone binary. Every write
//! assigns a new global `resource_version` and broadcasts a [`WatchEvent`].
//! Failures can be injected per kind, operation and name to exercise the
//! reconcilers' error paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use gridop_api::{
    ClusterResource, DiscoveryService, ObjectKey, Resource, ResourceKind, RoleResource,
    WorkloadResource,
};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{ResourceStore, StoreError, StoreResult, WatchEvent};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

#[derive(Debug)]
struct InjectedFailure {
    kind: ResourceKind,
    op: StoreOp,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct Tables {
    clusters: BTreeMap<ObjectKey, ClusterResource>,
    roles: BTreeMap<ObjectKey, RoleResource>,
    workloads: BTreeMap<ObjectKey, WorkloadResource>,
    services: BTreeMap<ObjectKey, DiscoveryService>,
    last_version: u64,
}

/// A resource kind with its own table.
trait Tabled: Resource {
    fn table(tables: &Tables) -> &BTreeMap<ObjectKey, Self>;
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self>;
}

impl Tabled for ClusterResource {
    fn table(tables: &Tables) -> &BTreeMap<ObjectKey, Self> {
        &tables.clusters
    }
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self> {
        &mut tables.clusters
    }
}

impl Tabled for RoleResource {
    fn table(tables: &Tables) -> &BTreeMap<ObjectKey, Self> {
        &tables.roles
    }
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self> {
        &mut tables.roles
    }
}

impl Tabled for WorkloadResource {
    fn table(tables: &Tables) -> &BTreeMap<ObjectKey, Self> {
        &tables.workloads
    }
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self> {
        &mut tables.workloads
    }
}

impl Tabled for DiscoveryService {
    fn table(tables: &Tables) -> &BTreeMap<ObjectKey, Self> {
        &tables.services
    }
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ObjectKey, Self> {
        &mut tables.services
    }
}

/// In-memory [`ResourceStore`].
pub struct MemoryStore {
    tables: RwLock<Tables>,
    injected: Mutex<Vec<InjectedFailure>>,
    writes: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            tables: RwLock::new(Tables::default()),
            injected: Mutex::new(Vec::new()),
            writes: AtomicU64::new(0),
            events,
        }
    }

    /// Make the next matching operation fail with `Unavailable`.
    ///
    /// `name` of `None` matches any resource of the kind.
    pub fn fail_next(&self, kind: ResourceKind, op: StoreOp, name: Option<&str>) {
        if let Ok(mut injected) = self.injected.lock() {
            injected.push(InjectedFailure {
                kind,
                op,
                name: name.map(str::to_string),
            });
        }
    }

    /// Number of successful mutations since the store was created.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, kind: ResourceKind, op: StoreOp, name: Option<&str>) -> StoreResult<()> {
        let Ok(mut injected) = self.injected.lock() else {
            return Ok(());
        };
        let position = injected.iter().position(|f| {
            f.kind == kind
                && f.op == op
                && match (&f.name, name) {
                    (None, _) => true,
                    (Some(want), Some(have)) => want == have,
                    (Some(_), None) => false,
                }
        });
        match position {
            Some(index) => {
                injected.remove(index);
                Err(StoreError::Unavailable(format!(
                    "injected {op:?} failure for {kind} {}",
                    name.unwrap_or("*")
                )))
            }
            None => Ok(()),
        }
    }

    fn publish(&self, event: WatchEvent) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(key = %event.key(), "store change");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn get<T: Tabled>(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        self.check(T::KIND, StoreOp::Get, Some(&key.name))?;
        let tables = self.tables.read().await;
        Ok(T::table(&tables).get(key).cloned())
    }

    async fn list<T: Tabled>(&self) -> StoreResult<Vec<T>> {
        self.check(T::KIND, StoreOp::List, None)?;
        let tables = self.tables.read().await;
        Ok(T::table(&tables).values().cloned().collect())
    }

    async fn create<T: Tabled>(&self, mut object: T) -> StoreResult<T> {
        let key = object.key();
        self.check(T::KIND, StoreOp::Create, Some(&key.name))?;

        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        if T::table(tables).contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: T::KIND, key });
        }

        tables.last_version += 1;
        let meta = object.meta_mut();
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = tables.last_version;
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        T::table_mut(tables).insert(key, object.clone());
        drop(guard);

        self.publish(WatchEvent::Applied {
            key: object.resource_key(),
            owner: object.owner_key(),
        });
        Ok(object)
    }

    async fn replace<T: Tabled>(&self, object: T, status_only: bool) -> StoreResult<T> {
        let key = object.key();
        let op = if status_only {
            StoreOp::UpdateStatus
        } else {
            StoreOp::Update
        };
        self.check(T::KIND, op, Some(&key.name))?;

        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(stored) = T::table(tables).get(&key).cloned() else {
            return Err(StoreError::NotFound { kind: T::KIND, key });
        };

        let expected = object.meta().resource_version;
        let actual = stored.meta().resource_version;
        if expected != actual {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                key,
                expected,
                actual,
            });
        }

        tables.last_version += 1;
        let mut updated = if status_only {
            let mut next = stored.clone();
            next.copy_status_from(&object);
            next
        } else {
            let mut next = object;
            next.copy_status_from(&stored);
            let meta = next.meta_mut();
            meta.uid = stored.meta().uid.clone();
            meta.creation_timestamp = stored.meta().creation_timestamp;
            meta.generation = stored.meta().generation + 1;
            next
        };
        updated.meta_mut().resource_version = tables.last_version;
        T::table_mut(tables).insert(key, updated.clone());
        drop(guard);

        self.publish(WatchEvent::Applied {
            key: updated.resource_key(),
            owner: updated.owner_key(),
        });
        Ok(updated)
    }

    async fn remove<T: Tabled>(&self, key: &ObjectKey) -> StoreResult<()> {
        self.check(T::KIND, StoreOp::Delete, Some(&key.name))?;

        let removed = {
            let mut tables = self.tables.write().await;
            T::table_mut(&mut tables).remove(key)
        };

        match removed {
            Some(object) => {
                self.publish(WatchEvent::Deleted {
                    key: object.resource_key(),
                    owner: object.owner_key(),
                });
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: T::KIND,
                key: key.clone(),
            }),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<ClusterResource>> {
        self.get(key).await
    }

    async fn list_clusters(&self) -> StoreResult<Vec<ClusterResource>> {
        self.list().await
    }

    async fn create_cluster(&self, cluster: ClusterResource) -> StoreResult<ClusterResource> {
        self.create(cluster).await
    }

    async fn update_cluster(&self, cluster: ClusterResource) -> StoreResult<ClusterResource> {
        self.replace(cluster, false).await
    }

    async fn update_cluster_status(
        &self,
        cluster: ClusterResource,
    ) -> StoreResult<ClusterResource> {
        self.replace(cluster, true).await
    }

    async fn delete_cluster(&self, key: &ObjectKey) -> StoreResult<()> {
        self.remove::<ClusterResource>(key).await
    }

    async fn get_role(&self, key: &ObjectKey) -> StoreResult<Option<RoleResource>> {
        self.get(key).await
    }

    async fn list_roles(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<RoleResource>> {
        let roles: Vec<RoleResource> = self.list().await?;
        Ok(roles
            .into_iter()
            .filter(|role| namespace.is_none_or(|ns| role.metadata.namespace == ns))
            .filter(|role| role.metadata.matches_labels(selector))
            .collect())
    }

    async fn create_role(&self, role: RoleResource) -> StoreResult<RoleResource> {
        self.create(role).await
    }

    async fn update_role(&self, role: RoleResource) -> StoreResult<RoleResource> {
        self.replace(role, false).await
    }

    async fn update_role_status(&self, role: RoleResource) -> StoreResult<RoleResource> {
        self.replace(role, true).await
    }

    async fn delete_role(&self, key: &ObjectKey) -> StoreResult<()> {
        self.remove::<RoleResource>(key).await
    }

    async fn get_workload(&self, key: &ObjectKey) -> StoreResult<Option<WorkloadResource>> {
        self.get(key).await
    }

    async fn list_workloads(&self) -> StoreResult<Vec<WorkloadResource>> {
        self.list().await
    }

    async fn create_workload(
        &self,
        workload: WorkloadResource,
    ) -> StoreResult<WorkloadResource> {
        self.create(workload).await
    }

    async fn update_workload(
        &self,
        workload: WorkloadResource,
    ) -> StoreResult<WorkloadResource> {
        self.replace(workload, false).await
    }

    async fn update_workload_status(
        &self,
        workload: WorkloadResource,
    ) -> StoreResult<WorkloadResource> {
        self.replace(workload, true).await
    }

    async fn delete_workload(&self, key: &ObjectKey) -> StoreResult<()> {
        self.remove::<WorkloadResource>(key).await
    }

    async fn get_service(&self, key: &ObjectKey) -> StoreResult<Option<DiscoveryService>> {
        self.get(key).await
    }

    async fn list_services(&self) -> StoreResult<Vec<DiscoveryService>> {
        self.list().await
    }

    async fn create_service(&self, service: DiscoveryService) -> StoreResult<DiscoveryService> {
        self.create(service).await
    }

    async fn delete_service(&self, key: &ObjectKey) -> StoreResult<()> {
        self.remove::<DiscoveryService>(key).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridop_api::{ClusterSpec, ObjectMeta};

    fn cluster(name: &str) -> ClusterResource {
        ClusterResource::new(ObjectMeta::new("ns", name), ClusterSpec::default())
    }

    #[tokio::test]
    async fn create_assigns_identity() {
        let store = MemoryStore::new();
        let created = store.create_cluster(cluster("a")).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.resource_version > 0);

        let err = store.create_cluster(cluster("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create_cluster(cluster("a")).await.unwrap();

        let mut first = created.clone();
        first.spec.defaults.replicas = Some(5);
        let updated = store.update_cluster(first).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);

        let mut stale = created;
        stale.spec.defaults.replicas = Some(1);
        let err = store.update_cluster(stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn status_update_keeps_spec_and_generation() {
        let store = MemoryStore::new();
        let created = store.create_cluster(cluster("a")).await.unwrap();

        let mut next = created.clone();
        next.spec.defaults.replicas = Some(9);
        next.status.role_count = 2;
        let updated = store.update_cluster_status(next).await.unwrap();

        assert_eq!(updated.status.role_count, 2);
        assert_eq!(updated.spec.defaults.replicas, None);
        assert_eq!(updated.metadata.generation, 1);
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let store = MemoryStore::new();
        let mut rx = store.watch();

        store.create_cluster(cluster("a")).await.unwrap();
        store
            .delete_cluster(&ObjectKey::new("ns", "a"))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Applied { .. }));
        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Deleted { .. }));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(ResourceKind::Cluster, StoreOp::Create, Some("a"));

        let err = store.create_cluster(cluster("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.create_cluster(cluster("a")).await.is_ok());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .delete_role(&ObjectKey::new("ns", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
