//! Declarative store interface.
//!
//! The store holds every resource the operator reads or writes. Writes are
//! optimistic: an update carrying a stale `resource_version` is rejected
//! with [`StoreError::Conflict`] and the reconcile is retried.
//!
//! Status updates only replace the status sub-object. Spec updates keep the
//! stored status and bump `metadata.generation`.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use gridop_api::{
    ClusterResource, DiscoveryService, ObjectKey, ResourceKey, ResourceKind, RoleResource,
    WorkloadResource,
};
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::{MemoryStore, StoreOp};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// A change notification from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A resource was created or updated.
    Applied {
        key: ResourceKey,
        owner: Option<ResourceKey>,
    },
    /// A resource was deleted.
    Deleted {
        key: ResourceKey,
        owner: Option<ResourceKey>,
    },
}

impl WatchEvent {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Applied { key, .. } | Self::Deleted { key, .. } => key,
        }
    }

    pub fn owner(&self) -> Option<&ResourceKey> {
        match self {
            Self::Applied { owner, .. } | Self::Deleted { owner, .. } => owner.as_ref(),
        }
    }
}

/// Read and write access to the declarative store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // Clusters
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<ClusterResource>>;
    async fn list_clusters(&self) -> StoreResult<Vec<ClusterResource>>;
    async fn create_cluster(&self, cluster: ClusterResource) -> StoreResult<ClusterResource>;
    async fn update_cluster(&self, cluster: ClusterResource) -> StoreResult<ClusterResource>;
    async fn update_cluster_status(&self, cluster: ClusterResource)
        -> StoreResult<ClusterResource>;
    async fn delete_cluster(&self, key: &ObjectKey) -> StoreResult<()>;

    // Roles
    async fn get_role(&self, key: &ObjectKey) -> StoreResult<Option<RoleResource>>;
    /// List roles in `namespace` (all namespaces when `None`) carrying every
    /// label in `selector`.
    async fn list_roles(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<RoleResource>>;
    async fn create_role(&self, role: RoleResource) -> StoreResult<RoleResource>;
    async fn update_role(&self, role: RoleResource) -> StoreResult<RoleResource>;
    async fn update_role_status(&self, role: RoleResource) -> StoreResult<RoleResource>;
    async fn delete_role(&self, key: &ObjectKey) -> StoreResult<()>;

    // Workloads
    async fn get_workload(&self, key: &ObjectKey) -> StoreResult<Option<WorkloadResource>>;
    async fn list_workloads(&self) -> StoreResult<Vec<WorkloadResource>>;
    async fn create_workload(&self, workload: WorkloadResource)
        -> StoreResult<WorkloadResource>;
    async fn update_workload(&self, workload: WorkloadResource)
        -> StoreResult<WorkloadResource>;
    async fn update_workload_status(
        &self,
        workload: WorkloadResource,
    ) -> StoreResult<WorkloadResource>;
    async fn delete_workload(&self, key: &ObjectKey) -> StoreResult<()>;

    // Discovery services
    async fn get_service(&self, key: &ObjectKey) -> StoreResult<Option<DiscoveryService>>;
    async fn list_services(&self) -> StoreResult<Vec<DiscoveryService>>;
    async fn create_service(&self, service: DiscoveryService) -> StoreResult<DiscoveryService>;
    async fn delete_service(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
