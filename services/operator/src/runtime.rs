//! Local workload runtime.
//!
//! Stands in for the real workload platform in standalone runs and
//! end-to-end tests: every workload is reported as running exactly
//! `clusterSize` ready members.

use std::sync::Arc;

use gridop_api::{ObjectKey, ResourceKind, WorkloadMember, WorkloadStatus};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::store::{ResourceStore, StoreResult, WatchEvent};

/// Simulated runtime that keeps workload status in step with the spec.
pub struct LocalRuntime {
    store: Arc<dyn ResourceStore>,
    host: String,
}

impl LocalRuntime {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            host: "127.0.0.1".to_string(),
        }
    }

    /// Host reported for every member's management endpoint.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Bring one workload's status in line with its spec.
    ///
    /// Returns true if the status was written.
    pub async fn observe(&self, key: &ObjectKey) -> StoreResult<bool> {
        let Some(workload) = self.store.get_workload(key).await? else {
            return Ok(false);
        };

        let size = workload.spec.cluster_size.max(0);
        let status = WorkloadStatus {
            replicas: size,
            ready_replicas: size,
            current_replicas: size,
            members: (0..size)
                .map(|ordinal| WorkloadMember {
                    name: format!("{}-{}", workload.metadata.name, ordinal),
                    host: self.host.clone(),
                    ready: true,
                })
                .collect(),
        };
        if status == workload.status {
            return Ok(false);
        }

        debug!(workload = %key, size, "[LOCAL] workload converged");
        let mut next = workload;
        next.status = status;
        self.store.update_workload_status(next).await?;
        Ok(true)
    }

    /// Observe every workload once, then follow store changes until
    /// shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting local runtime");
        let mut events = self.store.watch();

        match self.store.list_workloads().await {
            Ok(workloads) => {
                for workload in workloads {
                    let key = ObjectKey::new(workload.metadata.namespace, workload.metadata.name);
                    if let Err(e) = self.observe(&key).await {
                        warn!(workload = %key, error = %e, "[LOCAL] observe failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "[LOCAL] listing workloads failed"),
        }

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(WatchEvent::Applied { key, .. }) if key.kind == ResourceKind::Workload => {
                        let key = key.object_key();
                        if let Err(e) = self.observe(&key).await {
                            warn!(workload = %key, error = %e, "[LOCAL] observe failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "[LOCAL] watch lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Local runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use gridop_api::{MaterializedWorkloadSpec, ObjectMeta, WorkloadResource};

    #[tokio::test]
    async fn reports_cluster_size_members() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_workload(WorkloadResource::new(
                ObjectMeta::new("ns", "c-data"),
                MaterializedWorkloadSpec {
                    cluster: "c".to_string(),
                    role: "data".to_string(),
                    image: "grid:1".to_string(),
                    wka_member: true,
                    storage_enabled: true,
                    config: Default::default(),
                    cluster_size: 3,
                },
            ))
            .await
            .unwrap();

        let runtime = LocalRuntime::new(store.clone());
        let key = ObjectKey::new("ns", "c-data");
        assert!(runtime.observe(&key).await.unwrap());
        assert!(!runtime.observe(&key).await.unwrap());

        let workload = store.get_workload(&key).await.unwrap().unwrap();
        assert_eq!(workload.status.ready_replicas, 3);
        assert_eq!(workload.status.members.len(), 3);
        assert_eq!(workload.status.members[2].name, "c-data-2");
    }
}
