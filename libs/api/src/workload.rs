//! Workloads backing roles, and the discovery service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{labels, ObjectMeta, Resource, ResourceKind, WKA_PORT, WKA_PORT_NAME};

/// The last-applied template for a role's workload.
///
/// Everything except `cluster_size` feeds the upgrade fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedWorkloadSpec {
    pub cluster: String,
    pub role: String,
    pub image: String,
    pub wka_member: bool,
    pub storage_enabled: bool,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    pub cluster_size: i32,
}

/// One running member of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMember {
    pub name: String,
    /// Host the member's management endpoint listens on.
    pub host: String,
    pub ready: bool,
}

/// Observed status of a workload, written by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<WorkloadMember>,
}

/// The runtime workload for one role. Named after the role resource and
/// owned by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResource {
    pub metadata: ObjectMeta,
    pub spec: MaterializedWorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl WorkloadResource {
    pub fn new(metadata: ObjectMeta, spec: MaterializedWorkloadSpec) -> Self {
        Self {
            metadata,
            spec,
            status: WorkloadStatus::default(),
        }
    }
}

impl Resource for WorkloadResource {
    const KIND: ResourceKind = ResourceKind::Workload;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

/// Headless service listing the well-known-address members of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryService {
    pub metadata: ObjectMeta,
    pub headless: bool,
    pub port_name: String,
    pub port: u16,
    pub selector: BTreeMap<String, String>,
}

impl DiscoveryService {
    /// The discovery service for `cluster`, named `<cluster>-wka`.
    pub fn for_cluster(namespace: &str, cluster: &str) -> Self {
        let metadata = ObjectMeta::new(namespace, crate::wka_service_name(cluster))
            .with_label(labels::CLUSTER, cluster)
            .with_label(labels::COMPONENT_LABEL, labels::WKA_SERVICE);

        let selector = BTreeMap::from([
            (labels::CLUSTER.to_string(), cluster.to_string()),
            (labels::COMPONENT.to_string(), labels::COMPONENT_POD.to_string()),
            (labels::WKA_MEMBER.to_string(), "true".to_string()),
        ]);

        Self {
            metadata,
            headless: true,
            port_name: WKA_PORT_NAME.to_string(),
            port: WKA_PORT,
            selector,
        }
    }
}

impl Resource for DiscoveryService {
    const KIND: ResourceKind = ResourceKind::Service;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    // Services have no status.
    fn copy_status_from(&mut self, _other: &Self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_service_shape() {
        let svc = DiscoveryService::for_cluster("ns", "test-cluster");

        assert_eq!(svc.metadata.name, "test-cluster-wka");
        assert!(svc.headless);
        assert_eq!(svc.port_name, "coherence");
        assert_eq!(svc.port, 7);
        assert_eq!(svc.selector["coherenceCluster"], "test-cluster");
        assert_eq!(svc.selector["component"], "coherencePod");
        assert_eq!(svc.selector["coherenceWKAMember"], "true");
    }

    #[test]
    fn workload_spec_uses_camel_case() {
        let spec = MaterializedWorkloadSpec {
            cluster: "c".to_string(),
            role: "data".to_string(),
            image: "grid:1".to_string(),
            wka_member: true,
            storage_enabled: true,
            config: BTreeMap::new(),
            cluster_size: 3,
        };
        let json = serde_json::to_value(&spec).unwrap();

        assert_eq!(json["clusterSize"], 3);
        assert_eq!(json["wkaMember"], true);
    }
}
