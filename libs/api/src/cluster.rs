//! The cluster resource.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    full_role_name, wka_service_name, ObjectMeta, Resource, ResourceKind, RoleSpec, RoleStatus,
};

/// Desired state of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Field values applied to every role that does not set them.
    #[serde(default)]
    pub defaults: RoleSpec,

    /// Roles in declared order. Empty means a single role built from
    /// `defaults`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleSpec>,
}

/// Per-role entry in the cluster status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatusSnapshot {
    pub role_name: String,
    pub ready: bool,
    pub count: i32,
    pub status: RoleStatus,
    /// Why the role is not progressing, e.g. an unmet start quorum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RoleStatusSnapshot {
    /// The snapshot assumed for a role the cluster knows nothing about.
    pub fn unknown(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            ready: false,
            count: 0,
            status: RoleStatus::Waiting,
            reason: None,
        }
    }
}

/// Aggregated cluster status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub roles: Vec<RoleStatusSnapshot>,

    #[serde(default)]
    pub role_count: i32,
}

impl ClusterStatus {
    /// Snapshot for a role, or the unknown-role default.
    pub fn role_status(&self, role_name: &str) -> RoleStatusSnapshot {
        self.roles
            .iter()
            .find(|s| s.role_name == role_name)
            .cloned()
            .unwrap_or_else(|| RoleStatusSnapshot::unknown(role_name))
    }

    /// Insert or replace the snapshot for `snapshot.role_name`.
    ///
    /// Returns true if the status changed.
    pub fn set_role_status(&mut self, snapshot: RoleStatusSnapshot) -> bool {
        match self
            .roles
            .iter_mut()
            .find(|s| s.role_name == snapshot.role_name)
        {
            Some(existing) if *existing == snapshot => false,
            Some(existing) => {
                *existing = snapshot;
                true
            }
            None => {
                self.roles.push(snapshot);
                true
            }
        }
    }

    /// Drop snapshots for roles not in `names`.
    pub fn retain_roles(&mut self, names: &BTreeSet<String>) {
        self.roles.retain(|s| names.contains(&s.role_name));
    }
}

/// A data-grid cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResource {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl ClusterResource {
    pub fn new(metadata: ObjectMeta, spec: ClusterSpec) -> Self {
        Self {
            metadata,
            spec,
            status: ClusterStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The canonical role entries in declared order.
    ///
    /// Each entry is merged over the cluster defaults with `roleName` and
    /// `replicas` made explicit. A later entry repeating an earlier role
    /// name is ignored.
    pub fn desired_roles(&self) -> Vec<RoleSpec> {
        let entries: Vec<RoleSpec> = if self.spec.roles.is_empty() {
            vec![self.spec.defaults.clone()]
        } else {
            self.spec
                .roles
                .iter()
                .map(|role| role.with_defaults(&self.spec.defaults))
                .collect()
        };

        let mut seen = BTreeSet::new();
        entries
            .into_iter()
            .filter_map(|mut spec| {
                let name = spec.role_name().to_string();
                if !seen.insert(name.clone()) {
                    return None;
                }
                spec.replicas = Some(spec.replicas_or_default());
                spec.role_name = Some(name);
                Some(spec)
            })
            .collect()
    }

    /// The canonical entry for one role.
    pub fn canonical_role(&self, role_name: &str) -> Option<RoleSpec> {
        self.desired_roles()
            .into_iter()
            .find(|spec| spec.role_name() == role_name)
    }

    /// Write a replica count into the spec entry for `role_name`.
    ///
    /// Returns false if the cluster declares no such role.
    pub fn set_role_replicas(&mut self, role_name: &str, replicas: i32) -> bool {
        if self.spec.roles.is_empty() {
            if self.spec.defaults.role_name() != role_name {
                return false;
            }
            self.spec.defaults.replicas = Some(replicas);
            return true;
        }

        let defaults = self.spec.defaults.clone();
        match self
            .spec
            .roles
            .iter_mut()
            .find(|role| role.with_defaults(&defaults).role_name() == role_name)
        {
            Some(role) => {
                role.replicas = Some(replicas);
                true
            }
            None => false,
        }
    }

    pub fn full_role_name(&self, role_name: &str) -> String {
        full_role_name(self.name(), role_name)
    }

    pub fn wka_service_name(&self) -> String {
        wka_service_name(self.name())
    }
}

impl Resource for ClusterResource {
    const KIND: ResourceKind = ResourceKind::Cluster;

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
