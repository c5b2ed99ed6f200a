//! Role specification and the role resource.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    labels, ObjectMeta, Resource, ResourceKind, RoleStatus, ScalingPolicy, DEFAULT_REPLICAS,
    DEFAULT_ROLE_NAME,
};

/// A dependency that must be satisfied before a role may be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuorum {
    /// Short name of the role depended on.
    pub role: String,

    /// Minimum ready member count. Zero means "the role reports ready".
    #[serde(default, alias = "minReadyCount")]
    pub pod_count: i32,
}

/// Per-role overrides for the StatusHA check that gates safe scaling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingProbe {
    /// Management port queried on each member. Falls back to the operator's
    /// configured port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ScalingProbe {
    /// The check timeout, if set to a positive number of seconds.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Specification of one role. Every field is nullable so that a role entry
/// can be layered over the cluster defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_policy: Option<ScalingPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Opaque materialization inputs (environment, ports, JVM options).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wka_member: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_quorum: Vec<StartQuorum>,

    /// Partitioned services allowed to report `ENDANGERED` during StatusHA
    /// checks.
    #[serde(
        default,
        rename = "allowEndangeredForStatusHA",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub allow_endangered_for_status_ha: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_probe: Option<ScalingProbe>,
}

impl RoleSpec {
    /// The role name, defaulting to `storage`.
    pub fn role_name(&self) -> &str {
        self.role_name.as_deref().unwrap_or(DEFAULT_ROLE_NAME)
    }

    pub fn replicas_or_default(&self) -> i32 {
        self.replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    /// Members join the well-known-address list unless told otherwise.
    pub fn is_wka_member(&self) -> bool {
        self.wka_member.unwrap_or(true)
    }

    /// Management port override for StatusHA checks.
    pub fn scaling_probe_port(&self) -> Option<u16> {
        self.scaling_probe.as_ref().and_then(|probe| probe.port)
    }

    /// StatusHA timeout override.
    pub fn scaling_probe_timeout(&self) -> Option<Duration> {
        self.scaling_probe.as_ref().and_then(ScalingProbe::timeout)
    }

    /// The scaling policy to apply. When unset, storage-enabled roles (or
    /// roles that do not say) scale safely and storage-disabled roles scale in
    /// parallel.
    pub fn effective_scaling_policy(&self) -> ScalingPolicy {
        match self.scaling_policy {
            Some(policy) => policy,
            None if self.storage_enabled.unwrap_or(true) => ScalingPolicy::Safe,
            None => ScalingPolicy::Parallel,
        }
    }

    /// Layer this spec over `defaults`: fields set here win, the config map
    /// is overlaid key by key.
    pub fn with_defaults(&self, defaults: &RoleSpec) -> RoleSpec {
        let mut config = defaults.config.clone();
        config.extend(self.config.iter().map(|(k, v)| (k.clone(), v.clone())));

        RoleSpec {
            role_name: self.role_name.clone().or_else(|| defaults.role_name.clone()),
            replicas: self.replicas.or(defaults.replicas),
            scaling_policy: self.scaling_policy.or(defaults.scaling_policy),
            storage_enabled: self.storage_enabled.or(defaults.storage_enabled),
            image: self.image.clone().or_else(|| defaults.image.clone()),
            config,
            wka_member: self.wka_member.or(defaults.wka_member),
            start_quorum: if self.start_quorum.is_empty() {
                defaults.start_quorum.clone()
            } else {
                self.start_quorum.clone()
            },
            allow_endangered_for_status_ha: if self.allow_endangered_for_status_ha.is_empty() {
                defaults.allow_endangered_for_status_ha.clone()
            } else {
                self.allow_endangered_for_status_ha.clone()
            },
            scaling_probe: self
                .scaling_probe
                .clone()
                .or_else(|| defaults.scaling_probe.clone()),
        }
    }
}

/// Observed status of a role resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoleStatus>,

    /// Size most recently written to the workload.
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub current_replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Set while the role is blocked, cleared once it progresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A role materialized as its own resource, owned by a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResource {
    pub metadata: ObjectMeta,
    pub spec: RoleSpec,
    #[serde(default)]
    pub status: RoleResourceStatus,
}

impl RoleResource {
    pub fn new(metadata: ObjectMeta, spec: RoleSpec) -> Self {
        Self {
            metadata,
            spec,
            status: RoleResourceStatus::default(),
        }
    }

    /// Name of the owning cluster, read from the cluster label.
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata.label(labels::CLUSTER)
    }

    /// Short role name.
    pub fn role_name(&self) -> &str {
        self.metadata
            .label(labels::ROLE)
            .unwrap_or_else(|| self.spec.role_name())
    }

    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas_or_default()
    }
}

impl Resource for RoleResource {
    const KIND: ResourceKind = ResourceKind::Role;

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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None, ScalingPolicy::Safe)]
    #[case(None, Some(true), ScalingPolicy::Safe)]
    #[case(None, Some(false), ScalingPolicy::Parallel)]
    #[case(Some(ScalingPolicy::ParallelUpSafeDown), Some(false), ScalingPolicy::ParallelUpSafeDown)]
    fn policy_resolution(
        #[case] policy: Option<ScalingPolicy>,
        #[case] storage: Option<bool>,
        #[case] expected: ScalingPolicy,
    ) {
        let spec = RoleSpec {
            scaling_policy: policy,
            storage_enabled: storage,
            ..Default::default()
        };
        assert_eq!(spec.effective_scaling_policy(), expected);
    }

    #[test]
    fn role_fields_override_defaults() {
        let mut defaults = RoleSpec {
            replicas: Some(5),
            image: Some("grid:1".to_string()),
            ..Default::default()
        };
        defaults
            .config
            .insert("jvm".to_string(), serde_json::json!("-Xmx1g"));
        defaults
            .config
            .insert("log".to_string(), serde_json::json!(5));

        let mut role = RoleSpec {
            role_name: Some("data".to_string()),
            replicas: Some(2),
            ..Default::default()
        };
        role.config
            .insert("jvm".to_string(), serde_json::json!("-Xmx4g"));

        let merged = role.with_defaults(&defaults);
        assert_eq!(merged.role_name(), "data");
        assert_eq!(merged.replicas, Some(2));
        assert_eq!(merged.image.as_deref(), Some("grid:1"));
        assert_eq!(merged.config["jvm"], serde_json::json!("-Xmx4g"));
        assert_eq!(merged.config["log"], serde_json::json!(5));
    }

    #[test]
    fn defaults_when_unset() {
        let spec = RoleSpec::default();
        assert_eq!(spec.role_name(), "storage");
        assert_eq!(spec.replicas_or_default(), 3);
        assert!(spec.is_wka_member());
    }

    #[test]
    fn start_quorum_wire_form() {
        let spec: RoleSpec = serde_json::from_value(serde_json::json!({
            "roleName": "proxy",
            "startQuorum": [
                {"role": "data"},
                {"role": "web", "podCount": 2},
                {"role": "cache", "minReadyCount": 5}
            ]
        }))
        .unwrap();

        assert_eq!(spec.start_quorum[0].pod_count, 0);
        assert_eq!(spec.start_quorum[1].pod_count, 2);
        assert_eq!(spec.start_quorum[2].pod_count, 5);
    }

    #[test]
    fn scaling_probe_layers_over_defaults() {
        let defaults: RoleSpec = serde_json::from_value(serde_json::json!({
            "scalingProbe": {"port": 31000, "timeoutSeconds": 5}
        }))
        .unwrap();
        let role = RoleSpec {
            role_name: Some("data".to_string()),
            ..Default::default()
        };

        let merged = role.with_defaults(&defaults);
        assert_eq!(merged.scaling_probe_port(), Some(31000));
        assert_eq!(merged.scaling_probe_timeout(), Some(Duration::from_secs(5)));

        let zero = ScalingProbe {
            timeout_seconds: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.timeout(), None);
        assert_eq!(RoleSpec::default().scaling_probe_port(), None);
    }
}
