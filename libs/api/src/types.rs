//! Shared constants, status enums and naming helpers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ApiError;

// =============================================================================
// Labels and Annotations
// =============================================================================

/// Label keys written on every resource the operator owns.
pub mod labels {
    /// The owning cluster name.
    pub const CLUSTER: &str = "coherenceCluster";
    /// The role name (short form, without the cluster prefix).
    pub const ROLE: &str = "coherenceRole";
    /// Marks operator-managed infrastructure such as the discovery service.
    pub const COMPONENT_LABEL: &str = "coherenceComponent";
    /// Pod component label used by the discovery selector.
    pub const COMPONENT: &str = "component";
    /// Value of `component` on data-grid member pods.
    pub const COMPONENT_POD: &str = "coherencePod";
    /// Set to "true" on members that join the well-known-address list.
    pub const WKA_MEMBER: &str = "coherenceWKAMember";
    /// Value of `coherenceComponent` on the discovery service.
    pub const WKA_SERVICE: &str = "coherenceWkaService";
}

/// Annotation keys.
pub mod annotations {
    /// The cluster `metadata.generation` a role spec was last written from.
    pub const CLUSTER_GENERATION: &str = "gridop.io/cluster-generation";
}

// =============================================================================
// Defaults
// =============================================================================

/// Replica count used when neither the role nor the cluster defaults set one.
pub const DEFAULT_REPLICAS: i32 = 3;

/// Role name used when a role spec leaves it unset.
pub const DEFAULT_ROLE_NAME: &str = "storage";

/// Suffix appended to a cluster name to form the discovery service name.
pub const WKA_SERVICE_SUFFIX: &str = "-wka";

/// Name of the single port exposed by the discovery service.
pub const WKA_PORT_NAME: &str = "coherence";

/// Port number exposed by the discovery service.
pub const WKA_PORT: u16 = 7;

/// Full role resource name: `<cluster>-<role>`.
pub fn full_role_name(cluster: &str, role: &str) -> String {
    format!("{cluster}-{role}")
}

/// Discovery service name: `<cluster>-wka`.
pub fn wka_service_name(cluster: &str) -> String {
    format!("{cluster}{WKA_SERVICE_SUFFIX}")
}

/// Label selector string for a role's members.
pub fn role_selector(cluster: &str, role: &str) -> String {
    format!(
        "{}={cluster},{}={role}",
        labels::CLUSTER,
        labels::ROLE
    )
}

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle status of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleStatus {
    Created,
    Scaling,
    RollingUpgrade,
    Ready,
    Failed,
    /// Recorded in the cluster snapshot while creation waits on quorum.
    Waiting,
}

impl RoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Scaling => "Scaling",
            Self::RollingUpgrade => "RollingUpgrade",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Waiting => "Waiting",
        }
    }
}

impl fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Scaling" => Ok(Self::Scaling),
            "RollingUpgrade" => Ok(Self::RollingUpgrade),
            "Ready" => Ok(Self::Ready),
            "Failed" => Ok(Self::Failed),
            "Waiting" => Ok(Self::Waiting),
            other => Err(ApiError::UnknownRoleStatus(other.to_string())),
        }
    }
}

/// How replica changes are applied to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalingPolicy {
    /// One member at a time, gated on StatusHA.
    Safe,
    /// Jump straight to the target size.
    Parallel,
    /// Parallel when growing, safe when shrinking.
    ParallelUpSafeDown,
}

impl ScalingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::Parallel => "Parallel",
            Self::ParallelUpSafeDown => "ParallelUpSafeDown",
        }
    }
}

impl fmt::Display for ScalingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalingPolicy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Safe" => Ok(Self::Safe),
            "Parallel" => Ok(Self::Parallel),
            "ParallelUpSafeDown" => Ok(Self::ParallelUpSafeDown),
            other => Err(ApiError::UnknownScalingPolicy(other.to_string())),
        }
    }
}

/// The kinds of resource the operator reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    Role,
    Workload,
    Service,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Role => "role",
            Self::Workload => "workload",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Self::Cluster),
            "role" => Ok(Self::Role),
            "workload" => Ok(Self::Workload),
            "service" => Ok(Self::Service),
            other => Err(ApiError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RoleStatus::Created, "\"Created\"")]
    #[case(RoleStatus::RollingUpgrade, "\"RollingUpgrade\"")]
    #[case(RoleStatus::Waiting, "\"Waiting\"")]
    fn role_status_wire_form(#[case] status: RoleStatus, #[case] json: &str) {
        assert_eq!(serde_json::to_string(&status).unwrap(), json);
        assert_eq!(status.as_str().parse::<RoleStatus>().unwrap(), status);
    }

    #[rstest]
    #[case("Safe", ScalingPolicy::Safe)]
    #[case("Parallel", ScalingPolicy::Parallel)]
    #[case("ParallelUpSafeDown", ScalingPolicy::ParallelUpSafeDown)]
    fn scaling_policy_parses(#[case] raw: &str, #[case] expected: ScalingPolicy) {
        assert_eq!(raw.parse::<ScalingPolicy>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert_eq!(
            "Fast".parse::<ScalingPolicy>(),
            Err(ApiError::UnknownScalingPolicy("Fast".to_string()))
        );
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(full_role_name("test-cluster", "data"), "test-cluster-data");
        assert_eq!(wka_service_name("test-cluster"), "test-cluster-wka");
        assert_eq!(
            role_selector("test-cluster", "data"),
            "coherenceCluster=test-cluster,coherenceRole=data"
        );
    }
}
