//! StatusHA checks.
//!
//! A role may only lose a storage member when every partitioned service in
//! the cluster has enough backups to survive it. The `ClusterHealth`
//! collaborator answers that question for the scaling engine.

mod fixed;
mod rest;

use async_trait::async_trait;
use gridop_api::{RoleResource, WorkloadMember};
use thiserror::Error;

pub use fixed::StaticHealth;
pub use rest::RestHealthChecker;

/// Errors from a StatusHA query. The scaling engine treats every error as
/// "not HA".
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("no members to query")]
    NoMembers,

    #[error("member {member} is not ready")]
    MemberNotReady { member: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned {status}")]
    Status { url: String, status: u16 },
}

/// Answers whether a role's members can tolerate losing one member.
#[async_trait]
pub trait ClusterHealth: Send + Sync {
    async fn is_status_ha(
        &self,
        role: &RoleResource,
        members: &[WorkloadMember],
    ) -> Result<bool, HealthError>;
}
