//! Fixed-answer health for tests and standalone runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use gridop_api::{RoleResource, WorkloadMember};
use tracing::debug;

use super::{ClusterHealth, HealthError};

/// Reports a configurable StatusHA answer and counts queries. Like the REST
/// checker, it has no answer for a role without members.
#[derive(Debug)]
pub struct StaticHealth {
    ha: AtomicBool,
    fail: AtomicBool,
    calls: AtomicU64,
}

impl StaticHealth {
    pub fn new(ha: bool) -> Self {
        Self {
            ha: AtomicBool::new(ha),
            fail: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_ha(&self, ha: bool) {
        self.ha.store(ha, Ordering::SeqCst);
    }

    /// Make every query return an error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticHealth {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ClusterHealth for StaticHealth {
    async fn is_status_ha(
        &self,
        role: &RoleResource,
        members: &[WorkloadMember],
    ) -> Result<bool, HealthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) || members.is_empty() {
            return Err(HealthError::NoMembers);
        }
        let ha = self.ha.load(Ordering::SeqCst);
        debug!(role = %role.metadata.name, ha, "[STATIC] StatusHA");
        Ok(ha)
    }
}
