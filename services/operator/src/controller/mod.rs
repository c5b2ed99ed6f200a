//! Reconcilers.
//!
//! The controller layer is responsible for:
//! - Diffing a cluster's declared roles against the role resources that exist
//! - Gating role creation on start quorum
//! - Deciding, per role, between upgrade, scale and status sync
//! - Applying size changes under the role's scaling policy
//!
//! Every reconcile re-reads the store, makes at most one coherent change per
//! object and reports what should happen next through a `ReconcileOutcome`.

mod cluster;
pub mod materialize;
pub mod quorum;
mod role;
pub mod scaling;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridop_api::{ObjectKey, ResourceKind};
use gridop_reconcile::{ReconcileOutcome, DEFAULT_STATUS_HA_RETRY};

use crate::config::DEFAULT_IMAGE;
use crate::error::ControllerResult;
use crate::events::EventRecorder;
use crate::health::ClusterHealth;
use crate::store::ResourceStore;

pub use cluster::ClusterReconciler;
pub use role::RoleReconciler;
pub use scaling::ScalingEngine;

/// Tunables shared by the reconcilers.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Delay before re-checking StatusHA during a safe scale.
    pub status_ha_retry: Duration,
    /// Upper bound on a single StatusHA query.
    pub health_timeout: Duration,
    /// Image used when a role does not name one.
    pub default_image: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            status_ha_retry: DEFAULT_STATUS_HA_RETRY,
            health_timeout: Duration::from_secs(10),
            default_image: DEFAULT_IMAGE.to_string(),
        }
    }
}

/// Collaborators handed to every reconciler.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub recorder: Arc<dyn EventRecorder>,
    pub health: Arc<dyn ClusterHealth>,
    pub settings: ControllerSettings,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        health: Arc<dyn ClusterHealth>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            recorder,
            health,
            settings,
        }
    }
}

/// A reconciler for one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The kind of key this reconciler handles.
    fn kind(&self) -> ResourceKind;

    /// Converge the resource named by `key` one step.
    async fn reconcile(&self, key: &ObjectKey) -> ControllerResult<ReconcileOutcome>;
}
