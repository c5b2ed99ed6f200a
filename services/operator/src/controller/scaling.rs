//! Scaling engine.
//!
//! Applies one size change to a role's workload under the role's scaling
//! policy:
//! - `Parallel` writes the target size in one step
//! - `Safe` moves one member at a time and only while StatusHA holds
//! - `ParallelUpSafeDown` grows in parallel and shrinks safely
//!
//! The role's status moves to `Scaling` only after the workload size write
//! succeeded. A step held back by StatusHA is recorded in the status message.

use gridop_api::{Resource, RoleResource, RoleStatus, ScalingPolicy, WorkloadResource};
use gridop_reconcile::ReconcileOutcome;
use tracing::{info, instrument, warn};

use super::Context;
use crate::error::ControllerResult;
use crate::events::{reasons, Event};

/// The policy that governs a single step from `current` towards `desired`.
pub fn step_policy(policy: ScalingPolicy, current: i32, desired: i32) -> ScalingPolicy {
    match policy {
        ScalingPolicy::ParallelUpSafeDown if desired > current => ScalingPolicy::Parallel,
        ScalingPolicy::ParallelUpSafeDown => ScalingPolicy::Safe,
        other => other,
    }
}

/// The size after one step.
pub fn next_step(policy: ScalingPolicy, current: i32, desired: i32) -> i32 {
    match step_policy(policy, current, desired) {
        ScalingPolicy::Parallel => desired,
        _ => match desired.cmp(&current) {
            std::cmp::Ordering::Greater => current + 1,
            std::cmp::Ordering::Less => current - 1,
            std::cmp::Ordering::Equal => current,
        },
    }
}

/// Applies replica changes to workloads.
#[derive(Clone)]
pub struct ScalingEngine {
    ctx: Context,
}

impl ScalingEngine {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Move `workload` from `current` towards `desired`.
    ///
    /// Returns `Done` once the step reached `desired`, or a delayed requeue
    /// when further safe steps (or a StatusHA re-check) are needed.
    #[instrument(skip_all, fields(role = %role.metadata.name, current, desired))]
    pub async fn scale(
        &self,
        role: &RoleResource,
        workload: &WorkloadResource,
        current: i32,
        desired: i32,
    ) -> ControllerResult<ReconcileOutcome> {
        if current == desired {
            return Ok(ReconcileOutcome::Done);
        }

        let policy = role.spec.effective_scaling_policy();
        match step_policy(policy, current, desired) {
            ScalingPolicy::Parallel => {
                self.apply(role, workload, current, desired).await?;
                Ok(ReconcileOutcome::Done)
            }
            _ => self.scale_safely(role, workload, current, desired).await,
        }
    }

    async fn scale_safely(
        &self,
        role: &RoleResource,
        workload: &WorkloadResource,
        current: i32,
        desired: i32,
    ) -> ControllerResult<ReconcileOutcome> {
        let retry = self.ctx.settings.status_ha_retry;
        let target = next_step(ScalingPolicy::Safe, current, desired);

        if !self.is_status_ha(role, workload, current).await {
            info!(
                retry_secs = retry.as_secs(),
                "role is not StatusHA, deferring scale"
            );
            let message =
                format!("waiting for StatusHA before scaling from {current} to {target}");
            self.record_blocked(role, message).await?;
            return Ok(ReconcileOutcome::RequeueAfter(retry));
        }

        self.apply(role, workload, current, target).await?;

        if target == desired {
            Ok(ReconcileOutcome::Done)
        } else {
            Ok(ReconcileOutcome::RequeueAfter(retry))
        }
    }

    /// Write `message` to the role status unless it is already there.
    async fn record_blocked(&self, role: &RoleResource, message: String) -> ControllerResult<()> {
        if role.status.message.as_deref() == Some(message.as_str()) {
            return Ok(());
        }
        let mut blocked = role.clone();
        blocked.status.message = Some(message);
        self.ctx.store.update_role_status(blocked).await?;
        Ok(())
    }

    /// StatusHA with the single-member shortcut. Errors and timeouts count
    /// as not HA.
    async fn is_status_ha(&self, role: &RoleResource, workload: &WorkloadResource, current: i32) -> bool {
        if current <= 1 {
            return true;
        }

        let timeout = role
            .spec
            .scaling_probe_timeout()
            .unwrap_or(self.ctx.settings.health_timeout);
        let query = self
            .ctx
            .health
            .is_status_ha(role, &workload.status.members);
        match tokio::time::timeout(timeout, query).await {
            Ok(Ok(ha)) => ha,
            Ok(Err(e)) => {
                warn!(error = %e, "StatusHA check failed");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "StatusHA check timed out");
                false
            }
        }
    }

    /// Write the workload size, then the role status, then the event.
    async fn apply(
        &self,
        role: &RoleResource,
        workload: &WorkloadResource,
        from: i32,
        to: i32,
    ) -> ControllerResult<()> {
        let mut resized = workload.clone();
        resized.spec.cluster_size = to;

        if let Err(e) = self.ctx.store.update_workload(resized).await {
            self.ctx.recorder.record(Event::warning(
                role.resource_key(),
                reasons::FAILED_UPDATE,
                format!(
                    "failed to scale role '{}' from {} to {}: {}",
                    role.metadata.name, from, to, e
                ),
            ));
            return Err(e.into());
        }

        let mut scaling = role.clone();
        scaling.status.status = Some(RoleStatus::Scaling);
        scaling.status.replicas = to;
        scaling.status.message = None;
        self.ctx.store.update_role_status(scaling).await?;

        info!(from, to, "scaled role");
        self.ctx.recorder.record(Event::normal(
            role.resource_key(),
            reasons::SCALING,
            format!("scaled role '{}' from {} to {}", role.metadata.name, from, to),
        ));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(ScalingPolicy::Parallel, 3, 7, 7)]
    #[case(ScalingPolicy::Parallel, 7, 3, 3)]
    #[case(ScalingPolicy::Safe, 3, 7, 4)]
    #[case(ScalingPolicy::Safe, 7, 3, 6)]
    #[case(ScalingPolicy::ParallelUpSafeDown, 3, 7, 7)]
    #[case(ScalingPolicy::ParallelUpSafeDown, 7, 3, 6)]
    fn one_step(
        #[case] policy: ScalingPolicy,
        #[case] current: i32,
        #[case] desired: i32,
        #[case] expected: i32,
    ) {
        assert_eq!(next_step(policy, current, desired), expected);
    }

    proptest! {
        #[test]
        fn prop_safe_step_moves_one_towards_desired(current in 0i32..100, desired in 0i32..100) {
            let next = next_step(ScalingPolicy::Safe, current, desired);
            prop_assert!((next - current).abs() <= 1);
            prop_assert!((desired - next).abs() <= (desired - current).abs());
            if current != desired {
                prop_assert_eq!((next - current).abs(), 1);
            }
        }

        #[test]
        fn prop_parallel_reaches_desired(current in 0i32..100, desired in 0i32..100) {
            prop_assert_eq!(next_step(ScalingPolicy::Parallel, current, desired), desired);
        }
    }
}
