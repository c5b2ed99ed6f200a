//! Start quorum evaluation.
//!
//! A role may declare that other roles must be ready (or have a minimum
//! member count) before it is created. Evaluation is a pure function of the
//! rules and the cluster's per-role status snapshot.

use gridop_api::{ClusterStatus, StartQuorum};

/// Outcome of a quorum evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumVerdict {
    pub can_create: bool,
    /// Empty when `can_create` is true.
    pub reason: String,
}

impl QuorumVerdict {
    fn met() -> Self {
        Self {
            can_create: true,
            reason: String::new(),
        }
    }
}

/// Evaluate `rules` against the cluster status.
///
/// A rule with `pod_count > 0` needs at least that many members; otherwise
/// the role must report ready. Roles missing from the status count as not
/// ready with zero members.
pub fn evaluate(rules: &[StartQuorum], status: &ClusterStatus) -> QuorumVerdict {
    let unmet: Vec<String> = rules
        .iter()
        .filter_map(|rule| {
            let snapshot = status.role_status(&rule.role);
            if rule.pod_count > 0 {
                (snapshot.count < rule.pod_count).then(|| {
                    format!(
                        "role '{}' to have {} ready Pods (ready={})",
                        rule.role, rule.pod_count, snapshot.count
                    )
                })
            } else {
                (!snapshot.ready).then(|| format!("role '{}' to be ready", rule.role))
            }
        })
        .collect();

    if unmet.is_empty() {
        return QuorumVerdict::met();
    }

    QuorumVerdict {
        can_create: false,
        reason: format!(
            "Waiting for creation quorum to be met: \"{}\"",
            unmet.join("\" and \"")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridop_api::{RoleStatus, RoleStatusSnapshot};
    use rstest::rstest;

    fn status(entries: &[(&str, bool, i32)]) -> ClusterStatus {
        ClusterStatus {
            roles: entries
                .iter()
                .map(|(name, ready, count)| RoleStatusSnapshot {
                    role_name: name.to_string(),
                    ready: *ready,
                    count: *count,
                    status: if *ready {
                        RoleStatus::Ready
                    } else {
                        RoleStatus::Created
                    },
                    reason: None,
                })
                .collect(),
            role_count: entries.len() as i32,
        }
    }

    fn rule(role: &str, pod_count: i32) -> StartQuorum {
        StartQuorum {
            role: role.to_string(),
            pod_count,
        }
    }

    #[test]
    fn empty_rules_are_met() {
        let verdict = evaluate(&[], &ClusterStatus::default());
        assert_eq!(verdict, QuorumVerdict::met());
    }

    #[rstest]
    #[case(&[("data", true, 3)], true)]
    #[case(&[("data", false, 3)], false)]
    #[case(&[], false)]
    fn readiness_rule(#[case] entries: &[(&str, bool, i32)], #[case] expected: bool) {
        let verdict = evaluate(&[rule("data", 0)], &status(entries));
        assert_eq!(verdict.can_create, expected);
    }

    #[rstest]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, false)]
    fn pod_count_rule(#[case] pod_count: i32, #[case] expected: bool) {
        let verdict = evaluate(&[rule("data", pod_count)], &status(&[("data", false, 2)]));
        assert_eq!(verdict.can_create, expected);
    }

    #[test]
    fn reason_lists_every_unmet_clause() {
        let verdict = evaluate(
            &[rule("data", 0), rule("proxy", 2), rule("web", 0)],
            &status(&[("proxy", false, 1), ("web", true, 1)]),
        );

        assert!(!verdict.can_create);
        assert_eq!(
            verdict.reason,
            "Waiting for creation quorum to be met: \"role 'data' to be ready\" and \
             \"role 'proxy' to have 2 ready Pods (ready=1)\""
        );
    }

    #[test]
    fn unknown_role_reports_zero_ready() {
        let verdict = evaluate(&[rule("data", 2)], &ClusterStatus::default());
        assert_eq!(
            verdict.reason,
            "Waiting for creation quorum to be met: \"role 'data' to have 2 ready Pods (ready=0)\""
        );
    }
}
