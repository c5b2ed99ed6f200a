//! Reconciliation loop primitives.
//!
//! This library provides the pieces shared by every gridop reconciler:
//!
//! - **Outcomes**: what a single reconcile asks of the dispatcher next
//!   (finished, run again now, run again after a delay).
//! - **Spec hashes**: stable fingerprints of materialized configuration used
//!   to decide whether a change is an upgrade.
//! - **Retry tracking**: per-key failure counting and exponential backoff for
//!   reconciles that return an error.
//!
//! # Invariants
//!
//! - All reconciles are idempotent
//! - Decisions are deterministic given the same inputs
//! - Requeues are signals to the dispatcher, never in-process sleeps

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;
use sha2::{Digest, Sha256};

/// The result of a single successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource is converged (or waiting on an external trigger).
    Done,

    /// Run the reconcile again as soon as possible.
    RequeueNow,

    /// Run the reconcile again after the given delay.
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    /// The delay before the next run, if one was requested.
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            Self::Done => None,
            Self::RequeueNow => Some(Duration::ZERO),
            Self::RequeueAfter(delay) => Some(*delay),
        }
    }
}

/// A spec hash for deterministic comparison.
///
/// Used to detect when a role's materialized configuration has changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Compute a spec hash from canonical JSON with the named top-level
    /// fields removed.
    pub fn from_json_excluding(json: &serde_json::Value, excluded: &[&str]) -> Self {
        match json {
            serde_json::Value::Object(map) => {
                let mut trimmed = map.clone();
                for field in excluded {
                    trimmed.remove(*field);
                }
                Self::from_json(&serde_json::Value::Object(trimmed))
            }
            other => Self::from_json(other),
        }
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Exponential backoff configuration for failed reconciles.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(5 * 60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number (1 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let final_delay = (delay + rand_jitter(jitter_range)).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Uniform jitter in `[-range, range]`.
fn rand_jitter(range: f64) -> f64 {
    if range <= 0.0 {
        return 0.0;
    }
    rand::rng().random_range(-range..=range)
}

/// Retry tracker for failed reconciles.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    /// Failures after which a key is reported as exhausted.
    max_retries: u32,

    /// Retry window duration.
    window: Duration,

    /// Tracked failures: resource_key -> (count, first_failure_time).
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    /// Create a new retry tracker.
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a resource.
    ///
    /// Returns the number of consecutive failures inside the window.
    pub fn record_failure(&mut self, resource_key: &str) -> u32 {
        let now = Instant::now();

        let (count, first) = self
            .failures
            .entry(resource_key.to_string())
            .or_insert((0, now));

        // Reset if outside window
        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count
    }

    /// Number of failures currently tracked for a resource.
    pub fn attempts(&self, resource_key: &str) -> u32 {
        self.failures
            .get(resource_key)
            .map(|(count, _)| *count)
            .unwrap_or(0)
    }

    /// Check if retries are exhausted for a resource.
    pub fn is_exhausted(&self, resource_key: &str) -> bool {
        let Some((count, first)) = self.failures.get(resource_key) else {
            return false;
        };

        let now = Instant::now();
        if now.duration_since(*first) > self.window {
            return false;
        }

        *count > self.max_retries
    }

    /// Clear failure tracking for a resource (on success).
    pub fn clear(&mut self, resource_key: &str) {
        self.failures.remove(resource_key);
    }

    /// Prune expired entries.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

/// Default delay before re-checking StatusHA during safe scaling.
pub const DEFAULT_STATUS_HA_RETRY: Duration = Duration::from_secs(60);

/// Default retry limit before a failing key is reported as exhausted.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default retry window.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_spec_hash_deterministic() {
        let json1 = serde_json::json!({"b": 2, "a": 1});
        let json2 = serde_json::json!({"a": 1, "b": 2});

        let hash1 = SpecHash::from_json(&json1);
        let hash2 = SpecHash::from_json(&json2);

        assert_eq!(hash1, hash2);
        assert!(hash1.as_str().starts_with("sha256:"));
    }

    #[test]
    fn test_spec_hash_excluding_ignores_field() {
        let small = serde_json::json!({"image": "grid:1", "clusterSize": 3});
        let large = serde_json::json!({"image": "grid:1", "clusterSize": 9});
        let upgraded = serde_json::json!({"image": "grid:2", "clusterSize": 3});

        let a = SpecHash::from_json_excluding(&small, &["clusterSize"]);
        let b = SpecHash::from_json_excluding(&large, &["clusterSize"]);
        let c = SpecHash::from_json_excluding(&upgraded, &["clusterSize"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_outcome_requeue_delay() {
        assert_eq!(ReconcileOutcome::Done.requeue_delay(), None);
        assert_eq!(
            ReconcileOutcome::RequeueNow.requeue_delay(),
            Some(Duration::ZERO)
        );
        assert_eq!(
            ReconcileOutcome::RequeueAfter(Duration::from_secs(60)).requeue_delay(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            jitter: 0.2,
        };

        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_retry_tracker() {
        let mut tracker = RetryTracker::new(3, Duration::from_secs(60));

        assert_eq!(tracker.record_failure("role/ns/a"), 1);
        assert_eq!(tracker.record_failure("role/ns/a"), 2);
        assert_eq!(tracker.record_failure("role/ns/a"), 3);
        assert!(!tracker.is_exhausted("role/ns/a"));
        assert_eq!(tracker.record_failure("role/ns/a"), 4);

        assert!(tracker.is_exhausted("role/ns/a"));
        assert!(!tracker.is_exhausted("role/ns/b"));
        assert_eq!(tracker.attempts("role/ns/a"), 4);

        tracker.clear("role/ns/a");
        assert!(!tracker.is_exhausted("role/ns/a"));
        assert_eq!(tracker.attempts("role/ns/a"), 0);
    }

    #[test]
    fn test_retry_tracker_prune_drops_expired() {
        let mut tracker = RetryTracker::new(3, Duration::from_millis(200));
        tracker.record_failure("role/ns/a");
        std::thread::sleep(Duration::from_millis(300));
        tracker.record_failure("role/ns/b");

        tracker.prune();
        assert_eq!(tracker.attempts("role/ns/a"), 0);
        assert_eq!(tracker.attempts("role/ns/b"), 1);
    }

    proptest! {
        #[test]
        fn prop_backoff_never_exceeds_max(attempt in 0u32..200, base_ms in 1u64..2_000) {
            let policy = BackoffPolicy {
                base: Duration::from_millis(base_ms),
                max: Duration::from_secs(30),
                jitter: 0.0,
            };
            prop_assert!(policy.delay(attempt) <= Duration::from_secs(30));
        }

        #[test]
        fn prop_spec_hash_ignores_key_order(a in 0i64..1000, b in "[a-z]{0,12}") {
            let first = serde_json::json!({"size": a, "name": b.clone()});
            let mut map = serde_json::Map::new();
            map.insert("name".to_string(), serde_json::json!(b));
            map.insert("size".to_string(), serde_json::json!(a));
            let second = serde_json::Value::Object(map);
            prop_assert_eq!(SpecHash::from_json(&first), SpecHash::from_json(&second));
        }
    }
}
