//! Materialization of a role spec into a workload spec, and upgrade
//! detection.
//!
//! A role change is an upgrade when the materialized workload spec differs
//! from the last-applied one in anything other than `clusterSize`.

use gridop_api::{MaterializedWorkloadSpec, RoleSpec};
use gridop_reconcile::SpecHash;

/// Field excluded from the upgrade fingerprint.
const SIZE_FIELD: &str = "clusterSize";

/// Build the workload spec for `spec` at the given size.
///
/// The image comes from the role spec, then the existing workload, then
/// `default_image`.
pub fn materialize(
    cluster: &str,
    spec: &RoleSpec,
    existing: Option<&MaterializedWorkloadSpec>,
    default_image: &str,
    cluster_size: i32,
) -> MaterializedWorkloadSpec {
    let image = spec
        .image
        .clone()
        .or_else(|| existing.map(|e| e.image.clone()))
        .unwrap_or_else(|| default_image.to_string());

    MaterializedWorkloadSpec {
        cluster: cluster.to_string(),
        role: spec.role_name().to_string(),
        image,
        wka_member: spec.is_wka_member(),
        storage_enabled: spec.storage_enabled.unwrap_or(true),
        config: spec.config.clone(),
        cluster_size,
    }
}

/// Fingerprint of a workload spec, ignoring its size.
pub fn fingerprint(spec: &MaterializedWorkloadSpec) -> Result<SpecHash, serde_json::Error> {
    let json = serde_json::to_value(spec)?;
    Ok(SpecHash::from_json_excluding(&json, &[SIZE_FIELD]))
}

/// True when `desired` changes anything but the size of `existing`.
pub fn is_upgrade(
    desired: &MaterializedWorkloadSpec,
    existing: &MaterializedWorkloadSpec,
) -> Result<bool, serde_json::Error> {
    Ok(fingerprint(desired)? != fingerprint(existing)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn role(image: Option<&str>) -> RoleSpec {
        RoleSpec {
            role_name: Some("data".to_string()),
            replicas: Some(3),
            image: image.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn image_falls_back_to_existing_then_default() {
        let fresh = materialize("c", &role(None), None, "grid:default", 3);
        assert_eq!(fresh.image, "grid:default");

        let existing = materialize("c", &role(Some("grid:1")), None, "grid:default", 3);
        let kept = materialize("c", &role(None), Some(&existing), "grid:default", 3);
        assert_eq!(kept.image, "grid:1");
    }

    #[test]
    fn size_change_is_not_an_upgrade() {
        let small = materialize("c", &role(Some("grid:1")), None, "d", 3);
        let large = materialize("c", &role(Some("grid:1")), None, "d", 7);
        assert!(!is_upgrade(&large, &small).unwrap());
    }

    #[test]
    fn image_change_is_an_upgrade() {
        let old = materialize("c", &role(Some("grid:1")), None, "d", 3);
        let new = materialize("c", &role(Some("grid:2")), None, "d", 3);
        assert!(is_upgrade(&new, &old).unwrap());
    }

    #[test]
    fn config_change_is_an_upgrade() {
        let old = materialize("c", &role(Some("grid:1")), None, "d", 3);
        let mut spec = role(Some("grid:1"));
        spec.config
            .insert("jvmArgs".to_string(), serde_json::json!(["-Xmx2g"]));
        let new = materialize("c", &spec, None, "d", 3);
        assert!(is_upgrade(&new, &old).unwrap());
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_size(a in 0i32..1000, b in 0i32..1000) {
            let first = materialize("c", &role(Some("grid:1")), None, "d", a);
            let second = materialize("c", &role(Some("grid:1")), None, "d", b);
            prop_assert_eq!(fingerprint(&first).unwrap(), fingerprint(&second).unwrap());
        }
    }
}
