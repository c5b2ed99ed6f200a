//! Object identity and metadata shared by every resource.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceKind;

/// Namespaced name of a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind plus namespaced name. This is the unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Reference from a child resource to the resource that owns it.
///
/// Owners always live in the child's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
    /// The owner's uid at the time the child was created. A recreated owner
    /// with the same name gets a new uid and does not adopt old children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Metadata carried by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,

    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Optimistic concurrency token. Writes carrying a stale value are
    /// rejected with a conflict.
    #[serde(default)]
    pub resource_version: u64,

    /// Incremented by the store on every spec or metadata write.
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Returns true if every `selector` entry is present in the labels.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

/// Behaviour shared by every stored resource.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Replace this resource's status with a copy of `other`'s.
    fn copy_status_from(&mut self, other: &Self);

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.meta().namespace.clone(), self.meta().name.clone())
    }

    fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(
            Self::KIND,
            self.meta().namespace.clone(),
            self.meta().name.clone(),
        )
    }

    /// Key of the owning resource, if any.
    fn owner_key(&self) -> Option<ResourceKey> {
        self.meta().owner.as_ref().map(|owner| {
            ResourceKey::new(owner.kind, self.meta().namespace.clone(), owner.name.clone())
        })
    }

    /// Owner reference pointing at this resource.
    fn as_owner(&self) -> OwnerReference {
        OwnerReference {
            kind: Self::KIND,
            name: self.meta().name.clone(),
            uid: self.meta().uid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_selector_requires_every_entry() {
        let meta = ObjectMeta::new("ns", "c-data")
            .with_label("coherenceCluster", "c")
            .with_label("coherenceRole", "data");

        let mut selector = BTreeMap::new();
        selector.insert("coherenceCluster".to_string(), "c".to_string());
        assert!(meta.matches_labels(&selector));

        selector.insert("coherenceRole".to_string(), "proxy".to_string());
        assert!(!meta.matches_labels(&selector));
    }

    #[test]
    fn resource_key_display() {
        let key = ResourceKey::new(ResourceKind::Role, "ns", "c-data");
        assert_eq!(key.to_string(), "role/ns/c-data");
        assert_eq!(key.object_key(), ObjectKey::new("ns", "c-data"));
    }
}
