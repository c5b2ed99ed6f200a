//! Owner reverse index.
//!
//! Maps each owner to the children that reference it, so that deleting an
//! owner can cascade to its children.

use std::collections::{BTreeSet, HashMap};

use gridop_api::ResourceKey;

#[derive(Debug, Default)]
pub struct OwnerIndex {
    children: HashMap<ResourceKey, BTreeSet<ResourceKey>>,
    owners: HashMap<ResourceKey, ResourceKey>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner` owns `child`. Returns true if the child was not
    /// indexed before.
    pub fn insert(&mut self, owner: ResourceKey, child: ResourceKey) -> bool {
        let previous = self.owners.insert(child.clone(), owner.clone());
        if let Some(previous) = &previous {
            if *previous != owner {
                self.detach(previous, &child);
            }
        }
        self.children.entry(owner).or_default().insert(child);
        previous.is_none()
    }

    /// Forget `child`.
    pub fn remove(&mut self, child: &ResourceKey) {
        if let Some(owner) = self.owners.remove(child) {
            self.detach(&owner, child);
        }
    }

    /// Children currently recorded for `owner`.
    pub fn children(&self, owner: &ResourceKey) -> Vec<ResourceKey> {
        self.children
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn owner_of(&self, child: &ResourceKey) -> Option<&ResourceKey> {
        self.owners.get(child)
    }

    fn detach(&mut self, owner: &ResourceKey, child: &ResourceKey) {
        if let Some(set) = self.children.get_mut(owner) {
            set.remove(child);
            if set.is_empty() {
                self.children.remove(owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridop_api::ResourceKind;

    fn key(kind: ResourceKind, name: &str) -> ResourceKey {
        ResourceKey::new(kind, "ns", name)
    }

    #[test]
    fn tracks_children_per_owner() {
        let mut index = OwnerIndex::new();
        let cluster = key(ResourceKind::Cluster, "c");
        let data = key(ResourceKind::Role, "c-data");
        let wka = key(ResourceKind::Service, "c-wka");

        assert!(index.insert(cluster.clone(), data.clone()));
        assert!(!index.insert(cluster.clone(), data.clone()));
        index.insert(cluster.clone(), wka.clone());

        assert_eq!(index.children(&cluster), vec![data.clone(), wka.clone()]);
        assert_eq!(index.owner_of(&data), Some(&cluster));

        index.remove(&data);
        assert_eq!(index.children(&cluster), vec![wka]);
    }
}
