//! Bidirectional map between provider call SIDs and the records they belong to.
//!
//! Rebind policy is last-bind-wins: binding a new SID to an owner evicts the
//! owner's previous SID, and binding a SID that belonged to another owner moves
//! it. Either case is reported so callers can log the anomaly. A SID therefore
//! maps to at most one owner at any time.

use std::collections::HashMap;
use std::hash::Hash;

/// What a `bind` call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebind<K> {
    /// Neither side had a binding.
    New,
    /// The exact pair was already bound.
    Unchanged,
    /// The owner had a different SID, which is no longer indexed.
    ReplacedSid { previous_sid: String },
    /// The SID belonged to a different owner, which lost it.
    MovedFrom { previous_owner: K },
}

impl<K> Rebind<K> {
    /// True for rebinds that cannot happen under normal provider behavior.
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Self::ReplacedSid { .. } | Self::MovedFrom { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SidIndex<K> {
    by_sid: HashMap<String, K>,
    by_owner: HashMap<K, String>,
}

impl<K> SidIndex<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            by_sid: HashMap::new(),
            by_owner: HashMap::new(),
        }
    }

    pub fn bind(&mut self, sid: &str, owner: K) -> Rebind<K> {
        if self.by_sid.get(sid) == Some(&owner) {
            return Rebind::Unchanged;
        }

        let mut outcome = Rebind::New;

        if let Some(previous_owner) = self.by_sid.remove(sid) {
            self.by_owner.remove(&previous_owner);
            outcome = Rebind::MovedFrom { previous_owner };
        }

        if let Some(previous_sid) = self.by_owner.insert(owner.clone(), sid.to_string()) {
            self.by_sid.remove(&previous_sid);
            if matches!(outcome, Rebind::New) {
                outcome = Rebind::ReplacedSid { previous_sid };
            }
        }

        self.by_sid.insert(sid.to_string(), owner);
        outcome
    }

    pub fn owner_of(&self, sid: &str) -> Option<&K> {
        self.by_sid.get(sid)
    }

    pub fn sid_of(&self, owner: &K) -> Option<&str> {
        self.by_owner.get(owner).map(String::as_str)
    }

    /// Keep only bindings whose owner satisfies `keep`.
    pub fn retain_owners<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.by_sid.retain(|_, owner| keep(owner));
        self.by_owner.retain(|owner, _| keep(owner));
    }

    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sid.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_sid.clear();
        self.by_owner.clear();
    }
}

impl<K> Default for SidIndex<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup() {
        let mut index = SidIndex::new();
        assert_eq!(index.bind("CA1", "a"), Rebind::New);
        assert_eq!(index.owner_of("CA1"), Some(&"a"));
        assert_eq!(index.sid_of(&"a"), Some("CA1"));
        assert_eq!(index.bind("CA1", "a"), Rebind::Unchanged);
        assert!(index.owner_of("CA2").is_none());
    }

    #[test]
    fn rebinding_owner_evicts_previous_sid() {
        let mut index = SidIndex::new();
        index.bind("CA1", "a");
        let outcome = index.bind("CA2", "a");
        assert_eq!(
            outcome,
            Rebind::ReplacedSid {
                previous_sid: "CA1".into()
            }
        );
        assert!(outcome.is_anomaly());
        assert!(index.owner_of("CA1").is_none());
        assert_eq!(index.owner_of("CA2"), Some(&"a"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn rebinding_sid_moves_it() {
        let mut index = SidIndex::new();
        index.bind("CA1", "a");
        let outcome = index.bind("CA1", "b");
        assert_eq!(outcome, Rebind::MovedFrom { previous_owner: "a" });
        assert!(index.sid_of(&"a").is_none());
        assert_eq!(index.owner_of("CA1"), Some(&"b"));
    }

    #[test]
    fn retain_and_clear() {
        let mut index = SidIndex::new();
        index.bind("CA1", 1);
        index.bind("CA2", 2);
        index.retain_owners(|owner| *owner != 1);
        assert!(index.owner_of("CA1").is_none());
        assert_eq!(index.owner_of("CA2"), Some(&2));
        index.clear();
        assert!(index.is_empty());
    }
}
