//! Pattern registries: where handlers live until they are removed.
//!
//! [`TrieRegistry`] indexes registrations by topic level and is the default.
//! [`ListRegistry`] scans every registration per lookup and is fine for a
//! handful of patterns. Both return matches in registration order.

use crate::error::{Error, Result};
use crate::serve_mux::Handler;
use crate::topic::Pattern;
use reactor_trie::TopicTrie;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of one registration. Ids increase with every insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// The raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A handler registered under a pattern.
pub struct Registration {
    /// Registration identity.
    pub id: RegistrationId,
    /// The pattern the handler was registered with.
    pub pattern: Pattern,
    /// Free-form tag naming the consumer, used for diagnostics and bulk cleanup.
    pub owner: String,
    /// The handler.
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_wire())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Storage strategy for pattern registrations.
pub trait Registry: Send + Sync {
    /// Add a registration and return its id.
    fn insert(
        &mut self,
        pattern: Pattern,
        handler: Arc<dyn Handler>,
        owner: &str,
    ) -> Result<RegistrationId>;

    /// Remove a registration. Removing an unknown id is a no-op returning `None`.
    fn remove(&mut self, id: RegistrationId) -> Option<Arc<Registration>>;

    /// Every registration whose pattern matches `topic`, in registration order.
    fn lookup(&self, topic: &str) -> Vec<Arc<Registration>>;

    /// Ids of the registrations tagged with `owner`, in registration order.
    fn owned_by(&self, owner: &str) -> Vec<RegistrationId>;

    /// Number of registrations.
    fn len(&self) -> usize;

    /// Returns true if there are no registrations.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry indexed by a wildcard trie.
#[derive(Default)]
pub struct TrieRegistry {
    trie: TopicTrie<Arc<Registration>>,
    by_id: BTreeMap<RegistrationId, Arc<Registration>>,
    next_id: u64,
}

impl TrieRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for TrieRegistry {
    fn insert(
        &mut self,
        pattern: Pattern,
        handler: Arc<dyn Handler>,
        owner: &str,
    ) -> Result<RegistrationId> {
        let id = RegistrationId(self.next_id);
        let registration = Arc::new(Registration {
            id,
            pattern,
            owner: owner.to_string(),
            handler,
        });

        self.trie
            .insert(registration.pattern.filter(), Arc::clone(&registration))
            .map_err(|e| Error::invalid_pattern(registration.pattern.as_wire(), e))?;

        self.next_id += 1;
        self.by_id.insert(id, registration);
        Ok(id)
    }

    fn remove(&mut self, id: RegistrationId) -> Option<Arc<Registration>> {
        let registration = self.by_id.remove(&id)?;
        self.trie
            .remove(registration.pattern.filter(), |r| r.id == id);
        Some(registration)
    }

    fn lookup(&self, topic: &str) -> Vec<Arc<Registration>> {
        let mut matched = Vec::new();
        self.trie
            .for_each_match(topic, |r| matched.push(Arc::clone(r)));
        matched.sort_unstable_by_key(|r| r.id);
        matched
    }

    fn owned_by(&self, owner: &str) -> Vec<RegistrationId> {
        self.by_id
            .values()
            .filter(|r| r.owner == owner)
            .map(|r| r.id)
            .collect()
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

impl fmt::Debug for TrieRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.trie
            .walk(|filter, r| lines.push(format!("{} {}", filter, r.id)));
        f.debug_struct("TrieRegistry")
            .field("registrations", &lines)
            .finish()
    }
}

/// Registry that scans every pattern on lookup.
#[derive(Default)]
pub struct ListRegistry {
    registrations: Vec<Arc<Registration>>,
    next_id: u64,
}

impl ListRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for ListRegistry {
    fn insert(
        &mut self,
        pattern: Pattern,
        handler: Arc<dyn Handler>,
        owner: &str,
    ) -> Result<RegistrationId> {
        let id = RegistrationId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Arc::new(Registration {
            id,
            pattern,
            owner: owner.to_string(),
            handler,
        }));
        Ok(id)
    }

    fn remove(&mut self, id: RegistrationId) -> Option<Arc<Registration>> {
        // Ids are pushed in increasing order.
        let idx = self
            .registrations
            .binary_search_by_key(&id, |r| r.id)
            .ok()?;
        Some(self.registrations.remove(idx))
    }

    fn lookup(&self, topic: &str) -> Vec<Arc<Registration>> {
        self.registrations
            .iter()
            .filter(|r| r.pattern.matches(topic))
            .cloned()
            .collect()
    }

    fn owned_by(&self, owner: &str) -> Vec<RegistrationId> {
        self.registrations
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.id)
            .collect()
    }

    fn len(&self) -> usize {
        self.registrations.len()
    }
}

impl fmt::Debug for ListRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| (r.pattern.as_wire(), r.id)))
            .finish()
    }
}
