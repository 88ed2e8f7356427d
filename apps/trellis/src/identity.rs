//! Stable connector identities.
//!
//! Ids are handed out from a monotonically increasing counter and are never
//! issued twice within a session. A connector that is unregistered keeps its
//! id on the retired list so that late client messages can be recognised as
//! stale instead of unknown, and so the same connector can be revived under
//! the same id if it is re-attached.

use std::collections::hash_map;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorId(String);

impl ConnectorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectorId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ConnectorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::borrow::Borrow<str> for ConnectorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Result of resolving an id received from the client.
#[derive(Debug)]
pub enum Lookup<'a, T> {
    Live(&'a T),
    /// The id was issued in this session but its connector is gone.
    Stale,
    Unknown,
}

impl<'a, T> Lookup<'a, T> {
    pub fn live(self) -> Option<&'a T> {
        match self {
            Lookup::Live(entry) => Some(entry),
            Lookup::Stale | Lookup::Unknown => None,
        }
    }
}

#[derive(Debug)]
pub struct IdentityRegistry<T> {
    next_id: u64,
    live: HashMap<ConnectorId, T>,
    retired: HashSet<ConnectorId>,
}

impl<T> Default for IdentityRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdentityRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            live: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Registers an entry and returns its id.
    ///
    /// `known` is the id the connector carried from an earlier registration.
    /// A live `known` id makes this a no-op returning that id; a retired one is
    /// revived. Anything else gets a fresh id. `entry` is only invoked when
    /// something is actually inserted.
    pub fn register_with(
        &mut self,
        known: Option<&ConnectorId>,
        entry: impl FnOnce(&ConnectorId) -> T,
    ) -> ConnectorId {
        if let Some(id) = known {
            if self.live.contains_key(id) {
                return id.clone();
            }
            if self.retired.remove(id) {
                let value = entry(id);
                self.live.insert(id.clone(), value);
                return id.clone();
            }
        }
        let id = self.allocate();
        let value = entry(&id);
        self.live.insert(id.clone(), value);
        id
    }

    fn allocate(&mut self) -> ConnectorId {
        let id = ConnectorId(self.next_id.to_string());
        self.next_id += 1;
        id
    }

    /// Removes a live entry. Its id moves to the retired set and is never
    /// handed to another connector.
    pub fn unregister(&mut self, id: &ConnectorId) -> Option<T> {
        let entry = self.live.remove(id)?;
        self.retired.insert(id.clone());
        Some(entry)
    }

    pub fn lookup(&self, id: &str) -> Lookup<'_, T> {
        if let Some(entry) = self.live.get(id) {
            Lookup::Live(entry)
        } else if self.retired.contains(id) {
            Lookup::Stale
        } else {
            Lookup::Unknown
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.live.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.live.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.retired.contains(id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectorId> {
        self.live.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, ConnectorId, T> {
        self.live.iter()
    }
}
