//! Per-session registry of live connectors.
//!
//! The tracker owns the connector tree, remembers which connectors changed
//! since the last response, and keeps the shadow copy of the state each client
//! was last sent. [`ConnectorTracker::encode_round`] turns all of that into
//! the state part of one response.

mod connector;

use std::any::Any;
use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::identity::{ConnectorId, IdentityRegistry, Lookup};
use crate::metadata::TypeDataStore;
use crate::protocol::RpcCall;
use crate::state::{CodecError, StateObject, StateValue, encode_delta};

pub use connector::{Connector, ConnectorExtension, ResponseContext};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("connector {0} is not attached")]
    NotAttached(ConnectorId),
    #[error("connector {0} is not awaiting removal")]
    NotDetached(ConnectorId),
    #[error("a root connector is already set")]
    RootAlreadySet,
    #[error("the root connector cannot be detached")]
    DetachRoot,
}

#[derive(Debug)]
struct Entry {
    connector: Connector,
    parent: Option<ConnectorId>,
    children: Vec<ConnectorId>,
}

/// State portion of one response, in parent-before-child order.
#[derive(Debug, Default)]
pub struct StateSync {
    pub sync_id: u64,
    pub types: Vec<(ConnectorId, String)>,
    pub hierarchy: Vec<(ConnectorId, Vec<ConnectorId>)>,
    pub states: Vec<(ConnectorId, Map<String, Value>)>,
    pub removed: Vec<ConnectorId>,
    /// Connectors whose state could not be encoded. They stay dirty.
    pub failures: Vec<(ConnectorId, CodecError)>,
}

#[derive(Debug, Default)]
pub struct ConnectorTracker {
    registry: IdentityRegistry<Entry>,
    root: Option<ConnectorId>,
    dirty: HashSet<ConnectorId>,
    /// Live connectors the client has no copy of.
    uninitialized: HashSet<ConnectorId>,
    hierarchy_dirty: HashSet<ConnectorId>,
    /// Detached this round; removed for good when the round is encoded
    /// unless re-attached first.
    detached: HashMap<ConnectorId, Entry>,
    shadows: HashMap<ConnectorId, StateObject>,
    sync_id: u64,
}

impl ConnectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_root(&mut self, connector: Connector) -> Result<ConnectorId, TrackerError> {
        if self.root.is_some() {
            return Err(TrackerError::RootAlreadySet);
        }
        let id = self.insert(connector, None);
        self.root = Some(id.clone());
        Ok(id)
    }

    pub fn root(&self) -> Option<&ConnectorId> {
        self.root.as_ref()
    }

    /// Attaches a new connector under `parent` and returns its id.
    pub fn attach(&mut self, parent: &ConnectorId, connector: Connector) -> Result<ConnectorId, TrackerError> {
        if !self.registry.contains(parent.as_str()) {
            return Err(TrackerError::NotAttached(parent.clone()));
        }
        let id = self.insert(connector, Some(parent.clone()));
        if let Some(entry) = self.registry.get_mut(parent.as_str()) {
            entry.children.push(id.clone());
        }
        self.hierarchy_changed(parent);
        Ok(id)
    }

    fn insert(&mut self, connector: Connector, parent: Option<ConnectorId>) -> ConnectorId {
        let known = connector.id.clone();
        let id = self.registry.register_with(known.as_ref(), move |id| {
            let mut connector = connector;
            connector.id = Some(id.clone());
            Entry {
                connector,
                parent,
                children: Vec::new(),
            }
        });
        trace!(target = "tracker::attach", connector = %id, "connector registered");
        self.uninitialized.insert(id.clone());
        self.dirty.insert(id.clone());
        id
    }

    /// Detaches a connector and its subtree. The client is told to drop them
    /// with the next response unless they are re-attached before then.
    pub fn detach(&mut self, id: &ConnectorId) -> Result<(), TrackerError> {
        if self.root.as_ref() == Some(id) {
            return Err(TrackerError::DetachRoot);
        }
        let parent = self
            .registry
            .get(id.as_str())
            .ok_or_else(|| TrackerError::NotAttached(id.clone()))?
            .parent
            .clone();
        if let Some(parent) = parent {
            if let Some(entry) = self.registry.get_mut(parent.as_str()) {
                entry.children.retain(|child| child != id);
            }
            self.hierarchy_changed(&parent);
        }

        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.registry.unregister(&current) {
                stack.extend(entry.children.iter().cloned());
                self.dirty.remove(&current);
                self.hierarchy_dirty.remove(&current);
                self.detached.insert(current, entry);
            }
        }
        debug!(connector = %id, "connector detached");
        Ok(())
    }

    /// Moves a connector detached earlier in this round back into the tree,
    /// keeping its id and its client-side copy.
    pub fn reattach(&mut self, parent: &ConnectorId, id: &ConnectorId) -> Result<(), TrackerError> {
        if !self.registry.contains(parent.as_str()) {
            return Err(TrackerError::NotAttached(parent.clone()));
        }
        if !self.detached.contains_key(id) {
            return Err(TrackerError::NotDetached(id.clone()));
        }

        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            let Some(mut entry) = self.detached.remove(&current) else {
                continue;
            };
            stack.extend(entry.children.iter().cloned());
            if &current == id {
                entry.parent = Some(parent.clone());
            }
            self.registry.register_with(Some(&current), |_| entry);
            self.dirty.insert(current);
        }

        if let Some(entry) = self.registry.get_mut(parent.as_str()) {
            entry.children.push(id.clone());
        }
        self.hierarchy_changed(parent);
        debug!(connector = %id, parent = %parent, "connector re-attached");
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Lookup<'_, Connector> {
        match self.registry.lookup(id) {
            Lookup::Live(entry) => Lookup::Live(&entry.connector),
            Lookup::Stale => Lookup::Stale,
            Lookup::Unknown => Lookup::Unknown,
        }
    }

    pub fn connector(&self, id: &str) -> Option<&Connector> {
        self.registry.get(id).map(|entry| &entry.connector)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn parent(&self, id: &str) -> Option<&ConnectorId> {
        self.registry.get(id).and_then(|entry| entry.parent.as_ref())
    }

    pub fn children(&self, id: &str) -> &[ConnectorId] {
        self.registry.get(id).map(|entry| entry.children.as_slice()).unwrap_or(&[])
    }

    pub fn state(&self, id: &str) -> Option<&StateObject> {
        self.connector(id).map(Connector::state)
    }

    /// Mutable shared state. The connector is marked dirty.
    pub fn state_mut(&mut self, id: &str) -> Option<&mut StateObject> {
        let entry = self.registry.get_mut(id)?;
        if let Some(key) = &entry.connector.id {
            self.dirty.insert(key.clone());
        }
        Some(&mut entry.connector.state)
    }

    /// Sets one state field, marking the connector dirty only if the value
    /// changed.
    pub fn set_field(
        &mut self,
        id: &ConnectorId,
        name: &str,
        value: impl Into<StateValue>,
    ) -> Result<bool, TrackerError> {
        let entry = self
            .registry
            .get_mut(id.as_str())
            .ok_or_else(|| TrackerError::NotAttached(id.clone()))?;
        let changed = entry.connector.state.set(name, value);
        if changed {
            self.dirty.insert(id.clone());
        }
        Ok(changed)
    }

    pub fn set_visible(&mut self, id: &ConnectorId, visible: bool) -> Result<(), TrackerError> {
        let entry = self
            .registry
            .get_mut(id.as_str())
            .ok_or_else(|| TrackerError::NotAttached(id.clone()))?;
        if entry.connector.visible == visible {
            return Ok(());
        }
        entry.connector.visible = visible;
        let parent = entry.parent.clone();
        self.dirty.insert(id.clone());
        if let Some(parent) = parent {
            self.hierarchy_changed(&parent);
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, id: &ConnectorId, enabled: bool) -> Result<(), TrackerError> {
        let entry = self
            .registry
            .get_mut(id.as_str())
            .ok_or_else(|| TrackerError::NotAttached(id.clone()))?;
        entry.connector.enabled = enabled;
        Ok(())
    }

    /// Whether the connector and all its ancestors are visible.
    pub fn is_visible_to_client(&self, id: &str) -> bool {
        self.ancestors_all(id, |connector| connector.visible)
    }

    /// Whether RPC calls to the connector are accepted: it and all its
    /// ancestors must be enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.ancestors_all(id, |connector| connector.enabled)
    }

    fn ancestors_all(&self, id: &str, check: impl Fn(&Connector) -> bool) -> bool {
        let mut current = self.registry.get(id);
        if current.is_none() {
            return false;
        }
        while let Some(entry) = current {
            if !check(&entry.connector) {
                return false;
            }
            current = entry.parent.as_ref().and_then(|parent| self.registry.get(parent.as_str()));
        }
        true
    }

    pub fn mark_dirty(&mut self, id: &str) -> bool {
        match self.registry.get(id).and_then(|entry| entry.connector.id.clone()) {
            Some(key) => {
                self.dirty.insert(key);
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.contains(id)
    }

    /// Whether the client currently holds a copy of the connector.
    pub fn is_client_initialized(&self, id: &str) -> bool {
        self.registry.contains(id) && !self.uninitialized.contains(id)
    }

    /// Forgets everything the client was sent; the next round resends the
    /// whole visible tree.
    pub fn mark_all_uninitialized(&mut self) {
        let ids: Vec<ConnectorId> = self.registry.ids().cloned().collect();
        self.uninitialized.extend(ids.iter().cloned());
        self.hierarchy_dirty.extend(ids.iter().cloned());
        self.dirty.extend(ids);
        self.shadows.clear();
    }

    /// Id of the round the next [`encode_round`](Self::encode_round) writes.
    pub fn sync_id(&self) -> u64 {
        self.sync_id
    }

    /// Visible connectors in depth-first pre-order from the root.
    pub fn traversal_order(&self) -> Vec<ConnectorId> {
        let mut order = Vec::with_capacity(self.registry.len());
        let Some(root) = &self.root else {
            return order;
        };
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.registry.get(id.as_str()) else {
                continue;
            };
            if !entry.connector.visible {
                continue;
            }
            stack.extend(entry.children.iter().rev().cloned());
            order.push(id);
        }
        order
    }

    fn visible_children(&self, id: &str) -> Vec<ConnectorId> {
        self.children(id)
            .iter()
            .filter(|child| {
                self.registry
                    .get(child.as_str())
                    .is_some_and(|entry| entry.connector.visible)
            })
            .cloned()
            .collect()
    }

    fn hierarchy_changed(&mut self, id: &ConnectorId) {
        self.hierarchy_dirty.insert(id.clone());
        self.dirty.insert(id.clone());
    }

    pub fn has_server_rpc(&self, id: &str, interface: &str) -> bool {
        self.connector(id).is_some_and(|connector| connector.has_server_rpc(interface))
    }

    pub(crate) fn take_handler(&mut self, id: &str, interface: &str) -> Option<Box<dyn Any + Send>> {
        let entry = self.registry.get_mut(id)?;
        entry
            .connector
            .server_rpc
            .iter_mut()
            .find(|registration| registration.interface == interface)
            .and_then(|registration| registration.handler.take())
    }

    /// Puts a handler back after an invocation. The connector may have been
    /// detached by the call itself.
    pub(crate) fn restore_handler(&mut self, id: &str, interface: &str, handler: Box<dyn Any + Send>) {
        let entry = match self.registry.get_mut(id) {
            Some(entry) => Some(entry),
            None => self.detached.get_mut(id),
        };
        if let Some(registration) = entry.and_then(|entry| {
            entry
                .connector
                .server_rpc
                .iter_mut()
                .find(|registration| registration.interface == interface)
        }) {
            registration.handler = Some(handler);
        }
    }

    pub fn client_interfaces(&self, id: &str) -> &[String] {
        self.connector(id).map(Connector::client_interfaces).unwrap_or(&[])
    }

    pub fn extension_mut<E: ConnectorExtension>(&mut self, id: &str) -> Option<&mut E> {
        self.registry
            .get_mut(id)?
            .connector
            .extension
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<E>()
    }

    /// Runs `before_client_response` for every visible connector with an
    /// extension and returns the client calls they queued.
    pub(crate) fn run_response_hooks(&mut self, store: &TypeDataStore) -> Vec<RpcCall> {
        let mut calls = Vec::new();
        for id in self.traversal_order() {
            let initial = self.uninitialized.contains(&id);
            let Some(entry) = self.registry.get_mut(id.as_str()) else {
                continue;
            };
            let Some(mut extension) = entry.connector.extension.take() else {
                continue;
            };
            let mut ctx = ResponseContext::new(&id, &mut entry.connector.state, store, initial);
            extension.before_client_response(&mut ctx);
            let (touched, queued) = ctx.finish();
            entry.connector.extension = Some(extension);
            if touched {
                self.dirty.insert(id.clone());
            }
            calls.extend(queued);
        }
        calls
    }

    /// Encodes the state part of the next response and advances the sync id.
    ///
    /// Dirty visible connectors are encoded against their shadows in
    /// parent-before-child order; connectors the client has not seen get
    /// their type, child list and full state. Connectors detached during the
    /// round are dropped here and listed as removed if the client knew them.
    pub fn encode_round(&mut self, store: &TypeDataStore) -> StateSync {
        let mut sync = StateSync {
            sync_id: self.sync_id,
            ..StateSync::default()
        };
        sync.removed = self.collect_garbage();
        sync.removed.extend(self.drop_unreachable());
        self.forget_hidden();

        for id in self.traversal_order() {
            let initial = self.uninitialized.contains(&id);
            if !initial && !self.dirty.contains(&id) {
                continue;
            }
            let Some(entry) = self.registry.get(id.as_str()) else {
                continue;
            };
            let type_name = entry.connector.type_name();
            let typed = store.ensure_loaded(type_name).is_ok().then_some(type_name);
            if typed.is_none() {
                debug!(connector = %id, type_name, "no metadata for connector type; encoding untyped");
            }
            let shadow = if initial { None } else { self.shadows.get(&id) };
            let encoded = encode_delta(&entry.connector.state, shadow, typed, store);

            if initial {
                sync.types.push((id.clone(), type_name.to_owned()));
            }
            if initial || self.hierarchy_dirty.contains(&id) {
                sync.hierarchy.push((id.clone(), self.visible_children(id.as_str())));
            }

            match encoded {
                Ok(delta) => {
                    if initial || !delta.is_empty() {
                        sync.states.push((id.clone(), delta));
                    }
                    let snapshot = entry.connector.state.clone();
                    self.shadows.insert(id.clone(), snapshot);
                    self.dirty.remove(&id);
                }
                Err(err) => {
                    warn!(connector = %id, error = %err, "failed to encode connector state");
                    if initial {
                        sync.states.push((id.clone(), Map::new()));
                        self.shadows.insert(id.clone(), StateObject::new());
                    }
                    sync.failures.push((id.clone(), err));
                }
            }
            self.uninitialized.remove(&id);
            self.hierarchy_dirty.remove(&id);
        }

        self.sync_id += 1;
        sync
    }

    fn collect_garbage(&mut self) -> Vec<ConnectorId> {
        let mut removed = Vec::new();
        for (id, entry) in std::mem::take(&mut self.detached) {
            if !self.uninitialized.remove(&id) {
                removed.push(id.clone());
            }
            self.shadows.remove(&id);
            self.dirty.remove(&id);
            self.hierarchy_dirty.remove(&id);
            trace!(target = "tracker::gc", connector = %id, type_name = entry.connector.type_name(), "connector dropped");
        }
        removed.sort_by_key(|id| id.as_str().parse::<u64>().unwrap_or(u64::MAX));
        removed
    }

    /// Live connectors that cannot be reached from the root are a tree
    /// bookkeeping error; they are logged and unregistered.
    fn drop_unreachable(&mut self) -> Vec<ConnectorId> {
        let Some(root) = self.root.clone() else {
            return Vec::new();
        };
        let mut reachable = HashSet::with_capacity(self.registry.len());
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(entry) = self.registry.get(id.as_str()) {
                stack.extend(entry.children.iter().cloned());
                reachable.insert(id);
            }
        }
        if reachable.len() == self.registry.len() {
            return Vec::new();
        }

        let dangling: Vec<ConnectorId> = self
            .registry
            .ids()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        let mut removed = Vec::new();
        for id in dangling {
            warn!(connector = %id, "connector is registered but not reachable from the root");
            self.registry.unregister(&id);
            if !self.uninitialized.remove(&id) {
                removed.push(id.clone());
            }
            self.shadows.remove(&id);
            self.dirty.remove(&id);
            self.hierarchy_dirty.remove(&id);
        }
        removed
    }

    /// Connectors hidden from the client lose their client copy: they are
    /// resent in full once visible again.
    fn forget_hidden(&mut self) {
        let hidden: Vec<ConnectorId> = self
            .registry
            .ids()
            .filter(|id| !self.uninitialized.contains(*id) && !self.is_visible_to_client(id.as_str()))
            .cloned()
            .collect();
        for id in hidden {
            trace!(target = "tracker::visibility", connector = %id, "connector hidden from client");
            self.shadows.remove(&id);
            self.uninitialized.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::STRING;
    use crate::metadata::{BundleKind, BundleSpec, BundleTable, ClassEntry, Type};
    use serde_json::json;

    fn store() -> TypeDataStore {
        let table = BundleTable::new().with_bundle(BundleSpec::new(
            "__eager",
            BundleKind::Eager,
            Vec::<String>::new(),
            || {
                vec![
                    ClassEntry::connector("Root"),
                    ClassEntry::connector("Label").property("value", Type::new(STRING)),
                ]
            },
        ));
        let store = TypeDataStore::new(table);
        store.bootstrap().expect("bootstrap");
        store
    }

    fn label(value: &str) -> Connector {
        Connector::new("Label").with_field("value", value)
    }

    #[test_timeout::timeout]
    fn first_round_sends_types_hierarchy_and_full_state_parent_first() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let a = tracker.attach(&root, label("a")).expect("attach");
        let b = tracker.attach(&root, label("b")).expect("attach");

        let sync = tracker.encode_round(&store);
        assert_eq!(sync.sync_id, 0);
        let order: Vec<&str> = sync.states.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["0", "1", "2"]);
        assert_eq!(sync.types.len(), 3);
        assert_eq!(sync.hierarchy[0], (root.clone(), vec![a.clone(), b.clone()]));
        assert_eq!(Value::Object(sync.states[1].1.clone()), json!({"value": "a"}));
        assert_eq!(tracker.sync_id(), 1);

        let quiet = tracker.encode_round(&store);
        assert!(quiet.states.is_empty());
        assert!(quiet.types.is_empty());
    }

    #[test_timeout::timeout]
    fn writing_an_unchanged_value_sends_nothing() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let a = tracker.attach(&root, label("A")).expect("attach");
        tracker.encode_round(&store);

        tracker.set_field(&a, "value", "A").expect("set");
        assert!(!tracker.is_dirty(a.as_str()));
        tracker.state_mut(a.as_str()).expect("state");
        assert!(tracker.is_dirty(a.as_str()));
        let sync = tracker.encode_round(&store);
        assert!(sync.states.is_empty());
        assert!(!tracker.is_dirty(a.as_str()));
    }

    #[test_timeout::timeout]
    fn detached_connectors_are_removed_once() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let a = tracker.attach(&root, label("a")).expect("attach");
        let child = tracker.attach(&a, label("child")).expect("attach");
        tracker.encode_round(&store);

        tracker.detach(&a).expect("detach");
        assert!(matches!(tracker.lookup(child.as_str()), Lookup::Stale));
        let sync = tracker.encode_round(&store);
        assert_eq!(sync.removed, vec![a.clone(), child]);
        assert_eq!(sync.hierarchy, vec![(root, vec![])]);

        let next = tracker.encode_round(&store);
        assert!(next.removed.is_empty());
        assert_eq!(
            tracker.reattach(&ConnectorId::new("0"), &a),
            Err(TrackerError::NotDetached(a))
        );
    }

    #[test_timeout::timeout]
    fn connectors_never_sent_are_not_reported_removed() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        tracker.encode_round(&store);
        let a = tracker.attach(&root, label("a")).expect("attach");
        tracker.detach(&a).expect("detach");
        let sync = tracker.encode_round(&store);
        assert!(sync.removed.is_empty());
        assert!(sync.types.is_empty());
    }

    #[test_timeout::timeout]
    fn reattach_in_same_round_keeps_id_and_cancels_removal() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let left = tracker.attach(&root, Connector::new("Root")).expect("attach");
        let right = tracker.attach(&root, Connector::new("Root")).expect("attach");
        let moved = tracker.attach(&left, label("m")).expect("attach");
        tracker.encode_round(&store);

        tracker.detach(&moved).expect("detach");
        tracker.reattach(&right, &moved).expect("reattach");
        assert_eq!(tracker.parent(moved.as_str()), Some(&right));

        let sync = tracker.encode_round(&store);
        assert!(sync.removed.is_empty());
        assert!(sync.types.is_empty());
        assert!(sync.hierarchy.contains(&(left, vec![])));
        assert!(sync.hierarchy.contains(&(right, vec![moved])));
    }

    #[test_timeout::timeout]
    fn hidden_connectors_are_skipped_and_resent_in_full() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let a = tracker.attach(&root, label("a")).expect("attach");
        tracker.encode_round(&store);

        tracker.set_visible(&a, false).expect("hide");
        tracker.set_field(&a, "value", "changed").expect("set");
        let sync = tracker.encode_round(&store);
        assert_eq!(sync.hierarchy, vec![(root.clone(), vec![])]);
        assert!(sync.states.iter().all(|(id, _)| id != &a));
        assert!(!tracker.is_client_initialized(a.as_str()));

        tracker.set_visible(&a, true).expect("show");
        let sync = tracker.encode_round(&store);
        assert!(sync.types.contains(&(a.clone(), "Label".to_owned())));
        let state = sync.states.iter().find(|(id, _)| id == &a).expect("state");
        assert_eq!(Value::Object(state.1.clone()), json!({"value": "changed"}));
    }

    #[test_timeout::timeout]
    fn enabled_is_inherited() {
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        let panel = tracker.attach(&root, Connector::new("Root").disabled()).expect("attach");
        let button = tracker.attach(&panel, label("b")).expect("attach");
        assert!(!tracker.is_enabled(button.as_str()));
        tracker.set_enabled(&panel, true).expect("enable");
        assert!(tracker.is_enabled(button.as_str()));
        assert!(!tracker.is_enabled("99"));
    }

    #[test_timeout::timeout]
    fn resync_resends_everything() {
        let store = store();
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(Connector::new("Root")).expect("root");
        tracker.attach(&root, label("a")).expect("attach");
        tracker.encode_round(&store);
        tracker.mark_all_uninitialized();
        let sync = tracker.encode_round(&store);
        assert_eq!(sync.types.len(), 2);
        assert_eq!(sync.states.len(), 2);
    }
}
