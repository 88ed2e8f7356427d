//! Client half of the protocol.
//!
//! [`ClientProjection`] rebuilds the server's connector tree from response
//! batches: it constructs widgets through the metadata table, merges state
//! deltas, runs property setters and client RPCs on the widgets, and batches
//! calls back to the server.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::identity::ConnectorId;
use crate::metadata::invoker::CallSink;
use crate::metadata::{InvocationContext, MetadataError, ProxyHandle, TypeDataStore};
use crate::protocol::wire::{decode_server_batch, encode_client_batch};
use crate::protocol::{ClientBatch, RpcCall, ServerBatch, WireError};
use crate::rpc::{PendingRpcQueue, RpcError, decode_call, encode_call, validate_call};
use crate::state::{StateObject, StateValue, merge_delta};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// What applying one server batch did.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub created: Vec<ConnectorId>,
    pub updated: Vec<ConnectorId>,
    pub removed: Vec<ConnectorId>,
    /// Connectors whose delta or call could not be applied, with the reason.
    pub failed: Vec<(ConnectorId, String)>,
    pub invoked: usize,
}

struct ClientConnector {
    type_name: String,
    state: StateObject,
    widget: Box<dyn Any + Send>,
    parent: Option<ConnectorId>,
    children: Vec<ConnectorId>,
}

#[derive(Default)]
struct ProxySink {
    calls: Mutex<Vec<RpcCall>>,
}

impl CallSink for ProxySink {
    fn push(&self, call: RpcCall) {
        self.calls.lock().push(call);
    }
}

struct ClientInvocation<'a> {
    connector: &'a ConnectorId,
    state: &'a mut StateObject,
    calls: &'a mut Vec<RpcCall>,
}

impl InvocationContext for ClientInvocation<'_> {
    fn connector(&self) -> &ConnectorId {
        self.connector
    }

    fn state_mut(&mut self) -> Option<&mut StateObject> {
        Some(&mut *self.state)
    }

    fn call(&mut self, interface: &str, method: &str, args: Vec<StateValue>) {
        self.calls.push(RpcCall {
            connector: self.connector.clone(),
            interface: interface.to_owned(),
            method: method.to_owned(),
            args,
        });
    }
}

/// Local projection of the server's connector tree.
pub struct ClientProjection {
    store: Arc<TypeDataStore>,
    connectors: HashMap<ConnectorId, ClientConnector>,
    root: Option<ConnectorId>,
    csrf_token: Option<String>,
    last_sync_id: Option<u64>,
    next_client_id: u64,
    outgoing: PendingRpcQueue,
    proxy_sink: Arc<ProxySink>,
    round: u64,
    resync_requested: bool,
    /// A sent batch carried a call that shows the loading indicator and no
    /// response has been applied since.
    loading: bool,
}

impl ClientProjection {
    /// `csrf_token` is the token the session handed out with the initial
    /// page.
    pub fn new(store: Arc<TypeDataStore>, csrf_token: Option<String>) -> Self {
        Self {
            store,
            connectors: HashMap::new(),
            root: None,
            csrf_token,
            last_sync_id: None,
            next_client_id: 0,
            outgoing: PendingRpcQueue::new(),
            proxy_sink: Arc::new(ProxySink::default()),
            round: 0,
            resync_requested: false,
            loading: false,
        }
    }

    pub fn root(&self) -> Option<&ConnectorId> {
        self.root.as_ref()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connectors.contains_key(id)
    }

    pub fn type_name(&self, id: &str) -> Option<&str> {
        self.connectors.get(id).map(|connector| connector.type_name.as_str())
    }

    pub fn state(&self, id: &str) -> Option<&StateObject> {
        self.connectors.get(id).map(|connector| &connector.state)
    }

    pub fn children(&self, id: &str) -> &[ConnectorId] {
        self.connectors
            .get(id)
            .map(|connector| connector.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: &str) -> Option<&ConnectorId> {
        self.connectors.get(id)?.parent.as_ref()
    }

    pub fn widget<W: Any>(&self, id: &str) -> Option<&W> {
        self.connectors.get(id)?.widget.downcast_ref::<W>()
    }

    pub fn widget_mut<W: Any>(&mut self, id: &str) -> Option<&mut W> {
        self.connectors.get_mut(id)?.widget.downcast_mut::<W>()
    }

    /// Connectors of the given type or one of its subtypes, in id order.
    pub fn find_by_type(&self, type_name: &str) -> Vec<ConnectorId> {
        let mut found: Vec<ConnectorId> = self
            .connectors
            .iter()
            .filter(|(_, connector)| self.store.is_assignable(&connector.type_name, type_name))
            .map(|(id, _)| id.clone())
            .collect();
        found.sort_by_key(|id| id.as_str().parse::<u64>().unwrap_or(u64::MAX));
        found
    }

    pub fn last_sync_id(&self) -> Option<u64> {
        self.last_sync_id
    }

    /// Asks the server to resend everything with the next batch.
    pub fn request_resync(&mut self) {
        self.resync_requested = true;
    }

    pub fn apply_json(&mut self, body: &str) -> Result<ApplyReport, ClientError> {
        let batch = decode_server_batch(body)?;
        Ok(self.apply(&batch))
    }

    /// Applies one server batch. A connector whose delta or call fails is
    /// left as it was and reported; the rest of the batch still applies.
    pub fn apply(&mut self, batch: &ServerBatch) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.loading = false;

        if batch.resynchronize {
            debug!(sync_id = batch.sync_id, "server resent the whole tree");
            self.connectors.clear();
            self.root = None;
        }
        if let Some(token) = &batch.csrf_token {
            self.csrf_token = Some(token.clone());
        }

        for id in &batch.removed {
            if self.remove(id) {
                report.removed.push(id.clone());
            }
        }

        for (id, type_name) in &batch.types {
            if self.create(id, type_name, &mut report) {
                report.created.push(id.clone());
            }
        }

        self.apply_hierarchy(batch, &mut report);

        for (id, delta) in &batch.state {
            self.apply_delta(id, delta, &mut report);
        }

        let mut queued = Vec::new();
        for wire in &batch.rpc {
            let call = match decode_call(&self.store, wire) {
                Ok((_, call)) => call,
                Err(err) => {
                    warn!(connector = %wire.connector(), interface = wire.interface(), error = %err, "undecodable client call");
                    report.failed.push((wire.connector().clone(), err.to_string()));
                    continue;
                }
            };
            let Some(connector) = self.connectors.get_mut(call.connector.as_str()) else {
                debug!(connector = %call.connector, "call for connector the client does not have");
                continue;
            };
            let ClientConnector { state, widget, .. } = connector;
            let mut ctx = ClientInvocation {
                connector: &call.connector,
                state,
                calls: &mut queued,
            };
            match self
                .store
                .invoke(&call.interface, &call.method, widget.as_mut(), &mut ctx, &call.args)
            {
                Ok(_) => report.invoked += 1,
                Err(err) => {
                    warn!(connector = %call.connector, interface = %call.interface, method = %call.method, error = %err, "client call failed");
                    report.failed.push((call.connector.clone(), err.to_string()));
                }
            }
        }
        for call in queued {
            if let Err(err) = self.call_server(call) {
                warn!(error = %err, "dropping call queued by widget");
            }
        }

        self.last_sync_id = Some(batch.sync_id);
        self.next_client_id = batch.client_id;
        trace!(
            sync_id = batch.sync_id,
            created = report.created.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "server batch applied"
        );
        report
    }

    fn create(&mut self, id: &ConnectorId, type_name: &str, report: &mut ApplyReport) -> bool {
        if self
            .connectors
            .get(id.as_str())
            .is_some_and(|existing| existing.type_name == type_name)
        {
            return false;
        }
        let widget: Box<dyn Any + Send> = match self.store.ensure_loaded(type_name) {
            Ok(descriptor) if descriptor.has_constructor() => match self.store.construct(type_name) {
                Ok(widget) => widget,
                Err(err) => {
                    report.failed.push((id.clone(), err.to_string()));
                    Box::new(())
                }
            },
            Ok(_) => Box::new(()),
            Err(err) => {
                warn!(connector = %id, type_name, error = %err, "no metadata for connector type");
                report.failed.push((id.clone(), err.to_string()));
                Box::new(())
            }
        };
        self.connectors.insert(
            id.clone(),
            ClientConnector {
                type_name: type_name.to_owned(),
                state: StateObject::new(),
                widget,
                parent: None,
                children: Vec::new(),
            },
        );
        true
    }

    fn apply_hierarchy(&mut self, batch: &ServerBatch, report: &mut ApplyReport) {
        for (id, children) in &batch.hierarchy {
            let Some(connector) = self.connectors.get_mut(id.as_str()) else {
                continue;
            };
            connector.children = children.clone();
            for child in children {
                if let Some(child) = self.connectors.get_mut(child.as_str()) {
                    child.parent = Some(id.clone());
                }
            }
        }

        if self.root.is_none() {
            self.root = batch
                .types
                .keys()
                .find(|id| {
                    self.connectors
                        .get(id.as_str())
                        .is_some_and(|connector| connector.parent.is_none())
                })
                .cloned();
        }
        let Some(root) = self.root.clone() else {
            return;
        };

        let mut reachable = HashSet::with_capacity(self.connectors.len());
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(connector) = self.connectors.get(id.as_str()) {
                stack.extend(connector.children.iter().cloned());
                reachable.insert(id);
            }
        }
        let orphans: Vec<ConnectorId> = self
            .connectors
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in orphans {
            trace!(connector = %id, "dropping connector no longer in the tree");
            self.connectors.remove(id.as_str());
            report.removed.push(id);
        }
    }

    fn apply_delta(&mut self, id: &ConnectorId, delta: &serde_json::Map<String, serde_json::Value>, report: &mut ApplyReport) {
        let store = Arc::clone(&self.store);
        let Some(connector) = self.connectors.get_mut(id.as_str()) else {
            warn!(connector = %id, "state for unknown connector");
            report.failed.push((id.clone(), "unknown connector".into()));
            return;
        };
        let typed = store
            .ensure_loaded(&connector.type_name)
            .is_ok()
            .then_some(connector.type_name.as_str());
        let changed = match merge_delta(&mut connector.state, delta, typed, &store) {
            Ok(changed) => changed,
            Err(err) => {
                warn!(connector = %id, error = %err, "malformed state delta; keeping previous state");
                report.failed.push((id.clone(), err.to_string()));
                return;
            }
        };

        let mut queued = Vec::new();
        if let Some(type_name) = typed {
            let ClientConnector { state, widget, .. } = connector;
            for field in &changed {
                let Ok(Some(property)) = store.property(type_name, field) else {
                    continue;
                };
                let Some(setter) = &property.setter else {
                    continue;
                };
                let value = state.get(field).cloned().unwrap_or(StateValue::Null);
                let mut ctx = ClientInvocation {
                    connector: id,
                    state: &mut *state,
                    calls: &mut queued,
                };
                if let Err(err) = setter.invoke(widget.as_mut(), &mut ctx, &[value]) {
                    warn!(connector = %id, property = %field, error = %err, "property setter failed");
                    report.failed.push((id.clone(), err.to_string()));
                }
            }
        }
        report.updated.push(id.clone());
        for call in queued {
            if let Err(err) = self.call_server(call) {
                warn!(error = %err, "dropping call queued by setter");
            }
        }
    }

    fn remove(&mut self, id: &ConnectorId) -> bool {
        let Some(connector) = self.connectors.remove(id.as_str()) else {
            return false;
        };
        if let Some(parent) = connector.parent.and_then(|parent| self.connectors.get_mut(parent.as_str())) {
            parent.children.retain(|child| child != id);
        }
        if self.root.as_ref() == Some(id) {
            self.root = None;
        }
        true
    }

    /// Queues a call to the server half of a connector.
    pub fn call_server(&mut self, call: RpcCall) -> Result<(), ClientError> {
        if !self.connectors.contains_key(call.connector.as_str()) {
            return Err(RpcError::UnknownConnector(call.connector).into());
        }
        let method = validate_call(&self.store, &call)?;
        self.outgoing.push(call, method.policy, self.round);
        Ok(())
    }

    /// Shorthand for [`call_server`](Self::call_server).
    pub fn call(
        &mut self,
        connector: &ConnectorId,
        interface: &str,
        method: &str,
        args: Vec<StateValue>,
    ) -> Result<(), ClientError> {
        self.call_server(RpcCall {
            connector: connector.clone(),
            interface: interface.to_owned(),
            method: method.to_owned(),
            args,
        })
    }

    /// Proxy object for a server interface of `connector`. Calls made through
    /// it are queued like [`call_server`](Self::call_server) calls.
    pub fn proxy(&self, connector: &ConnectorId, interface: &str) -> Result<Box<dyn Any + Send>, ClientError> {
        self.store.ensure_loaded(interface)?;
        let sink: Arc<dyn CallSink> = self.proxy_sink.clone();
        Ok(self.store.proxy(interface, ProxyHandle::new(connector.clone(), interface, sink))?)
    }

    /// Calls waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.outgoing.len() + self.proxy_sink.calls.lock().len()
    }

    /// Builds the next client message from the calls due in this round.
    pub fn take_batch(&mut self) -> ClientBatch {
        let proxied = std::mem::take(&mut *self.proxy_sink.calls.lock());
        for call in proxied {
            if let Err(err) = self.call_server(call) {
                warn!(error = %err, "dropping proxied call");
            }
        }

        let mut indicate = false;
        let rpc = self
            .outgoing
            .flush_sequential(self.round)
            .into_iter()
            .filter_map(|call| match encode_call(&self.store, &call) {
                Ok(wire) => {
                    indicate |= validate_call(&self.store, &call).is_ok_and(|method| !method.no_loading_indicator);
                    Some(wire)
                }
                Err(err) => {
                    warn!(connector = %call.connector, error = %err, "dropping unencodable call");
                    None
                }
            })
            .collect();
        self.loading |= indicate;

        let batch = ClientBatch {
            csrf_token: self.csrf_token.clone(),
            client_id: Some(self.next_client_id),
            sync_id: self.last_sync_id,
            resynchronize: std::mem::take(&mut self.resync_requested),
            rpc,
        };
        self.next_client_id += 1;
        self.round += 1;
        batch
    }

    /// Whether the UI should show its loading indicator: a call that wants
    /// one was sent and its response has not arrived yet.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn take_message(&mut self) -> Result<String, ClientError> {
        Ok(encode_client_batch(&self.take_batch())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::invoker::arg_str;
    use crate::metadata::types::STRING;
    use crate::metadata::{BundleKind, BundleSpec, BundleTable, ClassEntry, Invoker, MethodEntry, Type};
    use serde_json::json;

    #[derive(Default)]
    struct Caption {
        text: String,
    }

    fn store() -> Arc<TypeDataStore> {
        let table = BundleTable::new().with_bundle(BundleSpec::new(
            "__eager",
            BundleKind::Eager,
            Vec::<String>::new(),
            || {
                vec![
                    ClassEntry::connector("Box")
                        .constructor(|| Box::new(Caption::default()))
                        .property_with_setter(
                            "caption",
                            Type::new(STRING),
                            Invoker::method::<Caption, _>(|widget, _, args| {
                                widget.text = arg_str(args, 0)?.to_owned();
                                Ok(())
                            }),
                        ),
                    ClassEntry::connector("FancyBox")
                        .extends("Box")
                        .constructor(|| Box::new(Caption::default())),
                    ClassEntry::rpc_interface("BoxRpc")
                        .method(MethodEntry::new("poke", vec![]))
                        .method(MethodEntry::new("later", vec![]).delayed())
                        .method(MethodEntry::new("quiet", vec![]).no_loading_indicator()),
                ]
            },
        ));
        let store = TypeDataStore::new(table);
        store.bootstrap().expect("bootstrap");
        Arc::new(store)
    }

    fn initial() -> ServerBatch {
        serde_json::from_value(json!({
            "syncId": 0,
            "clientId": 1,
            "types": {"0": "Box", "1": "Box"},
            "hierarchy": {"0": ["1"], "1": []},
            "state": {"0": {"caption": "root"}, "1": {"caption": "child"}}
        }))
        .expect("batch")
    }

    #[test_timeout::timeout]
    fn setters_follow_merged_state() {
        let mut client = ClientProjection::new(store(), Some("t".into()));
        let report = client.apply(&initial());
        assert_eq!(report.created.len(), 2);
        assert_eq!(client.root().map(ConnectorId::as_str), Some("0"));
        assert_eq!(client.widget::<Caption>("1").map(|w| w.text.as_str()), Some("child"));
        assert_eq!(client.children("0"), &[ConnectorId::new("1")]);
    }

    #[test_timeout::timeout]
    fn malformed_delta_leaves_connector_untouched() {
        let mut client = ClientProjection::new(store(), None);
        client.apply(&initial());
        let update: ServerBatch = serde_json::from_value(json!({
            "syncId": 1,
            "clientId": 1,
            "state": {"0": {"caption": 7}, "1": {"caption": "next"}}
        }))
        .expect("batch");
        let report = client.apply(&update);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ConnectorId::new("0"));
        assert_eq!(client.state("0").and_then(|s| s.get("caption")), Some(&StateValue::from("root")));
        assert_eq!(client.widget::<Caption>("1").map(|w| w.text.as_str()), Some("next"));
    }

    #[test_timeout::timeout]
    fn delayed_calls_wait_for_the_following_batch() {
        let mut client = ClientProjection::new(store(), Some("t".into()));
        client.apply(&initial());
        let id = ConnectorId::new("1");
        client.call(&id, "BoxRpc", "later", vec![]).expect("queue");
        client.call(&id, "BoxRpc", "poke", vec![]).expect("queue");

        let first = client.take_batch();
        assert_eq!(first.rpc.len(), 1);
        assert_eq!(first.rpc[0].method(), "poke");
        assert_eq!(first.client_id, Some(1));
        assert_eq!(first.sync_id, Some(0));

        let second = client.take_batch();
        assert_eq!(second.rpc.len(), 1);
        assert_eq!(second.rpc[0].method(), "later");
        assert_eq!(second.client_id, Some(2));
    }

    #[test_timeout::timeout]
    fn children_dropped_from_the_hierarchy_are_removed() {
        let mut client = ClientProjection::new(store(), None);
        client.apply(&initial());
        let update: ServerBatch = serde_json::from_value(json!({
            "syncId": 1,
            "clientId": 1,
            "hierarchy": {"0": []}
        }))
        .expect("batch");
        let report = client.apply(&update);
        assert_eq!(report.removed, vec![ConnectorId::new("1")]);
        assert!(!client.contains("1"));
    }

    #[test_timeout::timeout]
    fn loading_indicator_tracks_sent_calls() {
        let mut client = ClientProjection::new(store(), Some("t".into()));
        client.apply(&initial());
        let id = ConnectorId::new("1");

        client.call(&id, "BoxRpc", "quiet", vec![]).expect("queue");
        client.take_batch();
        assert!(!client.is_loading());

        client.call(&id, "BoxRpc", "poke", vec![]).expect("queue");
        client.take_batch();
        assert!(client.is_loading());

        let response: ServerBatch = serde_json::from_value(json!({"syncId": 1, "clientId": 3})).expect("batch");
        client.apply(&response);
        assert!(!client.is_loading());
    }

    #[test_timeout::timeout]
    fn find_by_type_matches_subtypes() {
        let mut client = ClientProjection::new(store(), None);
        let batch: ServerBatch = serde_json::from_value(json!({
            "syncId": 0,
            "clientId": 1,
            "types": {"0": "Box", "1": "FancyBox"},
            "hierarchy": {"0": ["1"], "1": []},
            "state": {"0": {"caption": "plain"}, "1": {"caption": "fancy"}}
        }))
        .expect("batch");
        let report = client.apply(&batch);
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(client.find_by_type("Box"), vec![ConnectorId::new("0"), ConnectorId::new("1")]);
        assert_eq!(client.find_by_type("FancyBox"), vec![ConnectorId::new("1")]);
        assert_eq!(client.widget::<Caption>("1").map(|w| w.text.as_str()), Some("fancy"));
    }
}
