use std::any::Any;
use std::fmt;

use crate::identity::ConnectorId;
use crate::metadata::TypeDataStore;
use crate::protocol::RpcCall;
use crate::state::{StateObject, StateValue};

/// Server-side extension hooks for a connector.
pub trait ConnectorExtension: Any + Send {
    /// Runs while each response is prepared, for every connector the client
    /// can currently see. May edit shared state and queue client calls.
    fn before_client_response(&mut self, ctx: &mut ResponseContext<'_>);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct RpcRegistration {
    pub(crate) interface: String,
    pub(crate) handler: Option<Box<dyn Any + Send>>,
}

/// A server-side UI object that is mirrored on the client.
pub struct Connector {
    pub(crate) id: Option<ConnectorId>,
    type_name: String,
    pub(crate) state: StateObject,
    pub(crate) visible: bool,
    pub(crate) enabled: bool,
    pub(crate) server_rpc: Vec<RpcRegistration>,
    pub(crate) client_rpc: Vec<String>,
    pub(crate) extension: Option<Box<dyn ConnectorExtension>>,
}

impl Connector {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            id: None,
            type_name: type_name.into(),
            state: StateObject::new(),
            visible: true,
            enabled: true,
            server_rpc: Vec::new(),
            client_rpc: Vec::new(),
            extension: None,
        }
    }

    pub fn with_state(mut self, state: StateObject) -> Self {
        self.state = state;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.state.set(name, value);
        self
    }

    /// Registers the handler object invoked for calls to `interface`.
    pub fn with_rpc<H: Any + Send>(mut self, interface: impl Into<String>, handler: H) -> Self {
        let interface = interface.into();
        self.server_rpc.retain(|registration| registration.interface != interface);
        self.server_rpc.push(RpcRegistration {
            interface,
            handler: Some(Box::new(handler)),
        });
        self
    }

    /// Declares a client interface; flush order on this connector follows
    /// declaration order.
    pub fn with_client_rpc(mut self, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        if !self.client_rpc.contains(&interface) {
            self.client_rpc.push(interface);
        }
        self
    }

    pub fn with_extension<E: ConnectorExtension>(mut self, extension: E) -> Self {
        self.extension = Some(Box::new(extension));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> Option<&ConnectorId> {
        self.id.as_ref()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn state(&self) -> &StateObject {
        &self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_server_rpc(&self, interface: &str) -> bool {
        self.server_rpc.iter().any(|registration| registration.interface == interface)
    }

    pub fn client_interfaces(&self) -> &[String] {
        &self.client_rpc
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("visible", &self.visible)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .finish()
    }
}

/// View of a connector handed to [`ConnectorExtension::before_client_response`].
pub struct ResponseContext<'a> {
    connector: &'a ConnectorId,
    state: &'a mut StateObject,
    store: &'a TypeDataStore,
    initial: bool,
    touched: bool,
    calls: Vec<RpcCall>,
}

impl<'a> ResponseContext<'a> {
    pub(crate) fn new(
        connector: &'a ConnectorId,
        state: &'a mut StateObject,
        store: &'a TypeDataStore,
        initial: bool,
    ) -> Self {
        Self {
            connector,
            state,
            store,
            initial,
            touched: false,
            calls: Vec::new(),
        }
    }

    pub fn connector(&self) -> &ConnectorId {
        self.connector
    }

    /// True when the client has no copy of this connector yet.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn state(&self) -> &StateObject {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut StateObject {
        self.touched = true;
        self.state
    }

    pub fn store(&self) -> &TypeDataStore {
        self.store
    }

    pub fn call(&mut self, interface: &str, method: &str, args: Vec<StateValue>) {
        self.calls.push(RpcCall {
            connector: self.connector.clone(),
            interface: interface.to_owned(),
            method: method.to_owned(),
            args,
        });
    }

    pub(crate) fn finish(self) -> (bool, Vec<RpcCall>) {
        (self.touched, self.calls)
    }
}
