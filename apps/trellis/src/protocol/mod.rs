//! Message shapes exchanged between server and client.

pub mod wire;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::ConnectorId;
use crate::state::StateValue;

pub use wire::WireError;

/// Interface clients use to request and release rows of a data-backed
/// connector. Calls to it are accepted even when the connector is disabled.
pub const DATA_REQUEST_RPC: &str = "DataRequestRpc";

/// A decoded RPC call, before encoding or after decoding against the
/// method's declared parameter types.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub connector: ConnectorId,
    pub interface: String,
    pub method: String,
    pub args: Vec<StateValue>,
}

/// `[connectorId, interface, method, [args...]]` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCall(pub ConnectorId, pub String, pub String, pub Vec<Value>);

impl WireCall {
    pub fn connector(&self) -> &ConnectorId {
        &self.0
    }

    pub fn interface(&self) -> &str {
        &self.1
    }

    pub fn method(&self) -> &str {
        &self.2
    }

    pub fn args(&self) -> &[Value] {
        &self.3
    }
}

/// One client-to-server message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Sequence number of this message, starting at 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,
    /// Id of the last server response the client applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resynchronize: bool,
    #[serde(default)]
    pub rpc: Vec<WireCall>,
}

/// One server-to-client message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerBatch {
    pub sync_id: u64,
    /// The client message id the server expects next.
    pub client_id: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resynchronize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Type identifiers of connectors the client has not seen yet. The
    /// id-keyed maps keep parent-before-child order on the wire.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub types: IndexMap<ConnectorId, String>,
    /// Visible children of every connector whose child list changed.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub hierarchy: IndexMap<ConnectorId, Vec<ConnectorId>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub state: IndexMap<ConnectorId, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpc: Vec<WireCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<ConnectorId>,
}

impl ServerBatch {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.hierarchy.is_empty()
            && self.state.is_empty()
            && self.rpc.is_empty()
            && self.removed.is_empty()
    }
}
