//! Remote procedure calls in both directions.

pub mod dispatcher;
pub mod queue;

use thiserror::Error;

use crate::identity::ConnectorId;
use crate::metadata::{MetadataError, MethodDescriptor, TypeDataStore, TypeKind};
use crate::protocol::{RpcCall, WireCall};
use crate::state::codec::{decode, encode};
use crate::state::{CodecError, StateValue};

pub use dispatcher::{DispatchReport, RpcDispatcher};
pub use queue::PendingRpcQueue;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connector {0} is not attached")]
    UnknownConnector(ConnectorId),
    #[error("'{0}' is not an RPC interface")]
    NotAnInterface(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("argument {index} of {interface}.{method}: {source}")]
    Argument {
        interface: String,
        method: String,
        index: usize,
        #[source]
        source: CodecError,
    },
}

/// Resolves the method a call targets and checks its argument count.
pub fn validate_call(store: &TypeDataStore, call: &RpcCall) -> Result<MethodDescriptor, RpcError> {
    resolve_method(store, &call.interface, &call.method, call.args.len())
}

fn resolve_method(
    store: &TypeDataStore,
    interface: &str,
    method: &str,
    arity: usize,
) -> Result<MethodDescriptor, RpcError> {
    let descriptor = store.ensure_loaded(interface)?;
    if descriptor.kind != TypeKind::RpcInterface {
        return Err(RpcError::NotAnInterface(interface.to_owned()));
    }
    let found = store.method(interface, method)?;
    if found.params.len() != arity {
        return Err(MetadataError::ArityMismatch {
            type_name: interface.to_owned(),
            method: method.to_owned(),
            expected: found.params.len(),
            actual: arity,
        }
        .into());
    }
    Ok(found)
}

/// Encodes arguments with the method's declared parameter types.
pub fn encode_call(store: &TypeDataStore, call: &RpcCall) -> Result<WireCall, RpcError> {
    let method = validate_call(store, call)?;
    let args = call
        .args
        .iter()
        .zip(&method.params)
        .enumerate()
        .map(|(index, (arg, ty))| {
            encode(arg, Some(ty), store).map_err(|source| RpcError::Argument {
                interface: call.interface.clone(),
                method: call.method.clone(),
                index,
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WireCall(
        call.connector.clone(),
        call.interface.clone(),
        call.method.clone(),
        args,
    ))
}

/// Decodes a wire call against the method's declared parameter types.
pub fn decode_call(store: &TypeDataStore, wire: &WireCall) -> Result<(MethodDescriptor, RpcCall), RpcError> {
    let method = resolve_method(store, wire.interface(), wire.method(), wire.args().len())?;
    let args = wire
        .args()
        .iter()
        .zip(&method.params)
        .enumerate()
        .map(|(index, (json, ty))| {
            decode(json, ty, store).map_err(|source| RpcError::Argument {
                interface: wire.interface().to_owned(),
                method: wire.method().to_owned(),
                index,
                source,
            })
        })
        .collect::<Result<Vec<StateValue>, _>>()?;
    let call = RpcCall {
        connector: wire.connector().clone(),
        interface: wire.interface().to_owned(),
        method: wire.method().to_owned(),
        args,
    };
    Ok((method, call))
}
