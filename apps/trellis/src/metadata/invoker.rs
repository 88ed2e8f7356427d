use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::identity::ConnectorId;
use crate::protocol::RpcCall;
use crate::state::{CodecError, StateObject, StateValue};
use crate::tracker::ConnectorTracker;

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("target is not a {expected}")]
    TargetMismatch { expected: &'static str },
    #[error("argument {index}: {message}")]
    Argument { index: usize, message: String },
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

/// What an invoked member can see of the side it runs on.
///
/// On the server the context is backed by the connector tracker; on the client
/// it is backed by the local projection and `tracker` returns `None`.
pub trait InvocationContext {
    fn connector(&self) -> &ConnectorId;

    /// Shared state of the target connector. Writing through this marks the
    /// connector dirty on the server.
    fn state_mut(&mut self) -> Option<&mut StateObject>;

    fn mark_dirty(&mut self) {}

    /// Queues a call on the opposite side for the target connector.
    fn call(&mut self, interface: &str, method: &str, args: Vec<StateValue>);

    fn tracker(&mut self) -> Option<&mut ConnectorTracker> {
        None
    }
}

type InvokeFn = dyn Fn(&mut dyn Any, &mut dyn InvocationContext, &[StateValue]) -> Result<StateValue, InvocationError>
    + Send
    + Sync;

/// Type-erased member invoker produced by the metadata generator.
#[derive(Clone)]
pub struct Invoker(Arc<InvokeFn>);

impl Invoker {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Any, &mut dyn InvocationContext, &[StateValue]) -> Result<StateValue, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoker for a method on a concrete target type that returns nothing.
    pub fn method<T, F>(f: F) -> Self
    where
        T: Any,
        F: Fn(&mut T, &mut dyn InvocationContext, &[StateValue]) -> Result<(), InvocationError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(move |target, ctx, args| {
            let target = downcast_target::<T>(target)?;
            f(target, ctx, args)?;
            Ok(StateValue::Null)
        })
    }

    pub fn invoke(
        &self,
        target: &mut dyn Any,
        ctx: &mut dyn InvocationContext,
        args: &[StateValue],
    ) -> Result<StateValue, InvocationError> {
        (self.0)(target, ctx, args)
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invoker(..)")
    }
}

pub type Constructor = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

pub fn downcast_target<T: Any>(target: &mut dyn Any) -> Result<&mut T, InvocationError> {
    target
        .downcast_mut::<T>()
        .ok_or(InvocationError::TargetMismatch {
            expected: type_name::<T>(),
        })
}

pub fn arg(args: &[StateValue], index: usize) -> Result<&StateValue, InvocationError> {
    args.get(index).ok_or_else(|| InvocationError::Argument {
        index,
        message: "missing".into(),
    })
}

pub fn arg_i64(args: &[StateValue], index: usize) -> Result<i64, InvocationError> {
    let value = arg(args, index)?;
    value.as_i64().ok_or_else(|| InvocationError::Argument {
        index,
        message: format!("expected integer, got {}", value.kind()),
    })
}

pub fn arg_str(args: &[StateValue], index: usize) -> Result<&str, InvocationError> {
    let value = arg(args, index)?;
    value.as_str().ok_or_else(|| InvocationError::Argument {
        index,
        message: format!("expected string, got {}", value.kind()),
    })
}

/// Custom wire encoding for a type, used instead of the built-in codec rules.
pub trait ValueSerializer: Send + Sync {
    fn serialize(&self, value: &StateValue) -> Result<Value, CodecError>;
    fn deserialize(&self, json: &Value) -> Result<StateValue, CodecError>;
}

pub type SerializerFactory = Arc<dyn Fn() -> Box<dyn ValueSerializer> + Send + Sync>;

/// Receives calls made through a dynamic interface proxy.
pub trait CallSink: Send + Sync {
    fn push(&self, call: RpcCall);
}

/// Handle given to a proxy factory. Proxies forward every method call here.
#[derive(Clone)]
pub struct ProxyHandle {
    connector: ConnectorId,
    interface: String,
    sink: Arc<dyn CallSink>,
}

impl ProxyHandle {
    pub fn new(connector: ConnectorId, interface: impl Into<String>, sink: Arc<dyn CallSink>) -> Self {
        Self {
            connector,
            interface: interface.into(),
            sink,
        }
    }

    pub fn connector(&self) -> &ConnectorId {
        &self.connector
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn invoke(&self, method: &str, args: Vec<StateValue>) {
        self.sink.push(RpcCall {
            connector: self.connector.clone(),
            interface: self.interface.clone(),
            method: method.to_owned(),
            args,
        });
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("connector", &self.connector)
            .field("interface", &self.interface)
            .finish()
    }
}

pub type ProxyFactory = Arc<dyn Fn(ProxyHandle) -> Box<dyn Any + Send> + Send + Sync>;
