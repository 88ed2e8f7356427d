//! Type metadata: reflection-free descriptions of connector, state and RPC
//! types, loaded from generated bundles.

pub mod bundle;
pub mod invoker;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub use bundle::{BundleKind, BundleSpec, BundleTable, ClassEntry, MethodEntry};
pub use invoker::{
    Constructor, InvocationContext, InvocationError, Invoker, ProxyFactory, ProxyHandle, SerializerFactory,
    ValueSerializer,
};
pub use store::TypeDataStore;
pub use types::{Builtin, Type};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unknown bundle '{0}'")]
    UnknownBundle(String),
    #[error("type '{type_name}' is not yet available; bundle '{bundle}' has not been loaded")]
    NotYetAvailable { type_name: String, bundle: String },
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("type '{type_name}' has no member '{member}'")]
    UnknownMember { type_name: String, member: String },
    #[error("type '{0}' has no constructor")]
    NoConstructor(String),
    #[error("type '{0}' has no proxy factory")]
    NoProxy(String),
    #[error("{type_name}.{method} has no invoker")]
    NoInvoker { type_name: String, method: String },
    #[error("{type_name}.{method} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        type_name: String,
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("{type_name}.{method} is declared both delayed and last-only")]
    ConflictingPolicy { type_name: String, method: String },
    #[error("invalid type signature '{0}'")]
    InvalidSignature(String),
    #[error("invocation of {type_name}.{member} failed: {source}")]
    Invocation {
        type_name: String,
        member: String,
        #[source]
        source: InvocationError,
    },
}

/// How a queued call is scheduled for flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    Immediate,
    /// Held back until a round other than the one it was queued in.
    Delayed,
    /// Replaces any still-pending call to the same method on the same target.
    LastOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Bean,
    Enum { constants: Vec<String> },
    RpcInterface,
    Connector,
    Value,
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub ty: Type,
    pub setter: Option<Invoker>,
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
    pub policy: DispatchPolicy,
    pub no_loading_indicator: bool,
    pub invoker: Option<Invoker>,
}

/// Validated metadata for one type, as held by [`TypeDataStore`].
#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub super_type: Option<String>,
    pub bundle: String,
    pub(crate) constructor: Option<Constructor>,
    pub(crate) properties: Vec<PropertyDescriptor>,
    pub(crate) methods: HashMap<String, MethodDescriptor>,
    pub(crate) serializer: Option<SerializerFactory>,
    pub(crate) proxy: Option<ProxyFactory>,
}

impl TypeDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn own_properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn has_serializer(&self) -> bool {
        self.serializer.is_some()
    }

    pub fn enum_constants(&self) -> Option<&[String]> {
        match &self.kind {
            TypeKind::Enum { constants } => Some(constants),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("super_type", &self.super_type)
            .field("bundle", &self.bundle)
            .field("properties", &self.properties)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
