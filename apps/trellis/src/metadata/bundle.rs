//! Generated metadata tables, grouped into loadable bundles.
//!
//! A bundle carries the raw class entries emitted ahead of time: identifiers,
//! invokers, parameter types and method flags. Entries are only validated and
//! turned into descriptors when the store loads the bundle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::invoker::{Constructor, Invoker, ProxyFactory, ProxyHandle, SerializerFactory, ValueSerializer};
use super::TypeKind;
use super::types::{Type, VOID};

pub const EAGER_BUNDLE: &str = "__eager";
pub const DEFERRED_BUNDLE: &str = "__deferred";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    /// Loaded during bootstrap, before the first response is applied.
    Eager,
    /// Loaded during bootstrap right after every eager bundle.
    Deferred,
    /// Loaded the first time one of its types is needed.
    Lazy,
}

#[derive(Clone)]
pub struct PropertyEntry {
    pub name: String,
    pub ty: Type,
    pub setter: Option<Invoker>,
}

#[derive(Clone)]
pub struct MethodEntry {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
    pub delayed: bool,
    pub last_only: bool,
    pub no_loading_indicator: bool,
    pub invoker: Option<Invoker>,
}

impl MethodEntry {
    pub fn new(name: impl Into<String>, params: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            params,
            return_type: Type::new(VOID),
            delayed: false,
            last_only: false,
            no_loading_indicator: false,
            invoker: None,
        }
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.return_type = ty;
        self
    }

    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    pub fn last_only(mut self) -> Self {
        self.last_only = true;
        self
    }

    pub fn no_loading_indicator(mut self) -> Self {
        self.no_loading_indicator = true;
        self
    }

    pub fn invoker(mut self, invoker: Invoker) -> Self {
        self.invoker = Some(invoker);
        self
    }
}

/// Generated metadata for one type.
#[derive(Clone)]
pub struct ClassEntry {
    pub identifier: String,
    pub kind: TypeKind,
    pub super_type: Option<String>,
    pub constructor: Option<Constructor>,
    pub properties: Vec<PropertyEntry>,
    pub methods: Vec<MethodEntry>,
    pub serializer: Option<SerializerFactory>,
    pub proxy: Option<ProxyFactory>,
}

impl ClassEntry {
    pub fn new(identifier: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            super_type: None,
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
            serializer: None,
            proxy: None,
        }
    }

    pub fn bean(identifier: impl Into<String>) -> Self {
        Self::new(identifier, TypeKind::Bean)
    }

    pub fn connector(identifier: impl Into<String>) -> Self {
        Self::new(identifier, TypeKind::Connector)
    }

    pub fn rpc_interface(identifier: impl Into<String>) -> Self {
        Self::new(identifier, TypeKind::RpcInterface)
    }

    pub fn enumeration<S: Into<String>>(
        identifier: impl Into<String>,
        constants: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            identifier,
            TypeKind::Enum {
                constants: constants.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn extends(mut self, super_type: impl Into<String>) -> Self {
        self.super_type = Some(super_type.into());
        self
    }

    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Box<dyn Any + Send> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    pub fn property(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.properties.push(PropertyEntry {
            name: name.into(),
            ty,
            setter: None,
        });
        self
    }

    /// Property whose value is pushed into the client widget through `setter`
    /// whenever a state change arrives.
    pub fn property_with_setter(mut self, name: impl Into<String>, ty: Type, setter: Invoker) -> Self {
        self.properties.push(PropertyEntry {
            name: name.into(),
            ty,
            setter: Some(setter),
        });
        self
    }

    pub fn method(mut self, method: MethodEntry) -> Self {
        self.methods.push(method);
        self
    }

    pub fn serializer<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Box<dyn ValueSerializer> + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(f));
        self
    }

    pub fn proxy<F>(mut self, f: F) -> Self
    where
        F: Fn(ProxyHandle) -> Box<dyn Any + Send> + Send + Sync + 'static,
    {
        self.proxy = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("methods", &self.methods.len())
            .finish()
    }
}

pub type BundleLoader = Arc<dyn Fn() -> Vec<ClassEntry> + Send + Sync>;

#[derive(Clone)]
pub struct BundleSpec {
    name: String,
    kind: BundleKind,
    declared: Vec<String>,
    loader: BundleLoader,
}

impl BundleSpec {
    /// `declared` lists the identifiers the bundle provides; lookups for them
    /// report "not yet available" until the bundle is loaded.
    pub fn new<S, F>(name: impl Into<String>, kind: BundleKind, declared: impl IntoIterator<Item = S>, loader: F) -> Self
    where
        S: Into<String>,
        F: Fn() -> Vec<ClassEntry> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            declared: declared.into_iter().map(Into::into).collect(),
            loader: Arc::new(loader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BundleKind {
        self.kind
    }

    pub fn declares(&self, identifier: &str) -> bool {
        self.declared.iter().any(|declared| declared == identifier)
    }

    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    pub(crate) fn load(&self) -> Vec<ClassEntry> {
        (self.loader)()
    }
}

impl fmt::Debug for BundleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("declared", &self.declared)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BundleTable {
    bundles: Vec<BundleSpec>,
}

impl BundleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, bundle: BundleSpec) -> Self {
        self.bundles.push(bundle);
        self
    }

    pub fn bundles(&self) -> &[BundleSpec] {
        &self.bundles
    }

    pub fn find(&self, name: &str) -> Option<&BundleSpec> {
        self.bundles.iter().find(|bundle| bundle.name == name)
    }

    pub fn bundle_for_type(&self, identifier: &str) -> Option<&BundleSpec> {
        self.bundles.iter().find(|bundle| bundle.declares(identifier))
    }
}
