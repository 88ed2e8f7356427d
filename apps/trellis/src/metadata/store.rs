use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::bundle::{BundleKind, BundleSpec, BundleTable, ClassEntry};
use super::invoker::{InvocationContext, ProxyHandle, ValueSerializer};
use super::types::Type;
use super::{DispatchPolicy, MetadataError, MethodDescriptor, PropertyDescriptor, TypeDescriptor};
use crate::state::StateValue;
use crate::telemetry::{Metric, PerfGuard};

#[derive(Default)]
struct StoreInner {
    loaded: HashSet<String>,
    types: HashMap<String, Arc<TypeDescriptor>>,
}

/// Registry of every type descriptor known to one side of the connection.
///
/// Safe to share between threads; lookups take a read lock and loading a
/// bundle takes the write lock once per bundle.
pub struct TypeDataStore {
    table: BundleTable,
    inner: RwLock<StoreInner>,
}

impl TypeDataStore {
    pub fn new(table: BundleTable) -> Self {
        Self {
            table,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Loads every eager bundle, then every deferred one, in table order.
    pub fn bootstrap(&self) -> Result<(), MetadataError> {
        let _guard = PerfGuard::new(Metric::MetadataBootstrap);
        for kind in [BundleKind::Eager, BundleKind::Deferred] {
            let names: Vec<String> = self
                .table
                .bundles()
                .iter()
                .filter(|bundle| bundle.kind() == kind)
                .map(|bundle| bundle.name().to_owned())
                .collect();
            for name in names {
                self.load_bundle(&name)?;
            }
        }
        Ok(())
    }

    /// Loads a bundle. Loading an already loaded bundle is a no-op. A bundle
    /// with an invalid entry registers nothing.
    pub fn load_bundle(&self, name: &str) -> Result<(), MetadataError> {
        if self.is_bundle_loaded(name) {
            return Ok(());
        }
        let bundle = self
            .table
            .find(name)
            .ok_or_else(|| MetadataError::UnknownBundle(name.to_owned()))?;

        let entries = bundle.load();
        let descriptors = entries
            .into_iter()
            .map(|entry| describe(entry, bundle))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.inner.write();
        if inner.loaded.contains(name) {
            return Ok(());
        }
        for declared in bundle.declared() {
            if !descriptors.iter().any(|descriptor| &descriptor.name == declared) {
                warn!(bundle = name, type_name = %declared, "declared type missing from bundle");
            }
        }
        let count = descriptors.len();
        for descriptor in descriptors {
            if inner.types.contains_key(&descriptor.name) {
                debug!(type_name = %descriptor.name, bundle = name, "type redefined by later bundle");
            }
            inner.types.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        inner.loaded.insert(name.to_owned());
        info!(bundle = name, types = count, "metadata bundle loaded");
        Ok(())
    }

    pub fn is_bundle_loaded(&self, name: &str) -> bool {
        self.inner.read().loaded.contains(name)
    }

    pub fn get_type(&self, name: &str) -> Result<Arc<TypeDescriptor>, MetadataError> {
        if let Some(descriptor) = self.inner.read().types.get(name) {
            return Ok(Arc::clone(descriptor));
        }
        match self.table.bundle_for_type(name) {
            Some(bundle) if !self.is_bundle_loaded(bundle.name()) => Err(MetadataError::NotYetAvailable {
                type_name: name.to_owned(),
                bundle: bundle.name().to_owned(),
            }),
            _ => Err(MetadataError::UnknownType(name.to_owned())),
        }
    }

    /// Like [`get_type`](Self::get_type), but loads the owning bundle first
    /// when the type is not available yet.
    pub fn ensure_loaded(&self, name: &str) -> Result<Arc<TypeDescriptor>, MetadataError> {
        match self.get_type(name) {
            Err(MetadataError::NotYetAvailable { bundle, .. }) => {
                debug!(type_name = name, bundle = %bundle, "loading bundle on demand");
                self.load_bundle(&bundle)?;
                self.get_type(name)
            }
            other => other,
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.inner.read().types.contains_key(name)
    }

    pub fn construct(&self, type_name: &str) -> Result<Box<dyn Any + Send>, MetadataError> {
        let descriptor = self.get_type(type_name)?;
        let constructor = descriptor
            .constructor
            .as_ref()
            .ok_or_else(|| MetadataError::NoConstructor(type_name.to_owned()))?;
        Ok(constructor())
    }

    /// Resolves a method, searching super types when the type itself does not
    /// declare it.
    pub fn method(&self, type_name: &str, method: &str) -> Result<MethodDescriptor, MetadataError> {
        let mut current = Some(type_name.to_owned());
        while let Some(name) = current {
            let descriptor = self.get_type(&name)?;
            if let Some(found) = descriptor.method(method) {
                return Ok(found.clone());
            }
            current = descriptor.super_type.clone();
        }
        Err(MetadataError::UnknownMember {
            type_name: type_name.to_owned(),
            member: method.to_owned(),
        })
    }

    /// Invokes `method` on `target` after checking its arity.
    pub fn invoke(
        &self,
        type_name: &str,
        method: &str,
        target: &mut dyn Any,
        ctx: &mut dyn InvocationContext,
        args: &[StateValue],
    ) -> Result<StateValue, MetadataError> {
        let descriptor = self.method(type_name, method)?;
        if descriptor.params.len() != args.len() {
            return Err(MetadataError::ArityMismatch {
                type_name: type_name.to_owned(),
                method: method.to_owned(),
                expected: descriptor.params.len(),
                actual: args.len(),
            });
        }
        let invoker = descriptor.invoker.as_ref().ok_or_else(|| MetadataError::NoInvoker {
            type_name: type_name.to_owned(),
            method: method.to_owned(),
        })?;
        invoker
            .invoke(target, ctx, args)
            .map_err(|source| MetadataError::Invocation {
                type_name: type_name.to_owned(),
                member: method.to_owned(),
                source,
            })
    }

    /// All properties of a type, super types first.
    pub fn properties(&self, type_name: &str) -> Result<Vec<PropertyDescriptor>, MetadataError> {
        let mut chain = Vec::new();
        let mut current = Some(type_name.to_owned());
        while let Some(name) = current {
            let descriptor = self.get_type(&name)?;
            current = descriptor.super_type.clone();
            chain.push(descriptor);
        }
        Ok(chain
            .iter()
            .rev()
            .flat_map(|descriptor| descriptor.properties.iter().cloned())
            .collect())
    }

    pub fn property(&self, type_name: &str, property: &str) -> Result<Option<PropertyDescriptor>, MetadataError> {
        let mut current = Some(type_name.to_owned());
        while let Some(name) = current {
            let descriptor = self.get_type(&name)?;
            if let Some(found) = descriptor.properties.iter().find(|p| p.name == property) {
                return Ok(Some(found.clone()));
            }
            current = descriptor.super_type.clone();
        }
        Ok(None)
    }

    /// Custom serializer registered for the base of `ty`, if any.
    pub fn serializer(&self, ty: &Type) -> Option<Box<dyn ValueSerializer>> {
        let descriptor = self.inner.read().types.get(ty.base_name()).cloned()?;
        descriptor.serializer.as_ref().map(|factory| factory())
    }

    pub fn proxy(&self, interface: &str, handle: ProxyHandle) -> Result<Box<dyn Any + Send>, MetadataError> {
        let descriptor = self.get_type(interface)?;
        let factory = descriptor
            .proxy
            .as_ref()
            .ok_or_else(|| MetadataError::NoProxy(interface.to_owned()))?;
        Ok(factory(handle))
    }

    /// Whether `type_name` is `ancestor` or inherits from it.
    pub fn is_assignable(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name.to_owned());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.get_type(&name).ok().and_then(|d| d.super_type.clone());
        }
        false
    }
}

impl std::fmt::Debug for TypeDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TypeDataStore")
            .field("bundles", &self.table.bundles().len())
            .field("loaded", &inner.loaded)
            .field("types", &inner.types.len())
            .finish()
    }
}

fn describe(entry: ClassEntry, bundle: &BundleSpec) -> Result<TypeDescriptor, MetadataError> {
    let mut methods = HashMap::with_capacity(entry.methods.len());
    for method in entry.methods {
        let policy = match (method.delayed, method.last_only) {
            (true, true) => {
                return Err(MetadataError::ConflictingPolicy {
                    type_name: entry.identifier,
                    method: method.name,
                });
            }
            (true, false) => DispatchPolicy::Delayed,
            (false, true) => DispatchPolicy::LastOnly,
            (false, false) => DispatchPolicy::Immediate,
        };
        methods.insert(
            method.name.clone(),
            MethodDescriptor {
                name: method.name,
                params: method.params,
                return_type: method.return_type,
                policy,
                no_loading_indicator: method.no_loading_indicator,
                invoker: method.invoker,
            },
        );
    }

    Ok(TypeDescriptor {
        name: entry.identifier,
        kind: entry.kind,
        super_type: entry.super_type,
        bundle: bundle.name().to_owned(),
        constructor: entry.constructor,
        properties: entry
            .properties
            .into_iter()
            .map(|property| PropertyDescriptor {
                name: property.name,
                ty: property.ty,
                setter: property.setter,
            })
            .collect(),
        methods,
        serializer: entry.serializer,
        proxy: entry.proxy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ConnectorId;
    use crate::metadata::TypeKind;
    use crate::metadata::bundle::MethodEntry;
    use crate::metadata::invoker::{Invoker, arg_i64};
    use crate::metadata::types::INT;
    use crate::state::StateObject;

    struct Counter {
        total: i64,
    }

    struct NullContext(ConnectorId);

    impl InvocationContext for NullContext {
        fn connector(&self) -> &ConnectorId {
            &self.0
        }
        fn state_mut(&mut self) -> Option<&mut StateObject> {
            None
        }
        fn call(&mut self, _interface: &str, _method: &str, _args: Vec<StateValue>) {}
    }

    fn counter_entry() -> ClassEntry {
        ClassEntry::rpc_interface("CounterRpc")
            .constructor(|| Box::new(Counter { total: 0 }))
            .method(
                MethodEntry::new("add", vec![Type::new(INT)]).invoker(Invoker::method::<Counter, _>(
                    |counter, _ctx, args| {
                        counter.total += arg_i64(args, 0)?;
                        Ok(())
                    },
                )),
            )
    }

    fn table() -> BundleTable {
        BundleTable::new()
            .with_bundle(BundleSpec::new("__eager", BundleKind::Eager, ["CounterRpc"], || {
                vec![counter_entry()]
            }))
            .with_bundle(BundleSpec::new("charts", BundleKind::Lazy, ["Chart", "ChartState"], || {
                vec![
                    ClassEntry::bean("ChartState").property("points", Type::new(INT)),
                    ClassEntry::connector("Chart").extends("ChartState"),
                ]
            }))
    }

    #[test_timeout::timeout]
    fn lazy_types_are_not_available_until_loaded() {
        let store = TypeDataStore::new(table());
        store.bootstrap().expect("bootstrap");
        assert!(store.has_type("CounterRpc"));
        assert!(matches!(
            store.get_type("Chart"),
            Err(MetadataError::NotYetAvailable { ref bundle, .. }) if bundle == "charts"
        ));
        assert!(matches!(store.get_type("Nope"), Err(MetadataError::UnknownType(_))));

        let chart = store.ensure_loaded("Chart").expect("lazy load");
        assert_eq!(chart.bundle, "charts");
        assert!(store.is_bundle_loaded("charts"));
        let props = store.properties("Chart").expect("properties");
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "points");
        assert_eq!(chart.kind, TypeKind::Connector);
        assert!(store.is_assignable("Chart", "ChartState"));
        assert!(!store.is_assignable("ChartState", "Chart"));
    }

    #[test_timeout::timeout]
    fn loading_twice_is_a_no_op() {
        let store = TypeDataStore::new(table());
        store.load_bundle("charts").expect("first");
        let first = store.get_type("Chart").expect("type");
        store.load_bundle("charts").expect("second");
        let second = store.get_type("Chart").expect("type");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            store.load_bundle("missing"),
            Err(MetadataError::UnknownBundle(_))
        ));
    }

    #[test_timeout::timeout]
    fn invoke_checks_arity_and_runs_the_invoker() {
        let store = TypeDataStore::new(table());
        store.bootstrap().expect("bootstrap");
        let mut target = store.construct("CounterRpc").expect("construct");
        let mut ctx = NullContext(ConnectorId::new("0"));

        store
            .invoke("CounterRpc", "add", target.as_mut(), &mut ctx, &[StateValue::Int(5)])
            .expect("invoke");
        let err = store
            .invoke("CounterRpc", "add", target.as_mut(), &mut ctx, &[])
            .unwrap_err();
        assert!(matches!(err, MetadataError::ArityMismatch { expected: 1, actual: 0, .. }));
        let err = store
            .invoke("CounterRpc", "reset", target.as_mut(), &mut ctx, &[])
            .unwrap_err();
        assert!(matches!(err, MetadataError::UnknownMember { .. }));

        let counter = target.downcast_ref::<Counter>().expect("counter");
        assert_eq!(counter.total, 5);
    }

    #[test_timeout::timeout]
    fn conflicting_method_flags_reject_the_whole_bundle() {
        let table = BundleTable::new().with_bundle(BundleSpec::new(
            "__eager",
            BundleKind::Eager,
            Vec::<String>::new(),
            || {
                vec![
                    ClassEntry::bean("Fine"),
                    ClassEntry::rpc_interface("Broken")
                        .method(MethodEntry::new("ping", vec![]).delayed().last_only()),
                ]
            },
        ));
        let store = TypeDataStore::new(table);
        let err = store.bootstrap().unwrap_err();
        assert!(matches!(err, MetadataError::ConflictingPolicy { ref method, .. } if method == "ping"));
        assert!(!store.has_type("Fine"));
        assert!(!store.is_bundle_loaded("__eager"));
    }
}
