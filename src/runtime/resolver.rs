//! Per-node property storage and resolvers
//!
//! A node owns a [`PropertyStore`]: its property edges plus the resolvers
//! that recompute outputs whenever a declared input changes. The graph only
//! asks the store to resolve itself and to accept values forwarded across
//! connections; it never holds property state of its own.
//!
//! One invocation of [`PropertyStore::resolve`] runs each resolver at most
//! once, in registration order, against a snapshot of the node's properties.
//! A resolver fires if any of its inputs is dirty. Values written by a
//! resolver dirty inputs of *later* resolvers within the same invocation; if
//! they feed an *earlier* resolver they stay dirty so the node is resolved
//! again in the next generation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::errors::{PropertyError, ResolveError};
use super::property::{PropertyData, PropertyEdge, PropertyKey, PropertyValue, Scope};

/// Resolver callback
pub type ResolverFn =
    Arc<dyn Fn(&mut ResolverContext<'_>) -> Result<(), ResolveError> + Send + Sync>;

#[derive(Clone)]
struct Resolver {
    inputs: Vec<usize>,
    outputs: Vec<PropertyKey>,
    func: ResolverFn,
}

/// View of a node's properties handed to a running resolver
pub struct ResolverContext<'a> {
    node: &'a str,
    props: &'a mut [PropertyEdge],
    outputs: &'a [PropertyKey],
    written: Vec<usize>,
}

impl ResolverContext<'_> {
    /// Unique ID of the node being resolved
    pub fn node(&self) -> &str {
        self.node
    }

    /// Current value of a property, `None` if unset, unknown or of another type
    pub fn get<T: PropertyData>(&self, name: &str, scope: Scope) -> Option<T> {
        find(self.props, name, scope).and_then(|i| self.props[i].get::<T>())
    }

    /// Whether a property changed since the node was last resolved
    pub fn is_dirty(&self, name: &str, scope: Scope) -> bool {
        find(self.props, name, scope).is_some_and(|i| self.props[i].is_dirty())
    }

    /// All properties with the given name that changed since the node was
    /// last resolved, with their values
    pub fn dirty_values<T: PropertyData>(&self, name: &str) -> Vec<(Scope, T)> {
        self.props
            .iter()
            .filter(|p| p.name() == name && p.is_dirty())
            .filter_map(|p| p.get::<T>().map(|v| (p.scope(), v)))
            .collect()
    }

    /// Write a property declared as an output of this resolver
    pub fn set<T: PropertyData>(
        &mut self,
        name: &str,
        scope: Scope,
        value: T,
    ) -> Result<(), ResolveError> {
        if !self.outputs.iter().any(|k| k.name == name && k.scope == scope) {
            return Err(ResolveError::AccessViolation {
                node: self.node.to_string(),
                name: name.to_string(),
                scope,
            });
        }
        let index = find(self.props, name, scope).ok_or_else(|| PropertyError::NotFound {
            node: self.node.to_string(),
            name: name.to_string(),
            scope,
        })?;
        if self.props[index].update(value.into_value())? {
            self.written.push(index);
        }
        Ok(())
    }

    /// Build a failure to return from the resolver
    pub fn fail(&self, reason: impl Into<String>) -> ResolveError {
        ResolveError::ResolverFailed {
            node: self.node.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of resolving one node
#[derive(Debug, Default)]
pub(crate) struct NodeResolution {
    /// Number of resolver callbacks that ran
    pub(crate) invocations: usize,
    /// Edge properties that changed and must be forwarded across connections
    pub(crate) edges: Vec<(PropertyKey, PropertyValue)>,
    /// Set when the resolver chain failed; snapshot values were kept
    pub(crate) error: Option<ResolveError>,
}

struct StoreInner {
    props: Vec<PropertyEdge>,
    resolvers: Vec<Resolver>,
    frozen: bool,
}

/// Properties and resolvers owned by a single node
pub struct PropertyStore {
    owner: String,
    inner: Mutex<StoreInner>,
}

impl PropertyStore {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            inner: Mutex::new(StoreInner {
                props: Vec::new(),
                resolvers: Vec::new(),
                frozen: false,
            }),
        }
    }

    /// Add a property. Fails if `(name, scope)` is already registered.
    pub fn register(&self, prop: PropertyEdge) -> Result<(), PropertyError> {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return Err(self.frozen_error(prop.name()));
        }
        if find(&inner.props, prop.name(), prop.scope()).is_some() {
            return Err(PropertyError::Duplicate {
                node: self.owner.clone(),
                name: prop.name().to_string(),
                scope: prop.scope(),
            });
        }
        trace!("[{}] Registered property {}", self.owner, prop.key());
        inner.props.push(prop);
        Ok(())
    }

    /// Add a resolver. All inputs and outputs must already be registered.
    pub fn add_resolver<F>(
        &self,
        inputs: &[PropertyKey],
        outputs: &[PropertyKey],
        func: F,
    ) -> Result<(), PropertyError>
    where
        F: Fn(&mut ResolverContext<'_>) -> Result<(), ResolveError> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return Err(self.frozen_error("<resolver>"));
        }
        let mut input_indices = Vec::with_capacity(inputs.len());
        for key in inputs.iter().chain(outputs) {
            let index = find(&inner.props, &key.name, key.scope).ok_or_else(|| {
                PropertyError::NotFound {
                    node: self.owner.clone(),
                    name: key.name.clone(),
                    scope: key.scope,
                }
            })?;
            if input_indices.len() < inputs.len() {
                input_indices.push(index);
            }
        }
        inner.resolvers.push(Resolver {
            inputs: input_indices,
            outputs: outputs.to_vec(),
            func: Arc::new(func),
        });
        Ok(())
    }

    /// Read a property value. `Ok(None)` means registered but unset.
    pub fn get<T: PropertyData>(&self, name: &str, scope: Scope) -> Result<Option<T>, PropertyError> {
        let inner = self.inner.lock();
        let prop = self.lookup(&inner.props, name, scope)?;
        if prop.property_type() != T::TYPE {
            return Err(PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: prop.property_type(),
                actual: T::TYPE,
            });
        }
        Ok(prop.get::<T>())
    }

    pub fn get_value(&self, name: &str, scope: Scope) -> Result<Option<PropertyValue>, PropertyError> {
        let inner = self.inner.lock();
        Ok(self.lookup(&inner.props, name, scope)?.value().cloned())
    }

    pub fn contains(&self, name: &str, scope: Scope) -> bool {
        find(&self.inner.lock().props, name, scope).is_some()
    }

    /// Record a desired value and mark the property dirty.
    ///
    /// Even an unchanged value is marked dirty, so the next resolve pass
    /// re-applies it to everything that depends on it.
    pub fn set(&self, name: &str, scope: Scope, value: PropertyValue) -> Result<(), PropertyError> {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return Err(self.frozen_error(name));
        }
        let index = find(&inner.props, name, scope).ok_or_else(|| PropertyError::NotFound {
            node: self.owner.clone(),
            name: name.to_string(),
            scope,
        })?;
        let prop = &mut inner.props[index];
        prop.update(value)?;
        prop.mark_dirty();
        Ok(())
    }

    /// Accept a value forwarded from a connected peer. Returns true if the
    /// property exists and its value changed. Frozen stores and unknown
    /// properties silently ignore the value.
    pub(crate) fn forward(
        &self,
        name: &str,
        scope: Scope,
        value: &PropertyValue,
    ) -> Result<bool, PropertyError> {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return Ok(false);
        }
        match find(&inner.props, name, scope) {
            Some(index) => inner.props[index].update(value.clone()),
            None => Ok(false),
        }
    }

    /// Mark every edge property attached to the given port dirty
    pub(crate) fn touch_port(&self, scope: Scope) {
        let mut inner = self.inner.lock();
        for prop in inner.props.iter_mut().filter(|p| p.scope() == scope) {
            if prop.value().is_some() {
                prop.mark_dirty();
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock();
        !inner.frozen && inner.props.iter().any(PropertyEdge::is_dirty)
    }

    pub(crate) fn clear_dirty(&self) {
        let mut inner = self.inner.lock();
        inner.props.iter_mut().for_each(PropertyEdge::mark_clean);
    }

    /// Stop accepting mutation; values stay readable
    pub(crate) fn freeze(&self) {
        let mut inner = self.inner.lock();
        inner.frozen = true;
        inner.props.iter_mut().for_each(PropertyEdge::mark_clean);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().frozen
    }

    pub fn keys(&self) -> Vec<PropertyKey> {
        self.inner.lock().props.iter().map(|p| p.key().clone()).collect()
    }

    /// Run every resolver whose inputs are dirty, once, then write the
    /// result back and clean the node.
    pub(crate) fn resolve(&self) -> NodeResolution {
        let (mut props, resolvers) = {
            let inner = self.inner.lock();
            if inner.frozen {
                return NodeResolution::default();
            }
            (inner.props.clone(), inner.resolvers.clone())
        };

        let initially_dirty: Vec<bool> = props.iter().map(PropertyEdge::is_dirty).collect();
        let mut touched = initially_dirty.clone();
        // Index of the resolver that last changed each property
        let mut last_writer: Vec<Option<usize>> = vec![None; props.len()];
        let mut outcome = NodeResolution::default();

        for (position, resolver) in resolvers.iter().enumerate() {
            if !resolver.inputs.iter().any(|&i| props[i].is_dirty()) {
                continue;
            }
            outcome.invocations += 1;
            let mut ctx = ResolverContext {
                node: &self.owner,
                props: &mut props,
                outputs: &resolver.outputs,
                written: Vec::new(),
            };
            let result = (resolver.func)(&mut ctx);
            for index in ctx.written {
                touched[index] = true;
                last_writer[index] = Some(position);
            }
            if let Err(e) = result {
                outcome.error = Some(e);
                break;
            }
        }

        for (index, prop) in props.iter_mut().enumerate() {
            let feeds_earlier = last_writer[index].is_some_and(|writer| {
                resolvers[..writer].iter().any(|r| r.inputs.contains(&index))
            });
            if feeds_earlier && outcome.error.is_none() {
                prop.mark_dirty();
            } else {
                prop.mark_clean();
            }
        }

        if outcome.error.is_none() {
            outcome.edges = props
                .iter()
                .zip(&touched)
                .filter(|(p, touched)| **touched && p.scope().is_edge())
                .filter_map(|(p, _)| p.value().map(|v| (p.key().clone(), v.clone())))
                .collect();
        }

        let mut inner = self.inner.lock();
        if !inner.frozen {
            for (index, prop) in props.into_iter().enumerate() {
                // Keep marks made by others while the resolvers ran
                let marked_meanwhile = inner.props[index].is_dirty() && !initially_dirty[index];
                inner.props[index] = prop;
                if marked_meanwhile {
                    inner.props[index].mark_dirty();
                }
            }
        }
        outcome
    }

    fn lookup<'a>(
        &self,
        props: &'a [PropertyEdge],
        name: &str,
        scope: Scope,
    ) -> Result<&'a PropertyEdge, PropertyError> {
        find(props, name, scope)
            .map(|i| &props[i])
            .ok_or_else(|| PropertyError::NotFound {
                node: self.owner.clone(),
                name: name.to_string(),
                scope,
            })
    }

    fn frozen_error(&self, name: &str) -> PropertyError {
        PropertyError::Frozen {
            node: self.owner.clone(),
            name: name.to_string(),
        }
    }
}

fn find(props: &[PropertyEdge], name: &str, scope: Scope) -> Option<usize> {
    props
        .iter()
        .position(|p| p.name() == name && p.scope() == scope)
}
