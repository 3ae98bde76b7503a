//! Property graph: connectivity between nodes and the resolve loop
//!
//! The graph holds `Weak` references to its nodes in insertion order and the
//! list of port connections. It never owns property state: every property
//! lives in the [`PropertyStore`] of the node that registered it.
//!
//! A resolve pass runs in generations. In each generation every dirty node
//! is resolved at most once, in ascending insertion order; edge properties
//! it changed are forwarded across its connections, which can dirty
//! neighbours (later nodes in the same generation, earlier ones in the
//! next). The pass ends when no node is dirty, or fails with
//! [`ResolveError::Diverged`] once the generation cap is hit.
//!
//! Only one pass runs at a time. Setters block until the running pass
//! completes. A failed pass keeps every value resolvers already applied;
//! remaining dirty flags are cleared so unrelated properties stay usable.
//!
//! [`PropertyStore`]: super::resolver::PropertyStore

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};

use super::errors::{ConnectionError, ResolveError};
use super::node::Node;
use super::ports::PortDirection;
use super::property::{PropertyData, PropertyEdge, PropertyKey, PropertyValue, Scope};

/// Default cap on resolve generations per pass
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Position of a node in the graph, in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// A directed connection from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub src_node: NodeId,
    pub src_port: usize,
    pub dst_node: NodeId,
    pub dst_port: usize,
}

/// Statistics of a completed resolve pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Generations that resolved at least one node
    pub generations: usize,
    /// Resolver callbacks invoked across all nodes
    pub invocations: usize,
}

struct NodeEntry {
    name: String,
    node: Weak<dyn Node>,
}

#[derive(Default)]
struct GraphState {
    nodes: Vec<NodeEntry>,
    connections: Vec<Connection>,
}

pub struct Graph {
    state: RwLock<GraphState>,
    pass_lock: Mutex<()>,
    resolving_thread: Mutex<Option<ThreadId>>,
    max_iterations: AtomicUsize,
}

/// Held for the duration of a pass (or any other exclusive graph section)
struct PassGuard<'a> {
    graph: &'a Graph,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.graph.resolving_thread.lock() = None;
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_max_iterations(DEFAULT_MAX_ITERATIONS)
    }

    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            pass_lock: Mutex::new(()),
            resolving_thread: Mutex::new(None),
            max_iterations: AtomicUsize::new(max_iterations),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations.load(Ordering::Relaxed)
    }

    /// Change the generation cap. Applies from the next pass on.
    pub fn set_max_iterations(&self, max_iterations: usize) {
        self.max_iterations.store(max_iterations, Ordering::Relaxed);
    }

    /// Add a node. The graph keeps only a weak reference.
    pub fn insert(&self, node: &Arc<dyn Node>) -> NodeId {
        let mut state = self.state.write();
        let id = NodeId::new(state.nodes.len());
        let name = node.unique_id();
        debug!("Inserted node {} as {:?}", name, id);
        state.nodes.push(NodeEntry {
            name,
            node: Arc::downgrade(node),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<dyn Node>> {
        self.state
            .read()
            .nodes
            .get(id.as_usize())
            .and_then(|entry| entry.node.upgrade())
    }

    pub fn node_id(&self, unique_id: &str) -> Option<NodeId> {
        self.state
            .read()
            .nodes
            .iter()
            .position(|entry| entry.name == unique_id)
            .map(NodeId::new)
    }

    pub fn num_nodes(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.read().connections.clone()
    }

    /// Connect an output port to an input port.
    ///
    /// Each input port takes at most one connection; outputs may fan out.
    /// Edge properties on both ends are marked dirty so the next resolve
    /// pass forwards them across the new connection. Waits for a running
    /// pass, since that pass would otherwise overwrite the dirty marks.
    pub fn connect(
        &self,
        src_node: NodeId,
        src_port: usize,
        dst_node: NodeId,
        dst_port: usize,
    ) -> Result<(), ConnectionError> {
        let _pass = self.begin_pass().map_err(|_| ConnectionError::Resolving)?;
        let src = self.live_node(src_node)?;
        let dst = self.live_node(dst_node)?;

        if src_port >= src.num_output_ports() {
            return Err(ConnectionError::PortNotFound {
                node: src.unique_id(),
                port: src_port,
                direction: PortDirection::Output,
            });
        }
        if dst_port >= dst.num_input_ports() {
            return Err(ConnectionError::PortNotFound {
                node: dst.unique_id(),
                port: dst_port,
                direction: PortDirection::Input,
            });
        }

        {
            let mut state = self.state.write();
            if state
                .connections
                .iter()
                .any(|c| c.dst_node == dst_node && c.dst_port == dst_port)
            {
                return Err(ConnectionError::DuplicateConnection {
                    node: dst.unique_id(),
                    port: dst_port,
                });
            }
            state.connections.push(Connection {
                src_node,
                src_port,
                dst_node,
                dst_port,
            });
        }

        debug!(
            "Connected {}:{} -> {}:{}",
            src.unique_id(),
            src_port,
            dst.unique_id(),
            dst_port
        );
        src.properties().touch_port(Scope::OutputEdge(src_port));
        dst.properties().touch_port(Scope::InputEdge(dst_port));
        Ok(())
    }

    /// Input ports fed by the given output port
    pub fn downstream(&self, node: NodeId, port: usize) -> Vec<(NodeId, usize)> {
        self.state
            .read()
            .connections
            .iter()
            .filter(|c| c.src_node == node && c.src_port == port)
            .map(|c| (c.dst_node, c.dst_port))
            .collect()
    }

    /// Output port feeding the given input port
    pub fn upstream(&self, node: NodeId, port: usize) -> Option<(NodeId, usize)> {
        self.state
            .read()
            .connections
            .iter()
            .find(|c| c.dst_node == node && c.dst_port == port)
            .map(|c| (c.src_node, c.src_port))
    }

    /// Register a property on a node of this graph
    pub fn register(&self, node: NodeId, prop: PropertyEdge) -> Result<(), ResolveError> {
        let node = self.live_node(node).map_err(not_found)?;
        Ok(node.register_property(prop)?)
    }

    /// Record a desired value for a property and mark its node dirty.
    ///
    /// Blocks while another thread is resolving. Resolvers run later may
    /// still override the value.
    pub fn set<T: PropertyData>(
        &self,
        node: NodeId,
        name: &str,
        scope: Scope,
        value: T,
    ) -> Result<(), ResolveError> {
        let _pass = self.begin_pass()?;
        self.set_value(node, name, scope, value.into_value())
    }

    /// Set a property and resolve, without letting another pass in between
    pub fn set_and_resolve<T: PropertyData>(
        &self,
        node: NodeId,
        name: &str,
        scope: Scope,
        value: T,
    ) -> Result<ResolveReport, ResolveError> {
        self.set_value_and_resolve(node, name, scope, value.into_value())
    }

    pub(crate) fn set_value_and_resolve(
        &self,
        node: NodeId,
        name: &str,
        scope: Scope,
        value: PropertyValue,
    ) -> Result<ResolveReport, ResolveError> {
        let _pass = self.begin_pass()?;
        self.set_value(node, name, scope, value)?;
        self.run_pass()
    }

    /// Propagate all pending changes to a fixed point
    pub fn resolve(&self) -> Result<ResolveReport, ResolveError> {
        let _pass = self.begin_pass()?;
        self.run_pass()
    }

    /// Run `f` while no resolve pass can start
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> Result<R, ResolveError> {
        let _pass = self.begin_pass()?;
        Ok(f())
    }

    fn begin_pass(&self) -> Result<PassGuard<'_>, ResolveError> {
        let me = thread::current().id();
        if *self.resolving_thread.lock() == Some(me) {
            return Err(ResolveError::Reentrant);
        }
        let lock = self.pass_lock.lock();
        *self.resolving_thread.lock() = Some(me);
        Ok(PassGuard {
            graph: self,
            _lock: lock,
        })
    }

    fn set_value(
        &self,
        node: NodeId,
        name: &str,
        scope: Scope,
        value: PropertyValue,
    ) -> Result<(), ResolveError> {
        let node = self.live_node(node).map_err(not_found)?;
        trace!("[{}] set {}@{} = {}", node.unique_id(), name, scope, value);
        Ok(node.properties().set(name, scope, value)?)
    }

    fn run_pass(&self) -> Result<ResolveReport, ResolveError> {
        let nodes: Vec<Option<Arc<dyn Node>>> = self
            .state
            .read()
            .nodes
            .iter()
            .map(|entry| entry.node.upgrade())
            .collect();
        let max_iterations = self.max_iterations();
        let mut report = ResolveReport::default();

        loop {
            let mut resolved_any = false;
            for (position, node) in nodes.iter().enumerate() {
                let Some(node) = node else { continue };
                if !node.properties().is_dirty() {
                    continue;
                }
                if !resolved_any {
                    if report.generations == max_iterations {
                        warn!(
                            "Resolve pass diverged after {} generations ({} resolver invocations)",
                            report.generations, report.invocations
                        );
                        Self::abandon(&nodes);
                        return Err(ResolveError::Diverged { max_iterations });
                    }
                    report.generations += 1;
                    resolved_any = true;
                }

                let outcome = node.properties().resolve();
                report.invocations += outcome.invocations;
                if let Some(e) = outcome.error {
                    warn!("[{}] Resolve pass aborted: {}", node.unique_id(), e);
                    Self::abandon(&nodes);
                    return Err(e);
                }
                for (key, value) in &outcome.edges {
                    let id = NodeId::new(position);
                    if let Err(e) = self.forward(id, &**node, key, value, &nodes) {
                        Self::abandon(&nodes);
                        return Err(e);
                    }
                }
            }
            if !resolved_any {
                break;
            }
        }

        debug!(
            "Resolve pass converged: {} generations, {} resolver invocations",
            report.generations, report.invocations
        );
        Ok(report)
    }

    /// Copy an edge property to the matching edge property of every peer
    /// connected to the same port
    fn forward(
        &self,
        id: NodeId,
        node: &dyn Node,
        key: &PropertyKey,
        value: &PropertyValue,
        nodes: &[Option<Arc<dyn Node>>],
    ) -> Result<(), ResolveError> {
        let peers: Vec<(NodeId, Scope)> = match key.scope {
            Scope::OutputEdge(port) if port < node.num_output_ports() => self
                .downstream(id, port)
                .into_iter()
                .map(|(peer, peer_port)| (peer, Scope::InputEdge(peer_port)))
                .collect(),
            Scope::InputEdge(port) if port < node.num_input_ports() => self
                .upstream(id, port)
                .map(|(peer, peer_port)| (peer, Scope::OutputEdge(peer_port)))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        };

        for (peer_id, peer_scope) in peers {
            let Some(Some(peer)) = nodes.get(peer_id.as_usize()) else {
                continue;
            };
            let active = match peer_scope {
                Scope::InputEdge(port) => port < peer.num_input_ports(),
                Scope::OutputEdge(port) => port < peer.num_output_ports(),
                _ => false,
            };
            if active && peer.properties().forward(&key.name, peer_scope, value)? {
                trace!(
                    "Forwarded {} = {} from {} to {}@{}",
                    key,
                    value,
                    node.unique_id(),
                    peer.unique_id(),
                    peer_scope
                );
            }
        }
        Ok(())
    }

    fn abandon(nodes: &[Option<Arc<dyn Node>>]) {
        for node in nodes.iter().flatten() {
            node.properties().clear_dirty();
        }
    }

    fn live_node(&self, id: NodeId) -> Result<Arc<dyn Node>, ConnectionError> {
        self.node(id)
            .ok_or_else(|| ConnectionError::NodeNotFound(format!("{:?}", id)))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(err: ConnectionError) -> ResolveError {
    match err {
        ConnectionError::NodeNotFound(name) => ResolveError::NodeNotFound(name),
        other => ResolveError::NodeNotFound(other.to_string()),
    }
}
