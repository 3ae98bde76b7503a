//! Hardware block: a graph node with NoC identity, registers and a lifecycle
//!
//! Every block kind shares this implementation. Kind-specific behaviour
//! plugs in through [`BlockKind`]: `setup()` registers custom properties,
//! resolvers and action handlers while the block is constructed, `deinit()`
//! quiesces hardware before teardown.
//!
//! Lifecycle: `Constructed -> Active -> Deinitialized -> ShutDown`.
//! `shutdown()` always runs `deinit()` first, and both run at most once.
//! Register access is revoked as soon as `deinit()` returns; afterwards
//! register calls are absorbed with a warning. A shut-down block keeps its
//! last resolved property values readable but rejects further mutation.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Once, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::action::{Action, Endpoint};
use super::block_args::BlockArgs;
use super::block_id::BlockId;
use super::device::{ClockInterface, MbController};
use super::errors::{ActionError, ConstructionError, PortError, PropertyError, ResolveError};
use super::graph::{DEFAULT_MAX_ITERATIONS, Graph, NodeId, ResolveReport};
use super::node::Node;
use super::ports::{PortCount, PortDirection};
use super::property::{
    PROP_TICK_RATE, PropertyData, PropertyEdge, PropertyKey, PropertyValue, Scope,
};
use super::registers::{RegisterAccess, RegisterIface};
use super::resolver::{PropertyStore, ResolverContext};
use super::router::ActionRouter;

/// 32-bit identifier shared by all blocks of the same type
pub type NocId = u32;

/// Tick rate reported when neither the property nor the clock know better
pub const DEFAULT_TICK_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Constructed,
    Active,
    Deinitialized,
    ShutDown,
}

/// Construction record populated by the framework
pub struct BlockConfig {
    pub version: u32,
    pub noc_id: NocId,
    pub block_id: BlockId,
    pub num_input_ports: usize,
    pub num_output_ports: usize,
    pub block_args: BlockArgs,
    pub regs: Arc<dyn RegisterAccess>,
    pub clock: Arc<dyn ClockInterface>,
    pub mb_controller: Option<Arc<dyn MbController>>,
}

impl BlockConfig {
    /// Layout version understood by this framework
    pub const VERSION: u32 = 1;

    /// A config for a block with one input and one output port
    pub fn new(
        noc_id: NocId,
        block_id: BlockId,
        regs: Arc<dyn RegisterAccess>,
        clock: Arc<dyn ClockInterface>,
    ) -> Self {
        Self {
            version: Self::VERSION,
            noc_id,
            block_id,
            num_input_ports: 1,
            num_output_ports: 1,
            block_args: BlockArgs::new(),
            regs,
            clock,
            mb_controller: None,
        }
    }

    pub fn with_ports(mut self, num_input_ports: usize, num_output_ports: usize) -> Self {
        self.num_input_ports = num_input_ports;
        self.num_output_ports = num_output_ports;
        self
    }

    pub fn with_block_args(mut self, block_args: BlockArgs) -> Self {
        self.block_args = block_args;
        self
    }

    pub fn with_mb_controller(mut self, mb_controller: Arc<dyn MbController>) -> Self {
        self.mb_controller = Some(mb_controller);
        self
    }
}

/// Kind-specific behaviour of a block
pub trait BlockKind: Send + Sync {
    /// Called once while the block is constructed, before it joins a graph
    fn setup(&self, _ctx: &BlockContext<'_>) -> Result<(), ConstructionError> {
        Ok(())
    }

    /// Quiesce the hardware (e.g. stop a running generator). Called exactly
    /// once before teardown, while registers are still accessible.
    fn deinit(&self, _ctx: &BlockContext<'_>) {}
}

/// Handler for actions with a given key, called with the arrival port
pub type ActionHandler = Arc<dyn Fn(&BlockContext<'_>, usize, &Action) + Send + Sync>;

struct Attachment {
    graph: Weak<Graph>,
    node_id: NodeId,
    router: ActionRouter,
}

pub struct Block {
    noc_id: NocId,
    block_id: BlockId,
    unique_id: String,
    inputs: PortCount,
    outputs: PortCount,
    props: PropertyStore,
    regs: RegisterIface,
    clock: Arc<dyn ClockInterface>,
    mb_controller: Option<Arc<dyn MbController>>,
    block_args: BlockArgs,
    kind: Box<dyn BlockKind>,
    state: Mutex<LifecycleState>,
    deinit_once: Once,
    handlers: RwLock<HashMap<String, ActionHandler>>,
    fallback_handler: RwLock<Option<ActionHandler>>,
    attachment: OnceLock<Attachment>,
}

impl Block {
    pub(crate) fn new(
        config: BlockConfig,
        kind: Box<dyn BlockKind>,
    ) -> Result<Arc<Self>, ConstructionError> {
        if config.version != BlockConfig::VERSION {
            return Err(ConstructionError::UnsupportedVersion {
                found: config.version,
                expected: BlockConfig::VERSION,
            });
        }
        let unique_id = config.block_id.to_string();
        let block = Arc::new(Self {
            noc_id: config.noc_id,
            block_id: config.block_id,
            inputs: PortCount::new(PortDirection::Input, config.num_input_ports),
            outputs: PortCount::new(PortDirection::Output, config.num_output_ports),
            props: PropertyStore::new(unique_id.clone()),
            regs: RegisterIface::new(unique_id.clone(), config.regs),
            clock: config.clock,
            mb_controller: config.mb_controller,
            block_args: config.block_args,
            kind,
            state: Mutex::new(LifecycleState::Constructed),
            deinit_once: Once::new(),
            handlers: RwLock::new(HashMap::new()),
            fallback_handler: RwLock::new(None),
            attachment: OnceLock::new(),
            unique_id,
        });

        block.register_tick_rate()?;
        block.kind.setup(&BlockContext { block: &*block })?;
        debug!(
            "[{}] Constructed (NoC ID 0x{:08X}, {} inputs, {} outputs)",
            block.unique_id,
            block.noc_id,
            block.inputs.get(),
            block.outputs.get()
        );
        Ok(block)
    }

    /// One `tick_rate` property per port plus a block-scoped one, kept equal
    /// by a single resolver
    fn register_tick_rate(&self) -> Result<(), PropertyError> {
        let mut keys = vec![PropertyKey::new(PROP_TICK_RATE, Scope::Block)];
        for ports in [&self.inputs, &self.outputs] {
            let direction = ports.direction();
            keys.extend(
                (0..ports.get()).map(|p| PropertyKey::new(PROP_TICK_RATE, direction.edge_scope(p))),
            );
        }
        for key in &keys {
            self.props.register(PropertyEdge::new::<f64>(PROP_TICK_RATE, key.scope))?;
        }

        let scopes: Vec<Scope> = keys.iter().map(|k| k.scope).collect();
        let clock = Arc::clone(&self.clock);
        let last_notified = Mutex::new(None::<f64>);
        self.props.add_resolver(&keys, &keys, move |ctx: &mut ResolverContext<'_>| {
            let dirty = ctx.dirty_values::<f64>(PROP_TICK_RATE);
            // A rate set on the block itself wins over rates arriving on edges
            let rate = dirty
                .iter()
                .find(|(scope, _)| *scope == Scope::Block)
                .or_else(|| dirty.first())
                .map(|(_, rate)| *rate);
            let Some(rate) = rate else {
                return Ok(());
            };
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ctx.fail(format!("invalid tick rate {}", rate)));
            }
            for scope in &scopes {
                ctx.set(PROP_TICK_RATE, *scope, rate)?;
            }
            let mut last = last_notified.lock();
            if *last != Some(rate) {
                *last = Some(rate);
                clock.tick_rate_resolved(rate);
            }
            Ok(())
        })
    }

    /// NoC ID of this block's type
    pub fn noc_id(&self) -> NocId {
        self.noc_id
    }

    /// Unique block ID, e.g. `0/FFT#1`
    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    /// Arguments the framework passed in at construction
    pub fn block_args(&self) -> &BlockArgs {
        &self.block_args
    }

    /// The motherboard controller, if this block requested it and the
    /// framework granted the request
    pub fn mb_controller(&self) -> Option<Arc<dyn MbController>> {
        self.mb_controller.clone()
    }

    /// Register interface. Inert after `deinit()`.
    pub fn regs(&self) -> &RegisterIface {
        &self.regs
    }

    pub fn clock(&self) -> &Arc<dyn ClockInterface> {
        &self.clock
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Position of this block in its graph, once attached
    pub fn node_id(&self) -> Option<NodeId> {
        self.attachment.get().map(|a| a.node_id)
    }

    /// Tick rate of the block's timebase.
    ///
    /// Before any rate was resolved this falls back to the clock's current
    /// rate, then to [`DEFAULT_TICK_RATE`].
    pub fn tick_rate(&self) -> f64 {
        match self.props.get::<f64>(PROP_TICK_RATE, Scope::Block) {
            Ok(Some(rate)) if rate > 0.0 => rate,
            _ => {
                let rate = self.clock.current_rate();
                if rate > 0.0 { rate } else { DEFAULT_TICK_RATE }
            }
        }
    }

    /// Update the tick rate of this block and of every block it is
    /// (transitively) connected to.
    ///
    /// Triggers a resolve pass on the owning graph and blocks until it is
    /// done.
    ///
    /// Rates that are not finite and positive are rejected before anything
    /// is written.
    pub fn set_tick_rate(&self, rate: f64) -> Result<ResolveReport, ResolveError> {
        info!("[{}] Setting tick rate to {} Hz", self.unique_id, rate);
        self.set_and_resolve(PROP_TICK_RATE, Scope::Block, rate.into_value())
    }

    pub fn get_property<T: PropertyData>(
        &self,
        name: &str,
        scope: Scope,
    ) -> Result<Option<T>, PropertyError> {
        self.props.get(name, scope)
    }

    /// Set a property and resolve the graph
    pub fn set_property<T: PropertyData>(
        &self,
        name: &str,
        scope: Scope,
        value: T,
    ) -> Result<ResolveReport, ResolveError> {
        self.set_and_resolve(name, scope, value.into_value())
    }

    fn set_and_resolve(
        &self,
        name: &str,
        scope: Scope,
        value: PropertyValue,
    ) -> Result<ResolveReport, ResolveError> {
        if name == PROP_TICK_RATE
            && let PropertyValue::F64(rate) = value
            && !(rate.is_finite() && rate > 0.0)
        {
            warn!("[{}] Rejecting tick rate {} Hz", self.unique_id, rate);
            return Err(ResolveError::ResolverFailed {
                node: self.unique_id.clone(),
                reason: format!("invalid tick rate {}", rate),
            });
        }

        if let Some(attachment) = self.attachment.get()
            && let Some(graph) = attachment.graph.upgrade()
        {
            return graph.set_value_and_resolve(attachment.node_id, name, scope, value);
        }

        // Not part of a graph: resolve this block on its own
        self.props.set(name, scope, value)?;
        let mut report = ResolveReport::default();
        while self.props.is_dirty() {
            if report.generations == DEFAULT_MAX_ITERATIONS {
                self.props.clear_dirty();
                return Err(ResolveError::Diverged {
                    max_iterations: DEFAULT_MAX_ITERATIONS,
                });
            }
            report.generations += 1;
            let outcome = self.props.resolve();
            report.invocations += outcome.invocations;
            if let Some(e) = outcome.error {
                return Err(e);
            }
        }
        Ok(report)
    }

    /// Lower the number of input ports. Fails if `num_ports` exceeds the
    /// current count; ports past the new count become inactive.
    pub(crate) fn set_num_input_ports(&self, num_ports: usize) -> Result<(), PortError> {
        self.inputs.reduce(&self.unique_id, num_ports)?;
        info!("[{}] Input port count set to {}", self.unique_id, num_ports);
        Ok(())
    }

    /// Lower the number of output ports, see [`Self::set_num_input_ports`]
    pub(crate) fn set_num_output_ports(&self, num_ports: usize) -> Result<(), PortError> {
        self.outputs.reduce(&self.unique_id, num_ports)?;
        info!("[{}] Output port count set to {}", self.unique_id, num_ports);
        Ok(())
    }

    /// Send an action out of one of this block's ports to every block
    /// connected there. Returns the number of recipients.
    pub fn post_action(
        &self,
        direction: PortDirection,
        port: usize,
        action: Action,
    ) -> Result<usize, ActionError> {
        let ports = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        ports.check(&self.unique_id, port)?;

        let attachment = self
            .attachment
            .get()
            .ok_or_else(|| ActionError::Detached(self.block_id.clone()))?;
        let graph = attachment
            .graph
            .upgrade()
            .ok_or(ActionError::RouterStopped)?;
        let peers: Vec<(NodeId, usize)> = match direction {
            PortDirection::Output => graph.downstream(attachment.node_id, port),
            PortDirection::Input => graph.upstream(attachment.node_id, port).into_iter().collect(),
        };

        let source = Endpoint {
            block: self.block_id.clone(),
            port,
        };
        let mut sent = 0;
        for (peer, peer_port) in peers {
            let Some(node) = graph.node(peer) else {
                continue;
            };
            attachment.router.send_from(
                Some(source.clone()),
                &node.unique_id(),
                peer_port,
                action.clone(),
            )?;
            sent += 1;
        }
        Ok(sent)
    }

    pub(crate) fn attach(&self, graph: &Arc<Graph>, node_id: NodeId, router: ActionRouter) {
        let attachment = Attachment {
            graph: Arc::downgrade(graph),
            node_id,
            router,
        };
        if self.attachment.set(attachment).is_err() {
            warn!("[{}] Already attached to a graph", self.unique_id);
        }
    }

    pub(crate) fn activate(&self) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Constructed {
            *state = LifecycleState::Active;
            info!("[{}] Active", self.unique_id);
        }
    }

    /// Give the block a chance to quiesce, then revoke register access.
    /// Runs at most once.
    pub(crate) fn deinit(&self) {
        self.deinit_once.call_once(|| {
            debug!("[{}] Deinitializing", self.unique_id);
            self.kind.deinit(&BlockContext { block: self });
            self.regs.revoke();
            *self.state.lock() = LifecycleState::Deinitialized;
            info!("[{}] Deinitialized", self.unique_id);
        });
    }

    /// `deinit()`, then permanently invalidate registers and freeze
    /// properties. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.state() == LifecycleState::ShutDown {
            return;
        }
        self.deinit();
        self.regs.revoke();
        self.props.freeze();
        self.handlers.write().clear();
        self.fallback_handler.write().take();
        *self.state.lock() = LifecycleState::ShutDown;
        info!("[{}] Shut down", self.unique_id);
    }
}

impl Node for Block {
    fn unique_id(&self) -> String {
        self.unique_id.clone()
    }

    fn num_input_ports(&self) -> usize {
        self.inputs.get()
    }

    fn num_output_ports(&self) -> usize {
        self.outputs.get()
    }

    fn properties(&self) -> &PropertyStore {
        &self.props
    }

    fn dispatch_action(&self, port: usize, action: Action) {
        if self.state() == LifecycleState::ShutDown {
            debug!(
                "[{}] Dropping action '{}' (id {}): block is shut down",
                self.unique_id, action.key, action.id
            );
            return;
        }
        let handler = self
            .handlers
            .read()
            .get(&action.key)
            .cloned()
            .or_else(|| self.fallback_handler.read().clone());
        match handler {
            Some(handler) => handler(&BlockContext { block: self }, port, &action),
            None => warn!(
                "[{}] Dropping unhandled action '{}' (id {}) on port {}",
                self.unique_id, action.key, action.id, port
            ),
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("block_id", &self.unique_id)
            .field("noc_id", &format_args!("0x{:08X}", self.noc_id))
            .field("inputs", &self.inputs.get())
            .field("outputs", &self.outputs.get())
            .field("state", &self.state())
            .finish()
    }
}

/// Privileged view of a block, handed to [`BlockKind`] hooks and action
/// handlers
pub struct BlockContext<'a> {
    block: &'a Block,
}

impl BlockContext<'_> {
    pub fn set_num_input_ports(&self, num_ports: usize) -> Result<(), PortError> {
        self.block.set_num_input_ports(num_ports)
    }

    pub fn set_num_output_ports(&self, num_ports: usize) -> Result<(), PortError> {
        self.block.set_num_output_ports(num_ports)
    }

    pub fn register_property(&self, prop: PropertyEdge) -> Result<(), PropertyError> {
        Node::register_property(self.block, prop)
    }

    pub fn add_resolver<F>(
        &self,
        inputs: &[PropertyKey],
        outputs: &[PropertyKey],
        func: F,
    ) -> Result<(), PropertyError>
    where
        F: Fn(&mut ResolverContext<'_>) -> Result<(), ResolveError> + Send + Sync + 'static,
    {
        self.block.props.add_resolver(inputs, outputs, func)
    }

    /// Handle actions with the given key. A later registration for the same
    /// key replaces the earlier one.
    pub fn register_action_handler<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&BlockContext<'_>, usize, &Action) + Send + Sync + 'static,
    {
        self.block
            .handlers
            .write()
            .insert(key.into(), Arc::new(handler));
    }

    /// Handle every action no keyed handler claims
    pub fn register_fallback_action_handler<F>(&self, handler: F)
    where
        F: Fn(&BlockContext<'_>, usize, &Action) + Send + Sync + 'static,
    {
        *self.block.fallback_handler.write() = Some(Arc::new(handler));
    }
}

impl Deref for BlockContext<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{FakeMbController, FixedClock, MemoryRegisters, config};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PlainKind;
    impl BlockKind for PlainKind {}

    /// Records deinit calls and stops a "generator" register
    struct Generator {
        deinits: Arc<AtomicUsize>,
        regs_valid_in_deinit: Arc<AtomicUsize>,
    }

    impl BlockKind for Generator {
        fn setup(&self, ctx: &BlockContext<'_>) -> Result<(), ConstructionError> {
            ctx.regs().write(0x0, 1).map_err(|e| ConstructionError::Setup {
                block: ctx.block_id().to_string(),
                reason: e.to_string(),
            })
        }

        fn deinit(&self, ctx: &BlockContext<'_>) {
            self.deinits.fetch_add(1, Ordering::SeqCst);
            if ctx.regs().is_valid() && ctx.state() == LifecycleState::Active {
                self.regs_valid_in_deinit.fetch_add(1, Ordering::SeqCst);
            }
            let _ = ctx.regs().write(0x0, 0);
        }
    }

    #[test]
    fn test_identity_and_args() {
        let cfg = config("0/FFT#1", 0xFF70_0000, 1, 1)
            .with_block_args(BlockArgs::parse("fft_size=1024"));
        let block = Block::new(cfg, Box::new(PlainKind)).unwrap();

        assert_eq!(block.noc_id(), 0xFF70_0000);
        assert_eq!(block.block_id().to_string(), "0/FFT#1");
        assert_eq!(block.unique_id(), "0/FFT#1");
        assert_eq!(block.block_args().parse_value::<usize>("fft_size"), Some(1024));
        assert_eq!(block.state(), LifecycleState::Constructed);
        assert!(block.mb_controller().is_none());
    }

    #[test]
    fn test_unsupported_config_version() {
        let mut cfg = config("0/FFT#0", 1, 1, 1);
        cfg.version = 7;
        assert_eq!(
            Block::new(cfg, Box::new(PlainKind)).unwrap_err(),
            ConstructionError::UnsupportedVersion {
                found: 7,
                expected: BlockConfig::VERSION,
            }
        );
    }

    #[test]
    fn test_mb_controller_is_shared() {
        let mb: Arc<dyn MbController> = Arc::new(FakeMbController::new(0));
        let a = Block::new(
            config("0/Radio#0", 2, 1, 1).with_mb_controller(Arc::clone(&mb)),
            Box::new(PlainKind),
        )
        .unwrap();
        let b = Block::new(
            config("0/Radio#1", 2, 1, 1).with_mb_controller(Arc::clone(&mb)),
            Box::new(PlainKind),
        )
        .unwrap();

        let ctrl = a.mb_controller().unwrap();
        ctrl.set_clock_source("external").unwrap();
        assert_eq!(b.mb_controller().unwrap().clock_source(), "external");
    }

    #[test]
    fn test_tick_rate_defaults_and_local_set() {
        let cfg = config("0/DDC#0", 3, 2, 2);
        let block = Block::new(cfg, Box::new(PlainKind)).unwrap();
        assert_eq!(block.tick_rate(), DEFAULT_TICK_RATE);

        let clocked = Block::new(
            BlockConfig::new(
                3,
                "0/DDC#1".parse().unwrap(),
                Arc::new(MemoryRegisters::new()),
                Arc::new(FixedClock::new(100e6)),
            ),
            Box::new(PlainKind),
        )
        .unwrap();
        assert_eq!(clocked.tick_rate(), 100e6);

        block.set_tick_rate(200e6).unwrap();
        assert_eq!(block.tick_rate(), 200e6);
        for scope in [Scope::InputEdge(1), Scope::OutputEdge(0)] {
            assert_eq!(block.get_property::<f64>(PROP_TICK_RATE, scope).unwrap(), Some(200e6));
        }
    }

    #[test]
    fn test_invalid_tick_rate_rejected() {
        let block = Block::new(config("0/DDC#0", 3, 1, 1), Box::new(PlainKind)).unwrap();
        block.set_tick_rate(50e6).unwrap();
        for bad in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                block.set_tick_rate(bad),
                Err(ResolveError::ResolverFailed { .. })
            ));
            assert_eq!(block.tick_rate(), 50e6);
            assert_eq!(
                block.get_property::<f64>(PROP_TICK_RATE, Scope::Block).unwrap(),
                Some(50e6)
            );
        }
        assert!(matches!(
            block.set_property(PROP_TICK_RATE, Scope::Block, -1.0),
            Err(ResolveError::ResolverFailed { .. })
        ));
        assert_eq!(block.tick_rate(), 50e6);

        // Later passes are unaffected
        block.set_tick_rate(25e6).unwrap();
        assert_eq!(block.tick_rate(), 25e6);
    }

    #[test]
    fn test_clock_told_about_resolved_rate_once_per_change() {
        let clock = Arc::new(FixedClock::new(0.0));
        let config = BlockConfig::new(
            3,
            "0/DDC#0".parse().unwrap(),
            Arc::new(MemoryRegisters::new()),
            clock.clone(),
        )
        .with_ports(1, 1);
        let block = Block::new(config, Box::new(PlainKind)).unwrap();

        block.set_tick_rate(50e6).unwrap();
        block.set_tick_rate(50e6).unwrap();
        assert!(block.set_tick_rate(-3.0).is_err());
        block.set_tick_rate(25e6).unwrap();
        assert_eq!(clock.resolved_rates(), vec![50e6, 25e6]);
    }

    #[test]
    fn test_port_count_only_decreases() {
        let block = Block::new(config("0/Split#0", 4, 1, 4), Box::new(PlainKind)).unwrap();
        block.set_num_output_ports(2).unwrap();
        assert_eq!(block.num_output_ports(), 2);

        assert!(matches!(
            block.set_num_output_ports(3),
            Err(PortError::CountIncrease {
                current: 2,
                requested: 3,
                ..
            })
        ));
        assert_eq!(block.num_output_ports(), 2);
        assert_eq!(block.num_input_ports(), 1);
    }

    #[test]
    fn test_deinit_once_before_shutdown() {
        let mem = Arc::new(MemoryRegisters::new());
        let deinits = Arc::new(AtomicUsize::new(0));
        let valid = Arc::new(AtomicUsize::new(0));
        let kind = Generator {
            deinits: Arc::clone(&deinits),
            regs_valid_in_deinit: Arc::clone(&valid),
        };
        let cfg = BlockConfig::new(
            5,
            "0/SigGen#0".parse().unwrap(),
            mem.clone(),
            Arc::new(FixedClock::new(0.0)),
        );
        let block = Block::new(cfg, Box::new(kind)).unwrap();
        block.activate();
        assert_eq!(mem.peek(0x0), Some(1));

        block.deinit();
        assert_eq!(block.state(), LifecycleState::Deinitialized);
        block.shutdown();
        block.shutdown();
        block.deinit();

        assert_eq!(deinits.load(Ordering::SeqCst), 1);
        assert_eq!(valid.load(Ordering::SeqCst), 1);
        assert_eq!(block.state(), LifecycleState::ShutDown);
        assert_eq!(mem.peek(0x0), Some(0));
    }

    #[test]
    fn test_shutdown_without_explicit_deinit() {
        let deinits = Arc::new(AtomicUsize::new(0));
        let kind = Generator {
            deinits: Arc::clone(&deinits),
            regs_valid_in_deinit: Arc::new(AtomicUsize::new(0)),
        };
        let block = Block::new(config("0/SigGen#1", 5, 0, 1), Box::new(kind)).unwrap();
        block.activate();
        block.shutdown();
        assert_eq!(deinits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_after_shutdown_registers_inert_and_props_frozen() {
        let mem = Arc::new(MemoryRegisters::new());
        let cfg = BlockConfig::new(
            6,
            "0/FIR#0".parse().unwrap(),
            mem.clone(),
            Arc::new(FixedClock::new(0.0)),
        );
        let block = Block::new(cfg, Box::new(PlainKind)).unwrap();
        block.activate();
        block.regs().write(0x8, 42).unwrap();
        block.set_tick_rate(10e6).unwrap();
        block.shutdown();

        assert_eq!(block.regs().read(0x8).unwrap(), 0);
        block.regs().write(0x8, 7).unwrap();
        assert_eq!(mem.peek(0x8), Some(42));
        assert_eq!(mem.write_count(), 1);

        assert!(matches!(
            block.set_tick_rate(20e6),
            Err(ResolveError::Property(PropertyError::Frozen { .. }))
        ));
        assert_eq!(block.tick_rate(), 10e6);
        assert!(block.properties().is_frozen());
        assert!(block.properties().contains(PROP_TICK_RATE, Scope::OutputEdge(0)));
    }

    #[test]
    fn test_action_dispatch() {
        struct Echo(Arc<AtomicUsize>);
        impl BlockKind for Echo {
            fn setup(&self, ctx: &BlockContext<'_>) -> Result<(), ConstructionError> {
                let hits = Arc::clone(&self.0);
                ctx.register_action_handler("ping", move |_, port, action| {
                    assert_eq!(port, 0);
                    assert_eq!(action.payload, vec![9]);
                    hits.fetch_add(1, Ordering::SeqCst);
                });
                Ok(())
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let block = Block::new(config("0/Echo#0", 7, 1, 1), Box::new(Echo(Arc::clone(&hits)))).unwrap();
        block.dispatch_action(0, Action::new("ping").with_payload(vec![9]));
        // Unknown keys are dropped without failing
        block.dispatch_action(0, Action::new("pong"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        block.shutdown();
        block.dispatch_action(0, Action::new("ping").with_payload(vec![9]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallback_handler_catches_unknown_keys() {
        struct CatchAll(Arc<Mutex<Vec<String>>>);
        impl BlockKind for CatchAll {
            fn setup(&self, ctx: &BlockContext<'_>) -> Result<(), ConstructionError> {
                let keys = Arc::clone(&self.0);
                ctx.register_action_handler("known", |_, _, _| {});
                ctx.register_fallback_action_handler(move |_, _, action| {
                    keys.lock().push(action.key.clone());
                });
                Ok(())
            }
        }

        let keys = Arc::new(Mutex::new(Vec::new()));
        let block =
            Block::new(config("0/Any#0", 8, 1, 1), Box::new(CatchAll(Arc::clone(&keys)))).unwrap();
        block.dispatch_action(0, Action::new("known"));
        block.dispatch_action(0, Action::new("other"));
        assert_eq!(*keys.lock(), vec!["other".to_string()]);
    }

    #[test]
    fn test_post_action_requires_attachment() {
        let block = Block::new(config("0/Echo#1", 7, 1, 1), Box::new(PlainKind)).unwrap();
        assert!(matches!(
            block.post_action(PortDirection::Output, 0, Action::new("ping")),
            Err(ActionError::Detached(_))
        ));
        assert!(matches!(
            block.post_action(PortDirection::Output, 3, Action::new("ping")),
            Err(ActionError::Port(PortError::IndexOutOfRange { index: 3, .. }))
        ));
    }
}
