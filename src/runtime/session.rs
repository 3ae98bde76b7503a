//! Device session: builds blocks, wires them up and tears them down
//!
//! The session owns every block it creates, the property graph that links
//! them and the action router that carries messages between them. Blocks
//! are added from framework-populated [`BlockConfig`]s; the NoC ID selects
//! the registered [`BlockKind`](super::block::BlockKind).
//!
//! Teardown order on [`Session::shutdown`]:
//! 1. stop the router, delivering every action still queued
//! 2. `deinit()` every block, in insertion order
//! 3. shut every block down (registers revoked, properties frozen)
//!
//! Steps 2 and 3 hold the graph exclusively, so they never overlap a resolve
//! pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::action::Action;
use super::block::{Block, BlockConfig, LifecycleState};
use super::block_id::BlockId;
use super::errors::{ActionError, ConnectionError, ConstructionError, ResolveError};
use super::graph::{DEFAULT_MAX_ITERATIONS, Graph, ResolveReport};
use super::node::Node;
use super::registry::lookup_block;
use super::router::ActionRouter;
use super::watchdog::DEFAULT_WATCHDOG_THRESHOLD;

pub struct Session {
    graph: Arc<Graph>,
    router: ActionRouter,
    blocks: RwLock<Vec<Arc<Block>>>,
    closed: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            graph: Arc::new(Graph::with_max_iterations(DEFAULT_MAX_ITERATIONS)),
            router: ActionRouter::new(DEFAULT_WATCHDOG_THRESHOLD),
            blocks: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Cap the number of generations a resolve pass may take
    pub fn with_max_resolve_iterations(self, max_iterations: usize) -> Self {
        self.graph.set_max_iterations(max_iterations);
        self
    }

    /// Report action handlers running longer than `threshold`
    pub fn with_watchdog_threshold(self, threshold: Duration) -> Self {
        self.router.set_watchdog_threshold(threshold);
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn router(&self) -> &ActionRouter {
        &self.router
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Construct a block and add it to the session.
    ///
    /// The motherboard controller in `config` is only handed to the block if
    /// its registered kind asked for it.
    pub fn add_block(&self, mut config: BlockConfig) -> Result<Arc<Block>, ConstructionError> {
        if self.is_closed() {
            return Err(ConstructionError::SessionClosed);
        }
        let mut blocks = self.blocks.write();
        if blocks.iter().any(|b| b.block_id() == &config.block_id) {
            return Err(ConstructionError::DuplicateBlockId(config.block_id));
        }

        let descriptor = lookup_block(config.noc_id);
        if !descriptor.mb_access && config.mb_controller.take().is_some() {
            debug!(
                "[{}] Block kind '{}' did not request motherboard access",
                config.block_id, descriptor.name
            );
        }
        let kind = descriptor.create(&config.block_args);
        let clock = Arc::clone(&config.clock);
        let block = Block::new(config, kind)?;

        let node: Arc<dyn Node> = block.clone();
        let node_id = self.graph.insert(&node);
        self.router
            .register(&node)
            .map_err(|e| ConstructionError::Setup {
                block: block.unique_id(),
                reason: e.to_string(),
            })?;
        block.attach(&self.graph, node_id, self.router.clone());
        block.activate();

        let observer = Arc::downgrade(&block);
        clock.on_rate_change(Box::new(move |rate| {
            let Some(block) = observer.upgrade() else {
                return;
            };
            if block.state() != LifecycleState::Active {
                return;
            }
            if let Err(e) = block.set_tick_rate(rate) {
                warn!(
                    "[{}] Failed to follow clock rate change to {} Hz: {}",
                    block.block_id(),
                    rate,
                    e
                );
            }
        }));

        info!(
            "Added block {} ('{}', NoC ID 0x{:08X})",
            block.block_id(),
            descriptor.name,
            block.noc_id()
        );
        blocks.push(Arc::clone(&block));
        Ok(block)
    }

    /// Connect an output port of one block to an input port of another
    pub fn connect(
        &self,
        src: &BlockId,
        src_port: usize,
        dst: &BlockId,
        dst_port: usize,
    ) -> Result<(), ConnectionError> {
        let src_id = self
            .graph
            .node_id(&src.to_string())
            .ok_or_else(|| ConnectionError::NodeNotFound(src.to_string()))?;
        let dst_id = self
            .graph
            .node_id(&dst.to_string())
            .ok_or_else(|| ConnectionError::NodeNotFound(dst.to_string()))?;
        self.graph.connect(src_id, src_port, dst_id, dst_port)
    }

    /// Resolve everything that changed since the last pass, including
    /// values pending from new connections
    pub fn commit(&self) -> Result<ResolveReport, ResolveError> {
        let report = self.graph.resolve()?;
        debug!(
            "Committed graph: {} generations, {} resolver invocations",
            report.generations, report.invocations
        );
        Ok(report)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.blocks
            .read()
            .iter()
            .find(|b| b.block_id() == id)
            .cloned()
    }

    /// Blocks whose ID matches a partial pattern such as `"FFT"` or `"0/FFT"`
    pub fn find_blocks(&self, pattern: &str) -> Vec<Arc<Block>> {
        self.blocks
            .read()
            .iter()
            .filter(|b| b.block_id().matches(pattern))
            .cloned()
            .collect()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks
            .read()
            .iter()
            .map(|b| b.block_id().clone())
            .collect()
    }

    /// Send an action from the host to a block port
    pub fn post_action(&self, dst: &BlockId, port: usize, action: Action) -> Result<(), ActionError> {
        self.router.send(dst, port, action)
    }

    /// Tear the session down. Idempotent.
    pub fn shutdown(&self) -> Result<(), ResolveError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let blocks = self.blocks.read().clone();
        info!("Shutting down session with {} blocks", blocks.len());

        self.router.stop();
        match self.graph.exclusive(|| Self::teardown(&blocks)) {
            Ok(()) => {}
            // Called from inside a resolver: this thread already owns the graph
            Err(ResolveError::Reentrant) => {
                warn!("Session shut down from within a resolve pass");
                Self::teardown(&blocks);
            }
            Err(e) => return Err(e),
        }
        info!("Session shut down");
        Ok(())
    }

    fn teardown(blocks: &[Arc<Block>]) {
        for block in blocks {
            block.deinit();
        }
        for block in blocks {
            block.shutdown();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Session shutdown failed: {}", e);
        }
    }
}
