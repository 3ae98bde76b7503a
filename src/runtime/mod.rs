//! Runtime support for RFNoC block graphs

pub mod action;
pub mod block;
pub mod block_args;
pub mod block_id;
pub mod device;
pub mod errors;
pub mod graph;
pub mod node;
pub mod ports;
pub mod property;
pub mod registers;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod session;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{ACTION_KEY_STREAM_CMD, Action, Endpoint};
pub use block::{
    ActionHandler, Block, BlockConfig, BlockContext, BlockKind, DEFAULT_TICK_RATE, LifecycleState,
    NocId,
};
pub use block_args::BlockArgs;
pub use block_id::BlockId;
pub use device::{ClockInterface, MbController, RateCallback};
pub use errors::{
    ActionError, ConnectionError, ConstructionError, IoError, PortError, PropertyError,
    ResolveError,
};
pub use graph::{Connection, DEFAULT_MAX_ITERATIONS, Graph, NodeId, ResolveReport};
pub use node::Node;
pub use ports::{PortCount, PortDirection};
pub use property::{
    PROP_TICK_RATE, PropertyData, PropertyEdge, PropertyKey, PropertyType, PropertyValue, Scope,
};
pub use registers::{RegisterAccess, RegisterIface};
pub use registry::{BlockDescriptor, BlockFactory, DefaultBlock, lookup_block, register_block};
pub use resolver::{PropertyStore, ResolverContext, ResolverFn};
pub use router::ActionRouter;
pub use session::Session;
pub use watchdog::{DEFAULT_WATCHDOG_THRESHOLD, Watchdog};
