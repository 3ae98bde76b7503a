//! Error types for the runtime system

use super::block_id::BlockId;
use super::property::{PropertyType, Scope};
use super::ports::PortDirection;

/// Error type for property registration and access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("Property '{name}' ({scope}) is already registered on node '{node}'")]
    Duplicate {
        node: String,
        name: String,
        scope: Scope,
    },

    #[error("Property '{name}' ({scope}) not found on node '{node}'")]
    NotFound {
        node: String,
        name: String,
        scope: Scope,
    },

    #[error("Type mismatch on property '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: PropertyType,
        actual: PropertyType,
    },

    #[error("Property '{name}' on node '{node}' is frozen, the node was shut down")]
    Frozen { node: String, name: String },

    #[error("Edge property '{name}' refers to {scope}, but node '{node}' has no such port")]
    PortOutOfRange {
        node: String,
        name: String,
        scope: Scope,
    },
}

/// Error type for resolve passes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("Property propagation did not converge within {max_iterations} iterations")]
    Diverged { max_iterations: usize },

    #[error("Resolver on node '{node}' wrote '{name}' ({scope}) which it did not declare as an output")]
    AccessViolation {
        node: String,
        name: String,
        scope: Scope,
    },

    #[error("Resolver on node '{node}' failed: {reason}")]
    ResolverFailed { node: String, reason: String },

    #[error("Resolve pass requested while this thread is already resolving the graph")]
    Reentrant,

    #[error("Node '{0}' is not part of this graph")]
    NodeNotFound(String),

    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// Error type for port operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error(
        "Cannot increase the number of {direction} ports on '{node}' from {current} to {requested}"
    )]
    CountIncrease {
        node: String,
        direction: PortDirection,
        current: usize,
        requested: usize,
    },

    #[error("{direction} port index {index} out of range for node '{node}'")]
    IndexOutOfRange {
        node: String,
        direction: PortDirection,
        index: usize,
    },
}

/// Register transport failure, surfaced synchronously to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Register I/O error at address 0x{addr:08x}: {reason}")]
pub struct IoError {
    pub addr: u32,
    pub reason: String,
}

impl IoError {
    pub fn new(addr: u32, reason: impl Into<String>) -> Self {
        Self {
            addr,
            reason: reason.into(),
        }
    }
}

/// Error type for connection operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("{direction} port {port} not found on node '{node}'")]
    PortNotFound {
        node: String,
        port: usize,
        direction: PortDirection,
    },

    #[error("Input port {port} on node '{node}' is already connected")]
    DuplicateConnection { node: String, port: usize },

    #[error("Cannot connect from inside a resolver")]
    Resolving,
}

/// Construction-time contract violations, fatal at graph-build time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstructionError {
    #[error("Block ID '{0}' is already in use in this session")]
    DuplicateBlockId(BlockId),

    #[error("Malformed block ID '{0}'")]
    InvalidBlockId(String),

    #[error("Unsupported block configuration version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("NoC ID 0x{0:08X} is already registered")]
    DuplicateNocId(u32),

    #[error("Session is shut down")]
    SessionClosed,

    #[error("Setup of block '{block}' failed: {reason}")]
    Setup { block: String, reason: String },

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Port(#[from] PortError),
}

/// Error type for action delivery
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("No mailbox for destination block '{0}'")]
    UnknownDestination(String),

    #[error("Action router is stopped")]
    RouterStopped,

    #[error("Block '{0}' is not attached to a session")]
    Detached(BlockId),

    #[error("Failed to start delivery thread for '{0}'")]
    Spawn(String),

    #[error(transparent)]
    Port(#[from] PortError),
}
