//! Port model: directions, addresses and monotonically shrinking port counts

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use super::errors::PortError;
use super::property::Scope;

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    /// Scope of an edge property attached to a port of this direction
    pub fn edge_scope(&self, port: usize) -> Scope {
        match self {
            PortDirection::Input => Scope::InputEdge(port),
            PortDirection::Output => Scope::OutputEdge(port),
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Number of active ports in one direction.
///
/// Ports are numbered `0..count`. The count can be lowered after
/// construction but never raised again; ports past the count become
/// inactive and are never renumbered.
#[derive(Debug)]
pub struct PortCount {
    direction: PortDirection,
    count: AtomicUsize,
}

impl PortCount {
    pub fn new(direction: PortDirection, count: usize) -> Self {
        Self {
            direction,
            count: AtomicUsize::new(count),
        }
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Lower the count to `requested`. Fails if that would raise it.
    pub fn reduce(&self, node: &str, requested: usize) -> Result<(), PortError> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (requested <= current).then_some(requested)
            })
            .map(|_| ())
            .map_err(|current| PortError::CountIncrease {
                node: node.to_string(),
                direction: self.direction,
                current,
                requested,
            })
    }

    /// Check that `index` addresses an active port
    pub fn check(&self, node: &str, index: usize) -> Result<(), PortError> {
        if index < self.get() {
            Ok(())
        } else {
            Err(PortError::IndexOutOfRange {
                node: node.to_string(),
                direction: self.direction,
                index,
            })
        }
    }
}
