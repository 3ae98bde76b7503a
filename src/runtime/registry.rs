//! Registry of block kinds, keyed by NoC ID
//!
//! Block implementations register a factory for their NoC ID once per
//! process. When the session builds a block it looks up the NoC ID from the
//! block's configuration; unknown IDs fall back to [`DefaultBlock`], which
//! exposes only the behaviour every block shares.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::block::{BlockKind, NocId};
use super::block_args::BlockArgs;
use super::errors::ConstructionError;

/// Creates the kind-specific part of a block from its arguments
pub type BlockFactory = Arc<dyn Fn(&BlockArgs) -> Box<dyn BlockKind> + Send + Sync>;

/// A registered block kind
#[derive(Clone)]
pub struct BlockDescriptor {
    pub name: String,
    /// Whether blocks of this kind get the motherboard controller
    pub mb_access: bool,
    factory: BlockFactory,
}

impl BlockDescriptor {
    pub fn create(&self, args: &BlockArgs) -> Box<dyn BlockKind> {
        (self.factory)(args)
    }
}

/// Fallback kind for NoC IDs without a registered implementation
pub struct DefaultBlock;

impl BlockKind for DefaultBlock {}

pub(crate) struct BlockRegistry {
    kinds: HashMap<NocId, BlockDescriptor>,
}

impl BlockRegistry {
    fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    fn register(&mut self, noc_id: NocId, descriptor: BlockDescriptor) -> Result<(), ConstructionError> {
        if self.kinds.contains_key(&noc_id) {
            return Err(ConstructionError::DuplicateNocId(noc_id));
        }
        info!(
            "Registered block kind '{}' for NoC ID 0x{:08X}",
            descriptor.name, noc_id
        );
        self.kinds.insert(noc_id, descriptor);
        Ok(())
    }

    pub(crate) fn lookup(&self, noc_id: NocId) -> BlockDescriptor {
        match self.kinds.get(&noc_id) {
            Some(descriptor) => descriptor.clone(),
            None => {
                debug!(
                    "No block kind registered for NoC ID 0x{:08X}, using default",
                    noc_id
                );
                BlockDescriptor {
                    name: "Block".to_string(),
                    mb_access: false,
                    factory: Arc::new(|_| Box::new(DefaultBlock)),
                }
            }
        }
    }
}

// Global block registry
lazy_static::lazy_static! {
    pub(crate) static ref BLOCK_REGISTRY: RwLock<BlockRegistry> = RwLock::new(BlockRegistry::new());
}

/// Register a block kind for a NoC ID.
///
/// Set `mb_access` if blocks of this kind need the motherboard controller.
/// Each NoC ID may be registered once.
pub fn register_block<F>(
    noc_id: NocId,
    name: impl Into<String>,
    mb_access: bool,
    factory: F,
) -> Result<(), ConstructionError>
where
    F: Fn(&BlockArgs) -> Box<dyn BlockKind> + Send + Sync + 'static,
{
    BLOCK_REGISTRY.write().register(
        noc_id,
        BlockDescriptor {
            name: name.into(),
            mb_access,
            factory: Arc::new(factory),
        },
    )
}

/// Look up the kind registered for a NoC ID, or the default kind
pub fn lookup_block(noc_id: NocId) -> BlockDescriptor {
    BLOCK_REGISTRY.read().lookup(noc_id)
}
