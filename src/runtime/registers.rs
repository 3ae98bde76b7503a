//! Register access brokered by the device session
//!
//! The transport behind [`RegisterAccess`] is owned by the session. A block
//! reaches it only through its [`RegisterIface`], which the framework
//! revokes at shutdown. After revocation reads and writes are absorbed with
//! a warning instead of failing, so stale block references held elsewhere
//! cannot touch the device during teardown.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::errors::IoError;

/// Raw register transport to one block
pub trait RegisterAccess: Send + Sync {
    fn read(&self, addr: u32) -> Result<u32, IoError>;

    fn write(&self, addr: u32, value: u32) -> Result<(), IoError>;
}

/// Revocable handle to a block's registers
pub struct RegisterIface {
    owner: String,
    access: RwLock<Option<Arc<dyn RegisterAccess>>>,
}

impl RegisterIface {
    pub(crate) fn new(owner: impl Into<String>, access: Arc<dyn RegisterAccess>) -> Self {
        Self {
            owner: owner.into(),
            access: RwLock::new(Some(access)),
        }
    }

    /// Read a register. Returns 0 once access was revoked.
    pub fn read(&self, addr: u32) -> Result<u32, IoError> {
        match self.access.read().as_ref() {
            Some(access) => access.read(addr),
            None => {
                warn!(
                    "[{}] Ignoring register read from 0x{:08x}: register access was revoked at shutdown",
                    self.owner, addr
                );
                Ok(0)
            }
        }
    }

    /// Write a register. A no-op once access was revoked.
    pub fn write(&self, addr: u32, value: u32) -> Result<(), IoError> {
        match self.access.read().as_ref() {
            Some(access) => access.write(addr, value),
            None => {
                warn!(
                    "[{}] Ignoring register write of 0x{:08x} to 0x{:08x}: register access was revoked at shutdown",
                    self.owner, value, addr
                );
                Ok(())
            }
        }
    }

    /// Read-modify-write of the bits selected by `mask`
    pub fn modify(&self, addr: u32, mask: u32, value: u32) -> Result<(), IoError> {
        if !self.is_valid() {
            return self.write(addr, value);
        }
        let current = self.read(addr)?;
        self.write(addr, (current & !mask) | (value & mask))
    }

    pub fn is_valid(&self) -> bool {
        self.access.read().is_some()
    }

    /// Permanently drop the transport
    pub(crate) fn revoke(&self) {
        self.access.write().take();
    }
}
