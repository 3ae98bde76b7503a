//! RFNoC block graph framework
//!
//! Host-side model of programmable signal-processing blocks on an FPGA:
//! blocks with NoC identity, register access and a managed lifecycle, wired
//! into a graph whose properties (such as the shared tick rate) are
//! propagated across connections to a fixed point.
//!
//! # Architecture
//!
//! - **Session**: builds blocks from configuration, connects them and tears
//!   everything down in a safe order
//! - **Block**: the shared block implementation; kind-specific behaviour is
//!   registered per NoC ID through `BlockKind`
//! - **Graph**: non-owning view of blocks and connections that runs resolve
//!   passes over their property stores
//! - **ActionRouter**: per-block mailboxes delivering actions asynchronously
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rfnoc_graph::{BlockConfig, BlockId, ClockInterface, RegisterAccess, Session};
//!
//! # fn transport() -> (Arc<dyn RegisterAccess>, Arc<dyn ClockInterface>) { unimplemented!() }
//! let (regs, clock) = transport();
//! let session = Session::new();
//! let radio = session.add_block(BlockConfig::new(0x1234_0000, "0/Radio#0".parse()?, regs.clone(), clock.clone()))?;
//! let fft = session.add_block(BlockConfig::new(0xFF70_0000, "0/FFT#0".parse()?, regs, clock))?;
//! session.connect(radio.block_id(), 0, fft.block_id(), 0)?;
//! session.commit()?;
//! radio.set_tick_rate(200e6)?;
//! assert_eq!(fft.tick_rate(), 200e6);
//! # Ok::<(), rfnoc_graph::NocError>(())
//! ```

use thiserror::Error;

pub mod runtime;

pub use runtime::{
    Action, ActionError, ActionRouter, Block, BlockArgs, BlockConfig, BlockContext, BlockId,
    BlockKind, ClockInterface, ConnectionError, ConstructionError, IoError, LifecycleState,
    MbController, NocId, Node, PortDirection, PortError, PropertyEdge, PropertyError, PropertyKey,
    PropertyValue, RegisterAccess, ResolveError, ResolveReport, Scope, Session, register_block,
};

#[derive(Error, Debug)]
pub enum NocError {
    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

pub type Result<T> = std::result::Result<T, NocError>;
