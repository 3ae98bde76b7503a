//! In-memory stand-ins for device capabilities, shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::block::{BlockConfig, NocId};
use super::block_id::BlockId;
use super::device::{ClockInterface, MbController, RateCallback};
use super::errors::IoError;
use super::registers::RegisterAccess;

/// Register file backed by a map. Unwritten registers read as 0.
#[derive(Default)]
pub(crate) struct MemoryRegisters {
    regs: Mutex<HashMap<u32, u32>>,
    failing: Mutex<HashSet<u32>>,
    writes: AtomicUsize,
}

impl MemoryRegisters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn peek(&self, addr: u32) -> Option<u32> {
        self.regs.lock().get(&addr).copied()
    }

    /// Make every access to `addr` fail
    pub(crate) fn fail_at(&self, addr: u32) {
        self.failing.lock().insert(addr);
    }

    /// Successful writes so far
    pub(crate) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, addr: u32) -> Result<(), IoError> {
        if self.failing.lock().contains(&addr) {
            return Err(IoError::new(addr, "transport timeout"));
        }
        Ok(())
    }
}

impl RegisterAccess for MemoryRegisters {
    fn read(&self, addr: u32) -> Result<u32, IoError> {
        self.check(addr)?;
        Ok(self.peek(addr).unwrap_or(0))
    }

    fn write(&self, addr: u32, value: u32) -> Result<(), IoError> {
        self.check(addr)?;
        self.regs.lock().insert(addr, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock whose rate only changes when a test says so
pub(crate) struct FixedClock {
    rate: Mutex<f64>,
    callbacks: Mutex<Vec<Arc<dyn Fn(f64) + Send + Sync>>>,
    resolved: Mutex<Vec<f64>>,
}

impl FixedClock {
    pub(crate) fn new(rate: f64) -> Self {
        Self {
            rate: Mutex::new(rate),
            callbacks: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Tick rates reported back by the owning block, oldest first
    pub(crate) fn resolved_rates(&self) -> Vec<f64> {
        self.resolved.lock().clone()
    }

    /// Change the rate and notify subscribers
    pub(crate) fn set_rate(&self, rate: f64) {
        *self.rate.lock() = rate;
        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(rate);
        }
    }
}

impl ClockInterface for FixedClock {
    fn current_rate(&self) -> f64 {
        *self.rate.lock()
    }

    fn on_rate_change(&self, callback: RateCallback) {
        self.callbacks.lock().push(Arc::from(callback));
    }

    fn tick_rate_resolved(&self, rate: f64) {
        self.resolved.lock().push(rate);
    }
}

pub(crate) struct FakeMbController {
    index: usize,
    clock_source: Mutex<String>,
}

impl FakeMbController {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            clock_source: Mutex::new("internal".to_string()),
        }
    }
}

impl MbController for FakeMbController {
    fn mb_index(&self) -> usize {
        self.index
    }

    fn clock_source(&self) -> String {
        self.clock_source.lock().clone()
    }

    fn set_clock_source(&self, source: &str) -> Result<(), IoError> {
        *self.clock_source.lock() = source.to_string();
        Ok(())
    }

    fn time_source(&self) -> String {
        "internal".to_string()
    }

    fn gpio_banks(&self) -> Vec<String> {
        vec!["FP0".to_string()]
    }
}

/// Route logs to the test harness; `RUST_LOG` selects the level
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Config for a block with its own register file and a stopped clock
pub(crate) fn config(block_id: &str, noc_id: NocId, inputs: usize, outputs: usize) -> BlockConfig {
    let block_id = match block_id.parse::<BlockId>() {
        Ok(id) => id,
        Err(e) => panic!("bad block id '{}' in test: {}", block_id, e),
    };
    BlockConfig::new(
        noc_id,
        block_id,
        Arc::new(MemoryRegisters::new()),
        Arc::new(FixedClock::new(0.0)),
    )
    .with_ports(inputs, outputs)
}
