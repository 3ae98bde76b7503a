//! Watchdog for action handlers that stall their delivery thread
//!
//! Each mailbox stores the start time of the handler it is running in an
//! atomic; the watchdog thread periodically scans these timestamps and warns
//! once per handler invocation that exceeds the threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Default time a handler may run before it is reported
pub const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(5);

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct OperationState {
    /// When the current operation started, 0 if idle
    started: AtomicU64,
    has_warned: AtomicBool,
    /// Key of the action being handled
    detail: Mutex<String>,
    block: String,
    operation: String,
}

/// Per-mailbox tracking handle
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<OperationState>,
}

impl WatchdogHandle {
    #[inline(always)]
    fn start_operation(&self, detail: &str) {
        *self.state.detail.lock() = detail.to_string();
        self.state.has_warned.store(false, Ordering::Relaxed);
        self.state.started.store(now_millis(), Ordering::Relaxed);
    }

    #[inline(always)]
    fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} '{}'",
                self.state.block,
                self.state.operation,
                self.state.detail.lock()
            );
        }
        self.state.started.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct Watchdog {
    operations: Arc<Mutex<Vec<Weak<OperationState>>>>,
    /// Dropped on `stop()`, which wakes the monitoring thread
    stop_tx: Arc<Mutex<Option<Sender<()>>>>,
    stop_rx: Receiver<()>,
    threshold_ms: Arc<AtomicU64>,
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded(0);
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            stop_tx: Arc::new(Mutex::new(Some(stop_tx))),
            stop_rx,
            threshold_ms: Arc::new(AtomicU64::new(threshold.as_millis() as u64)),
        }
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms.load(Ordering::Relaxed))
    }

    /// Change the threshold; a running monitor picks it up on its next scan
    pub fn set_threshold(&self, threshold: Duration) {
        self.threshold_ms
            .store(threshold.as_millis() as u64, Ordering::Relaxed);
    }

    /// Start tracking a mailbox
    pub fn register(&self, block: &str, operation: &str) -> WatchdogHandle {
        let state = Arc::new(OperationState {
            started: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            detail: Mutex::new(String::new()),
            block: block.to_string(),
            operation: operation.to_string(),
        });
        self.operations.lock().push(Arc::downgrade(&state));
        WatchdogHandle { state }
    }

    /// Warn about operations running longer than the threshold. Returns the
    /// number of operations newly reported.
    pub fn check_for_blocked(&self) -> usize {
        let now = now_millis();
        let threshold_ms = self.threshold_ms.load(Ordering::Relaxed);
        let mut reported = 0;

        self.operations.lock().retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.started.load(Ordering::Relaxed);
            if start > 0 {
                let elapsed_ms = now.saturating_sub(start);
                if elapsed_ms > threshold_ms && !state.has_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "BLOCKED: [{}] {} '{}' for {:.1}s",
                        state.block,
                        state.operation,
                        state.detail.lock(),
                        elapsed_ms as f64 / 1000.0
                    );
                    reported += 1;
                }
            }
            true
        });
        reported
    }

    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let watchdog = self.clone();
        thread::Builder::new()
            .name("rfnoc-watchdog".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) =
                    watchdog.stop_rx.recv_timeout(watchdog.scan_interval())
                {
                    watchdog.check_for_blocked();
                }
            })
    }

    fn scan_interval(&self) -> Duration {
        (self.threshold() / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }

    pub fn stop(&self) {
        self.stop_tx.lock().take();
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHDOG_THRESHOLD)
    }
}

/// Marks a handler invocation as running for as long as it lives
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle, detail: &str) -> Self {
        handle.start_operation(detail);
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_operation_reported_once() {
        let watchdog = Watchdog::new(Duration::from_millis(20));
        let handle = watchdog.register("0/Radio#0", "action");

        {
            let _guard = OperationGuard::new(&handle, "stream_cmd");
            thread::sleep(Duration::from_millis(60));
            assert_eq!(watchdog.check_for_blocked(), 1);
            assert_eq!(watchdog.check_for_blocked(), 0);
        }
        assert_eq!(watchdog.check_for_blocked(), 0);
    }

    #[test]
    fn test_dropped_handles_are_forgotten() {
        let watchdog = Watchdog::default();
        let handle = watchdog.register("0/Radio#0", "action");
        assert_eq!(watchdog.operations.lock().len(), 1);
        drop(handle);
        watchdog.check_for_blocked();
        assert!(watchdog.operations.lock().is_empty());
    }

    #[test]
    fn test_threshold_change_applies_to_next_scan() {
        let watchdog = Watchdog::new(Duration::from_secs(60));
        let handle = watchdog.register("0/Radio#0", "action");
        let _guard = OperationGuard::new(&handle, "tune");
        thread::sleep(Duration::from_millis(30));
        assert_eq!(watchdog.check_for_blocked(), 0);

        watchdog.set_threshold(Duration::from_millis(10));
        assert_eq!(watchdog.threshold(), Duration::from_millis(10));
        assert_eq!(watchdog.check_for_blocked(), 1);
    }
}
