//! Device-side capabilities consumed by blocks: timebase clock and
//! motherboard controller. Implementations live with the device transport.

use super::errors::IoError;

/// Callback invoked with the new rate whenever the timebase changes
pub type RateCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Timebase clock a block's registers are timed against
pub trait ClockInterface: Send + Sync {
    /// Currently active rate in Hz
    fn current_rate(&self) -> f64;

    /// Subscribe to rate changes
    fn on_rate_change(&self, callback: RateCallback);

    /// Told the tick rate the owning block resolved to, once per change.
    /// Runs inside a resolve pass, so it must not touch the graph.
    fn tick_rate_resolved(&self, _rate: f64) {}
}

/// Device-wide service shared by all blocks of one motherboard
pub trait MbController: Send + Sync {
    /// Index of the motherboard within the session
    fn mb_index(&self) -> usize;

    fn clock_source(&self) -> String;

    fn set_clock_source(&self, source: &str) -> Result<(), IoError>;

    fn time_source(&self) -> String;

    /// Names of the GPIO banks this motherboard exposes
    fn gpio_banks(&self) -> Vec<String> {
        Vec::new()
    }
}
