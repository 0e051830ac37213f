//! Monotonic millisecond clock
//!
//! The protocol engine never sleeps in steady state; it compares stored
//! deadlines against `now_ms()` on each tick. `delay_ms` is only used by the
//! bounded boot-time discovery exchange.

use core::future::Future;

/// Time source for the node
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;

    /// Wait for `ms` milliseconds
    fn delay_ms(&self, ms: u32) -> impl Future<Output = ()>;
}

/// Clock backed by the Embassy time driver
#[cfg(feature = "embedded")]
pub struct EmbassyClock;

#[cfg(feature = "embedded")]
impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }

    async fn delay_ms(&self, ms: u32) {
        embassy_time::Timer::after(embassy_time::Duration::from_millis(ms as u64)).await;
    }
}
