//! High-resolution delays.
//!
//! `std::thread::sleep` on Linux overshoots by tens of microseconds at best, which
//! is too coarse for bit timings such as a 10µs trigger pulse. Short delays are
//! therefore spun on the monotonic clock; long delays sleep for the bulk of the
//! interval and spin the remainder.

use std::{
    hint, thread,
    time::{Duration, Instant},
};

/// Delays at or below this are spun entirely.
pub const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

/// Blocks the calling thread for at least `duration`.
pub fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    let deadline = Instant::now() + duration;
    if duration > SPIN_THRESHOLD {
        thread::sleep(duration - SPIN_THRESHOLD);
    }
    spin_until(deadline);
}

pub fn sleep_micros(micros: u64) {
    sleep(Duration::from_micros(micros));
}

/// Busy-waits until `deadline` has passed.
pub fn spin_until(deadline: Instant) {
    while Instant::now() < deadline {
        hint::spin_loop();
    }
}
