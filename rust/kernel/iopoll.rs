// SPDX-License-Identifier: GPL-2.0

//! Bounded polling helpers.
//!
//! Hardware handshakes (pending bits, acknowledge registers) are polled against a wall-clock
//! deadline with an exponentially growing sleep in between. A poll that observes the deadline has
//! passed always performs one final read before giving up, so that a slow-but-working handshake
//! is not reported as a timeout because the poller itself was descheduled.

use core::time::Duration;

use crate::delay::coarse_sleep;
use crate::error::{code::*, Result};
use crate::time::{clock, Now};

/// Backoff parameters for [`read_poll_timeout_backoff`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Initial delay between two polls.
    pub min: Duration,
    /// Ceiling for the delay between two polls.
    pub max: Duration,
}

impl Backoff {
    /// Returns the delay to use after `current`.
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// Polls `op` until `cond` holds on its result, or `timeout` elapses.
///
/// Errors returned by `op` are propagated immediately. On timeout returns `ETIMEDOUT`.
pub fn read_poll_timeout_backoff<Op, Cond, T>(
    mut op: Op,
    mut cond: Cond,
    backoff: Backoff,
    timeout: Duration,
) -> Result<T>
where
    Op: FnMut() -> Result<T>,
    Cond: FnMut(&T) -> bool,
{
    let start = clock::KernelTime::now();
    let mut delay = backoff.min;

    loop {
        let val = op()?;
        if cond(&val) {
            return Ok(val);
        }

        if start.elapsed() > timeout {
            // One more attempt after the deadline.
            let val = op()?;
            return if cond(&val) { Ok(val) } else { Err(ETIMEDOUT) };
        }

        coarse_sleep(delay);
        delay = backoff.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    const FAST: Backoff = Backoff {
        min: Duration::from_micros(1),
        max: Duration::from_micros(8),
    };

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut d = FAST.min;
        for _ in 0..10 {
            d = FAST.next(d);
        }
        assert_eq!(d, FAST.max);
    }

    #[test]
    fn poll_succeeds_eventually() {
        let count = Cell::new(0);
        let res = read_poll_timeout_backoff(
            || {
                count.set(count.get() + 1);
                Ok(count.get())
            },
            |v| *v >= 3,
            FAST,
            Duration::from_secs(1),
        );
        assert_eq!(res, Ok(3));
    }

    #[test]
    fn poll_times_out_after_final_attempt() {
        let count = Cell::new(0);
        let res = read_poll_timeout_backoff(
            || {
                count.set(count.get() + 1);
                Ok(0u32)
            },
            |v| *v != 0,
            FAST,
            Duration::from_millis(2),
        );
        assert_eq!(res, Err(ETIMEDOUT));
        assert!(count.get() >= 2);
    }

    #[test]
    fn poll_propagates_errors() {
        let res: Result<u32> =
            read_poll_timeout_backoff(|| Err(EIO), |_| true, FAST, Duration::from_secs(1));
        assert_eq!(res, Err(EIO));
    }
}
