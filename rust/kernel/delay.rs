// SPDX-License-Identifier: GPL-2.0

//! Delay and sleep primitives.

use core::time::Duration;

/// Sleeps for a given duration.
///
/// The actual sleep may be longer than requested; callers that poll hardware must use a deadline
/// rather than counting sleeps.
pub fn coarse_sleep(duration: Duration) {
    std::thread::sleep(duration)
}

