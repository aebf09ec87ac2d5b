// SPDX-License-Identifier: GPL-2.0

//! Timekeeping functions.
//!
//! Instants are tagged with the clock they were read from, so that durations can only be computed
//! between readings of the same clock.

use crate::pr_err;
use core::marker::PhantomData;
use core::time::Duration;
use std::sync::OnceLock;

/// Represents a clock, that is, a unique time source.
pub trait Clock: Sized {}

/// A time source that can be queried for the current time.
pub trait Now: Clock {
    /// Returns the current time for this clock.
    fn now() -> Instant<Self>;
}

/// Marker trait for clock sources that are guaranteed to be monotonic.
pub trait Monotonic {}

/// An instant in time associated with a given clock source.
#[derive(Debug)]
pub struct Instant<T: Clock> {
    nanoseconds: i64,
    _type: PhantomData<T>,
}

impl<T: Clock> Clone for Instant<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Clock> Copy for Instant<T> {}

impl<T: Clock> Instant<T> {
    fn new(nanoseconds: i64) -> Self {
        Instant {
            nanoseconds,
            _type: PhantomData,
        }
    }

    /// Returns the time elapsed since an earlier Instant<t>, or
    /// None if the argument is a later Instant.
    pub fn since(&self, earlier: Instant<T>) -> Option<Duration> {
        if earlier.nanoseconds > self.nanoseconds {
            None
        } else {
            // Casting to u64 and subtracting is guaranteed to give the right
            // result for all inputs, as long as the condition we checked above
            // holds.
            Some(Duration::from_nanos(
                self.nanoseconds as u64 - earlier.nanoseconds as u64,
            ))
        }
    }
}

impl<T: Clock + Now + Monotonic> Instant<T> {
    /// Returns the time elapsed since this Instant<T>.
    ///
    /// This is guaranteed to return a positive result, since
    /// it is only implemented for monotonic clocks.
    pub fn elapsed(&self) -> Duration {
        T::now().since(*self).unwrap_or_else(|| {
            pr_err!(
                "Monotonic clock {} went backwards!",
                core::any::type_name::<T>()
            );
            Duration::ZERO
        })
    }
}

/// Contains the various clock source types available to the drivers.
pub mod clock {
    use super::*;

    fn boot() -> &'static std::time::Instant {
        static BOOT: OnceLock<std::time::Instant> = OnceLock::new();
        BOOT.get_or_init(std::time::Instant::now)
    }

    /// A clock representing the default kernel time source.
    ///
    /// This is the monotonic clock, counted from the first time any clock in this module was
    /// read.
    #[derive(Debug)]
    pub struct KernelTime;

    impl Clock for KernelTime {}
    impl Monotonic for KernelTime {}
    impl Now for KernelTime {
        fn now() -> Instant<Self> {
            let nanos = boot().elapsed().as_nanos();
            Instant::<Self>::new(i64::try_from(nanos).unwrap_or(i64::MAX))
        }
    }
}
