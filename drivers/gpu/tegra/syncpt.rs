// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Host sync points
//!
//! Sync points are monotonically incrementing 32-bit counters owned by the host controller. Each
//! channel owns one: every submission appends a command that increments it once, and the value it
//! will reach after that increment is the completion fence handed back to user space.
//!
//! The hardware keeps the current ("min") value; the driver keeps track of the highest value it has
//! promised so far ("max"). Values wrap, so comparisons are done on the signed distance.

use core::cmp;
use core::time::Duration;
use kernel::prelude::*;

/// A sync point counter value.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[repr(transparent)]
pub struct SyncptValue(pub u32);

impl SyncptValue {
    /// Computes the signed distance between this value and another one.
    pub fn delta(&self, other: &SyncptValue) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }
}

impl PartialOrd for SyncptValue {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SyncptValue {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.delta(other).cmp(&0)
    }
}

/// A (sync point, threshold) pair.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub struct Fence {
    pub id: u32,
    pub value: u32,
}

/// Host sync point capability.
pub trait Syncpoints: Send + Sync {
    /// Allocate a sync point for a client.
    fn alloc(&self, name: &str) -> Result<u32>;

    /// Return a sync point to the host.
    fn free(&self, id: u32);

    /// Read the value the hardware counter has reached.
    fn read_min(&self, id: u32) -> u32;

    /// Reserve `incrs` future increments and return the resulting maximum value.
    fn incr_max(&self, id: u32, incrs: u32) -> u32;

    /// Block until the counter reaches `thresh`, or `timeout` elapses (`ETIMEDOUT`).
    fn wait_timeout(&self, id: u32, thresh: u32, timeout: Duration) -> Result;
}

impl Fence {
    /// Returns `true` if the hardware counter has reached this fence.
    pub fn is_expired(&self, syncpts: &dyn Syncpoints) -> bool {
        SyncptValue(syncpts.read_min(self.id)) >= SyncptValue(self.value)
    }
}
