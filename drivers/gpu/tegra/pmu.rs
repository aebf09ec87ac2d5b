// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! PMU power gating interface
//!
//! The PMU microcontroller power-gates the graphics engine when it goes idle (ELPG). Register
//! sequences that must not race with power gating (preemption, fault recovery) either take one of
//! the PMU's hardware mutexes, which keeps gating off while held, or disable ELPG outright.
//!
//! Taking the FIFO mutex may fail if another agent already holds it. In that case gating is
//! already held off by that agent, and the caller proceeds without owning (and therefore without
//! releasing) the mutex.

use crate::debug::*;
use kernel::prelude::*;

const DEBUG_CLASS: DebugFlags = DebugFlags::Pmu;

/// PMU hardware mutex ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PmuMutexId {
    Rsvd1 = 0,
    Gpuser = 1,
    Gpmutex = 2,
    Fifo = 3,
}

/// PMU capability used by the FIFO engine.
pub trait Pmu: Send + Sync {
    /// Try to take a PMU mutex, returning the ownership token on success.
    fn mutex_acquire(&self, id: PmuMutexId) -> Result<u32>;

    /// Release a PMU mutex taken with `mutex_acquire`.
    fn mutex_release(&self, id: PmuMutexId, token: u32) -> Result;

    /// Allow engine-level power gating.
    fn enable_elpg(&self) -> Result;

    /// Forbid engine-level power gating, waiting for the engine to be powered.
    fn disable_elpg(&self) -> Result;
}

/// Ownership of a PMU mutex, released on drop.
pub(crate) struct PmuMutexGuard<'a> {
    pmu: &'a dyn Pmu,
    id: PmuMutexId,
    token: u32,
}

impl<'a> PmuMutexGuard<'a> {
    /// Try to take a PMU mutex. `None` means somebody else owns it.
    pub(crate) fn try_acquire(pmu: &'a dyn Pmu, id: PmuMutexId) -> Option<PmuMutexGuard<'a>> {
        match pmu.mutex_acquire(id) {
            Ok(token) => {
                mod_pr_debug!("PMU mutex {:?} acquired, token {}\n", id, token);
                Some(PmuMutexGuard { pmu, id, token })
            }
            Err(e) => {
                mod_pr_debug!("PMU mutex {:?} not acquired: {:?}\n", id, e);
                None
            }
        }
    }
}

impl Drop for PmuMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pmu.mutex_release(self.id, self.token) {
            pr_err!("Failed to release PMU mutex {:?}: {:?}\n", self.id, e);
        }
    }
}
