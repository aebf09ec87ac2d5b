// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Driver core for the GK20A GPU found in NVIDIA Tegra K1 SoCs.
//!
//! Two largely independent halves live here: the host FIFO (channels, runlists, job tracking and
//! fault recovery) and the DVFS rail solver that keeps interdependent voltage rails consistent
//! with the clocks running on them. Platform services (register access, GPU memory, sync points,
//! the PMU and regulators) are consumed through traits so that the logic can run against the
//! fakes in `testing` as well as real hardware glue.

mod channel;
mod debug;
pub mod dvfs;
mod fifo;
pub mod hw;
mod mem;
mod mmu;
mod pmu;
mod priv_cmdbuf;
mod regs;
mod slotalloc;
mod syncpt;
mod util;
mod workqueue;

#[cfg(test)]
mod testing;

use core::time::Duration;
use hw::HwConfig;

pub use channel::{Channel, GpfifoEntry, SUBMIT_FLAGS_FENCE_GET, SUBMIT_FLAGS_FENCE_WAIT};
pub use debug::{debug_flags, set_debug_flags, DebugFlags};
pub use fifo::{FifoCore, FifoManager, RecoveryState};
pub use mem::MemoryBackend;
pub use mmu::{AddressSpace, MappedBuffer};
pub use pmu::{Pmu, PmuMutexId};
pub use syncpt::{Fence, SyncptValue, Syncpoints};

/// Load-time tunables.
#[derive(Clone, Debug)]
pub struct Params {
    /// Debug flags, see [`DebugFlags`].
    pub debug_flags: u64,
    /// Runlist update acknowledgement timeout in milliseconds.
    pub runlist_timeout_ms: u64,
    /// Channel preemption timeout in milliseconds.
    pub preempt_timeout_ms: u64,
    /// How long a submission may wait for gpfifo space, in milliseconds.
    pub gpfifo_wait_timeout_ms: u64,
    /// Whether engine-level power gating is in use, which requires PMU arbitration of runlist and
    /// preemption register access.
    pub elpg_enabled: bool,
}

impl Params {
    /// Defaults for a given chip.
    pub fn for_config(cfg: &HwConfig) -> Params {
        Params {
            debug_flags: 0,
            runlist_timeout_ms: cfg.runlist_timeout.as_millis() as u64,
            preempt_timeout_ms: cfg.preempt_timeout.as_millis() as u64,
            gpfifo_wait_timeout_ms: cfg.gpfifo_wait_timeout.as_millis() as u64,
            elpg_enabled: true,
        }
    }

    pub fn runlist_timeout(&self) -> Duration {
        Duration::from_millis(self.runlist_timeout_ms)
    }

    pub fn preempt_timeout(&self) -> Duration {
        Duration::from_millis(self.preempt_timeout_ms)
    }

    pub fn gpfifo_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.gpfifo_wait_timeout_ms)
    }
}

impl Default for Params {
    fn default() -> Params {
        Params::for_config(&hw::gk20a::HWCONFIG)
    }
}
