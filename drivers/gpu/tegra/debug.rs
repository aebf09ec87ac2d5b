// SPDX-License-Identifier: GPL-2.0-only OR MIT
#![allow(dead_code)]

//! Debug enable/disable flags and convenience macros

#[allow(unused_imports)]
pub(crate) use super::{cls_dev_dbg, cls_pr_debug, debug, mod_dev_dbg, mod_pr_debug};
use core::sync::atomic::{AtomicU64, Ordering};

static DEBUG_FLAGS: AtomicU64 = AtomicU64::new(0);

/// Debug flag bit indices
pub enum DebugFlags {
    // 0-3: GPU memory
    Mem = 0,
    Mmu = 1,
    PrivCmd = 3,

    // 8-15: Channels and FIFO
    Channel = 8,
    Submit = 9,
    Job = 10,
    Fifo = 11,
    Runlist = 12,
    Recovery = 13,
    Pmu = 14,
    Isr = 15,

    // 16-19: DVFS
    Dvfs = 16,
    Rail = 17,
    Regulator = 18,
    Thermal = 19,
}

/// Replace the global debug flags, usually from `Params::debug_flags`.
pub fn set_debug_flags(flags: u64) {
    DEBUG_FLAGS.store(flags, Ordering::Relaxed);
}

/// Fetch the current global debug flags.
pub fn debug_flags() -> u64 {
    DEBUG_FLAGS.load(Ordering::Relaxed)
}

/// Check whether debug is enabled for a given flag
#[inline(always)]
pub(crate) fn debug_enabled(flag: DebugFlags) -> bool {
    DEBUG_FLAGS.load(Ordering::Relaxed) & 1 << (flag as usize) != 0
}

/// Run some code only if debug is enabled for the calling module
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::debug::debug_enabled(DEBUG_CLASS) {
            $($arg)*
        }
    };
}

/// pr_debug!() if debug is enabled for the calling module
#[macro_export]
macro_rules! mod_pr_debug (
    ($($arg:tt)*) => (
        $crate::debug! { ::kernel::pr_debug! ( $($arg)* ); }
    )
);

/// dev_dbg!() if debug is enabled for the calling module
#[macro_export]
macro_rules! mod_dev_dbg (
    ($($arg:tt)*) => (
        $crate::debug! { ::kernel::dev_dbg! ( $($arg)* ); }
    )
);

/// pr_debug!() if debug is enabled for a specific module
#[macro_export]
macro_rules! cls_pr_debug (
    ($cls:ident, $($arg:tt)*) => (
        if $crate::debug::debug_enabled($crate::debug::DebugFlags::$cls) {
            ::kernel::pr_debug! ( $($arg)* );
        }
    )
);

/// dev_dbg!() if debug is enabled for a specific module
#[macro_export]
macro_rules! cls_dev_dbg (
    ($cls:ident, $($arg:tt)*) => (
        if $crate::debug::debug_enabled($crate::debug::DebugFlags::$cls) {
            ::kernel::dev_dbg! ( $($arg)* );
        }
    )
);
