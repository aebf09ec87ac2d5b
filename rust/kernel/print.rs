// SPDX-License-Identifier: GPL-2.0

//! Printing facilities.
//!
//! The `pr_*!` and `dev_*!` macros keep the kernel's printk vocabulary while routing every message
//! through the [`log`] facade, so the hosting application decides where messages end up. The
//! printk log levels map onto [`log::Level`] as follows: emergency, alert, critical and error all
//! become `Error`, warning becomes `Warn`, notice and info become `Info`, debug becomes `Debug`.

/// Prints an emergency-level message (level 0).
#[macro_export]
macro_rules! pr_emerg (
    ($($arg:tt)*) => (
        $crate::log::error!(target: module_path!(), $($arg)*)
    )
);

/// Prints a critical-level message (level 2).
#[macro_export]
macro_rules! pr_crit (
    ($($arg:tt)*) => (
        $crate::log::error!(target: module_path!(), $($arg)*)
    )
);

/// Prints an error-level message (level 3).
#[macro_export]
macro_rules! pr_err (
    ($($arg:tt)*) => (
        $crate::log::error!(target: module_path!(), $($arg)*)
    )
);

/// Prints a warning-level message (level 4).
#[macro_export]
macro_rules! pr_warn (
    ($($arg:tt)*) => (
        $crate::log::warn!(target: module_path!(), $($arg)*)
    )
);

/// Prints a notice-level message (level 5).
#[macro_export]
macro_rules! pr_notice (
    ($($arg:tt)*) => (
        $crate::log::info!(target: module_path!(), $($arg)*)
    )
);

/// Prints an info-level message (level 6).
#[macro_export]
macro_rules! pr_info (
    ($($arg:tt)*) => (
        $crate::log::info!(target: module_path!(), $($arg)*)
    )
);

/// Prints a debug-level message (level 7).
#[macro_export]
macro_rules! pr_debug (
    ($($arg:tt)*) => (
        $crate::log::debug!(target: module_path!(), $($arg)*)
    )
);

/// Prints an error-level message prefixed with a device name.
#[macro_export]
macro_rules! dev_err (
    ($dev:expr, $fmt:literal $($arg:tt)*) => (
        $crate::log::error!(target: module_path!(), concat!("{}: ", $fmt), $dev $($arg)*)
    )
);

/// Prints a critical-level message prefixed with a device name.
#[macro_export]
macro_rules! dev_crit (
    ($dev:expr, $fmt:literal $($arg:tt)*) => (
        $crate::log::error!(target: module_path!(), concat!("{}: ", $fmt), $dev $($arg)*)
    )
);

/// Prints a warning-level message prefixed with a device name.
#[macro_export]
macro_rules! dev_warn (
    ($dev:expr, $fmt:literal $($arg:tt)*) => (
        $crate::log::warn!(target: module_path!(), concat!("{}: ", $fmt), $dev $($arg)*)
    )
);

/// Prints an info-level message prefixed with a device name.
#[macro_export]
macro_rules! dev_info (
    ($dev:expr, $fmt:literal $($arg:tt)*) => (
        $crate::log::info!(target: module_path!(), concat!("{}: ", $fmt), $dev $($arg)*)
    )
);

/// Prints a debug-level message prefixed with a device name.
#[macro_export]
macro_rules! dev_dbg (
    ($dev:expr, $fmt:literal $($arg:tt)*) => (
        $crate::log::debug!(target: module_path!(), concat!("{}: ", $fmt), $dev $($arg)*)
    )
);
