// SPDX-License-Identifier: GPL-2.0

//! The `kernel` crate.
//!
//! This crate contains the runtime APIs the Tegra drivers are written against: error codes,
//! printing, locking, time, delays and register access. It mirrors the shape of the in-kernel
//! abstractions so that driver code reads the same, while being backed by ordinary userspace
//! facilities.
//!
//! If driver code needs a facility that is not here yet, add it here first instead of reaching
//! for the host environment directly.

pub mod delay;
pub mod error;
pub mod io_mem;
pub mod iopoll;
pub mod prelude;
pub mod print;
pub mod sync;
pub mod time;

#[doc(hidden)]
pub use log;

/// Size of a GPU/CPU page.
pub const PAGE_SIZE: usize = 4096;
