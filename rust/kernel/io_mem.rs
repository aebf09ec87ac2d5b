// SPDX-License-Identifier: GPL-2.0

//! Memory-mapped IO.
//!
//! Drivers never touch a register window directly; they go through an [`Io`] implementation, which
//! is either a real mapping provided by the host or a register-file model in tests.

/// A 32-bit register window.
///
/// Offsets are in bytes from the start of the window and must be 4-byte aligned.
pub trait Io: Send + Sync {
    /// Reads a 32-bit register without ordering guarantees against normal memory accesses.
    fn readl_relaxed(&self, offset: usize) -> u32;

    /// Writes a 32-bit register without ordering guarantees against normal memory accesses.
    fn writel_relaxed(&self, value: u32, offset: usize);

    /// Reads a 32-bit register.
    fn readl(&self, offset: usize) -> u32 {
        let val = self.readl_relaxed(offset);
        core::sync::atomic::fence(core::sync::atomic::Ordering::Acquire);
        val
    }

    /// Writes a 32-bit register, ordered after all prior memory writes.
    fn writel(&self, value: u32, offset: usize) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        self.writel_relaxed(value, offset)
    }
}
