// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! GPU address space binding
//!
//! Page table management itself belongs to the platform. A channel only needs to know where the
//! page directory of its address space lives (it is programmed into the instance block), how to
//! invalidate the translation cache, and how to pin the set of buffers a job references until the
//! job retires.

use kernel::prelude::*;

/// A buffer mapped into a GPU address space, referenced by a job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappedBuffer {
    pub gpu_va: u64,
    pub size: u64,
}

/// A GPU address space (VM) that channels can be bound to.
pub trait AddressSpace: Send + Sync {
    /// Identifier of this address space, for logging.
    fn id(&self) -> u64;

    /// Physical address of the page directory.
    fn pdb_address(&self) -> u64;

    /// Highest usable GPU virtual address plus one.
    fn va_limit(&self) -> u64;

    /// Invalidate the GPU's address translation cache for this address space.
    fn tlb_invalidate(&self);

    /// Take a reference to every buffer currently mapped in this address space.
    fn get_buffers(&self) -> Result<Vec<MappedBuffer>>;

    /// Drop references taken by `get_buffers`.
    fn put_buffers(&self, buffers: Vec<MappedBuffer>);
}
