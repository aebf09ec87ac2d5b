// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! GPU-visible memory allocations
//!
//! Channel instance blocks, gpfifo rings, private command buffers and runlist buffers all live in
//! memory that is pinned and mapped into the GPU's view of the world. The platform provides that
//! through a [`MemoryBackend`]; this module wraps each mapping in an owned [`Allocation`] that
//! unmaps itself on drop, so that error paths unwind by simply dropping what they built.
//!
//! The CPU side of an allocation is kept as a word array. Drivers write words and then call
//! [`Allocation::flush()`] before handing the memory to the GPU.

use crate::debug::*;
use kernel::{error::code::*, prelude::*, sync::Arc, PAGE_SIZE};

const DEBUG_CLASS: DebugFlags = DebugFlags::Mem;

/// Platform capability to pin, map and unmap GPU-visible memory.
pub trait MemoryBackend: Send + Sync {
    /// Pin and map `size` bytes (a multiple of the page size), returning the GPU address.
    fn pin_map(&self, size: usize) -> Result<u64>;

    /// Unmap and unpin a mapping previously returned by `pin_map`.
    fn unmap_unpin(&self, iova: u64, size: usize);

    /// Make CPU writes to a mapped range visible to the GPU.
    fn sync_for_device(&self, _iova: u64, _size: usize) {}
}

/// An owned, mapped GPU memory allocation.
pub(crate) struct Allocation {
    backend: Arc<dyn MemoryBackend>,
    iova: u64,
    size: usize,
    words: Vec<u32>,
}

impl Allocation {
    /// Allocate and map a zeroed buffer of at least `size` bytes.
    pub(crate) fn new(backend: &Arc<dyn MemoryBackend>, size: usize) -> Result<Allocation> {
        if size == 0 {
            return Err(EINVAL);
        }
        let size = crate::util::align(size, PAGE_SIZE);

        let mut words = Vec::new();
        words.try_reserve_exact(size / 4)?;
        words.resize(size / 4, 0);

        let iova = backend.pin_map(size)?;
        mod_pr_debug!("Allocation: mapped {:#x} bytes at {:#x}\n", size, iova);

        Ok(Allocation {
            backend: backend.clone(),
            iova,
            size,
            words,
        })
    }

    /// GPU address of the start of the allocation.
    pub(crate) fn iova(&self) -> u64 {
        self.iova
    }

    /// Size of the allocation in bytes.
    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Number of 32-bit words in the allocation.
    pub(crate) fn len_words(&self) -> usize {
        self.words.len()
    }

    pub(crate) fn read32(&self, word: usize) -> u32 {
        self.words[word]
    }

    pub(crate) fn write32(&mut self, word: usize, val: u32) {
        self.words[word] = val;
    }

    /// Copy a run of words starting at word index `word`.
    pub(crate) fn write_words(&mut self, word: usize, vals: &[u32]) {
        self.words[word..word + vals.len()].copy_from_slice(vals);
    }

    /// Zero the whole allocation.
    pub(crate) fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Publish CPU writes to the GPU.
    pub(crate) fn flush(&self) {
        self.backend.sync_for_device(self.iova, self.size);
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        mod_pr_debug!(
            "Allocation: unmapping {:#x} bytes at {:#x}\n",
            self.size,
            self.iova
        );
        self.backend.unmap_unpin(self.iova, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMem;

    #[test]
    fn alloc_rounds_to_pages_and_unmaps() {
        let mem = FakeMem::new();
        let backend: Arc<dyn MemoryBackend> = mem.clone();
        {
            let mut a = Allocation::new(&backend, 100).unwrap();
            assert_eq!(a.size(), PAGE_SIZE);
            assert_eq!(a.len_words(), PAGE_SIZE / 4);
            a.write_words(2, &[1, 2, 3]);
            assert_eq!(a.read32(3), 2);
            assert_eq!(mem.live(), 1);
        }
        assert_eq!(mem.live(), 0);
        assert_eq!(Allocation::new(&backend, 0).err(), Some(EINVAL));
    }

    #[test]
    fn backend_failure_propagates() {
        let mem = FakeMem::new();
        mem.fail_after(0);
        let backend: Arc<dyn MemoryBackend> = mem.clone();
        assert_eq!(Allocation::new(&backend, 4096).err(), Some(ENOMEM));
    }
}
