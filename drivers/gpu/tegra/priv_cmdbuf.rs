// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Private command buffer
//!
//! Each channel owns a small ring of command words that only the kernel writes into. Submissions
//! use it for the sync point wait and increment sequences that surround the user's command
//! buffers. Space is handed out in contiguous runs: a request that does not fit before the end of
//! the ring skips the tail and starts over at offset zero.
//!
//! Runs are freed in allocation order, when the job that owns them retires. The most recent run can
//! also be rolled back, which a submission does when it fails halfway through.

use crate::debug::*;
use crate::mem::{Allocation, MemoryBackend};
use kernel::{error::code::*, prelude::*, sync::Arc};

const DEBUG_CLASS: DebugFlags = DebugFlags::PrivCmd;

/// One run of words in the private command buffer.
#[derive(Debug)]
pub(crate) struct PrivCmdEntry {
    /// Word offset of the run.
    off: u32,
    /// Size in words.
    size: u32,
    /// GPU address of the run.
    gva: u64,
    /// Put pointer before this run was allocated.
    put_before: u32,
}

impl PrivCmdEntry {
    pub(crate) fn gva(&self) -> u64 {
        self.gva
    }

    pub(crate) fn size(&self) -> u32 {
        self.size
    }
}

/// The private command buffer ring of a channel.
pub(crate) struct PrivCmdQueue {
    mem: Allocation,
    /// Ring size in words.
    size: u32,
    put: u32,
    get: u32,
    outstanding: u32,
}

impl PrivCmdQueue {
    /// Create a ring of at least `size_words` words.
    pub(crate) fn new(backend: &Arc<dyn MemoryBackend>, size_words: u32) -> Result<PrivCmdQueue> {
        let mem = Allocation::new(backend, size_words as usize * 4)?;
        let size = mem.len_words() as u32;

        mod_pr_debug!(
            "PrivCmdQueue: {} words at {:#x}\n",
            size,
            mem.iova()
        );

        Ok(PrivCmdQueue {
            mem,
            size,
            put: 0,
            get: 0,
            outstanding: 0,
        })
    }

    fn find_space(&self, size: u32) -> Option<u32> {
        let fits_at = |off: u32, end: u32| off + size <= end;

        if self.outstanding == 0 {
            if fits_at(self.put, self.size) {
                Some(self.put)
            } else {
                Some(0)
            }
        } else if self.put > self.get {
            // Busy region is [get, put)
            if fits_at(self.put, self.size) {
                Some(self.put)
            } else if fits_at(0, self.get) {
                Some(0)
            } else {
                None
            }
        } else if self.put < self.get {
            // Busy region wraps: free space is [put, get)
            fits_at(self.put, self.get).then_some(self.put)
        } else {
            None
        }
    }

    /// Allocate a run of `size` words and fill it with `words`.
    ///
    /// Fails with `EAGAIN` if the ring is currently too full.
    pub(crate) fn alloc(&mut self, words: &[u32]) -> Result<PrivCmdEntry> {
        let size = words.len() as u32;
        if size == 0 || size > self.size {
            return Err(EINVAL);
        }

        let off = self.find_space(size).ok_or_else(|| {
            mod_pr_debug!(
                "PrivCmdQueue: no space for {} words (put {} get {})\n",
                size,
                self.put,
                self.get
            );
            EAGAIN
        })?;

        self.mem.write_words(off as usize, words);
        self.mem.flush();

        let entry = PrivCmdEntry {
            off,
            size,
            gva: self.mem.iova() + off as u64 * 4,
            put_before: self.put,
        };

        if self.outstanding == 0 {
            self.get = off;
        }
        self.put = off + size;
        if self.put == self.size {
            self.put = 0;
        }
        self.outstanding += 1;

        mod_pr_debug!(
            "PrivCmdQueue: alloc {} words at {} -> put {}\n",
            size,
            off,
            self.put
        );
        Ok(entry)
    }

    /// Undo the most recent allocation.
    pub(crate) fn rollback(&mut self, entry: PrivCmdEntry) {
        mod_pr_debug!("PrivCmdQueue: rollback {} -> put {}\n", entry.off, entry.put_before);
        self.put = entry.put_before;
        self.outstanding -= 1;
    }

    /// Free the oldest outstanding allocation.
    pub(crate) fn free(&mut self, entry: PrivCmdEntry) {
        self.get = entry.off + entry.size;
        if self.get == self.size {
            self.get = 0;
        }
        self.outstanding -= 1;
        mod_pr_debug!("PrivCmdQueue: free {} -> get {}\n", entry.off, self.get);
    }

    #[cfg(test)]
    pub(crate) fn words(&self, entry: &PrivCmdEntry) -> Vec<u32> {
        (entry.off..entry.off + entry.size)
            .map(|i| self.mem.read32(i as usize))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> u32 {
        self.outstanding
    }

    #[cfg(test)]
    pub(crate) fn size_words(&self) -> u32 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMem;

    fn queue() -> PrivCmdQueue {
        let backend: Arc<dyn MemoryBackend> = FakeMem::new();
        // One page: 1024 words
        PrivCmdQueue::new(&backend, 1024).unwrap()
    }

    #[test]
    fn alloc_free_in_order() {
        let mut q = queue();
        let a = q.alloc(&[1, 2, 3, 4]).unwrap();
        let b = q.alloc(&[5, 6, 7, 8, 9, 10]).unwrap();
        assert_eq!(q.words(&b), vec![5, 6, 7, 8, 9, 10]);
        assert_eq!(b.gva() - a.gva(), 16);
        q.free(a);
        q.free(b);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn rollback_restores_put() {
        let mut q = queue();
        let a = q.alloc(&[0; 4]).unwrap();
        let b = q.alloc(&[0; 4]).unwrap();
        q.rollback(b);
        let c = q.alloc(&[0; 4]).unwrap();
        assert_eq!(c.gva() - a.gva(), 16);
    }

    #[test]
    fn wraps_and_reports_full() {
        let mut q = queue();
        let n = q.size_words();
        let a = q.alloc(&vec![0; (n - 2) as usize]).unwrap();
        // Tail too small, head still busy
        assert_eq!(q.alloc(&[0; 4]).err(), Some(EAGAIN));
        q.free(a);
        // Tail is skipped, run starts over at zero
        let b = q.alloc(&[0; 4]).unwrap();
        assert_eq!(q.words(&b).len(), 4);
        let c = q.alloc(&vec![0; (n - 4) as usize]).unwrap();
        assert_eq!(q.alloc(&[0; 1]).err(), Some(EAGAIN));
        q.free(b);
        q.free(c);
        assert_eq!(q.alloc(&vec![0; (n + 1) as usize]).err(), Some(EINVAL));
    }
}
