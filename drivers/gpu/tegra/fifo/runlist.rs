// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Runlist buffers
//!
//! A runlist is the list of channels the hardware scheduler round-robins over. It is
//! double-buffered: updates are built in the buffer the hardware is not reading, then a single
//! register write pair points the hardware at it. Membership is tracked in a bitmap, and every
//! submission writes the active channels in ascending id order.

use crate::debug::*;
use crate::mem::{Allocation, MemoryBackend};
use crate::regs::Resources;
use crate::util::div_ceil;
use core::time::Duration;
use kernel::{
    error::code::*,
    iopoll::Backoff,
    prelude::*,
    sync::{Arc, CondVar, Mutex, MutexGuard},
    time::{clock, Now},
};

const DEBUG_CLASS: DebugFlags = DebugFlags::Runlist;

/// Words per runlist entry.
const ENTRY_WORDS: usize = 2;

/// Runlist state, protected by the runlist lock.
pub(crate) struct RunlistInner {
    active: Vec<u64>,
    buffers: [Allocation; 2],
    cur: usize,
    count: u32,
}

impl RunlistInner {
    /// Mark a channel active or inactive. Returns `false` if it already was in that state.
    pub(crate) fn set_active(&mut self, chid: u32, add: bool) -> bool {
        let (word, bit) = (chid as usize / 64, 1u64 << (chid % 64));
        let was = self.active[word] & bit != 0;
        if was == add {
            return false;
        }
        if add {
            self.active[word] |= bit;
        } else {
            self.active[word] &= !bit;
        }
        true
    }

    pub(crate) fn is_active(&self, chid: u32) -> bool {
        self.active
            .get(chid as usize / 64)
            .map(|w| w & (1u64 << (chid % 64)) != 0)
            .unwrap_or(false)
    }

    fn active_chids(&self) -> impl Iterator<Item = u32> + '_ {
        self.active.iter().enumerate().flat_map(|(i, &w)| {
            (0..64u32)
                .filter(move |b| w & (1u64 << b) != 0)
                .map(move |b| i as u32 * 64 + b)
        })
    }

    /// Write the active channels into the spare buffer and switch the hardware over to it.
    ///
    /// Does not wait for the hardware to pick up the new list.
    pub(crate) fn submit(&mut self, res: &Resources, runlist_id: u32) {
        let next = self.cur ^ 1;
        let chids: Vec<u32> = self.active_chids().collect();

        let buf = &mut self.buffers[next];
        for (i, chid) in chids.iter().enumerate() {
            buf.write_words(i * ENTRY_WORDS, &[*chid, 0]);
        }
        buf.flush();

        let count = chids.len() as u32;
        mod_dev_dbg!(
            res.name(),
            "runlist {}: submitting {} entries from buffer {}: {:?}\n",
            runlist_id,
            count,
            next,
            chids
        );

        res.submit_runlist(runlist_id, buf.iova(), count);
        self.cur = next;
        self.count = count;
    }

    /// Channel ids in the live buffer.
    pub(crate) fn entries(&self) -> Vec<u32> {
        let buf = &self.buffers[self.cur];
        (0..self.count as usize)
            .map(|i| buf.read32(i * ENTRY_WORDS))
            .collect()
    }
}

/// One hardware runlist.
pub(crate) struct Runlist {
    id: u32,
    inner: Mutex<RunlistInner>,
    pending_wq: CondVar,
}

impl Runlist {
    pub(crate) fn new(
        id: u32,
        mem: &Arc<dyn MemoryBackend>,
        num_channels: u32,
        entry_size: usize,
    ) -> Result<Runlist> {
        let size = num_channels as usize * entry_size;
        let buffers = [Allocation::new(mem, size)?, Allocation::new(mem, size)?];

        let words = div_ceil(num_channels as usize, 64);
        let mut active = Vec::new();
        active.try_reserve_exact(words)?;
        active.resize(words, 0);

        mod_pr_debug!(
            "Runlist {}: buffers at {:#x} / {:#x}\n",
            id,
            buffers[0].iova(),
            buffers[1].iova()
        );

        Ok(Runlist {
            id,
            inner: Mutex::new(RunlistInner {
                active,
                buffers,
                cur: 0,
                count: 0,
            }),
            pending_wq: CondVar::new("Runlist::pending_wq"),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RunlistInner> {
        self.inner.lock()
    }

    /// Wake waiters after a runlist event interrupt.
    pub(crate) fn notify(&self) {
        self.pending_wq.notify_all();
    }

    /// Wait for the hardware to finish loading the last submitted runlist.
    ///
    /// Sleeps on the runlist event wait queue, re-checking the pending bit with a growing delay.
    pub(crate) fn wait_pending(
        &self,
        guard: &mut MutexGuard<'_, RunlistInner>,
        res: &Resources,
        timeout: Duration,
        backoff: Backoff,
    ) -> Result {
        let start = clock::KernelTime::now();
        let mut delay = backoff.min;

        loop {
            if !res.runlist_pending(self.id) {
                return Ok(());
            }
            if start.elapsed() > timeout {
                // One more look after the deadline
                return if res.runlist_pending(self.id) {
                    Err(ETIMEDOUT)
                } else {
                    Ok(())
                };
            }
            self.pending_wq.wait_timeout(guard, delay);
            delay = backoff.next(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMem;

    #[test]
    fn bitmap_tracks_membership() {
        let backend: Arc<dyn MemoryBackend> = FakeMem::new();
        let rl = Runlist::new(0, &backend, 128, 8).unwrap();
        let mut inner = rl.lock();

        assert!(inner.set_active(100, true));
        assert!(!inner.set_active(100, true));
        assert!(inner.set_active(3, true));
        assert!(inner.is_active(100));
        assert_eq!(inner.active_chids().collect::<Vec<_>>(), vec![3, 100]);
        assert!(inner.set_active(100, false));
        assert!(!inner.set_active(100, false));
        assert!(!inner.is_active(100));
        assert!(!inner.is_active(1000));
    }
}
