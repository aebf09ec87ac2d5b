// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! GPU channels
//!
//! A channel is one command stream context. It owns an instance block (the context the FIFO saves
//! and restores on switch), a gpfifo ring of command buffer descriptors, a private command buffer
//! for kernel-inserted sync point commands, and one sync point that its submissions increment.
//!
//! User space submits batches of gpfifo entries. Each batch is copied into the ring, optionally
//! preceded by a sync point wait and always followed by a sync point increment; the value that
//! increment will reach is the batch's completion fence. Publishing the new PUT cursor through
//! USERD is the point of no return: everything before it unwinds cleanly on failure.

use crate::debug::*;
use crate::fifo::FifoShared;
use crate::mem::Allocation;
use crate::mmu::AddressSpace;
use crate::priv_cmdbuf::{PrivCmdEntry, PrivCmdQueue};
use crate::syncpt::Fence;
use crate::util::{hi32, lo32, roundup_pow_of_two};
use crate::workqueue::{Job, JobQueue};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use kernel::{
    error::code::*,
    prelude::*,
    sync::{Arc, CondVar, Mutex, MutexGuard},
    time::{clock, Now},
};

const DEBUG_CLASS: DebugFlags = DebugFlags::Channel;

/// Wait for the given fence before running the batch.
pub const SUBMIT_FLAGS_FENCE_WAIT: u32 = 1 << 0;
/// Return a fence that also covers a wait-for-idle after the batch.
pub const SUBMIT_FLAGS_FENCE_GET: u32 = 1 << 1;

// RAMFC layout, in words from the start of the instance block.
const RAMFC_GP_BASE: usize = 0x12;
const RAMFC_GP_BASE_HI: usize = 0x13;
const RAMFC_USERD: usize = 0x02;
const RAMFC_USERD_HI: usize = 0x03;
const RAMFC_SIGNATURE: usize = 0x04;
const RAMFC_CHID: usize = 0x3a;
const RAM_IN_PAGE_DIR_BASE_LO: usize = 0x80;
const RAM_IN_PAGE_DIR_BASE_HI: usize = 0x81;
const RAM_IN_ADR_LIMIT_LO: usize = 0x82;
const RAM_IN_ADR_LIMIT_HI: usize = 0x83;

const PBDMA_SIGNATURE: u32 = 0x0000_face;
const PAGE_DIR_BASE_VOL: u32 = 1 << 2;

// Host methods used in the private command buffer.
const HOST_SYNCPOINT_A: u32 = 0x2001_001c;
const HOST_SYNCPOINT_B: u32 = 0x2001_001d;
const HOST_WFI: u32 = 0x2001_001e;
const SYNCPOINT_B_WAIT: u32 = 0x10;
const SYNCPOINT_B_INCR: u32 = 0x1;

/// One gpfifo entry as seen by the PBDMA: a command buffer address and its length in words.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GpfifoEntry {
    pub entry0: u32,
    pub entry1: u32,
}

impl GpfifoEntry {
    /// Build an entry pointing at `len_words` command words at `gpu_va`.
    pub fn new(gpu_va: u64, len_words: u32) -> GpfifoEntry {
        GpfifoEntry {
            entry0: lo32(gpu_va),
            entry1: hi32(gpu_va) | (len_words & 0x1f_ffff) << 10,
        }
    }

    fn from_cmd(cmd: &PrivCmdEntry) -> GpfifoEntry {
        GpfifoEntry::new(cmd.gva(), cmd.size())
    }
}

/// The gpfifo ring of a channel.
struct Gpfifo {
    mem: Allocation,
    entry_num: u32,
    get: u32,
    put: u32,
    wrap: bool,
}

impl Gpfifo {
    fn free_count(&self) -> u32 {
        self.entry_num
            .wrapping_sub(self.put.wrapping_sub(self.get))
            .wrapping_sub(1)
            & (self.entry_num - 1)
    }

    fn push(&mut self, entry: GpfifoEntry) {
        let word = self.put as usize * 2;
        self.mem.write32(word, entry.entry0);
        self.mem.write32(word + 1, entry.entry1);
        self.put = (self.put + 1) & (self.entry_num - 1);
    }
}

/// Mutable channel state, protected by the channel lock.
#[derive(Default)]
struct ChannelInner {
    pid: u32,
    vm: Option<Arc<dyn AddressSpace>>,
    inst: Option<Allocation>,
    gpfifo: Option<Gpfifo>,
    priv_cmd: Option<PrivCmdQueue>,
    syncpt_id: Option<u32>,
    bound: bool,
    last_fence: Option<Fence>,
}

/// A GPU channel.
pub struct Channel {
    chid: u32,
    shared: Arc<FifoShared>,
    timed_out: AtomicBool,
    /// GPU address of the instance block, looked up by the fault handler without the channel lock.
    inst_iova: AtomicU64,
    inner: Mutex<ChannelInner>,
    jobs: JobQueue,
    submit_wq: CondVar,
}

impl Channel {
    pub(crate) fn new(chid: u32, shared: Arc<FifoShared>) -> Channel {
        Channel {
            chid,
            shared,
            timed_out: AtomicBool::new(false),
            inst_iova: AtomicU64::new(0),
            inner: Mutex::new(ChannelInner::default()),
            jobs: JobQueue::new(chid),
            submit_wq: CondVar::new("Channel::submit_wq"),
        }
    }

    fn dev(&self) -> &'static str {
        self.shared.res.name()
    }

    /// Hardware channel id.
    pub fn chid(&self) -> u32 {
        self.chid
    }

    /// Process that opened the channel.
    pub fn pid(&self) -> u32 {
        self.inner.lock().pid
    }

    /// Sync point incremented by this channel's submissions.
    pub fn syncpt_id(&self) -> Option<u32> {
        self.inner.lock().syncpt_id
    }

    /// Fence of the most recent submission.
    pub fn last_fence(&self) -> Option<Fence> {
        self.inner.lock().last_fence
    }

    /// Returns `true` if an address space is bound to the channel.
    pub fn is_bound(&self) -> bool {
        self.inner.lock().vm.is_some()
    }

    /// Returns `true` once the channel has been killed by fault recovery.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Number of gpfifo entries, if the gpfifo has been allocated.
    pub fn gpfifo_capacity(&self) -> Option<u32> {
        self.inner.lock().gpfifo.as_ref().map(|g| g.entry_num)
    }

    /// Current (get, put, wrap) view of the gpfifo ring.
    pub fn gpfifo_cursors(&self) -> Option<(u32, u32, bool)> {
        self.inner
            .lock()
            .gpfifo
            .as_ref()
            .map(|g| (g.get, g.put, g.wrap))
    }

    /// Number of submissions not yet retired.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn inst_iova(&self) -> u64 {
        self.inst_iova.load(Ordering::Acquire)
    }

    pub(crate) fn has_gpfifo(&self) -> bool {
        self.inner.lock().gpfifo.is_some()
    }

    /// Set up a freshly acquired channel: instance block and sync point.
    pub(crate) fn open(&self, pid: u32) -> Result {
        let sh = &*self.shared;
        let mut inner = self.inner.lock();

        let mut inst = Allocation::new(&sh.mem, sh.cfg.inst_block_size)?;
        inst.clear();
        inst.flush();
        let syncpt_id = sh
            .syncpts
            .alloc(&format!("{}_{}", sh.cfg.name, self.chid))?;

        self.inst_iova.store(inst.iova(), Ordering::Release);
        self.timed_out.store(false, Ordering::Release);

        *inner = ChannelInner {
            pid,
            inst: Some(inst),
            syncpt_id: Some(syncpt_id),
            ..Default::default()
        };

        mod_dev_dbg!(
            self.dev(),
            "channel {}: opened by pid {}, syncpt {}\n",
            self.chid,
            pid,
            syncpt_id
        );
        Ok(())
    }

    /// Bind an address space to the channel and point the instance block at its page directory.
    pub fn bind_vm(&self, vm: Arc<dyn AddressSpace>) -> Result {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.vm.is_some() {
            return Err(EEXIST);
        }
        let inst = inner.inst.as_mut().ok_or(EINVAL)?;

        let pdb = vm.pdb_address();
        let limit = vm.va_limit();
        inst.write32(RAM_IN_PAGE_DIR_BASE_LO, lo32(pdb) & !0xfff | PAGE_DIR_BASE_VOL);
        inst.write32(RAM_IN_PAGE_DIR_BASE_HI, hi32(pdb));
        inst.write32(RAM_IN_ADR_LIMIT_LO, lo32(limit) & !0xfff);
        inst.write32(RAM_IN_ADR_LIMIT_HI, hi32(limit));
        inst.flush();

        cls_dev_dbg!(
            Mmu,
            self.dev(),
            "channel {}: bound to vm {}\n",
            self.chid,
            vm.id()
        );
        inner.vm = Some(vm);
        Ok(())
    }

    /// Allocate the gpfifo and private command buffer, program RAMFC and USERD and bind the
    /// channel to its instance block. The caller adds the channel to the runlist afterwards.
    pub(crate) fn setup_gpfifo(&self, num_entries: u32) -> Result {
        let sh = &*self.shared;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.gpfifo.is_some() {
            dev_err!(self.dev(), "channel {}: gpfifo already allocated\n", self.chid);
            return Err(EEXIST);
        }
        if inner.vm.is_none() {
            dev_err!(
                self.dev(),
                "channel {}: no address space bound\n",
                self.chid
            );
            return Err(EINVAL);
        }
        if num_entries == 0 {
            return Err(EINVAL);
        }

        // Headroom for the kernel-inserted wait and increment around each user batch.
        let entry_num = num_entries
            .checked_mul(3)
            .and_then(roundup_pow_of_two)
            .ok_or(EINVAL)?;

        let mut mem = Allocation::new(&sh.mem, entry_num as usize * sh.cfg.gpfifo_entry_size)?;
        mem.clear();
        mem.flush();
        let priv_cmd = PrivCmdQueue::new(&sh.mem, entry_num * 8)?;

        let inst = inner.inst.as_mut().ok_or(EINVAL)?;
        let (userd_lo, userd_hi) = sh.res.userd_gpu_addr(self.chid, sh.cfg.userd_stride);
        inst.write32(RAMFC_GP_BASE, lo32(mem.iova()) & !7);
        inst.write32(
            RAMFC_GP_BASE_HI,
            hi32(mem.iova()) | entry_num.trailing_zeros() << 16,
        );
        inst.write32(RAMFC_SIGNATURE, PBDMA_SIGNATURE);
        inst.write32(RAMFC_USERD, userd_lo);
        inst.write32(RAMFC_USERD_HI, userd_hi);
        inst.write32(RAMFC_CHID, self.chid);
        inst.flush();

        sh.res.init_userd(self.chid, sh.cfg.userd_stride);
        sh.res.bind_channel(self.chid, inst.iova());
        inner.bound = true;

        mod_dev_dbg!(
            self.dev(),
            "channel {}: gpfifo {} entries at {:#x}\n",
            self.chid,
            entry_num,
            mem.iova()
        );

        inner.gpfifo = Some(Gpfifo {
            mem,
            entry_num,
            get: 0,
            put: 0,
            wrap: false,
        });
        inner.priv_cmd = Some(priv_cmd);
        Ok(())
    }

    /// Undo `setup_gpfifo`.
    pub(crate) fn teardown_gpfifo(&self) {
        let mut inner = self.inner.lock();
        if inner.bound {
            self.shared.res.unbind_channel(self.chid);
            inner.bound = false;
        }
        inner.priv_cmd = None;
        inner.gpfifo = None;
    }

    /// Refresh the local copy of the hardware GET cursor.
    fn update_gp_get(&self, gp: &mut Gpfifo) {
        let sh = &*self.shared;
        let new_get = sh.res.userd_gp_get(self.chid, sh.cfg.userd_stride);
        if new_get < gp.get {
            gp.wrap = !gp.wrap;
        }
        gp.get = new_get;
    }

    /// Wait until the gpfifo has `needed` free entries.
    fn wait_for_space(&self, guard: &mut MutexGuard<'_, ChannelInner>, needed: u32) -> Result {
        let sh = &*self.shared;
        let timeout = sh.params.gpfifo_wait_timeout();
        let slice = sh.cfg.poll_backoff.max;
        let start = clock::KernelTime::now();

        loop {
            if self.is_timed_out() {
                return Err(ENODEV);
            }

            let gp = guard.gpfifo.as_mut().ok_or(EINVAL)?;
            self.update_gp_get(gp);
            let free = gp.free_count();
            if free >= needed {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                mod_dev_dbg!(
                    self.dev(),
                    "channel {}: no gpfifo space ({} < {})\n",
                    self.chid,
                    free,
                    needed
                );
                return Err(EAGAIN);
            }
            self.submit_wq
                .wait_timeout(guard, (timeout - elapsed).min(slice));
        }
    }

    /// Submit a batch of gpfifo entries.
    ///
    /// With `SUBMIT_FLAGS_FENCE_WAIT` the batch waits for `fence` first. The returned fence
    /// expires once the batch has completed.
    pub fn submit_gpfifo(&self, entries: &[GpfifoEntry], flags: u32, fence: Fence) -> Result<Fence> {
        let sh = &*self.shared;
        let wait = flags & SUBMIT_FLAGS_FENCE_WAIT != 0;
        let wfi = flags & SUBMIT_FLAGS_FENCE_GET != 0;

        let mut guard = self.inner.lock();

        if self.is_timed_out() {
            return Err(ENODEV);
        }
        let vm = guard.vm.clone().ok_or(EINVAL)?;
        let syncpt_id = guard.syncpt_id.ok_or(EINVAL)?;
        let capacity = guard.gpfifo.as_ref().ok_or(EINVAL)?.entry_num;

        let needed = u32::try_from(entries.len())?
            .checked_add(1 + wait as u32)
            .ok_or(EINVAL)?;
        if needed > capacity - 1 {
            dev_err!(
                self.dev(),
                "channel {}: batch of {} entries can never fit in {}\n",
                self.chid,
                entries.len(),
                capacity
            );
            return Err(EINVAL);
        }

        cls_dev_dbg!(
            Submit,
            self.dev(),
            "channel {}: submit {} entries, flags {:#x}, fence {}:{}\n",
            self.chid,
            entries.len(),
            flags,
            fence.id,
            fence.value
        );

        {
            let gp = guard.gpfifo.as_mut().ok_or(EINVAL)?;
            self.update_gp_get(gp);
            let hw_put = sh.res.userd_gp_put(self.chid, sh.cfg.userd_stride);
            if hw_put != gp.put {
                dev_err!(
                    self.dev(),
                    "channel {}: gpfifo PUT mismatch (hw {} sw {})\n",
                    self.chid,
                    hw_put,
                    gp.put
                );
            }
        }

        vm.tlb_invalidate();

        self.wait_for_space(&mut guard, needed)?;

        let inner = &mut *guard;
        let q = inner.priv_cmd.as_mut().ok_or(EINVAL)?;

        let wait_cmd = if wait && !fence.is_expired(&*sh.syncpts) {
            Some(q.alloc(&[
                HOST_SYNCPOINT_A,
                fence.value,
                HOST_SYNCPOINT_B,
                fence.id << 8 | SYNCPOINT_B_WAIT,
            ])?)
        } else {
            None
        };

        let incr = [
            HOST_SYNCPOINT_A,
            0,
            HOST_SYNCPOINT_B,
            syncpt_id << 8 | SYNCPOINT_B_INCR,
        ];
        let incr_cmd = match if wfi {
            q.alloc(&[HOST_WFI, 0, incr[0], incr[1], incr[2], incr[3]])
        } else {
            q.alloc(&incr)
        } {
            Ok(cmd) => cmd,
            Err(e) => {
                if let Some(cmd) = wait_cmd {
                    q.rollback(cmd);
                }
                return Err(e);
            }
        };

        let buffers = match self.jobs.reserve().and_then(|_| vm.get_buffers()) {
            Ok(b) => b,
            Err(e) => {
                q.rollback(incr_cmd);
                if let Some(cmd) = wait_cmd {
                    q.rollback(cmd);
                }
                return Err(e);
            }
        };

        let gp = inner.gpfifo.as_mut().ok_or(EINVAL)?;
        if let Some(cmd) = wait_cmd.as_ref() {
            gp.push(GpfifoEntry::from_cmd(cmd));
        }
        for entry in entries {
            gp.push(*entry);
        }
        gp.push(GpfifoEntry::from_cmd(&incr_cmd));
        gp.mem.flush();

        let out = Fence {
            id: syncpt_id,
            value: sh.syncpts.incr_max(syncpt_id, 1),
        };

        vm.tlb_invalidate();

        self.jobs.push(Job {
            fence: out,
            buffers,
            wait_cmd,
            incr_cmd,
        });
        inner.last_fence = Some(out);

        sh.res
            .set_userd_gp_put(self.chid, sh.cfg.userd_stride, gp.put);

        cls_dev_dbg!(
            Submit,
            self.dev(),
            "channel {}: put {} get {}, fence {}:{}\n",
            self.chid,
            gp.put,
            gp.get,
            out.id,
            out.value
        );
        Ok(out)
    }

    /// Retire completed jobs, releasing their buffers and private command buffer space.
    pub fn update(&self) {
        let mut guard = self.inner.lock();
        let retired = self
            .jobs
            .retire(|job| job.fence.is_expired(&*self.shared.syncpts));
        if retired.is_empty() {
            return;
        }

        let inner = &mut *guard;
        for job in retired {
            cls_pr_debug!(
                Job,
                "channel {}: job {}:{} done\n",
                self.chid,
                job.fence.id,
                job.fence.value
            );
            if let Some(q) = inner.priv_cmd.as_mut() {
                if let Some(cmd) = job.wait_cmd {
                    q.free(cmd);
                }
                q.free(job.incr_cmd);
            }
            if let Some(vm) = inner.vm.as_ref() {
                vm.put_buffers(job.buffers);
            }
        }
        drop(guard);

        self.submit_wq.notify_all();
    }

    /// Wait for the last submitted job to complete.
    pub fn finish(&self, timeout: Duration) -> Result {
        if self.is_timed_out() {
            return Err(ENODEV);
        }
        let Some(fence) = self.last_fence() else {
            return Ok(());
        };

        mod_dev_dbg!(
            self.dev(),
            "channel {}: finish, waiting for {}:{}\n",
            self.chid,
            fence.id,
            fence.value
        );
        self.shared
            .syncpts
            .wait_timeout(fence.id, fence.value, timeout)
    }

    /// Wait for an arbitrary sync point to reach `thresh`.
    pub fn wait_syncpt(&self, id: u32, thresh: u32, timeout: Duration) -> Result {
        if self.is_timed_out() {
            return Err(ENODEV);
        }
        self.shared.syncpts.wait_timeout(id, thresh, timeout)
    }

    /// Mark the channel as killed by recovery and wake anyone waiting on it.
    pub(crate) fn set_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
        self.submit_wq.notify_all();
    }

    pub(crate) fn disable(&self) {
        self.shared.res.disable_channel(self.chid);
    }

    pub(crate) fn unbind(&self) {
        let mut inner = self.inner.lock();
        if inner.bound {
            self.shared.res.unbind_channel(self.chid);
            inner.bound = false;
        }
    }

    /// Release every resource owned by the channel, leaving it ready for reuse.
    pub(crate) fn free(&self) {
        let mut guard = self.inner.lock();

        for job in self.jobs.drain() {
            if let Some(vm) = guard.vm.as_ref() {
                vm.put_buffers(job.buffers);
            }
        }
        if let Some(id) = guard.syncpt_id {
            self.shared.syncpts.free(id);
        }

        *guard = ChannelInner::default();
        self.inst_iova.store(0, Ordering::Release);

        mod_dev_dbg!(self.dev(), "channel {}: freed\n", self.chid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syncpt::Syncpoints;
    use crate::testing::{FakeVm, FifoRig};

    fn entries(n: usize) -> Vec<GpfifoEntry> {
        (0..n)
            .map(|i| GpfifoEntry::new(0x10_0000 + i as u64 * 0x100, 16))
            .collect()
    }

    #[test]
    fn gpfifo_requires_vm() {
        let rig = FifoRig::new();
        let ch = rig.fifo.open_channel(1).unwrap();
        assert_eq!(rig.fifo.alloc_gpfifo(&ch, 2), Err(EINVAL));

        ch.bind_vm(FakeVm::new()).unwrap();
        assert_eq!(ch.bind_vm(FakeVm::new()), Err(EEXIST));
        rig.fifo.alloc_gpfifo(&ch, 2).unwrap();
        assert_eq!(ch.gpfifo_capacity(), Some(8));
        assert_eq!(rig.fifo.alloc_gpfifo(&ch, 2), Err(EEXIST));
    }

    #[test]
    fn submit_writes_entries_and_fence() {
        let rig = FifoRig::new();
        let (ch, vm) = rig.open_bound_channel(4);
        let id = ch.syncpt_id().unwrap();

        let user = entries(2);
        let fence = ch.submit_gpfifo(&user, 0, Fence::default()).unwrap();
        assert_eq!(fence, Fence { id, value: 1 });
        assert_eq!(ch.gpfifo_cursors(), Some((0, 3, false)));
        assert_eq!(rig.userd_gp_put(ch.chid()), 3);
        assert_eq!(vm.tlb_invalidates(), 2);
        assert_eq!(ch.pending_jobs(), 1);

        {
            let inner = ch.inner.lock();
            let gp = inner.gpfifo.as_ref().unwrap();
            assert_eq!(gp.mem.read32(0), user[0].entry0);
            assert_eq!(gp.mem.read32(3), user[1].entry1);
            // Last entry points at the 4-word increment sequence
            assert_eq!(gp.mem.read32(5) >> 10, 4);
        }

        let fence2 = ch
            .submit_gpfifo(&entries(1), SUBMIT_FLAGS_FENCE_GET, Fence::default())
            .unwrap();
        assert_eq!(fence2.value, 2);
        let inner = ch.inner.lock();
        let gp = inner.gpfifo.as_ref().unwrap();
        // Wait-for-idle variant is 6 words long
        assert_eq!(gp.mem.read32(9) >> 10, 6);
    }

    #[test]
    fn expired_wait_fence_is_skipped() {
        let rig = FifoRig::new();
        let (ch, _vm) = rig.open_bound_channel(4);
        let other = rig.syncpts.alloc("other").unwrap();
        rig.syncpts.incr_max(other, 2);

        let pending = Fence { id: other, value: 2 };
        ch.submit_gpfifo(&entries(1), SUBMIT_FLAGS_FENCE_WAIT, pending)
            .unwrap();
        // wait + user + incr
        assert_eq!(ch.gpfifo_cursors().unwrap().1, 3);
        {
            let inner = ch.inner.lock();
            let q = inner.priv_cmd.as_ref().unwrap();
            assert_eq!(q.outstanding(), 2);
        }

        rig.syncpts.set_min(other, 2);
        ch.submit_gpfifo(&entries(1), SUBMIT_FLAGS_FENCE_WAIT, pending)
            .unwrap();
        // user + incr only
        assert_eq!(ch.gpfifo_cursors().unwrap().1, 5);
    }

    #[test]
    fn full_ring_returns_eagain() {
        let rig = FifoRig::new();
        let (ch, _vm) = rig.open_bound_channel(2);
        assert_eq!(ch.gpfifo_capacity(), Some(8));

        ch.submit_gpfifo(&entries(6), 0, Fence::default()).unwrap();
        assert_eq!(ch.gpfifo_cursors().unwrap().1, 7);

        // free = 8 - 7 - 1 = 0
        assert_eq!(
            ch.submit_gpfifo(&entries(2), 0, Fence::default()),
            Err(EAGAIN)
        );
        assert_eq!(ch.gpfifo_cursors().unwrap().1, 7);
        assert_eq!(ch.pending_jobs(), 1);

        // Larger than the ring can ever hold
        assert_eq!(
            ch.submit_gpfifo(&entries(7), 0, Fence::default()),
            Err(EINVAL)
        );
    }

    #[test]
    fn ring_wraps_after_retirement() {
        let rig = FifoRig::new();
        let (ch, vm) = rig.open_bound_channel(2);
        let id = ch.syncpt_id().unwrap();

        let f1 = ch.submit_gpfifo(&entries(6), 0, Fence::default()).unwrap();
        assert_eq!(ch.gpfifo_cursors(), Some((0, 7, false)));

        // GPU consumes everything and signals the fence
        rig.set_userd_gp_get(ch.chid(), 7);
        rig.syncpts.set_min(id, f1.value);
        ch.update();
        assert_eq!(ch.pending_jobs(), 0);
        assert_eq!(vm.puts(), 1);

        ch.submit_gpfifo(&entries(6), 0, Fence::default()).unwrap();
        let (get, put, wrap) = ch.gpfifo_cursors().unwrap();
        assert_eq!((get, put, wrap), (7, 6, false));
        // Ring is full again; the unretired entries at 7, 0..5 are not overwritten
        assert_eq!(
            ch.submit_gpfifo(&entries(1), 0, Fence::default()),
            Err(EAGAIN)
        );

        rig.set_userd_gp_get(ch.chid(), 6);
        ch.submit_gpfifo(&entries(1), 0, Fence::default()).unwrap();
        let (get, put, wrap) = ch.gpfifo_cursors().unwrap();
        assert_eq!((get, put, wrap), (6, 0, true));
    }

    #[test]
    fn space_wait_is_woken_by_retirement() {
        let rig = FifoRig::with_wait_timeout(2000);
        let (ch, _vm) = rig.open_bound_channel(2);
        let id = ch.syncpt_id().unwrap();
        let f1 = ch.submit_gpfifo(&entries(6), 0, Fence::default()).unwrap();

        let t = {
            let ch = ch.clone();
            let io = rig.io.clone();
            let syncpts = rig.syncpts.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                io.set_userd_gp_get(ch.chid(), 7);
                syncpts.set_min(id, f1.value);
                ch.update();
            })
        };

        let f2 = ch.submit_gpfifo(&entries(2), 0, Fence::default()).unwrap();
        assert_eq!(f2.value, f1.value + 1);
        t.join().unwrap();
    }

    #[test]
    fn failed_buffer_get_rolls_back() {
        let rig = FifoRig::new();
        let (ch, vm) = rig.open_bound_channel(4);
        vm.fail_get_buffers(true);

        assert_eq!(
            ch.submit_gpfifo(&entries(1), SUBMIT_FLAGS_FENCE_WAIT, Fence { id: 99, value: 5 }),
            Err(ENOMEM)
        );
        assert_eq!(ch.gpfifo_cursors().unwrap().1, 0);
        assert_eq!(rig.userd_gp_put(ch.chid()), 0);
        assert_eq!(ch.inner.lock().priv_cmd.as_ref().unwrap().outstanding(), 0);
        assert_eq!(ch.pending_jobs(), 0);
    }

    #[test]
    fn finish_waits_for_last_fence() {
        let rig = FifoRig::new();
        let (ch, _vm) = rig.open_bound_channel(4);
        assert_eq!(ch.finish(Duration::from_millis(1)), Ok(()));

        let f = ch.submit_gpfifo(&entries(1), 0, Fence::default()).unwrap();
        assert_eq!(ch.finish(Duration::from_millis(5)), Err(ETIMEDOUT));
        rig.syncpts.set_min(f.id, f.value);
        assert_eq!(ch.finish(Duration::from_millis(5)), Ok(()));
        assert_eq!(ch.wait_syncpt(f.id, f.value, Duration::from_millis(5)), Ok(()));
    }
}
