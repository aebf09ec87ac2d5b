// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! GPU FIFO management
//!
//! The FIFO is the front end that feeds channels to the engines. This module owns the channel
//! pool, the runlists (the hardware-visible lists of channels eligible to run) and the interrupt
//! handling for the FIFO unit. Fault recovery lives in [`recovery`], runlist buffer management in
//! [`runlist`].
//!
//! Lock order: the recovery state lock is never held while taking a runlist lock. Runlist locks
//! are taken in ascending runlist id order. A channel's lock is never held while taking a
//! runlist lock.

use crate::channel::Channel;
use crate::debug::*;
use crate::hw::HwConfig;
use crate::mem::MemoryBackend;
use crate::pmu::{Pmu, PmuMutexGuard, PmuMutexId};
use crate::regs::{self, Resources};
use crate::slotalloc::SlotAllocator;
use crate::syncpt::Syncpoints;
use crate::Params;
use core::ops::Deref;
use kernel::{
    error::code::*,
    io_mem::Io,
    iopoll::read_poll_timeout_backoff,
    prelude::*,
    sync::{Arc, Mutex},
};
use std::sync::mpsc;
use std::thread::JoinHandle;

pub mod recovery;
pub(crate) mod runlist;

pub use recovery::RecoveryState;
use recovery::{Recovery, RecoveryMsg};
use runlist::Runlist;

const DEBUG_CLASS: DebugFlags = DebugFlags::Fifo;

/// Interrupts the FIFO handles.
const FIFO_INTR_EN_DEFAULT: u32 = regs::FIFO_INTR_0_BIND_ERROR
    | regs::FIFO_INTR_0_PIO_ERROR
    | regs::FIFO_INTR_0_SCHED_ERROR
    | regs::FIFO_INTR_0_CHSW_ERROR
    | regs::FIFO_INTR_0_MMU_FAULT
    | regs::FIFO_INTR_0_PBDMA_INTR
    | regs::FIFO_INTR_0_RUNLIST_EVENT;

/// State shared between the FIFO and every channel.
pub(crate) struct FifoShared {
    pub(crate) res: Resources,
    pub(crate) cfg: &'static HwConfig,
    pub(crate) params: Params,
    pub(crate) mem: Arc<dyn MemoryBackend>,
    pub(crate) syncpts: Arc<dyn Syncpoints>,
    pub(crate) pmu: Arc<dyn Pmu>,
}

/// The FIFO proper. Reached through [`FifoManager`].
pub struct FifoCore {
    shared: Arc<FifoShared>,
    channels: SlotAllocator<Arc<Channel>>,
    runlists: Vec<Runlist>,
    recovery: Recovery,
    isr_lock: Mutex<()>,
}

/// Top-level FIFO object. Owns the recovery worker thread.
pub struct FifoManager {
    core: Arc<FifoCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FifoManager {
    /// Bring up the FIFO: build the channel pool and runlists, enable interrupts and start the
    /// recovery worker.
    pub fn new(
        cfg: &'static HwConfig,
        params: Params,
        io: Arc<dyn Io>,
        mem: Arc<dyn MemoryBackend>,
        syncpts: Arc<dyn Syncpoints>,
        pmu: Arc<dyn Pmu>,
    ) -> Result<FifoManager> {
        crate::debug::set_debug_flags(params.debug_flags);

        let shared = Arc::new(FifoShared {
            res: Resources::new(cfg.name, io),
            cfg,
            params,
            mem,
            syncpts,
            pmu,
        });

        let channels = SlotAllocator::new("channels", cfg.num_channels, |chid| {
            Arc::new(Channel::new(chid, shared.clone()))
        })?;

        let mut runlists = Vec::new();
        runlists.try_reserve_exact(cfg.num_runlists as usize)?;
        for id in 0..cfg.num_runlists {
            runlists.push(Runlist::new(
                id,
                &shared.mem,
                cfg.num_channels,
                cfg.runlist_entry_size,
            )?);
        }

        let (tx, rx) = mpsc::channel();
        let core = Arc::new(FifoCore {
            shared,
            channels,
            runlists,
            recovery: Recovery::new(tx),
            isr_lock: Mutex::new(()),
        });

        let worker_core = core.clone();
        let worker = std::thread::Builder::new()
            .name(format!("{}-fifo-recovery", cfg.name))
            .spawn(move || recovery_worker(worker_core, rx))
            .map_err(|e| {
                pr_err!("Failed to spawn recovery worker: {}\n", e);
                ENOMEM
            })?;

        let res = &core.shared.res;
        res.fifo_intr_clear(u32::MAX);
        res.set_fifo_intr_enable(FIFO_INTR_EN_DEFAULT);

        dev_info!(
            res.name(),
            "FIFO up: {} channels, {} runlists\n",
            cfg.num_channels,
            cfg.num_runlists
        );

        Ok(FifoManager {
            core,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop the recovery worker and mask FIFO interrupts. Idempotent; also done on drop.
    pub fn remove(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.core.shared.res.set_fifo_intr_enable(0);
        self.core.recovery.send(RecoveryMsg::Stop);
        if worker.join().is_err() {
            pr_err!("FIFO recovery worker panicked\n");
        }
        mod_pr_debug!("FIFO removed\n");
    }
}

impl Deref for FifoManager {
    type Target = FifoCore;

    fn deref(&self) -> &FifoCore {
        &self.core
    }
}

impl Drop for FifoManager {
    fn drop(&mut self) {
        self.remove();
    }
}

fn recovery_worker(core: Arc<FifoCore>, rx: mpsc::Receiver<RecoveryMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            RecoveryMsg::Restore => core.restore(),
            RecoveryMsg::Stop => break,
        }
    }
    mod_pr_debug!("Recovery worker exiting\n");
}

impl FifoCore {
    fn dev(&self) -> &'static str {
        self.shared.res.name()
    }

    /// Runlist that channels are scheduled on.
    fn channel_runlist_id(&self) -> u32 {
        self.shared
            .cfg
            .engines
            .first()
            .map(|e| e.runlist_id)
            .unwrap_or(0)
    }

    /// Open a channel from the pool on behalf of process `pid`.
    ///
    /// Returns `EAGAIN` if every hardware channel is taken.
    pub fn open_channel(&self, pid: u32) -> Result<Arc<Channel>> {
        let Some((chid, ch)) = self.channels.acquire() else {
            dev_err!(self.dev(), "No free channels\n");
            return Err(EAGAIN);
        };

        if let Err(e) = ch.open(pid) {
            dev_err!(self.dev(), "Failed to open channel {}: {:?}\n", chid, e);
            ch.free();
            self.channels.release(chid)?;
            return Err(e);
        }

        Ok(ch)
    }

    /// Allocate the gpfifo of a channel and admit the channel to its runlist.
    pub fn alloc_gpfifo(&self, ch: &Arc<Channel>, num_entries: u32) -> Result {
        ch.setup_gpfifo(num_entries)?;

        if let Err(e) = self.update_runlist(self.channel_runlist_id(), ch.chid(), true, true) {
            dev_err!(
                self.dev(),
                "Failed to add channel {} to runlist: {:?}\n",
                ch.chid(),
                e
            );
            ch.teardown_gpfifo();
            return Err(e);
        }

        Ok(())
    }

    /// Close a channel: drain it, take it off the hardware and return it to the pool.
    pub fn close_channel(&self, ch: &Arc<Channel>) {
        let cfg = self.shared.cfg;
        let chid = ch.chid();

        if !ch.is_timed_out() {
            if let Err(e) = ch.finish(cfg.channel_finish_timeout) {
                dev_warn!(self.dev(), "channel {}: finish failed: {:?}\n", chid, e);
            }
        }

        ch.disable();

        if !ch.is_timed_out() {
            if let Err(e) = self.preempt_channel(chid) {
                dev_warn!(self.dev(), "channel {}: preempt failed: {:?}\n", chid, e);
            }
        }

        if ch.has_gpfifo() {
            if let Err(e) = self.update_runlist(self.channel_runlist_id(), chid, false, true) {
                dev_warn!(
                    self.dev(),
                    "channel {}: runlist removal failed: {:?}\n",
                    chid,
                    e
                );
            }
        }

        ch.update();
        ch.unbind();
        ch.free();

        if let Err(e) = self.channels.release(chid) {
            dev_err!(self.dev(), "channel {}: release failed: {:?}\n", chid, e);
        }
    }

    /// Look up an open channel by hardware id.
    pub fn channel(&self, chid: u32) -> Option<Arc<Channel>> {
        if self.channels.is_in_use(chid) {
            self.channels.get(chid)
        } else {
            None
        }
    }

    /// Sync point completion notification for a channel.
    pub fn channel_update(&self, chid: u32) {
        if let Some(ch) = self.channel(chid) {
            ch.update();
        }
    }

    /// Retire completed jobs on every open channel.
    pub fn update_all(&self) {
        for (_, ch) in self.channels.in_use() {
            ch.update();
        }
    }

    /// Number of channels in the pool.
    pub fn num_channels(&self) -> u32 {
        self.channels.capacity()
    }

    pub(crate) fn channel_by_inst(&self, inst_ptr: u64) -> Option<Arc<Channel>> {
        self.channels
            .in_use()
            .into_iter()
            .find(|(_, ch)| ch.inst_iova() == inst_ptr)
            .map(|(_, ch)| ch)
    }

    fn runlist(&self, runlist_id: u32) -> Result<&Runlist> {
        self.runlists.get(runlist_id as usize).ok_or(EINVAL)
    }

    /// Channel ids in the live runlist buffer, in buffer order.
    pub fn runlist_entries(&self, runlist_id: u32) -> Result<Vec<u32>> {
        Ok(self.runlist(runlist_id)?.lock().entries())
    }

    /// Add (`add == true`) or remove a channel from a runlist and resubmit it to the hardware.
    ///
    /// With `wait`, blocks until the hardware has picked up the new runlist. On timeout the
    /// engines busy on the runlist are reset and the wait is retried once.
    pub fn update_runlist(&self, runlist_id: u32, chid: u32, add: bool, wait: bool) -> Result {
        let sh = &*self.shared;
        let rl = self.runlist(runlist_id)?;
        if chid >= sh.cfg.num_channels {
            return Err(EINVAL);
        }

        if !self
            .recovery
            .wait_running(sh.params.runlist_timeout())
        {
            dev_warn!(
                self.dev(),
                "Updating runlist {} while recovery is in progress\n",
                runlist_id
            );
        }

        let _token = if sh.params.elpg_enabled {
            PmuMutexGuard::try_acquire(&*sh.pmu, PmuMutexId::Fifo)
        } else {
            None
        };

        let mut guard = rl.lock();

        if !guard.set_active(chid, add) {
            mod_dev_dbg!(
                self.dev(),
                "runlist {}: channel {} already {}\n",
                runlist_id,
                chid,
                if add { "active" } else { "inactive" }
            );
            return Ok(());
        }

        guard.submit(&sh.res, runlist_id);

        if !wait {
            return Ok(());
        }

        let timeout = sh.params.runlist_timeout();
        if rl
            .wait_pending(&mut guard, &sh.res, timeout, sh.cfg.poll_backoff)
            .is_err()
        {
            dev_err!(
                self.dev(),
                "runlist {} update timed out, resetting engines\n",
                runlist_id
            );
            let mask = self.busy_engines_on_runlist(runlist_id);
            kernel::sync::MutexGuard::unlocked(&mut guard, || {
                if let Err(e) = self.recover(mask) {
                    dev_err!(self.dev(), "Engine recovery failed: {:?}\n", e);
                }
            });
            rl.wait_pending(&mut guard, &sh.res, timeout, sh.cfg.poll_backoff)
                .map_err(|e| {
                    dev_err!(
                        self.dev(),
                        "runlist {} update timed out after recovery\n",
                        runlist_id
                    );
                    e
                })?;
        }

        Ok(())
    }

    /// Bitmask (by engine id) of engines that are busy and serve the given runlist.
    pub(crate) fn busy_engines_on_runlist(&self, runlist_id: u32) -> u32 {
        self.shared
            .cfg
            .engines
            .iter()
            .filter(|e| e.runlist_id == runlist_id)
            .filter(|e| self.shared.res.engine_status(e.engine_id).busy)
            .fold(0, |mask, e| mask | 1 << e.engine_id)
    }

    /// Bitmask (by engine id) of engines busy on a given channel.
    pub(crate) fn busy_engines_on_channel(&self, chid: u32) -> u32 {
        self.shared
            .cfg
            .engines
            .iter()
            .filter(|e| self.shared.res.engine_status(e.engine_id).is_busy_on(chid))
            .fold(0, |mask, e| mask | 1 << e.engine_id)
    }

    /// Preempt a channel off the engines.
    ///
    /// If the preemption does not complete in time, every engine still busy on the channel is
    /// reset and `ETIMEDOUT` is returned.
    pub fn preempt_channel(&self, chid: u32) -> Result {
        let sh = &*self.shared;
        if chid >= sh.cfg.num_channels {
            return Err(EINVAL);
        }

        let ret = {
            let _guards: Vec<_> = self.runlists.iter().map(|rl| rl.lock()).collect();
            let _token = if sh.params.elpg_enabled {
                PmuMutexGuard::try_acquire(&*sh.pmu, PmuMutexId::Fifo)
            } else {
                None
            };

            mod_dev_dbg!(self.dev(), "preempting channel {}\n", chid);
            sh.res.preempt_channel(chid);

            read_poll_timeout_backoff(
                || Ok(sh.res.preempt_pending()),
                |pending| !*pending,
                sh.cfg.poll_backoff,
                sh.params.preempt_timeout(),
            )
        };

        if let Err(e) = ret {
            dev_err!(self.dev(), "preempt of channel {} timed out\n", chid);
            let mask = self.busy_engines_on_channel(chid);
            if mask != 0 {
                if let Err(e) = self.recover(mask) {
                    dev_err!(self.dev(), "Engine recovery failed: {:?}\n", e);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// FIFO interrupt service routine.
    pub fn isr(&self) {
        let _isr = self.isr_lock.lock();
        let res = &self.shared.res;

        let intr = res.fifo_intr();
        let mut clear = 0;

        cls_pr_debug!(Isr, "FIFO interrupt {:#x}\n", intr);

        if intr & regs::FIFO_INTR_0_MMU_FAULT != 0 {
            // Cleared by the fault handler itself
            self.handle_mmu_fault(None);
        }

        if intr & regs::FIFO_INTR_0_RUNLIST_EVENT != 0 {
            let ev = res.runlist_intr_take();
            cls_pr_debug!(Isr, "runlist event {:#x}\n", ev);
            for rl in self.runlists.iter() {
                rl.notify();
            }
            clear |= regs::FIFO_INTR_0_RUNLIST_EVENT;
        }

        if intr & regs::FIFO_INTR_0_SCHED_ERROR != 0 {
            let code = res.sched_error();
            dev_err!(self.dev(), "FIFO sched error {:#x}\n", code);
            let mask = (0..self.runlists.len() as u32)
                .fold(0, |m, id| m | self.busy_engines_on_runlist(id));
            if mask != 0 {
                if let Err(e) = self.recover(mask) {
                    dev_err!(self.dev(), "Engine recovery failed: {:?}\n", e);
                }
            }
            clear |= regs::FIFO_INTR_0_SCHED_ERROR;
        }

        if intr & regs::FIFO_INTR_0_PBDMA_INTR != 0 {
            let ids = res.pbdma_intr_ids();
            for i in 0..self.shared.cfg.num_pbdma {
                if ids & (1 << i) != 0 {
                    let status = res.pbdma_intr_take(i);
                    dev_err!(self.dev(), "PBDMA {} interrupt {:#x}\n", i, status);
                }
            }
            clear |= regs::FIFO_INTR_0_PBDMA_INTR;
        }

        let errors = intr
            & (regs::FIFO_INTR_0_BIND_ERROR
                | regs::FIFO_INTR_0_PIO_ERROR
                | regs::FIFO_INTR_0_CHSW_ERROR);
        if errors != 0 {
            dev_err!(self.dev(), "FIFO error interrupt {:#x}\n", errors);
            clear |= errors;
        }

        let unhandled = intr & !(clear | regs::FIFO_INTR_0_MMU_FAULT);
        if unhandled != 0 {
            dev_warn!(self.dev(), "Unhandled FIFO interrupt {:#x}\n", unhandled);
        }

        if clear != 0 {
            res.fifo_intr_clear(clear);
        }
    }

    /// Current phase of fault recovery.
    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    /// Wait for any pending recovery to finish. Returns `false` on timeout.
    pub fn flush_recovery(&self, timeout: core::time::Duration) -> bool {
        self.recovery.wait_running(timeout)
    }
}
