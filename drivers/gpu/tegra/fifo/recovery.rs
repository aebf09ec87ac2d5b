// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! MMU fault handling and engine recovery
//!
//! Recovery runs in two phases. The fault handler itself never blocks on the hardware: it stops
//! the world by taking every runlist lock, kills the channels that were running on the faulted
//! engines, resets those engines and resubmits the runlists without waiting for them to load.
//! Restoring power gating and waiting for the runlists to come back is left to a dedicated worker
//! thread, which gets a message once the fault has been cleared.
//!
//! The runlist locks are dropped before the worker runs, since a guard cannot move to another
//! thread. Runlist updates wait on [`RecoveryState::Running`] instead, so no channel is admitted
//! until the restore has finished.
//!
//! Engines that have to be reset for other reasons (stuck preemption, scheduler errors, runlist
//! timeouts) go through the same path by triggering a synthetic MMU fault on them.

use super::FifoCore;
use crate::debug::*;
use crate::regs;
use core::time::Duration;
use kernel::{
    iopoll::read_poll_timeout_backoff,
    prelude::*,
    sync::{CondVar, Mutex},
    time::{clock, Now},
};
use std::sync::mpsc::Sender;

const DEBUG_CLASS: DebugFlags = DebugFlags::Recovery;

/// Phase of fault recovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    /// Normal operation.
    Running,
    /// A fault is being handled; channels are being evicted.
    FaultedEvicting,
    /// Faulted channels are gone; the worker is restoring the runlists.
    Restoring,
}

/// Messages for the recovery worker.
pub(crate) enum RecoveryMsg {
    Restore,
    Stop,
}

struct RecoveryInner {
    state: RecoveryState,
    pending: u32,
}

/// Recovery state machine.
pub(crate) struct Recovery {
    inner: Mutex<RecoveryInner>,
    cond: CondVar,
    tx: Mutex<Sender<RecoveryMsg>>,
}

impl Recovery {
    pub(crate) fn new(tx: Sender<RecoveryMsg>) -> Recovery {
        Recovery {
            inner: Mutex::new(RecoveryInner {
                state: RecoveryState::Running,
                pending: 0,
            }),
            cond: CondVar::new("Recovery::cond"),
            tx: Mutex::new(tx),
        }
    }

    pub(crate) fn state(&self) -> RecoveryState {
        self.inner.lock().state
    }

    pub(crate) fn send(&self, msg: RecoveryMsg) {
        if self.tx.lock().send(msg).is_err() {
            pr_err!("Recovery worker is gone\n");
        }
    }

    fn begin_fault(&self) {
        let mut inner = self.inner.lock();
        mod_pr_debug!("Recovery: {:?} -> FaultedEvicting\n", inner.state);
        inner.state = RecoveryState::FaultedEvicting;
    }

    fn schedule_restore(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = RecoveryState::Restoring;
            inner.pending += 1;
        }
        self.send(RecoveryMsg::Restore);
    }

    fn finish_restore(&self) {
        let mut inner = self.inner.lock();
        inner.pending = inner.pending.saturating_sub(1);
        if inner.pending == 0 && inner.state == RecoveryState::Restoring {
            inner.state = RecoveryState::Running;
            mod_pr_debug!("Recovery: back to Running\n");
            self.cond.notify_all();
        }
    }

    /// Wait until no recovery is in progress. Returns `false` on timeout.
    pub(crate) fn wait_running(&self, timeout: Duration) -> bool {
        let start = clock::KernelTime::now();
        let mut inner = self.inner.lock();

        while inner.state != RecoveryState::Running {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            self.cond.wait_timeout(&mut inner, timeout - elapsed);
        }
        true
    }
}

impl FifoCore {
    /// Handle an MMU fault.
    ///
    /// With `engine_mask` (a bitmask of engine ids) the fault was triggered on purpose to reset
    /// those engines, and the victim channels are taken from the engine status. Otherwise the
    /// faulted engines are read from the hardware and the victims are found by instance pointer.
    pub(crate) fn handle_mmu_fault(&self, engine_mask: Option<u32>) {
        let sh = &*self.shared;
        let res = &sh.res;

        if let Err(e) = sh.pmu.disable_elpg() {
            dev_err!(res.name(), "Failed to disable ELPG for recovery: {:?}\n", e);
        }
        self.recovery.begin_fault();

        let engines: Vec<_> = match engine_mask {
            Some(mask) => sh
                .cfg
                .engines
                .iter()
                .filter(|e| mask & (1 << e.engine_id) != 0)
                .collect(),
            None => {
                let ids = res.mmu_fault_id();
                (0..32)
                    .filter(|i| ids & (1 << i) != 0)
                    .filter_map(|i| {
                        let engine = sh.cfg.engine_by_fault_id(i);
                        if engine.is_none() {
                            dev_err!(res.name(), "MMU fault on unknown unit {:#x}\n", i);
                        }
                        engine
                    })
                    .collect()
            }
        };

        let mut guards: Vec<_> = self.runlists.iter().map(|rl| rl.lock()).collect();
        let mut fault_ids = 0u32;

        for engine in engines {
            fault_ids |= 1 << engine.mmu_fault_id;
            let info = res.fault_info(engine.mmu_fault_id);

            if engine_mask.is_none() {
                dev_err!(
                    res.name(),
                    "MMU fault on {:?} engine: {:?} {} by client {:#x} at {:#x} (inst {:#x})\n",
                    engine.ty,
                    info.reason,
                    if info.write { "write" } else { "read" },
                    info.client,
                    info.address,
                    info.inst_ptr
                );
            } else {
                dev_info!(res.name(), "Resetting {:?} engine\n", engine.ty);
            }

            let victim = match engine_mask {
                Some(_) => res
                    .engine_status(engine.engine_id)
                    .active_chid()
                    .and_then(|chid| self.channel(chid)),
                None => self.channel_by_inst(info.inst_ptr),
            };

            if let Some(ch) = victim {
                let chid = ch.chid();
                dev_err!(res.name(), "Killing channel {} (pid {})\n", chid, ch.pid());
                ch.set_timed_out();
                res.disable_channel(chid);
                if let Some(guard) = guards.get_mut(engine.runlist_id as usize) {
                    if guard.is_active(chid) {
                        guard.set_active(chid, false);
                    }
                }
            } else {
                mod_dev_dbg!(res.name(), "No channel found for {:?} fault\n", engine.ty);
            }

            res.reset_engine(engine.reset_mask);
        }

        // Some engines may still be coming out of reset, so don't wait for the runlists here.
        for (rl, guard) in self.runlists.iter().zip(guards.iter_mut()) {
            guard.submit(res, rl.id());
        }

        res.fifo_intr_clear(regs::FIFO_INTR_0_MMU_FAULT);
        res.clear_mmu_fault_id(if engine_mask.is_some() {
            fault_ids
        } else {
            res.mmu_fault_id()
        });

        drop(guards);
        self.recovery.schedule_restore();
    }

    /// Deferred half of fault recovery, run on the worker thread.
    pub(crate) fn restore(&self) {
        let sh = &*self.shared;
        mod_dev_dbg!(sh.res.name(), "Restoring runlists after fault\n");

        if let Err(e) = sh.pmu.enable_elpg() {
            dev_err!(sh.res.name(), "Failed to re-enable ELPG: {:?}\n", e);
        }

        for rl in self.runlists.iter() {
            let mut guard = rl.lock();
            guard.submit(&sh.res, rl.id());
            if let Err(e) = rl.wait_pending(
                &mut guard,
                &sh.res,
                sh.params.runlist_timeout(),
                sh.cfg.poll_backoff,
            ) {
                dev_err!(
                    sh.res.name(),
                    "runlist {} did not reload after recovery: {:?}\n",
                    rl.id(),
                    e
                );
            }
        }

        self.recovery.finish_restore();
    }

    /// Reset a set of engines (bitmask of engine ids) by triggering an MMU fault on them.
    pub fn recover(&self, engine_mask: u32) -> Result {
        if engine_mask == 0 {
            return Ok(());
        }

        let sh = &*self.shared;
        let res = &sh.res;
        let engines: Vec<_> = sh
            .cfg
            .engines
            .iter()
            .filter(|e| engine_mask & (1 << e.engine_id) != 0)
            .collect();

        dev_info!(res.name(), "Recovering engines {:#x}\n", engine_mask);

        let intr_en = res.fifo_intr_enable();
        res.set_fifo_intr_enable(intr_en & !regs::FIFO_INTR_0_MMU_FAULT);

        for engine in engines.iter() {
            res.trigger_mmu_fault(engine.engine_id, engine.mmu_fault_id);
        }

        let ret = read_poll_timeout_backoff(
            || Ok(res.fifo_intr()),
            |intr| intr & regs::FIFO_INTR_0_MMU_FAULT != 0,
            sh.cfg.poll_backoff,
            sh.cfg.mmu_fault_trigger_timeout,
        );
        if ret.is_err() {
            dev_err!(res.name(), "Timed out waiting for triggered MMU fault\n");
        }

        self.handle_mmu_fault(Some(engine_mask));

        for engine in engines.iter() {
            res.clear_mmu_fault_trigger(engine.engine_id);
        }
        res.set_fifo_intr_enable(intr_en);

        ret.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::GpfifoEntry;
    use crate::testing::FifoRig;
    use kernel::error::code::*;

    #[test]
    fn mmu_fault_kills_only_the_faulting_channel() {
        let rig = FifoRig::new();
        let (victim, _vm1) = rig.open_bound_channel(2);
        let (bystander, _vm2) = rig.open_bound_channel(2);
        assert_eq!(
            rig.fifo.runlist_entries(0).unwrap(),
            vec![victim.chid(), bystander.chid()]
        );

        // GR faulted while running the victim
        rig.io.set(
            regs::fifo_intr_mmu_fault_inst(0),
            (victim.inst_iova() >> 12) as u32,
        );
        rig.io.set(regs::fifo_intr_mmu_fault_info(0), 2 | 1 << 7);
        rig.io.set(regs::FIFO_INTR_MMU_FAULT_ID, 1);
        rig.io.set(regs::FIFO_INTR_0, regs::FIFO_INTR_0_MMU_FAULT);

        rig.fifo.isr();
        assert!(rig.fifo.flush_recovery(Duration::from_secs(5)));
        assert_eq!(rig.fifo.recovery_state(), RecoveryState::Running);

        assert!(victim.is_timed_out());
        assert!(!bystander.is_timed_out());
        assert_eq!(rig.fifo.runlist_entries(0).unwrap(), vec![bystander.chid()]);
        assert_eq!(rig.io.get(regs::FIFO_INTR_0), 0);
        assert_eq!(rig.io.get(regs::FIFO_INTR_MMU_FAULT_ID), 0);
        assert_eq!(rig.pmu.elpg_disables(), 1);
        assert_eq!(rig.pmu.elpg_enables(), 1);

        assert_eq!(
            victim.submit_gpfifo(&[GpfifoEntry::new(0x1000, 4)], 0, Default::default()),
            Err(ENODEV)
        );
        bystander
            .submit_gpfifo(&[GpfifoEntry::new(0x1000, 4)], 0, Default::default())
            .unwrap();

        // GR reset pulsed its enable bit
        let mc = rig.io.writes_to(regs::MC_ENABLE);
        assert_eq!(mc.len(), 2);
        assert_eq!(mc[0] & (1 << 12), 0);
        assert_ne!(mc[1] & (1 << 12), 0);
    }

    #[test]
    fn synthetic_recovery_uses_engine_status() {
        let rig = FifoRig::new();
        let (a, _vm1) = rig.open_bound_channel(2);
        let (b, _vm2) = rig.open_bound_channel(2);

        // GR is switching from a to b: the incoming context is the victim
        rig.io.set(
            regs::fifo_engine_status(0),
            1 << 31 | b.chid() << 16 | 5 << 13 | a.chid(),
        );

        rig.fifo.recover(1 << 0).unwrap();
        assert!(rig.fifo.flush_recovery(Duration::from_secs(5)));

        assert!(b.is_timed_out());
        assert!(!a.is_timed_out());
        assert_eq!(rig.fifo.runlist_entries(0).unwrap(), vec![a.chid()]);
        assert_eq!(rig.io.get(regs::fifo_trigger_mmu_fault(0)), 0);
        assert_eq!(
            rig.io.get(regs::FIFO_INTR_EN_0) & regs::FIFO_INTR_0_MMU_FAULT,
            regs::FIFO_INTR_0_MMU_FAULT
        );
    }

    #[test]
    fn recovery_of_idle_mask_is_a_noop() {
        let rig = FifoRig::new();
        rig.fifo.recover(0).unwrap();
        assert!(rig.io.writes_to(regs::fifo_trigger_mmu_fault(0)).is_empty());
        assert_eq!(rig.fifo.recovery_state(), RecoveryState::Running);
    }

    #[test]
    fn waiter_times_out_while_restoring() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let rec = Recovery::new(tx);
        rec.begin_fault();
        rec.schedule_restore();
        assert_eq!(rec.state(), RecoveryState::Restoring);
        assert!(!rec.wait_running(Duration::from_millis(5)));
        rec.finish_restore();
        assert!(rec.wait_running(Duration::from_millis(5)));
    }
}
