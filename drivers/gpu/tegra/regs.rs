// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! GPU MMIO register abstraction
//!
//! Everything the FIFO engine does to the hardware goes through this module: runlist submission,
//! channel instance binding, preemption, MMU fault status and engine resets. The per-channel USERD
//! pages (where the GET/PUT cursors of each gpfifo live) are reached through the BAR1 aperture of
//! the same register window.

use crate::util::{hi32, lo32};
use kernel::io_mem::Io;
use kernel::sync::Arc;

pub(crate) const MC_ENABLE: usize = 0x200;

pub(crate) const FIFO_INTR_0: usize = 0x2100;
pub(crate) const FIFO_INTR_EN_0: usize = 0x2140;
pub(crate) const FIFO_INTR_0_BIND_ERROR: u32 = 1 << 0;
pub(crate) const FIFO_INTR_0_PIO_ERROR: u32 = 1 << 4;
pub(crate) const FIFO_INTR_0_SCHED_ERROR: u32 = 1 << 8;
pub(crate) const FIFO_INTR_0_CHSW_ERROR: u32 = 1 << 16;
pub(crate) const FIFO_INTR_0_MMU_FAULT: u32 = 1 << 28;
pub(crate) const FIFO_INTR_0_PBDMA_INTR: u32 = 1 << 29;
pub(crate) const FIFO_INTR_0_RUNLIST_EVENT: u32 = 1 << 30;

pub(crate) const FIFO_INTR_SCHED_ERROR: usize = 0x254c;
pub(crate) const FIFO_INTR_MMU_FAULT_ID: usize = 0x259c;
pub(crate) const FIFO_INTR_PBDMA_ID: usize = 0x25a0;
pub(crate) const FIFO_INTR_RUNLIST: usize = 0x2a00;

pub(crate) const fn fifo_intr_mmu_fault_inst(i: u32) -> usize {
    0x2800 + i as usize * 16
}
pub(crate) const fn fifo_intr_mmu_fault_lo(i: u32) -> usize {
    0x2804 + i as usize * 16
}
pub(crate) const fn fifo_intr_mmu_fault_hi(i: u32) -> usize {
    0x2808 + i as usize * 16
}
pub(crate) const fn fifo_intr_mmu_fault_info(i: u32) -> usize {
    0x280c + i as usize * 16
}

pub(crate) const FIFO_RUNLIST_BASE: usize = 0x2270;
pub(crate) const FIFO_RUNLIST: usize = 0x2274;
pub(crate) const fn fifo_eng_runlist(i: u32) -> usize {
    0x2284 + i as usize * 8
}
pub(crate) const FIFO_ENG_RUNLIST_PENDING: u32 = 1 << 20;

pub(crate) const FIFO_PREEMPT: usize = 0x2634;
pub(crate) const FIFO_PREEMPT_PENDING: u32 = 1 << 20;
pub(crate) const FIFO_PREEMPT_TYPE_CHANNEL: u32 = 0 << 24;

pub(crate) const fn fifo_trigger_mmu_fault(i: u32) -> usize {
    0x2a30 + i as usize * 4
}
pub(crate) const FIFO_TRIGGER_MMU_FAULT_ENABLE: u32 = 1 << 8;

pub(crate) const fn fifo_engine_status(i: u32) -> usize {
    0x2640 + i as usize * 8
}

pub(crate) const fn pbdma_intr_0(i: u32) -> usize {
    0x40108 + i as usize * 0x2000
}

pub(crate) const fn ccsr_channel_inst(chid: u32) -> usize {
    0x800000 + chid as usize * 8
}
pub(crate) const fn ccsr_channel(chid: u32) -> usize {
    0x800004 + chid as usize * 8
}
pub(crate) const CCSR_CHANNEL_INST_BIND: u32 = 1 << 31;
pub(crate) const CCSR_CHANNEL_ENABLE_SET: u32 = 1 << 10;
pub(crate) const CCSR_CHANNEL_ENABLE_CLR: u32 = 1 << 11;

/// Start of the USERD pages inside the BAR1 aperture.
pub(crate) const USERD_BASE: usize = 0x1000000;
pub(crate) const USERD_GP_GET: usize = 0x22 * 4;
pub(crate) const USERD_GP_PUT: usize = 0x23 * 4;

/// Memory target for instance and runlist pointers: video memory.
pub(crate) const TARGET_VID_MEM: u32 = 0;

/// Reason for an MMU fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultType {
    Pde,
    PdeSize,
    Pte,
    VaLimitViolation,
    UnboundInstBlock,
    PrivViolation,
    ReadOnlyViolation,
    WriteOnlyViolation,
    PitchMaskViolation,
    WorkCreation,
    UnsupportedAperture,
    CompressionFailure,
    UnsupportedKind,
    RegionViolation,
    Poison,
    Unknown(u8),
}

impl From<u8> for FaultType {
    fn from(v: u8) -> Self {
        match v {
            0 => FaultType::Pde,
            1 => FaultType::PdeSize,
            2 => FaultType::Pte,
            3 => FaultType::VaLimitViolation,
            4 => FaultType::UnboundInstBlock,
            5 => FaultType::PrivViolation,
            6 => FaultType::ReadOnlyViolation,
            7 => FaultType::WriteOnlyViolation,
            8 => FaultType::PitchMaskViolation,
            9 => FaultType::WorkCreation,
            10 => FaultType::UnsupportedAperture,
            11 => FaultType::CompressionFailure,
            12 => FaultType::UnsupportedKind,
            13 => FaultType::RegionViolation,
            14 => FaultType::Poison,
            a => FaultType::Unknown(a),
        }
    }
}

/// Collection of information about an MMU fault, used for diagnostics only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultInfo {
    pub fault_id: u32,
    pub address: u64,
    /// Faulting instance block address, already shifted back to a byte address.
    pub inst_ptr: u64,
    pub reason: FaultType,
    pub client: u8,
    pub gpc: bool,
    pub write: bool,
}

/// Context switch status of an engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CtxStatus {
    Invalid,
    Valid,
    CtxswLoad,
    CtxswSave,
    CtxswSwitch,
    Unknown(u8),
}

/// Decoded engine status register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineStatus {
    pub id: u32,
    pub next_id: u32,
    pub ctx_status: CtxStatus,
    pub faulted: bool,
    pub busy: bool,
}

impl EngineStatus {
    pub(crate) fn decode(v: u32) -> EngineStatus {
        EngineStatus {
            id: v & 0xfff,
            next_id: (v >> 16) & 0xfff,
            ctx_status: match (v >> 13) & 0x7 {
                0 => CtxStatus::Invalid,
                1 => CtxStatus::Valid,
                5 => CtxStatus::CtxswLoad,
                6 => CtxStatus::CtxswSave,
                7 => CtxStatus::CtxswSwitch,
                a => CtxStatus::Unknown(a as u8),
            },
            faulted: v & (1 << 30) != 0,
            busy: v & (1 << 31) != 0,
        }
    }

    /// Returns the channel id the engine is (or is about to be) working on, if any.
    ///
    /// While a context load is in flight the incoming context is the relevant one.
    pub fn active_chid(&self) -> Option<u32> {
        match self.ctx_status {
            CtxStatus::Valid | CtxStatus::CtxswSave | CtxStatus::CtxswSwitch => Some(self.id),
            CtxStatus::CtxswLoad => Some(self.next_id),
            _ => None,
        }
    }

    /// Returns `true` if the engine is busy and bound to the given channel.
    pub fn is_busy_on(&self, chid: u32) -> bool {
        if !self.busy {
            return false;
        }
        match self.ctx_status {
            CtxStatus::Valid | CtxStatus::CtxswSave => self.id == chid,
            CtxStatus::CtxswLoad => self.next_id == chid,
            CtxStatus::CtxswSwitch => self.id == chid || self.next_id == chid,
            _ => false,
        }
    }
}

/// Device resources for this GPU instance.
pub struct Resources {
    name: &'static str,
    io: Arc<dyn Io>,
}

impl Resources {
    /// Wrap a register window.
    pub fn new(name: &'static str, io: Arc<dyn Io>) -> Resources {
        Resources { name, io }
    }

    /// Device name, used as log prefix.
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn read32(&self, off: usize) -> u32 {
        self.io.readl(off)
    }

    pub(crate) fn write32(&self, off: usize, val: u32) {
        self.io.writel(val, off)
    }

    /// Read the pending FIFO interrupts.
    pub(crate) fn fifo_intr(&self) -> u32 {
        self.read32(FIFO_INTR_0)
    }

    /// Acknowledge FIFO interrupts (write-one-to-clear).
    pub(crate) fn fifo_intr_clear(&self, mask: u32) {
        self.write32(FIFO_INTR_0, mask)
    }

    pub(crate) fn fifo_intr_enable(&self) -> u32 {
        self.read32(FIFO_INTR_EN_0)
    }

    pub(crate) fn set_fifo_intr_enable(&self, val: u32) {
        self.write32(FIFO_INTR_EN_0, val)
    }

    pub(crate) fn sched_error(&self) -> u32 {
        self.read32(FIFO_INTR_SCHED_ERROR)
    }

    pub(crate) fn mmu_fault_id(&self) -> u32 {
        self.read32(FIFO_INTR_MMU_FAULT_ID)
    }

    pub(crate) fn clear_mmu_fault_id(&self, ids: u32) {
        self.write32(FIFO_INTR_MMU_FAULT_ID, ids)
    }

    pub(crate) fn pbdma_intr_ids(&self) -> u32 {
        self.read32(FIFO_INTR_PBDMA_ID)
    }

    /// Read and acknowledge a PBDMA unit's interrupt status.
    pub(crate) fn pbdma_intr_take(&self, pbdma_id: u32) -> u32 {
        let val = self.read32(pbdma_intr_0(pbdma_id));
        self.write32(pbdma_intr_0(pbdma_id), val);
        val
    }

    /// Read and acknowledge pending runlist events.
    pub(crate) fn runlist_intr_take(&self) -> u32 {
        let val = self.read32(FIFO_INTR_RUNLIST);
        self.write32(FIFO_INTR_RUNLIST, val);
        val
    }

    /// Fetch the MMU fault information for a given fault id from the hardware registers.
    pub(crate) fn fault_info(&self, fault_id: u32) -> FaultInfo {
        let inst = self.read32(fifo_intr_mmu_fault_inst(fault_id));
        let lo = self.read32(fifo_intr_mmu_fault_lo(fault_id));
        let hi = self.read32(fifo_intr_mmu_fault_hi(fault_id));
        let info = self.read32(fifo_intr_mmu_fault_info(fault_id));

        FaultInfo {
            fault_id,
            address: (hi as u64) << 32 | lo as u64,
            inst_ptr: ((inst & 0x0fff_ffff) as u64) << 12,
            reason: ((info & 0xf) as u8).into(),
            client: ((info >> 8) & 0x1f) as u8,
            gpc: info & (1 << 6) != 0,
            write: info & (1 << 7) != 0,
        }
    }

    /// Point the hardware at a new runlist buffer. This single pair of writes is what switches the
    /// live schedule.
    pub(crate) fn submit_runlist(&self, engine_id: u32, iova: u64, count: u32) {
        self.write32(
            FIFO_RUNLIST_BASE,
            lo32(iova >> 12) & 0x0fff_ffff | TARGET_VID_MEM << 28,
        );
        self.write32(FIFO_RUNLIST, engine_id << 20 | (count & 0xffff));
    }

    pub(crate) fn runlist_pending(&self, runlist_id: u32) -> bool {
        self.read32(fifo_eng_runlist(runlist_id)) & FIFO_ENG_RUNLIST_PENDING != 0
    }

    pub(crate) fn preempt_channel(&self, chid: u32) {
        self.write32(FIFO_PREEMPT, chid | FIFO_PREEMPT_TYPE_CHANNEL);
    }

    pub(crate) fn preempt_pending(&self) -> bool {
        self.read32(FIFO_PREEMPT) & FIFO_PREEMPT_PENDING != 0
    }

    pub(crate) fn trigger_mmu_fault(&self, engine_id: u32, fault_id: u32) {
        self.write32(
            fifo_trigger_mmu_fault(engine_id),
            fault_id | FIFO_TRIGGER_MMU_FAULT_ENABLE,
        );
    }

    pub(crate) fn clear_mmu_fault_trigger(&self, engine_id: u32) {
        self.write32(fifo_trigger_mmu_fault(engine_id), 0);
    }

    pub(crate) fn engine_status(&self, engine_id: u32) -> EngineStatus {
        EngineStatus::decode(self.read32(fifo_engine_status(engine_id)))
    }

    /// Pulse an engine's bit in the master-control enable register.
    pub(crate) fn reset_engine(&self, reset_mask: u32) {
        let val = self.read32(MC_ENABLE);
        self.write32(MC_ENABLE, val & !reset_mask);
        self.write32(MC_ENABLE, val | reset_mask);
    }

    /// Bind a channel id to its instance block.
    pub(crate) fn bind_channel(&self, chid: u32, inst_iova: u64) {
        self.write32(
            ccsr_channel_inst(chid),
            lo32(inst_iova >> 12) & 0x0fff_ffff | TARGET_VID_MEM << 28 | CCSR_CHANNEL_INST_BIND,
        );
        self.enable_channel(chid);
    }

    pub(crate) fn unbind_channel(&self, chid: u32) {
        self.write32(ccsr_channel_inst(chid), 0);
    }

    pub(crate) fn enable_channel(&self, chid: u32) {
        let val = self.read32(ccsr_channel(chid));
        self.write32(ccsr_channel(chid), val | CCSR_CHANNEL_ENABLE_SET);
    }

    pub(crate) fn disable_channel(&self, chid: u32) {
        let val = self.read32(ccsr_channel(chid));
        self.write32(ccsr_channel(chid), val | CCSR_CHANNEL_ENABLE_CLR);
    }

    fn userd(&self, chid: u32, stride: usize) -> usize {
        USERD_BASE + chid as usize * stride
    }

    pub(crate) fn userd_gp_get(&self, chid: u32, stride: usize) -> u32 {
        self.read32(self.userd(chid, stride) + USERD_GP_GET)
    }

    pub(crate) fn userd_gp_put(&self, chid: u32, stride: usize) -> u32 {
        self.read32(self.userd(chid, stride) + USERD_GP_PUT)
    }

    /// Publish a new gpfifo PUT cursor. From this point on the GPU may fetch the new entries.
    pub(crate) fn set_userd_gp_put(&self, chid: u32, stride: usize, put: u32) {
        self.write32(self.userd(chid, stride) + USERD_GP_PUT, put)
    }

    /// Reset both cursors of a freshly set up channel.
    pub(crate) fn init_userd(&self, chid: u32, stride: usize) {
        self.write32(self.userd(chid, stride) + USERD_GP_GET, 0);
        self.write32(self.userd(chid, stride) + USERD_GP_PUT, 0);
    }

    /// GPU address of a channel's USERD page, as seen through BAR1.
    pub(crate) fn userd_gpu_addr(&self, chid: u32, stride: usize) -> (u32, u32) {
        let addr = self.userd(chid, stride) as u64;
        (lo32(addr), hi32(addr))
    }
}
