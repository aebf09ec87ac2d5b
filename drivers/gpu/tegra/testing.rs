// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Test doubles for the platform capabilities
//!
//! These model just enough hardware behaviour for the driver logic to be exercised: a register
//! file with write-one-to-clear interrupt registers and MMU fault triggers, a bump allocator for
//! GPU memory, host sync points, a PMU and voltage regulators.

use crate::channel::Channel;
use crate::dvfs::regulator::{Regulator, RegulatorProvider};
use crate::fifo::FifoManager;
use crate::hw::gk20a::HWCONFIG;
use crate::mem::MemoryBackend;
use crate::mmu::{AddressSpace, MappedBuffer};
use crate::pmu::{Pmu, PmuMutexId};
use crate::regs;
use crate::syncpt::{SyncptValue, Syncpoints};
use crate::Params;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;
use kernel::{
    error::code::*,
    io_mem::Io,
    prelude::*,
    sync::{Arc, CondVar, Mutex},
    time::{clock, Now},
};
use std::collections::HashMap;

/// Register file model.
#[derive(Default)]
pub(crate) struct FakeIo {
    regs: Mutex<HashMap<usize, u32>>,
    sticky: Mutex<HashMap<usize, u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
}

impl FakeIo {
    pub(crate) fn new() -> Arc<FakeIo> {
        Arc::new(FakeIo::default())
    }

    /// Set a register value directly, bypassing write side effects.
    pub(crate) fn set(&self, off: usize, val: u32) {
        self.regs.lock().insert(off, val);
    }

    /// Current value of a register, as the driver would read it.
    pub(crate) fn get(&self, off: usize) -> u32 {
        self.readl_relaxed(off)
    }

    /// Force bits to read as set, whatever is written.
    pub(crate) fn set_sticky(&self, off: usize, mask: u32) {
        self.sticky.lock().insert(off, mask);
    }

    /// Every value the driver wrote to a register, in order.
    pub(crate) fn writes_to(&self, off: usize) -> Vec<u32> {
        self.writes
            .lock()
            .iter()
            .filter(|(o, _)| *o == off)
            .map(|(_, v)| *v)
            .collect()
    }

    fn userd(chid: u32) -> usize {
        regs::USERD_BASE + chid as usize * HWCONFIG.userd_stride
    }

    /// Simulate the GPU advancing a channel's GET cursor.
    pub(crate) fn set_userd_gp_get(&self, chid: u32, val: u32) {
        self.set(Self::userd(chid) + regs::USERD_GP_GET, val);
    }

    pub(crate) fn userd_gp_put(&self, chid: u32) -> u32 {
        self.get(Self::userd(chid) + regs::USERD_GP_PUT)
    }

    fn is_trigger(off: usize) -> bool {
        (regs::fifo_trigger_mmu_fault(0)..regs::fifo_trigger_mmu_fault(8)).contains(&off)
    }

    fn is_w1c(off: usize) -> bool {
        off == regs::FIFO_INTR_0
            || off == regs::FIFO_INTR_MMU_FAULT_ID
            || off == regs::FIFO_INTR_RUNLIST
            || off == regs::pbdma_intr_0(0)
    }
}

impl Io for FakeIo {
    fn readl_relaxed(&self, off: usize) -> u32 {
        let val = self.regs.lock().get(&off).copied().unwrap_or(0);
        val | self.sticky.lock().get(&off).copied().unwrap_or(0)
    }

    fn writel_relaxed(&self, val: u32, off: usize) {
        self.writes.lock().push((off, val));
        let mut regs = self.regs.lock();

        if Self::is_w1c(off) {
            let cur = regs.entry(off).or_insert(0);
            *cur &= !val;
        } else if Self::is_trigger(off) && val & regs::FIFO_TRIGGER_MMU_FAULT_ENABLE != 0 {
            regs.insert(off, val);
            *regs.entry(regs::FIFO_INTR_0).or_insert(0) |= regs::FIFO_INTR_0_MMU_FAULT;
            *regs.entry(regs::FIFO_INTR_MMU_FAULT_ID).or_insert(0) |= 1 << (val & 0x1f);
        } else {
            regs.insert(off, val);
        }
    }
}

/// GPU memory model: a bump allocator that tracks live mappings.
#[derive(Default)]
pub(crate) struct FakeMem {
    next: AtomicU64,
    live: Mutex<HashMap<u64, usize>>,
    fail_after: Mutex<Option<u32>>,
}

impl FakeMem {
    pub(crate) fn new() -> Arc<FakeMem> {
        Arc::new(FakeMem {
            next: AtomicU64::new(0x1_0000_0000),
            ..Default::default()
        })
    }

    /// Number of mappings currently alive.
    pub(crate) fn live(&self) -> usize {
        self.live.lock().len()
    }

    /// Let `n` more allocations succeed, then fail every following one.
    pub(crate) fn fail_after(&self, n: u32) {
        *self.fail_after.lock() = Some(n);
    }
}

impl MemoryBackend for FakeMem {
    fn pin_map(&self, size: usize) -> Result<u64> {
        if let Some(n) = self.fail_after.lock().as_mut() {
            if *n == 0 {
                return Err(ENOMEM);
            }
            *n -= 1;
        }
        let iova = self.next.fetch_add(size as u64, Ordering::Relaxed);
        self.live.lock().insert(iova, size);
        Ok(iova)
    }

    fn unmap_unpin(&self, iova: u64, size: usize) {
        let old = self.live.lock().remove(&iova);
        assert_eq!(old, Some(size), "bad unmap at {:#x}", iova);
    }
}

/// Address space model.
#[derive(Default)]
pub(crate) struct FakeVm {
    tlb_invalidates: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail_get: AtomicBool,
}

impl FakeVm {
    pub(crate) fn new() -> Arc<FakeVm> {
        Arc::new(FakeVm::default())
    }

    pub(crate) fn tlb_invalidates(&self) -> usize {
        self.tlb_invalidates.load(Ordering::Relaxed)
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub(crate) fn fail_get_buffers(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::Relaxed);
    }
}

impl AddressSpace for FakeVm {
    fn id(&self) -> u64 {
        1
    }

    fn pdb_address(&self) -> u64 {
        0x8000_0000
    }

    fn va_limit(&self) -> u64 {
        1 << 34
    }

    fn tlb_invalidate(&self) {
        self.tlb_invalidates.fetch_add(1, Ordering::Relaxed);
    }

    fn get_buffers(&self) -> Result<Vec<MappedBuffer>> {
        if self.fail_get.load(Ordering::Relaxed) {
            return Err(ENOMEM);
        }
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(vec![MappedBuffer {
            gpu_va: 0x10_0000,
            size: 0x1000,
        }])
    }

    fn put_buffers(&self, buffers: Vec<MappedBuffer>) {
        assert_eq!(buffers.len(), 1);
        self.puts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Host sync point model. Counters only move when a test says so.
pub(crate) struct FakeSyncpoints {
    points: Mutex<HashMap<u32, (u32, u32)>>,
    next: AtomicU32,
    cond: CondVar,
}

impl FakeSyncpoints {
    pub(crate) fn new() -> Arc<FakeSyncpoints> {
        Arc::new(FakeSyncpoints {
            points: Mutex::new(HashMap::new()),
            next: AtomicU32::new(1),
            cond: CondVar::new("FakeSyncpoints::cond"),
        })
    }

    /// Simulate the hardware counter reaching `val`.
    pub(crate) fn set_min(&self, id: u32, val: u32) {
        if let Some(p) = self.points.lock().get_mut(&id) {
            p.0 = val;
        }
        self.cond.notify_all();
    }

    pub(crate) fn is_free(&self, id: u32) -> bool {
        !self.points.lock().contains_key(&id)
    }
}

impl Syncpoints for FakeSyncpoints {
    fn alloc(&self, _name: &str) -> Result<u32> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.points.lock().insert(id, (0, 0));
        Ok(id)
    }

    fn free(&self, id: u32) {
        self.points.lock().remove(&id);
    }

    fn read_min(&self, id: u32) -> u32 {
        self.points.lock().get(&id).map(|p| p.0).unwrap_or(0)
    }

    fn incr_max(&self, id: u32, incrs: u32) -> u32 {
        let mut points = self.points.lock();
        match points.get_mut(&id) {
            Some(p) => {
                p.1 = p.1.wrapping_add(incrs);
                p.1
            }
            None => 0,
        }
    }

    fn wait_timeout(&self, id: u32, thresh: u32, timeout: Duration) -> Result {
        let start = clock::KernelTime::now();
        let mut points = self.points.lock();
        loop {
            let cur = points.get(&id).map(|p| p.0).unwrap_or(0);
            if SyncptValue(cur) >= SyncptValue(thresh) {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ETIMEDOUT);
            }
            self.cond.wait_timeout(&mut points, timeout - elapsed);
        }
    }
}

/// PMU model.
#[derive(Default)]
pub(crate) struct FakePmu {
    held: AtomicBool,
    external: AtomicBool,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    elpg_enables: AtomicUsize,
    elpg_disables: AtomicUsize,
}

impl FakePmu {
    pub(crate) fn new() -> Arc<FakePmu> {
        Arc::new(FakePmu::default())
    }

    /// Pretend another agent owns (or gave up) the FIFO mutex.
    pub(crate) fn hold_externally(&self, held: bool) {
        self.external.store(held, Ordering::Relaxed);
        self.held.store(held, Ordering::Relaxed);
    }

    pub(crate) fn mutex_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    pub(crate) fn acquires(&self) -> usize {
        self.acquires.load(Ordering::Relaxed)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }

    pub(crate) fn elpg_enables(&self) -> usize {
        self.elpg_enables.load(Ordering::Relaxed)
    }

    pub(crate) fn elpg_disables(&self) -> usize {
        self.elpg_disables.load(Ordering::Relaxed)
    }
}

impl Pmu for FakePmu {
    fn mutex_acquire(&self, _id: PmuMutexId) -> Result<u32> {
        if self.held.swap(true, Ordering::AcqRel) {
            return Err(EBUSY);
        }
        self.acquires.fetch_add(1, Ordering::Relaxed);
        Ok(0x42)
    }

    fn mutex_release(&self, _id: PmuMutexId, token: u32) -> Result {
        if token != 0x42 || self.external.load(Ordering::Relaxed) {
            return Err(EINVAL);
        }
        self.held.store(false, Ordering::Release);
        self.releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enable_elpg(&self) -> Result {
        self.elpg_enables.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn disable_elpg(&self) -> Result {
        self.elpg_disables.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A complete FIFO on top of the fakes.
pub(crate) struct FifoRig {
    pub(crate) fifo: FifoManager,
    pub(crate) io: Arc<FakeIo>,
    pub(crate) mem: Arc<FakeMem>,
    pub(crate) syncpts: Arc<FakeSyncpoints>,
    pub(crate) pmu: Arc<FakePmu>,
}

impl FifoRig {
    pub(crate) fn new() -> FifoRig {
        Self::with_wait_timeout(20)
    }

    pub(crate) fn with_wait_timeout(gpfifo_wait_timeout_ms: u64) -> FifoRig {
        let params = Params {
            runlist_timeout_ms: 20,
            preempt_timeout_ms: 20,
            gpfifo_wait_timeout_ms,
            ..Params::default()
        };
        let io = FakeIo::new();
        let mem = FakeMem::new();
        let syncpts = FakeSyncpoints::new();
        let pmu = FakePmu::new();

        let fifo = FifoManager::new(
            &HWCONFIG,
            params,
            io.clone(),
            mem.clone(),
            syncpts.clone(),
            pmu.clone(),
        )
        .unwrap();

        FifoRig {
            fifo,
            io,
            mem,
            syncpts,
            pmu,
        }
    }

    /// Open a channel, bind a fresh address space and allocate its gpfifo.
    pub(crate) fn open_bound_channel(&self, entries: u32) -> (Arc<Channel>, Arc<FakeVm>) {
        let ch = self.fifo.open_channel(1).unwrap();
        let vm = FakeVm::new();
        ch.bind_vm(vm.clone()).unwrap();
        self.fifo.alloc_gpfifo(&ch, entries).unwrap();
        (ch, vm)
    }

    pub(crate) fn set_userd_gp_get(&self, chid: u32, val: u32) {
        self.io.set_userd_gp_get(chid, val);
    }

    pub(crate) fn userd_gp_put(&self, chid: u32) -> u32 {
        self.io.userd_gp_put(chid)
    }
}

/// Shared record of what a [`FakeRegulator`] was asked to do.
#[derive(Default)]
pub(crate) struct RegulatorLog {
    /// Every `set_voltage` call as (min_mv, max_mv).
    pub(crate) calls: Vec<(u32, u32)>,
    pub(crate) enabled: bool,
    pub(crate) millivolts: u32,
    /// Fail the n-th `set_voltage` call (0-based).
    pub(crate) fail_call: Option<usize>,
}

/// Regulator model.
pub(crate) struct FakeRegulator {
    log: Arc<Mutex<RegulatorLog>>,
}

impl Regulator for FakeRegulator {
    fn enable(&mut self) -> Result {
        self.log.lock().enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result {
        self.log.lock().enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.log.lock().enabled
    }

    fn set_voltage(&mut self, min_mv: u32, max_mv: u32) -> Result {
        let mut log = self.log.lock();
        if log.fail_call == Some(log.calls.len()) {
            log.calls.push((min_mv, max_mv));
            return Err(EIO);
        }
        log.calls.push((min_mv, max_mv));
        log.millivolts = min_mv;
        Ok(())
    }

    fn get_voltage(&self) -> Result<u32> {
        Ok(self.log.lock().millivolts)
    }
}

/// Hands out [`FakeRegulator`]s by name, each starting at a preset voltage.
#[derive(Default)]
pub(crate) struct FakeRegulatorProvider {
    logs: Mutex<HashMap<String, Arc<Mutex<RegulatorLog>>>>,
}

impl FakeRegulatorProvider {
    pub(crate) fn new() -> FakeRegulatorProvider {
        FakeRegulatorProvider::default()
    }

    /// Register a regulator that reads back `millivolts` when first connected.
    pub(crate) fn add(&self, reg_id: &str, millivolts: u32) -> Arc<Mutex<RegulatorLog>> {
        let log = Arc::new(Mutex::new(RegulatorLog {
            millivolts,
            ..Default::default()
        }));
        self.logs.lock().insert(reg_id.to_string(), log.clone());
        log
    }
}

impl RegulatorProvider for FakeRegulatorProvider {
    fn connect(&self, reg_id: &str) -> Result<Box<dyn Regulator>> {
        let log = self.logs.lock().get(reg_id).cloned().ok_or(ENODEV)?;
        Ok(Box::new(FakeRegulator { log }))
    }
}
