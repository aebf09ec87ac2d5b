// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Per-chip hardware configuration structures
//!
//! This module contains the definitions used to store per-GPU configuration data: the size of the
//! channel id space, the engine table, memory layout strides and the handshake timeouts used when
//! talking to the FIFO hardware.

use core::time::Duration;
use kernel::iopoll::Backoff;

pub mod gk20a;

/// Engine type enumeration.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum EngineType {
    /// Graphics and compute.
    Gr,
    /// Copy engine.
    Ce,
}

/// Static description of one hardware engine served by the FIFO.
#[derive(Debug)]
pub struct EngineInfo {
    /// Engine type.
    pub ty: EngineType,
    /// Index into the engine status register array.
    pub engine_id: u32,
    /// Runlist this engine executes.
    pub runlist_id: u32,
    /// PBDMA unit feeding this engine.
    pub pbdma_id: u32,
    /// MMU fault id reported for this engine.
    pub mmu_fault_id: u32,
    /// Bit in the master-control enable register used to reset the engine.
    pub reset_mask: u32,
}

/// GPU configuration for a given chip.
#[derive(Debug)]
pub struct HwConfig {
    /// Chip ID.
    pub chip_id: u32,
    /// Human-readable chip name, used as the device prefix in logs.
    pub name: &'static str,

    /// Size of the hardware channel id space.
    pub num_channels: u32,
    /// Number of runlists.
    pub num_runlists: u32,
    /// Number of PBDMA units.
    pub num_pbdma: u32,
    /// Engines served by the FIFO.
    pub engines: &'static [EngineInfo],

    /// Size of a channel instance block in bytes.
    pub inst_block_size: usize,
    /// Stride of the per-channel USERD area in bytes.
    pub userd_stride: usize,
    /// Size of one runlist entry in bytes.
    pub runlist_entry_size: usize,
    /// Size of one gpfifo entry in bytes.
    pub gpfifo_entry_size: usize,

    /// Timeout for a runlist update to be acknowledged.
    pub runlist_timeout: Duration,
    /// Timeout for a channel preemption to complete.
    pub preempt_timeout: Duration,
    /// Timeout for a triggered MMU fault to be raised.
    pub mmu_fault_trigger_timeout: Duration,
    /// Default timeout when waiting for gpfifo space.
    pub gpfifo_wait_timeout: Duration,
    /// Default timeout when waiting for a channel to go idle.
    pub channel_finish_timeout: Duration,
    /// Backoff used by all hardware handshake polls.
    pub poll_backoff: Backoff,
}

impl HwConfig {
    /// Look up an engine by its MMU fault id.
    pub fn engine_by_fault_id(&self, fault_id: u32) -> Option<&EngineInfo> {
        self.engines.iter().find(|e| e.mmu_fault_id == fault_id)
    }

    /// Look up an engine by its engine id.
    pub fn engine_by_id(&self, engine_id: u32) -> Option<&EngineInfo> {
        self.engines.iter().find(|e| e.engine_id == engine_id)
    }

    /// Returns the engine id of the first engine of a given type.
    pub fn engine_id_of(&self, ty: EngineType) -> Option<u32> {
        self.engines.iter().find(|e| e.ty == ty).map(|e| e.engine_id)
    }
}
