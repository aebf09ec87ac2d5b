// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Hardware configuration for GK20A (Tegra K1).

use super::*;

const ENGINES: &[EngineInfo] = &[
    EngineInfo {
        ty: EngineType::Gr,
        engine_id: 0,
        runlist_id: 0,
        pbdma_id: 0,
        mmu_fault_id: 0,
        reset_mask: 1 << 12,
    },
    EngineInfo {
        ty: EngineType::Ce,
        engine_id: 1,
        runlist_id: 0,
        pbdma_id: 0,
        mmu_fault_id: 0x1b,
        reset_mask: 1 << 7,
    },
];

pub const HWCONFIG: super::HwConfig = HwConfig {
    chip_id: 0xea,
    name: "gk20a",

    num_channels: 128,
    num_runlists: 1,
    num_pbdma: 1,
    engines: ENGINES,

    inst_block_size: 4096,
    userd_stride: 512,
    runlist_entry_size: 8,
    gpfifo_entry_size: 8,

    runlist_timeout: Duration::from_millis(500),
    preempt_timeout: Duration::from_millis(500),
    mmu_fault_trigger_timeout: Duration::from_millis(100),
    gpfifo_wait_timeout: Duration::from_millis(2000),
    channel_finish_timeout: Duration::from_millis(3000),
    poll_backoff: Backoff {
        min: Duration::from_micros(10),
        max: Duration::from_micros(1000),
    },
};
