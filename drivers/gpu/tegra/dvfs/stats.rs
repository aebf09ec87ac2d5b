// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Rail residency statistics
//!
//! Tracks how long a rail has spent at each voltage, in 25 mV bins starting at the rail minimum.
//! Bin 0 holds time spent powered off; anything above the top bin is folded into it.

use core::time::Duration;
use kernel::time::{clock, Instant, Now};

/// Width of one bin in millivolts.
pub const STATS_BIN_MV: u32 = 25;
/// Index of the highest bin.
pub const STATS_MAX_BIN: usize = 40;

/// Time spent per voltage bin.
#[derive(Clone, Debug)]
pub struct RailStats {
    /// Accumulated residency per bin.
    pub time_at_mv: [Duration; STATS_MAX_BIN + 1],
    last_update: Option<Instant<clock::KernelTime>>,
    last_index: usize,
    min_mv: u32,
}

impl RailStats {
    pub(crate) fn new(min_mv: u32) -> RailStats {
        RailStats {
            time_at_mv: [Duration::ZERO; STATS_MAX_BIN + 1],
            last_update: None,
            last_index: 0,
            min_mv,
        }
    }

    /// Bin a voltage falls into.
    pub fn bin_index(&self, millivolts: u32) -> usize {
        if millivolts == 0 {
            return 0;
        }
        let above = millivolts.saturating_sub(self.min_mv);
        let idx = 1 + ((above + STATS_BIN_MV / 2) / STATS_BIN_MV) as usize;
        idx.min(STATS_MAX_BIN)
    }

    /// Start counting from `millivolts`, discarding nothing accumulated so far.
    pub(crate) fn init(&mut self, millivolts: u32) {
        self.last_index = self.bin_index(millivolts);
        self.last_update = Some(clock::KernelTime::now());
    }

    /// Charge the time since the last change to the previous bin and switch to a new voltage.
    pub(crate) fn update(&mut self, millivolts: u32) {
        let now = clock::KernelTime::now();
        if let Some(last) = self.last_update {
            let spent = now.since(last).unwrap_or(Duration::ZERO);
            self.time_at_mv[self.last_index] += spent;
        }
        self.last_index = self.bin_index(millivolts);
        self.last_update = Some(now);
    }

    /// Bin currently being charged.
    pub fn current_bin(&self) -> usize {
        self.last_index
    }

    /// Residency snapshot including the still-open interval.
    pub fn snapshot(&self) -> [Duration; STATS_MAX_BIN + 1] {
        let mut out = self.time_at_mv;
        if let Some(last) = self.last_update {
            out[self.last_index] += last.elapsed();
        }
        out
    }
}
