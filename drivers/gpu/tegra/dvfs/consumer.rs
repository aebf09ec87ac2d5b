// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Clock consumers
//!
//! A consumer maps the rate of one clock to the voltage its rail must provide. Frequencies are
//! ascending; each has a required voltage in the PLL table (one row per thermal bucket) and,
//! optionally, in the DFLL table used while the rail is closed-loop regulated.

use super::rail::RailId;
use crate::debug::*;
use kernel::{error::code::*, prelude::*};

const DEBUG_CLASS: DebugFlags = DebugFlags::Dvfs;

/// Handle to a registered consumer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DvfsId(pub(crate) usize);

/// Static description of a clock consumer.
#[derive(Clone, Debug, Default)]
pub struct DvfsDesc {
    pub clk_name: &'static str,
    /// Name of the rail the clock runs on.
    pub rail: &'static str,
    /// Ascending frequency table in Hz.
    pub freqs: Vec<u64>,
    /// Alternate frequency table, same length as `freqs`.
    pub alt_freqs: Option<Vec<u64>>,
    /// Required voltage per frequency, one row per thermal floor bucket.
    pub millivolts: Vec<Vec<u32>>,
    /// Required voltage per frequency while the rail is in DFLL mode.
    pub dfll_millivolts: Option<Vec<u32>>,
}

pub(crate) struct Dvfs {
    pub(crate) clk_name: &'static str,
    pub(crate) rail: RailId,
    freqs: Vec<u64>,
    alt_freqs: Option<Vec<u64>>,
    pub(crate) use_alt: bool,
    millivolts: Vec<Vec<u32>>,
    dfll_millivolts: Option<Vec<u32>>,
    pub(crate) cur_rate: u64,
    pub(crate) cur_millivolts: u32,
}

impl Dvfs {
    pub(crate) fn new(desc: DvfsDesc, rail: RailId) -> Result<Dvfs> {
        let n = desc.freqs.len();

        if n == 0 || desc.millivolts.is_empty() {
            pr_err!("{}: empty dvfs table\n", desc.clk_name);
            return Err(EINVAL);
        }
        if desc.freqs.windows(2).any(|w| w[0] > w[1]) {
            pr_err!("{}: frequency table is not ascending\n", desc.clk_name);
            return Err(EINVAL);
        }
        let bad_row = desc.millivolts.iter().any(|row| row.len() != n);
        let bad_alt = desc.alt_freqs.as_ref().map_or(false, |f| f.len() != n);
        let bad_dfll = desc.dfll_millivolts.as_ref().map_or(false, |m| m.len() != n);
        if bad_row || bad_alt || bad_dfll {
            pr_err!(
                "{}: dvfs table size mismatch ({} frequencies)\n",
                desc.clk_name,
                n
            );
            return Err(EINVAL);
        }

        Ok(Dvfs {
            clk_name: desc.clk_name,
            rail,
            freqs: desc.freqs,
            alt_freqs: desc.alt_freqs,
            use_alt: false,
            millivolts: desc.millivolts,
            dfll_millivolts: desc.dfll_millivolts,
            cur_rate: 0,
            cur_millivolts: 0,
        })
    }

    pub(crate) fn has_alt_freqs(&self) -> bool {
        self.alt_freqs.is_some()
    }

    pub(crate) fn has_dfll_table(&self) -> bool {
        self.dfll_millivolts.is_some()
    }

    fn freqs(&self) -> &[u64] {
        match &self.alt_freqs {
            Some(alt) if self.use_alt => alt,
            _ => &self.freqs,
        }
    }

    /// Highest rate in the active frequency table.
    pub(crate) fn max_rate(&self) -> u64 {
        self.freqs().last().copied().unwrap_or(0)
    }

    /// Required voltage for `rate`.
    ///
    /// Picks the lowest tabulated frequency at or above `rate`. `therm_idx` selects the row of a
    /// thermally scaled table, clamped to the rows available. A zero rate needs no voltage.
    pub(crate) fn lookup(&self, rate: u64, dfll: bool, therm_idx: usize) -> Result<u32> {
        if rate == 0 {
            return Ok(0);
        }
        let Some(i) = self.freqs().iter().position(|&f| f >= rate) else {
            pr_warn!(
                "{}: rate {} above dvfs table maximum {}\n",
                self.clk_name,
                rate,
                self.max_rate()
            );
            return Err(EINVAL);
        };

        let mv = match (&self.dfll_millivolts, dfll) {
            (Some(table), true) => table[i],
            _ => {
                let row = therm_idx.min(self.millivolts.len() - 1);
                self.millivolts[row][i]
            }
        };

        mod_pr_debug!(
            "{}: rate {} -> index {} -> {} mV{}\n",
            self.clk_name,
            rate,
            i,
            mv,
            if dfll { " (dfll)" } else { "" }
        );
        Ok(mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> DvfsDesc {
        DvfsDesc {
            clk_name: "gbus",
            rail: "core",
            freqs: vec![100, 200, 300],
            alt_freqs: Some(vec![150, 250, 350]),
            millivolts: vec![vec![850, 900, 950], vec![900, 950, 1000]],
            dfll_millivolts: Some(vec![800, 820, 840]),
        }
    }

    #[test]
    fn lookup_rounds_up() {
        let mut d = Dvfs::new(desc(), RailId(0)).unwrap();
        assert_eq!(d.lookup(0, false, 0), Ok(0));
        assert_eq!(d.lookup(1, false, 0), Ok(850));
        assert_eq!(d.lookup(200, false, 0), Ok(900));
        assert_eq!(d.lookup(201, false, 0), Ok(950));
        assert_eq!(d.lookup(301, false, 0), Err(EINVAL));

        // Thermal row, clamped to what is there
        assert_eq!(d.lookup(100, false, 1), Ok(900));
        assert_eq!(d.lookup(100, false, 7), Ok(900));

        assert_eq!(d.lookup(250, true, 0), Ok(840));

        d.use_alt = true;
        assert_eq!(d.max_rate(), 350);
        assert_eq!(d.lookup(301, false, 0), Ok(950));
    }

    #[test]
    fn rejects_bad_tables() {
        let mut bad = desc();
        bad.millivolts[1].pop();
        assert_eq!(Dvfs::new(bad, RailId(0)).err(), Some(EINVAL));

        let mut bad = desc();
        bad.freqs = vec![300, 200, 100];
        assert_eq!(Dvfs::new(bad, RailId(0)).err(), Some(EINVAL));

        let mut bad = desc();
        bad.dfll_millivolts = Some(vec![800]);
        assert_eq!(Dvfs::new(bad, RailId(0)).err(), Some(EINVAL));

        assert_eq!(
            Dvfs::new(DvfsDesc::default(), RailId(0)).err(),
            Some(EINVAL)
        );
    }
}
