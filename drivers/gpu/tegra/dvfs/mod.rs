// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Dynamic voltage and frequency scaling
//!
//! This module is the entry point for clock drivers, the thermal governor and debug tooling. All
//! rail state lives in a [`RailRegistry`] behind a single lock, so rate changes and rail updates
//! are serialized system-wide. Enabling and disabling rails is additionally serialized by a second
//! lock, taken before the registry lock.

pub mod consumer;
pub mod rail;
pub mod regulator;
pub mod relationship;
pub mod stats;

use crate::debug::*;
use kernel::{error::code::*, prelude::*, sync::Mutex};

pub use consumer::{DvfsDesc, DvfsId};
pub use rail::{RailDesc, RailId, RailLevels, RailRegistry};
pub use regulator::{Regulator, RegulatorProvider};
pub use relationship::{RelationshipDesc, SolveFn};
pub use stats::RailStats;

const DEBUG_CLASS: DebugFlags = DebugFlags::Dvfs;

/// Top-level DVFS object.
pub struct DvfsManager {
    registry: Mutex<RailRegistry>,
    rail_disable_lock: Mutex<()>,
}

impl Default for DvfsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DvfsManager {
    pub fn new() -> DvfsManager {
        DvfsManager {
            registry: Mutex::new(RailRegistry::new()),
            rail_disable_lock: Mutex::new(()),
        }
    }

    /// Register a rail. Names must be unique.
    pub fn register_rail(&self, desc: RailDesc) -> Result<RailId> {
        self.registry.lock().register_rail(desc)
    }

    /// Add a relationship between two registered rails.
    pub fn add_relationship(&self, desc: RelationshipDesc) -> Result {
        self.registry.lock().add_relationship(desc)
    }

    /// Attach a clock to its rail.
    pub fn enable_dvfs_on_clk(&self, desc: DvfsDesc) -> Result<DvfsId> {
        let clk_name = desc.clk_name;
        let id = self.registry.lock().add_dvfs(desc)?;
        mod_pr_debug!("dvfs enabled on {}\n", clk_name);
        Ok(id)
    }

    /// Late init: connect every rail to its regulator and apply pending requests.
    pub fn connect_regulators(&self, provider: &dyn RegulatorProvider) {
        let _guard = self.rail_disable_lock.lock();
        self.registry.lock().connect(provider);
    }

    /// Drop every regulator handle. Rails stay at their last voltage.
    pub fn disconnect_regulators(&self) {
        self.registry.lock().disconnect();
    }

    /// Change a clock's rate, adjusting its rail as needed.
    pub fn set_rate(&self, dvfs: DvfsId, rate: u64) -> Result {
        self.registry.lock().set_rate(dvfs, rate)
    }

    /// Voltage the clock would need at `rate` in the rail's current mode.
    pub fn predict_millivolts(&self, dvfs: DvfsId, rate: u64) -> Result<u32> {
        let reg = self.registry.lock();
        let dfll = reg.rail(reg.consumer(dvfs)?.rail)?.dfll_mode;
        reg.predict(dvfs, rate, dfll && reg.consumer(dvfs)?.has_dfll_table())
    }

    /// Voltage the clock would need at `rate` from the PLL table.
    pub fn predict_millivolts_pll(&self, dvfs: DvfsId, rate: u64) -> Result<u32> {
        self.registry.lock().predict(dvfs, rate, false)
    }

    /// Voltage the clock would need at `rate` from the DFLL table.
    pub fn predict_millivolts_dfll(&self, dvfs: DvfsId, rate: u64) -> Result<u32> {
        self.registry.lock().predict(dvfs, rate, true)
    }

    /// Hand the clock's rail over to closed-loop regulation.
    pub fn dfll_mode_set(&self, dvfs: DvfsId, rate: u64) -> Result {
        let mut reg = self.registry.lock();
        let rail = reg.consumer(dvfs)?.rail;
        if reg.rail(rail)?.dfll_mode {
            return Ok(());
        }
        reg.rails[rail.0].dfll_mode = true;
        mod_pr_debug!("{}: entering dfll mode\n", reg.rails[rail.0].name);
        reg.set_rate(dvfs, rate)
    }

    /// Return the clock's rail to software-stepped regulation.
    pub fn dfll_mode_clear(&self, dvfs: DvfsId, rate: u64) -> Result {
        let mut reg = self.registry.lock();
        let id = reg.consumer(dvfs)?.rail;
        if !reg.rail(id)?.dfll_mode {
            return Ok(());
        }

        let rail = &mut reg.rails[id.0];
        rail.dfll_mode = false;
        mod_pr_debug!("{}: leaving dfll mode\n", rail.name);
        // The recorded level was an estimate; never let it match a target by accident
        rail.millivolts = rail.millivolts.saturating_sub(1);

        if rail.disabled {
            rail.disabled = false;
            if let Err(e) = reg.disable(id) {
                pr_err!("dvfs: failed to re-disable {}: {:?}\n", reg.rails[id.0].name, e);
            }
        }
        reg.set_rate(dvfs, rate)
    }

    /// Switch a clock between its primary and alternate frequency tables.
    pub fn use_alt_freqs(&self, dvfs: DvfsId, use_alt: bool) -> Result {
        let mut reg = self.registry.lock();
        let d = reg.consumer(dvfs)?;
        if !d.has_alt_freqs() || d.use_alt == use_alt {
            return Ok(());
        }
        let rate = d.cur_rate;

        reg.dvfs[dvfs.0].use_alt = use_alt;
        if reg.set_rate(dvfs, rate).is_err() {
            reg.dvfs[dvfs.0].use_alt = !use_alt;
            pr_err!(
                "dvfs: failed to {} alternate frequencies on {}\n",
                if use_alt { "enable" } else { "disable" },
                reg.dvfs[dvfs.0].clk_name
            );
            return Err(EINVAL);
        }
        Ok(())
    }

    /// Park a rail at its disable level.
    pub fn rail_disable(&self, rail: RailId) -> Result {
        let _guard = self.rail_disable_lock.lock();
        let mut reg = self.registry.lock();
        if reg.rail(rail)?.disabled {
            return Ok(());
        }
        reg.disable(rail)
    }

    /// Undo [`DvfsManager::rail_disable`].
    pub fn rail_enable(&self, rail: RailId) -> Result {
        let _guard = self.rail_disable_lock.lock();
        let mut reg = self.registry.lock();
        if !reg.rail(rail)?.disabled {
            return Ok(());
        }
        reg.enable(rail)
    }

    /// Park all rails for system suspend. On failure everything is resumed again.
    pub fn suspend(&self) -> Result {
        self.registry.lock().suspend()
    }

    pub fn resume(&self) {
        self.registry.lock().resume()
    }

    /// Pin a rail at a fixed voltage, or release it with 0.
    pub fn set_override_millivolts(&self, rail: RailId, millivolts: u32) -> Result {
        let mut reg = self.registry.lock();
        let r = reg.rail(rail)?;
        if millivolts != 0 && (millivolts < r.min || millivolts > r.max) {
            return Err(EINVAL);
        }
        reg.rails[rail.0].override_millivolts = millivolts;
        reg.update(rail)
    }

    /// Offset every computed target of a rail by `offset` millivolts.
    pub fn set_debug_offset(&self, rail: RailId, offset: i32) -> Result {
        let mut reg = self.registry.lock();
        reg.rail(rail)?;
        reg.rails[rail.0].dbg_mv_offset = offset;
        reg.update(rail)
    }

    /// Thermal governor: select the voltage floor bucket for the current temperature.
    pub fn set_floor_bucket(&self, rail: RailId, idx: usize) -> Result {
        let mut reg = self.registry.lock();
        if idx >= reg.rail(rail)?.floor_buckets() {
            return Err(EINVAL);
        }
        cls_pr_debug!(Thermal, "{}: floor bucket {}\n", reg.rails[rail.0].name, idx);
        reg.rails[rail.0].floor_idx = idx;
        reg.refresh_consumers(rail);
        reg.update(rail)
    }

    /// Thermal governor: select the voltage cap level, 0 for uncapped.
    pub fn set_cap_bucket(&self, rail: RailId, idx: usize) -> Result {
        let mut reg = self.registry.lock();
        if idx > reg.rail(rail)?.cap_levels() {
            return Err(EINVAL);
        }
        cls_pr_debug!(Thermal, "{}: cap level {}\n", reg.rails[rail.0].name, idx);
        reg.set_cap(rail, idx)
    }

    pub fn rail_by_name(&self, name: &str) -> Option<RailId> {
        self.registry.lock().rail_by_name(name)
    }

    /// Current and pending voltage along with the configured range.
    pub fn rail_levels(&self, rail: RailId) -> Result<RailLevels> {
        self.registry.lock().levels(rail)
    }

    pub fn rail_millivolts(&self, rail: RailId) -> Result<u32> {
        Ok(self.registry.lock().rail(rail)?.millivolts)
    }

    pub fn rail_is_dfll(&self, rail: RailId) -> Result<bool> {
        Ok(self.registry.lock().rail(rail)?.dfll_mode)
    }

    pub fn rail_is_disabled(&self, rail: RailId) -> Result<bool> {
        Ok(self.registry.lock().rail(rail)?.disabled)
    }

    pub fn rail_is_suspended(&self, rail: RailId) -> Result<bool> {
        Ok(self.registry.lock().rail(rail)?.suspended)
    }

    pub fn rail_is_connected(&self, rail: RailId) -> Result<bool> {
        Ok(self.registry.lock().rail(rail)?.is_connected())
    }

    pub fn rail_stats(&self, rail: RailId) -> Result<RailStats> {
        Ok(self.registry.lock().rail(rail)?.stats.clone())
    }

    pub fn dvfs_rate(&self, dvfs: DvfsId) -> Result<u64> {
        Ok(self.registry.lock().consumer(dvfs)?.cur_rate)
    }

    pub fn dvfs_millivolts(&self, dvfs: DvfsId) -> Result<u32> {
        Ok(self.registry.lock().consumer(dvfs)?.cur_millivolts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRegulatorProvider, RegulatorLog};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use kernel::sync::Arc;

    fn core_rail() -> RailDesc {
        RailDesc {
            name: "core",
            reg_id: "vdd_core",
            min_millivolts: 800,
            max_millivolts: 1200,
            nominal_millivolts: 1100,
            step: 50,
            ..Default::default()
        }
    }

    fn cpu_rail() -> RailDesc {
        RailDesc {
            name: "cpu",
            reg_id: "vdd_cpu",
            min_millivolts: 800,
            max_millivolts: 1300,
            nominal_millivolts: 1000,
            step: 50,
            ..Default::default()
        }
    }

    fn clk(name: &'static str, rail: &'static str, mv: [u32; 3]) -> DvfsDesc {
        DvfsDesc {
            clk_name: name,
            rail,
            freqs: vec![100, 200, 300],
            millivolts: vec![mv.to_vec()],
            ..Default::default()
        }
    }

    fn voltages(log: &Arc<Mutex<RegulatorLog>>) -> Vec<u32> {
        log.lock().calls.iter().map(|c| c.0).collect()
    }

    struct Single {
        dvfs: DvfsManager,
        core: RailId,
        gbus: DvfsId,
        log: Arc<Mutex<RegulatorLog>>,
    }

    fn single(desc: RailDesc, start_mv: u32) -> Single {
        let dvfs = DvfsManager::new();
        let core = dvfs.register_rail(desc).unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(clk("gbus", "core", [900, 1000, 1150]))
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        let log = provider.add("vdd_core", start_mv);
        dvfs.connect_regulators(&provider);
        Single {
            dvfs,
            core,
            gbus,
            log,
        }
    }

    #[test]
    fn steps_up_in_bounded_increments() {
        let s = single(core_rail(), 800);

        s.dvfs.set_rate(s.gbus, 200).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1000));

        let calls = s.log.lock().calls.clone();
        assert_eq!(
            calls,
            vec![(850, 1201), (900, 1200), (950, 1201), (1000, 1200)]
        );
        assert!(calls.iter().all(|c| c.0 <= 1200));
        assert_eq!(s.dvfs.dvfs_rate(s.gbus), Ok(200));
        assert_eq!(s.dvfs.dvfs_millivolts(s.gbus), Ok(1000));
    }

    #[test]
    fn converges_to_highest_request() {
        let dvfs = DvfsManager::new();
        let core = dvfs
            .register_rail(RailDesc {
                step_up: 100,
                ..core_rail()
            })
            .unwrap();
        let a = dvfs
            .enable_dvfs_on_clk(clk("a", "core", [900, 1000, 1150]))
            .unwrap();
        let b = dvfs
            .enable_dvfs_on_clk(clk("b", "core", [850, 950, 1050]))
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        let log = provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(a, 300).unwrap();
        dvfs.set_rate(b, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));
        // Up in 100 mV steps
        assert_eq!(voltages(&log), vec![900, 1000, 1100, 1150]);

        log.lock().calls.clear();
        dvfs.set_rate(a, 0).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(850));
        // Down in 50 mV steps
        assert_eq!(voltages(&log), vec![1100, 1050, 1000, 950, 900, 850]);

        dvfs.set_rate(b, 0).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(850));
    }

    #[test]
    fn rate_above_table_is_rejected() {
        let s = single(core_rail(), 800);
        assert_eq!(s.dvfs.set_rate(s.gbus, 301), Err(EINVAL));
        assert_eq!(s.dvfs.dvfs_rate(s.gbus), Ok(0));
        assert!(s.log.lock().calls.is_empty());
    }

    #[test]
    fn requests_before_connect_are_deferred() {
        let dvfs = DvfsManager::new();
        let core = dvfs
            .register_rail(RailDesc {
                boot_millivolts: 1000,
                ..core_rail()
            })
            .unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(clk("gbus", "core", [900, 1000, 1150]))
            .unwrap();

        assert_eq!(dvfs.set_rate(gbus, 300), Err(EINVAL));
        dvfs.set_rate(gbus, 200).unwrap();
        assert_eq!(dvfs.rail_is_connected(core), Ok(false));

        let provider = FakeRegulatorProvider::new();
        let log = provider.add("vdd_core", 900);
        dvfs.connect_regulators(&provider);

        assert!(log.lock().enabled);
        assert_eq!(dvfs.rail_millivolts(core), Ok(1000));
        assert_eq!(voltages(&log), vec![950, 1000]);

        // Boot ceiling no longer applies
        dvfs.set_rate(gbus, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));
    }

    #[test]
    fn failed_connect_leaves_rail_unmanaged() {
        let dvfs = DvfsManager::new();
        let core = dvfs.register_rail(core_rail()).unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(clk("gbus", "core", [900, 1000, 1150]))
            .unwrap();

        dvfs.connect_regulators(&FakeRegulatorProvider::new());
        assert_eq!(dvfs.rail_is_connected(core), Ok(false));
        dvfs.set_rate(gbus, 200).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(0));
    }

    /// core depends on cpu: core >= cpu - 100
    fn cpu_core(counter: Arc<AtomicUsize>) -> (DvfsManager, DvfsId, DvfsId, RailId, RailId) {
        let dvfs = DvfsManager::new();
        let cpu = dvfs.register_rail(cpu_rail()).unwrap();
        let core = dvfs.register_rail(core_rail()).unwrap();
        dvfs.add_relationship(RelationshipDesc {
            from: "cpu",
            to: "core",
            solve: Box::new(move |from, to| {
                counter.fetch_add(1, Ordering::Relaxed);
                let level = from.millivolts.max(from.new_millivolts);
                to.new_millivolts.max(level.saturating_sub(100))
            }),
            solved_at_nominal: false,
        })
        .unwrap();
        let cclk = dvfs
            .enable_dvfs_on_clk(clk("cclk", "cpu", [850, 1100, 1300]))
            .unwrap();
        let sclk = dvfs
            .enable_dvfs_on_clk(clk("sclk", "core", [800, 900, 1000]))
            .unwrap();
        (dvfs, cclk, sclk, cpu, core)
    }

    #[test]
    fn downstream_follows_upstream() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (dvfs, cclk, sclk, cpu, core) = cpu_core(counter.clone());
        let provider = FakeRegulatorProvider::new();
        let cpu_log = provider.add("vdd_cpu", 800);
        let core_log = provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(sclk, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(800));
        counter.store(0, Ordering::Relaxed);

        // One 50 mV cpu step
        dvfs.set_rate(cclk, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(850));
        // Solved once before and once after the cpu write
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert!(core_log.lock().calls.is_empty());

        dvfs.set_rate(cclk, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(1300));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1200));
        assert_eq!(voltages(&cpu_log).last(), Some(&1300));

        // Core was raised ahead of each cpu step, never lagging by more than one step
        let core_mv = voltages(&core_log);
        assert_eq!(core_mv.first(), Some(&850));
        assert_eq!(core_mv.last(), Some(&1200));

        // Dropping cpu lets core fall back to its own request
        dvfs.set_rate(cclk, 0).unwrap();
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(1300));
        dvfs.set_rate(cclk, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(850));
        assert_eq!(dvfs.rail_millivolts(core), Ok(800));
    }

    #[test]
    fn mutual_relationships_converge() {
        let dvfs = DvfsManager::new();
        let a = dvfs.register_rail(cpu_rail()).unwrap();
        let b = dvfs.register_rail(core_rail()).unwrap();
        for (from, to) in [("cpu", "core"), ("core", "cpu")] {
            dvfs.add_relationship(RelationshipDesc {
                from,
                to,
                solve: Box::new(|from, to| {
                    let level = from.millivolts.max(from.new_millivolts);
                    to.new_millivolts.max(level.saturating_sub(50).min(to.max))
                }),
                solved_at_nominal: false,
            })
            .unwrap();
        }
        let cclk = dvfs
            .enable_dvfs_on_clk(clk("cclk", "cpu", [900, 1100, 1300]))
            .unwrap();
        let sclk = dvfs
            .enable_dvfs_on_clk(clk("sclk", "core", [800, 900, 1000]))
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        provider.add("vdd_cpu", 800);
        provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(sclk, 100).unwrap();
        dvfs.set_rate(cclk, 200).unwrap();
        assert_eq!(dvfs.rail_millivolts(a), Ok(1100));
        assert_eq!(dvfs.rail_millivolts(b), Ok(1050));

        dvfs.set_rate(sclk, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(b), Ok(1050));
        dvfs.set_rate(cclk, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(a), Ok(1300));
        assert_eq!(dvfs.rail_millivolts(b), Ok(1200));
    }

    #[test]
    fn disabled_rail_is_parked() {
        let s = single(
            RailDesc {
                disable_millivolts: 1000,
                ..core_rail()
            },
            800,
        );
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(900));

        s.dvfs.rail_disable(s.core).unwrap();
        assert_eq!(s.dvfs.rail_is_disabled(s.core), Ok(true));
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1000));

        // Requests up to the disable level are recorded but don't move the rail
        s.log.lock().calls.clear();
        s.dvfs.set_rate(s.gbus, 200).unwrap();
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        assert!(s.log.lock().calls.is_empty());
        assert_eq!(s.dvfs.set_rate(s.gbus, 300), Err(EINVAL));
        assert_eq!(s.dvfs.dvfs_rate(s.gbus), Ok(100));

        s.dvfs.rail_enable(s.core).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(900));
        s.dvfs.set_rate(s.gbus, 300).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1150));
    }

    #[test]
    fn disable_failure_keeps_rail_active() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        let n = s.log.lock().calls.len();
        s.log.lock().fail_call = Some(n);

        assert_eq!(s.dvfs.rail_disable(s.core), Err(EIO));
        assert_eq!(s.dvfs.rail_is_disabled(s.core), Ok(false));
    }

    #[test]
    fn disabled_before_connect_is_parked_at_connect() {
        let dvfs = DvfsManager::new();
        let core = dvfs.register_rail(core_rail()).unwrap();
        dvfs.rail_disable(core).unwrap();

        let provider = FakeRegulatorProvider::new();
        let log = provider.add("vdd_core", 1000);
        dvfs.connect_regulators(&provider);

        assert_eq!(dvfs.rail_is_disabled(core), Ok(true));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1100));
        assert_eq!(voltages(&log), vec![1050, 1100]);
    }

    #[test]
    fn suspend_parks_upstream_first() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (dvfs, cclk, sclk, cpu, core) = cpu_core(counter);
        let provider = FakeRegulatorProvider::new();
        provider.add("vdd_cpu", 800);
        provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);
        dvfs.set_rate(cclk, 100).unwrap();
        dvfs.set_rate(sclk, 100).unwrap();

        dvfs.suspend().unwrap();
        assert_eq!(dvfs.rail_is_suspended(cpu), Ok(true));
        assert_eq!(dvfs.rail_is_suspended(core), Ok(true));
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(1000));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1100));

        // Updates are held off while suspended
        dvfs.set_rate(sclk, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1100));

        dvfs.resume();
        assert_eq!(dvfs.rail_is_suspended(core), Ok(false));
        assert_eq!(dvfs.rail_millivolts(cpu), Ok(850));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1000));
    }

    #[test]
    fn suspended_rail_rejects_high_requests() {
        let s = single(
            RailDesc {
                suspend_millivolts: 950,
                ..core_rail()
            },
            800,
        );
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        s.dvfs.suspend().unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(950));

        assert_eq!(s.dvfs.set_rate(s.gbus, 200), Err(EINVAL));
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        s.dvfs.resume();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(900));
    }

    #[test]
    fn suspend_defaults_to_nominal_ceiling() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        s.dvfs.suspend().unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1100));

        assert_eq!(s.dvfs.set_rate(s.gbus, 300), Err(EINVAL));
        assert_eq!(s.dvfs.dvfs_rate(s.gbus), Ok(100));
        s.dvfs.set_rate(s.gbus, 200).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1100));

        s.dvfs.resume();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1000));
    }

    #[test]
    fn suspend_never_lowers_voltage() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 300).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1150));
        let n = s.log.lock().calls.len();

        s.dvfs.suspend().unwrap();
        assert_eq!(s.dvfs.rail_is_suspended(s.core), Ok(true));
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1150));
        assert_eq!(s.log.lock().calls.len(), n);

        s.dvfs.resume();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1150));
    }

    #[test]
    fn suspend_respects_fixed_level() {
        // Fixed level below nominal: suspend still raises to nominal
        let s = single(
            RailDesc {
                fixed_millivolts: 1000,
                ..core_rail()
            },
            800,
        );
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1000));
        s.dvfs.suspend().unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1100));

        // Fixed level above the suspend level wins
        let s = single(
            RailDesc {
                fixed_millivolts: 1050,
                suspend_millivolts: 950,
                ..core_rail()
            },
            800,
        );
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1050));
        s.dvfs.suspend().unwrap();
        assert_eq!(s.dvfs.rail_is_suspended(s.core), Ok(true));
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1050));
    }

    #[test]
    fn failed_suspend_resumes() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        let n = s.log.lock().calls.len();
        s.log.lock().fail_call = Some(n + 1);

        assert_eq!(s.dvfs.suspend(), Err(EIO));
        assert_eq!(s.dvfs.rail_is_suspended(s.core), Ok(false));
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(900));
    }

    #[test]
    fn dfll_mode() {
        let dvfs = DvfsManager::new();
        let core = dvfs
            .register_rail(RailDesc {
                fixed_millivolts: 900,
                ..core_rail()
            })
            .unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(DvfsDesc {
                dfll_millivolts: Some(vec![820, 870, 1020]),
                ..clk("gbus", "core", [900, 1000, 1150])
            })
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        let log = provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(gbus, 100).unwrap();
        assert_eq!(dvfs.predict_millivolts(gbus, 200), Ok(1000));
        assert_eq!(dvfs.predict_millivolts_dfll(gbus, 200), Ok(870));
        log.lock().calls.clear();

        dvfs.dfll_mode_set(gbus, 200).unwrap();
        assert_eq!(dvfs.rail_is_dfll(core), Ok(true));
        assert_eq!(dvfs.predict_millivolts(gbus, 200), Ok(870));
        assert_eq!(dvfs.predict_millivolts_pll(gbus, 200), Ok(1000));
        // Tracked, but never written to the regulator
        assert_eq!(dvfs.rail_millivolts(core), Ok(870));
        assert!(log.lock().calls.is_empty());

        dvfs.dfll_mode_clear(gbus, 200).unwrap();
        assert_eq!(dvfs.rail_is_dfll(core), Ok(false));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1000));
        assert_eq!(voltages(&log).last(), Some(&1000));
    }

    #[test]
    fn predict_without_dfll_table() {
        let s = single(core_rail(), 800);
        assert_eq!(s.dvfs.predict_millivolts_dfll(s.gbus, 100), Err(ENODATA));
        assert_eq!(s.dvfs.predict_millivolts(s.gbus, 400), Err(EINVAL));
        assert_eq!(s.dvfs.predict_millivolts(s.gbus, 0), Ok(0));
    }

    #[test]
    fn alt_freqs() {
        let dvfs = DvfsManager::new();
        let core = dvfs.register_rail(core_rail()).unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(DvfsDesc {
                alt_freqs: Some(vec![50, 100, 150]),
                ..clk("gbus", "core", [900, 1000, 1150])
            })
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(gbus, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(900));
        dvfs.use_alt_freqs(gbus, true).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1000));
        dvfs.use_alt_freqs(gbus, false).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(900));

        // 200 is beyond the alternate table, so switching fails and is undone
        dvfs.set_rate(gbus, 200).unwrap();
        assert_eq!(dvfs.use_alt_freqs(gbus, true), Err(EINVAL));
        assert_eq!(dvfs.rail_millivolts(core), Ok(1000));
        dvfs.set_rate(gbus, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));
    }

    #[test]
    fn debug_controls() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 200).unwrap();

        assert_eq!(s.dvfs.set_override_millivolts(s.core, 1300), Err(EINVAL));
        s.dvfs.set_override_millivolts(s.core, 850).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(850));
        s.dvfs.set_rate(s.gbus, 300).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(850));

        s.dvfs.set_override_millivolts(s.core, 0).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1150));

        s.dvfs.set_debug_offset(s.core, -50).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1100));
        s.dvfs.set_debug_offset(s.core, 100).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(1200));
    }

    #[test]
    fn thermal_floor_and_cap() {
        let dvfs = DvfsManager::new();
        let core = dvfs
            .register_rail(RailDesc {
                therm_floors: vec![800, 950],
                therm_caps: vec![1000],
                ..core_rail()
            })
            .unwrap();
        let gbus = dvfs
            .enable_dvfs_on_clk(DvfsDesc {
                millivolts: vec![vec![850, 900, 1150], vec![900, 950, 1150]],
                ..clk("gbus", "core", [0, 0, 0])
            })
            .unwrap();
        let provider = FakeRegulatorProvider::new();
        provider.add("vdd_core", 800);
        dvfs.connect_regulators(&provider);

        dvfs.set_rate(gbus, 100).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(850));

        // Cold: raised floor and the thermally scaled table row
        dvfs.set_floor_bucket(core, 1).unwrap();
        assert_eq!(dvfs.dvfs_millivolts(gbus), Ok(900));
        assert_eq!(dvfs.rail_millivolts(core), Ok(950));
        assert_eq!(dvfs.set_floor_bucket(core, 2), Err(EINVAL));

        dvfs.set_floor_bucket(core, 0).unwrap();
        dvfs.set_rate(gbus, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));

        // A cap never pulls the rail below what a running clock needs
        dvfs.set_cap_bucket(core, 1).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));
        assert_eq!(dvfs.dvfs_millivolts(gbus), Ok(1150));
        assert_eq!(dvfs.set_cap_bucket(core, 2), Err(EINVAL));

        // but requests above it are refused
        dvfs.set_rate(gbus, 200).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(900));
        assert_eq!(dvfs.set_rate(gbus, 300), Err(EINVAL));
        assert_eq!(dvfs.dvfs_rate(gbus), Ok(200));
        assert_eq!(dvfs.rail_millivolts(core), Ok(900));

        dvfs.set_cap_bucket(core, 0).unwrap();
        dvfs.set_rate(gbus, 300).unwrap();
        assert_eq!(dvfs.rail_millivolts(core), Ok(1150));
    }

    #[test]
    fn stats_follow_voltage() {
        let s = single(core_rail(), 800);
        assert_eq!(s.dvfs.rail_stats(s.core).unwrap().current_bin(), 1);
        s.dvfs.set_rate(s.gbus, 200).unwrap();
        assert_eq!(s.dvfs.rail_stats(s.core).unwrap().current_bin(), 9);
    }

    #[test]
    fn disconnect_stops_updates() {
        let s = single(core_rail(), 800);
        s.dvfs.set_rate(s.gbus, 100).unwrap();
        s.dvfs.disconnect_regulators();
        assert_eq!(s.dvfs.rail_is_connected(s.core), Ok(false));
        s.dvfs.set_rate(s.gbus, 300).unwrap();
        assert_eq!(s.dvfs.rail_millivolts(s.core), Ok(900));
        assert_eq!(s.dvfs.rail_by_name("core"), Some(s.core));
        let levels = s.dvfs.rail_levels(s.core).unwrap();
        assert_eq!((levels.min, levels.max, levels.nominal), (800, 1200, 1100));
    }
}
