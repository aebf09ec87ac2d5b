// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Voltage rails and the rail graph solver
//!
//! A rail is a voltage domain fed by one regulator. Its target voltage is the highest voltage any
//! of its clock consumers needs, adjusted by debug overrides and thermal limits, and raised further
//! by any relationship with an upstream rail. Changes are applied in bounded steps; before and
//! after every step the downstream rails are re-solved so that they can track the change.
//!
//! The relationship graph may contain cycles. A rail that is in the middle of stepping is marked
//! as resolving, and updates that reach it again through the graph are ignored. The outer update
//! loop then re-solves until the rail stops moving.

use super::consumer::{Dvfs, DvfsDesc, DvfsId};
use super::regulator::{Regulator, RegulatorProvider};
use super::relationship::{Relationship, RelationshipDesc};
use super::stats::RailStats;
use crate::debug::*;
use crate::util::div_ceil;
use kernel::{error::code::*, prelude::*};

const DEBUG_CLASS: DebugFlags = DebugFlags::Rail;

/// Handle to a registered rail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RailId(pub(crate) usize);

/// Static description of a rail.
#[derive(Clone, Debug, Default)]
pub struct RailDesc {
    pub name: &'static str,
    /// Supply name handed to the regulator provider.
    pub reg_id: &'static str,
    pub min_millivolts: u32,
    pub max_millivolts: u32,
    pub nominal_millivolts: u32,
    /// Largest downward step in millivolts.
    pub step: u32,
    /// Largest upward step in millivolts. Zero means same as `step`.
    pub step_up: u32,
    /// Transitions to and from 0 mV are taken in a single step.
    pub jmp_to_zero: bool,
    /// Minimum voltage while not in DFLL mode, or zero.
    pub fixed_millivolts: u32,
    /// Voltage to park at when disabled. Zero means nominal.
    pub disable_millivolts: u32,
    /// Voltage to park at across system suspend. Zero means nominal.
    pub suspend_millivolts: u32,
    /// Ceiling for rate requests made before the regulator is connected, or zero.
    pub boot_millivolts: u32,
    /// Voltage floor per thermal bucket.
    pub therm_floors: Vec<u32>,
    /// Voltage cap per thermal cap level, level 1 first.
    pub therm_caps: Vec<u32>,
}

/// Snapshot of a rail's voltages, as seen by relationship solvers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RailLevels {
    /// Voltage currently applied.
    pub millivolts: u32,
    /// Voltage being moved to.
    pub new_millivolts: u32,
    pub min: u32,
    pub max: u32,
    pub nominal: u32,
}

pub(crate) struct Rail {
    pub(crate) name: &'static str,
    reg_id: &'static str,
    pub(crate) min: u32,
    pub(crate) max: u32,
    pub(crate) nominal: u32,
    step: u32,
    step_up: u32,
    jmp_to_zero: bool,
    fixed_millivolts: u32,
    disable_millivolts: u32,
    suspend_millivolts: u32,
    boot_millivolts: u32,

    pub(crate) millivolts: u32,
    pub(crate) new_millivolts: u32,
    reg_max_millivolts: u32,
    pub(crate) override_millivolts: u32,
    pub(crate) dbg_mv_offset: i32,

    therm_floors: Vec<u32>,
    pub(crate) floor_idx: usize,
    therm_caps: Vec<u32>,
    pub(crate) cap_idx: usize,

    pub(crate) disabled: bool,
    pub(crate) suspended: bool,
    pub(crate) dfll_mode: bool,
    resolving_to: bool,
    pub(crate) rate_set: bool,

    reg: Option<Box<dyn Regulator>>,
    pub(crate) stats: RailStats,

    consumers: Vec<DvfsId>,
    /// Relationships in which this rail is downstream.
    rels_from: Vec<usize>,
    /// Relationships in which this rail is upstream.
    rels_to: Vec<usize>,
}

impl Rail {
    fn new(desc: RailDesc) -> Rail {
        let step_up = if desc.step_up == 0 {
            desc.step
        } else {
            desc.step_up
        };

        Rail {
            name: desc.name,
            reg_id: desc.reg_id,
            min: desc.min_millivolts,
            max: desc.max_millivolts,
            nominal: desc.nominal_millivolts,
            step: desc.step,
            step_up,
            jmp_to_zero: desc.jmp_to_zero,
            fixed_millivolts: desc.fixed_millivolts,
            disable_millivolts: desc.disable_millivolts,
            suspend_millivolts: desc.suspend_millivolts,
            boot_millivolts: desc.boot_millivolts,
            millivolts: 0,
            new_millivolts: 0,
            reg_max_millivolts: desc.max_millivolts,
            override_millivolts: 0,
            dbg_mv_offset: 0,
            therm_floors: desc.therm_floors,
            floor_idx: 0,
            therm_caps: desc.therm_caps,
            cap_idx: 0,
            disabled: false,
            suspended: false,
            dfll_mode: false,
            resolving_to: false,
            rate_set: false,
            reg: None,
            stats: RailStats::new(desc.min_millivolts),
            consumers: Vec::new(),
            rels_from: Vec::new(),
            rels_to: Vec::new(),
        }
    }

    fn levels(&self) -> RailLevels {
        RailLevels {
            millivolts: self.millivolts,
            new_millivolts: self.new_millivolts,
            min: self.min,
            max: self.max,
            nominal: self.nominal,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.reg.is_some()
    }

    fn floor_mv(&self) -> u32 {
        self.therm_floors
            .get(self.floor_idx)
            .copied()
            .unwrap_or(self.min)
    }

    fn cap_mv(&self) -> u32 {
        match self.cap_idx {
            0 => self.max,
            i => self.therm_caps.get(i - 1).copied().unwrap_or(self.max),
        }
    }

    /// Number of valid thermal floor buckets. A rail without floors has a single bucket.
    pub(crate) fn floor_buckets(&self) -> usize {
        self.therm_floors.len().max(1)
    }

    pub(crate) fn cap_levels(&self) -> usize {
        self.therm_caps.len()
    }

    fn disable_level(&self) -> u32 {
        if self.disable_millivolts != 0 {
            self.disable_millivolts
        } else {
            self.nominal
        }
    }

    fn suspend_level(&self) -> u32 {
        if self.suspend_millivolts != 0 {
            self.suspend_millivolts
        } else {
            self.nominal
        }
    }
}

/// The set of rails, their consumers and the relationships between them.
///
/// Created empty, populated from descriptors during board init, connected to regulators once
/// those are available, and dropped (releasing every regulator handle) at teardown.
#[derive(Default)]
pub struct RailRegistry {
    pub(crate) rails: Vec<Rail>,
    pub(crate) dvfs: Vec<Dvfs>,
    rels: Vec<Relationship>,
}

impl RailRegistry {
    pub fn new() -> RailRegistry {
        RailRegistry::default()
    }

    /// Look a rail up by name.
    pub fn rail_by_name(&self, name: &str) -> Option<RailId> {
        self.rails.iter().position(|r| r.name == name).map(RailId)
    }

    pub(crate) fn rail(&self, id: RailId) -> Result<&Rail> {
        self.rails.get(id.0).ok_or(EINVAL)
    }

    fn rail_mut(&mut self, id: RailId) -> Result<&mut Rail> {
        self.rails.get_mut(id.0).ok_or(EINVAL)
    }

    pub(crate) fn consumer(&self, id: DvfsId) -> Result<&Dvfs> {
        self.dvfs.get(id.0).ok_or(EINVAL)
    }

    pub(crate) fn register_rail(&mut self, desc: RailDesc) -> Result<RailId> {
        if self.rail_by_name(desc.name).is_some() {
            pr_err!("dvfs: rail {} already registered\n", desc.name);
            return Err(EEXIST);
        }
        if desc.step == 0
            || desc.min_millivolts > desc.max_millivolts
            || desc.nominal_millivolts > desc.max_millivolts
        {
            pr_err!("dvfs: rail {} has an invalid voltage range\n", desc.name);
            return Err(EINVAL);
        }

        mod_pr_debug!(
            "{}: registered, {}..{} mV, nominal {} mV\n",
            desc.name,
            desc.min_millivolts,
            desc.max_millivolts,
            desc.nominal_millivolts
        );

        self.rails.try_reserve(1)?;
        self.rails.push(Rail::new(desc));
        Ok(RailId(self.rails.len() - 1))
    }

    pub(crate) fn add_relationship(&mut self, desc: RelationshipDesc) -> Result {
        let (Some(from), Some(to)) = (self.rail_by_name(desc.from), self.rail_by_name(desc.to))
        else {
            pr_err!(
                "dvfs: relationship {} -> {} names an unknown rail\n",
                desc.from,
                desc.to
            );
            return Err(EINVAL);
        };
        if from == to {
            pr_err!("dvfs: rail {} cannot depend on itself\n", desc.from);
            return Err(EINVAL);
        }

        self.rels.try_reserve(1)?;
        let idx = self.rels.len();
        self.rels.push(Relationship {
            from,
            to,
            solve: desc.solve,
            solved_at_nominal: desc.solved_at_nominal,
        });
        self.rails[to.0].rels_from.push(idx);
        self.rails[from.0].rels_to.push(idx);

        mod_pr_debug!("relationship {} -> {}\n", desc.from, desc.to);
        Ok(())
    }

    pub(crate) fn add_dvfs(&mut self, desc: DvfsDesc) -> Result<DvfsId> {
        let Some(rail) = self.rail_by_name(desc.rail) else {
            pr_err!(
                "dvfs: {} is on unknown rail {}\n",
                desc.clk_name,
                desc.rail
            );
            return Err(EINVAL);
        };
        let max = self.rails[rail.0].max;
        if desc
            .millivolts
            .iter()
            .flatten()
            .chain(desc.dfll_millivolts.iter().flatten())
            .any(|&mv| mv > max)
        {
            pr_warn!(
                "dvfs: {} table exceeds {} maximum of {} mV\n",
                desc.clk_name,
                desc.rail,
                max
            );
        }

        let dvfs = Dvfs::new(desc, rail)?;
        self.dvfs.try_reserve(1)?;
        self.dvfs.push(dvfs);
        let id = DvfsId(self.dvfs.len() - 1);
        self.rails[rail.0].consumers.push(id);
        Ok(id)
    }

    /// Evaluate a relationship solver against the current state of both rails.
    fn solve(&self, rel: usize) -> u32 {
        let rel = &self.rels[rel];
        let from = self.rails[rel.from.0].levels();
        let to = self.rails[rel.to.0].levels();
        (rel.solve)(&from, &to)
    }

    /// Apply debug adjustments and thermal limits to a requested voltage.
    pub(crate) fn apply_limits(&self, id: RailId, millivolts: u32) -> u32 {
        let rail = &self.rails[id.0];

        if rail.override_millivolts != 0 {
            return rail.override_millivolts;
        }

        let mut mv = (i64::from(millivolts) + i64::from(rail.dbg_mv_offset)).max(0) as u32;
        if !rail.dfll_mode && rail.fixed_millivolts != 0 {
            mv = mv.max(rail.fixed_millivolts);
        }
        mv.min(rail.max).max(rail.floor_mv())
    }

    /// Move a rail to `millivolts`, one bounded step at a time.
    ///
    /// Downstream rails are re-solved before each step (seeing the pending value in
    /// `new_millivolts`) and again after it (seeing the applied value).
    pub(crate) fn set_voltage(&mut self, id: RailId, millivolts: u32) -> Result {
        let rail = &mut self.rails[id.0];

        if rail.reg.is_none() {
            return if millivolts == rail.millivolts {
                Ok(())
            } else {
                Err(EINVAL)
            };
        }

        if rail.dfll_mode {
            // Closed-loop regulation, only keep track of the estimate
            rail.millivolts = millivolts;
            rail.new_millivolts = millivolts;
            rail.stats.update(millivolts);
            return Ok(());
        }

        if rail.disabled {
            return Ok(());
        }

        rail.resolving_to = true;
        let ret = self.step_to(id, millivolts);
        self.rails[id.0].resolving_to = false;
        ret
    }

    fn step_to(&mut self, id: RailId, target: u32) -> Result {
        let rail = &self.rails[id.0];
        let jump = rail.jmp_to_zero && (target == 0 || rail.millivolts == 0);
        let steps = if jump {
            1
        } else if target > rail.millivolts {
            div_ceil(target - rail.millivolts, rail.step_up)
        } else {
            div_ceil(rail.millivolts - target, rail.step)
        };

        for _ in 0..steps {
            let rail = &mut self.rails[id.0];
            let cur = rail.millivolts;
            rail.new_millivolts = if jump {
                target
            } else if target > cur {
                target.min(cur + rail.step_up)
            } else {
                target.max(cur.saturating_sub(rail.step))
            };

            self.update_downstream(id)?;

            let rail = &mut self.rails[id.0];
            rail.reg_max_millivolts = if rail.reg_max_millivolts == rail.max {
                rail.max + 1
            } else {
                rail.max
            };
            let (new, hint) = (rail.new_millivolts, rail.reg_max_millivolts);

            cls_pr_debug!(Regulator, "{}: {} -> {} mV (max {})\n", rail.name, cur, new, hint);

            if let Some(reg) = rail.reg.as_mut() {
                if let Err(e) = reg.set_voltage(new, hint) {
                    pr_err!("dvfs: failed to set {} to {} mV: {:?}\n", rail.reg_id, new, e);
                    return Err(e);
                }
            }
            rail.millivolts = new;
            rail.stats.update(new);

            self.update_downstream(id)?;
        }

        let rail = &self.rails[id.0];
        if rail.millivolts != target {
            pr_err!(
                "dvfs: {} stopped at {} mV instead of {} mV\n",
                rail.reg_id,
                rail.millivolts,
                target
            );
            return Err(EINVAL);
        }
        Ok(())
    }

    fn update_downstream(&mut self, id: RailId) -> Result {
        for i in 0..self.rails[id.0].rels_to.len() {
            let to = self.rels[self.rails[id.0].rels_to[i]].to;
            self.update(to)?;
        }
        Ok(())
    }

    /// Re-derive a rail's voltage from its consumers and relationships and apply it.
    pub(crate) fn update(&mut self, id: RailId) -> Result {
        let rail = &self.rails[id.0];

        if rail.suspended || rail.disabled || rail.reg.is_none() || !rail.rate_set {
            return Ok(());
        }
        if rail.resolving_to {
            // Reached again through a relationship cycle
            return Ok(());
        }

        let mut millivolts = rail
            .consumers
            .iter()
            .map(|d| self.dvfs[d.0].cur_millivolts)
            .max()
            .unwrap_or(0);

        if millivolts != 0 {
            millivolts = self.apply_limits(id, millivolts);
        } else if !rail.jmp_to_zero {
            pr_warn!("dvfs: {} cannot be turned off by dvfs\n", rail.reg_id);
            return Ok(());
        }

        let steps = div_ceil(millivolts.abs_diff(rail.millivolts), rail.step);
        mod_pr_debug!(
            "{}: update {} -> {} mV ({} steps)\n",
            rail.name,
            rail.millivolts,
            millivolts,
            steps
        );

        for _ in 0..=steps {
            self.rails[id.0].new_millivolts = millivolts;
            for i in 0..self.rails[id.0].rels_from.len() {
                let floor = self.solve(self.rails[id.0].rels_from[i]);
                let rail = &mut self.rails[id.0];
                rail.new_millivolts = rail.new_millivolts.max(floor);
            }

            let rail = &self.rails[id.0];
            let new = rail.new_millivolts;
            if new == rail.millivolts {
                break;
            }
            if let Err(e) = self.set_voltage(id, new) {
                pr_err!(
                    "dvfs: failed to update {} to {} mV\n",
                    self.rails[id.0].reg_id,
                    new
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Record a new rate for a consumer and bring its rail along.
    pub(crate) fn set_rate(&mut self, id: DvfsId, rate: u64) -> Result {
        let d = self.consumer(id)?;
        let rail = &self.rails[d.rail.0];
        let millivolts = d.lookup(rate, rail.dfll_mode, rail.floor_idx)?;

        if millivolts > rail.max {
            pr_warn!(
                "dvfs: {} at {} needs {} mV, above {} maximum {} mV\n",
                d.clk_name,
                rate,
                millivolts,
                rail.name,
                rail.max
            );
            return Err(EINVAL);
        }
        if rail.reg.is_none() && rail.boot_millivolts != 0 && millivolts > rail.boot_millivolts {
            pr_warn!(
                "dvfs: {} at {} needs {} mV, above {} boot level {} mV\n",
                d.clk_name,
                rate,
                millivolts,
                rail.name,
                rail.boot_millivolts
            );
            return Err(EINVAL);
        }
        if rail.disabled && millivolts > rail.disable_level() {
            pr_warn!(
                "dvfs: {} at {} needs {} mV, above {} disable level {} mV\n",
                d.clk_name,
                rate,
                millivolts,
                rail.name,
                rail.disable_level()
            );
            return Err(EINVAL);
        }
        if rail.suspended && millivolts > rail.suspend_level() {
            pr_warn!(
                "dvfs: {} at {} needs {} mV, above {} suspend level {} mV\n",
                d.clk_name,
                rate,
                millivolts,
                rail.name,
                rail.suspend_level()
            );
            return Err(EINVAL);
        }
        if millivolts > rail.cap_mv() {
            cls_pr_debug!(
                Thermal,
                "{} at {} needs {} mV, above {} thermal cap {} mV\n",
                d.clk_name,
                rate,
                millivolts,
                rail.name,
                rail.cap_mv()
            );
            return Err(EINVAL);
        }

        let rail_id = d.rail;
        let d = &mut self.dvfs[id.0];
        d.cur_rate = rate;
        d.cur_millivolts = millivolts;
        self.rails[rail_id.0].rate_set = true;

        self.update(rail_id).map_err(|e| {
            pr_err!(
                "dvfs: failed to set {} rate {}: {:?}\n",
                self.dvfs[id.0].clk_name,
                rate,
                e
            );
            e
        })
    }

    /// Voltage `rate` would need, using the DFLL table if `dfll` and the PLL table otherwise.
    pub(crate) fn predict(&self, id: DvfsId, rate: u64, dfll: bool) -> Result<u32> {
        let d = self.consumer(id)?;
        if dfll && !d.has_dfll_table() {
            return Err(ENODATA);
        }
        let rail = &self.rails[d.rail.0];
        d.lookup(rate, dfll, rail.floor_idx)
    }

    /// Park a rail at its disable level and stop tracking consumers.
    pub(crate) fn disable(&mut self, id: RailId) -> Result {
        let rail = self.rail(id)?;

        if rail.dfll_mode || rail.reg.is_none() {
            self.rails[id.0].disabled = true;
            return Ok(());
        }

        let (reg_id, cur) = (rail.reg_id, rail.millivolts);
        let mv = self.apply_limits(id, rail.disable_level());
        if mv >= cur {
            if let Err(e) = self.set_voltage(id, mv) {
                pr_err!("dvfs: failed to disable {} at {} mV\n", reg_id, mv);
                return Err(e);
            }
        }

        let rail = &mut self.rails[id.0];
        rail.disabled = true;
        mod_pr_debug!("{}: disabled at {} mV\n", rail.name, rail.millivolts);
        Ok(())
    }

    pub(crate) fn enable(&mut self, id: RailId) -> Result {
        self.rail_mut(id)?.disabled = false;
        mod_pr_debug!("{}: enabled\n", self.rails[id.0].name);
        self.update(id)
    }

    /// Whether every upstream rail is already parked, or doesn't need to be.
    fn upstream_settled(&self, id: RailId) -> bool {
        self.rails[id.0].rels_from.iter().all(|&r| {
            let rel = &self.rels[r];
            let from = &self.rails[rel.from.0];
            from.suspended || from.disabled || rel.solved_at_nominal
        })
    }

    fn suspend_one(&mut self) -> Result {
        let Some(idx) = (0..self.rails.len()).find(|&i| {
            let rail = &self.rails[i];
            !rail.suspended && !rail.disabled && self.upstream_settled(RailId(i))
        }) else {
            pr_err!("dvfs: no rail can be suspended\n");
            return Err(EINVAL);
        };

        // Suspend only ever raises the voltage
        let id = RailId(idx);
        let cur = self.rails[idx].millivolts;
        let mv = self.apply_limits(id, self.rails[idx].suspend_level());
        if mv >= cur {
            mod_pr_debug!("{}: suspending at {} mV\n", self.rails[idx].name, mv);
            self.set_voltage(id, mv)?;
        } else {
            mod_pr_debug!("{}: suspending, staying at {} mV\n", self.rails[idx].name, cur);
        }
        self.rails[idx].suspended = true;
        Ok(())
    }

    /// Park every rail at its suspend level, upstream rails first.
    pub(crate) fn suspend(&mut self) -> Result {
        while self.rails.iter().any(|r| !r.suspended && !r.disabled) {
            if let Err(e) = self.suspend_one() {
                self.resume();
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn resume(&mut self) {
        for rail in self.rails.iter_mut() {
            rail.suspended = false;
        }
        for i in 0..self.rails.len() {
            if let Err(e) = self.update(RailId(i)) {
                pr_err!("dvfs: failed to resume {}: {:?}\n", self.rails[i].name, e);
            }
        }
    }

    /// Select a thermal cap level.
    ///
    /// The cap bounds new rate requests. Consumers already running above it keep their voltage
    /// until the governor lowers their rate.
    pub(crate) fn set_cap(&mut self, id: RailId, idx: usize) -> Result {
        let rail = self.rail_mut(id)?;
        rail.cap_idx = idx;
        let cap = rail.cap_mv();

        let rail = &self.rails[id.0];
        let demand = rail
            .consumers
            .iter()
            .map(|d| self.dvfs[d.0].cur_millivolts)
            .max()
            .unwrap_or(0);
        if demand > cap {
            pr_warn!(
                "dvfs: {} consumers need {} mV, above thermal cap {} mV\n",
                rail.name,
                demand,
                cap
            );
        }
        self.update(id)
    }

    /// Recompute consumer requirements after a thermal floor bucket change.
    pub(crate) fn refresh_consumers(&mut self, id: RailId) {
        let rail = &self.rails[id.0];
        let (dfll, idx) = (rail.dfll_mode, rail.floor_idx);
        for d in rail.consumers.iter() {
            let d = &mut self.dvfs[d.0];
            if let Ok(mv) = d.lookup(d.cur_rate, dfll, idx) {
                d.cur_millivolts = mv;
            }
        }
    }

    fn connect_one(&mut self, id: RailId, provider: &dyn RegulatorProvider) -> Result {
        let rail = &mut self.rails[id.0];
        let mut reg = provider.connect(rail.reg_id).map_err(|e| {
            pr_err!("dvfs: failed to connect {} rail: {:?}\n", rail.reg_id, e);
            e
        })?;
        reg.enable().map_err(|e| {
            pr_err!("dvfs: failed to enable {} rail: {:?}\n", rail.reg_id, e);
            e
        })?;
        let mv = reg.get_voltage().map_err(|e| {
            pr_err!("dvfs: failed to read {} voltage: {:?}\n", rail.reg_id, e);
            e
        })?;

        rail.reg = Some(reg);
        rail.millivolts = mv;
        rail.new_millivolts = mv;
        rail.stats.init(mv);
        cls_pr_debug!(Regulator, "{}: connected at {} mV\n", rail.name, mv);
        Ok(())
    }

    /// Connect every rail to its regulator and bring it in line with the current requests.
    ///
    /// Rails that fail to connect are left unmanaged.
    pub(crate) fn connect(&mut self, provider: &dyn RegulatorProvider) {
        for i in 0..self.rails.len() {
            let id = RailId(i);
            if self.rails[i].reg.is_some() || self.connect_one(id, provider).is_err() {
                continue;
            }

            let ret = if self.rails[i].disabled {
                // Re-park at the disable level now that it can be applied
                self.rails[i].disabled = false;
                self.disable(id)
            } else {
                self.update(id)
            };
            if let Err(e) = ret {
                pr_err!("dvfs: {} initial update failed: {:?}\n", self.rails[i].name, e);
            }
        }
    }

    /// Release every regulator handle.
    pub(crate) fn disconnect(&mut self) {
        for rail in self.rails.iter_mut() {
            if rail.reg.take().is_some() {
                cls_pr_debug!(Regulator, "{}: disconnected\n", rail.name);
            }
        }
    }

    pub(crate) fn levels(&self, id: RailId) -> Result<RailLevels> {
        Ok(self.rail(id)?.levels())
    }
}
