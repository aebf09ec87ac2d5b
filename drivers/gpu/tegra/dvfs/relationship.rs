// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Inter-rail voltage relationships
//!
//! A relationship is a directed edge `from -> to`: whenever `from` changes voltage, `to` must be
//! re-solved, and its solver yields the lowest voltage `to` may sit at given the state of `from`.
//! Typical use is keeping a core rail within some window of a CPU rail.

use super::rail::{RailId, RailLevels};

/// Solver for a relationship: given the upstream (`from`) and downstream (`to`) rail levels,
/// returns the voltage floor the downstream rail must respect.
///
/// During a stepped change of `from`, `from.millivolts` is the voltage before the step and
/// `from.new_millivolts` the voltage after it. `to.new_millivolts` is the downstream target
/// computed so far.
pub type SolveFn = Box<dyn Fn(&RailLevels, &RailLevels) -> u32 + Send>;

/// Static description of a relationship.
pub struct RelationshipDesc {
    /// Upstream rail name.
    pub from: &'static str,
    /// Downstream rail name.
    pub to: &'static str,
    pub solve: SolveFn,
    /// The downstream rail is already consistent once the upstream one sits at its nominal
    /// voltage, so suspend need not wait for the upstream rail.
    pub solved_at_nominal: bool,
}

pub(crate) struct Relationship {
    pub(crate) from: RailId,
    pub(crate) to: RailId,
    pub(crate) solve: SolveFn,
    pub(crate) solved_at_nominal: bool,
}
