// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Voltage regulator capability
//!
//! Rails drive their supply through this interface. Handles are obtained late, once the
//! regulator framework is up, via [`RegulatorProvider::connect`].

use kernel::prelude::*;

/// A connected voltage regulator.
pub trait Regulator: Send {
    /// Turn the supply on.
    fn enable(&mut self) -> Result;

    /// Turn the supply off.
    fn disable(&mut self) -> Result;

    /// Whether the supply is currently on.
    fn is_enabled(&self) -> bool;

    /// Request an output voltage in the range `[min_mv, max_mv]`.
    ///
    /// Regulator frameworks tend to short-circuit a request whose bounds are identical to the
    /// previous one, even when the output drifted or another consumer changed the aggregate. Rails
    /// therefore alternate `max_mv` between their maximum and maximum + 1 on successive calls, so
    /// that every step is a distinct request that actually reaches the hardware.
    fn set_voltage(&mut self, min_mv: u32, max_mv: u32) -> Result;

    /// Read back the current output voltage.
    fn get_voltage(&self) -> Result<u32>;
}

/// Source of regulator handles, keyed by the rail's supply name.
pub trait RegulatorProvider {
    fn connect(&self, reg_id: &str) -> Result<Box<dyn Regulator>>;
}
