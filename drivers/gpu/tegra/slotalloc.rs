// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Fixed-size slot pool
//!
//! Hardware channel ids form a small, fixed space. Every id has a preconstructed item sitting in a
//! slot; users take the first free slot and give it back when done. Acquisition does a linear scan
//! under a single lock, which is fine since it happens once per context and not per submission.
//!
//! Items stay in their slot for the whole lifetime of the pool, so lookups by index (for example
//! from interrupt handlers that only know a hardware id) never race with acquisition.

use crate::debug::*;
use kernel::{error::code::*, prelude::*, sync::Mutex};

const DEBUG_CLASS: DebugFlags = DebugFlags::Channel;

/// A single slot.
struct Slot<T> {
    in_use: bool,
    item: T,
}

/// A fixed-capacity pool of items addressed by slot index.
pub(crate) struct SlotAllocator<T: Clone> {
    name: &'static str,
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T: Clone> SlotAllocator<T> {
    /// Build a pool with one slot per item, all initially free.
    pub(crate) fn new(
        name: &'static str,
        count: u32,
        mut constructor: impl FnMut(u32) -> T,
    ) -> Result<SlotAllocator<T>> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(count as usize)?;
        for i in 0..count {
            slots.push(Slot {
                in_use: false,
                item: constructor(i),
            });
        }

        Ok(SlotAllocator {
            name,
            slots: Mutex::new(slots),
        })
    }

    /// Take the first free slot, returning its index and item.
    pub(crate) fn acquire(&self) -> Option<(u32, T)> {
        let mut slots = self.slots.lock();
        let (idx, slot) = slots.iter_mut().enumerate().find(|(_, s)| !s.in_use)?;
        slot.in_use = true;
        mod_pr_debug!("{}: acquired slot {}\n", self.name, idx);
        Some((idx as u32, slot.item.clone()))
    }

    /// Return a slot to the pool.
    pub(crate) fn release(&self, idx: u32) -> Result {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(idx as usize).ok_or(EINVAL)?;
        if !slot.in_use {
            pr_err!("{}: releasing free slot {}\n", self.name, idx);
            return Err(EINVAL);
        }
        slot.in_use = false;
        mod_pr_debug!("{}: released slot {}\n", self.name, idx);
        Ok(())
    }

    /// Fetch the item in a slot, whether or not it is in use.
    pub(crate) fn get(&self, idx: u32) -> Option<T> {
        self.slots.lock().get(idx as usize).map(|s| s.item.clone())
    }

    /// Returns `true` if the slot is currently taken.
    pub(crate) fn is_in_use(&self, idx: u32) -> bool {
        self.slots
            .lock()
            .get(idx as usize)
            .map(|s| s.in_use)
            .unwrap_or(false)
    }

    /// Snapshot of all slots in use, in index order.
    pub(crate) fn in_use(&self) -> Vec<(u32, T)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.in_use)
            .map(|(i, s)| (i as u32, s.item.clone()))
            .collect()
    }

    /// Total number of slots.
    pub(crate) fn capacity(&self) -> u32 {
        self.slots.lock().len() as u32
    }
}
