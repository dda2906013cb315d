//! Vector clocks for causal ordering of changes across devices.
//!
//! A clock maps device ids to logical ticks. A missing component is exactly
//! tick 0, components are never removed, and every operation returns a new
//! clock so concurrently-held snapshots stay uncorrupted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relation between two clocks under the happened-before partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrdering {
    /// Every component ≤ the other's, at least one strictly less.
    Before,
    /// Symmetric case: this clock dominates the other.
    After,
    /// Neither dominates and the clocks differ.
    Concurrent,
    /// All components equal.
    Equal,
}

/// A per-device logical clock.
///
/// Device ids are opaque strings; the sorted map keeps serialized and
/// canonical encodings deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    ticks: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create an empty clock (all components at tick 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// The tick for a device, 0 if absent.
    pub fn tick_of(&self, device_id: &str) -> u64 {
        self.ticks.get(device_id).copied().unwrap_or(0)
    }

    /// True if no device has ever ticked.
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Iterate over (device id, tick) entries in device-id order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.ticks.iter().map(|(d, &t)| (d.as_str(), t))
    }

    /// Return a new clock with the device's tick advanced by one.
    pub fn increment(&self, device_id: &str) -> VectorClock {
        let mut ticks = self.ticks.clone();
        *ticks.entry(device_id.to_string()).or_insert(0) += 1;
        VectorClock { ticks }
    }

    /// Compare two clocks componentwise over the union of device ids.
    pub fn compare(&self, other: &VectorClock) -> CausalOrdering {
        let mut some_less = false;
        let mut some_greater = false;

        for device in self.ticks.keys().chain(other.ticks.keys()) {
            let a = self.tick_of(device);
            let b = other.tick_of(device);
            if a < b {
                some_less = true;
            } else if a > b {
                some_greater = true;
            }
        }

        match (some_less, some_greater) {
            (false, false) => CausalOrdering::Equal,
            (true, false) => CausalOrdering::Before,
            (false, true) => CausalOrdering::After,
            (true, true) => CausalOrdering::Concurrent,
        }
    }

    /// Componentwise maximum over the union of device ids.
    ///
    /// Commutative, associative, and idempotent; the result dominates both
    /// inputs.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut ticks = self.ticks.clone();
        for (device, &tick) in &other.ticks {
            let entry = ticks.entry(device.clone()).or_insert(0);
            *entry = (*entry).max(tick);
        }
        VectorClock { ticks }
    }

    /// True iff every component of `other` is ≤ the corresponding component
    /// of `self`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            CausalOrdering::After | CausalOrdering::Equal
        )
    }

    /// True iff `self` is strictly causally before `other`. Irreflexive.
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == CausalOrdering::Before
    }

    /// True iff neither clock dominates the other.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == CausalOrdering::Concurrent
    }
}
