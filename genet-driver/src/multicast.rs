// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multicast range set (spec §3, §4.9). Only exact (lower, upper) matches
//! are merged into a shared use-count; overlapping-but-distinct ranges are
//! stored independently.

/// Number of address slots the GENET MDF table has (broadcast + self count
/// as two of these, per spec §4.5); total registered multicast addresses
/// exceeding the remainder forces promiscuous mode.
pub const MDF_CAPACITY: usize = 17;
const MDF_RESERVED: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastRange {
    pub lower: u64,
    pub upper: u64,
    use_count: u32,
}

impl MulticastRange {
    fn width(&self) -> u64 {
        self.upper - self.lower + 1
    }
}

#[derive(Debug, Default)]
pub struct MulticastRangeSet {
    ranges: Vec<MulticastRange>,
    total: u64,
}

impl MulticastRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total registered multicast addresses across all ranges (spec §3:
    /// "the set's cardinality ... drives promiscuous-vs-MDF decisions").
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn ranges(&self) -> impl Iterator<Item = &MulticastRange> {
        self.ranges.iter()
    }

    /// Adds a range: an exact match bumps its use-count; otherwise a new
    /// entry is linked (spec §4.9).
    pub fn add(&mut self, lower: u64, upper: u64) {
        if let Some(existing) = self
            .ranges
            .iter_mut()
            .find(|r| r.lower == lower && r.upper == upper)
        {
            existing.use_count += 1;
            return;
        }
        let range = MulticastRange {
            lower,
            upper,
            use_count: 1,
        };
        self.total += range.width();
        self.ranges.push(range);
    }

    /// Removes a use of a range: decrements its count, unlinking at zero
    /// (spec §4.9). No-op if no exact match exists.
    pub fn delete(&mut self, lower: u64, upper: u64) {
        if let Some(pos) = self
            .ranges
            .iter()
            .position(|r| r.lower == lower && r.upper == upper)
        {
            let width = self.ranges[pos].width();
            self.ranges[pos].use_count -= 1;
            if self.ranges[pos].use_count == 0 {
                self.ranges.remove(pos);
                self.total -= width;
            }
        }
    }

    /// Enumerates every registered multicast address individually, widening
    /// each range (spec §4.5 MDF table programming). Only meant to be
    /// consumed after `exceeds_mdf_capacity` has confirmed the total fits.
    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|r| r.lower..=r.upper)
    }

    /// Whether `mac` falls within some registered range (spec §4.8 step 1's
    /// software multicast filter, used when MDF is not enabled).
    pub fn contains(&self, mac: u64) -> bool {
        self.ranges.iter().any(|r| r.lower <= mac && mac <= r.upper)
    }

    /// Whether the current total forces promiscuous mode, independent of
    /// any opener's explicit PROM flag (spec §3, §4.5: capacity is
    /// 2 reserved + 17 slots).
    pub fn exceeds_mdf_capacity(&self) -> bool {
        self.total > (MDF_CAPACITY - MDF_RESERVED) as u64
    }
}
