// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Public statistics and internal diagnostic counters (spec §3).

/// Counters returned by GET-GLOBAL-STATS.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Counters not exposed on the wire, logged on the stats tick (spec §4.11
/// step 5) and used to drive the RX overrun / drop diagnostics named
/// throughout §4.8.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagCounters {
    pub rx_overruns: u64,
    /// Fast-path typed queue (IP/ARP) empty on arrival (spec §4.8 step 4).
    pub arp_ip_dropped: u64,
    /// Multicast frame outside every registered range, silently dropped by
    /// the software filter when MDF is disabled (spec §4.8 step 1). Distinct
    /// from `arp_ip_dropped`, which spec §4.8 step 4 reserves for the
    /// fast-path empty-queue case.
    pub mcast_filtered: u64,
    pub orphan_frames: u64,
    pub tx_dropped: u64,
    pub buff_errors: u64,
}
