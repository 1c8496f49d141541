// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DMA descriptor ring bookkeeping for the GENET TX/RX engines.
//!
//! This module is specific to the producer/consumer-index ring discipline
//! the GENET DMA uses (there is no per-descriptor OWN bit to read back, as
//! on some other MACs: software instead tracks its own clean/consumer
//! pointer and compares it against the hardware's reported index). It does
//! _not_ talk to any MMIO register itself -- callers read/write the
//! hardware index registers and pass the values in and out.
//!
//! Ring size and buffer size are fixed by the GENET v5 layout this driver
//! targets.

pub mod rx;
pub mod tx;

pub use rx::{RxError, RxRing};
pub use tx::{PayloadSource, ReclaimedDescriptor, TxRing};

/// Number of descriptors in each ring (§3 Data model).
pub const RING_SIZE: usize = 256;

/// Size of each ring slot's bounce buffer. Large enough for a max-size
/// Ethernet frame plus header room.
pub const BUF_SIZE: usize = 2048;

/// Ethernet header length, used when synthesizing TX headers and when
/// stripping/restoring them on delivery.
pub const ETH_HLEN: usize = 14;

/// Wrapping 16-bit index arithmetic matching the hardware's producer/
/// consumer index registers, which are 16 bits wide and wrap at 2^16 per
/// spec §4.7/§9 (the "known false-positive" note about ambiguous wrap under
/// long stalls lives one level up, in the RX overrun check).
pub(crate) fn index_delta(hw: u16, sw: u16) -> u16 {
    hw.wrapping_sub(sw)
}
