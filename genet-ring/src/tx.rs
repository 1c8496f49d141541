// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{index_delta, BUF_SIZE, ETH_HLEN, RING_SIZE};

/// Where the payload bytes for a TX descriptor come from.
pub enum PayloadSource<'a> {
    /// Copy from a software buffer into the descriptor's bounce buffer.
    Copy(&'a [u8]),
    /// Use a DMA-capable address supplied by the opener's zero-copy
    /// callback directly, bypassing the bounce buffer (spec §4.6 step 4).
    ZeroCopy { addr: u64, len: usize },
}

struct TxSlot<T> {
    /// Bounce buffer backing this slot when the payload is copied in.
    bounce: Box<[u8; BUF_SIZE]>,
    /// Zero-copy address/len in use for this slot, if any.
    zero_copy: Option<(u64, usize)>,
    /// Length to hand to hardware for this descriptor.
    len: usize,
    /// The request this descriptor belongs to, if any. Header-only
    /// descriptors synthesized ahead of a payload descriptor carry no
    /// owner; only the payload descriptor that completes a frame owns the
    /// request that should be replied to on reclaim.
    owner: Option<T>,
}

impl<T> TxSlot<T> {
    fn new() -> Self {
        Self {
            bounce: Box::new([0u8; BUF_SIZE]),
            zero_copy: None,
            len: 0,
            owner: None,
        }
    }
}

/// A descriptor that has been reclaimed from the ring, with the request
/// that was waiting on it (if any -- header-only descriptors reclaim with
/// `owner: None` and are otherwise uneventful).
pub struct ReclaimedDescriptor<T> {
    pub owner: Option<T>,
}

/// Producer/consumer-index TX descriptor ring.
///
/// Invariant maintained at all times: `free_bds + (producer - clean_ptr) mod
/// RING_SIZE == RING_SIZE` (spec §3/§8).
pub struct TxRing<T> {
    slots: Vec<TxSlot<T>>,
    /// Software producer index: next slot to be written.
    producer: u16,
    /// Software clean pointer: next slot to be reclaimed.
    clean_ptr: u16,
    free_bds: usize,
}

impl<T> TxRing<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(RING_SIZE);
        slots.resize_with(RING_SIZE, TxSlot::new);
        Self {
            slots,
            producer: 0,
            clean_ptr: 0,
            free_bds: RING_SIZE,
        }
    }

    pub fn len(&self) -> usize {
        RING_SIZE
    }

    pub fn free_bds(&self) -> usize {
        self.free_bds
    }

    /// Current software producer index, to be written to the hardware's
    /// write-pointer register after a push to kick the DMA.
    pub fn producer_index(&self) -> u16 {
        self.producer
    }

    /// Consumes one descriptor for a synthesized Ethernet header (spec
    /// §4.6 step 3: dst/src/type, SOP and CRC-append, length ETH_HLEN).
    /// This descriptor carries no owning request.
    pub fn push_header(&mut self, dst: [u8; 6], src: [u8; 6], ethertype: u16) {
        assert!(self.free_bds > 0, "push_header called with no free descriptors");
        let idx = self.producer as usize % RING_SIZE;
        let slot = &mut self.slots[idx];
        slot.bounce[0..6].copy_from_slice(&dst);
        slot.bounce[6..12].copy_from_slice(&src);
        slot.bounce[12..14].copy_from_slice(&ethertype.to_be_bytes());
        slot.len = ETH_HLEN;
        slot.zero_copy = None;
        slot.owner = None;
        self.producer = self.producer.wrapping_add(1);
        self.free_bds -= 1;
    }

    /// Consumes one descriptor for the payload (spec §4.6 step 4). Returns
    /// the producer index that should be written to hardware to kick the
    /// DMA once the caller is done pushing descriptors for this frame.
    pub fn push_payload(&mut self, payload: PayloadSource<'_>, owner: T) -> u16 {
        assert!(self.free_bds > 0, "push_payload called with no free descriptors");
        let idx = self.producer as usize % RING_SIZE;
        let slot = &mut self.slots[idx];
        match payload {
            PayloadSource::Copy(data) => {
                assert!(data.len() <= BUF_SIZE, "payload exceeds bounce buffer");
                slot.bounce[..data.len()].copy_from_slice(data);
                slot.len = data.len();
                slot.zero_copy = None;
            }
            PayloadSource::ZeroCopy { addr, len } => {
                slot.zero_copy = Some((addr, len));
                slot.len = len;
            }
        }
        slot.owner = Some(owner);
        self.producer = self.producer.wrapping_add(1);
        self.free_bds -= 1;
        self.producer
    }

    /// Number of descriptors required for a frame: 2 normally (header +
    /// payload), 1 if the RAW flag means no header synthesis is needed
    /// (spec §4.6 step 2).
    pub fn bds_required(raw: bool) -> usize {
        if raw {
            1
        } else {
            2
        }
    }

    /// Reclaims descriptors the hardware has finished with, given its
    /// reported consumer index. Returns the reclaimed descriptors in
    /// submission order; TX completions are replied strictly in that order
    /// (spec §5).
    pub fn reclaim(&mut self, hw_cons_index: u16) -> Vec<ReclaimedDescriptor<T>> {
        let ready = index_delta(hw_cons_index, self.clean_ptr) as usize;
        let mut out = Vec::with_capacity(ready);
        for _ in 0..ready {
            let idx = self.clean_ptr as usize % RING_SIZE;
            let owner = self.slots[idx].owner.take();
            self.clean_ptr = self.clean_ptr.wrapping_add(1);
            self.free_bds += 1;
            out.push(ReclaimedDescriptor { owner });
        }
        out
    }
}

impl<T> Default for TxRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ring_is_fully_free() {
        let ring: TxRing<u32> = TxRing::new();
        assert_eq!(ring.free_bds(), RING_SIZE);
    }

    #[test]
    fn push_and_reclaim_round_trip() {
        let mut ring: TxRing<u32> = TxRing::new();
        ring.push_header([0xff; 6], [1, 2, 3, 4, 5, 6], 0x0800);
        let prod = ring.push_payload(PayloadSource::Copy(&[0xaa; 46]), 42);
        assert_eq!(ring.free_bds(), RING_SIZE - 2);
        assert_eq!(prod, 2);

        let reclaimed = ring.reclaim(2);
        assert_eq!(reclaimed.len(), 2);
        assert!(reclaimed[0].owner.is_none(), "header descriptor has no owner");
        assert_eq!(reclaimed[1].owner, Some(42));
        assert_eq!(ring.free_bds(), RING_SIZE);
    }

    #[test]
    fn bds_required_accounts_for_raw_flag() {
        assert_eq!(TxRing::<u32>::bds_required(false), 2);
        assert_eq!(TxRing::<u32>::bds_required(true), 1);
    }

    #[test]
    fn reclaim_is_in_submission_order() {
        let mut ring: TxRing<u32> = TxRing::new();
        for owner in 0..5u32 {
            ring.push_header([0; 6], [0; 6], 0x0800);
            ring.push_payload(PayloadSource::Copy(&[0u8; 4]), owner);
        }
        let reclaimed = ring.reclaim(10);
        let owners: Vec<u32> = reclaimed.into_iter().filter_map(|r| r.owner).collect();
        assert_eq!(owners, vec![0, 1, 2, 3, 4]);
    }
}
