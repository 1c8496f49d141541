// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{index_delta, BUF_SIZE, RING_SIZE};

struct RxSlot {
    buf: Box<[u8; BUF_SIZE]>,
}

impl RxSlot {
    fn new() -> Self {
        Self {
            buf: Box::new([0u8; BUF_SIZE]),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RxError {
    /// Hardware producer index equals our consumer index: nothing to read.
    #[error("rx ring empty")]
    Empty,
    /// The gap between hardware's producer index and ours exceeds N-1:
    /// frames were overwritten before we could drain them. Spec §9 notes
    /// this heuristic is a known false-positive source under long stalls
    /// on a 16-bit wrapping index; it is counted, not treated as fatal.
    #[error("rx ring overrun")]
    Overrun,
}

/// Consumer-side RX descriptor ring. The producer is hardware; there is a
/// single software consumer (the unit task).
pub struct RxRing {
    slots: Vec<RxSlot>,
    /// Software consumer index: next slot to read from.
    consumer: u16,
    /// Length most recently reported for the slot at `consumer`, valid
    /// between a successful `recv` and the matching `free_pkt`.
    pending_len: Option<usize>,
}

impl RxRing {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(RING_SIZE);
        slots.resize_with(RING_SIZE, RxSlot::new);
        Self {
            slots,
            consumer: 0,
            pending_len: None,
        }
    }

    pub fn len(&self) -> usize {
        RING_SIZE
    }

    /// Software consumer index, as last written to hardware.
    pub fn consumer_index(&self) -> u16 {
        self.consumer
    }

    /// Reads the descriptor at the current consumer position, given the
    /// hardware's reported producer index and the length/status word for
    /// that descriptor (read by the caller via MMIO). Returns a view of the
    /// bounce buffer on success.
    ///
    /// Spec §4.7: empty if producer == consumer; an overrun is flagged (but
    /// not fatal) if the unconsumed gap exceeds N-1.
    pub fn recv(&mut self, hw_producer_index: u16, desc_len: usize) -> Result<&[u8], RxError> {
        if hw_producer_index == self.consumer {
            return Err(RxError::Empty);
        }
        let gap = index_delta(hw_producer_index, self.consumer) as usize;
        if gap > RING_SIZE - 1 {
            return Err(RxError::Overrun);
        }
        let idx = self.consumer as usize % RING_SIZE;
        self.pending_len = Some(desc_len);
        Ok(&self.slots[idx].buf[..desc_len])
    }

    /// Advances the consumer index past the descriptor handed back by the
    /// last `recv`, and returns the new index to write to hardware -- that
    /// write is the sole acknowledgement to hardware (spec §3 RX
    /// invariant).
    pub fn free_pkt(&mut self) -> u16 {
        assert!(self.pending_len.take().is_some(), "free_pkt with no pending recv");
        self.consumer = self.consumer.wrapping_add(1);
        self.consumer
    }

    /// Advances the consumer index past a descriptor `recv` reported as
    /// `RxError::Overrun` for. Overrun is flagged before a descriptor is
    /// read (spec §4.7), so there is no pending length to clear; this is a
    /// distinct entry point from `free_pkt` rather than a relaxed version of
    /// it, so a genuine "free with no recv" misuse still panics.
    pub fn free_overrun(&mut self) -> u16 {
        self.consumer = self.consumer.wrapping_add(1);
        self.consumer
    }

    /// Mutable access to the bounce buffer at the current consumer
    /// position, for filling in a freshly arrived frame during test setup
    /// or simulation.
    #[cfg(test)]
    fn buffer_at(&mut self, idx: u16) -> &mut [u8; BUF_SIZE] {
        &mut self.slots[idx as usize % RING_SIZE].buf
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_reports_empty() {
        let mut ring = RxRing::new();
        assert_eq!(ring.recv(0, 0), Err(RxError::Empty));
    }

    #[test]
    fn recv_then_free_pkt_advances_consumer() {
        let mut ring = RxRing::new();
        ring.buffer_at(0)[0] = 0xab;
        let frame = ring.recv(1, 60).unwrap();
        assert_eq!(frame[0], 0xab);
        assert_eq!(frame.len(), 60);
        let new_consumer = ring.free_pkt();
        assert_eq!(new_consumer, 1);
        assert_eq!(ring.consumer_index(), 1);
    }

    #[test]
    fn overrun_detected_past_n_minus_one() {
        let mut ring = RxRing::new();
        let result = ring.recv(RING_SIZE as u16, 60);
        assert_eq!(result, Err(RxError::Overrun));
    }

    #[test]
    fn free_overrun_advances_consumer_without_pending_len() {
        let mut ring = RxRing::new();
        assert_eq!(ring.recv(RING_SIZE as u16, 60), Err(RxError::Overrun));
        let new_consumer = ring.free_overrun();
        assert_eq!(new_consumer, 1);
        assert_eq!(ring.consumer_index(), 1);
    }

    #[test]
    #[should_panic]
    fn free_pkt_without_recv_panics() {
        let mut ring = RxRing::new();
        ring.free_pkt();
    }
}
