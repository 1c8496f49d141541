// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small in-memory ring of recent dispatcher/reclaim/link events (ambient
//! addition, SPEC_FULL.md §2a). Modeled on the coalescing last-entry-reuse
//! scheme of `ringbuf::Ringbuf::entry` from the teacher repo, but as a plain
//! bounded `VecDeque` rather than a `static`-declaring macro pair: this
//! driver is hosted and has no Humility/GDB inspection story to design for.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagEvent {
    Dispatched { opener_id: u64, command: &'static str },
    TxReclaimed { count: usize },
    RxDelivered { opener_id: u64, bytes: usize },
    RxOrphan { bytes: usize },
    LinkChanged { up: bool },
    StateChanged { from: &'static str, to: &'static str },
}

/// Fixed-capacity ring; pushing past capacity drops the oldest entry.
pub struct DiagRing {
    entries: VecDeque<DiagEvent>,
    capacity: usize,
}

impl DiagRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: DiagEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DiagRing {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_past_capacity() {
        let mut ring = DiagRing::new(2);
        ring.push(DiagEvent::TxReclaimed { count: 1 });
        ring.push(DiagEvent::TxReclaimed { count: 2 });
        ring.push(DiagEvent::TxReclaimed { count: 3 });
        let collected: Vec<_> = ring.iter().cloned().collect();
        assert_eq!(
            collected,
            vec![
                DiagEvent::TxReclaimed { count: 2 },
                DiagEvent::TxReclaimed { count: 3 },
            ]
        );
    }
}
