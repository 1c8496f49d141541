// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single client session (spec §3, §9).
//!
//! Copy callbacks and the filter hook are modelled as a capability record
//! of optional closures (spec §9 "Dynamic dispatch"), rather than as a
//! vtable of required methods: an opener that never supplies a zero-copy
//! path simply carries `None` there, and the engine falls back to copying
//! through the bounce buffer.

use std::collections::VecDeque;

use crate::request::{Events, Request};

pub type FilterHook = Box<dyn Fn(&Request) -> bool + Send>;
/// Copies bytes into the opener's buffer. Returns `Err` on failure (the
/// request then gets NO-RESOURCES/BUFF-ERROR and a BUFF|RX|SOFTWARE|ERROR
/// event, per spec §4.8 delivery / §7).
pub type CopyToOpener = Box<dyn FnMut(&[u8]) -> Result<(), ()> + Send>;
pub type CopyFromOpener = Box<dyn FnMut(&mut [u8]) -> Result<usize, ()> + Send>;
/// Resolves an opaque buffer handle to a DMA-capable address outside chip
/// memory, for the TX zero-copy path (spec §4.6 step 4).
pub type DmaResolve = Box<dyn FnMut() -> Option<(u64, usize)> + Send>;

#[derive(Default)]
pub struct BufferOps {
    pub copy_to: Option<CopyToOpener>,
    pub copy_from: Option<CopyFromOpener>,
    pub dma_to: Option<DmaResolve>,
    pub dma_from: Option<DmaResolve>,
}

/// One client session, identified by an opaque id assigned at open.
pub struct Opener {
    pub id: u64,
    pub exclusive: bool,
    /// Requested PROM flag at open time (spec §3, §4.5): forces promiscuous
    /// mode regardless of multicast filter capacity for as long as this
    /// opener remains open.
    pub prom: bool,
    pub filter: Option<FilterHook>,
    pub buffers: BufferOps,
    /// Default read queue, drained by packet type match (spec §4.8 step 5).
    pub read_queue: VecDeque<Request>,
    /// Fast-path queues keyed by the two common Ethernet types.
    pub ip_queue: VecDeque<Request>,
    pub arp_queue: VecDeque<Request>,
    pub orphan_queue: VecDeque<Request>,
    /// Each pending event request carries the mask it is waiting on,
    /// alongside the request itself, so fan-out can compute the
    /// intersection (spec §4.8 report_events).
    pub event_queue: VecDeque<(Events, Request)>,
}

impl Opener {
    pub fn new(id: u64, exclusive: bool, prom: bool) -> Self {
        Self {
            id,
            exclusive,
            prom,
            filter: None,
            buffers: BufferOps::default(),
            read_queue: VecDeque::new(),
            ip_queue: VecDeque::new(),
            arp_queue: VecDeque::new(),
            orphan_queue: VecDeque::new(),
            event_queue: VecDeque::new(),
        }
    }

    /// Drains every pending queue, replying each request ABORTED (spec
    /// §4.10 FLUSH, §8 law "FLUSH is a left-identity for the opener's empty
    /// state").
    pub fn flush(&mut self) -> Vec<Request> {
        let mut drained = Vec::new();
        for mut req in self.read_queue.drain(..) {
            req.abort();
            drained.push(req);
        }
        for mut req in self.ip_queue.drain(..) {
            req.abort();
            drained.push(req);
        }
        for mut req in self.arp_queue.drain(..) {
            req.abort();
            drained.push(req);
        }
        for mut req in self.orphan_queue.drain(..) {
            req.abort();
            drained.push(req);
        }
        for (_, mut req) in self.event_queue.drain(..) {
            req.abort();
            drained.push(req);
        }
        drained
    }

    pub fn is_idle(&self) -> bool {
        self.read_queue.is_empty()
            && self.ip_queue.is_empty()
            && self.arp_queue.is_empty()
            && self.orphan_queue.is_empty()
            && self.event_queue.is_empty()
    }
}
