// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Unit: the MAC instance state machine (spec §3, §4.4, §4.6, §4.7,
//! §4.9). Owns the TX/RX rings, the opener table, and the multicast set;
//! openers never observe each other directly (spec §9 Ownership).
//!
//! Two locks guard unit-owned state, matching spec §5's "Shared-resource
//! policy": `core` (the unit mutex -- opener list, multicast set, state,
//! dispatch serialization) and `tx` (the TX ring's own lock, reentrant
//! between the fast WRITE path and the unit task's periodic reclaim). Each
//! opener additionally carries its own lock (spec §9), modeled by storing
//! openers behind their own `Mutex` so the READ fast path can try-lock just
//! one opener without contending on `core`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Instant;

use genet_phy::LinkStatus;
use genet_ring::{PayloadSource, RxRing, TxRing, ETH_HLEN};

use crate::config::Config;
use crate::diagring::{DiagEvent, DiagRing};
use crate::error::{DriverError, DriverResult, OpenFailureReason, WireError};
use crate::fanout;
use crate::hw::Hardware;
use crate::multicast::MulticastRangeSet;
use crate::opener::Opener;
use crate::request::{Events, Request};
use crate::stats::{DiagCounters, GlobalStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Unconfigured,
    Configured,
    Online,
    Offline,
}

impl UnitState {
    fn name(self) -> &'static str {
        match self {
            UnitState::Unconfigured => "UNCONFIGURED",
            UnitState::Configured => "CONFIGURED",
            UnitState::Online => "ONLINE",
            UnitState::Offline => "OFFLINE",
        }
    }
}

pub type OpenerHandle = Arc<Mutex<Opener>>;

/// Everything protected by the unit mutex.
pub struct UnitCore {
    pub state: UnitState,
    /// MAC address as reported by the hardware/device-tree at probe time;
    /// returned in the destination slot of GET-STATION-ADDRESS.
    pub hardware_mac: [u8; 6],
    /// MAC address currently in effect, settable once via CONFIG-INTERFACE
    /// (zero means unset, spec §3).
    pub current_mac: [u8; 6],
    pub config: Config,
    pub stats: GlobalStats,
    pub diag: DiagCounters,
    pub diag_ring: DiagRing,
    pub multicast: MulticastRangeSet,
    pub openers: Vec<OpenerHandle>,
    pub(crate) next_opener_id: u64,
    pub exclusive_held: bool,
    pub rx: RxRing,
    pub start_time: Option<Instant>,
    pub link: Option<LinkStatus>,
    /// Separate from `link` (which holds the negotiated speed/duplex from
    /// the last `phy_startup`): tracks only up/down for edge detection on
    /// the stats-tick poll (REDESIGN FLAG), since a down-then-up cycle
    /// doesn't re-run PHY startup to refresh `link`.
    pub link_up: bool,
    /// WRITE/BROADCAST requests that found the ring full on submission;
    /// retried by the unit task each tick in submission order until the
    /// ring drains (spec §4.6 step 2, §4.11 backoff soft cap).
    pub pending_tx: std::collections::VecDeque<Request>,
    hw: Box<dyn Hardware>,
}

impl UnitCore {
    fn set_state(&mut self, new: UnitState) {
        if self.state != new {
            self.diag_ring.push(DiagEvent::StateChanged {
                from: self.state.name(),
                to: new.name(),
            });
            log::debug!("unit state {} -> {}", self.state.name(), new.name());
            self.state = new;
        }
    }

    /// MDF/promiscuous addresses as spec §4.5 wants them ordered: broadcast,
    /// then self, then each multicast address enumerated by walking ranges.
    fn rx_mode_addresses(&self) -> (bool, Vec<[u8; 6]>) {
        let promiscuous = self.openers.iter().any(|o| o.lock().unwrap().prom);
        let mut addrs = vec![crate::request::BROADCAST_MAC, self.current_mac];
        for addr in self.multicast.addresses() {
            addrs.push(mac48_to_bytes(addr));
        }
        (promiscuous, addrs)
    }

    fn program_rx_mode(&mut self) -> DriverResult<()> {
        let (promiscuous, addrs) = self.rx_mode_addresses();
        self.hw.program_rx_mode(promiscuous, &addrs)
    }
}

fn mac48_to_bytes(addr: u64) -> [u8; 6] {
    let b = addr.to_be_bytes();
    [b[2], b[3], b[4], b[5], b[6], b[7]]
}

fn mac_to_u48(mac: &[u8; 6]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..8].copy_from_slice(mac);
    u64::from_be_bytes(buf)
}

/// The MAC instance (spec §3). One per loaded `Device`.
pub struct Unit {
    pub core: Mutex<UnitCore>,
    pub tx: Mutex<TxRing<Request>>,
    mailbox: Sender<Request>,
    /// Set by `teardown` to tell the unit task to quiesce (spec §4.11 step 6,
    /// §5: "close sends a cancel to the unit task and polls on task handle
    /// == null"). The task's own mailbox `Sender` would otherwise keep the
    /// channel connected forever, so cancellation can't rely on
    /// `RecvTimeoutError::Disconnected`.
    cancelled: AtomicBool,
}

pub enum TxOutcome {
    /// Consumed ring descriptors; the request will be replied on reclaim.
    OnRing,
    /// The TX ring lock was contended, or reclaiming it inline left too few
    /// free descriptors: the caller should post to the unit task's mailbox
    /// (spec §4.6 step 2).
    NeedsMailbox(Request),
}

impl Unit {
    pub fn new(hw: Box<dyn Hardware>, config: Config, hardware_mac: [u8; 6], mailbox: Sender<Request>) -> Self {
        let core = UnitCore {
            state: UnitState::Unconfigured,
            hardware_mac,
            current_mac: [0; 6],
            config,
            stats: GlobalStats::default(),
            diag: DiagCounters::default(),
            diag_ring: DiagRing::default(),
            multicast: MulticastRangeSet::new(),
            openers: Vec::new(),
            next_opener_id: 1,
            exclusive_held: false,
            rx: RxRing::new(),
            start_time: None,
            link: None,
            link_up: false,
            pending_tx: std::collections::VecDeque::new(),
            hw,
        };
        Self {
            core: Mutex::new(core),
            tx: Mutex::new(TxRing::new()),
            mailbox,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn mailbox(&self) -> Sender<Request> {
        self.mailbox.clone()
    }

    /// Requests that the unit task quiesce and exit (spec §4.11 step 6).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Polled by the unit task's run loop between mailbox waits.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> UnitState {
        self.core.lock().unwrap().state
    }

    pub fn stats(&self) -> GlobalStats {
        self.core.lock().unwrap().stats
    }

    pub fn diag(&self) -> DiagCounters {
        self.core.lock().unwrap().diag
    }

    pub fn current_mac(&self) -> [u8; 6] {
        self.core.lock().unwrap().current_mac
    }

    pub fn hardware_mac(&self) -> [u8; 6] {
        self.core.lock().unwrap().hardware_mac
    }

    pub fn poll_delay_ladder(&self) -> Vec<u32> {
        self.core.lock().unwrap().config.poll_delay_us.clone()
    }

    // ---- Session entry points (spec §4.12) ----------------------------

    /// Allocates and links a new opener. Fails with `ExclusivityDenied` if
    /// the unit already has an opener and either this request or the
    /// existing one asked for exclusivity.
    pub fn add_opener(&self, exclusive: bool, prom: bool) -> DriverResult<OpenerHandle> {
        let mut core = self.core.lock().unwrap();
        if exclusive && !core.openers.is_empty() {
            return Err(DriverError::OpenFailure(OpenFailureReason::ExclusivityDenied));
        }
        if core.exclusive_held {
            return Err(DriverError::OpenFailure(OpenFailureReason::ExclusivityDenied));
        }
        let id = core.next_opener_id;
        core.next_opener_id += 1;
        let opener = Arc::new(Mutex::new(Opener::new(id, exclusive, prom)));
        core.openers.push(opener.clone());
        if exclusive {
            core.exclusive_held = true;
        }
        if prom {
            let _ = core.program_rx_mode();
        }
        Ok(opener)
    }

    /// Unlinks an opener and drains its queues, returning aborted requests
    /// to reply (spec §4.12 close).
    pub fn remove_opener(&self, id: u64) -> Vec<Request> {
        let mut core = self.core.lock().unwrap();
        let Some(pos) = core.openers.iter().position(|o| o.lock().unwrap().id == id) else {
            return Vec::new();
        };
        let opener = core.openers.remove(pos);
        let was_exclusive = {
            let guard = opener.lock().unwrap();
            guard.exclusive
        };
        if was_exclusive {
            core.exclusive_held = false;
        }
        let drained = {
            let mut guard = opener.lock().unwrap();
            guard.flush()
        };
        let _ = core.program_rx_mode();
        drained
    }

    pub fn find_opener(&self, id: u64) -> Option<OpenerHandle> {
        let core = self.core.lock().unwrap();
        core.openers.iter().find(|o| o.lock().unwrap().id == id).cloned()
    }

    pub fn opener_count(&self) -> usize {
        self.core.lock().unwrap().openers.len()
    }

    // ---- State machine (spec §4.4, §4.10 CONFIG-INTERFACE/ONLINE/OFFLINE)

    /// CONFIG-INTERFACE: adopts the caller's source MAC if unconfigured,
    /// probes the MAC, returns the effective current MAC either way.
    pub fn configure(&self, src_mac: [u8; 6]) -> DriverResult<[u8; 6]> {
        let mut core = self.core.lock().unwrap();
        if core.state == UnitState::Unconfigured {
            core.current_mac = src_mac;
            core.hw.probe().map_err(|_| DriverError::Software)?;
            core.set_state(UnitState::Configured);
        }
        Ok(core.current_mac)
    }

    /// ONLINE: idempotent (spec §8 law). Returns `true` if this call
    /// actually performed the transition (so the caller knows whether to
    /// report the ONLINE event).
    pub fn online(&self) -> DriverResult<bool> {
        let mut core = self.core.lock().unwrap();
        if core.state == UnitState::Online {
            return Ok(false);
        }
        core.stats = GlobalStats::default();
        core.start_time = Some(Instant::now());
        let (promiscuous, addrs) = core.rx_mode_addresses();
        let mac = core.current_mac;
        let link = core.hw.start(mac, promiscuous, &addrs).map_err(|err| {
            let _ = core.hw.stop();
            err
        })?;
        core.link = Some(link);
        core.link_up = true;
        core.set_state(UnitState::Online);
        log::info!("unit online: {:?}", link);
        Ok(true)
    }

    /// OFFLINE: idempotent. Returns `true` if it performed the transition.
    pub fn offline(&self) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != UnitState::Online {
            return false;
        }
        if let Err(err) = core.hw.stop() {
            log::warn!("mac stop returned an error, continuing shutdown: {err}");
        }
        core.link_up = false;
        core.set_state(UnitState::Offline);
        true
    }

    /// Re-polls link state on the stats tick and reports a HARDWARE event
    /// on a transition (REDESIGN FLAG: this was TODO in the original).
    pub fn poll_link(&self) -> Option<Events> {
        let mut core = self.core.lock().unwrap();
        if core.state != UnitState::Online {
            return None;
        }
        let up = core.hw.poll_link();
        let was_up = core.link_up;
        if up != was_up {
            core.link_up = up;
            core.diag_ring.push(DiagEvent::LinkChanged { up });
            log::info!("link state changed: up={up}");
            return Some(Events::HARDWARE);
        }
        None
    }

    // ---- Multicast (spec §4.9) -----------------------------------------

    pub fn multicast_add(&self, lower: u64, upper: u64) -> DriverResult<()> {
        let mut core = self.core.lock().unwrap();
        core.multicast.add(lower, upper);
        core.program_rx_mode()
    }

    pub fn multicast_delete(&self, lower: u64, upper: u64) -> DriverResult<()> {
        let mut core = self.core.lock().unwrap();
        core.multicast.delete(lower, upper);
        core.program_rx_mode()
    }

    pub fn program_rx_mode(&self) -> DriverResult<()> {
        self.core.lock().unwrap().program_rx_mode()
    }

    // ---- TX engine (spec §4.6) ------------------------------------------

    /// `tx_poll`: submit a frame. Tries the TX ring lock; on contention,
    /// hands the request back so the caller can post it to the mailbox
    /// (spec §4.12 per-request entry point).
    pub fn tx_poll(&self, request: Request) -> TxOutcome {
        match self.tx.try_lock() {
            Ok(mut tx) => self.tx_poll_locked(&mut tx, request),
            Err(TryLockError::WouldBlock) => TxOutcome::NeedsMailbox(request),
            Err(TryLockError::Poisoned(_)) => TxOutcome::NeedsMailbox(request),
        }
    }

    /// Same algorithm, for the unit task which already holds (or blocks
    /// for) the TX lock while draining the mailbox.
    pub fn tx_poll_blocking(&self, request: Request) -> TxOutcome {
        let mut tx = self.tx.lock().unwrap();
        self.tx_poll_locked(&mut tx, request)
    }

    /// Submits a WRITE/BROADCAST request from the dispatcher. If the ring
    /// has no room right now, the request joins the pending-TX backlog
    /// instead of being dropped (spec §4.6 step 2).
    pub fn submit_tx(&self, request: Request) {
        match self.tx_poll_blocking(request) {
            TxOutcome::OnRing => {}
            TxOutcome::NeedsMailbox(request) => {
                self.core.lock().unwrap().pending_tx.push_back(request);
            }
        }
    }

    /// Retries the pending-TX backlog in submission order, stopping at the
    /// first request the ring still can't take. Returns how many drained.
    pub fn drain_pending_tx(&self) -> usize {
        let mut drained = 0;
        loop {
            let next = self.core.lock().unwrap().pending_tx.pop_front();
            let Some(request) = next else { break };
            match self.tx_poll_blocking(request) {
                TxOutcome::OnRing => drained += 1,
                TxOutcome::NeedsMailbox(request) => {
                    self.core.lock().unwrap().pending_tx.push_front(request);
                    break;
                }
            }
        }
        drained
    }

    pub fn pending_tx_len(&self) -> usize {
        self.core.lock().unwrap().pending_tx.len()
    }

    fn tx_poll_locked(&self, tx: &mut TxRing<Request>, mut request: Request) -> TxOutcome {
        self.reclaim_locked(tx);

        let raw = request.flags.contains(crate::request::Flags::RAW);
        let needed = TxRing::<Request>::bds_required(raw);
        if tx.free_bds() <= needed {
            return TxOutcome::NeedsMailbox(request);
        }

        if request.payload.0.is_empty() {
            let mut core = self.core.lock().unwrap();
            core.diag.tx_dropped += 1;
            request.fail(DriverError::NoResources, Some(WireError::BuffError));
            request.reply();
            return TxOutcome::OnRing; // terminal either way; caller does not re-post
        }

        let current_mac = self.core.lock().unwrap().current_mac;
        if !raw {
            tx.push_header(request.dst_mac, current_mac, request.packet_type);
        }

        let payload = std::mem::take(&mut request.payload.0);
        request.on_tx_ring = true;
        let producer = tx.push_payload(PayloadSource::Copy(&payload), request);
        self.core.lock().unwrap().stats.packets_sent += 1;
        self.core.lock().unwrap().stats.bytes_sent += (payload.len() + ETH_HLEN) as u64;

        // Kick the DMA through the hardware bridge.
        self.core.lock().unwrap().hw.tx_kick(producer);
        TxOutcome::OnRing
    }

    /// Reclaims descriptors the hardware has finished with and replies the
    /// requests they carried, strictly in submission order (spec §4.6, §5).
    pub fn reclaim(&self) -> usize {
        let mut tx = self.tx.lock().unwrap();
        self.reclaim_locked(&mut tx)
    }

    fn reclaim_locked(&self, tx: &mut TxRing<Request>) -> usize {
        let hw_cons = self.core.lock().unwrap().hw.tx_consumer_index();
        let reclaimed = tx.reclaim(hw_cons);
        let count = reclaimed.len();
        if count > 0 {
            let mut core = self.core.lock().unwrap();
            core.diag_ring.push(DiagEvent::TxReclaimed { count });
            log::trace!("tx reclaimed {count} descriptors");
        }
        for desc in reclaimed {
            if let Some(request) = desc.owner {
                request.reply();
            }
        }
        count
    }

    pub fn free_tx_descriptors(&self) -> usize {
        self.tx.lock().unwrap().free_bds()
    }

    // ---- RX engine + fan-out (spec §4.7, §4.8) ---------------------------

    /// Drains the RX ring once, delivering each frame to the opener
    /// fan-out, and returns whether any frame was processed.
    fn drain_rx_once(&self, core: &mut MutexGuard<'_, UnitCore>) -> bool {
        let hw_producer = core.hw.rx_producer_index();
        let desc_len = core.hw.rx_desc_len(core.rx.consumer_index());
        match core.rx.recv(hw_producer, desc_len) {
            Ok(frame) => {
                let frame = frame.to_vec();
                fanout::receive(core, &frame);
                let new_cons = core.rx.free_pkt();
                core.hw.rx_consumer_ack(new_cons);
                true
            }
            Err(genet_ring::RxError::Empty) => false,
            Err(genet_ring::RxError::Overrun) => {
                core.diag.rx_overruns += 1;
                log::warn!("rx ring overrun, dropping consumer-side gap");
                let new_cons = core.rx.free_overrun();
                core.hw.rx_consumer_ack(new_cons);
                true
            }
        }
    }

    /// `ProcessReceive` (spec §4.11 step 2): drains until empty, then
    /// optionally extends draining by a configured burst with an
    /// idle-break heuristic. Returns whether any frame was processed.
    pub fn poll_rx(&self) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != UnitState::Online {
            return false;
        }
        let mut activity = false;
        while self.drain_rx_once(&mut core) {
            activity = true;
        }

        if activity && core.config.rx_poll_burst > 0 {
            let burst = core.config.rx_poll_burst;
            let idle_break = core.config.rx_poll_burst_idle_break.max(1);
            let mut empty_streak = 0u32;
            let mut iter = 0u32;
            while iter < burst {
                if self.drain_rx_once(&mut core) {
                    empty_streak = 0;
                } else {
                    empty_streak += 1;
                    if empty_streak >= idle_break {
                        break;
                    }
                }
                iter += 1;
            }
        }
        activity
    }

    // ---- Events (spec §4.8 report_events) --------------------------------

    pub fn report_events(&self, mask: Events) {
        let mut core = self.core.lock().unwrap();
        fanout::report_events(&mut core, mask);
    }

    /// Drains every opener's read/orphan/event queues, replying ABORTED
    /// (spec §4.10 FLUSH).
    pub fn flush(&self) {
        let core = self.core.lock().unwrap();
        for opener in core.openers.iter() {
            let drained = opener.lock().unwrap().flush();
            for request in drained {
                request.reply();
            }
        }
    }
}

pub(crate) fn u48_from_mac(mac: &[u8; 6]) -> u64 {
    mac_to_u48(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::tests::FakeHardware;

    fn unit() -> (Unit, std::sync::mpsc::Receiver<Request>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let unit = Unit::new(
            Box::new(FakeHardware::default()),
            Config::default(),
            [0x02, 0, 0, 0, 0, 1],
            tx,
        );
        (unit, rx)
    }

    #[test]
    fn configure_then_online_transitions_state() {
        let (unit, _rx) = unit();
        assert_eq!(unit.state(), UnitState::Unconfigured);
        let mac = unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        assert_eq!(mac, [0x02, 0, 0, 0, 0, 2]);
        assert_eq!(unit.state(), UnitState::Configured);
        assert!(unit.online().unwrap());
        assert_eq!(unit.state(), UnitState::Online);
        // Idempotent: second ONLINE is a no-op, not a second transition.
        assert!(!unit.online().unwrap());
    }

    #[test]
    fn offline_idempotent_without_online() {
        let (unit, _rx) = unit();
        assert!(!unit.offline());
    }

    #[test]
    fn add_opener_rejects_second_exclusive() {
        let (unit, _rx) = unit();
        let _first = unit.add_opener(true, false).unwrap();
        let second = unit.add_opener(false, false);
        assert!(matches!(
            second,
            Err(DriverError::OpenFailure(OpenFailureReason::ExclusivityDenied))
        ));
    }

    #[test]
    fn write_with_empty_payload_is_dropped_with_buff_error() {
        let (unit, _rx) = unit();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        unit.online().unwrap();

        let mut request = Request::new(1, crate::request::Command::Write, crate::request::Flags::empty());
        request.dst_mac = [0xaa; 6];
        request.packet_type = 0x0800;

        let outcome = unit.tx_poll(request);
        match outcome {
            TxOutcome::OnRing => {}
            TxOutcome::NeedsMailbox(_) => panic!("expected terminal drop, not a mailbox repost"),
        }
        assert_eq!(unit.diag().tx_dropped, 1);
    }
}
