// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The request: the external IO object, both the unit of work and the
//! reply vehicle (spec §3, §6).

use crate::error::{DriverError, WireError};

bitflags::bitflags! {
    /// Flags recognised on a request (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Caller prefers inline completion over the mailbox round-trip.
        const QUICK = 1 << 0;
        /// Do not add/strip the 14-byte Ethernet header.
        const RAW = 1 << 1;
        /// Set on delivery when the destination is the broadcast address.
        const BCAST = 1 << 2;
        /// Set on delivery when the destination is a multicast address.
        const MCAST = 1 << 3;
        /// Requested at open time: fail if the unit already has an opener.
        const EXCLUSIVE = 1 << 4;
        /// Force promiscuous mode regardless of multicast filter capacity.
        const PROM = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Event bitset (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: u32 {
        const ONLINE = 1 << 0;
        const OFFLINE = 1 << 1;
        const TX = 1 << 2;
        const RX = 1 << 3;
        const BUFF = 1 << 4;
        const ERROR = 1 << 5;
        const HARDWARE = 1 << 6;
        const SOFTWARE = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Flush,
    Read,
    ReadOrphan,
    Write,
    Multicast,
    Broadcast,
    DeviceQuery,
    DeviceQueryCommands,
    GetStationAddress,
    GetGlobalStats,
    AddMulticastAddress,
    DelMulticastAddress,
    AddMulticastAddresses,
    DelMulticastAddresses,
    ConfigInterface,
    Online,
    Offline,
    OnEvent,
    /// Explicitly rejected legacy commands (spec §4.10 supplemental): these
    /// appear in the dispatcher's match as named NOCMD arms rather than
    /// falling through a default case.
    TrackType,
    UntrackType,
    GetTypeStats,
    GetSpecialStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    Pending,
    Scheduled,
    Completed,
    Aborted,
}

/// Opaque, in-memory stand-in for the request's data payload. Real buffer
/// ownership crosses a process boundary in the original design (§9:
/// up-to-four optional copy/DMA operations supplied by the opener); here the
/// bytes live directly on the request since both sides of that boundary are
/// in the same address space.
#[derive(Debug, Clone, Default)]
pub struct Payload(pub Vec<u8>);

/// Notifies whoever submitted a request that it has reached a terminal
/// state. Boxed rather than tied to a particular channel type, since the
/// host's generic device/library loader's actual reply mechanism is out of
/// scope (spec §1) -- callers plug in whatever notification primitive their
/// session uses (a oneshot channel, a condvar, a callback into a test
/// harness).
pub type ReplySender = Box<dyn FnOnce(Request) + Send>;

/// The external IO object (spec §3). Carries the command, addressing,
/// payload, and result fields; also the unit of work posted to the mailbox
/// and the vehicle a reply travels back on.
pub struct Request {
    pub command: Command,
    pub flags: Flags,
    pub opener_id: u64,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub packet_type: u16,
    pub payload: Payload,
    pub event_mask: Events,
    pub status: RequestStatus,
    pub error: Option<DriverError>,
    pub wire_error: Option<WireError>,
    /// Set once this request has been handed to the TX ring: it is no
    /// longer cancellable (spec §9 Open Question: the original overloads a
    /// list-linkage pointer for this; here it is an explicit flag).
    pub on_tx_ring: bool,
    /// Invoked exactly once, when this request reaches a terminal state
    /// asynchronously (ring reclaim, fan-out delivery, flush, event match).
    /// `None` for requests a caller expects back as a direct synchronous
    /// return instead (spec §4.10 post-condition; see `dispatch::Outcome`).
    pub reply: Option<ReplySender>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("flags", &self.flags)
            .field("opener_id", &self.opener_id)
            .field("src_mac", &self.src_mac)
            .field("dst_mac", &self.dst_mac)
            .field("packet_type", &self.packet_type)
            .field("payload_len", &self.payload.0.len())
            .field("event_mask", &self.event_mask)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("wire_error", &self.wire_error)
            .field("on_tx_ring", &self.on_tx_ring)
            .field("reply", &self.reply.is_some())
            .finish()
    }
}

impl Request {
    pub fn new(opener_id: u64, command: Command, flags: Flags) -> Self {
        Self {
            command,
            flags,
            opener_id,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            packet_type: 0,
            payload: Payload::default(),
            event_mask: Events::empty(),
            status: RequestStatus::Pending,
            error: None,
            wire_error: None,
            on_tx_ring: false,
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: ReplySender) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn complete_ok(&mut self) {
        self.status = RequestStatus::Completed;
        self.error = None;
        self.wire_error = None;
    }

    pub fn fail(&mut self, error: DriverError, wire_error: Option<WireError>) {
        self.status = RequestStatus::Completed;
        self.error = Some(error);
        self.wire_error = wire_error;
    }

    pub fn abort(&mut self) {
        self.status = RequestStatus::Aborted;
        self.error = Some(DriverError::Aborted);
    }

    /// Invokes the reply sink, if any, consuming the request. Used wherever
    /// a request reaches a terminal state away from the caller's own stack
    /// frame (spec §4.6 reclaim, §4.8 delivery, §4.10 FLUSH/ON-EVENT).
    pub fn reply(mut self) {
        if let Some(sink) = self.reply.take() {
            sink(self);
        }
    }
}

/// An 802.3 length field looks like an Ethernet type only below this value;
/// at or above it, it's a real EtherType (spec §4.8 step 5).
pub const ETH_LEN_MAX: u16 = 1500;

pub const ETHERTYPE_IP: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const BROADCAST_MAC: [u8; 6] = [0xff; 6];

pub fn is_broadcast(mac: &[u8; 6]) -> bool {
    *mac == BROADCAST_MAC
}

pub fn is_multicast(mac: &[u8; 6]) -> bool {
    mac[0] & 0x01 != 0 && !is_broadcast(mac)
}
