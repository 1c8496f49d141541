// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Opener fan-out (spec §4.8): decides which opener(s), if any, receive a
//! frame just pulled off the RX ring, and delivers event reports.

use crate::diagring::DiagEvent;
use crate::request::{self, Events, Flags, Request, ETHERTYPE_ARP, ETHERTYPE_IP, ETH_LEN_MAX};
use crate::unit::{u48_from_mac, UnitCore};

/// Outcome of offering a frame to one opener's queues (spec §4.8 steps 4-5).
enum Delivery {
    /// A request was matched, filled, and replied.
    Delivered,
    /// The typed fast-path queue (IP/ARP) was empty: counts against the
    /// "arp/ip dropped" diagnostic (spec §4.8 step 4).
    FastPathEmpty,
    /// Either the slow-path queue had no request whose `packet_type`
    /// matched, or a matching request's filter hook rejected the frame.
    NoMatch,
}

/// `ReceiveFrame` (spec §4.8 step 1): admits the frame past the software
/// multicast filter, then hands it to delivery.
///
/// `original_source/unit_io.c`'s `ReceiveFrame` has a dead code path here
/// that drops every non-broadcast multicast frame unconditionally, range
/// check unreachable; this follows the range-checked behavior the
/// surrounding code was plainly meant to have (see DESIGN.md).
pub fn receive(core: &mut UnitCore, frame: &[u8]) {
    if frame.len() < 14 {
        core.diag.buff_errors += 1;
        return;
    }

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);

    let is_broadcast = request::is_broadcast(&dst);
    let is_multicast = request::is_multicast(&dst);

    // Spec §4.8 step 1: the software filter only runs when MDF isn't doing
    // the job for us -- promiscuous mode, or a multicast set too large for
    // the hardware's descriptor filter to hold.
    let mdf_disabled = core.openers.iter().any(|o| o.lock().unwrap().prom) || core.multicast.exceeds_mdf_capacity();
    if mdf_disabled && is_multicast && !core.multicast.contains(u48_from_mac(&dst)) {
        core.diag.mcast_filtered += 1;
        return;
    }

    core.stats.packets_received += 1;
    core.stats.bytes_received += frame.len() as u64;

    // Below ETH_LEN_MAX this is an 802.3 length field, not a real EtherType
    // (spec §4.8 step 5); it still flows through the same match below,
    // which only special-cases the two fast-path types and defaults the
    // rest to the plain read queue.
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

    let mut delivered = false;
    for opener in core.openers.clone() {
        let mut guard = opener.lock().unwrap();
        match deliver_to_opener(&mut guard, frame, &dst, &src, ethertype, is_broadcast, is_multicast) {
            Delivery::Delivered => delivered = true,
            Delivery::FastPathEmpty => core.diag.arp_ip_dropped += 1,
            Delivery::NoMatch => {}
        }
    }

    if !delivered {
        core.diag.orphan_frames += 1;
        deliver_orphan(core, frame, &dst, &src, ethertype, is_broadcast, is_multicast);
    }
}

/// `CopyPacket` (spec §4.8 steps 2-5): tries the fast-path typed queues
/// first, then the default read queue matched by packet type, copying into
/// the opener's buffer and replying on success or BUFF-ERROR on failure.
fn deliver_to_opener(
    opener: &mut crate::opener::Opener,
    frame: &[u8],
    dst: &[u8; 6],
    src: &[u8; 6],
    ethertype: u16,
    is_broadcast: bool,
    is_multicast: bool,
) -> Delivery {
    // Tracks where a slow-path match came from, so a filter rejection can
    // put it back in the same place rather than at the queue's head or tail.
    let mut read_queue_index = None;

    let mut request = match ethertype {
        ETHERTYPE_IP => match opener.ip_queue.pop_front() {
            Some(request) => request,
            None => return Delivery::FastPathEmpty,
        },
        ETHERTYPE_ARP => match opener.arp_queue.pop_front() {
            Some(request) => request,
            None => return Delivery::FastPathEmpty,
        },
        _ => match take_matching_read_request(&mut opener.read_queue, ethertype) {
            Some((index, request)) => {
                read_queue_index = Some(index);
                request
            }
            None => return Delivery::NoMatch,
        },
    };

    if let Some(filter) = opener.filter.as_ref() {
        if !filter(&request) {
            match ethertype {
                ETHERTYPE_IP => opener.ip_queue.push_front(request),
                ETHERTYPE_ARP => opener.arp_queue.push_front(request),
                _ => opener.read_queue.insert(read_queue_index.unwrap(), request),
            }
            return Delivery::NoMatch;
        }
    }

    fill_request(&mut request, frame, dst, src, ethertype, is_broadcast, is_multicast);

    let copy_ok = match opener.buffers.copy_to.as_mut() {
        Some(copy) => copy(&request_payload(&request)).is_ok(),
        None => true,
    };

    if copy_ok {
        request.complete_ok();
    } else {
        request.fail(
            crate::error::DriverError::NoResources,
            Some(crate::error::WireError::BuffError),
        );
    }
    request.reply();
    Delivery::Delivered
}

/// Spec §4.8 step 5: the first request in `queue` whose `packet_type`
/// equals `ethertype`, or -- if `ethertype` is an 802.3 length field rather
/// than a real EtherType (`<= ETH_LEN_MAX`) -- the first request whose
/// `packet_type` is also `<= ETH_LEN_MAX`. Returns the matched request's
/// original position alongside it, so a filter-hook rejection can restore
/// it without disturbing queue order.
fn take_matching_read_request(queue: &mut std::collections::VecDeque<Request>, ethertype: u16) -> Option<(usize, Request)> {
    let len_field = ethertype <= ETH_LEN_MAX;
    let index = queue.iter().position(|request| {
        request.packet_type == ethertype || (len_field && request.packet_type <= ETH_LEN_MAX)
    })?;
    queue.remove(index).map(|request| (index, request))
}

fn deliver_orphan(
    core: &mut UnitCore,
    frame: &[u8],
    dst: &[u8; 6],
    src: &[u8; 6],
    ethertype: u16,
    is_broadcast: bool,
    is_multicast: bool,
) {
    for opener in core.openers.clone() {
        let mut guard = opener.lock().unwrap();
        let Some(mut request) = guard.orphan_queue.pop_front() else {
            continue;
        };
        fill_request(&mut request, frame, dst, src, ethertype, is_broadcast, is_multicast);
        let copy_ok = match guard.buffers.copy_to.as_mut() {
            Some(copy) => copy(&request_payload(&request)).is_ok(),
            None => true,
        };
        if copy_ok {
            request.complete_ok();
        } else {
            request.fail(
                crate::error::DriverError::NoResources,
                Some(crate::error::WireError::BuffError),
            );
        }
        request.reply();
        return;
    }
    core.diag_ring.push(DiagEvent::RxOrphan { bytes: frame.len() });
    log::trace!("rx frame had no matching opener or orphan reader, dropped");
}

fn fill_request(
    request: &mut Request,
    frame: &[u8],
    dst: &[u8; 6],
    src: &[u8; 6],
    ethertype: u16,
    is_broadcast: bool,
    is_multicast: bool,
) {
    request.dst_mac = *dst;
    request.src_mac = *src;
    request.packet_type = ethertype;
    request.flags.set(Flags::BCAST, is_broadcast);
    request.flags.set(Flags::MCAST, is_multicast && !is_broadcast);

    let body = if request.flags.contains(Flags::RAW) {
        frame
    } else {
        &frame[14.min(frame.len())..]
    };
    request.payload = crate::request::Payload(body.to_vec());
}

fn request_payload(request: &Request) -> Vec<u8> {
    request.payload.0.clone()
}

/// `ReportEvents` (spec §4.8 step 6): delivers to every pending ON-EVENT
/// request across every opener whose waited-for mask intersects `mask`.
pub fn report_events(core: &mut UnitCore, mask: Events) {
    for opener in core.openers.clone() {
        let mut guard = opener.lock().unwrap();
        let mut remaining = std::collections::VecDeque::new();
        while let Some((waited, mut request)) = guard.event_queue.pop_front() {
            if waited.intersects(mask) {
                request.event_mask = waited & mask;
                request.complete_ok();
                request.reply();
            } else {
                remaining.push_back((waited, request));
            }
        }
        guard.event_queue = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::diagring::DiagRing;
    use crate::multicast::MulticastRangeSet;
    use crate::opener::Opener;
    use crate::request::{Command, Flags, Payload};
    use crate::stats::{DiagCounters, GlobalStats};
    use genet_ring::RxRing;
    use std::sync::{Arc, Mutex};

    fn core_with_opener() -> (UnitCore, crate::unit::OpenerHandle) {
        let opener = Arc::new(Mutex::new(Opener::new(1, false, false)));
        let core = UnitCore {
            state: crate::unit::UnitState::Online,
            hardware_mac: [0; 6],
            current_mac: [0x02, 0, 0, 0, 0, 9],
            config: Config::default(),
            stats: GlobalStats::default(),
            diag: DiagCounters::default(),
            diag_ring: DiagRing::default(),
            multicast: MulticastRangeSet::new(),
            openers: vec![opener.clone()],
            next_opener_id: 2,
            rx: RxRing::new(),
            start_time: None,
            link: None,
            link_up: false,
            pending_tx: std::collections::VecDeque::new(),
            exclusive_held: false,
            hw: Box::new(crate::hw::tests::FakeHardware::default()),
        };
        (core, opener)
    }

    fn ip_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 60];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 9]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 7]);
        frame[12..14].copy_from_slice(&ETHERTYPE_IP.to_be_bytes());
        frame
    }

    #[test]
    fn delivers_to_matching_fast_path_queue() {
        let (mut core, opener) = core_with_opener();
        opener
            .lock()
            .unwrap()
            .ip_queue
            .push_back(Request::new(1, Command::Read, Flags::empty()).with_reply(Box::new(|_| {})));

        receive(&mut core, &ip_frame());

        assert_eq!(core.stats.packets_received, 1);
        assert!(opener.lock().unwrap().ip_queue.is_empty());
    }

    #[test]
    fn undelivered_frame_counts_as_orphan() {
        let (mut core, _opener) = core_with_opener();
        receive(&mut core, &ip_frame());
        assert_eq!(core.diag.orphan_frames, 1);
    }

    #[test]
    fn multicast_outside_registered_range_is_dropped_when_mdf_disabled() {
        let (mut core, opener) = core_with_opener();
        opener.lock().unwrap().prom = true;
        opener
            .lock()
            .unwrap()
            .ip_queue
            .push_back(Request::new(1, Command::Read, Flags::empty()).with_reply(Box::new(|_| {})));

        let mut frame = ip_frame();
        frame[0] = 0x01; // multicast bit set, not registered
        receive(&mut core, &frame);

        assert_eq!(core.diag.mcast_filtered, 1);
        assert_eq!(core.diag.arp_ip_dropped, 0);
        assert!(opener.lock().unwrap().ip_queue.len() == 1, "request should remain queued");
    }

    #[test]
    fn multicast_outside_registered_range_passes_when_mdf_enabled() {
        let (mut core, opener) = core_with_opener();
        opener
            .lock()
            .unwrap()
            .ip_queue
            .push_back(Request::new(1, Command::Read, Flags::empty()).with_reply(Box::new(|_| {})));

        let mut frame = ip_frame();
        frame[0] = 0x01; // multicast bit set, not registered, but MDF is doing the work
        receive(&mut core, &frame);

        assert_eq!(core.diag.mcast_filtered, 0);
        assert!(opener.lock().unwrap().ip_queue.is_empty(), "hardware already filtered this, so it should be delivered");
    }

    #[test]
    fn fast_path_empty_queue_increments_arp_ip_dropped() {
        let (mut core, _opener) = core_with_opener();
        receive(&mut core, &ip_frame());
        assert_eq!(core.diag.arp_ip_dropped, 1);
    }

    #[test]
    fn slow_path_matches_by_packet_type_not_queue_order() {
        let (mut core, opener) = core_with_opener();
        let other_type_received = Arc::new(Mutex::new(false));
        let other_type_clone = other_type_received.clone();
        let matching_received = Arc::new(Mutex::new(false));
        let matching_clone = matching_received.clone();

        {
            let mut guard = opener.lock().unwrap();
            let mut other = Request::new(1, Command::Read, Flags::empty());
            other.packet_type = 0x9999;
            guard.read_queue.push_back(other.with_reply(Box::new(move |_| {
                *other_type_clone.lock().unwrap() = true;
            })));

            let mut matching = Request::new(1, Command::Read, Flags::empty());
            matching.packet_type = 0x1234;
            guard.read_queue.push_back(matching.with_reply(Box::new(move |_| {
                *matching_clone.lock().unwrap() = true;
            })));
        }

        let mut frame = ip_frame();
        frame[12..14].copy_from_slice(&0x1234u16.to_be_bytes());
        receive(&mut core, &frame);

        assert!(!*other_type_received.lock().unwrap(), "mismatched request must not receive the frame");
        assert!(*matching_received.lock().unwrap(), "matching request should receive the frame");
        assert_eq!(opener.lock().unwrap().read_queue.len(), 1, "only the matched request is removed");
    }

    #[test]
    fn report_events_matches_intersection_and_requeues_rest() {
        let (mut core, opener) = core_with_opener();
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        opener.lock().unwrap().event_queue.push_back((
            Events::ONLINE | Events::OFFLINE,
            Request::new(1, Command::OnEvent, Flags::empty()).with_reply(Box::new(move |r| {
                *received_clone.lock().unwrap() = Some(r.event_mask);
            })),
        ));
        opener.lock().unwrap().event_queue.push_back((
            Events::HARDWARE,
            Request::new(1, Command::OnEvent, Flags::empty()),
        ));

        report_events(&mut core, Events::ONLINE);

        assert_eq!(*received.lock().unwrap(), Some(Events::ONLINE));
        assert_eq!(opener.lock().unwrap().event_queue.len(), 1);
    }

    #[test]
    fn raw_flag_keeps_ethernet_header_in_payload() {
        let (mut core, opener) = core_with_opener();
        let mut frame = ip_frame();
        frame[12..14].copy_from_slice(&0x1234u16.to_be_bytes());

        let received = Arc::new(Mutex::new(Payload::default()));
        let received_clone = received.clone();
        let mut request = Request::new(1, Command::Read, Flags::RAW);
        request.packet_type = 0x1234;
        opener.lock().unwrap().read_queue.push_back(request.with_reply(Box::new(move |r| {
            *received_clone.lock().unwrap() = r.payload;
        })));

        receive(&mut core, &frame);
        assert_eq!(received.lock().unwrap().0.len(), frame.len());
    }
}
