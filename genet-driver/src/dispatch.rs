// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command dispatcher (spec §4.10). Every request but WRITE/BROADCAST's own
//! fast path and READ's opener-local fast path passes through here under
//! the unit lock (REDESIGN FLAGS: uniform dispatcher locking rule).

use crate::error::{DriverError, OpenFailureReason, WireError};
use crate::fanout;
use crate::request::{
    self, Command, Events, Flags, Payload, Request, ETHERTYPE_ARP, ETHERTYPE_IP,
};
use crate::unit::{u48_from_mac, OpenerHandle, Unit, UnitState};

/// Result of dispatching one request.
pub enum Outcome {
    /// Completed within this call; the caller (session entry point) owns
    /// replying it -- there was no async hand-off (spec §4.10 post-
    /// condition for the synchronous commands).
    Processed(Request),
    /// Queued somewhere (an opener queue, the TX ring, the pending-TX
    /// backlog) and will be replied later from that context.
    Scheduled,
}

const STATION_ADDRESS_LEN: usize = 6;
const GLOBAL_STATS_LEN: usize = 32;

/// Dispatches `request`, submitted by `opener`, against `unit`.
pub fn dispatch(unit: &Unit, opener: &OpenerHandle, mut request: Request) -> Outcome {
    match request.command {
        Command::Broadcast => {
            request.dst_mac = request::BROADCAST_MAC;
            dispatch_write(unit, request)
        }
        Command::Write => dispatch_write(unit, request),
        Command::Multicast => dispatch_write(unit, request),

        Command::Read => {
            if unit.state() != UnitState::Online {
                request.fail(DriverError::OutOfService, Some(WireError::UnitOffline));
                return Outcome::Processed(request);
            }
            let mut guard = opener.lock().unwrap();
            match request.packet_type {
                ETHERTYPE_IP => guard.ip_queue.push_back(request),
                ETHERTYPE_ARP => guard.arp_queue.push_back(request),
                _ => guard.read_queue.push_back(request),
            }
            Outcome::Scheduled
        }

        Command::ReadOrphan => {
            if unit.state() != UnitState::Online {
                request.fail(DriverError::OutOfService, Some(WireError::UnitOffline));
                return Outcome::Processed(request);
            }
            opener.lock().unwrap().orphan_queue.push_back(request);
            Outcome::Scheduled
        }

        Command::Flush => {
            unit.flush();
            request.complete_ok();
            Outcome::Processed(request)
        }

        Command::DeviceQuery | Command::DeviceQueryCommands => {
            request.complete_ok();
            Outcome::Processed(request)
        }

        Command::GetStationAddress => {
            request.dst_mac = unit.current_mac();
            request.src_mac = unit.hardware_mac();
            request.payload = Payload(vec![0u8; STATION_ADDRESS_LEN]);
            request.complete_ok();
            Outcome::Processed(request)
        }

        Command::GetGlobalStats => {
            let stats = unit.stats();
            let mut bytes = Vec::with_capacity(GLOBAL_STATS_LEN);
            bytes.extend_from_slice(&stats.packets_sent.to_be_bytes());
            bytes.extend_from_slice(&stats.packets_received.to_be_bytes());
            bytes.extend_from_slice(&stats.bytes_sent.to_be_bytes());
            bytes.extend_from_slice(&stats.bytes_received.to_be_bytes());
            request.payload = Payload(bytes);
            request.complete_ok();
            Outcome::Processed(request)
        }

        Command::AddMulticastAddress => mcast_single(unit, request, true),
        Command::DelMulticastAddress => mcast_single(unit, request, false),
        Command::AddMulticastAddresses => mcast_range(unit, request, true),
        Command::DelMulticastAddresses => mcast_range(unit, request, false),

        Command::ConfigInterface => match unit.configure(request.src_mac) {
            Ok(mac) => {
                request.dst_mac = mac;
                request.complete_ok();
                Outcome::Processed(request)
            }
            Err(err) => {
                request.fail(err, None);
                Outcome::Processed(request)
            }
        },

        Command::Online => match unit.online() {
            Ok(transitioned) => {
                request.complete_ok();
                if transitioned {
                    unit.report_events(Events::ONLINE);
                }
                Outcome::Processed(request)
            }
            Err(err) => {
                request.fail(err, Some(WireError::UnitOffline));
                Outcome::Processed(request)
            }
        },

        Command::Offline => {
            let transitioned = unit.offline();
            request.complete_ok();
            if transitioned {
                unit.report_events(Events::OFFLINE);
            }
            Outcome::Processed(request)
        }

        Command::OnEvent => {
            if request.event_mask.is_empty() {
                request.fail(DriverError::BadArgument, Some(WireError::BadEvent));
                return Outcome::Processed(request);
            }
            let mask = request.event_mask;
            // spec §4.10 ON-EVENT: a subscription that the current state
            // already satisfies (ONLINE/OFFLINE track the unit state
            // machine directly) replies immediately instead of queueing
            // (spec §8 scenario 4).
            let already_satisfied = mask & current_state_events(unit.state());
            if !already_satisfied.is_empty() {
                request.event_mask = already_satisfied;
                request.complete_ok();
                return Outcome::Processed(request);
            }
            opener.lock().unwrap().event_queue.push_back((mask, request));
            Outcome::Scheduled
        }

        Command::TrackType
        | Command::UntrackType
        | Command::GetTypeStats
        | Command::GetSpecialStats => {
            request.fail(DriverError::NotSupported, Some(WireError::NoCmd));
            Outcome::Processed(request)
        }
    }
}

/// The subset of `Events` the unit's current state machine satisfies right
/// now, independent of any transition just having happened (spec §4.10
/// ON-EVENT's "current state already satisfies" clause). Only ONLINE and
/// OFFLINE correspond to a persisted state; the rest are point-in-time
/// occurrences with nothing to immediately satisfy against.
fn current_state_events(state: UnitState) -> Events {
    if state == UnitState::Online {
        Events::ONLINE
    } else {
        Events::OFFLINE
    }
}

fn dispatch_write(unit: &Unit, mut request: Request) -> Outcome {
    if unit.state() != UnitState::Online {
        request.fail(DriverError::OutOfService, Some(WireError::UnitOffline));
        return Outcome::Processed(request);
    }
    if request.payload.0.is_empty() {
        unit.core.lock().unwrap().diag.tx_dropped += 1;
        request.fail(DriverError::NoResources, Some(WireError::BuffError));
        return Outcome::Processed(request);
    }
    unit.submit_tx(request);
    Outcome::Scheduled
}

/// ADD/DEL-MULTICAST-ADDRESS: a single address carried in `dst_mac`
/// (lower == upper).
fn mcast_single(unit: &Unit, mut request: Request, add: bool) -> Outcome {
    let addr = u48_from_mac(&request.dst_mac);
    let result = if add {
        unit.multicast_add(addr, addr)
    } else {
        unit.multicast_delete(addr, addr)
    };
    match result {
        Ok(()) => request.complete_ok(),
        Err(err) => request.fail(err, None),
    }
    Outcome::Processed(request)
}

/// ADD/DEL-MULTICAST-ADDRESSES: a range, lower in `src_mac`, upper in
/// `dst_mac`.
fn mcast_range(unit: &Unit, mut request: Request, add: bool) -> Outcome {
    let lower = u48_from_mac(&request.src_mac);
    let upper = u48_from_mac(&request.dst_mac);
    if lower > upper {
        request.fail(DriverError::BadArgument, None);
        return Outcome::Processed(request);
    }
    let result = if add {
        unit.multicast_add(lower, upper)
    } else {
        unit.multicast_delete(lower, upper)
    };
    match result {
        Ok(()) => request.complete_ok(),
        Err(err) => request.fail(err, None),
    }
    Outcome::Processed(request)
}

/// Validates a request before it ever reaches `dispatch`: the open-failure
/// checks that session entry points apply uniformly (spec §4.12, §4.13).
pub fn validate_open(unit_number: u32, exclusive_requested: bool, unit_already_open: bool) -> Result<(), OpenFailureReason> {
    if unit_number != 0 {
        return Err(OpenFailureReason::BadUnit);
    }
    if exclusive_requested && unit_already_open {
        return Err(OpenFailureReason::ExclusivityDenied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::mpsc;

    fn unit() -> Unit {
        let (tx, _rx) = mpsc::channel();
        Unit::new(
            Box::new(crate::hw::tests::FakeHardware::default()),
            Config::default(),
            [0x02, 0, 0, 0, 0, 1],
            tx,
        )
    }

    #[test]
    fn flush_is_processed_synchronously() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        let request = Request::new(1, Command::Flush, Flags::empty());
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => assert_eq!(r.status, request::RequestStatus::Completed),
            Outcome::Scheduled => panic!("FLUSH should complete synchronously"),
        }
    }

    #[test]
    fn write_while_offline_fails_with_unit_offline() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        let mut request = Request::new(1, Command::Write, Flags::empty());
        request.payload = Payload(vec![1, 2, 3]);
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => {
                assert_eq!(r.wire_error, Some(WireError::UnitOffline));
            }
            Outcome::Scheduled => panic!("offline WRITE should fail synchronously"),
        }
    }

    #[test]
    fn empty_write_via_mailbox_path_increments_tx_dropped() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        unit.online().unwrap();
        let request = Request::new(1, Command::Write, Flags::empty());
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => assert_eq!(r.wire_error, Some(WireError::BuffError)),
            Outcome::Scheduled => panic!("empty WRITE should fail synchronously"),
        }
        assert_eq!(unit.diag().tx_dropped, 1);
    }

    #[test]
    fn multicast_command_follows_the_write_path() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        let mut request = Request::new(1, Command::Multicast, Flags::empty());
        request.payload = Payload(vec![1, 2, 3]);
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => assert_eq!(r.wire_error, Some(WireError::UnitOffline)),
            Outcome::Scheduled => panic!("MULTICAST while offline should fail synchronously"),
        }
    }

    #[test]
    fn write_while_online_is_scheduled() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        unit.online().unwrap();
        let mut request = Request::new(1, Command::Write, Flags::empty());
        request.dst_mac = [0xaa; 6];
        request.packet_type = ETHERTYPE_IP;
        request.payload = Payload(vec![1, 2, 3, 4]);
        match dispatch(&unit, &opener, request) {
            Outcome::Scheduled => {}
            Outcome::Processed(_) => panic!("online WRITE should be scheduled onto the ring"),
        }
    }

    #[test]
    fn legacy_commands_are_explicitly_rejected() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        let request = Request::new(1, Command::GetTypeStats, Flags::empty());
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => {
                assert_eq!(r.error, Some(DriverError::NotSupported));
                assert_eq!(r.wire_error, Some(WireError::NoCmd));
            }
            Outcome::Scheduled => panic!("legacy commands complete synchronously"),
        }
    }

    #[test]
    fn add_multicast_address_updates_the_range_set() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        let mut request = Request::new(1, Command::AddMulticastAddress, Flags::empty());
        request.dst_mac = [0, 0, 0, 0, 0, 5];
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => assert_eq!(r.status, request::RequestStatus::Completed),
            Outcome::Scheduled => panic!("multicast add completes synchronously"),
        }
    }

    #[test]
    fn online_reports_event_only_on_first_transition() {
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();

        opener
            .lock()
            .unwrap()
            .event_queue
            .push_back((Events::ONLINE, Request::new(1, Command::OnEvent, Flags::empty())));

        let request = Request::new(1, Command::Online, Flags::empty());
        dispatch(&unit, &opener, request);
        assert!(opener.lock().unwrap().event_queue.is_empty(), "ONLINE event should have matched");

        opener
            .lock()
            .unwrap()
            .event_queue
            .push_back((Events::ONLINE, Request::new(1, Command::OnEvent, Flags::empty())));
        let request = Request::new(1, Command::Online, Flags::empty());
        dispatch(&unit, &opener, request);
        assert_eq!(
            opener.lock().unwrap().event_queue.len(),
            1,
            "second ONLINE is a no-op, no event fired"
        );
    }

    #[test]
    fn on_event_replies_immediately_when_already_satisfied() {
        // spec §8 scenario 4: subscribing to ONLINE while already ONLINE
        // replies right away instead of queueing.
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        unit.online().unwrap();

        let mut request = Request::new(1, Command::OnEvent, Flags::empty());
        request.event_mask = Events::ONLINE;
        match dispatch(&unit, &opener, request) {
            Outcome::Processed(r) => {
                assert_eq!(r.status, request::RequestStatus::Completed);
                assert_eq!(r.event_mask, Events::ONLINE);
            }
            Outcome::Scheduled => panic!("already-satisfied ON-EVENT should reply immediately"),
        }
        assert!(opener.lock().unwrap().event_queue.is_empty());
    }

    #[test]
    fn on_event_for_offline_queues_while_online() {
        // spec §8 scenario 4: ON-EVENT(OFFLINE) while ONLINE queues, and a
        // subsequent OFFLINE command delivers it.
        let unit = unit();
        let opener = unit.add_opener(false, false).unwrap();
        unit.configure([0x02, 0, 0, 0, 0, 2]).unwrap();
        unit.online().unwrap();

        let mut request = Request::new(1, Command::OnEvent, Flags::empty());
        request.event_mask = Events::OFFLINE;
        match dispatch(&unit, &opener, request) {
            Outcome::Scheduled => {}
            Outcome::Processed(_) => panic!("ON-EVENT(OFFLINE) while ONLINE should queue"),
        }

        let offline_request = Request::new(1, Command::Offline, Flags::empty());
        dispatch(&unit, &opener, offline_request);
        assert!(
            opener.lock().unwrap().event_queue.is_empty(),
            "OFFLINE command should have delivered the queued event"
        );
    }
}
