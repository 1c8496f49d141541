// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device: the process-wide singleton that owns at most one `Unit`
//! (spec §3, §4.12). Mirrors the host's generic device/library loader's
//! open/close/expunge contract (spec §1's "out of scope, referenced by
//! contract only") without reproducing the loader itself.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::error::{DriverError, DriverResult, OpenFailureReason};
use crate::hw::Hardware;
use crate::request::{Command, Flags, Request};
use crate::unit::{OpenerHandle, Unit};

struct DeviceInner {
    unit: Option<Arc<Unit>>,
    task: Option<JoinHandle<()>>,
    open_count: u32,
    expunge_requested: bool,
}

/// One client's handle on the device (spec §3 Opener, §4.12 per-request
/// entry point). Bundles the unit and the opener this session owns so the
/// caller can submit requests without going back through `Device`.
pub struct Session {
    pub unit: Arc<Unit>,
    pub opener: OpenerHandle,
    pub opener_id: u64,
}

impl Session {
    /// Per-request entry point (spec §4.12): WRITE/BROADCAST try the TX
    /// ring directly; READ tries this opener's own lock; everything else,
    /// and anything that loses its fast-path try-lock, goes to the
    /// mailbox for the unit task to dispatch.
    pub fn submit(&self, request: Request) {
        match request.command {
            Command::Write | Command::Broadcast => {
                match dispatch_fast_write(&self.unit, request) {
                    Ok(()) => {}
                    Err(request) => {
                        let _ = self.unit.mailbox().send(request);
                    }
                }
            }
            Command::Read => {
                if let Ok(mut guard) = self.opener.try_lock() {
                    queue_read(&mut guard, request);
                } else {
                    let _ = self.unit.mailbox().send(request);
                }
            }
            _ => {
                let _ = self.unit.mailbox().send(request);
            }
        }
    }

    /// Best-effort abort (spec §4.12): only succeeds while the request is
    /// still waiting in one of this opener's software queues.
    pub fn abort(&self, _request_id: u64) {
        // Requests carry no stable identity beyond the object itself once
        // queued (spec §9 Open Question), so abort here is a coarse flush
        // of this opener's queues rather than a single-request cancel.
        let drained = self.opener.lock().unwrap().flush();
        for request in drained {
            request.reply();
        }
    }
}

fn dispatch_fast_write(unit: &Arc<Unit>, request: Request) -> Result<(), Request> {
    use crate::unit::TxOutcome;
    if unit.state() != crate::unit::UnitState::Online {
        let mut request = request;
        request.fail(DriverError::OutOfService, Some(crate::error::WireError::UnitOffline));
        request.reply();
        return Ok(());
    }
    match unit.tx_poll(request) {
        TxOutcome::OnRing => Ok(()),
        TxOutcome::NeedsMailbox(request) => Err(request),
    }
}

fn queue_read(opener: &mut crate::opener::Opener, request: Request) {
    use crate::request::{ETHERTYPE_ARP, ETHERTYPE_IP};
    match request.packet_type {
        ETHERTYPE_IP => opener.ip_queue.push_back(request),
        ETHERTYPE_ARP => opener.arp_queue.push_back(request),
        _ => opener.read_queue.push_back(request),
    }
}

/// The device singleton (spec §3 Device).
pub struct Device {
    inner: Mutex<DeviceInner>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DeviceInner {
                unit: None,
                task: None,
                open_count: 0,
                expunge_requested: false,
            }),
        }
    }

    /// Open: validates the unit number, lazily brings the `Unit` up on
    /// first open, and links a new opener (spec §4.12 open).
    pub fn open(
        &self,
        unit_number: u32,
        flags: Flags,
        hw_factory: impl FnOnce() -> Box<dyn Hardware>,
        config: Config,
        hardware_mac: [u8; 6],
    ) -> DriverResult<Session> {
        let exclusive = flags.contains(Flags::EXCLUSIVE);
        let prom = flags.contains(Flags::PROM);

        let unit = {
            let mut inner = self.inner.lock().unwrap();
            if unit_number != 0 {
                return Err(DriverError::OpenFailure(OpenFailureReason::BadUnit));
            }
            if inner.expunge_requested {
                return Err(DriverError::OpenFailure(OpenFailureReason::ResourceExhaustion));
            }
            if inner.unit.is_none() {
                let (tx, rx) = mpsc::channel();
                let unit = Arc::new(Unit::new(hw_factory(), config, hardware_mac, tx));
                let task = crate::unit_task::spawn(unit.clone(), rx);
                inner.unit = Some(unit);
                inner.task = Some(task);
            }
            inner.unit.clone().unwrap()
        };

        let opener = unit.add_opener(exclusive, prom)?;
        let opener_id = opener.lock().unwrap().id;

        let mut inner = self.inner.lock().unwrap();
        inner.open_count += 1;

        Ok(Session {
            unit,
            opener,
            opener_id,
        })
    }

    /// Close: unlinks the opener, replies its drained requests ABORTED,
    /// and tears the unit down once the open count reaches zero (spec
    /// §4.12 close).
    pub fn close(&self, session: Session) {
        let drained = session.unit.remove_opener(session.opener_id);
        for request in drained {
            request.reply();
        }

        let mut inner = self.inner.lock().unwrap();
        inner.open_count = inner.open_count.saturating_sub(1);
        if inner.open_count == 0 {
            session.unit.offline();
            if inner.expunge_requested {
                teardown(&mut inner);
            }
        }
    }

    /// Expunge: tears down immediately if nothing has the unit open,
    /// otherwise defers until the open count reaches zero (spec §4.12
    /// expunge).
    pub fn expunge(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.open_count > 0 {
            inner.expunge_requested = true;
            false
        } else {
            teardown(&mut inner);
            true
        }
    }

    pub fn open_count(&self) -> u32 {
        self.inner.lock().unwrap().open_count
    }
}

fn teardown(inner: &mut DeviceInner) {
    if let Some(unit) = &inner.unit {
        unit.cancel();
    }
    if let Some(task) = inner.task.take() {
        let _ = task.join();
    }
    inner.unit = None;
}
