// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The unit task: the single control thread that drives poll-based
//! servicing (spec §4.11, §5 substrate note). There is no interrupt in this
//! environment, so RX draining, TX reclaim, and mailbox dispatch all happen
//! on this one thread's cadence, paced by `Backoff`.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dispatch::{self, Outcome};
use crate::error::DriverError;
use crate::request::Request;
use crate::unit::Unit;

const STATS_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Two-tier adaptive poll-delay ladder (spec §4.11 supplemental, from
/// `original_source/unit_task.c`'s packet-timer handler).
pub struct Backoff {
    delays: Vec<u32>,
    index: usize,
}

impl Backoff {
    pub fn new(mut delays: Vec<u32>) -> Self {
        if delays.is_empty() {
            delays = vec![1000];
        }
        Self { delays, index: 0 }
    }

    pub fn current(&self) -> Duration {
        Duration::from_micros(self.delays[self.index] as u64)
    }

    /// Resets to the fast (first) entry: called whenever a tick did
    /// anything (RX delivered, TX reclaimed, a mailbox request arrived).
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Advances one step toward the slow end: called on a fully idle tick.
    pub fn advance(&mut self) {
        if self.index + 1 < self.delays.len() {
            self.index += 1;
        }
    }

    /// Holds the delay at the ladder's second entry (not the slowest)
    /// whenever TX descriptors are still outstanding, so a loaded ring
    /// keeps draining promptly even while RX stays quiet.
    pub fn cap_while_tx_outstanding(&mut self) {
        let cap = (self.delays.len() - 1).min(1);
        if self.index > cap {
            self.index = cap;
        }
    }
}

/// Spawns the unit task thread. The task exits either when its mailbox
/// disconnects or when `Unit::cancel` is set (spec §4.11 step 6); the latter
/// is the path `teardown` actually relies on, since the task's own `Arc<Unit>`
/// keeps the mailbox `Sender` alive for as long as the task runs.
pub fn spawn(unit: Arc<Unit>, mailbox: Receiver<Request>) -> JoinHandle<()> {
    let stack_size = unit.core.lock().unwrap().config.unit_stack_size.max(16 * 1024) as usize;
    std::thread::Builder::new()
        .name("genet-unit-task".into())
        .stack_size(stack_size)
        .spawn(move || run(&unit, &mailbox))
        .expect("spawning the unit task thread failed")
}

fn run(unit: &Arc<Unit>, mailbox: &Receiver<Request>) {
    let mut backoff = Backoff::new(unit.poll_delay_ladder());
    let mut last_stats_tick = Instant::now();
    log::info!("unit task started");

    loop {
        if unit.is_cancelled() {
            log::info!("unit task cancelled, exiting");
            return;
        }

        let delay = backoff.current();
        let mut activity = false;

        match mailbox.recv_timeout(delay) {
            Ok(request) => {
                activity = true;
                handle_mailbox_request(unit, request);
                while let Ok(request) = mailbox.try_recv() {
                    handle_mailbox_request(unit, request);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("unit task mailbox closed, exiting");
                return;
            }
        }

        if unit.is_cancelled() {
            log::info!("unit task cancelled, exiting");
            return;
        }

        if unit.poll_rx() {
            activity = true;
        }
        if unit.reclaim() > 0 {
            activity = true;
        }
        if unit.drain_pending_tx() > 0 {
            activity = true;
        }
        if let Some(events) = unit.poll_link() {
            unit.report_events(events);
            activity = true;
        }

        if activity {
            backoff.reset();
        } else {
            backoff.advance();
        }
        if unit.pending_tx_len() > 0 {
            backoff.cap_while_tx_outstanding();
        }

        if last_stats_tick.elapsed() >= STATS_TICK_INTERVAL {
            last_stats_tick = Instant::now();
            let stats = unit.stats();
            log::info!(
                "stats tick: tx_packets={} rx_packets={} tx_bytes={} rx_bytes={} pending_tx={}",
                stats.packets_sent,
                stats.packets_received,
                stats.bytes_sent,
                stats.bytes_received,
                unit.pending_tx_len(),
            );
        }
    }
}

fn handle_mailbox_request(unit: &Unit, mut request: Request) {
    let Some(opener) = unit.find_opener(request.opener_id) else {
        request.fail(DriverError::Aborted, None);
        request.reply();
        return;
    };
    match dispatch::dispatch(unit, &opener, request) {
        Outcome::Processed(request) => request.reply(),
        Outcome::Scheduled => {}
    }
}
