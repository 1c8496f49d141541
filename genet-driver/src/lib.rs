// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet-plane core for the GENET v5 driver: TX/RX ring engines, the
//! opener table and fan-out, the command dispatcher, the unit task poll
//! loop, and the device/session entry points. `genet-hal`/`genet-phy`
//! provide the register-level primitives this crate drives through the
//! `hw::Hardware` seam.

pub mod config;
pub mod device;
pub mod diagring;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod hw;
pub mod multicast;
pub mod opener;
pub mod request;
pub mod stats;
pub mod unit;
pub mod unit_task;

pub use config::Config;
pub use device::{Device, Session};
pub use error::{DriverError, DriverResult, OpenFailureReason, WireError};
pub use hw::{GenetHardware, Hardware};
pub use request::{Command, Events, Flags, Payload, Request, RequestStatus};
pub use unit::{Unit, UnitState};
