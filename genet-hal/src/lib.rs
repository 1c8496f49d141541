// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level access to the Broadcom GENET v5 MAC: MMIO primitives
//! (spec §4.1), the MDIO transactor (spec §4.2), and MAC bring-up/teardown
//! plus RX-mode programming (spec §4.4, §4.5).

pub mod mac;
pub mod mdio;
pub mod mmio;
pub mod regs;

pub use mac::{Coalesce, MacError};
pub use mdio::Mdio;
pub use mmio::{MmioError, MmioRegion};
