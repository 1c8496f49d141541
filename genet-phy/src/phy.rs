// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::PhyError;

/// Transports a single MDIO register read/write to a PHY. Implemented by
/// whatever sits on the MDIO bus -- here, the GENET's on-chip MDIO
/// controller (see `genet-hal::mdio`).
pub trait PhyRw {
    fn read_raw(&mut self, phy: u8, reg: u8) -> Result<u16, PhyError>;
    fn write_raw(&mut self, phy: u8, reg: u8, value: u16) -> Result<(), PhyError>;
}

/// Handle for interacting with a particular PHY address.
pub struct Phy<'a, P> {
    pub port: u8,
    pub rw: &'a mut P,
}

impl<P: PhyRw> Phy<'_, P> {
    pub fn read(&mut self, reg: u8) -> Result<u16, PhyError> {
        self.rw.read_raw(self.port, reg)
    }

    pub fn write(&mut self, reg: u8, value: u16) -> Result<(), PhyError> {
        self.rw.write_raw(self.port, reg, value)
    }

    pub fn modify<F: Fn(&mut u16)>(&mut self, reg: u8, f: F) -> Result<(), PhyError> {
        let mut value = self.read(reg)?;
        f(&mut value);
        self.write(reg, value)
    }
}
