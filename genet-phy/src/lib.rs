// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generic PHY configuration and link polling, reached over MDIO.
//!
//! This targets IEEE 802.3 clause 22 register space only, which is what
//! every PHY this driver is expected to meet on a Raspberry Pi 4 carrier
//! speaks. There is no vendor-specific paging here (unlike the VSC7448/
//! VSC85xx parts, which page extended registers) -- just the standard
//! BMCR/BMSR/ADVERTISE/LPA/CTRL1000/STAT1000/ESTATUS set.

mod phy;
mod registers;

pub use phy::{Phy, PhyRw};
pub use registers::*;

use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum PhyError {
    #[error("mdio transaction timed out")]
    MdioTimeout,
    #[error("phy reset did not complete within its deadline")]
    ResetTimeout,
    #[error("link did not come up within {0:?}")]
    LinkTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Mbps10,
    Mbps100,
    Mbps1000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// A PHY descriptor: address on the MDIO bus plus the identity read back
/// during `phy_create`.
#[derive(Debug, Clone, Copy)]
pub struct PhyDescriptor {
    pub addr: u8,
    pub id: u32,
}

/// Allocates a PHY descriptor, reads PHYID1/PHYID2, and issues a soft reset
/// (spec §4.3). Polls BMCR_RESET for up to 500ms for auto-clear.
pub fn phy_create<P: PhyRw>(rw: &mut P, addr: u8) -> Result<PhyDescriptor, PhyError> {
    let mut phy = Phy { port: addr, rw };

    let id1 = phy.read(PHYID1)?;
    let id2 = phy.read(PHYID2)?;
    let id = ((id1 as u32) << 16) | id2 as u32;

    phy.write(BMCR, BMCR_RESET)?;
    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        let bmcr = phy.read(BMCR)?;
        if bmcr & BMCR_RESET == 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(PhyError::ResetTimeout);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    Ok(PhyDescriptor { addr, id })
}

/// Masks the advertised set against what's requested, writes ADVERTISE and
/// CTRL1000 only if they actually need to change, and restarts
/// auto-negotiation only on an actual change (spec §4.3).
pub fn phy_config<P: PhyRw>(
    rw: &mut P,
    phy: &PhyDescriptor,
    advertise_1000: bool,
) -> Result<(), PhyError> {
    let mut phy_handle = Phy { port: phy.addr, rw };

    let want_advertise = ADVERTISE_10HALF
        | ADVERTISE_10FULL
        | ADVERTISE_100HALF
        | ADVERTISE_100FULL
        | ADVERTISE_CSMA;
    let cur_advertise = phy_handle.read(ADVERTISE)?;
    let mut changed = cur_advertise != want_advertise;
    if changed {
        phy_handle.write(ADVERTISE, want_advertise)?;
    }

    let want_ctrl1000 = if advertise_1000 {
        CTRL1000_FULL
    } else {
        0
    };
    let cur_ctrl1000 = phy_handle.read(CTRL1000)?;
    if cur_ctrl1000 != want_ctrl1000 {
        phy_handle.write(CTRL1000, want_ctrl1000)?;
        changed = true;
    }

    if changed {
        phy_handle.modify(BMCR, |v| *v |= BMCR_ANENABLE | BMCR_ANRESTART)?;
    }

    Ok(())
}

/// Link status resulting from a successful `phy_startup`.
#[derive(Debug, Clone, Copy)]
pub struct LinkStatus {
    pub speed: Speed,
    pub duplex: Duplex,
}

/// Polls BMSR for link + autoneg-complete at 50ms intervals up to
/// `timeout` (default 4s), then parses speed/duplex out of
/// STAT1000/LPA/ADVERTISE/ESTATUS (spec §4.3).
pub fn phy_startup<P: PhyRw>(
    rw: &mut P,
    phy: &PhyDescriptor,
    timeout: Duration,
) -> Result<LinkStatus, PhyError> {
    let mut phy_handle = Phy { port: phy.addr, rw };
    let deadline = Instant::now() + timeout;
    loop {
        let bmsr = phy_handle.read(BMSR)?;
        if bmsr & BMSR_LSTATUS != 0 && bmsr & BMSR_ANEGCOMPLETE != 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(PhyError::LinkTimeout(timeout));
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let stat1000 = phy_handle.read(STAT1000)?;
    if stat1000 & (STAT1000_LOCAL_FULL | STAT1000_LOCAL_HALF) != 0 {
        let duplex = if stat1000 & STAT1000_LOCAL_FULL != 0 {
            Duplex::Full
        } else {
            Duplex::Half
        };
        return Ok(LinkStatus {
            speed: Speed::Mbps1000,
            duplex,
        });
    }

    let lpa = phy_handle.read(LPA)?;
    let advertise = phy_handle.read(ADVERTISE)?;
    let common = lpa & advertise;
    let (speed, duplex) = if common & ADVERTISE_100FULL != 0 {
        (Speed::Mbps100, Duplex::Full)
    } else if common & ADVERTISE_100HALF != 0 {
        (Speed::Mbps100, Duplex::Half)
    } else if common & ADVERTISE_10FULL != 0 {
        (Speed::Mbps10, Duplex::Full)
    } else {
        (Speed::Mbps10, Duplex::Half)
    };

    Ok(LinkStatus { speed, duplex })
}

/// Re-polls BMSR for a link-state transition after ONLINE (REDESIGN FLAG:
/// the original marked this TODO; this driver polls it on the stats tick
/// and the unit task turns a transition into a HARDWARE event).
pub fn phy_poll_link<P: PhyRw>(rw: &mut P, phy: &PhyDescriptor) -> Result<bool, PhyError> {
    let mut phy_handle = Phy { port: phy.addr, rw };
    let bmsr = phy_handle.read(BMSR)?;
    Ok(bmsr & BMSR_LSTATUS != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakePhy {
        regs: HashMap<u8, u16>,
    }

    impl FakePhy {
        fn new() -> Self {
            let mut regs = HashMap::new();
            regs.insert(PHYID1, 0x0022);
            regs.insert(PHYID2, 0x1640);
            regs.insert(BMCR, 0);
            regs.insert(BMSR, BMSR_LSTATUS | BMSR_ANEGCOMPLETE);
            regs.insert(ADVERTISE, 0);
            regs.insert(LPA, ADVERTISE_100FULL);
            regs.insert(CTRL1000, 0);
            regs.insert(STAT1000, 0);
            Self { regs }
        }
    }

    impl PhyRw for FakePhy {
        fn read_raw(&mut self, _phy: u8, reg: u8) -> Result<u16, PhyError> {
            Ok(*self.regs.get(&reg).unwrap_or(&0))
        }

        fn write_raw(&mut self, _phy: u8, reg: u8, value: u16) -> Result<(), PhyError> {
            if reg == BMCR && value & BMCR_RESET != 0 {
                // Reset self-clears immediately in the fake.
                self.regs.insert(BMCR, 0);
            } else {
                self.regs.insert(reg, value);
            }
            Ok(())
        }
    }

    #[test]
    fn create_reads_id_and_clears_reset() {
        let mut fake = FakePhy::new();
        let desc = phy_create(&mut fake, 1).unwrap();
        assert_eq!(desc.id, 0x00221640);
    }

    #[test]
    fn config_only_restarts_autoneg_on_change() {
        let mut fake = FakePhy::new();
        let desc = phy_create(&mut fake, 1).unwrap();
        phy_config(&mut fake, &desc, false).unwrap();
        let bmcr = fake.regs[&BMCR];
        assert_ne!(bmcr & BMCR_ANRESTART, 0);
    }

    #[test]
    fn startup_reports_100_full_from_common_advertisement() {
        let mut fake = FakePhy::new();
        let desc = phy_create(&mut fake, 1).unwrap();
        fake.regs.insert(ADVERTISE, ADVERTISE_100FULL);
        let status = phy_startup(&mut fake, &desc, Duration::from_millis(10)).unwrap();
        assert_eq!(status.speed, Speed::Mbps100);
        assert_eq!(status.duplex, Duplex::Full);
    }
}
