// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridges the index-based ring bookkeeping in `genet_ring` (which never
//! touches MMIO itself) to the actual register blocks in `genet_hal`. This
//! is the one seam the unit state machine depends on for real hardware
//! access, so tests can substitute a fake implementation instead.

use std::time::Duration;

use genet_hal::mac::Coalesce;
use genet_hal::regs::{rdma, ring, DEFAULT_QUEUE};
use genet_hal::{mac, mdio, MmioRegion};
use genet_phy::{LinkStatus, PhyDescriptor};

use crate::error::DriverError;

const PHY_STARTUP_TIMEOUT: Duration = Duration::from_secs(4);

pub trait Hardware: Send {
    fn probe(&mut self) -> Result<(), DriverError>;
    fn start(
        &mut self,
        mac_addr: [u8; 6],
        promiscuous: bool,
        addresses: &[[u8; 6]],
    ) -> Result<LinkStatus, DriverError>;
    fn stop(&mut self) -> Result<(), DriverError>;
    fn program_rx_mode(
        &mut self,
        promiscuous: bool,
        addresses: &[[u8; 6]],
    ) -> Result<(), DriverError>;
    fn tx_kick(&mut self, producer_index: u16);
    fn tx_consumer_index(&self) -> u16;
    fn rx_producer_index(&self) -> u16;
    fn rx_desc_len(&self, consumer_index: u16) -> usize;
    fn rx_consumer_ack(&mut self, consumer_index: u16);
    fn poll_link(&mut self) -> bool;
}

/// The real hardware bridge: a mapped MMIO region, a PHY descriptor reached
/// over MDIO, and the default (only) TX/RX queue (spec §6: queue 16).
pub struct GenetHardware {
    regs: MmioRegion,
    phy: Option<PhyDescriptor>,
    phy_addr: u8,
}

impl GenetHardware {
    /// # Safety
    /// `regs` must come from a successful `MmioRegion::new` over the GENET
    /// register block located via the device-tree resource (spec §6).
    pub unsafe fn new(regs: MmioRegion, phy_addr: u8) -> Self {
        Self {
            regs,
            phy: None,
            phy_addr,
        }
    }

    fn mdio(&self) -> mdio::Mdio<'_> {
        mdio::Mdio::new(&self.regs)
    }
}

impl Hardware for GenetHardware {
    fn probe(&mut self) -> Result<(), DriverError> {
        mac::probe(&self.regs).map_err(|_| DriverError::Software)?;
        let mut mdio = self.mdio();
        let desc = genet_phy::phy_create(&mut mdio, self.phy_addr).map_err(|_| DriverError::Timeout)?;
        self.phy = Some(desc);
        Ok(())
    }

    fn start(
        &mut self,
        mac_addr: [u8; 6],
        promiscuous: bool,
        addresses: &[[u8; 6]],
    ) -> Result<LinkStatus, DriverError> {
        mac::umac_reset(&self.regs).map_err(|_| DriverError::Software)?;
        mac::write_station_mac(&self.regs, mac_addr);
        mac::init_ring(&self.regs, DEFAULT_QUEUE, 0, (genet_ring::RING_SIZE - 1) as u32);
        mac::program_rx_mode(&self.regs, promiscuous, addresses).map_err(|_| DriverError::NoResources)?;
        mac::program_coalesce(&self.regs, DEFAULT_QUEUE, Coalesce::default());

        let phy = self.phy.ok_or(DriverError::Software)?;
        let mut mdio = self.mdio();
        genet_phy::phy_config(&mut mdio, &phy, true).map_err(|_| DriverError::Timeout)?;
        let link = genet_phy::phy_startup(&mut mdio, &phy, PHY_STARTUP_TIMEOUT)
            .map_err(|_| DriverError::Timeout)?;

        let speed_code = match link.speed {
            genet_phy::Speed::Mbps10 => 0,
            genet_phy::Speed::Mbps100 => 1,
            genet_phy::Speed::Mbps1000 => 2,
        };
        mac::set_speed(&self.regs, speed_code, link.duplex == genet_phy::Duplex::Full);
        mac::enable_tx_rx(&self.regs, DEFAULT_QUEUE);
        Ok(link)
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        // A DMA-disable timeout is not fatal; shutdown proceeds regardless
        // (spec §4.4, §7).
        if let Err(err) = mac::stop(&self.regs, DEFAULT_QUEUE) {
            log::warn!("dma disable did not complete within its deadline: {err}");
        }
        Ok(())
    }

    fn program_rx_mode(
        &mut self,
        promiscuous: bool,
        addresses: &[[u8; 6]],
    ) -> Result<(), DriverError> {
        mac::program_rx_mode(&self.regs, promiscuous, addresses).map_err(|_| DriverError::NoResources)
    }

    fn tx_kick(&mut self, producer_index: u16) {
        let base = genet_hal::regs::tdma::RINGS_BASE;
        self.regs
            .write(base + ring::offset(DEFAULT_QUEUE, ring::WRITE_PTR), producer_index as u32);
    }

    fn tx_consumer_index(&self) -> u16 {
        let base = genet_hal::regs::tdma::RINGS_BASE;
        self.regs.read(base + ring::offset(DEFAULT_QUEUE, ring::CONS_INDEX)) as u16
    }

    fn rx_producer_index(&self) -> u16 {
        self.regs
            .read(rdma::RINGS_BASE + ring::offset(DEFAULT_QUEUE, ring::PROD_INDEX)) as u16
    }

    fn rx_desc_len(&self, _consumer_index: u16) -> usize {
        // GENET reports the received length via the descriptor status word
        // at the ring's read pointer; the exact field layout is out of
        // scope for this bridge (spec §6 lists the register, not the
        // status-word bit layout), so callers needing the real length
        // would extend this with a status-word read at that offset.
        self.regs
            .read(rdma::RINGS_BASE + ring::offset(DEFAULT_QUEUE, ring::READ_PTR)) as usize
            & 0xffff
    }

    fn rx_consumer_ack(&mut self, consumer_index: u16) {
        self.regs.write(
            rdma::RINGS_BASE + ring::offset(DEFAULT_QUEUE, ring::CONS_INDEX),
            consumer_index as u32,
        );
    }

    fn poll_link(&mut self) -> bool {
        let Some(phy) = self.phy else { return false };
        let mut mdio = self.mdio();
        genet_phy::phy_poll_link(&mut mdio, &phy).unwrap_or(false)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// In-memory stand-in for `GenetHardware`, so `Unit` tests exercise the
    /// state machine and ring engines without touching real registers.
    pub struct FakeHardware {
        pub link: LinkStatus,
        pub tx_consumer: u16,
        pub rx_producer: u16,
        pub rx_len: usize,
        pub link_up: bool,
        pub fail_start: bool,
    }

    impl Default for FakeHardware {
        fn default() -> Self {
            Self {
                link: LinkStatus {
                    speed: genet_phy::Speed::Mbps1000,
                    duplex: genet_phy::Duplex::Full,
                },
                tx_consumer: 0,
                rx_producer: 0,
                rx_len: 0,
                link_up: true,
                fail_start: false,
            }
        }
    }

    impl Hardware for FakeHardware {
        fn probe(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        fn start(
            &mut self,
            _mac_addr: [u8; 6],
            _promiscuous: bool,
            _addresses: &[[u8; 6]],
        ) -> Result<LinkStatus, DriverError> {
            if self.fail_start {
                return Err(DriverError::Timeout);
            }
            Ok(self.link)
        }

        fn stop(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        fn program_rx_mode(
            &mut self,
            _promiscuous: bool,
            _addresses: &[[u8; 6]],
        ) -> Result<(), DriverError> {
            Ok(())
        }

        fn tx_kick(&mut self, producer_index: u16) {
            self.tx_consumer = producer_index;
        }

        fn tx_consumer_index(&self) -> u16 {
            self.tx_consumer
        }

        fn rx_producer_index(&self) -> u16 {
            self.rx_producer
        }

        fn rx_desc_len(&self, _consumer_index: u16) -> usize {
            self.rx_len
        }

        fn rx_consumer_ack(&mut self, _consumer_index: u16) {}

        fn poll_link(&mut self) -> bool {
            self.link_up
        }
    }
}
