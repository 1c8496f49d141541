// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MAC bring-up/teardown (spec §4.4) and RX-mode / MDF filter programming
//! (spec §4.5).

use std::time::Duration;

use crate::mmio::MmioRegion;
use crate::regs::{rdma, ring, rev_major, sys, tdma, umac};

const RESET_TIMEOUT: Duration = Duration::from_millis(200);
const DMA_DISABLE_TIMEOUT: Duration = Duration::from_millis(10);
const RX_DISABLE_SETTLE: Duration = Duration::from_millis(1);

/// RX coalescing parameters programmed at `start` (spec §4.4); these are
/// the only tunables exposed to clients via the coalesce command.
#[derive(Debug, Clone, Copy)]
pub struct Coalesce {
    pub max_frames: u32,
    pub timeout_us: u32,
}

impl Default for Coalesce {
    fn default() -> Self {
        Self {
            max_frames: 1,
            timeout_us: 50,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MacError {
    #[error("unsupported hardware revision {0:#x}")]
    UnsupportedRevision(u32),
    #[error("mmio timeout: {0}")]
    Mmio(#[from] crate::mmio::MmioError),
    #[error("too many multicast addresses for MDF capacity ({0} needed, {1} available)")]
    MdfOverflow(usize, usize),
}

/// Validates the HW revision register and normalizes 5/6/7 to v5,
/// rejecting anything else (spec §4.4).
pub fn probe(regs: &MmioRegion) -> Result<(), MacError> {
    let rev = regs.read(sys::REV_CTRL);
    let major = rev_major(rev);
    if !matches!(major, 5 | 6 | 7) {
        return Err(MacError::UnsupportedRevision(major));
    }
    // External PHY port mode: RGMII.
    regs.write(sys::PORT_CTRL, 0x2);
    regs.set_bits(umac::CMD, umac::CMD_SW_RESET);
    regs.clear_bits(umac::CMD, umac::CMD_SW_RESET);
    Ok(())
}

/// Performs a UMAC software reset and writes the station MAC address.
pub fn umac_reset(regs: &MmioRegion) -> Result<(), MacError> {
    regs.set_bits(umac::CMD, umac::CMD_SW_RESET);
    regs.wait_for_bits(umac::CMD, umac::CMD_SW_RESET, false, RESET_TIMEOUT)?;
    Ok(())
}

pub fn write_station_mac(regs: &MmioRegion, mac: [u8; 6]) {
    let mac0 = u32::from_be_bytes([mac[0], mac[1], mac[2], mac[3]]);
    let mac1 = u32::from_be_bytes([mac[4], mac[5], 0, 0]) >> 16;
    regs.write(umac::MAC0, mac0);
    regs.write(umac::MAC1, mac1 & 0xffff);
}

/// Initializes the TDMA/RDMA ring for the default queue. Producer and
/// consumer indices are aligned against whatever hardware already reports
/// rather than zeroed, since this MAC may have been left running by a
/// previous owner (bootloader, prior driver instance).
pub fn init_ring(regs: &MmioRegion, queue: usize, start: u32, end: u32) {
    let base = tdma::RINGS_BASE;
    regs.write(base + ring::offset(queue, ring::START_ADDR), start);
    regs.write(base + ring::offset(queue, ring::END_ADDR), end);
    let hw_prod = regs.read(base + ring::offset(queue, ring::PROD_INDEX));
    regs.write(base + ring::offset(queue, ring::CONS_INDEX), hw_prod);

    let rbase = rdma::RINGS_BASE;
    regs.write(rbase + ring::offset(queue, ring::START_ADDR), start);
    regs.write(rbase + ring::offset(queue, ring::END_ADDR), end);
    let hw_cons = regs.read(rbase + ring::offset(queue, ring::CONS_INDEX));
    regs.write(rbase + ring::offset(queue, ring::PROD_INDEX), hw_cons);
}

/// Programs RX coalescing for the default queue (spec §4.4).
pub fn program_coalesce(regs: &MmioRegion, queue: usize, coalesce: Coalesce) {
    let base = rdma::RINGS_BASE;
    regs.write(
        base + ring::offset(queue, ring::MBUF_DONE_THRESH),
        coalesce.max_frames,
    );
    regs.write(
        base + ring::offset(queue, ring::FLOW_PERIOD),
        coalesce.timeout_us,
    );
}

pub fn set_speed(regs: &MmioRegion, speed_code: u32, full_duplex: bool) {
    regs.modify(umac::CMD, |v| {
        let mut v = v & !umac::CMD_SPEED_MASK;
        v |= (speed_code << umac::CMD_SPEED_SHIFT) & umac::CMD_SPEED_MASK;
        if full_duplex {
            v & !umac::CMD_HD_EN
        } else {
            v | umac::CMD_HD_EN
        }
    });
}

pub fn enable_tx_rx(regs: &MmioRegion, queue: usize) {
    regs.set_bits(tdma::CTRL, 1 << queue | tdma::CTRL_EN);
    regs.set_bits(rdma::CTRL, 1 << queue | rdma::CTRL_EN);
    regs.set_bits(umac::CMD, umac::CMD_TX_EN | umac::CMD_RX_EN);
}

/// Tears down TX/RX and DMA in the order spec §4.4 requires: RX-enable
/// clears first, settles, DMA disables with a bounded poll, then
/// TX-enable clears. The caller is responsible for reclaiming any
/// in-flight TX descriptors afterward.
pub fn stop(regs: &MmioRegion, queue: usize) -> Result<(), MacError> {
    regs.clear_bits(umac::CMD, umac::CMD_RX_EN);
    crate::mmio::busy_wait_us(RX_DISABLE_SETTLE.as_micros() as u64);
    regs.clear_bits(rdma::CTRL, 1 << queue);
    regs.wait_for_bits(rdma::CTRL, 1 << queue, false, DMA_DISABLE_TIMEOUT)?;
    regs.clear_bits(umac::CMD, umac::CMD_TX_EN);
    regs.clear_bits(tdma::CTRL, 1 << queue);
    regs.wait_for_bits(tdma::CTRL, 1 << queue, false, DMA_DISABLE_TIMEOUT)?;
    Ok(())
}

/// RX-mode programming (spec §4.5). `addresses` is broadcast, then self,
/// then each multicast address the caller has already enumerated by
/// walking its registered ranges.
pub fn program_rx_mode(regs: &MmioRegion, promiscuous: bool, addresses: &[[u8; 6]]) -> Result<(), MacError> {
    if promiscuous || addresses.len() > umac::MDF_MAX_SLOTS {
        // Overflow forces promiscuous even if the opener didn't ask for it.
        regs.set_bits(umac::CMD, umac::CMD_PROMISC);
        regs.write(umac::MDF_CTRL, 0);
        return Ok(());
    }

    regs.clear_bits(umac::CMD, umac::CMD_PROMISC);
    let mut enabled_mask = 0u32;
    for (slot, addr) in addresses.iter().enumerate() {
        let hi = u32::from_be_bytes([0, 0, addr[0], addr[1]]);
        let lo = u32::from_be_bytes([addr[2], addr[3], addr[4], addr[5]]);
        regs.write(umac::MDF_ADDR_BASE + slot * 8, hi);
        regs.write(umac::MDF_ADDR_BASE + slot * 8 + 4, lo);
        enabled_mask |= 1 << slot;
    }
    regs.write(umac::MDF_CTRL, enabled_mask);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_rejects_unknown_revision() {
        let mut backing = vec![0u32; 0x900 / 4 + 1];
        backing[sys::REV_CTRL / 4] = 3 << 24;
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        assert!(matches!(probe(&region), Err(MacError::UnsupportedRevision(3))));
    }

    #[test]
    fn probe_accepts_v5_v6_v7() {
        for rev in [5u32, 6, 7] {
            let mut backing = vec![0u32; 0x900 / 4 + 1];
            backing[sys::REV_CTRL / 4] = rev << 24;
            let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
            assert!(probe(&region).is_ok());
        }
    }

    #[test]
    fn write_station_mac_splits_into_mac0_mac1() {
        let mut backing = vec![0u32; 0x900 / 4 + 1];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        write_station_mac(&region, [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(region.read(umac::MAC0), 0x02000000);
        assert_eq!(region.read(umac::MAC1), 0x0001);
    }

    #[test]
    fn program_rx_mode_sets_promiscuous_on_overflow() {
        let mut backing = vec![0u32; 0x900 / 4 + 1];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        let addrs = vec![[0u8; 6]; umac::MDF_MAX_SLOTS + 1];
        program_rx_mode(&region, false, &addrs).unwrap();
        assert_ne!(region.read(umac::CMD) & umac::CMD_PROMISC, 0);
    }

    #[test]
    fn program_rx_mode_writes_mdf_table_when_fits() {
        let mut backing = vec![0u32; 0x900 / 4 + 1];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        let addrs = vec![[0xffu8; 6], [0x02, 0, 0, 0, 0, 1]];
        program_rx_mode(&region, false, &addrs).unwrap();
        assert_eq!(region.read(umac::CMD) & umac::CMD_PROMISC, 0);
        assert_eq!(region.read(umac::MDF_CTRL), 0b11);
    }
}
