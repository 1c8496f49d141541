// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raspberry Pi 4 (BCM2711) glue: locating the GENET and GPIO register
//! blocks and mapping them into this process's address space. Everything
//! above `genet_hal::MmioRegion`/`genet_gpio_api::MmioIo` is platform
//! portable; this module is the only part of the tree that knows it is
//! running on a Pi 4 rather than under a test harness.

use std::fs;
use std::os::unix::io::AsRawFd;

use genet_gpio_api::MmioIo;
use genet_hal::MmioRegion;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("mmap of {region} failed: {source}")]
    Mmap {
        region: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("device tree property {0} is missing or malformed")]
    DeviceTree(&'static str),
}

/// Physical base addresses on the BCM2711, used when the device tree can't
/// be read (e.g. running outside u-boot/Linux's normal boot path). The
/// device tree is still tried first since it is the authoritative source
/// on a real Pi 4 image.
const GENET_BASE_FALLBACK: usize = 0xfd58_0000;
const GENET_LEN: usize = 0x10000;
const GPIO_BASE_FALLBACK: usize = 0xfe20_0000;
const GPIO_LEN: usize = 0x1000;

const GENET_REG_PATH: &str = "/proc/device-tree/soc/genet@fd580000/reg";
const GENET_MAC_PATH: &str = "/proc/device-tree/soc/genet@fd580000/local-mac-address";

/// Reads a `reg` property's first `(address, size)` cell pair, big-endian
/// 64-bit as the device tree always encodes them.
fn read_reg_property(path: &str) -> Option<usize> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 8 {
        return None;
    }
    let mut addr = [0u8; 8];
    addr.copy_from_slice(&bytes[0..8]);
    Some(u64::from_be_bytes(addr) as usize)
}

fn read_mac_property(path: &str) -> Option<[u8; 6]> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 6 {
        return None;
    }
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[0..6]);
    Some(mac)
}

/// Maps `len` bytes of `/dev/mem` at physical address `phys` into this
/// process, returning the mapped pointer.
///
/// # Safety
/// The caller must only use the returned pointer as a GENET or GPIO MMIO
/// region of at least `len` bytes, and must not unmap it while any
/// `MmioRegion`/`MmioIo` built from it is still alive.
unsafe fn map_physical(phys: usize, len: usize, region: &'static str) -> Result<*mut u8, PlatformError> {
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/mem")
        .map_err(|source| PlatformError::Open {
            path: "/dev/mem",
            source,
        })?;

    let page_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
    let aligned_base = phys & !(page_size - 1);
    let offset = phys - aligned_base;
    let map_len = len + offset;

    let ptr = libc::mmap(
        std::ptr::null_mut(),
        map_len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        file.as_raw_fd(),
        aligned_base as libc::off_t,
    );
    if ptr == libc::MAP_FAILED {
        return Err(PlatformError::Mmap {
            region,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok((ptr as *mut u8).add(offset))
}

/// Every register block this task needs mapped, plus the MAC address read
/// from the device tree (or a locally-administered fallback).
pub struct Mapped {
    pub genet: MmioRegion,
    pub gpio: MmioIo,
    pub mac_address: [u8; 6],
}

/// Locates and maps the GENET and GPIO register blocks, and reads the
/// station MAC address, using the device tree where available and the
/// known BCM2711 physical addresses otherwise (spec §6).
pub fn map() -> Result<Mapped, PlatformError> {
    let genet_phys = read_reg_property(GENET_REG_PATH).unwrap_or_else(|| {
        log::warn!(
            "could not read {GENET_REG_PATH}, falling back to hardcoded BCM2711 address {GENET_BASE_FALLBACK:#x}"
        );
        GENET_BASE_FALLBACK
    });

    let mac_address = read_mac_property(GENET_MAC_PATH).unwrap_or_else(|| {
        log::warn!("no local-mac-address property at {GENET_MAC_PATH}, using a locally-administered fallback");
        [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]
    });

    // GPIO's device-tree path varies more across dtb revisions than
    // GENET's; this task only ever runs against one board family, so the
    // fallback constant carries the real weight here.
    let gpio_phys = GPIO_BASE_FALLBACK;

    let genet_ptr = unsafe { map_physical(genet_phys, GENET_LEN, "genet") }?;
    let gpio_ptr = unsafe { map_physical(gpio_phys, GPIO_LEN, "gpio") }?;

    let genet = unsafe { MmioRegion::new(genet_ptr) };
    let gpio = unsafe { MmioIo::new(gpio_ptr) };

    Ok(Mapped {
        genet,
        gpio,
        mac_address,
    })
}

/// Reads a preferences file, falling back to compile-time defaults if it's
/// absent (spec §6: a missing file is not an error).
pub fn load_preferences(path: &str) -> genet_driver::Config {
    match fs::read_to_string(path) {
        Ok(contents) => genet_driver::Config::parse(&contents),
        Err(err) => {
            log::info!("no preferences file at {path} ({err}), using defaults");
            genet_driver::Config::default()
        }
    }
}

#[cfg(not(target_os = "linux"))]
compile_error!("genet-task maps physical memory through /dev/mem and only runs on Linux");
