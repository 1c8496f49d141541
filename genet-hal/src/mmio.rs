// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed little-endian 32-bit MMIO access with a microsecond busy-wait
//! derived from a free-running counter (spec §4.1).
//!
//! The GENET register set is little-endian regardless of host byte order.
//! On the little-endian host this driver actually runs on, the swap is a
//! no-op; the abstraction stays in place so the accessor is host-agnostic.

use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum MmioError {
    #[error("timed out waiting for register {reg:#x} mask {mask:#x} to reach {want_set}")]
    WaitTimeout {
        reg: usize,
        mask: u32,
        want_set: bool,
    },
}

/// A mapped block of 32-bit registers, accessed relative to a base
/// pointer. Construction is unsafe because the caller must guarantee the
/// region is actually mapped MMIO for as long as this value lives.
pub struct MmioRegion {
    base: *mut u8,
}

unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// # Safety
    /// `base` must point at a valid, mapped register block at least
    /// `len` bytes long, and no other code may concurrently alias it
    /// without the same discipline this type uses (relaxed vs barriered
    /// accessors).
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    /// Reads a 32-bit register with no reordering barrier.
    pub fn read_relaxed(&self, offset: usize) -> u32 {
        let v = unsafe { std::ptr::read_volatile(self.base.add(offset) as *const u32) };
        u32::from_le(v)
    }

    /// Writes a 32-bit register with no reordering barrier.
    pub fn write_relaxed(&self, offset: usize, value: u32) {
        unsafe {
            std::ptr::write_volatile(self.base.add(offset) as *mut u32, value.to_le());
        }
    }

    /// Reads a 32-bit register with a barrier sufficient for ordering
    /// against other MMIO and memory accesses on this platform.
    pub fn read(&self, offset: usize) -> u32 {
        let v = self.read_relaxed(offset);
        fence(Ordering::Acquire);
        v
    }

    /// Writes a 32-bit register with a barrier sufficient for ordering
    /// against other MMIO and memory accesses on this platform.
    pub fn write(&self, offset: usize, value: u32) {
        fence(Ordering::Release);
        self.write_relaxed(offset, value);
    }

    /// Read-modify-write a register using a barriered read and write.
    pub fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let v = self.read(offset);
        self.write(offset, f(v));
    }

    pub fn set_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v | mask);
    }

    pub fn clear_bits(&self, offset: usize, mask: u32) {
        self.modify(offset, |v| v & !mask);
    }

    /// Polls `offset` at 1us granularity until `mask` is set (or clear, if
    /// `want_set` is false), or `deadline` elapses.
    pub fn wait_for_bits(
        &self,
        offset: usize,
        mask: u32,
        want_set: bool,
        deadline: Duration,
    ) -> Result<(), MmioError> {
        let start = Instant::now();
        loop {
            let v = self.read(offset);
            let set = v & mask == mask;
            if set == want_set {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(MmioError::WaitTimeout {
                    reg: offset,
                    mask,
                    want_set,
                });
            }
            busy_wait_us(1);
        }
    }
}

/// Busy-waits for at least `us` microseconds using a monotonic clock.
///
/// The original design reads a free-running hardware counter and compares
/// in its native domain to tolerate wraparound; `Instant` already gives us
/// a monotonic, wraparound-free clock on a hosted target, so this is the
/// host-appropriate equivalent of that primitive.
pub fn busy_wait_us(us: u64) {
    let deadline = Instant::now() + Duration::from_micros(us);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_bits_round_trip() {
        let mut backing = [0u32; 4];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        region.set_bits(0, 0b1010);
        assert_eq!(region.read(0), 0b1010);
        region.clear_bits(0, 0b0010);
        assert_eq!(region.read(0), 0b1000);
    }

    #[test]
    fn wait_for_bits_times_out() {
        let mut backing = [0u32; 4];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        let result = region.wait_for_bits(0, 0b1, true, Duration::from_millis(2));
        assert!(result.is_err());
    }

    #[test]
    fn wait_for_bits_succeeds_once_set() {
        let mut backing = [0u32; 4];
        backing[0] = 0b1;
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8) };
        assert!(region
            .wait_for_bits(0, 0b1, true, Duration::from_millis(10))
            .is_ok());
    }
}
