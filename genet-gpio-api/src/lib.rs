// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BCM2711 GPIO pin muxing, just the pieces this driver needs to configure
//! MDIO and RGMII pads (spec §6).
//!
//! The BCM2711 GPIO block differs from the STM32 GPIO block this crate's
//! shape is modeled on: there is one bank of up to 58 pins, function select
//! is 3 bits per pin packed 10-to-a-register (`GPFSELn`), and pull
//! configuration uses the newer 2-bit-per-pin `GPIO_PUP_PDN_CNTRL_REGn`
//! scheme rather than the old clock-latched GPPUD/GPPUDCLK pair.

use std::io;

/// Abstracts register access so the pin-configuration logic can be tested
/// without real MMIO.
pub trait RegisterIo {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

/// Volatile MMIO access to the GPIO block at a fixed base address,
/// discovered via the device-tree `reg` property (spec §6).
pub struct MmioIo {
    base: *mut u8,
}

impl MmioIo {
    /// # Safety
    /// `base` must point at a valid, mapped GPIO register block for the
    /// lifetime of this value.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }
}

impl RegisterIo for MmioIo {
    fn read(&self, offset: usize) -> u32 {
        unsafe { std::ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        unsafe { std::ptr::write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl Mode {
    /// 3-bit FSEL field value (BCM2711 GPIO function select encoding).
    fn fsel_bits(self) -> u32 {
        match self {
            Mode::Input => 0b000,
            Mode::Output => 0b001,
            Mode::Alt0 => 0b100,
            Mode::Alt1 => 0b101,
            Mode::Alt2 => 0b110,
            Mode::Alt3 => 0b111,
            Mode::Alt4 => 0b011,
            Mode::Alt5 => 0b010,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

impl Pull {
    fn bits(self) -> u32 {
        match self {
            Pull::None => 0b00,
            Pull::Up => 0b01,
            Pull::Down => 0b10,
        }
    }
}

const GPFSEL0: usize = 0x00;
const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xe4;

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("pin {0} is out of range (0..=57)")]
    BadPin(u8),
}

fn check_pin(pin: u8) -> Result<(), GpioError> {
    if pin > 57 {
        Err(GpioError::BadPin(pin))
    } else {
        Ok(())
    }
}

/// Client handle for the GPIO block.
pub struct Gpio<R> {
    io: R,
}

impl<R: RegisterIo> Gpio<R> {
    pub fn new(io: R) -> Self {
        Self { io }
    }

    /// Sets the function-select field for a single pin.
    pub fn configure_mode(&mut self, pin: u8, mode: Mode) -> Result<(), GpioError> {
        check_pin(pin)?;
        let reg = GPFSEL0 + (pin as usize / 10) * 4;
        let shift = (pin as usize % 10) * 3;
        let mut v = self.io.read(reg);
        v &= !(0b111 << shift);
        v |= mode.fsel_bits() << shift;
        self.io.write(reg, v);
        Ok(())
    }

    /// Sets the pull resistor for a single pin (BCM2711 2-bit-per-pin
    /// scheme, no clock-latch step required).
    pub fn configure_pull(&mut self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        check_pin(pin)?;
        let reg = GPIO_PUP_PDN_CNTRL_REG0 + (pin as usize / 16) * 4;
        let shift = (pin as usize % 16) * 2;
        let mut v = self.io.read(reg);
        v &= !(0b11 << shift);
        v |= pull.bits() << shift;
        self.io.write(reg, v);
        Ok(())
    }

    /// Configures pin mode and pull together, the common case for a single
    /// pad.
    pub fn configure(&mut self, pin: u8, mode: Mode, pull: Pull) -> Result<(), GpioError> {
        self.configure_mode(pin, mode)?;
        self.configure_pull(pin, pull)
    }

    /// Configures a contiguous range of pins to the same mode and pull,
    /// used for the RGMII pad group (spec §6: pins 46..57 input-alternate).
    pub fn configure_range(
        &mut self,
        pins: impl IntoIterator<Item = u8>,
        mode: Mode,
        pull: Pull,
    ) -> Result<(), GpioError> {
        for pin in pins {
            self.configure(pin, mode, pull)?;
        }
        Ok(())
    }
}

/// Programs the MDIO/MDC pins and the RGMII pad group per spec §6:
/// - pin 28 (MDIO) and 29 (MDC) set to Alt5; MDIO pulled up, MDC pulled
///   down.
/// - pins 46..57 (RGMII) set to an input-alternate function; 46 and 47
///   pulled up, 48..57 pulled down.
pub fn setup_mdio_and_rgmii<R: RegisterIo>(gpio: &mut Gpio<R>) -> Result<(), GpioError> {
    gpio.configure(28, Mode::Alt5, Pull::Up)?;
    gpio.configure(29, Mode::Alt5, Pull::Down)?;

    gpio.configure(46, Mode::Alt3, Pull::Up)?;
    gpio.configure(47, Mode::Alt3, Pull::Up)?;
    gpio.configure_range(48..=57, Mode::Alt3, Pull::Down)?;

    Ok(())
}

pub type IoError = io::Error;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeIo(HashMap<usize, u32>);

    impl RegisterIo for FakeIo {
        fn read(&self, offset: usize) -> u32 {
            *self.0.get(&offset).unwrap_or(&0)
        }
        fn write(&mut self, offset: usize, value: u32) {
            self.0.insert(offset, value);
        }
    }

    #[test]
    fn configure_mode_sets_correct_field() {
        let mut gpio = Gpio::new(FakeIo(HashMap::new()));
        gpio.configure_mode(28, Mode::Alt5).unwrap();
        let v = gpio.io.read(GPFSEL0 + 2 * 4);
        assert_eq!((v >> 24) & 0b111, 0b010);
    }

    #[test]
    fn configure_pull_sets_correct_field() {
        let mut gpio = Gpio::new(FakeIo(HashMap::new()));
        gpio.configure_pull(29, Pull::Down).unwrap();
        let v = gpio.io.read(GPIO_PUP_PDN_CNTRL_REG0 + 4);
        // pin 29 -> reg1, pin%16=13, shift=26
        assert_eq!((v >> 26) & 0b11, 0b10);
    }

    #[test]
    fn setup_rejects_out_of_range_pin() {
        struct AlwaysBadIo;
        impl RegisterIo for AlwaysBadIo {
            fn read(&self, _offset: usize) -> u32 {
                0
            }
            fn write(&mut self, _offset: usize, _value: u32) {}
        }
        let mut gpio = Gpio::new(AlwaysBadIo);
        assert!(matches!(gpio.configure_mode(200, Mode::Input), Err(GpioError::BadPin(200))));
    }

    #[test]
    fn mdio_and_rgmii_setup_succeeds() {
        let mut gpio = Gpio::new(FakeIo(HashMap::new()));
        setup_mdio_and_rgmii(&mut gpio).unwrap();
    }
}
