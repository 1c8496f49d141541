// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry point: maps the Raspberry Pi 4's GENET and GPIO register blocks,
//! configures the MDIO/RGMII pads, brings one unit online, and runs until
//! told to stop (spec §1, §6).

mod platform;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use genet_driver::{Device, Flags, GenetHardware};
use genet_gpio_api::{setup_mdio_and_rgmii, Gpio};

/// MDIO address of the external RGMII PHY on the Raspberry Pi 4 carrier
/// board (spec §6: discovered in the general case via the `phy-handle`
/// phandle's `reg` property; hardcoded here since this binary targets one
/// fixed board rather than parsing the PHY node).
const GENET_EXTERNAL_PHY_ADDR: u8 = 1;

const DEFAULT_PREFS_PATH: &str = "/etc/genet.prefs";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigterm as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_sigterm as libc::sighandler_t);
    }
}

fn main() {
    env_logger::init();
    install_signal_handlers();

    let prefs_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_PREFS_PATH.to_string());
    let config = platform::load_preferences(&prefs_path);

    let mapped = match platform::map() {
        Ok(mapped) => mapped,
        Err(err) => {
            log::error!("failed to map GENET/GPIO register blocks: {err}");
            std::process::exit(1);
        }
    };

    let mut gpio = Gpio::new(mapped.gpio);
    if let Err(err) = setup_mdio_and_rgmii(&mut gpio) {
        log::error!("failed to configure MDIO/RGMII pads: {err}");
        std::process::exit(1);
    }

    let genet_regs = mapped.genet;
    let hardware_mac = mapped.mac_address;
    let device = Device::new();

    let session = match device.open(
        0,
        Flags::empty(),
        move || Box::new(unsafe { GenetHardware::new(genet_regs, GENET_EXTERNAL_PHY_ADDR) }),
        config,
        hardware_mac,
    ) {
        Ok(session) => session,
        Err(err) => {
            log::error!("failed to open unit 0: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = session.unit.configure(hardware_mac) {
        log::error!("failed to configure unit: {err}");
        device.close(session);
        std::process::exit(1);
    }

    match session.unit.online() {
        Ok(_) => log::info!("unit online, mac={hardware_mac:02x?}"),
        Err(err) => {
            log::error!("failed to bring unit online: {err}");
            device.close(session);
            std::process::exit(1);
        }
    }

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutdown requested, closing session");
    session.unit.offline();
    device.close(session);
    device.expunge();
}
