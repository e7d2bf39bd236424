//! Central firmware: scans for the target peripheral by name, connects,
//! negotiates the ATT MTU and recovers on every failure by scanning again.

#![no_std]
#![no_main]

use blelink::softdevice::central::{self as driver, CentralCommand, CentralReport, SdCentral};
use blelink::softdevice::{softdevice_config, RawMutex, QUEUE_DEPTH};
use blelink::{CentralConfig, CentralController};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::interrupt;
use embassy_sync::channel::Channel;
use nrf_softdevice::Softdevice;
use {defmt_rtt as _, panic_probe as _};

static COMMANDS: Channel<RawMutex, CentralCommand, QUEUE_DEPTH> = Channel::new();
static REPORTS: Channel<RawMutex, CentralReport, QUEUE_DEPTH> = Channel::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn driver_task(sd: &'static Softdevice) -> ! {
    driver::run(sd, COMMANDS.receiver(), REPORTS.sender()).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("blelink central starting");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut c = embassy_nrf::config::Config::default();
    c.gpiote_interrupt_priority = interrupt::Priority::P2;
    c.time_interrupt_priority = interrupt::Priority::P2;
    let _p = embassy_nrf::init(c);

    let sd = Softdevice::enable(&softdevice_config(b"blelink-central", true));
    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(driver_task(sd)));

    let stack = SdCentral::new(COMMANDS.sender());
    let mut central = unwrap!(CentralController::new(stack, CentralConfig::default()));

    if let Err(e) = central.start() {
        warn!("central: initial scan rejected: {}", e);
    }

    loop {
        let report = REPORTS.receive().await;
        if let Err(e) = central.handle_event(report.as_event()) {
            warn!("central: {} (state {})", e, central.state());
        }
    }
}
