//! Heart-rate peripheral firmware: advertises, accepts one central and
//! pushes simulated heart-rate / battery readings once per second.
//!
//! Build with `--features coded` for the Coded-PHY flavoured profile.

#![no_std]
#![no_main]

use blelink::ble::PeripheralEvent;
use blelink::softdevice::peripheral::{
    self as driver, PeripheralCommand, SdPeripheral, SdSensors, Server,
};
use blelink::softdevice::timers::EmbassyScheduler;
use blelink::softdevice::{softdevice_config, RawMutex, QUEUE_DEPTH};
use blelink::{PeripheralController, PeripheralProfile};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::interrupt;
use embassy_sync::channel::Channel;
use nrf_softdevice::Softdevice;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

static COMMANDS: Channel<RawMutex, PeripheralCommand, QUEUE_DEPTH> = Channel::new();
static EVENTS: Channel<RawMutex, PeripheralEvent, QUEUE_DEPTH> = Channel::new();
static SERVER: StaticCell<Server> = StaticCell::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn driver_task(sd: &'static Softdevice, server: &'static Server) -> ! {
    driver::run(sd, server, COMMANDS.receiver(), EVENTS.sender()).await
}

fn profile() -> Result<PeripheralProfile, blelink::Error> {
    if cfg!(feature = "coded") {
        PeripheralProfile::heart_rate_coded()
    } else {
        PeripheralProfile::heart_rate()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("blelink peripheral starting");

    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut c = embassy_nrf::config::Config::default();
    c.gpiote_interrupt_priority = interrupt::Priority::P2;
    c.time_interrupt_priority = interrupt::Priority::P2;
    let _p = embassy_nrf::init(c);

    let sd = Softdevice::enable(&softdevice_config(
        blelink::config::PERIPHERAL_DEVICE_NAME.as_bytes(),
        false,
    ));
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(driver_task(sd, server)));

    let mut peripheral = PeripheralController::new(
        SdPeripheral::new(COMMANDS.sender()),
        EmbassyScheduler::new(),
        SdSensors::new(COMMANDS.sender()),
        unwrap!(profile()),
    );

    if let Err(e) = peripheral.enable() {
        warn!("peripheral: advertising rejected: {}", e);
    }

    loop {
        let next = select(EVENTS.receive(), peripheral.timers_mut().next_expired()).await;
        let event = match next {
            Either::First(event) => event,
            Either::Second(token) => PeripheralEvent::Timer(token),
        };
        if let Err(e) = peripheral.handle_event(event) {
            warn!("peripheral: {} (state {})", e, peripheral.state());
        }
    }
}
