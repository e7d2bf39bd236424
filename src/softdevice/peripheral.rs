//! Peripheral-role driver over the SoftDevice: advertising, the GATT
//! server (Heart Rate + Battery) and notification delivery.

use core::pin::pin;

use embassy_futures::select::{select, Either};
use embassy_sync::channel::{Receiver, Sender};
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::Softdevice;

use super::{queue_full, RawMutex, QUEUE_DEPTH};
use crate::ble::adv_parser::AdvPayload;
use crate::ble::{hci, AdvParams, ConnHandle, PeripheralEvent, PeripheralStack, SensorSink};
use crate::config;
use crate::error::StackError;

pub type CommandSender = Sender<'static, RawMutex, PeripheralCommand, QUEUE_DEPTH>;
pub type CommandReceiver = Receiver<'static, RawMutex, PeripheralCommand, QUEUE_DEPTH>;
pub type EventSender = Sender<'static, RawMutex, PeripheralEvent, QUEUE_DEPTH>;

#[nrf_softdevice::gatt_service(uuid = "180d")]
pub struct HeartRateService {
    /// Flags byte (UINT8 format) followed by the bpm value.
    #[characteristic(uuid = "2a37", notify)]
    pub measurement: [u8; 2],
}

#[nrf_softdevice::gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", read, notify)]
    pub battery_level: u8,
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub hrs: HeartRateService,
    pub bas: BatteryService,
}

#[derive(Clone)]
pub enum PeripheralCommand {
    StartAdvertising {
        payload: AdvPayload,
        params: AdvParams,
    },
    StopAdvertising,
    Disconnect(ConnHandle, u8),
    Release(ConnHandle),
    NotifyHeartRate(ConnHandle, u8),
    SetBatteryLevel(u8),
}

/// Command side of the peripheral driver.
pub struct SdPeripheral {
    commands: CommandSender,
}

impl SdPeripheral {
    pub fn new(commands: CommandSender) -> Self {
        Self { commands }
    }
}

impl PeripheralStack for SdPeripheral {
    fn start_advertising(
        &mut self,
        payload: &AdvPayload,
        params: &AdvParams,
    ) -> Result<(), StackError> {
        self.commands
            .try_send(PeripheralCommand::StartAdvertising {
                payload: payload.clone(),
                params: *params,
            })
            .map_err(queue_full)
    }

    fn stop_advertising(&mut self) -> Result<(), StackError> {
        self.commands
            .try_send(PeripheralCommand::StopAdvertising)
            .map_err(queue_full)
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        self.commands
            .try_send(PeripheralCommand::Disconnect(conn, reason))
            .map_err(queue_full)
    }

    fn release(&mut self, conn: ConnHandle) {
        if self.commands.try_send(PeripheralCommand::Release(conn)).is_err() {
            error!("peripheral: release of {} dropped, queue full", conn);
        }
    }
}

/// Sensor readings routed to the GATT server through the driver.
///
/// The battery level is mirrored locally so it can be read back
/// synchronously.
pub struct SdSensors {
    commands: CommandSender,
    battery: u8,
}

impl SdSensors {
    pub fn new(commands: CommandSender) -> Self {
        Self {
            commands,
            battery: config::BATTERY_FULL,
        }
    }
}

impl SensorSink for SdSensors {
    fn notify_heart_rate(&mut self, conn: ConnHandle, bpm: u8) -> Result<(), StackError> {
        self.commands
            .try_send(PeripheralCommand::NotifyHeartRate(conn, bpm))
            .map_err(queue_full)
    }

    fn battery_level(&self) -> u8 {
        self.battery
    }

    fn set_battery_level(&mut self, level: u8) {
        self.battery = level;
        if self
            .commands
            .try_send(PeripheralCommand::SetBatteryLevel(level))
            .is_err()
        {
            debug!("peripheral: battery update {} dropped", level);
        }
    }
}

enum Advertised {
    Connected(Connection),
    Stopped(Option<PeripheralCommand>),
    Failed(StackError),
}

/// Driver task body. Never returns.
pub async fn run(
    sd: &'static Softdevice,
    server: &'static Server,
    commands: CommandReceiver,
    events: EventSender,
) -> ! {
    let mut pending_cmd: Option<PeripheralCommand> = None;
    let mut last_handle: u16 = 0;

    if server.bas.battery_level_set(&config::BATTERY_FULL).is_err() {
        warn!("peripheral: initial battery level not stored");
    }

    loop {
        let cmd = match pending_cmd.take() {
            Some(cmd) => cmd,
            None => commands.receive().await,
        };

        match cmd {
            PeripheralCommand::StartAdvertising { payload, params } => {
                match advertise(sd, &payload, &params, &commands).await {
                    Advertised::Connected(conn) => {
                        last_handle = last_handle.checked_add(1).unwrap_or(1);
                        let handle = ConnHandle(last_handle);
                        events
                            .send(PeripheralEvent::Connected {
                                conn: handle,
                                status: hci::SUCCESS,
                                phy: None,
                            })
                            .await;
                        pending_cmd = serve(server, conn, handle, &commands, &events).await;
                    }
                    Advertised::Stopped(next) => pending_cmd = next,
                    Advertised::Failed(cause) => {
                        // Restarting is the controller's call.
                        events.send(PeripheralEvent::AdvertisingStopped { cause }).await;
                    }
                }
            }
            PeripheralCommand::SetBatteryLevel(level) => {
                let _ = server.bas.battery_level_set(&level);
            }
            PeripheralCommand::StopAdvertising
            | PeripheralCommand::Disconnect(..)
            | PeripheralCommand::Release(_)
            | PeripheralCommand::NotifyHeartRate(..) => {}
        }
    }
}

async fn advertise(
    sd: &'static Softdevice,
    payload: &AdvPayload,
    params: &AdvParams,
    commands: &CommandReceiver,
) -> Advertised {
    // Only connectable advertising is driven here.
    debug_assert!(params.connectable);

    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: payload.as_bytes(),
        scan_data: &[],
    };
    let config = peripheral::Config {
        interval: params.interval_min,
        ..Default::default()
    };

    match select(peripheral::advertise_connectable(sd, adv, &config), commands.receive()).await {
        Either::First(Ok(conn)) => Advertised::Connected(conn),
        Either::First(Err(e)) => {
            let cause = match e {
                peripheral::AdvertiseError::Timeout => StackError::TIMEOUT,
                peripheral::AdvertiseError::NoFreeConn => StackError::NO_RESOURCES,
                _ => StackError::INVALID_STATE,
            };
            warn!("peripheral: advertising ended without a connection (err {})", cause.code);
            Advertised::Failed(cause)
        }
        Either::Second(PeripheralCommand::StopAdvertising) => Advertised::Stopped(None),
        Either::Second(cmd) => Advertised::Stopped(Some(cmd)),
    }
}

/// Run the GATT server on `conn` until the link drops, executing the
/// commands that target it.
async fn serve(
    server: &Server,
    conn: Connection,
    handle: ConnHandle,
    commands: &CommandReceiver,
    events: &EventSender,
) -> Option<PeripheralCommand> {
    let mut gatt = pin!(gatt_server::run(&conn, server, |_| {}));
    let mut deferred = None;

    loop {
        match select(gatt.as_mut(), commands.receive()).await {
            Either::First(_) => break,
            Either::Second(cmd) => match cmd {
                PeripheralCommand::NotifyHeartRate(h, bpm) if h == handle => {
                    if server.hrs.measurement_notify(&conn, &[0x00, bpm]).is_err() {
                        debug!("peripheral: heart rate not delivered (not subscribed?)");
                    }
                }
                PeripheralCommand::SetBatteryLevel(level) => {
                    let _ = server.bas.battery_level_set(&level);
                    let _ = server.bas.battery_level_notify(&conn, &level);
                }
                PeripheralCommand::Disconnect(h, reason) if h == handle => {
                    info!("peripheral: disconnecting {} (reason {})", handle, reason);
                    let _ = conn.disconnect();
                }
                PeripheralCommand::StartAdvertising { .. } => deferred = Some(cmd),
                _ => {}
            },
        }
    }

    events
        .send(PeripheralEvent::Disconnected {
            conn: handle,
            reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
        })
        .await;
    deferred
}
