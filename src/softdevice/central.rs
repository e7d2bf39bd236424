//! Central-role driver over the SoftDevice.
//!
//! [`SdCentral`] is the [`CentralStack`] the controller talks to; it only
//! queues commands.  [`run`] executes them: scanning and connecting are
//! long-running futures that get cancelled by the next command, and an
//! established link is polled for teardown and security changes.

use core::future::pending;

use embassy_futures::select::{select, Either};
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::{central, Connection};
use nrf_softdevice::{raw, Softdevice};

use super::{
    address_from_sd, address_to_sd, queue_full, security_level, RawMutex, LINK_POLL_MS,
    QUEUE_DEPTH,
};
use crate::ble::adv_parser::ADV_DATA_MAX;
use crate::ble::{
    hci, Address, AdvType, CentralEvent, CentralStack, ConnHandle, ConnParams, ScanParams,
    ScanType, SecurityLevel,
};
use crate::config;
use crate::error::StackError;

pub type CommandSender = Sender<'static, RawMutex, CentralCommand, QUEUE_DEPTH>;
pub type CommandReceiver = Receiver<'static, RawMutex, CentralCommand, QUEUE_DEPTH>;
pub type ReportSender = Sender<'static, RawMutex, CentralReport, QUEUE_DEPTH>;

#[derive(Clone, Copy, defmt::Format)]
pub enum CentralCommand {
    StartScan(ScanParams),
    StopScan,
    Connect {
        conn: ConnHandle,
        peer: Address,
        params: ConnParams,
    },
    ExchangeMtu(ConnHandle),
    Disconnect(ConnHandle, u8),
    Release(ConnHandle),
}

/// Owned form of [`CentralEvent`] so it can cross the channel.
#[derive(Clone, defmt::Format)]
pub enum CentralReport {
    DeviceFound {
        addr: Address,
        rssi: i8,
        adv_type: AdvType,
        data: Vec<u8, ADV_DATA_MAX>,
    },
    Connected {
        conn: ConnHandle,
        status: u8,
    },
    Disconnected {
        conn: ConnHandle,
        reason: u8,
    },
    MtuExchanged {
        conn: ConnHandle,
        status: u8,
        mtu: u16,
    },
    SecurityChanged {
        conn: ConnHandle,
        level: SecurityLevel,
        status: u8,
    },
    ScanStopped {
        cause: StackError,
    },
}

impl CentralReport {
    pub fn as_event(&self) -> CentralEvent<'_> {
        match self {
            Self::DeviceFound {
                addr,
                rssi,
                adv_type,
                data,
            } => CentralEvent::DeviceFound {
                addr: *addr,
                rssi: *rssi,
                adv_type: *adv_type,
                data,
            },
            Self::Connected { conn, status } => CentralEvent::Connected {
                conn: *conn,
                status: *status,
            },
            Self::Disconnected { conn, reason } => CentralEvent::Disconnected {
                conn: *conn,
                reason: *reason,
            },
            Self::MtuExchanged { conn, status, mtu } => CentralEvent::MtuExchanged {
                conn: *conn,
                status: *status,
                mtu: *mtu,
            },
            Self::SecurityChanged {
                conn,
                level,
                status,
            } => CentralEvent::SecurityChanged {
                conn: *conn,
                level: *level,
                status: *status,
            },
            Self::ScanStopped { cause } => CentralEvent::ScanStopped { cause: *cause },
        }
    }
}

/// Command side of the central driver.
pub struct SdCentral {
    commands: CommandSender,
    last_handle: u16,
}

impl SdCentral {
    pub fn new(commands: CommandSender) -> Self {
        Self {
            commands,
            last_handle: 0,
        }
    }

    fn send(&self, cmd: CentralCommand) -> Result<(), StackError> {
        self.commands.try_send(cmd).map_err(queue_full)
    }
}

impl CentralStack for SdCentral {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), StackError> {
        self.send(CentralCommand::StartScan(*params))
    }

    fn stop_scan(&mut self) -> Result<(), StackError> {
        self.send(CentralCommand::StopScan)
    }

    fn connect(&mut self, peer: &Address, params: &ConnParams) -> Result<ConnHandle, StackError> {
        // Handles are local ids; 0 is never handed out.
        let next = self.last_handle.checked_add(1).unwrap_or(1);
        let conn = ConnHandle(next);
        self.send(CentralCommand::Connect {
            conn,
            peer: *peer,
            params: *params,
        })?;
        self.last_handle = next;
        Ok(conn)
    }

    fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        self.send(CentralCommand::ExchangeMtu(conn))
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        self.send(CentralCommand::Disconnect(conn, reason))
    }

    fn release(&mut self, conn: ConnHandle) {
        if self.send(CentralCommand::Release(conn)).is_err() {
            error!("central: release of {} dropped, queue full", conn);
        }
    }
}

struct Link {
    handle: ConnHandle,
    conn: Connection,
    security: SecurityLevel,
}

/// Driver task body. Never returns.
pub async fn run(sd: &'static Softdevice, commands: CommandReceiver, events: ReportSender) -> ! {
    let mut link: Option<Link> = None;
    let mut pending_cmd: Option<CentralCommand> = None;

    loop {
        let cmd = match pending_cmd.take() {
            Some(cmd) => cmd,
            None => {
                let next = select(commands.receive(), watch_link(&mut link, &events)).await;
                match next {
                    Either::First(cmd) => cmd,
                    Either::Second(()) => continue,
                }
            }
        };

        match cmd {
            CentralCommand::StartScan(params) => {
                pending_cmd = scan(sd, &params, &commands, &events).await;
            }
            CentralCommand::StopScan => {}
            CentralCommand::Connect { conn, peer, params } => {
                let (established, next) =
                    connect(sd, conn, &peer, &params, &commands, &events).await;
                link = established;
                pending_cmd = next;
            }
            CentralCommand::ExchangeMtu(conn) => {
                let status = match link.as_ref().filter(|l| l.handle == conn) {
                    Some(l) => exchange_mtu(&l.conn),
                    None => hci::CONN_FAILED_TO_BE_ESTABLISHED,
                };
                events
                    .send(CentralReport::MtuExchanged {
                        conn,
                        status,
                        mtu: config::BLE_PREFERRED_ATT_MTU,
                    })
                    .await;
            }
            CentralCommand::Disconnect(conn, reason) => {
                if let Some(l) = link.as_ref().filter(|l| l.handle == conn) {
                    info!("central: disconnecting {} (reason {})", conn, reason);
                    // Teardown is picked up by `watch_link`.
                    let _ = l.conn.disconnect();
                }
            }
            CentralCommand::Release(conn) => {
                if link.as_ref().is_some_and(|l| l.handle == conn) {
                    link = None;
                }
            }
        }
    }
}

/// Scan until another command arrives; that command is handed back
/// unless it was the `StopScan` that ended the scan.
async fn scan(
    sd: &'static Softdevice,
    params: &ScanParams,
    commands: &CommandReceiver,
    events: &ReportSender,
) -> Option<CentralCommand> {
    let config = central::ScanConfig {
        active: params.scan_type == ScanType::Active,
        interval: params.interval.into(),
        window: params.window.into(),
        ..Default::default()
    };

    let scan_fut = central::scan(sd, &config, |report| {
        let data =
            unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
        let Ok(data) = Vec::from_slice(data) else {
            return None;
        };
        let found = CentralReport::DeviceFound {
            addr: address_from_sd(&nrf_softdevice::ble::Address::from_raw(report.peer_addr)),
            rssi: report.rssi,
            adv_type: adv_type(report),
            data,
        };
        // Reports are dropped while the controller is behind.
        let _ = events.try_send(found);
        None::<()>
    });

    match select(scan_fut, commands.receive()).await {
        Either::First(result) => {
            let cause = match result {
                Err(central::ScanError::Timeout) => StackError::TIMEOUT,
                _ => StackError::INVALID_STATE,
            };
            warn!("central: scan ended by the SoftDevice (err {})", cause.code);
            events.send(CentralReport::ScanStopped { cause }).await;
            None
        }
        Either::Second(CentralCommand::StopScan) => {
            debug!("central: scan stopped");
            None
        }
        Either::Second(cmd) => Some(cmd),
    }
}

fn adv_type(report: &raw::ble_gap_evt_adv_report_t) -> AdvType {
    let t = &report.type_;
    if t.extended_pdu() != 0 {
        AdvType::Extended
    } else if t.scan_response() != 0 {
        AdvType::ScanResponse
    } else if t.connectable() != 0 {
        if t.directed() != 0 {
            AdvType::ConnectableDirected
        } else {
            AdvType::ConnectableUndirected
        }
    } else if t.scannable() != 0 {
        AdvType::ScannableUndirected
    } else {
        AdvType::NonConnectableUndirected
    }
}

/// Establish a link to `peer`.  Any command that arrives first cancels
/// the attempt; the controller then sees a failed `Connected`.
async fn connect(
    sd: &'static Softdevice,
    conn: ConnHandle,
    peer: &Address,
    params: &ConnParams,
    commands: &CommandReceiver,
    events: &ReportSender,
) -> (Option<Link>, Option<CentralCommand>) {
    let peer = address_to_sd(peer);
    let whitelist = [&peer];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: params.min_interval,
            max_conn_interval: params.max_interval,
            slave_latency: params.latency,
            conn_sup_timeout: params.supervision_timeout,
        },
        ..Default::default()
    };

    match select(central::connect(sd, &config), commands.receive()).await {
        Either::First(Ok(established)) => {
            let security = security_level(established.security_mode());
            events
                .send(CentralReport::Connected {
                    conn,
                    status: hci::SUCCESS,
                })
                .await;
            let link = Link {
                handle: conn,
                conn: established,
                security,
            };
            (Some(link), None)
        }
        Either::First(Err(_)) => {
            warn!("central: connect to {} failed", conn);
            events
                .send(CentralReport::Connected {
                    conn,
                    status: hci::CONN_FAILED_TO_BE_ESTABLISHED,
                })
                .await;
            (None, None)
        }
        Either::Second(cmd) => {
            debug!("central: connect to {} cancelled by {}", conn, cmd);
            events
                .send(CentralReport::Connected {
                    conn,
                    status: hci::LOCAL_HOST_TERMINATED_CONNECTION,
                })
                .await;
            let next = match cmd {
                CentralCommand::Disconnect(h, _) | CentralCommand::Release(h) if h == conn => None,
                other => Some(other),
            };
            (None, next)
        }
    }
}

/// Kick off an ATT MTU exchange; returns an HCI-style status.
fn exchange_mtu(conn: &Connection) -> u8 {
    let Some(handle) = conn.handle() else {
        return hci::CONN_FAILED_TO_BE_ESTABLISHED;
    };
    let mtu = config::BLE_PREFERRED_ATT_MTU;
    let ret = unsafe { raw::sd_ble_gattc_exchange_mtu_request(handle, mtu) };
    match ret {
        // INVALID_STATE: the SoftDevice already ran the exchange itself.
        raw::NRF_SUCCESS | raw::NRF_ERROR_INVALID_STATE => hci::SUCCESS,
        err => {
            error!("central: sd_ble_gattc_exchange_mtu_request: {}", err);
            hci::UNACCEPTABLE_CONN_PARAMS
        }
    }
}

/// Resolve once something about the current link changed and was
/// reported.  Pends forever without a link.
async fn watch_link(link: &mut Option<Link>, events: &ReportSender) {
    let Some(l) = link.as_mut() else {
        return pending().await;
    };

    loop {
        Timer::after(Duration::from_millis(LINK_POLL_MS)).await;

        if l.conn.handle().is_none() {
            let conn = l.handle;
            *link = None;
            events
                .send(CentralReport::Disconnected {
                    conn,
                    reason: hci::REMOTE_USER_TERMINATED_CONNECTION,
                })
                .await;
            return;
        }

        let level = security_level(l.conn.security_mode());
        if level != l.security {
            l.security = level;
            events
                .send(CentralReport::SecurityChanged {
                    conn: l.handle,
                    level,
                    status: hci::SUCCESS,
                })
                .await;
            return;
        }
    }
}
