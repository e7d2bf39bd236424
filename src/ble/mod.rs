//! Bluetooth Low Energy connection lifecycle.
//!
//! This module holds the vocabulary shared by both roles:
//!
//! 1. **Stack capabilities** - the narrow command surface each controller
//!    drives ([`CentralStack`], [`PeripheralStack`]) plus the deferred-work
//!    facility ([`Scheduler`]) and the notification hook ([`SensorSink`]).
//! 2. **Events** - discrete callbacks the stack delivers, one enum per
//!    role, fed one at a time into the controller's `handle_event`.
//! 3. **Parameters** - scan / connect / advertise settings and the
//!    per-link [`SessionParameters`].
//!
//! Every command returns its accept/reject status synchronously; its
//! effect only ever shows up later as an event.

pub mod adv_parser;
pub mod central;
pub mod peripheral;

use core::fmt;

use embassy_time::Duration;

use crate::config;
use crate::error::StackError;
use adv_parser::AdvPayload;

// ═══════════════════════════════════════════════════════════════════════════
// Identities
// ═══════════════════════════════════════════════════════════════════════════

/// Whether an address is the controller's public one or a random one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrKind {
    Public,
    Random,
}

/// BLE device address. `bytes` are little-endian, as received over the air.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub kind: AddrKind,
    pub bytes: [u8; 6],
}

impl Address {
    pub const fn new(kind: AddrKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        let kind = match self.kind {
            AddrKind::Public => "public",
            AddrKind::Random => "random",
        };
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            b[5], b[4], b[3], b[2], b[1], b[0], kind
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Address {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.bytes;
        defmt::write!(
            f,
            "{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X} ({})",
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0],
            self.kind
        )
    }
}

/// Opaque, stack-owned reference to a pending or established link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// Token identifying one piece of deferred work handed to a [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken(pub u32);

// ═══════════════════════════════════════════════════════════════════════════
// Link properties
// ═══════════════════════════════════════════════════════════════════════════

/// Legacy advertising PDU type reported with each discovered device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvType {
    /// ADV_IND
    ConnectableUndirected,
    /// ADV_DIRECT_IND
    ConnectableDirected,
    /// ADV_SCAN_IND
    ScannableUndirected,
    /// ADV_NONCONN_IND
    NonConnectableUndirected,
    /// SCAN_RSP
    ScanResponse,
    /// Anything reported through the extended advertising path.
    Extended,
}

impl AdvType {
    /// Map the HCI/GAP advertising report type.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::ConnectableUndirected,
            0x01 => Self::ConnectableDirected,
            0x02 => Self::ScannableUndirected,
            0x03 => Self::NonConnectableUndirected,
            0x04 => Self::ScanResponse,
            _ => Self::Extended,
        }
    }

    /// Only these two PDU types let us initiate a connection.
    pub const fn is_connectable(self) -> bool {
        matches!(self, Self::ConnectableUndirected | Self::ConnectableDirected)
    }
}

/// Negotiated encryption/authentication strength of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    /// No encryption.
    L1,
    /// Encryption without authentication.
    L2,
    /// Authenticated encryption.
    L3,
    /// Authenticated LE Secure Connections.
    L4,
}

impl SecurityLevel {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 | 1 => Self::L1,
            2 => Self::L2,
            3 => Self::L3,
            _ => Self::L4,
        }
    }
}

/// PHY a link runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phy {
    Le1M,
    Le2M,
    Coded,
}

/// PHYs reported by the stack when a link comes up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkPhy {
    pub tx: Phy,
    pub rx: Phy,
}

/// Parameters negotiated on the current link.
///
/// `None` means "not negotiated yet"; both fields go back to `None` on
/// every disconnect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionParameters {
    pub att_mtu: Option<u16>,
    pub security: Option<SecurityLevel>,
}

impl SessionParameters {
    pub const fn unnegotiated() -> Self {
        Self {
            att_mtu: None,
            security: None,
        }
    }
}

/// HCI disconnect reasons / status codes used by the controllers.
pub mod hci {
    pub const SUCCESS: u8 = 0x00;
    pub const REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;
    pub const LOCAL_HOST_TERMINATED_CONNECTION: u8 = 0x16;
    pub const UNACCEPTABLE_CONN_PARAMS: u8 = 0x3B;
    pub const CONN_FAILED_TO_BE_ESTABLISHED: u8 = 0x3E;
}

// ═══════════════════════════════════════════════════════════════════════════
// Command parameters
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanType {
    Passive,
    /// Sends scan requests so scan-response data (names) is reported.
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub scan_type: ScanType,
    /// Duplicate filtering hides payload updates from the same device,
    /// so it stays off for name matching.
    pub filter_duplicates: bool,
    /// 0.625 ms units.
    pub interval: u16,
    /// 0.625 ms units.
    pub window: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Active,
            filter_duplicates: false,
            interval: config::BLE_SCAN_FAST_INTERVAL,
            window: config::BLE_SCAN_FAST_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// 1.25 ms units.
    pub min_interval: u16,
    /// 1.25 ms units.
    pub max_interval: u16,
    pub latency: u16,
    /// 10 ms units.
    pub supervision_timeout: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            min_interval: config::BLE_CONN_INTERVAL_MIN,
            max_interval: config::BLE_CONN_INTERVAL_MAX,
            latency: config::BLE_PERIPHERAL_LATENCY,
            supervision_timeout: config::BLE_SUP_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvParams {
    pub connectable: bool,
    /// 0.625 ms units.
    pub interval_min: u32,
    /// 0.625 ms units.
    pub interval_max: u32,
}

// ═══════════════════════════════════════════════════════════════════════════
// Stack capabilities
// ═══════════════════════════════════════════════════════════════════════════

/// Commands the central controller issues to the BLE stack.
pub trait CentralStack {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), StackError>;

    fn stop_scan(&mut self) -> Result<(), StackError>;

    /// Start connection establishment. The returned handle is a counted
    /// reference the caller must give back through [`release`].
    ///
    /// [`release`]: CentralStack::release
    fn connect(&mut self, peer: &Address, params: &ConnParams) -> Result<ConnHandle, StackError>;

    fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), StackError>;

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError>;

    /// Drop the reference obtained from [`connect`](CentralStack::connect).
    fn release(&mut self, conn: ConnHandle);
}

/// Commands the peripheral controller issues to the BLE stack.
pub trait PeripheralStack {
    fn start_advertising(&mut self, payload: &AdvPayload, params: &AdvParams)
        -> Result<(), StackError>;

    fn stop_advertising(&mut self) -> Result<(), StackError>;

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError>;

    /// Drop the reference the stack handed over with the `Connected` event.
    fn release(&mut self, conn: ConnHandle);
}

/// Deferred-work facility. Firing is reported back as a timer event
/// carrying the token, on the same execution context as stack events.
pub trait Scheduler {
    fn schedule_once(&mut self, delay: Duration) -> TimerToken;

    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken;

    /// Cancelling an already-fired or unknown token is a no-op.
    fn cancel(&mut self, token: TimerToken);
}

/// Where the peripheral's simulated readings go on every tick.
pub trait SensorSink {
    fn notify_heart_rate(&mut self, conn: ConnHandle, bpm: u8) -> Result<(), StackError>;

    /// Level currently stored in the battery service.
    fn battery_level(&self) -> u8;

    fn set_battery_level(&mut self, level: u8);
}

// ═══════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════

/// Callbacks delivered to the central controller.
///
/// `DeviceFound` borrows the advertisement bytes; they are only valid for
/// the duration of the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CentralEvent<'a> {
    DeviceFound {
        addr: Address,
        rssi: i8,
        adv_type: AdvType,
        data: &'a [u8],
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
    /// The stack ended a running scan on its own.
    ScanStopped {
        cause: StackError,
    },
}

/// Callbacks delivered to the peripheral controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralEvent {
    Connected {
        conn: ConnHandle,
        status: u8,
        phy: Option<LinkPhy>,
    },
    Disconnected {
        conn: ConnHandle,
        reason: u8,
    },
    PairingCancelled {
        conn: ConnHandle,
    },
    /// Advertising ended without a connection and will not resume.
    AdvertisingStopped {
        cause: StackError,
    },
    Timer(TimerToken),
}
