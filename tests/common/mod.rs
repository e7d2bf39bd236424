//! Recording doubles for the stack capability traits.
//!
//! Every command is logged in call order, including the ones made to
//! fail, so tests can assert on exact command sequences.

#![allow(dead_code)]

use blelink::ble::adv_parser::AdvPayload;
use blelink::ble::{
    AddrKind, Address, AdvParams, AdvType, CentralEvent, CentralStack, ConnHandle, ConnParams,
    PeripheralStack, ScanParams, Scheduler, SensorSink, TimerToken,
};
use blelink::config;
use blelink::StackError;
use embassy_time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(Address),
    ExchangeMtu(ConnHandle),
    Disconnect(ConnHandle, u8),
    Release(ConnHandle),
    StartAdvertising,
    StopAdvertising,
}

pub const PEER: Address = Address::new(AddrKind::Random, [0x11, 0x22, 0x33, 0x44, 0x55, 0xC6]);
pub const OTHER: Address = Address::new(AddrKind::Public, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x00]);

/// Flags + Complete Local Name.
pub fn name_ad(name: &str) -> Vec<u8> {
    let mut ad = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
    ad.extend_from_slice(name.as_bytes());
    ad
}

pub fn found<'a>(addr: Address, data: &'a [u8]) -> CentralEvent<'a> {
    CentralEvent::DeviceFound {
        addr,
        rssi: -52,
        adv_type: AdvType::ConnectableUndirected,
        data,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Central stack
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockCentral {
    pub calls: Vec<Call>,
    pub last_scan: Option<ScanParams>,
    next_handle: u16,
    pub fail_start_scan: Option<StackError>,
    pub fail_stop_scan: Option<StackError>,
    pub fail_connect: Option<StackError>,
    pub fail_exchange_mtu: Option<StackError>,
    pub fail_disconnect: Option<StackError>,
}

impl MockCentral {
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|c| matches!(c, Call::Connect(_)))
    }

    pub fn releases(&self) -> usize {
        self.count(|c| matches!(c, Call::Release(_)))
    }

    pub fn released(&self, conn: ConnHandle) -> usize {
        self.count(|c| *c == Call::Release(conn))
    }

    /// Handle the next successful `connect` will return.
    pub fn peek_handle(&self) -> ConnHandle {
        ConnHandle(self.next_handle + 1)
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl CentralStack for MockCentral {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), StackError> {
        self.calls.push(Call::StartScan);
        self.last_scan = Some(*params);
        self.fail_start_scan.map_or(Ok(()), Err)
    }

    fn stop_scan(&mut self) -> Result<(), StackError> {
        self.calls.push(Call::StopScan);
        self.fail_stop_scan.map_or(Ok(()), Err)
    }

    fn connect(&mut self, peer: &Address, _params: &ConnParams) -> Result<ConnHandle, StackError> {
        self.calls.push(Call::Connect(*peer));
        if let Some(e) = self.fail_connect {
            return Err(e);
        }
        self.next_handle += 1;
        Ok(ConnHandle(self.next_handle))
    }

    fn exchange_mtu(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        self.calls.push(Call::ExchangeMtu(conn));
        self.fail_exchange_mtu.map_or(Ok(()), Err)
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        self.calls.push(Call::Disconnect(conn, reason));
        self.fail_disconnect.map_or(Ok(()), Err)
    }

    fn release(&mut self, conn: ConnHandle) {
        self.calls.push(Call::Release(conn));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Peripheral stack, scheduler, sensors
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockPeripheral {
    pub calls: Vec<Call>,
    pub last_payload: Option<AdvPayload>,
    pub last_params: Option<AdvParams>,
    pub fail_start_advertising: Option<StackError>,
    pub fail_disconnect: Option<StackError>,
}

impl MockPeripheral {
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl PeripheralStack for MockPeripheral {
    fn start_advertising(
        &mut self,
        payload: &AdvPayload,
        params: &AdvParams,
    ) -> Result<(), StackError> {
        self.calls.push(Call::StartAdvertising);
        self.last_payload = Some(payload.clone());
        self.last_params = Some(*params);
        self.fail_start_advertising.map_or(Ok(()), Err)
    }

    fn stop_advertising(&mut self) -> Result<(), StackError> {
        self.calls.push(Call::StopAdvertising);
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        self.calls.push(Call::Disconnect(conn, reason));
        self.fail_disconnect.map_or(Ok(()), Err)
    }

    fn release(&mut self, conn: ConnHandle) {
        self.calls.push(Call::Release(conn));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub token: TimerToken,
    pub delay: Duration,
    pub repeating: bool,
}

#[derive(Default)]
pub struct MockScheduler {
    pub scheduled: Vec<Scheduled>,
    pub cancelled: Vec<TimerToken>,
    last_token: u32,
}

impl MockScheduler {
    /// Tokens scheduled and not yet cancelled.  One-shots are not
    /// retired on firing here; tests track that themselves.
    pub fn live(&self) -> Vec<TimerToken> {
        self.scheduled
            .iter()
            .map(|s| s.token)
            .filter(|t| !self.cancelled.contains(t))
            .collect()
    }

    pub fn last(&self) -> Option<Scheduled> {
        self.scheduled.last().copied()
    }

    fn push(&mut self, delay: Duration, repeating: bool) -> TimerToken {
        self.last_token += 1;
        let token = TimerToken(self.last_token);
        self.scheduled.push(Scheduled {
            token,
            delay,
            repeating,
        });
        token
    }
}

impl Scheduler for MockScheduler {
    fn schedule_once(&mut self, delay: Duration) -> TimerToken {
        self.push(delay, false)
    }

    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken {
        self.push(interval, true)
    }

    fn cancel(&mut self, token: TimerToken) {
        self.cancelled.push(token);
    }
}

pub struct MockSensors {
    pub heart_rates: Vec<(ConnHandle, u8)>,
    pub battery: u8,
    pub battery_writes: Vec<u8>,
    pub fail_notify: Option<StackError>,
}

impl Default for MockSensors {
    fn default() -> Self {
        Self {
            heart_rates: Vec::new(),
            battery: config::BATTERY_FULL,
            battery_writes: Vec::new(),
            fail_notify: None,
        }
    }
}

impl MockSensors {
    pub fn bpm(&self) -> Vec<u8> {
        self.heart_rates.iter().map(|&(_, bpm)| bpm).collect()
    }
}

impl SensorSink for MockSensors {
    fn notify_heart_rate(&mut self, conn: ConnHandle, bpm: u8) -> Result<(), StackError> {
        if let Some(e) = self.fail_notify {
            return Err(e);
        }
        self.heart_rates.push((conn, bpm));
        Ok(())
    }

    fn battery_level(&self) -> u8 {
        self.battery
    }

    fn set_battery_level(&mut self, level: u8) {
        self.battery = level;
        self.battery_writes.push(level);
    }
}
