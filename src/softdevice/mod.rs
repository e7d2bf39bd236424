//! nRF52840 + S140 SoftDevice bindings for the lifecycle controllers.
//!
//! The controllers are synchronous and never block, so every command is
//! queued to a driver task with `try_send` and its outcome comes back
//! later through an event channel.  A full command queue is reported to
//! the controller as [`StackError::BUSY`].

pub mod central;
pub mod peripheral;
pub mod timers;

use core::mem;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use nrf_softdevice::ble::{Address as SdAddress, AddressType, SecurityMode};
use nrf_softdevice::raw;

use crate::ble::{AddrKind, Address, SecurityLevel};
use crate::config;
use crate::error::StackError;

pub type RawMutex = CriticalSectionRawMutex;

/// Depth of the command and event queues between a controller and its
/// driver task.
pub const QUEUE_DEPTH: usize = 8;

/// How often an established link is checked for teardown / security
/// changes while the driver is otherwise idle.
pub const LINK_POLL_MS: u64 = 100;

/// SoftDevice configuration for a single-link role.
///
/// `name` must be `'static` because the SoftDevice keeps the pointer.
pub fn softdevice_config(name: &'static [u8], central: bool) -> nrf_softdevice::Config {
    let (periph_role_count, central_role_count) = if central { (0, 1) } else { (1, 0) };
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: config::BLE_PREFERRED_ATT_MTU,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count,
            central_role_count,
            central_sec_count: central_role_count,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: name.as_ptr() as _,
            current_len: name.len() as u16,
            max_len: name.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

pub(crate) fn queue_full<E>(_: E) -> StackError {
    StackError::BUSY
}

pub(crate) fn address_from_sd(addr: &SdAddress) -> Address {
    let kind = match addr.address_type() {
        AddressType::Public => AddrKind::Public,
        _ => AddrKind::Random,
    };
    Address::new(kind, addr.bytes())
}

/// Random sub-type lives in the two top bits of the most significant byte.
pub(crate) fn address_to_sd(addr: &Address) -> SdAddress {
    let kind = match addr.kind {
        AddrKind::Public => AddressType::Public,
        AddrKind::Random => match addr.bytes[5] >> 6 {
            0b11 => AddressType::RandomStatic,
            0b01 => AddressType::RandomPrivateResolvable,
            _ => AddressType::RandomPrivateNonResolvable,
        },
    };
    SdAddress::new(kind, addr.bytes)
}

pub(crate) fn security_level(mode: SecurityMode) -> SecurityLevel {
    match mode {
        SecurityMode::NoAccess | SecurityMode::Open => SecurityLevel::L1,
        SecurityMode::JustWorks => SecurityLevel::L2,
        SecurityMode::Mitm => SecurityLevel::L3,
        SecurityMode::LescMitm => SecurityLevel::L4,
        _ => SecurityLevel::L2,
    }
}
