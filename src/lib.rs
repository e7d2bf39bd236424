//! Connection lifecycle controllers for a BLE central/peripheral pair.
//!
//! The state machines in [`ble::central`] and [`ble::peripheral`] are pure
//! logic: they talk to the radio only through the traits in [`ble`], so
//! they run unchanged on the host for tests and on the nRF52840 on top of
//! the SoftDevice adapters in `softdevice` (feature `embedded`).
//!
//! Usage: `cargo test` for the host-side suite.
//!
//! Note: the embedded binaries live in `src/bin/` and need the
//! `embedded` feature plus a `thumbv7em-none-eabihf` target.

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod sim;

#[cfg(feature = "embedded")]
pub mod softdevice;

pub use ble::central::{CentralConfig, CentralController, CentralState};
pub use ble::peripheral::{PeripheralController, PeripheralProfile, PeripheralState};
pub use error::{Command, Error, StackError};
