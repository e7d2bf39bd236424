//! Application-wide constants and compile-time configuration.
//!
//! The target identity and every radio timing parameter live here so
//! they can be tuned in one place.  Nothing in this crate persists
//! configuration at run time.

// Central

/// Complete local name the central connects to.
pub const TARGET_DEVICE_NAME: &str = "buggy-device";

/// Fast scan interval (in 0.625 ms units). 0x60 = 60 ms.
pub const BLE_SCAN_FAST_INTERVAL: u16 = 0x0060;

/// Fast scan window (in 0.625 ms units). 0x30 = 30 ms.
pub const BLE_SCAN_FAST_WINDOW: u16 = 0x0030;

/// Default connection interval range (in 1.25 ms units).
/// 24 = 30 ms, 40 = 50 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// Peripheral latency (number of connection events the peripheral can skip).
pub const BLE_PERIPHERAL_LATENCY: u16 = 0;

/// Supervision timeout (in 10 ms units). 42 = 420 ms.
pub const BLE_SUP_TIMEOUT: u16 = 42;

/// ATT MTU every link starts with before an exchange.
pub const BLE_DEFAULT_ATT_MTU: u16 = 23;

/// ATT MTU the central asks for during the exchange.
pub const BLE_PREFERRED_ATT_MTU: u16 = 247;

// Peripheral

/// Name put in the advertisement of both heart-rate profiles.
pub const PERIPHERAL_DEVICE_NAME: &str = "blelink-hr";

/// Advertising interval range of the standard profile (0.625 ms units).
/// 1600 = 1 s, 1920 = 1.2 s.
pub const ADV_INTERVAL_MIN: u32 = 1600;
pub const ADV_INTERVAL_MAX: u32 = 1920;

/// Advertising interval range of the coded-PHY profile (0.625 ms units).
/// 0xA0 = 100 ms, 0xF0 = 150 ms.
pub const ADV_FAST_INTERVAL_MIN_2: u32 = 0x00A0;
pub const ADV_FAST_INTERVAL_MAX_2: u32 = 0x00F0;

/// Period of the notification cycle while a central is connected (ms).
pub const NOTIFY_INTERVAL_MS: u64 = 1000;

// Simulated sensors

/// Heart rate never reaches this value; it resets to the lower bound.
pub const HEART_RATE_UPPER: u8 = 160;

/// Heart-rate lower bound of the standard profile.
pub const HEART_RATE_LOWER_STANDARD: u8 = 90;

/// Heart-rate lower bound of the coded-PHY profile.
pub const HEART_RATE_LOWER_CODED: u8 = 100;

/// Battery level the simulator wraps back to.
pub const BATTERY_FULL: u8 = 100;

// Assigned numbers

/// 16-bit service UUIDs advertised by the coded-PHY profile.
pub const UUID16_HEART_RATE_SERVICE: u16 = 0x180D;
pub const UUID16_BATTERY_SERVICE: u16 = 0x180F;
pub const UUID16_DEVICE_INFORMATION_SERVICE: u16 = 0x180A;
