//! Advertisement data: parsing, target filtering and payload building.
//!
//! Raw AD data is a sequence of `[len][type][payload; len - 1]`
//! structures.  Parsing stops at the first zero length or at a structure
//! that runs past the end of the buffer.

use heapless::{String, Vec};

use crate::ble::AdvType;
use crate::error::Error;

/// Maximum size of legacy advertising data.
pub const ADV_DATA_MAX: usize = 31;

/// AD type tags used by this crate.
pub mod ad_type {
    pub const FLAGS: u8 = 0x01;
    pub const UUID16_SOME: u8 = 0x02;
    pub const UUID16_ALL: u8 = 0x03;
    pub const NAME_SHORTENED: u8 = 0x08;
    pub const NAME_COMPLETE: u8 = 0x09;
}

/// `LE General Discoverable Mode` flag.
pub const FLAG_LE_GENERAL: u8 = 0x02;
/// `BR/EDR Not Supported` flag.
pub const FLAG_NO_BREDR: u8 = 0x04;

/// One typed AD element borrowed from the raw buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD structures of a raw advertisement.
#[derive(Clone)]
pub struct AdStructures<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.pos;
        if i >= self.data.len() {
            return None;
        }
        let len = self.data[i] as usize;
        if len == 0 || i + len >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        self.pos = i + len + 1;
        Some(AdStructure {
            ad_type: self.data[i + 1],
            data: &self.data[i + 2..i + 1 + len],
        })
    }
}

/// Decide whether a discovered device is the one the central is after.
///
/// Only connectable (undirected or directed) reports qualify.  The match
/// is an exact, case-sensitive comparison against a `Complete Local Name`
/// element; an empty target never matches.
pub fn matches_target_name(adv_type: AdvType, data: &[u8], target: &str) -> bool {
    if !adv_type.is_connectable() || target.is_empty() {
        return false;
    }

    let target = target.as_bytes();
    AdStructures::new(data)
        .any(|ad| ad.ad_type == ad_type::NAME_COMPLETE && ad.data == target)
}

/// Check if raw advertisement data lists the given 16-bit service UUID.
pub fn contains_service_uuid16(data: &[u8], uuid: u16) -> bool {
    let uuid_le = uuid.to_le_bytes();

    AdStructures::new(data)
        .filter(|ad| ad.ad_type == ad_type::UUID16_SOME || ad.ad_type == ad_type::UUID16_ALL)
        .any(|ad| ad.data.chunks_exact(2).any(|chunk| chunk == uuid_le))
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    for ad in AdStructures::new(data) {
        if ad.ad_type == ad_type::NAME_SHORTENED || ad.ad_type == ad_type::NAME_COMPLETE {
            let mut name = String::new();
            for &b in ad.data {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return name;
        }
    }

    let mut s = String::new();
    let _ = s.push_str("Unknown");
    s
}

/// Legacy advertising data assembled from typed elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvPayload {
    bytes: Vec<u8, ADV_DATA_MAX>,
}

impl AdvPayload {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Append one AD structure.
    pub fn push(&mut self, ad_type: u8, data: &[u8]) -> Result<(), Error> {
        if self.bytes.len() + data.len() + 2 > ADV_DATA_MAX {
            return Err(Error::AdvPayloadOverflow);
        }
        self.bytes
            .push(data.len() as u8 + 1)
            .map_err(|_| Error::AdvPayloadOverflow)?;
        self.bytes
            .push(ad_type)
            .map_err(|_| Error::AdvPayloadOverflow)?;
        self.bytes
            .extend_from_slice(data)
            .map_err(|_| Error::AdvPayloadOverflow)
    }

    pub fn with_flags(mut self, flags: u8) -> Result<Self, Error> {
        self.push(ad_type::FLAGS, &[flags])?;
        Ok(self)
    }

    /// Complete list of 16-bit service UUIDs, little-endian on air.
    pub fn with_uuid16_list(mut self, uuids: &[u16]) -> Result<Self, Error> {
        let mut list: Vec<u8, ADV_DATA_MAX> = Vec::new();
        for uuid in uuids {
            list.extend_from_slice(&uuid.to_le_bytes())
                .map_err(|_| Error::AdvPayloadOverflow)?;
        }
        self.push(ad_type::UUID16_ALL, &list)?;
        Ok(self)
    }

    pub fn with_complete_name(mut self, name: &str) -> Result<Self, Error> {
        self.push(ad_type::NAME_COMPLETE, name.as_bytes())?;
        Ok(self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
