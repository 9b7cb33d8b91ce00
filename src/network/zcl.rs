//! Cluster and attribute identifiers plus the typed attribute value.

use crate::metering::codec;

pub const CLUSTER_BASIC: u16 = 0x0000;
pub const CLUSTER_POWER_CONFIG: u16 = 0x0001;
pub const CLUSTER_METERING: u16 = 0x0702;
/// Manufacturer-specific maintenance cluster.
pub const CLUSTER_METER_MAINTENANCE: u16 = 0xFD10;

// Basic
pub const ATTR_MANUFACTURER_NAME: u16 = 0x0004;
pub const ATTR_MODEL_IDENTIFIER: u16 = 0x0005;
pub const ATTR_POWER_SOURCE: u16 = 0x0007;
pub const ATTR_SW_BUILD_ID: u16 = 0x4000;

// Power configuration
pub const ATTR_BATTERY_VOLTAGE: u16 = 0x0020;
pub const ATTR_BATTERY_PERCENTAGE: u16 = 0x0021;

// Metering
pub const ATTR_CURRENT_SUMMATION_DELIVERED: u16 = 0x0000;
pub const ATTR_UNIT_OF_MEASURE: u16 = 0x0300;
pub const ATTR_MULTIPLIER: u16 = 0x0301;
pub const ATTR_DIVISOR: u16 = 0x0302;
pub const ATTR_SUMMATION_FORMATTING: u16 = 0x0303;
pub const ATTR_DEMAND_FORMATTING: u16 = 0x0304;
pub const ATTR_METERING_DEVICE_TYPE: u16 = 0x0306;
pub const ATTR_INSTANTANEOUS_DEMAND: u16 = 0x0400;

/// Write-only boolean on the maintenance cluster; writing true zeroes the counter.
pub const ATTR_RESET_COUNTER: u16 = 0x0008;

/// Basic.PowerSource value for a battery-powered node.
pub const POWER_SOURCE_BATTERY: u8 = 0x03;

/// Longest character string attribute this node publishes.
pub const MAX_STRING_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bool(bool),
    U8(u8),
    Bitmap8(u8),
    Enum8(u8),
    U24(u32),
    S24(i32),
    U48(u64),
    Str(heapless::String<MAX_STRING_LEN>),
}

impl AttrValue {
    /// Character string attribute, cut at [`MAX_STRING_LEN`] characters.
    pub fn text(s: &str) -> Self {
        let mut out = heapless::String::new();
        for c in s.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        Self::Str(out)
    }

    /// ZCL data type identifier.
    pub fn zcl_type(&self) -> u8 {
        match self {
            Self::Bool(_) => 0x10,
            Self::Bitmap8(_) => 0x18,
            Self::U8(_) => 0x20,
            Self::U24(_) => 0x22,
            Self::U48(_) => 0x25,
            Self::S24(_) => 0x2A,
            Self::Enum8(_) => 0x30,
            Self::Str(_) => 0x42,
        }
    }

    /// Little-endian payload as the stack stores it. Strings carry a
    /// leading length octet.
    pub fn to_bytes(&self) -> heapless::Vec<u8, { MAX_STRING_LEN + 1 }> {
        let mut out = heapless::Vec::new();
        // Every arm writes at most MAX_STRING_LEN + 1 bytes.
        let _ = match self {
            Self::Bool(b) => out.push(u8::from(*b)).map_err(|_| ()),
            Self::U8(v) | Self::Bitmap8(v) | Self::Enum8(v) => out.push(*v).map_err(|_| ()),
            Self::U24(v) => out.extend_from_slice(&codec::encode_u24(*v)),
            Self::S24(v) => out.extend_from_slice(&codec::encode_i24(*v)),
            Self::U48(v) => out.extend_from_slice(&codec::encode_u48(*v)),
            Self::Str(s) => out
                .push(s.len() as u8)
                .map_err(|_| ())
                .and_then(|()| out.extend_from_slice(s.as_bytes()).map_err(|_| ())),
        };
        out
    }
}
