//! Split-field integer encodings used on the ZCL wire.
//!
//! Internally the meter works with plain `u64`/`i32`. These helpers do the
//! packing at the serialization boundary, little-endian as ZCL requires.
//!
//! | Type    | Range                         | Out of range        |
//! |---------|-------------------------------|---------------------|
//! | uint24  | 0 ..= 0xFF_FFFF               | saturates to max    |
//! | int24   | -0x80_0000 ..= 0x7F_FFFF      | clamps to the ends  |
//! | uint48  | 0 ..= 0xFFFF_FFFF_FFFF        | saturates to max    |

pub const U24_MAX: u32 = 0x00FF_FFFF;
pub const I24_MIN: i32 = -0x0080_0000;
pub const I24_MAX: i32 = 0x007F_FFFF;
pub const U48_MAX: u64 = 0xFFFF_FFFF_FFFF;

pub fn encode_u24(value: u32) -> [u8; 3] {
    let v = value.min(U24_MAX).to_le_bytes();
    [v[0], v[1], v[2]]
}

pub fn decode_u24(bytes: [u8; 3]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

pub fn encode_i24(value: i32) -> [u8; 3] {
    let v = value.clamp(I24_MIN, I24_MAX).to_le_bytes();
    [v[0], v[1], v[2]]
}

pub fn decode_i24(bytes: [u8; 3]) -> i32 {
    // Sign-extend from bit 23.
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) << 8 >> 8
}

/// uint48 is carried by the stack as `{ low: u32, high: u16 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U48Parts {
    pub low: u32,
    pub high: u16,
}

pub fn split_u48(value: u64) -> U48Parts {
    let v = value.min(U48_MAX);
    U48Parts {
        low: v as u32,
        high: (v >> 32) as u16,
    }
}

pub fn encode_u48(value: u64) -> [u8; 6] {
    let v = value.min(U48_MAX).to_le_bytes();
    [v[0], v[1], v[2], v[3], v[4], v[5]]
}

pub fn decode_u48(bytes: [u8; 6]) -> u64 {
    let mut b = [0u8; 8];
    b[..6].copy_from_slice(&bytes);
    u64::from_le_bytes(b)
}
