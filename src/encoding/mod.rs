// Byte-level codecs shared by the block and table formats.
//
// Fixed-width integers are little-endian. Varints are the usual base-128
// encoding: seven payload bits per byte, high bit set on every byte except the
// last.

pub mod crc;
pub mod hash;

pub const MAX_VARINT32_LEN: usize = 5;
pub const MAX_VARINT64_LEN: usize = 10;

pub fn put_fixed32(dst: &mut Vec<u8>, v: u32) {
    dst.extend_from_slice(&v.to_le_bytes());
}

pub fn put_fixed64(dst: &mut Vec<u8>, v: u64) {
    dst.extend_from_slice(&v.to_le_bytes());
}

// Callers must hand in at least 4 bytes.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    let mut buf = [0_u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

// Callers must hand in at least 8 bytes.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0_u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

pub fn put_varint32(dst: &mut Vec<u8>, v: u32) {
    put_varint64(dst, v as u64)
}

pub fn put_varint64(dst: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        dst.push((v as u8) | 0x80);
        v >>= 7;
    }
    dst.push(v as u8);
}

pub fn varint_length(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint from the front of `src`, returning the value and the
/// number of bytes consumed. Returns `None` on truncated or overlong input.
pub fn get_varint64(src: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0_u64;
    for (i, byte) in src.iter().take(MAX_VARINT64_LEN).enumerate() {
        let payload = (byte & 0x7f) as u64;
        if i == MAX_VARINT64_LEN - 1 && payload > 1 {
            return None;
        }
        result |= payload << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

pub fn get_varint32(src: &[u8]) -> Option<(u32, usize)> {
    let (v, n) = get_varint64(&src[..src.len().min(MAX_VARINT32_LEN)])?;
    if v > u32::MAX as u64 {
        return None;
    }
    Some((v as u32, n))
}
