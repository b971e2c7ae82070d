use crc::{Crc, CRC_32_ISCSI};

// CRC-32C (Castagnoli).
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282_ead8;

pub fn value(data: &[u8]) -> u32 {
    CRC32C.checksum(data)
}

// Checksum of a block payload followed by its one-byte compression tag, as
// stored in the block trailer (before masking).
pub fn block_value(payload: &[u8], compression_tag: u8) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(payload);
    digest.update(&[compression_tag]);
    digest.finalize()
}

// Stored checksums are masked: computing the CRC of a string that itself
// embeds CRCs is otherwise prone to degenerate results.
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_vectors() {
        assert_eq!(value(b"123456789"), 0xe306_9283);
        assert_eq!(value(&[0_u8; 32]), 0x8a91_36aa);
        assert_eq!(value(&[0xff_u8; 32]), 0x62a8_ab43);
    }

    #[test]
    fn test_block_value_covers_tag() {
        assert_eq!(block_value(b"abc", 0), value(b"abc\x00"));
        assert_ne!(block_value(b"abc", 0), block_value(b"abc", 1));
    }

    #[test]
    fn test_mask() {
        let crc = value(b"foo");
        assert_ne!(crc, mask(crc));
        assert_ne!(crc, mask(mask(crc)));
        assert_eq!(crc, unmask(mask(crc)));
        assert_eq!(crc, unmask(unmask(mask(mask(crc)))));
    }
}
