//! Capacity decoding of the Card Specific Data register.
//!
//! The CSD is a 128-bit big-endian register. Where the capacity fields live
//! depends on `CSD_STRUCTURE` in the top two bits of byte 0.

/// Bytes read after the data token of `SEND_CSD`.
pub const CSD_LEN: usize = 17;

/// Layout of the register, from `CSD_STRUCTURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Standard capacity layout with `C_SIZE_MULT` and `READ_BL_LEN`.
    V1,
    /// High capacity layout, `C_SIZE` counts 512 KiB units.
    V2,
}

/// Reads `CSD_STRUCTURE` to pick the register layout.
pub fn version(csd: &[u8; CSD_LEN]) -> Version {
    if csd[0] & 0xC0 != 0 {
        Version::V2
    } else {
        Version::V1
    }
}

/// Index of the last 512-byte block of the card.
pub fn last_block(csd: &[u8; CSD_LEN]) -> u32 {
    let blocks = match version(csd) {
        Version::V2 => {
            // C_SIZE, bits 69:48
            let c_size = u64::from(csd[7] & 0x3F) << 16
                | u64::from(csd[8]) << 8
                | u64::from(csd[9]);
            (c_size + 1) * 1024
        }
        Version::V1 => {
            // C_SIZE, bits 73:62
            let c_size = (u64::from(csd[6]) << 16 | u64::from(csd[7]) << 8 | u64::from(csd[8]))
                & 0x0003_FFC0;
            let c_size = c_size >> 6;
            // C_SIZE_MULT, bits 49:47
            let c_size_mult = (csd[9] & 0x03) << 1 | (csd[10] & 0x80) >> 7;
            // READ_BL_LEN, bits 83:80
            let read_bl_len = csd[5] & 0x0F;
            ((c_size + 1) << (c_size_mult + 2 + read_bl_len)) / 512
        }
    };
    // Saturates for a zero-sized (garbage) v1 register.
    blocks.saturating_sub(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bytes: &[u8]) -> [u8; CSD_LEN] {
        let mut csd = [0; CSD_LEN];
        csd[..bytes.len()].copy_from_slice(bytes);
        csd
    }

    #[test]
    fn v2_size_field() {
        let mut csd = [0; CSD_LEN];
        csd[0] = 0x40;
        csd[7] = 0x00;
        csd[8] = 0x1F;
        csd[9] = 0x5E;
        assert_eq!(version(&csd), Version::V2);
        assert_eq!(last_block(&csd), (0x1F5E + 1) * 1024 - 1);
        assert_eq!(last_block(&csd), 8_223_743);
    }

    #[test]
    fn v2_ignores_reserved_bits_of_byte_7() {
        let mut csd = [0; CSD_LEN];
        csd[0] = 0x40;
        csd[7] = 0xC0;
        assert_eq!(last_block(&csd), 1023);
    }

    #[test]
    fn v2_sample_card() {
        let csd = record(&[
            0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69, 0x7F, 0x80, 0x0A, 0x40,
            0x00, 0x8B,
        ]);
        assert_eq!(last_block(&csd), 7_710_719);
    }

    #[test]
    fn v2_largest_size_field_fits() {
        let mut csd = [0; CSD_LEN];
        csd[0] = 0x40;
        csd[7] = 0x3F;
        csd[8] = 0xFF;
        csd[9] = 0xFF;
        assert_eq!(last_block(&csd), u32::MAX);
    }

    #[test]
    fn v1_size_field_and_multiplier() {
        let mut csd = [0; CSD_LEN];
        csd[5] = 0x59; // READ_BL_LEN = 9
        csd[6] = 0x00;
        csd[7] = 0xFF;
        csd[8] = 0xC0; // C_SIZE = 0x3FF
        csd[9] = 0x03;
        csd[10] = 0x80; // C_SIZE_MULT = 7
        assert_eq!(version(&csd), Version::V1);
        assert_eq!(last_block(&csd), 524_287);
    }

    #[test]
    fn v1_sample_card() {
        let csd = record(&[
            0x00, 0x7F, 0x00, 0x32, 0x5B, 0x5A, 0x83, 0xAF, 0x7F, 0xFF, 0xCF, 0x80, 0x16, 0x80,
            0x00, 0x6F,
        ]);
        // 1_978_662_912 bytes
        assert_eq!(last_block(&csd), 3_864_575);
    }

    #[test]
    fn v1_short_read_blocks() {
        let mut csd = [0; CSD_LEN];
        csd[5] = 0x08; // 256 byte blocks
        csd[8] = 0x40; // C_SIZE = 1
        // 2 * 4 * 256 bytes = 4 blocks
        assert_eq!(last_block(&csd), 3);
    }

    #[test]
    fn decoding_is_pure() {
        let csd = record(&[0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69]);
        let first = last_block(&csd);
        assert_eq!(last_block(&csd), first);
        assert_eq!(csd[9], 0x69);
    }
}
