//! CRC-16/CCITT-FALSE as used on the cell bus.
//!
//! Width 16, polynomial `0x1021`, initial value `0xFFFF`, no reflection and no
//! final xor. Computed bit by bit, MSB first, so it matches the slave firmware
//! byte for byte.

const POLYNOMIAL: u16 = 0x1021;

pub fn init() -> u16 {
    0xFFFF
}

pub fn update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let mut mask: u8 = 0x80;
        while mask != 0 {
            let mut bit = crc & 0x8000 != 0;
            if byte & mask != 0 {
                bit = !bit;
            }
            crc <<= 1;
            if bit {
                crc ^= POLYNOMIAL;
            }
            mask >>= 1;
        }
    }
    crc
}

pub fn finalize(crc: u16) -> u16 {
    crc & 0xFFFF
}

/// One-shot checksum of a complete buffer.
pub fn checksum(data: &[u8]) -> u16 {
    finalize(update(init(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_is_init() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = [0x00, 0x30, 0x30, b'/', 0xFE, 0xFF, 0x12];
        let mut crc = init();
        for chunk in data.chunks(3) {
            crc = update(crc, chunk);
        }
        assert_eq!(finalize(crc), checksum(&data));
    }

    #[test]
    fn matches_reference_implementation() {
        let reference = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_3740);
        let samples: [&[u8]; 4] = [
            b"",
            b"\xfe\xff\x00",
            &[0x34, 0x12, b's'],
            b"The quick brown fox jumps over the lazy dog",
        ];
        for sample in samples {
            assert_eq!(checksum(sample), reference.checksum(sample), "{sample:02X?}");
        }
    }
}
