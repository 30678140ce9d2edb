//! CRC-16/CCITT (polynomial `0x1021`), MSB first, no reflection.

/// Generator polynomial.
pub const POLYNOMIAL: u16 = 0x1021;

/// Seed used for every frame trailer.
pub const DEFAULT_SEED: u16 = 0xFFFF;

/// Incremental checksum over one or more byte ranges.
///
/// Feeding a frame field by field yields the same value as feeding the
/// concatenated bytes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u16) -> Self {
        Self { value: seed }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.value ^= u16::from(byte) << 8;
            for _ in 0..8 {
                self.value = if self.value & 0x8000 != 0 {
                    (self.value << 1) ^ POLYNOMIAL
                } else {
                    self.value << 1
                };
            }
        }
        self
    }

    pub fn finish(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a single contiguous range with the default seed.
pub fn checksum(bytes: &[u8]) -> u16 {
    Crc16::new().update(bytes).finish()
}

/// Checksum of several ranges, as if they were one.
pub fn checksum_parts(parts: &[&[u8]]) -> u16 {
    let mut crc = Crc16::new();
    for part in parts {
        crc.update(part);
    }
    crc.finish()
}
