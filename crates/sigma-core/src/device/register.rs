//! Register descriptors and big-endian integer packing.

/// A control register: cell address plus its width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub address: u16,
    pub length: usize,
}

impl Register {
    pub const fn new(address: u16, length: usize) -> Self {
        Self { address, length }
    }

    /// Encodes `value` into exactly [`Register::length`] big-endian bytes.
    pub fn encode(&self, value: u64) -> Vec<u8> {
        int_data(value, self.length)
    }
}

/// Packs the low `length` bytes of `value` big-endian.
///
/// Bytes above the width of `u64` are zero.
///
/// ```rust
/// use sigma_core::device::int_data;
///
/// assert_eq!(int_data(0x0102, 4), vec![0, 0, 1, 2]);
/// assert_eq!(int_data(0x0102, 1), vec![2]);
/// ```
pub fn int_data(value: u64, length: usize) -> Vec<u8> {
    (0..length)
        .rev()
        .map(|i| {
            if i >= 8 {
                0
            } else {
                (value >> (i * 8)) as u8
            }
        })
        .collect()
}

/// Reads `data` as an unsigned big-endian integer, keeping the low 64 bits.
pub fn data_int(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
