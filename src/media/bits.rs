//! MSB-first bit reader with Exp-Golomb support
//!
//! Every read returns `None` once the input is exhausted so that callers can
//! propagate with `?` and treat malformed bitstreams as unparseable.

pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Read `n` bits (up to 32)
    pub fn read_bits(&mut self, n: u8) -> Option<u32> {
        if n > 32 {
            return None;
        }

        let mut result = 0u32;
        for _ in 0..n {
            let byte = *self.data.get(self.byte_pos)?;
            let bit = (byte >> (7 - self.bit_pos)) & 1;
            // n == 32 shifts the first bit all the way out, which is intended
            result = result.wrapping_shl(1) | bit as u32;

            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }

        Some(result)
    }

    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    /// Read an unsigned Exp-Golomb value, ue(v)
    pub fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_bool()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }

        if leading_zeros == 0 {
            return Some(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Some(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Read a signed Exp-Golomb value, se(v)
    pub fn read_se(&mut self) -> Option<i32> {
        let code = self.read_ue()? as i64;
        let value = if code % 2 == 0 {
            -(code / 2)
        } else {
            (code + 1) / 2
        };
        Some(value as i32)
    }

    /// Number of bits left to read
    pub fn bits_remaining(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_pos)) * 8 - self.bit_pos as usize
    }
}
