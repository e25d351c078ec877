use crate::error::{Result, TsError};

/// A bit-level reader over a byte slice, most significant bit first.
///
/// Used for the MPEG-4 sync-layer packet header, whose fields are not byte
/// aligned and whose widths come from the stream's SL configuration.
///
/// Example:
/// ```
/// use tsdemux::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    ///
    /// Returns error if end of data is reached.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(TsError::InvalidData("Reached end of bit data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (n <= 32) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(TsError::InvalidData("Too many bits requested".into()));
        }
        Ok(self.read_bits64(n)? as u32)
    }

    /// Reads n bits (n <= 64) as a big-endian number.
    pub fn read_bits64(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(TsError::InvalidData("Too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(TsError::InvalidData("Reached end of bit data".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if n as usize > self.available_bits() {
            return Err(TsError::InvalidData("Skipped past end of bit data".into()));
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }

    /// Number of bits consumed so far.
    pub fn position(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        let data = &[0b10110011, 0b01011010];
        let mut reader = BitReader::new(data);

        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10011);
        assert_eq!(reader.read_bits(4).unwrap(), 0b0101);
        assert_eq!(reader.position(), 12);
        assert_eq!(reader.available_bits(), 4);
    }

    #[test]
    fn test_read_bits64_spanning_bytes() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0xff];
        let mut reader = BitReader::new(&data);
        reader.skip_bits(4).unwrap();
        assert_eq!(reader.read_bits64(64).unwrap(), 0x2345_6789_abcd_ef0f);
        assert_eq!(reader.available_bits(), 4);
    }

    #[test]
    fn test_end_of_data() {
        let mut reader = BitReader::new(&[0xff]);
        assert!(reader.read_bits(9).is_err());
        // a failed read must not consume anything
        assert_eq!(reader.read_bits(8).unwrap(), 0xff);
        assert!(reader.read_bit().is_err());
        assert!(reader.skip_bits(1).is_err());
    }

    #[quickcheck]
    fn prop_skip_matches_read(data: Vec<u8>, n: u8) -> bool {
        let n = (n as usize % (data.len() * 8 + 1)) as u32;
        let mut a = BitReader::new(&data);
        let mut b = BitReader::new(&data);
        a.skip_bits(n).unwrap();
        for _ in 0..n {
            b.read_bit().unwrap();
        }
        a.position() == b.position() && a.available_bits() == b.available_bits()
    }
}
