/// CRC32 implementation for MPEG-2 TS PSI sections
/// Based on ITU-T H.222.0 / ISO/IEC 13818-1 Annex A
/// Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
/// Initial value: 0xFFFFFFFF, no final XOR, MSB first

const CRC32_MPEG2: u32 = 0x04C11DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc & 0x8000_0000) != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// MPEG-2 CRC32 calculator used for PSI section validation
///
/// Running the checksum over a complete section, trailing CRC field
/// included, yields zero when the section is intact.
#[derive(Debug, Clone, Copy)]
pub struct Crc32Mpeg2 {
    table: &'static [u32; 256],
}

impl Crc32Mpeg2 {
    /// Creates a calculator over the precomputed table
    pub fn new() -> Self {
        Self { table: &TABLE }
    }

    /// Calculates the CRC32 checksum for the given data
    ///
    /// # Examples
    ///
    /// ```
    /// use tsdemux::utils::Crc32Mpeg2;
    ///
    /// let crc = Crc32Mpeg2::new();
    /// assert_eq!(crc.calculate(&[0x01, 0x01]), 0xD66FB816);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        self.update(0xFFFF_FFFF, data)
    }

    /// Continues a checksum over more data
    pub fn update(&self, mut crc: u32, data: &[u8]) -> u32 {
        for &byte in data {
            let index = ((crc >> 24) ^ (byte as u32)) & 0xFF;
            crc = (crc << 8) ^ self.table[index as usize];
        }
        crc
    }

    /// True when `section` (CRC field included) checks out.
    pub fn verify(&self, section: &[u8]) -> bool {
        self.calculate(section) == 0
    }
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self::new()
    }
}
