//! # Utility Functions and Types
//!
//! Small building blocks shared by the demuxer:
//!
//! - Bit-level reading for non byte aligned headers
//! - MPEG-2 CRC32 calculation and validation
//! - Big-endian helpers for section parsing
//!
//! ## Bit Operations
//!
//! ```rust
//! use tsdemux::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! // Read specific number of bits
//! let value = reader.read_bits(3)?; // Reads first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use tsdemux::utils::Crc32Mpeg2;
//!
//! let crc = Crc32Mpeg2::new().calculate(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

/// Byte cursor used by the section parsers
pub mod cursor;

// Re-export commonly used types
pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
pub use cursor::ByteCursor;
