//! # MPEG Transport Stream (TS) demuxing
//!
//! The demuxer is layered the way a transport stream is:
//!
//! - **Framing**: packet size detection and resynchronisation (`framer`)
//! - **Packets**: header and adaptation field parsing (`parser`)
//! - **Filters**: one per PID, either a section or a PES assembler (`filter`)
//! - **Tables**: PAT, PMT, SDT, EIT, SCTE-35 and MPEG-4 descriptors (`psi`)
//! - **Streams**: the registry of elementary streams and the programs
//!   that own them (`registry`, `program`)
//! - **Timing**: PCR tracking, wrap references and duration estimation
//!   (`timing`)
//!
//! `context` ties these together per packet and `demuxer` drives the
//! context from a [`ByteSource`].
//!
//! ## Example
//!
//! ```rust
//! use tsdemux::format::ts::{AsyncSource, TsDemuxer};
//! use tsdemux::{DemuxOptions, TsError};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! tokio_test::block_on(async {
//!     // a stream of null packets carries no programs
//!     let mut data = Vec::new();
//!     for _ in 0..10 {
//!         let mut packet = vec![0xffu8; 188];
//!         packet[..4].copy_from_slice(&[0x47, 0x1f, 0xff, 0x10]);
//!         data.extend_from_slice(&packet);
//!     }
//!     let options = DemuxOptions::default().with_estimate_duration(false);
//!     let mut demuxer = TsDemuxer::open(AsyncSource::new(Cursor::new(data)), options).await?;
//!     assert!(demuxer.streams().is_empty());
//!     assert!(matches!(demuxer.read_packet().await, Err(TsError::Eof)));
//!     Ok(())
//! })
//! # }
//! ```

/// Per-packet demux state shared by every filter
pub mod context;

/// TS demuxer driving the context from a byte source
pub mod demuxer;

/// Per-PID filters and the table holding them
pub mod filter;

/// Packet size detection and resynchronisation
pub mod framer;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet reassembly
pub mod pes;

/// Reusable payload buffers
pub mod pool;

/// Programs announced by the PAT
pub mod program;

/// Program specific information tables
pub mod psi;

/// Elementary stream registry and change notifications
pub mod registry;

/// Section reassembly and version filtering
pub mod section;

/// MPEG-4 SL packet headers
pub mod sl;

/// Seekable byte sources
pub mod source;

/// Timestamp wrap handling and duration estimation
pub mod timing;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use demuxer::{SeekFlags, TsDemuxer};
pub use parser::TsHeader;
pub use program::Program;
pub use psi::ServiceInfo;
pub use registry::{StreamsChanged, StreamsChangedEvent};
pub use source::{AsyncSource, ByteSource, InterruptHandle};
pub use timing::{DurationMethod, Timings};
pub use types::{
    PAT_PID,
    SDT_PID,
    TS_DVHS_PACKET_SIZE,
    TS_FEC_PACKET_SIZE,
    TS_PACKET_SIZE,
};
