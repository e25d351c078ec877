#![doc(html_root_url = "https://docs.rs/tsdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsdemux - MPEG-2 Transport Stream demultiplexer
//!
//! `tsdemux` reads an MPEG-2 Transport Stream from any seekable async byte
//! source and turns it into elementary stream packets with repaired
//! timestamps.
//!
//! ## Features
//!
//! - Packet size detection for 188, 192 (DVHS) and 204 (FEC) byte framing
//! - PAT, PMT, SDT, EIT, SCTE-35 and MPEG-4 object descriptor tables
//! - PES reassembly with PTS/DTS extraction and SL packetization
//! - Continuity checking and PCR tracking per PID
//! - Teletext and subtitle PTS repair from the program clock
//! - Duration estimation, bisection seeking and a raw packet mode
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsdemux::format::ts::{AsyncSource, TsDemuxer};
//! use tsdemux::DemuxOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = tokio::fs::File::open("capture.ts").await?;
//!     let mut demuxer = TsDemuxer::open(AsyncSource::new(file), DemuxOptions::default()).await?;
//!
//!     for stream in demuxer.streams() {
//!         println!("pid 0x{:x}: {}", stream.id, stream.codec_id());
//!     }
//!
//!     loop {
//!         match demuxer.read_packet().await {
//!             Ok(packet) => println!("stream {} pts {:?}", packet.stream_index, packet.pts),
//!             Err(tsdemux::TsError::Eof) => break,
//!             Err(err) => return Err(err.into()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: packets, streams, codec ids and timestamp arithmetic
//! - `config`: demuxer options, from code, a TOML-like file or the environment
//! - `error`: the crate error type and `Result` alias
//! - `format`: the `Demuxer` trait and the transport stream implementation
//! - `utils`: bit reading, byte cursors and the MPEG-2 CRC

/// Audio/Video base types and utilities
pub mod av;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Container format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

pub use config::DemuxOptions;
pub use error::{Result, TsError};
pub use format::ts::TsDemuxer;
