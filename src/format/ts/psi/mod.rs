//! Program specific information: table parsers and the lookup tables they use.
//!
//! Parsers here are pure: they turn a complete section into a typed value and
//! leave every decision about filters and streams to the demux context.

pub mod descriptor;
pub mod eit;
pub mod mp4;
pub mod pat;
pub mod pmt;
pub mod scte;
pub mod sdt;
pub mod stream_type;

pub use descriptor::{DvbInfo, PmtEntry};
pub use eit::parse_eit;
pub use mp4::{DecoderConfig, Mp4Descriptor};
pub use pat::{parse_pat, Pat, PatEntry};
pub use pmt::{parse_pmt, Pmt};
pub use scte::{parse_scte35, SpliceInfo};
pub use sdt::{parse_sdt, Sdt, ServiceInfo};
