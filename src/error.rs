use std::num::ParseIntError;
use thiserror::Error;

/// Errors produced by the transport stream demuxer.
///
/// Recoverable damage (CRC failures, continuity errors, PES length
/// disagreements) never surfaces here; it is logged and reported through the
/// packet's `corrupt` flag instead. What escapes `read_packet` is terminal for
/// that call.
#[derive(Error, Debug)]
pub enum TsError {
    /// Underlying byte source failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecoverable framing or structural damage
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Malformed PSI section or descriptor
    #[error("parser error: {0}")]
    Parser(String),

    /// The byte source is exhausted
    #[error("end of stream")]
    Eof,

    /// No packet yet, call again
    #[error("resource temporarily unavailable")]
    Again,

    /// Cooperative interrupt was requested
    #[error("interrupted")]
    Exit,

    /// Allocation failed
    #[error("out of memory")]
    OutOfMemory,

    /// Bad option value
    #[error("config error: {0}")]
    Config(String),

    /// Numeric option could not be parsed
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl TsError {
    /// Whether the caller should simply retry `read_packet`.
    pub fn is_again(&self) -> bool {
        matches!(self, TsError::Again)
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, TsError>;
