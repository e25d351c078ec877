use super::types::*;
use crate::error::{Result, TsError};

/// Adaptation field control values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationControl {
    Reserved,
    PayloadOnly,
    AdaptationOnly,
    AdaptationAndPayload,
}

impl AdaptationControl {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AdaptationControl::Reserved,
            1 => AdaptationControl::PayloadOnly,
            2 => AdaptationControl::AdaptationOnly,
            _ => AdaptationControl::AdaptationAndPayload,
        }
    }

    pub fn has_adaptation(&self) -> bool {
        matches!(
            self,
            AdaptationControl::AdaptationOnly | AdaptationControl::AdaptationAndPayload
        )
    }

    pub fn has_payload(&self) -> bool {
        matches!(
            self,
            AdaptationControl::PayloadOnly | AdaptationControl::AdaptationAndPayload
        )
    }
}

/// The four-byte TS packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation: AdaptationControl,
    pub continuity_counter: u8,
}

impl TsHeader {
    pub fn parse(data: &[u8]) -> Result<TsHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(TsError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TsHeader {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation: AdaptationControl::from_bits(data[3] >> 4),
            continuity_counter: data[3] & 0x0F,
        })
    }
}

/// PID of a framed packet without validating anything else.
pub fn packet_pid(data: &[u8]) -> u16 {
    (((data[1] & 0x1F) as u16) << 8) | data[2] as u16
}

/// The adaptation-field flags the demuxer acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptationField {
    /// Length byte, not counting itself
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
    /// 27 MHz program clock reference
    pub pcr: Option<i64>,
}

/// Parses the adaptation field at byte 4 of a packet, if the header has one.
pub fn parse_adaptation_field(data: &[u8]) -> Option<AdaptationField> {
    if data.len() < TS_HEADER_SIZE + 1 || (data[3] & 0x20) == 0 {
        return None;
    }

    let length = data[4] as usize;
    let mut field = AdaptationField {
        length,
        ..AdaptationField::default()
    };
    if length == 0 || data.len() < 6 {
        return Some(field);
    }

    let flags = data[5];
    field.discontinuity = (flags & 0x80) != 0;
    field.random_access = (flags & 0x40) != 0;
    field.pcr = parse_pcr(data);
    Some(field)
}

/// Extracts the PCR (base * 300 + extension) from a packet.
pub fn parse_pcr(data: &[u8]) -> Option<i64> {
    if data.len() < TS_HEADER_SIZE + 2 {
        return None;
    }
    let afc = (data[3] >> 4) & 0x03;
    if afc <= 1 {
        return None;
    }
    let len = data[4] as usize;
    if len == 0 || (data[5] & 0x10) == 0 {
        return None;
    }
    // flags byte is part of the declared length
    if len - 1 < 6 || data.len() < 12 {
        return None;
    }

    let pos = 6;
    let pcr_base = ((data[pos] as i64) << 25)
        | ((data[pos + 1] as i64) << 17)
        | ((data[pos + 2] as i64) << 9)
        | ((data[pos + 3] as i64) << 1)
        | ((data[pos + 4] & 0x80) as i64 >> 7);
    let pcr_ext = (((data[pos + 4] & 0x01) as i64) << 8) | (data[pos + 5] as i64);
    Some(pcr_base * 300 + pcr_ext)
}

/// Decodes a 33-bit PES timestamp from its 5-byte marker-bit layout.
pub fn parse_pes_timestamp(data: &[u8]) -> i64 {
    ((data[0] as i64 & 0x0E) << 29)
        | ((data[1] as i64) << 22)
        | ((data[2] as i64 & 0xFE) << 14)
        | ((data[3] as i64) << 7)
        | ((data[4] as i64 & 0xFE) >> 1)
}
