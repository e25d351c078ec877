use crate::error::{Result, TsError};
use crate::format::ts::types::SCTE_TID;
use crate::utils::ByteCursor;

/// Fixed fields of an SCTE-35 splice info section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceInfo {
    pub protocol_version: u8,
    pub encrypted: bool,
    /// 33-bit offset added to every splice time in the section
    pub pts_adjustment: i64,
    pub tier: u16,
    pub command_type: u8,
}

/// Reads the splice info header of a complete section.
pub fn parse_scte35(section: &[u8]) -> Result<SpliceInfo> {
    let mut cursor = ByteCursor::new(section);
    let tid = cursor.read_u8()?;
    if tid != SCTE_TID {
        return Err(TsError::Parser(format!("SCTE-35 with table id 0x{:02x}", tid)));
    }
    // section length
    cursor.read_u16()?;
    let protocol_version = cursor.read_u8()?;
    let flags = cursor.read_u8()?;
    let low = cursor.read_u32()? as i64;
    let pts_adjustment = ((flags as i64 & 0x01) << 32) | low;
    // cw index
    cursor.read_u8()?;
    let tier_and_len = cursor.read_u24()?;
    let command_type = cursor.read_u8()?;
    Ok(SpliceInfo {
        protocol_version,
        encrypted: flags & 0x80 != 0,
        pts_adjustment,
        tier: (tier_and_len >> 12) as u16,
        command_type,
    })
}
