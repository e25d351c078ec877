use crate::error::{Result, TsError};
use crate::format::ts::section::SectionHeader;
use crate::format::ts::types::{EIT_TID_MAX, EIT_TID_MIN};

/// Service id marking a scrambled EIT
const SCRAMBLED_SERVICE_ID: u16 = 0xffff;

/// Checks an EIT section before it is handed out as EPG data.
///
/// Returns the service id, or `None` for a scrambled table.
pub fn parse_eit(header: &SectionHeader) -> Result<Option<u16>> {
    if !(EIT_TID_MIN..=EIT_TID_MAX).contains(&header.tid) {
        return Err(TsError::Parser(format!("EIT with table id 0x{:02x}", header.tid)));
    }
    if header.id == SCRAMBLED_SERVICE_ID {
        return Ok(None);
    }
    Ok(Some(header.id))
}
