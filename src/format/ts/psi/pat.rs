use crate::error::{Result, TsError};
use crate::format::ts::section::SectionHeader;
use crate::format::ts::types::{MAX_PROGRAMS_IN_PAT, PAT_TID};
use crate::utils::ByteCursor;
use log::trace;

/// One program announced by the PAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program: u16,
    pub pmt_pid: u16,
}

/// Program association table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub ts_id: u16,
    pub version: u8,
    /// Programs in table order; the network PID entry (program 0) is left out
    pub programs: Vec<PatEntry>,
}

/// Parses a PAT section body.
///
/// An entry pointing at PID 0 invalidates the whole table.
pub fn parse_pat(header: &SectionHeader, body: &[u8]) -> Result<Pat> {
    if header.tid != PAT_TID {
        return Err(TsError::Parser(format!("PAT with table id 0x{:02x}", header.tid)));
    }

    let mut cursor = ByteCursor::new(body);
    let mut programs = Vec::new();
    for _ in 0..MAX_PROGRAMS_IN_PAT {
        let Ok(program) = cursor.read_u16() else {
            break;
        };
        let Ok(pid) = cursor.read_u16() else {
            break;
        };
        let pmt_pid = pid & 0x1fff;
        if pmt_pid == 0 {
            return Err(TsError::Parser(format!(
                "Invalid PAT ignored: program 0x{:x} on pid 0",
                program
            )));
        }
        trace!("PAT program 0x{:x} pmt pid 0x{:x}", program, pmt_pid);
        if program == 0 {
            continue;
        }
        programs.push(PatEntry { program, pmt_pid });
    }

    Ok(Pat {
        ts_id: header.id,
        version: header.version,
        programs,
    })
}

impl Pat {
    /// Whether `other` lists the same programs in the same order.
    pub fn same_programs(&self, other: &[PatEntry]) -> bool {
        self.programs == other
    }
}
