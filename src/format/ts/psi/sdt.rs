use crate::error::{Result, TsError};
use crate::format::ts::section::SectionHeader;
use crate::format::ts::types::SDT_TID;
use crate::utils::ByteCursor;
use log::trace;

const SERVICE_DESCRIPTOR: u8 = 0x48;

/// Name and provider of one service, from its service descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service id, equal to the PAT program number
    pub sid: u16,
    pub service_type: u8,
    pub provider: String,
    pub name: String,
}

/// Service description table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdt {
    pub ts_id: u16,
    pub original_network_id: u16,
    pub version: u8,
    pub services: Vec<ServiceInfo>,
}

/// Parses an SDT section body.
///
/// Services without a complete service descriptor are left out. A
/// descriptor loop that overruns the section ends parsing.
pub fn parse_sdt(header: &SectionHeader, body: &[u8]) -> Result<Sdt> {
    if header.tid != SDT_TID {
        return Err(TsError::Parser(format!("SDT with table id 0x{:02x}", header.tid)));
    }
    let mut cursor = ByteCursor::new(body);
    let original_network_id = cursor.read_u16()?;
    // reserved
    cursor.read_u8()?;

    let mut sdt = Sdt {
        ts_id: header.id,
        original_network_id,
        version: header.version,
        services: Vec::new(),
    };
    loop {
        let Ok(sid) = cursor.read_u16() else {
            break;
        };
        // EIT flags
        if cursor.read_u8().is_err() {
            break;
        }
        let Ok(list_len) = cursor.read_u16() else {
            break;
        };
        let Ok(mut list) = cursor.sub((list_len & 0x0fff) as usize) else {
            break;
        };
        while list.remaining() >= 2 {
            let (Ok(tag), Ok(len)) = (list.read_u8(), list.read_u8()) else {
                break;
            };
            let Ok(mut desc) = list.sub(len as usize) else {
                break;
            };
            trace!("SDT tag: 0x{:02x} len={}", tag, len);
            if tag == SERVICE_DESCRIPTOR {
                if let Ok(service) = read_service(sid, &mut desc) {
                    sdt.services.push(service);
                }
            }
        }
    }
    Ok(sdt)
}

fn read_service(sid: u16, desc: &mut ByteCursor<'_>) -> Result<ServiceInfo> {
    let service_type = desc.read_u8()?;
    let provider = desc.read_str8()?;
    let name = desc.read_str8()?;
    Ok(ServiceInfo {
        sid,
        service_type,
        provider,
        name,
    })
}
