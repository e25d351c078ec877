use super::descriptor::{parse_descriptors, PmtEntry};
use super::mp4::{read_iods, Mp4Descriptor};
use super::stream_type::{classify, is_desired};
use crate::av::{CodecId, MediaKind};
use crate::error::{Result, TsError};
use crate::format::ts::section::SectionHeader;
use crate::format::ts::types::*;
use crate::utils::ByteCursor;
use log::{debug, trace};

/// Program map table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program: u16,
    pub version: u8,
    pub pcr_pid: u16,
    /// Registration four-cc from the program info loop, zero if absent
    pub prog_reg: u32,
    pub mp4: Vec<Mp4Descriptor>,
    /// Entries that become streams, in table order
    pub entries: Vec<PmtEntry>,
    /// False when the section ends right after the program info loop
    pub has_stream_loop: bool,
}

/// Parses a PMT section body.
///
/// Entries whose kind and codec are not wanted as streams are dropped here.
pub fn parse_pmt(header: &SectionHeader, body: &[u8]) -> Result<Pmt> {
    if header.tid != PMT_TID {
        return Err(TsError::Parser(format!(
            "PMT parser got table id 0x{:02x}",
            header.tid
        )));
    }
    let mut cursor = ByteCursor::new(body);
    let pcr_pid = cursor.read_u16()? & 0x1fff;
    let mut pmt = Pmt {
        program: header.id,
        version: header.version,
        pcr_pid,
        prog_reg: 0,
        mp4: Vec::new(),
        entries: Vec::new(),
        has_stream_loop: false,
    };
    trace!("PMT program 0x{:x} pcr_pid=0x{:x}", header.id, pcr_pid);

    let mut info_len = (cursor.read_u16()? & 0x0fff) as usize;
    while info_len >= 2 {
        let (Ok(tag), Ok(len)) = (cursor.read_u8(), cursor.read_u8()) else {
            return Ok(pmt);
        };
        let len = len as usize;
        if len > info_len - 2 {
            info_len -= 2;
            break;
        }
        info_len -= len + 2;
        let Ok(mut desc) = cursor.sub(len) else {
            return Ok(pmt);
        };
        trace!("program tag: 0x{:02x} len={}", tag, len);
        match tag {
            0x1d if len >= 2 => {
                // scope and label
                desc.skip(2)?;
                let room = MAX_MP4_DESCR_COUNT - pmt.mp4.len();
                pmt.mp4.extend(read_iods(desc.rest()).into_iter().take(room));
            }
            0x05 if len >= 4 => pmt.prog_reg = desc.read_le32()?,
            _ => {}
        }
    }
    if cursor.skip(info_len).is_err() || cursor.is_empty() {
        return Ok(pmt);
    }
    pmt.has_stream_loop = true;

    loop {
        let (Ok(stream_type), Ok(pid)) = (cursor.read_u8(), cursor.read_u16()) else {
            break;
        };
        let pid = pid & 0x1fff;
        if pmt.entries.len() >= MAX_PMT_ENTRIES {
            debug!("could not add pid 0x{:x}, PMT entry table full", pid);
            break;
        }
        let Ok(desc_len) = cursor.read_u16() else {
            break;
        };
        let Ok(descriptors) = cursor.read_bytes((desc_len & 0x0fff) as usize) else {
            break;
        };

        let (kind, codec) = classify(stream_type, pmt.prog_reg);
        let mut entry = PmtEntry::new(pid, stream_type, kind, codec);
        parse_descriptors(&mut entry, stream_type, descriptors, &pmt.mp4);
        if entry.codec == CodecId::None {
            // unknown types are kept as opaque data for a later probe
            entry.set_codec(MediaKind::Data, CodecId::BinData);
        }
        if is_desired(entry.kind, entry.codec) {
            pmt.entries.push(entry);
        } else {
            trace!("PMT entry pid 0x{:x} type 0x{:02x} not wanted", pid, stream_type);
        }
    }
    Ok(pmt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header() -> SectionHeader {
        SectionHeader {
            tid: PMT_TID,
            id: 1,
            version: 0,
            sec_num: 0,
            last_sec_num: 0,
        }
    }

    fn es(stream_type: u8, pid: u16, descriptors: &[u8]) -> Vec<u8> {
        let mut out = vec![stream_type];
        out.extend_from_slice(&(0xe000 | pid).to_be_bytes());
        out.extend_from_slice(&(0xf000 | descriptors.len() as u16).to_be_bytes());
        out.extend_from_slice(descriptors);
        out
    }

    fn body(pcr_pid: u16, program_info: &[u8], streams: &[Vec<u8>]) -> Vec<u8> {
        let mut out = (0xe000 | pcr_pid).to_be_bytes().to_vec();
        out.extend_from_slice(&(0xf000 | program_info.len() as u16).to_be_bytes());
        out.extend_from_slice(program_info);
        for s in streams {
            out.extend_from_slice(s);
        }
        out
    }

    #[test]
    fn test_h264_and_ac3() {
        let data = body(
            0x100,
            &[],
            &[
                es(0x1b, 0x100, &[]),
                es(0x06, 0x101, &[0x6a, 1, 0x00, 0x0a, 4, b'e', b'n', b'g', 0]),
            ],
        );
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert!(pmt.has_stream_loop);
        assert_eq!(pmt.entries.len(), 2);
        assert_eq!(pmt.entries[0].codec, CodecId::H264);
        assert_eq!(pmt.entries[1].codec, CodecId::Ac3);
        assert_eq!(pmt.entries[1].dvb.language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_registration_selects_hdmv_table() {
        let hdmv = REG_HDMV.to_le_bytes();
        let info = [0x05, 4, hdmv[0], hdmv[1], hdmv[2], hdmv[3]];
        let data = body(0x1011, &info, &[es(0x83, 0x1100, &[]), es(0x90, 0x1200, &[])]);
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert_eq!(pmt.prog_reg, REG_HDMV);
        assert_eq!(pmt.entries[0].codec, CodecId::TrueHd);
        assert_eq!(pmt.entries[1].codec, CodecId::HdmvPgsSubtitle);
    }

    #[test]
    fn test_unknown_types_kept_as_bin_data() {
        let data = body(
            0x100,
            &[],
            &[es(0x1b, 0x101, &[]), es(0x06, 0x300, &[]), es(0x99, 0x301, &[])],
        );
        let pmt = parse_pmt(&header(), &data).unwrap();
        let found: Vec<(u16, MediaKind, CodecId)> =
            pmt.entries.iter().map(|e| (e.pid, e.kind, e.codec)).collect();
        assert_eq!(
            found,
            vec![
                (0x101, MediaKind::Video, CodecId::H264),
                (0x300, MediaKind::Data, CodecId::BinData),
                (0x301, MediaKind::Data, CodecId::BinData),
            ]
        );
    }

    #[test]
    fn test_hdpr_registration_selects_hdmv_table() {
        let hdpr = REG_HDPR.to_le_bytes();
        let info = [0x05, 4, hdpr[0], hdpr[1], hdpr[2], hdpr[3]];
        let data = body(0x1011, &info, &[es(0x1b, 0x1011, &[]), es(0x90, 0x1200, &[])]);
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert_eq!(pmt.prog_reg, REG_HDPR);
        let codecs: Vec<CodecId> = pmt.entries.iter().map(|e| e.codec).collect();
        assert_eq!(codecs, vec![CodecId::H264, CodecId::HdmvPgsSubtitle]);
    }

    #[test]
    fn test_no_stream_loop() {
        let data = body(0x100, &[], &[]);
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert!(!pmt.has_stream_loop);
        assert!(pmt.entries.is_empty());
    }

    #[test]
    fn test_truncated_entry_stops_loop() {
        let mut data = body(0x100, &[], &[es(0x1b, 0x100, &[])]);
        data.extend_from_slice(&[0x0f, 0xe1, 0x01, 0xf0, 0x20, 0x0a]);
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert_eq!(pmt.entries.len(), 1);
    }

    #[test]
    fn test_oversized_program_descriptor_ends_info_loop() {
        // claims 9 bytes inside a 4 byte program info loop
        let data = body(0x100, &[0x05, 9, 0, 0], &[es(0x1b, 0x100, &[])]);
        let pmt = parse_pmt(&header(), &data).unwrap();
        assert_eq!(pmt.prog_reg, 0);
        assert_eq!(pmt.entries.len(), 1);
    }
}
