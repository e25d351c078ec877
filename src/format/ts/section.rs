use super::types::*;
use crate::error::{Result, TsError};
use crate::utils::Crc32Mpeg2;
use log::warn;

/// Which table parser receives the sections completed on a PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionHandler {
    Pat,
    Pmt,
    Sdt,
    Eit,
    Scte35,
    /// MPEG-4 object descriptor updates
    M4Od,
    /// DSM-CC carousel data handed out as packets
    Dsmcc,
}

/// Reassembly state of a section filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionState {
    /// Continuations are dropped until the next payload unit start
    Waiting,
    /// `len` is known once three bytes are buffered
    Collecting { len: Option<usize> },
}

/// The long-form header at the start of every PSI section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub tid: u8,
    /// Transport stream id, program number or service id depending on the table
    pub id: u16,
    pub version: u8,
    pub sec_num: u8,
    pub last_sec_num: u8,
}

impl SectionHeader {
    /// Splits a complete section into its header and the body between the
    /// header and the trailing CRC.
    pub fn parse(section: &[u8]) -> Result<(SectionHeader, &[u8])> {
        if section.len() < 8 + CRC_SIZE {
            return Err(TsError::Parser(format!(
                "section of {} bytes has no room for a header",
                section.len()
            )));
        }
        let header = SectionHeader {
            tid: section[0],
            id: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] >> 1) & 0x1f,
            sec_num: section[6],
            last_sec_num: section[7],
        };
        Ok((header, &section[8..section.len() - CRC_SIZE]))
    }
}

/// Per-PID PSI section reassembly.
pub struct SectionFilter {
    pub handler: SectionHandler,
    pub check_crc: bool,
    /// PMT stream type that created this filter, zero for PSI tables
    pub stream_type: u8,
    state: SectionState,
    buf: Vec<u8>,
    last_ver: Option<u8>,
    last_crc: Option<u32>,
    crc: Crc32Mpeg2,
}

impl SectionFilter {
    pub fn new(handler: SectionHandler, check_crc: bool) -> Self {
        Self {
            handler,
            check_crc,
            stream_type: 0,
            state: SectionState::Waiting,
            buf: Vec::with_capacity(MAX_SECTION_SIZE),
            last_ver: None,
            last_crc: None,
            crc: Crc32Mpeg2::new(),
        }
    }

    pub fn with_stream_type(mut self, stream_type: u8) -> Self {
        self.stream_type = stream_type;
        self
    }

    /// Feeds payload bytes and returns every section completed by them.
    ///
    /// `is_start` marks bytes that begin a new section (after the pointer
    /// field). With `chop` set, an incomplete PMT is accepted with whatever
    /// has arrived so far.
    pub fn write(&mut self, pid: u16, data: &[u8], is_start: bool, chop: bool) -> Vec<Vec<u8>> {
        let mut completed = Vec::new();

        if is_start {
            self.buf.clear();
            let len = data.len().min(MAX_SECTION_SIZE);
            self.buf.extend_from_slice(&data[..len]);
            self.state = SectionState::Collecting { len: None };
        } else {
            if self.state == SectionState::Waiting {
                return completed;
            }
            let room = MAX_SECTION_SIZE - self.buf.len();
            let len = data.len().min(room);
            self.buf.extend_from_slice(&data[..len]);
        }

        while let SectionState::Collecting { len } = self.state {
            let mut len = len;
            if len.is_none() && self.buf.len() >= SECTION_HEADER_SIZE {
                let declared =
                    (u16::from_be_bytes([self.buf[1], self.buf[2]]) & 0x0fff) as usize + SECTION_HEADER_SIZE;
                if declared > MAX_SECTION_SIZE {
                    // stuffing or garbage, wait for the next unit start
                    self.state = SectionState::Waiting;
                    break;
                }
                len = Some(declared);
            }

            let section_len = match len {
                Some(len) if self.buf.len() >= len => len,
                _ if chop && self.buf.first() == Some(&PMT_TID) => self.buf.len(),
                _ => {
                    self.state = SectionState::Collecting { len };
                    break;
                }
            };

            let section = &self.buf[..section_len];
            if !self.check_crc || self.crc.verify(section) {
                completed.push(section.to_vec());
            } else {
                warn!("PID {:#x} CRC error", pid);
            }

            if self.buf.len() > section_len {
                self.buf.drain(..section_len);
                self.state = SectionState::Collecting { len: None };
            } else {
                self.buf.clear();
                self.state = SectionState::Waiting;
            }
        }

        completed
    }

    /// True when `section` repeats the last version and CRC seen; otherwise
    /// remembers them.
    pub fn skip_identical(&mut self, header: &SectionHeader, section: &[u8]) -> bool {
        let crc = section
            .len()
            .checked_sub(CRC_SIZE)
            .map(|at| u32::from_be_bytes([section[at], section[at + 1], section[at + 2], section[at + 3]]));
        if self.last_ver == Some(header.version) && self.last_crc == crc {
            return true;
        }
        self.last_ver = Some(header.version);
        self.last_crc = crc;
        false
    }

    /// Forgets the last version so the next section is parsed again.
    pub fn forget_version(&mut self) {
        self.last_ver = None;
    }
}
