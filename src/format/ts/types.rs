// Packet framing
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_DVHS_PACKET_SIZE: usize = 192;
pub const TS_FEC_PACKET_SIZE: usize = 204;
pub const TS_HEADER_SIZE: usize = 4;
pub const SYNC_BYTE: u8 = 0x47;
pub const NB_PID_MAX: usize = 8192;

/// Bytes read when detecting the packet size
pub const PROBE_PACKET_BUFFER_SIZE: usize = 8192;
pub const PROBE_PACKET_MAX_READS: usize = 16;

// Well-known PIDs
pub const PAT_PID: u16 = 0x0000;
pub const SDT_PID: u16 = 0x0011;
pub const EIT_PID: u16 = 0x0012;
pub const NULL_PID: u16 = 0x1FFF;

// Table IDs
pub const PAT_TID: u8 = 0x00;
pub const PMT_TID: u8 = 0x02;
pub const M4OD_TID: u8 = 0x05;
pub const SDT_TID: u8 = 0x42;
pub const EIT_TID_MIN: u8 = 0x4e;
pub const EIT_TID_MAX: u8 = 0x6f;
pub const SCTE_TID: u8 = 0xfc;

// Sections
pub const MAX_SECTION_SIZE: usize = 4096;
pub const SECTION_HEADER_SIZE: usize = 3;
pub const CRC_SIZE: usize = 4;

// PES
pub const MAX_PES_HEADER_SIZE: usize = 9 + 255;
pub const PES_START_SIZE: usize = 6;
pub const PES_HEADER_SIZE: usize = 9;
pub const MAX_PES_PAYLOAD: usize = 200 * 1024;
/// Zero bytes appended after every payload so readers can overread safely
pub const INPUT_BUFFER_PADDING_SIZE: usize = 64;
pub const MAX_SL_HEADER_SIZE: usize = 128;

// Program table limits
pub const MAX_PIDS_PER_PROGRAM: usize = 130;
pub const MAX_PROGRAMS_IN_PAT: usize = 128;
pub const MAX_PMT_ENTRIES: usize = 256;
pub const MAX_MP4_DESCR_COUNT: usize = 16;

/// Id given to the synthetic EPG stream
pub const EIT_STREAM_ID: u16 = 0x12;

// Stream types
pub const STREAM_TYPE_VIDEO_MPEG1: u8 = 0x01;
pub const STREAM_TYPE_VIDEO_MPEG2: u8 = 0x02;
pub const STREAM_TYPE_AUDIO_MPEG1: u8 = 0x03;
pub const STREAM_TYPE_AUDIO_MPEG2: u8 = 0x04;
pub const STREAM_TYPE_PRIVATE_SECTION: u8 = 0x05;
pub const STREAM_TYPE_PRIVATE_DATA: u8 = 0x06;
pub const STREAM_TYPE_DSMCC_B: u8 = 0x0b;
pub const STREAM_TYPE_AUDIO_AAC: u8 = 0x0f;
pub const STREAM_TYPE_VIDEO_MPEG4: u8 = 0x10;
pub const STREAM_TYPE_AUDIO_AAC_LATM: u8 = 0x11;
pub const STREAM_TYPE_ISO_IEC_14496_PES: u8 = 0x12;
pub const STREAM_TYPE_ISO_IEC_14496_SECTION: u8 = 0x13;
pub const STREAM_TYPE_METADATA: u8 = 0x15;
pub const STREAM_TYPE_VIDEO_H264: u8 = 0x1b;
pub const STREAM_TYPE_VIDEO_HEVC: u8 = 0x24;
pub const STREAM_TYPE_VIDEO_CAVS: u8 = 0x42;
pub const STREAM_TYPE_AUDIO_AC3: u8 = 0x81;
pub const STREAM_TYPE_AUDIO_TRUEHD: u8 = 0x83;
pub const STREAM_TYPE_SCTE_35: u8 = 0x86;

// PES stream ids that carry no PES header extension
pub const PROGRAM_STREAM_MAP: u16 = 0x1bc;
pub const PRIVATE_STREAM_2: u16 = 0x1bf;
pub const ECM_STREAM: u16 = 0x1f0;
pub const EMM_STREAM: u16 = 0x1f1;
pub const PROGRAM_STREAM_DIRECTORY: u16 = 0x1ff;
pub const DSMCC_STREAM: u16 = 0x1f2;
pub const TYPE_E_STREAM: u16 = 0x1f8;
pub const PADDING_STREAM: u16 = 0x1be;

/// Extended stream id of the AC-3 core inside an HDMV TrueHD stream
pub const EXTENDED_STREAM_ID_AC3_CORE: u8 = 0x76;

/// Registration four-cc values compared against the program's reg code
pub const fn four_cc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub const REG_HDMV: u32 = four_cc(b"HDMV");
pub const REG_HDPR: u32 = four_cc(b"HDPR");

// Teletext timing repair
/// 40.6 ms of teletext frame lead, in 90 kHz ticks
pub const TELETEXT_PTS_LEAD: i64 = 3654;
/// 100 ms of decoder latency, in 90 kHz ticks
pub const TELETEXT_PTS_LATENCY: i64 = 9000;
/// Maximum lead a DVB subtitle may have over the PCR, in 90 kHz ticks
pub const SUBTITLE_MAX_LEAD: i64 = 90_000 * 10;

// Duration estimation
pub const DURATION_MAX_READ_SIZE: u64 = 250_000;
pub const DURATION_MAX_RETRY: u32 = 6;

/// Look-ahead window when interpolating PCRs in raw mode
pub const MAX_PACKET_READAHEAD: usize = (128 * 1024) / TS_PACKET_SIZE;
pub const PCR_HZ: i64 = 27_000_000;
