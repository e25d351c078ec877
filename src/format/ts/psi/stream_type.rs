//! Stream type, registration and descriptor tag to codec tables.

use crate::av::timestamp::{PTS_WRAP_BITS, TIME_BASE_90KHZ};
use crate::av::{CodecId, MediaKind, MediaStream};
use crate::format::ts::types::*;

/// One row of a lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamType {
    /// Stream type byte, four-cc or descriptor tag depending on the table
    pub stream_type: u32,
    pub kind: MediaKind,
    pub codec: CodecId,
}

const fn row(stream_type: u32, kind: MediaKind, codec: CodecId) -> StreamType {
    StreamType {
        stream_type,
        kind,
        codec,
    }
}

use CodecId as C;
use MediaKind as K;

pub static ISO_TYPES: &[StreamType] = &[
    row(0x01, K::Video, C::Mpeg2Video),
    row(0x02, K::Video, C::Mpeg2Video),
    row(0x03, K::Audio, C::Mp3),
    row(0x04, K::Audio, C::Mp3),
    row(0x0b, K::Data, C::DsmccB),
    row(0x0f, K::Audio, C::Aac),
    row(0x10, K::Video, C::Mpeg4),
    row(0x11, K::Audio, C::AacLatm),
    row(0x1b, K::Video, C::H264),
    row(0x1c, K::Audio, C::Aac),
    row(0x20, K::Video, C::H264),
    row(0x21, K::Video, C::Jpeg2000),
    row(0x24, K::Video, C::Hevc),
    row(0x42, K::Video, C::Cavs),
    row(0xd1, K::Video, C::Dirac),
    row(0xd2, K::Video, C::Avs2),
    row(0xea, K::Video, C::Vc1),
];

pub static HDMV_TYPES: &[StreamType] = &[
    row(0x80, K::Audio, C::PcmBluray),
    row(0x81, K::Audio, C::Ac3),
    row(0x82, K::Audio, C::Dts),
    row(0x83, K::Audio, C::TrueHd),
    row(0x84, K::Audio, C::Eac3),
    // DTS-HD and DTS-HD master audio
    row(0x85, K::Audio, C::Dts),
    row(0x86, K::Audio, C::Dts),
    // secondary audio
    row(0xa1, K::Audio, C::Eac3),
    row(0xa2, K::Audio, C::Dts),
    row(0x90, K::Subtitle, C::HdmvPgsSubtitle),
    row(0x92, K::Subtitle, C::HdmvTextSubtitle),
];

pub static SCTE_TYPES: &[StreamType] = &[row(0x86, K::Data, C::Scte35)];

pub static MISC_TYPES: &[StreamType] = &[
    row(0x81, K::Audio, C::Ac3),
    row(0x87, K::Audio, C::Eac3),
    row(0x8a, K::Audio, C::Dts),
    row(0x100, K::Subtitle, C::DvbSubtitle),
    row(0x101, K::Data, C::DvbVbi),
];

pub static REGD_TYPES: &[StreamType] = &[
    row(four_cc(b"drac"), K::Video, C::Dirac),
    row(four_cc(b"AC-3"), K::Audio, C::Ac3),
    row(four_cc(b"BSSD"), K::Audio, C::S302m),
    row(four_cc(b"DTS1"), K::Audio, C::Dts),
    row(four_cc(b"DTS2"), K::Audio, C::Dts),
    row(four_cc(b"DTS3"), K::Audio, C::Dts),
    row(four_cc(b"EAC3"), K::Audio, C::Eac3),
    row(four_cc(b"HEVC"), K::Video, C::Hevc),
    row(four_cc(b"KLVA"), K::Data, C::SmpteKlv),
    row(four_cc(b"ID3 "), K::Data, C::TimedId3),
    row(four_cc(b"VC-1"), K::Video, C::Vc1),
    row(four_cc(b"Opus"), K::Audio, C::Opus),
];

/// Descriptors whose mere presence names the codec of private data
pub static DESC_TYPES: &[StreamType] = &[
    row(0x6a, K::Audio, C::Ac3),
    row(0x7a, K::Audio, C::Eac3),
    row(0x7b, K::Audio, C::Dts),
    row(0x13, K::Data, C::DsmccB),
    row(0x45, K::Data, C::DvbVbi),
    row(0x46, K::Data, C::DvbVbi),
    row(0x56, K::Subtitle, C::DvbTeletext),
    row(0x59, K::Subtitle, C::DvbSubtitle),
];

pub fn find(table: &'static [StreamType], stream_type: u32) -> Option<&'static StreamType> {
    table.iter().find(|t| t.stream_type == stream_type)
}

fn apply(stream: &mut MediaStream, table: &'static [StreamType], stream_type: u32) {
    if let Some(t) = find(table, stream_type) {
        stream.codec.codec_type = t.kind;
        stream.codec.codec_id = t.codec;
        stream.codec.request_probe = false;
    }
}

/// Kind and codec a PMT entry announces before its descriptors are read.
pub fn classify(stream_type: u8, prog_reg: u32) -> (MediaKind, CodecId) {
    let st = stream_type as u32;
    let hdmv = prog_reg == REG_HDMV || prog_reg == REG_HDPR;
    let hit = find(ISO_TYPES, st)
        .or_else(|| hdmv.then(|| find(HDMV_TYPES, st)).flatten())
        .or_else(|| find(MISC_TYPES, st))
        .or_else(|| find(SCTE_TYPES, st));
    hit.map(|t| (t.kind, t.codec))
        .unwrap_or((MediaKind::Unknown, CodecId::None))
}

/// Labels `stream` from its PMT stream type and the program's
/// registration code, resetting its timing to 33 bits at 1/90000.
///
/// Returns true when the stream is HDMV TrueHD and needs an AC-3 companion.
pub fn set_stream_info(stream: &mut MediaStream, stream_type: u8, prog_reg: u32) -> bool {
    let old_type = stream.codec.codec_type;
    let old_id = stream.codec.codec_id;
    let st = stream_type as u32;
    let mut wants_sub_stream = false;

    stream.set_pts_info(PTS_WRAP_BITS, TIME_BASE_90KHZ);
    stream.codec.codec_type = MediaKind::Data;
    stream.codec.codec_id = CodecId::None;
    stream.stream_type = stream_type;
    stream.codec.codec_tag = st;

    apply(stream, ISO_TYPES, st);
    if stream_type == STREAM_TYPE_AUDIO_MPEG2 || stream_type == STREAM_TYPE_AUDIO_AAC {
        stream.codec.request_probe = true;
    }
    if (prog_reg == REG_HDMV || prog_reg == REG_HDPR) && stream.codec.codec_id == CodecId::None {
        apply(stream, HDMV_TYPES, st);
        wants_sub_stream = stream_type == STREAM_TYPE_AUDIO_TRUEHD;
    }
    if stream.codec.codec_id == CodecId::None {
        apply(stream, MISC_TYPES, st);
    }
    if stream.codec.codec_id == CodecId::None {
        stream.codec.codec_id = old_id;
        stream.codec.codec_type = old_type;
    }
    if stream.codec.codec_id == CodecId::None {
        stream.codec.codec_type = MediaKind::Data;
        stream.codec.codec_id = CodecId::BinData;
        stream.codec.request_probe = true;
    }
    wants_sub_stream
}

/// Whether a PMT entry becomes a caller-visible stream.
pub fn is_desired(kind: MediaKind, codec: CodecId) -> bool {
    match kind {
        MediaKind::Video | MediaKind::Audio | MediaKind::Subtitle => true,
        MediaKind::Data => matches!(
            codec,
            CodecId::DsmccB
                | CodecId::DvbVbi
                | CodecId::Scte35
                | CodecId::SmpteKlv
                | CodecId::TimedId3
                | CodecId::BinData
                | CodecId::Mpeg4Systems
        ),
        MediaKind::Unknown => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::StreamKey;
    use pretty_assertions::assert_eq;

    fn stream() -> MediaStream {
        MediaStream::new(0x100, StreamKey(0))
    }

    #[test]
    fn test_classify_layers() {
        assert_eq!(classify(0x1b, 0), (K::Video, C::H264));
        assert_eq!(classify(0x81, 0), (K::Audio, C::Ac3));
        assert_eq!(classify(0x83, REG_HDMV), (K::Audio, C::TrueHd));
        assert_eq!(classify(0x86, REG_HDMV), (K::Audio, C::Dts));
        assert_eq!(classify(0x86, 0), (K::Data, C::Scte35));
        assert_eq!(classify(0x06, 0), (K::Unknown, C::None));
    }

    #[test]
    fn test_set_stream_info_iso() {
        let mut st = stream();
        assert!(!set_stream_info(&mut st, 0x1b, 0));
        assert_eq!(st.codec.codec_id, C::H264);
        assert_eq!(st.codec.codec_type, K::Video);
        assert_eq!(st.codec.codec_tag, 0x1b);
        assert_eq!(st.pts_wrap_bits, 33);
        assert!(!st.codec.request_probe);

        let mut aac = stream();
        set_stream_info(&mut aac, 0x0f, 0);
        assert_eq!(aac.codec.codec_id, C::Aac);
        assert!(aac.codec.request_probe);
    }

    #[test]
    fn test_hdmv_truehd_wants_ac3_core() {
        let mut st = stream();
        assert!(set_stream_info(&mut st, 0x83, REG_HDMV));
        assert_eq!(st.codec.codec_id, C::TrueHd);
        // without the registration it is not TrueHD
        let mut plain = stream();
        assert!(!set_stream_info(&mut plain, 0x83, 0));
    }

    #[test]
    fn test_unknown_private_data_is_bin_data() {
        let mut st = stream();
        set_stream_info(&mut st, STREAM_TYPE_PRIVATE_DATA, 0);
        assert_eq!(st.codec.codec_id, C::BinData);
        assert_eq!(st.codec.codec_type, K::Data);
        assert!(st.codec.request_probe);
    }

    #[test]
    fn test_hdpr_registration_selects_hdmv_table() {
        assert_eq!(classify(0x90, REG_HDPR), (K::Subtitle, C::HdmvPgsSubtitle));
        assert_eq!(classify(0x90, REG_HDMV), (K::Subtitle, C::HdmvPgsSubtitle));
        assert_eq!(classify(0x90, 0), (K::Unknown, C::None));

        let mut st = stream();
        assert!(set_stream_info(&mut st, 0x83, REG_HDPR));
        assert_eq!(st.codec.codec_id, C::TrueHd);
    }

    #[test]
    fn test_unknown_stream_type_is_bin_data() {
        let mut st = stream();
        set_stream_info(&mut st, 0x99, 0);
        assert_eq!(st.codec.codec_type, K::Data);
        assert_eq!(st.codec.codec_id, C::BinData);
        assert_eq!(st.codec.codec_tag, 0x99);
        assert!(st.codec.request_probe);
    }

    #[test]
    fn test_unknown_type_keeps_previous_codec() {
        let mut st = stream();
        set_stream_info(&mut st, 0x1b, 0);
        set_stream_info(&mut st, 0x7f, 0);
        assert_eq!(st.codec.codec_id, C::H264);
        assert_eq!(st.codec.codec_tag, 0x7f);
    }

    #[test]
    fn test_is_desired() {
        assert!(is_desired(K::Video, C::H264));
        assert!(is_desired(K::Data, C::DsmccB));
        assert!(!is_desired(K::Data, C::None));
        assert!(!is_desired(K::Unknown, C::None));
    }
}
