use std::fmt;

/// Kind of media a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    #[default]
    Unknown,
}

/// Codecs the demuxer can label streams with.
///
/// The demuxer never decodes; these only name what a PMT entry announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[allow(missing_docs)]
pub enum CodecId {
    #[default]
    None,
    Mpeg2Video,
    Mpeg4,
    H264,
    Hevc,
    Cavs,
    Dirac,
    Avs2,
    Vc1,
    Jpeg2000,
    Mp3,
    Aac,
    AacLatm,
    Ac3,
    Eac3,
    Dts,
    TrueHd,
    PcmBluray,
    S302m,
    Opus,
    DvbSubtitle,
    DvbTeletext,
    HdmvPgsSubtitle,
    HdmvTextSubtitle,
    DsmccB,
    DvbVbi,
    Scte35,
    SmpteKlv,
    TimedId3,
    BinData,
    Epg,
    Mpeg2Ts,
    Mpeg4Systems,
}

impl CodecId {
    /// Media kind a stream of this codec is registered as.
    pub fn media_kind(&self) -> MediaKind {
        match self {
            CodecId::None => MediaKind::Unknown,
            CodecId::Mpeg2Video
            | CodecId::Mpeg4
            | CodecId::H264
            | CodecId::Hevc
            | CodecId::Cavs
            | CodecId::Dirac
            | CodecId::Avs2
            | CodecId::Vc1
            | CodecId::Jpeg2000 => MediaKind::Video,
            CodecId::Mp3
            | CodecId::Aac
            | CodecId::AacLatm
            | CodecId::Ac3
            | CodecId::Eac3
            | CodecId::Dts
            | CodecId::TrueHd
            | CodecId::PcmBluray
            | CodecId::S302m
            | CodecId::Opus => MediaKind::Audio,
            CodecId::DvbSubtitle
            | CodecId::DvbTeletext
            | CodecId::HdmvPgsSubtitle
            | CodecId::HdmvTextSubtitle => MediaKind::Subtitle,
            CodecId::DsmccB
            | CodecId::DvbVbi
            | CodecId::Scte35
            | CodecId::SmpteKlv
            | CodecId::TimedId3
            | CodecId::BinData
            | CodecId::Epg
            | CodecId::Mpeg2Ts
            | CodecId::Mpeg4Systems => MediaKind::Data,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Mpeg2Video => "mpeg2video",
            CodecId::Mpeg4 => "mpeg4",
            CodecId::H264 => "h264",
            CodecId::Hevc => "hevc",
            CodecId::Cavs => "cavs",
            CodecId::Dirac => "dirac",
            CodecId::Avs2 => "avs2",
            CodecId::Vc1 => "vc1",
            CodecId::Jpeg2000 => "jpeg2000",
            CodecId::Mp3 => "mp3",
            CodecId::Aac => "aac",
            CodecId::AacLatm => "aac_latm",
            CodecId::Ac3 => "ac3",
            CodecId::Eac3 => "eac3",
            CodecId::Dts => "dts",
            CodecId::TrueHd => "truehd",
            CodecId::PcmBluray => "pcm_bluray",
            CodecId::S302m => "s302m",
            CodecId::Opus => "opus",
            CodecId::DvbSubtitle => "dvb_subtitle",
            CodecId::DvbTeletext => "dvb_teletext",
            CodecId::HdmvPgsSubtitle => "hdmv_pgs_subtitle",
            CodecId::HdmvTextSubtitle => "hdmv_text_subtitle",
            CodecId::DsmccB => "dsmcc_b",
            CodecId::DvbVbi => "dvb_vbi",
            CodecId::Scte35 => "scte_35",
            CodecId::SmpteKlv => "klv",
            CodecId::TimedId3 => "timed_id3",
            CodecId::BinData => "bin_data",
            CodecId::Epg => "epg",
            CodecId::Mpeg2Ts => "mpegts",
            CodecId::Mpeg4Systems => "mpeg4systems",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod packet;
mod stream;
pub mod timestamp;

pub use packet::*;
pub use stream::*;
pub use timestamp::{Rational, Timestamp, WrapBehavior, WrapReference};
