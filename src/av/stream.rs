use super::timestamp::{Rational, WrapBehavior, WrapReference, PTS_WRAP_BITS, TIME_BASE_90KHZ};
use super::{CodecId, MediaKind};
use bytes::Bytes;

/// Stable handle to a registered stream.
///
/// Indices shift when streams are removed; keys never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(pub u32);

/// Caller-selected discard level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discard {
    #[default]
    None,
    /// Drop everything belonging to this stream or program
    All,
}

/// Disposition flags of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disposition {
    pub still_image: bool,
    pub clean_effects: bool,
    pub hearing_impaired: bool,
    pub visual_impaired: bool,
}

/// Codec parameters known at the container level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecParameters {
    pub codec_type: MediaKind,
    pub codec_id: CodecId,
    /// Stream type byte, or the registration four-cc when one was given
    pub codec_tag: u32,
    pub extradata: Option<Bytes>,
    /// Content should be probed to pin down the codec
    pub request_probe: bool,
}

/// A caller-visible elementary stream
#[derive(Debug, Clone)]
pub struct MediaStream {
    /// Position in the stream list
    pub index: usize,
    /// PID carrying the stream
    pub id: u16,
    pub key: StreamKey,
    pub codec: CodecParameters,
    /// PMT stream type the stream was created from
    pub stream_type: u8,
    pub time_base: Rational,
    pub pts_wrap_bits: u32,
    pub disposition: Disposition,
    /// ISO 639-2 language code
    pub language: Option<String>,
    pub component_tag: Option<u8>,
    pub sub_id: Option<u32>,
    pub carousel_id: Option<u32>,
    pub data_id: Option<u16>,
    /// Teletext type from the VBI teletext descriptor
    pub txt_type: Option<u8>,
    pub vbi_data: bool,
    /// First timestamp seen, in `time_base`
    pub start_time: Option<i64>,
    /// In `time_base`
    pub duration: Option<i64>,
    pub first_dts: Option<i64>,
    pub wrap: Option<WrapReference>,
    pub discard: Discard,
    /// Programs listing this stream
    pub program_ids: Vec<u16>,
    /// Secondary stream sharing the PID (AC-3 core of a TrueHD stream)
    pub is_sub_stream: bool,
    pub(crate) extradata_changed: bool,
}

impl MediaStream {
    pub fn new(pid: u16, key: StreamKey) -> Self {
        Self {
            index: 0,
            id: pid,
            key,
            codec: CodecParameters::default(),
            stream_type: 0,
            time_base: TIME_BASE_90KHZ,
            pts_wrap_bits: PTS_WRAP_BITS,
            disposition: Disposition::default(),
            language: None,
            component_tag: None,
            sub_id: None,
            carousel_id: None,
            data_id: None,
            txt_type: None,
            vbi_data: false,
            start_time: None,
            duration: None,
            first_dts: None,
            wrap: None,
            discard: Discard::None,
            program_ids: Vec::new(),
            is_sub_stream: false,
            extradata_changed: false,
        }
    }

    /// Sets PTS wrap width and time base.
    pub fn set_pts_info(&mut self, wrap_bits: u32, time_base: Rational) {
        self.pts_wrap_bits = wrap_bits;
        self.time_base = time_base;
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec.codec_id
    }

    pub fn media_kind(&self) -> MediaKind {
        self.codec.codec_type
    }

    pub fn wrap_behavior(&self) -> WrapBehavior {
        self.wrap.map(|w| w.behavior).unwrap_or_default()
    }

    /// Installs new extradata; the next packet announces it.
    pub fn set_extradata(&mut self, extradata: Bytes) {
        if self.codec.extradata.as_ref() != Some(&extradata) {
            self.codec.extradata = Some(extradata);
            self.extradata_changed = true;
        }
    }
}
