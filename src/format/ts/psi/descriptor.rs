//! Elementary stream descriptors of a PMT entry.
//!
//! Each known tag maps to a small parser in [`DESCRIPTOR_PARSERS`]; tags
//! without an entry are skipped. Parsers only see their own descriptor body,
//! so a short body can never spill into the next descriptor.

use super::mp4::{read_dec_config, DecoderConfig, Mp4Descriptor};
use super::stream_type::{find, DESC_TYPES, REGD_TYPES};
use crate::av::{CodecId, Disposition, MediaKind};
use crate::error::Result;
use crate::format::ts::types::STREAM_TYPE_PRIVATE_DATA;
use crate::utils::ByteCursor;
use log::trace;

/// DVB and ISO details collected from an entry's descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DvbInfo {
    pub language: Option<String>,
    /// Ancillary page in the high half, composition page in the low half
    pub sub_id: u32,
    pub comp_page: u16,
    pub anc_page: u16,
    /// Registration four-cc of the entry
    pub codec_tag: u32,
    pub data_id: u16,
    pub carousel_id: u32,
    pub component_tag: Option<u8>,
    pub disposition: Disposition,
    pub txt_type: u8,
    pub vbi_data: bool,
}

/// One elementary stream announced by a PMT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtEntry {
    pub pid: u16,
    pub stream_type: u8,
    pub kind: MediaKind,
    pub codec: CodecId,
    pub dvb: DvbInfo,
    /// MPEG-4 ES id bound by an SL descriptor
    pub es_id: Option<u16>,
    /// Decoder config matched through the program's IOD
    pub dec_config: Option<DecoderConfig>,
    /// The PID carries MPEG-4 object descriptor sections
    pub m4od: bool,
}

impl PmtEntry {
    pub fn new(pid: u16, stream_type: u8, kind: MediaKind, codec: CodecId) -> Self {
        Self {
            pid,
            stream_type,
            kind,
            codec,
            dvb: DvbInfo::default(),
            es_id: None,
            dec_config: None,
            m4od: false,
        }
    }

    pub(crate) fn set_codec(&mut self, kind: MediaKind, codec: CodecId) {
        self.kind = kind;
        self.codec = codec;
    }
}

/// State shared by the parsers of one descriptor
pub struct DescriptorContext<'a> {
    pub entry: &'a mut PmtEntry,
    /// The entry's stream type, or zero once a descriptor already named the codec
    pub stream_type: u8,
    pub mp4: &'a [Mp4Descriptor],
}

type DescriptorParser = fn(&mut DescriptorContext<'_>, &mut ByteCursor<'_>) -> Result<()>;

pub static DESCRIPTOR_PARSERS: &[(u8, DescriptorParser)] = &[
    (0x02, video_stream),
    (0x05, registration),
    (0x0a, iso_639_language),
    (0x13, carousel_id),
    (0x1e, sl_descriptor),
    (0x1f, fmc_descriptor),
    (0x45, vbi_data),
    (0x46, vbi_teletext),
    (0x52, stream_identifier),
    (0x56, teletext),
    (0x59, subtitling),
    (0x66, data_broadcast_id),
];

fn parser_for(tag: u8) -> Option<DescriptorParser> {
    DESCRIPTOR_PARSERS
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, parser)| *parser)
}

/// Runs every descriptor in `data` against `entry`.
///
/// A descriptor whose length overruns `data` ends the loop.
pub fn parse_descriptors(entry: &mut PmtEntry, stream_type: u8, data: &[u8], mp4: &[Mp4Descriptor]) {
    let mut cursor = ByteCursor::new(data);
    while cursor.remaining() >= 2 {
        let tag = cursor.read_u8().unwrap_or_default();
        let len = cursor.read_u8().unwrap_or_default() as usize;
        let Ok(mut body) = cursor.sub(len) else {
            break;
        };
        trace!("tag: 0x{:02x} len={}", tag, len);

        let mut ctx = DescriptorContext {
            entry: &mut *entry,
            stream_type,
            mp4,
        };
        if ctx.entry.codec == CodecId::None && ctx.stream_type == STREAM_TYPE_PRIVATE_DATA {
            if let Some(t) = find(DESC_TYPES, tag as u32) {
                ctx.entry.set_codec(t.kind, t.codec);
                ctx.stream_type = 0;
            }
        }

        if let Some(parser) = parser_for(tag) {
            // a truncated body leaves whatever was read before it
            let _ = parser(&mut ctx, &mut body);
        }
    }
}

fn read_language(body: &mut ByteCursor<'_>) -> Result<Option<String>> {
    let code = body.read_bytes(3)?;
    if code[0] == 0 {
        return Ok(None);
    }
    Ok(Some(code.iter().map(|&b| b as char).collect()))
}

fn video_stream(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    if body.read_u8()? & 0x01 != 0 {
        ctx.entry.dvb.disposition.still_image = true;
    }
    Ok(())
}

fn registration(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    let tag = body.read_le32()?;
    ctx.entry.dvb.codec_tag = tag;
    if ctx.entry.codec == CodecId::None && ctx.stream_type == STREAM_TYPE_PRIVATE_DATA {
        if let Some(t) = find(REGD_TYPES, tag) {
            ctx.entry.set_codec(t.kind, t.codec);
        }
    }
    Ok(())
}

fn iso_639_language(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.language = read_language(body)?;
    let disposition = &mut ctx.entry.dvb.disposition;
    match body.read_u8()? {
        0x01 => disposition.clean_effects = true,
        0x02 => disposition.hearing_impaired = true,
        0x03 => disposition.visual_impaired = true,
        _ => {}
    }
    Ok(())
}

fn carousel_id(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.carousel_id = body.read_u32()?;
    Ok(())
}

fn sl_descriptor(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    let es_id = body.read_u16()?;
    ctx.entry.es_id = Some(es_id);
    let matching = ctx
        .mp4
        .iter()
        .find(|d| !d.dec_config.is_empty() && d.es_id == es_id);
    if let Some(descr) = matching {
        let config = read_dec_config(&descr.dec_config)?;
        if config.codec != CodecId::None {
            ctx.entry.set_codec(config.codec.media_kind(), config.codec);
        }
        ctx.entry.m4od = config.codec == CodecId::Mpeg4Systems;
        ctx.entry.dec_config = Some(config);
    }
    Ok(())
}

fn fmc_descriptor(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    body.read_u16()?;
    let Some(first) = ctx.mp4.first() else {
        return Ok(());
    };
    let codec = ctx.entry.codec;
    if (codec == CodecId::AacLatm || codec == CodecId::None)
        && !first.dec_config.is_empty()
        && first.es_id == ctx.entry.pid
    {
        let config = read_dec_config(&first.dec_config)?;
        if config.codec == CodecId::Aac && config.extradata.is_some() {
            ctx.entry.set_codec(MediaKind::Audio, CodecId::Aac);
        }
        ctx.entry.dec_config = Some(config);
    }
    Ok(())
}

fn vbi_data(ctx: &mut DescriptorContext<'_>, _body: &mut ByteCursor<'_>) -> Result<()> {
    // the data service entries themselves are not interpreted
    ctx.entry.dvb.vbi_data = true;
    Ok(())
}

fn vbi_teletext(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.language = read_language(body)?;
    ctx.entry.dvb.txt_type = body.read_u8()? >> 3;
    Ok(())
}

fn stream_identifier(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.component_tag = Some(body.read_u8()?);
    Ok(())
}

fn teletext(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.language = read_language(body)?;
    Ok(())
}

fn subtitling(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.language = read_language(body)?;
    // subtitling type
    body.read_u8()?;
    let dvb = &mut ctx.entry.dvb;
    dvb.comp_page = body.read_u16()?;
    dvb.anc_page = body.read_u16()?;
    dvb.sub_id = ((dvb.anc_page as u32) << 16) | dvb.comp_page as u32;
    Ok(())
}

fn data_broadcast_id(ctx: &mut DescriptorContext<'_>, body: &mut ByteCursor<'_>) -> Result<()> {
    ctx.entry.dvb.data_id = body.read_u16()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::types::four_cc;
    use pretty_assertions::assert_eq;

    fn entry(stream_type: u8) -> PmtEntry {
        PmtEntry::new(0x200, stream_type, MediaKind::Unknown, CodecId::None)
    }

    #[test]
    fn test_subtitling_descriptor() {
        let mut e = entry(STREAM_TYPE_PRIVATE_DATA);
        let data = [0x59, 8, b'e', b'n', b'g', 0x10, 0x00, 0x02, 0x00, 0x03];
        parse_descriptors(&mut e, STREAM_TYPE_PRIVATE_DATA, &data, &[]);
        assert_eq!(e.codec, CodecId::DvbSubtitle);
        assert_eq!(e.kind, MediaKind::Subtitle);
        assert_eq!(e.dvb.language.as_deref(), Some("eng"));
        assert_eq!(e.dvb.sub_id, (3 << 16) | 2);
    }

    #[test]
    fn test_teletext_and_language_disposition() {
        let mut e = entry(STREAM_TYPE_PRIVATE_DATA);
        let data = [
            0x56, 5, b'd', b'e', b'u', 0x09, 0x00, // teletext
            0x0a, 4, b'f', b'r', b'a', 0x02, // iso 639, hearing impaired
            0x52, 1, 0x33, // component tag
        ];
        parse_descriptors(&mut e, STREAM_TYPE_PRIVATE_DATA, &data, &[]);
        assert_eq!(e.codec, CodecId::DvbTeletext);
        assert_eq!(e.dvb.language.as_deref(), Some("fra"));
        assert!(e.dvb.disposition.hearing_impaired);
        assert_eq!(e.dvb.component_tag, Some(0x33));
    }

    #[test]
    fn test_registration_only_labels_private_data() {
        let klva = four_cc(b"KLVA").to_le_bytes();
        let data = [0x05, 4, klva[0], klva[1], klva[2], klva[3]];

        let mut private = entry(STREAM_TYPE_PRIVATE_DATA);
        parse_descriptors(&mut private, STREAM_TYPE_PRIVATE_DATA, &data, &[]);
        assert_eq!(private.codec, CodecId::SmpteKlv);
        assert_eq!(private.dvb.codec_tag, four_cc(b"KLVA"));

        let mut video = entry(0x1b);
        parse_descriptors(&mut video, 0x1b, &data, &[]);
        assert_eq!(video.codec, CodecId::None);
        assert_eq!(video.dvb.codec_tag, four_cc(b"KLVA"));
    }

    #[test]
    fn test_first_descriptor_tag_wins() {
        // an AC-3 descriptor names the codec, a later subtitling tag does not override it
        let data = [0x6a, 1, 0x00, 0x59, 8, b'e', b'n', b'g', 0x10, 0, 1, 0, 1];
        let mut e = entry(STREAM_TYPE_PRIVATE_DATA);
        parse_descriptors(&mut e, STREAM_TYPE_PRIVATE_DATA, &data, &[]);
        assert_eq!(e.codec, CodecId::Ac3);
        assert_eq!(e.dvb.language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_overrun_ends_loop() {
        let data = [0x52, 1, 0x10, 0x66, 9, 0x00];
        let mut e = entry(0x1b);
        parse_descriptors(&mut e, 0x1b, &data, &[]);
        assert_eq!(e.dvb.component_tag, Some(0x10));
        assert_eq!(e.dvb.data_id, 0);
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let data = [0xfe, 2, 0xaa, 0xbb, 0x13, 4, 0, 0, 1, 2];
        let mut e = entry(0x0b);
        parse_descriptors(&mut e, 0x0b, &data, &[]);
        assert_eq!(e.dvb.carousel_id, 0x102);
    }

    #[test]
    fn test_sl_descriptor_binds_es_id() {
        let mut dec_config = vec![0x21, 0x11, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        dec_config.extend_from_slice(&[0x05, 2, 0x01, 0x64]);
        let mp4 = [Mp4Descriptor {
            es_id: 0x10,
            dec_config: dec_config.into(),
            ..Mp4Descriptor::default()
        }];
        let mut e = entry(0x12);
        parse_descriptors(&mut e, 0x12, &[0x1e, 2, 0x00, 0x10], &mp4);
        assert_eq!(e.es_id, Some(0x10));
        assert_eq!(e.codec, CodecId::H264);
        assert_eq!(e.kind, MediaKind::Video);
        assert!(!e.m4od);
    }
}
