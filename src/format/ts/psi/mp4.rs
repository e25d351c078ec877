//! MPEG-4 systems descriptors carried in IODs and object descriptor sections.

use crate::av::CodecId;
use crate::error::{Result, TsError};
use crate::format::ts::sl::SlConfig;
use crate::format::ts::types::MAX_MP4_DESCR_COUNT;
use crate::utils::ByteCursor;
use bytes::Bytes;
use log::{error, warn};

const OD_TAG: u8 = 0x01;
const IOD_TAG: u8 = 0x02;
const ES_TAG: u8 = 0x03;
const DEC_CONFIG_TAG: u8 = 0x04;
const DEC_SPECIFIC_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

const MAX_LEVEL: u32 = 4;

/// An elementary stream described by an ES descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mp4Descriptor {
    pub es_id: u16,
    /// Body of the decoder config descriptor, empty when absent
    pub dec_config: Bytes,
    pub sl: SlConfig,
}

/// What a decoder config descriptor says about a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub object_type: u8,
    pub codec: CodecId,
    pub extradata: Option<Bytes>,
}

/// Parses the descriptors of an initial object descriptor (PMT tag 0x1d).
pub fn read_iods(buf: &[u8]) -> Vec<Mp4Descriptor> {
    let mut parser = DescrParser::new();
    let mut cursor = ByteCursor::new(buf);
    if let Err(e) = parser.parse_descr(&mut cursor, Some(IOD_TAG)) {
        error!("IOD: {}", e);
    }
    parser.descrs
}

/// Parses the object descriptors in the body of an M4OD section.
pub fn read_od(buf: &[u8]) -> Vec<Mp4Descriptor> {
    let mut parser = DescrParser::new();
    let mut cursor = ByteCursor::new(buf);
    if let Err(e) = parser.parse_array(&mut cursor) {
        error!("object descriptor: {}", e);
    }
    parser.descrs
}

/// Expandable size field: seven bits per byte, at most four bytes.
fn read_descr_len(cursor: &mut ByteCursor<'_>) -> Result<usize> {
    let mut len = 0usize;
    for _ in 0..4 {
        let c = cursor.read_u8()?;
        len = (len << 7) | (c & 0x7f) as usize;
        if c & 0x80 == 0 {
            break;
        }
    }
    Ok(len)
}

struct DescrParser {
    descrs: Vec<Mp4Descriptor>,
    active: Option<usize>,
    level: u32,
    predefined_sl_seen: bool,
}

impl DescrParser {
    fn new() -> Self {
        Self {
            descrs: Vec::new(),
            active: None,
            level: 0,
            predefined_sl_seen: false,
        }
    }

    fn parse_array(&mut self, cursor: &mut ByteCursor<'_>) -> Result<()> {
        while !cursor.is_empty() {
            self.parse_descr(cursor, None)?;
        }
        Ok(())
    }

    fn parse_descr(&mut self, cursor: &mut ByteCursor<'_>, target: Option<u8>) -> Result<()> {
        let tag = cursor.read_u8()?;
        let len = read_descr_len(cursor)?;
        if len == 0 || len > cursor.remaining() {
            return Err(TsError::Parser(format!(
                "Tag {:x} length violation new length {} bytes remaining {}",
                tag,
                len,
                cursor.remaining()
            )));
        }
        let mut body = cursor.sub(len)?;

        if self.level >= MAX_LEVEL {
            return Err(TsError::Parser("Maximum MP4 descriptor level exceeded".into()));
        }
        if let Some(target) = target {
            if tag != target {
                return Err(TsError::Parser(format!("Found tag {:x} expected {:x}", tag, target)));
            }
        }

        self.level += 1;
        let result = match tag {
            IOD_TAG => self.parse_iod(&mut body),
            OD_TAG => self.parse_od(&mut body),
            ES_TAG => self.parse_es(&mut body),
            DEC_CONFIG_TAG => self.parse_dec_config(&body),
            SL_CONFIG_TAG => self.parse_sl(&mut body),
            _ => Ok(()),
        };
        self.level -= 1;
        result
    }

    fn parse_iod(&mut self, body: &mut ByteCursor<'_>) -> Result<()> {
        // id and flags, then five profile levels
        body.skip(7)?;
        self.parse_array(body)
    }

    fn parse_od(&mut self, body: &mut ByteCursor<'_>) -> Result<()> {
        if body.remaining() < 2 {
            return Ok(());
        }
        let id_flags = body.read_u16()?;
        if id_flags & 0x0020 != 0 {
            // URL flag: the streams live elsewhere
            return Ok(());
        }
        self.parse_array(body)
    }

    fn parse_es(&mut self, body: &mut ByteCursor<'_>) -> Result<()> {
        if self.descrs.len() >= MAX_MP4_DESCR_COUNT {
            return Err(TsError::Parser("too many ES descriptors".into()));
        }
        let es_id = body.read_u16()?;
        let flags = body.read_u8()?;
        if flags & 0x80 != 0 {
            // depends on ES id
            body.skip(2)?;
        }
        if flags & 0x40 != 0 {
            let url_len = body.read_u8()? as usize;
            body.skip(url_len)?;
        }
        if flags & 0x20 != 0 {
            // OCR ES id
            body.skip(2)?;
        }

        self.descrs.push(Mp4Descriptor {
            es_id,
            ..Mp4Descriptor::default()
        });
        self.active = Some(self.descrs.len() - 1);
        let mut result = self.parse_descr(body, Some(DEC_CONFIG_TAG));
        if result.is_ok() && !body.is_empty() {
            result = self.parse_descr(body, Some(SL_CONFIG_TAG));
        }
        self.active = None;
        result
    }

    fn active_descr(&mut self) -> Result<&mut Mp4Descriptor> {
        let index = self
            .active
            .ok_or_else(|| TsError::Parser("descriptor outside an ES descriptor".into()))?;
        self.descrs
            .get_mut(index)
            .ok_or_else(|| TsError::Parser("descriptor outside an ES descriptor".into()))
    }

    fn parse_dec_config(&mut self, body: &ByteCursor<'_>) -> Result<()> {
        let config = Bytes::copy_from_slice(body.rest());
        self.active_descr()?.dec_config = config;
        Ok(())
    }

    fn parse_sl(&mut self, body: &mut ByteCursor<'_>) -> Result<()> {
        let predefined = body.read_u8()?;
        if predefined != 0 {
            if !self.predefined_sl_seen {
                warn!("predefined SL config descriptors are not supported");
                self.predefined_sl_seen = true;
            }
            return Ok(());
        }

        let flags = body.read_u8()?;
        let timestamp_res = body.read_u32()?;
        // OCR resolution
        body.skip(4)?;
        let timestamp_len = body.read_u8()? as u32;
        let ocr_len = body.read_u8()? as u32;
        let au_len = body.read_u8()? as u32;

        let sl = &mut self.active_descr()?.sl;
        sl.use_au_start = flags & 0x80 != 0;
        sl.use_au_end = flags & 0x40 != 0;
        sl.use_rand_acc_pt = flags & 0x20 != 0;
        sl.use_padding = flags & 0x08 != 0;
        sl.use_timestamps = flags & 0x04 != 0;
        sl.use_idle = flags & 0x02 != 0;
        sl.timestamp_res = timestamp_res;

        for (field, value, max) in [
            (&mut sl.timestamp_len, timestamp_len, 63),
            (&mut sl.ocr_len, ocr_len, 63),
            (&mut sl.au_len, au_len, 31),
        ] {
            *field = value.min(max);
            if value > max {
                return Err(TsError::Parser(format!("SL field length {} over {}", value, max)));
            }
        }

        let inst_bitrate_len = body.read_u8()? as u32;
        let lengths = body.read_u16()?;
        let sl = &mut self.active_descr()?.sl;
        sl.inst_bitrate_len = inst_bitrate_len;
        sl.degr_prior_len = (lengths >> 12) as u32;
        sl.au_seq_num_len = ((lengths >> 7) & 0x1f) as u32;
        sl.packet_seq_num_len = ((lengths >> 2) & 0x1f) as u32;
        Ok(())
    }
}

/// Codec for an MPEG-4 object type indication.
pub fn object_type_codec(object_type: u8) -> CodecId {
    match object_type {
        0x01 => CodecId::Mpeg4Systems,
        0x20 => CodecId::Mpeg4,
        0x21 => CodecId::H264,
        0x23 => CodecId::Hevc,
        0x40 | 0x66 | 0x67 | 0x68 => CodecId::Aac,
        0x69 | 0x6b => CodecId::Mp3,
        0x60..=0x65 | 0x6a => CodecId::Mpeg2Video,
        0xa5 => CodecId::Ac3,
        0xa6 => CodecId::Eac3,
        0xa9 => CodecId::Dts,
        _ => CodecId::None,
    }
}

/// Reads a decoder config descriptor body and its decoder specific info.
pub fn read_dec_config(buf: &[u8]) -> Result<DecoderConfig> {
    let mut cursor = ByteCursor::new(buf);
    let object_type = cursor.read_u8()?;
    // stream type, buffer size, max and average bitrate
    cursor.skip(1 + 3 + 4 + 4)?;

    let mut extradata = None;
    if !cursor.is_empty() && cursor.read_u8()? == DEC_SPECIFIC_TAG {
        let len = read_descr_len(&mut cursor)?;
        let data = cursor.read_bytes(len.min(cursor.remaining()))?;
        if !data.is_empty() {
            extradata = Some(Bytes::copy_from_slice(data));
        }
    }

    Ok(DecoderConfig {
        object_type,
        codec: object_type_codec(object_type),
        extradata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descr(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, body.len() as u8];
        out.extend_from_slice(body);
        out
    }

    fn es_descr(es_id: u16, dec_config: &[u8], sl: Option<&[u8]>) -> Vec<u8> {
        let mut body = es_id.to_be_bytes().to_vec();
        body.push(0);
        body.extend(descr(DEC_CONFIG_TAG, dec_config));
        if let Some(sl) = sl {
            body.extend(descr(SL_CONFIG_TAG, sl));
        }
        descr(ES_TAG, &body)
    }

    fn aac_dec_config() -> Vec<u8> {
        let mut config = vec![0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        config.extend(descr(DEC_SPECIFIC_TAG, &[0x12, 0x10]));
        config
    }

    fn sl_body() -> Vec<u8> {
        let mut sl = vec![0x00, 0x84];
        sl.extend_from_slice(&90_000u32.to_be_bytes());
        sl.extend_from_slice(&[0, 0, 0, 0]);
        sl.extend_from_slice(&[33, 0, 0, 0]);
        // degr 0, au_seq 5, pkt_seq 0
        sl.extend_from_slice(&((5u16) << 7).to_be_bytes());
        sl
    }

    #[test]
    fn test_read_iods() {
        let mut iod_body = vec![0x00, 0x4f, 0xff, 0xff, 0xfe, 0xfe, 0xff];
        iod_body.extend(es_descr(0x101, &aac_dec_config(), Some(&sl_body())));
        let iod = descr(IOD_TAG, &iod_body);

        let descrs = read_iods(&iod);
        assert_eq!(descrs.len(), 1);
        assert_eq!(descrs[0].es_id, 0x101);
        assert_eq!(descrs[0].sl.timestamp_res, 90_000);
        assert_eq!(descrs[0].sl.timestamp_len, 33);
        assert_eq!(descrs[0].sl.au_seq_num_len, 5);
        assert!(descrs[0].sl.use_au_start);
        assert!(descrs[0].sl.use_timestamps);

        let config = read_dec_config(&descrs[0].dec_config).unwrap();
        assert_eq!(config.codec, CodecId::Aac);
        assert_eq!(config.extradata.as_deref(), Some(&[0x12, 0x10][..]));
    }

    #[test]
    fn test_read_od_skips_url_descriptors() {
        let mut od = 0x0010u16.to_be_bytes().to_vec();
        od.extend(es_descr(7, &aac_dec_config(), None));
        let mut url_od = 0x0020u16.to_be_bytes().to_vec();
        url_od.extend_from_slice(&[3, b'a', b'b', b'c']);

        let mut section = descr(OD_TAG, &url_od);
        section.extend(descr(OD_TAG, &od));
        let descrs = read_od(&section);
        assert_eq!(descrs.len(), 1);
        assert_eq!(descrs[0].es_id, 7);
        assert_eq!(descrs[0].sl, SlConfig::default());
    }

    #[test]
    fn test_length_violation_keeps_earlier_descriptors() {
        let mut section = descr(OD_TAG, &{
            let mut od = 0x0010u16.to_be_bytes().to_vec();
            od.extend(es_descr(9, &aac_dec_config(), None));
            od
        });
        section.extend_from_slice(&[OD_TAG, 0x7f, 0x00]);
        let descrs = read_od(&section);
        assert_eq!(descrs.len(), 1);
        assert_eq!(descrs[0].es_id, 9);
    }

    #[test]
    fn test_sl_length_clipped() {
        let mut sl = sl_body();
        sl[10] = 64;
        let mut iod_body = vec![0; 7];
        iod_body.extend(es_descr(1, &aac_dec_config(), Some(&sl)));
        let descrs = read_iods(&descr(IOD_TAG, &iod_body));
        assert_eq!(descrs[0].sl.timestamp_len, 63);
    }

    #[test]
    fn test_expandable_length() {
        let data = [0x81, 0x80, 0x01];
        assert_eq!(read_descr_len(&mut ByteCursor::new(&data)).unwrap(), (1 << 14) | 1);
    }

    #[test]
    fn test_object_types() {
        assert_eq!(object_type_codec(0x21), CodecId::H264);
        assert_eq!(object_type_codec(0x6b), CodecId::Mp3);
        assert_eq!(object_type_codec(0x61), CodecId::Mpeg2Video);
        assert_eq!(object_type_codec(0xee), CodecId::None);
    }
}
