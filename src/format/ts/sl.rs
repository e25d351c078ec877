use super::types::{INPUT_BUFFER_PADDING_SIZE, MAX_SL_HEADER_SIZE};
use crate::error::Result;
use crate::utils::BitReader;

/// MPEG-4 sync layer configuration from an SL config descriptor.
///
/// Field widths are in bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlConfig {
    pub use_au_start: bool,
    pub use_au_end: bool,
    pub use_rand_acc_pt: bool,
    pub use_padding: bool,
    pub use_timestamps: bool,
    pub use_idle: bool,
    pub timestamp_res: u32,
    pub timestamp_len: u32,
    pub ocr_len: u32,
    pub au_len: u32,
    pub inst_bitrate_len: u32,
    pub degr_prior_len: u32,
    pub au_seq_num_len: u32,
    pub packet_seq_num_len: u32,
}

/// Timing carried by one SL packet header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlHeader {
    pub dts: Option<i64>,
    pub cts: Option<i64>,
    /// Header bytes to skip before the access unit
    pub len: usize,
}

/// Parses the SL packet header at the front of a PES payload.
///
/// At most 128 bytes are examined; bits past the end read as zero.
pub fn read_sl_header(sl: &SlConfig, buf: &[u8]) -> SlHeader {
    let size = buf.len().min(MAX_SL_HEADER_SIZE);
    let mut padded = [0u8; MAX_SL_HEADER_SIZE + INPUT_BUFFER_PADDING_SIZE];
    padded[..size].copy_from_slice(&buf[..size]);

    let mut reader = BitReader::new(&padded);
    let mut header = SlHeader::default();
    // only the padding can run out, and it is zero-filled like a short header
    let _ = parse_fields(sl, &mut reader, size * 8, &mut header);
    header.len = ((reader.position() + 7) >> 3).min(buf.len());
    header
}

fn parse_fields(sl: &SlConfig, gb: &mut BitReader<'_>, size_bits: usize, header: &mut SlHeader) -> Result<()> {
    let mut au_start = false;
    let mut ocr = false;
    let mut idle = false;
    let mut padding = false;
    let mut padding_bits = 0;
    let mut inst_bitrate = false;
    let mut dts_flag = false;
    let mut cts_flag = false;

    if sl.use_au_start {
        au_start = gb.read_bit()?;
    }
    if sl.use_au_end {
        // au end flag
        gb.read_bit()?;
    }
    if !sl.use_au_start && !sl.use_au_end {
        au_start = true;
    }
    if sl.ocr_len > 0 {
        ocr = gb.read_bit()?;
    }
    if sl.use_idle {
        idle = gb.read_bit()?;
    }
    if sl.use_padding {
        padding = gb.read_bit()?;
    }
    if padding {
        padding_bits = gb.read_bits(3)?;
    }

    if idle || (padding && padding_bits == 0) {
        return Ok(());
    }

    if sl.packet_seq_num_len > 0 {
        gb.skip_bits(sl.packet_seq_num_len)?;
    }
    if sl.degr_prior_len > 0 && gb.read_bit()? {
        gb.skip_bits(sl.degr_prior_len)?;
    }
    if ocr {
        gb.skip_bits(sl.ocr_len)?;
    }
    if au_start {
        if sl.use_rand_acc_pt {
            gb.read_bit()?;
        }
        if sl.au_seq_num_len > 0 {
            gb.skip_bits(sl.au_seq_num_len)?;
        }
        if sl.use_timestamps {
            dts_flag = gb.read_bit()?;
            cts_flag = gb.read_bit()?;
        }
    }
    if sl.inst_bitrate_len > 0 {
        inst_bitrate = gb.read_bit()?;
    }
    let timestamp = |gb: &mut BitReader<'_>| -> Result<Option<i64>> {
        if size_bits.saturating_sub(gb.position()) < sl.timestamp_len as usize {
            return Ok(None);
        }
        Ok(Some(gb.read_bits64(sl.timestamp_len)? as i64))
    };
    if dts_flag {
        header.dts = timestamp(gb)?;
    }
    if cts_flag {
        header.cts = timestamp(gb)?;
    }
    if sl.au_len > 0 {
        gb.skip_bits(sl.au_len)?;
    }
    if inst_bitrate {
        gb.skip_bits(sl.inst_bitrate_len)?;
    }
    Ok(())
}
