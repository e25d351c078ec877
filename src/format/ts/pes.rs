use super::parser::parse_pes_timestamp;
use super::pool::{BufferPool, PoolBuffer};
use super::registry::StreamRegistry;
use super::sl::{read_sl_header, SlConfig};
use super::types::*;
use crate::av::timestamp::{Rational, WrapReference};
use crate::av::{CodecId, Discard, StreamKey};
use crate::error::Result;
use bytes::Bytes;
use log::{trace, warn};

use super::psi::stream_type::set_stream_info;

/// Where the assembler is inside the current PES packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesState {
    /// Collecting the 6-byte start code prefix, stream id and length
    Header,
    /// Collecting the 3 bytes of the optional header that give its length
    PesHeader,
    /// Collecting the rest of the optional header
    PesHeaderFill,
    Payload,
    /// Dropping bytes until the next payload unit start
    Skip,
}

/// The clock teletext and subtitle timestamps are pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrClock {
    /// Last PCR of the owning program, in 90 kHz units
    pub pcr: i64,
    /// Wrap state of the stream sharing the PCR PID, if any
    pub wrap: Option<WrapReference>,
}

/// Demuxer state a PES assembler reads or updates while it runs.
pub struct PesEnv<'a> {
    pub streams: &'a mut StreamRegistry,
    pub pool: &'a BufferPool,
    pub fix_teletext_pts: bool,
    /// Refuse to create streams for PES data on PIDs no PMT announced
    pub skip_new_streams: bool,
    pub pcr_clock: Option<PcrClock>,
    /// The TS packet being pushed had its random access indicator set
    pub random_access: bool,
}

/// A reassembled PES payload, ready to become a packet.
#[derive(Debug, Clone)]
pub struct PesPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub pos: u64,
    pub corrupt: bool,
    pub stream: StreamKey,
    pub stream_id: u8,
    /// Started in a TS packet flagged as a random access point
    pub key: bool,
}

/// PES reassembly for one PID.
pub struct PesContext {
    pub pid: u16,
    pub pcr_pid: Option<u16>,
    pub stream_type: u8,
    pub stream: Option<StreamKey>,
    /// AC-3 core of an HDMV TrueHD stream
    pub sub_stream: Option<StreamKey>,
    pub state: PesState,
    pub data_index: usize,
    pub total_size: usize,
    pub pes_header_size: usize,
    header: [u8; MAX_PES_HEADER_SIZE],
    buffer: Option<PoolBuffer>,
    pub stream_id: u8,
    pub extended_stream_id: Option<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub corrupt: bool,
    pub key: bool,
    pub ts_packet_pos: u64,
    pub sl: SlConfig,
}

impl PesContext {
    pub fn new(pid: u16, pcr_pid: Option<u16>, stream_type: u8, stream: Option<StreamKey>) -> Self {
        Self {
            pid,
            pcr_pid,
            stream_type,
            stream,
            sub_stream: None,
            state: PesState::Skip,
            data_index: 0,
            total_size: 0,
            pes_header_size: 0,
            header: [0; MAX_PES_HEADER_SIZE],
            buffer: None,
            stream_id: 0,
            extended_stream_id: None,
            pts: None,
            dts: None,
            corrupt: false,
            key: false,
            ts_packet_pos: 0,
            sl: SlConfig::default(),
        }
    }

    /// Whether a payload is being assembled.
    pub fn has_data(&self) -> bool {
        self.state == PesState::Payload && self.data_index > 0
    }

    pub fn mark_corrupt(&mut self) {
        self.corrupt = true;
    }

    fn reset_packet_state(&mut self) {
        self.pts = None;
        self.dts = None;
        self.data_index = 0;
        self.corrupt = false;
        self.key = false;
        self.buffer = None;
    }

    /// Drops any partial payload after the input position jumped.
    pub fn reset_after_seek(&mut self) {
        if self.buffer.take().is_some() {
            self.data_index = 0;
            self.state = PesState::Skip;
        }
    }

    /// Hands out whatever payload is pending at end of input.
    pub fn flush(&mut self) -> Option<PesPacket> {
        if !self.has_data() {
            return None;
        }
        let packet = self.finish_packet();
        self.state = PesState::Skip;
        packet
    }

    /// Feeds the payload of one TS packet.
    ///
    /// Completed PES packets are appended to `out`; one TS packet can
    /// finish one payload and start another.
    pub fn push(
        &mut self,
        mut data: &[u8],
        is_start: bool,
        pos: u64,
        env: &mut PesEnv<'_>,
        out: &mut Vec<PesPacket>,
    ) -> Result<()> {
        if is_start {
            if self.has_data() {
                out.extend(self.finish_packet());
            } else {
                self.reset_packet_state();
            }
            self.state = PesState::Header;
            self.ts_packet_pos = pos;
            self.key = env.random_access;
        }

        while !data.is_empty() {
            match self.state {
                PesState::Header => {
                    data = self.fill_header(data, PES_START_SIZE);
                    if self.data_index == PES_START_SIZE {
                        self.parse_start(env)?;
                    }
                }
                PesState::PesHeader => {
                    data = self.fill_header(data, PES_HEADER_SIZE);
                    if self.data_index == PES_HEADER_SIZE {
                        self.pes_header_size = self.header[8] as usize + PES_HEADER_SIZE;
                        self.state = PesState::PesHeaderFill;
                    }
                }
                PesState::PesHeaderFill => {
                    data = self.fill_header(data, self.pes_header_size);
                    if self.data_index == self.pes_header_size {
                        data = self.parse_optional_header(data, env);
                    }
                }
                PesState::Payload => {
                    self.push_payload(data, env, out)?;
                    data = &[];
                }
                PesState::Skip => data = &[],
            }
        }
        Ok(())
    }

    fn fill_header<'d>(&mut self, data: &'d [u8], upto: usize) -> &'d [u8] {
        let len = upto.saturating_sub(self.data_index).min(data.len());
        self.header[self.data_index..self.data_index + len].copy_from_slice(&data[..len]);
        self.data_index += len;
        &data[len..]
    }

    fn parse_start(&mut self, env: &mut PesEnv<'_>) -> Result<()> {
        if self.header[..3] != [0x00, 0x00, 0x01] {
            trace!("pid 0x{:x}: no PES start code", self.pid);
            self.state = PesState::Skip;
            return Ok(());
        }
        let code = self.header[3] as u16 | 0x100;
        self.stream_id = self.header[3];

        let is_discarded = |key: Option<StreamKey>| {
            key.and_then(|k| env.streams.get(k))
                .map_or(false, |s| s.discard == Discard::All)
        };
        let discarded = is_discarded(self.stream)
            && (self.sub_stream.is_none() || is_discarded(self.sub_stream));
        if discarded || code == PADDING_STREAM {
            self.state = PesState::Skip;
            return Ok(());
        }

        if self.stream.is_none() {
            if env.skip_new_streams {
                self.state = PesState::Skip;
                return Ok(());
            }
            let key = env.streams.add(self.pid);
            if let Some(stream) = env.streams.get_mut(key) {
                set_stream_info(stream, 0, 0);
            }
            self.stream = Some(key);
            self.stream_type = 0;
        }

        self.total_size = match u16::from_be_bytes([self.header[4], self.header[5]]) as usize {
            0 => MAX_PES_PAYLOAD,
            size => size,
        };
        self.buffer = Some(env.pool.get(self.total_size)?);

        let no_optional_header = matches!(
            code,
            PROGRAM_STREAM_MAP
                | PRIVATE_STREAM_2
                | ECM_STREAM
                | EMM_STREAM
                | PROGRAM_STREAM_DIRECTORY
                | DSMCC_STREAM
                | TYPE_E_STREAM
        );
        if no_optional_header {
            self.pes_header_size = PES_START_SIZE;
            self.state = PesState::Payload;
            self.data_index = 0;
        } else {
            self.state = PesState::PesHeader;
            if let Some(stream) = self.stream.and_then(|k| env.streams.get_mut(k)) {
                if stream.codec.codec_id == CodecId::None {
                    stream.codec.request_probe = true;
                }
            }
        }
        Ok(())
    }

    fn parse_optional_header<'d>(&mut self, mut data: &'d [u8], env: &mut PesEnv<'_>) -> &'d [u8] {
        let h = &self.header;
        let flags = h[7];
        let mut r = PES_HEADER_SIZE;
        self.pts = None;
        self.dts = None;
        match flags & 0xc0 {
            0x80 => {
                let pts = parse_pes_timestamp(&h[r..r + 5]);
                self.pts = Some(pts);
                self.dts = Some(pts);
                r += 5;
            }
            0xc0 => {
                self.pts = Some(parse_pes_timestamp(&h[r..r + 5]));
                r += 5;
                self.dts = Some(parse_pes_timestamp(&h[r..r + 5]));
                r += 5;
            }
            _ => {}
        }

        self.extended_stream_id = None;
        if flags & 0x01 != 0 {
            let ext = h[r];
            r += 1;
            // private data, pack header, sequence counter and P-STD buffer
            let mut skip = ((ext >> 4) & 0x0b) as usize;
            skip += skip & 0x09;
            r += skip;
            if ext & 0x41 == 0x01
                && r + 2 <= self.pes_header_size
                && h[r] & 0x7f > 0
                && h[r + 1] & 0x80 == 0
            {
                self.extended_stream_id = Some(h[r + 1]);
            }
        }

        self.state = PesState::Payload;
        self.data_index = 0;

        if self.stream_type == STREAM_TYPE_ISO_IEC_14496_PES && !data.is_empty() {
            let sl = read_sl_header(&self.sl, data);
            if sl.dts.is_some() {
                self.dts = sl.dts;
            }
            if sl.cts.is_some() {
                self.pts = sl.cts;
            }
            if self.sl.timestamp_len > 0 && self.sl.timestamp_res > 0 {
                if let Some(stream) = self.stream.and_then(|k| env.streams.get_mut(k)) {
                    stream.set_pts_info(
                        self.sl.timestamp_len,
                        Rational::new(1, self.sl.timestamp_res as i64),
                    );
                }
            }
            data = &data[sl.len..];
            self.pes_header_size += sl.len;
        }
        if self.stream_type == STREAM_TYPE_METADATA && data.len() >= 5 {
            // metadata access unit wrapper
            data = &data[5..];
            self.pes_header_size += 5;
        }

        if env.fix_teletext_pts {
            self.pin_to_pcr(env);
        }
        data
    }

    /// Keeps teletext and DVB subtitle timestamps close to the program clock.
    fn pin_to_pcr(&mut self, env: &mut PesEnv<'_>) {
        let Some(stream) = self.stream.and_then(|k| env.streams.get_mut(k)) else {
            return;
        };
        let codec = stream.codec.codec_id;
        let teletext = codec == CodecId::DvbTeletext;
        if !teletext && codec != CodecId::DvbSubtitle {
            return;
        }

        let Some(clock) = env.pcr_clock else {
            if teletext {
                self.pts = None;
                self.dts = None;
            }
            return;
        };
        if clock.wrap.is_some() {
            stream.wrap = clock.wrap;
        }
        let pcr = clock.pcr;
        let pinned = pcr + TELETEXT_PTS_LEAD + TELETEXT_PTS_LATENCY;
        match self.dts {
            None => self.set_both(pcr),
            Some(dts) if dts < pcr => self.set_both(pcr),
            Some(dts) if teletext && dts > pinned => self.set_both(pinned),
            Some(dts) if !teletext && dts > pcr + SUBTITLE_MAX_LEAD => self.set_both(pinned),
            Some(_) => {}
        }
    }

    fn set_both(&mut self, ts: i64) {
        self.pts = Some(ts);
        self.dts = Some(ts);
    }

    fn push_payload(&mut self, data: &[u8], env: &mut PesEnv<'_>, out: &mut Vec<PesPacket>) -> Result<()> {
        if self.buffer.is_none() {
            return Ok(());
        }
        let mut data = data;
        if self.data_index > 0 && self.data_index + data.len() > self.total_size {
            // more data than announced, cut here and keep going unbounded
            out.extend(self.finish_packet());
            self.total_size = MAX_PES_PAYLOAD;
            self.buffer = Some(env.pool.get(self.total_size)?);
        } else if self.data_index == 0 && data.len() > self.total_size {
            data = &data[..self.total_size];
        }

        if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(data);
            self.data_index += data.len();
        }

        if self.total_size < MAX_PES_PAYLOAD
            && self.pes_header_size + self.data_index == self.total_size + PES_START_SIZE
        {
            out.extend(self.finish_packet());
        }
        Ok(())
    }

    fn finish_packet(&mut self) -> Option<PesPacket> {
        let buffer = self.buffer.take()?;
        let Some(main) = self.stream else {
            self.reset_packet_state();
            return None;
        };

        let mut corrupt = self.corrupt;
        if self.total_size != MAX_PES_PAYLOAD
            && self.pes_header_size + self.data_index != self.total_size + PES_START_SIZE
        {
            warn!("PES packet size mismatch on pid 0x{:x}", self.pid);
            corrupt = true;
        }

        let stream = match self.sub_stream {
            Some(sub)
                if self.stream_type == STREAM_TYPE_AUDIO_TRUEHD
                    && self.extended_stream_id == Some(EXTENDED_STREAM_ID_AC3_CORE) =>
            {
                sub
            }
            _ => main,
        };

        let packet = PesPacket {
            data: buffer.freeze(),
            pts: self.pts,
            dts: self.dts,
            pos: self.ts_packet_pos,
            corrupt,
            stream,
            stream_id: self.stream_id,
            key: self.key,
        };
        self.reset_packet_state();
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_ts(marker: u8, ts: i64) -> [u8; 5] {
        [
            (marker << 4) | (((ts >> 29) as u8) & 0x0e) | 1,
            (ts >> 22) as u8,
            (((ts >> 14) as u8) & 0xfe) | 1,
            (ts >> 7) as u8,
            (((ts << 1) as u8) & 0xfe) | 1,
        ]
    }

    /// A PES packet with an optional PTS; `declared` controls the length field.
    fn pes(stream_id: u8, pts: Option<i64>, payload: &[u8], declared: bool) -> Vec<u8> {
        let mut optional = Vec::new();
        if let Some(pts) = pts {
            optional.extend_from_slice(&encode_ts(0x2, pts));
        }
        let mut out = vec![0, 0, 1, stream_id, 0, 0, 0x80, if pts.is_some() { 0x80 } else { 0 }];
        out.push(optional.len() as u8);
        out.extend_from_slice(&optional);
        out.extend_from_slice(payload);
        if declared {
            let len = (out.len() - PES_START_SIZE) as u16;
            out[4..6].copy_from_slice(&len.to_be_bytes());
        }
        out
    }

    struct Harness {
        streams: StreamRegistry,
        pool: BufferPool,
        clock: Option<PcrClock>,
        fix_teletext_pts: bool,
        skip_new_streams: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                streams: StreamRegistry::new(),
                pool: BufferPool::new(),
                clock: None,
                fix_teletext_pts: true,
                skip_new_streams: false,
            }
        }

        fn push(&mut self, pes: &mut PesContext, data: &[u8], is_start: bool, pos: u64) -> Vec<PesPacket> {
            let mut env = PesEnv {
                streams: &mut self.streams,
                pool: &self.pool,
                fix_teletext_pts: self.fix_teletext_pts,
                skip_new_streams: self.skip_new_streams,
                pcr_clock: self.clock,
                random_access: false,
            };
            let mut out = Vec::new();
            pes.push(data, is_start, pos, &mut env, &mut out).unwrap();
            out
        }
    }

    fn with_stream(h: &mut Harness, pid: u16, stream_type: u8, codec: CodecId) -> PesContext {
        let key = h.streams.add(pid);
        let stream = h.streams.get_mut(key).unwrap();
        set_stream_info(stream, stream_type, 0);
        stream.codec.codec_id = codec;
        PesContext::new(pid, Some(pid), stream_type, Some(key))
    }

    #[test]
    fn test_declared_length_emits_at_completion() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        let data = pes(0xe0, Some(90_000), &[1, 2, 3, 4], true);
        let out = h.push(&mut ctx, &data, true, 376);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[1, 2, 3, 4]);
        assert_eq!(out[0].pts, Some(90_000));
        assert_eq!(out[0].dts, Some(90_000));
        assert_eq!(out[0].pos, 376);
        assert_eq!(out[0].stream_id, 0xe0);
        assert!(!out[0].corrupt);
    }

    #[test]
    fn test_unbounded_payload_spans_packets() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        let first = pes(0xe0, Some(3000), &[0xaa; 170], false);
        let (a, b) = first.split_at(100);
        assert!(h.push(&mut ctx, a, true, 0).is_empty());
        assert!(h.push(&mut ctx, b, false, 188).is_empty());
        assert!(h.push(&mut ctx, &[0xbb; 184], false, 376).is_empty());

        let next = pes(0xe0, Some(6000), &[0xcc; 10], false);
        let out = h.push(&mut ctx, &next, true, 564);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 170 + 184);
        assert_eq!(out[0].pts, Some(3000));
        assert_eq!(out[0].pos, 0);
        assert!(!out[0].corrupt);

        let tail = ctx.flush().unwrap();
        assert_eq!(&tail.data[..], &[0xcc; 10]);
        assert_eq!(tail.pts, Some(6000));
        assert_eq!(ctx.state, PesState::Skip);
        assert!(ctx.flush().is_none());
    }

    #[test]
    fn test_short_payload_is_corrupt() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x03, CodecId::Mp3);
        let mut data = pes(0xc0, None, &[5; 20], true);
        // claim 10 more bytes than are sent
        let len = u16::from_be_bytes([data[4], data[5]]) + 10;
        data[4..6].copy_from_slice(&len.to_be_bytes());
        assert!(h.push(&mut ctx, &data, true, 0).is_empty());

        let out = h.push(&mut ctx, &pes(0xc0, None, &[6; 4], true), true, 188);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.len(), 20);
        assert!(out[0].corrupt);
        assert_eq!(&out[1].data[..], &[6; 4]);
        assert!(!out[1].corrupt);
    }

    #[test]
    fn test_flush_at_end_of_input() {
        let mut h = Harness::new();

        // no declared length: whatever arrived is a whole packet
        let mut open_ended = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        let data = pes(0xe0, Some(90_000), &[0x21; 60], false);
        assert!(h.push(&mut open_ended, &data, true, 0).is_empty());
        let tail = open_ended.flush().unwrap();
        assert_eq!(&tail.data[..], &[0x21; 60]);
        assert_eq!(tail.pts, Some(90_000));
        assert!(!tail.corrupt);

        // declared length not reached before the input ended
        let mut bounded = with_stream(&mut h, 0x101, 0x03, CodecId::Mp3);
        let mut data = pes(0xc0, Some(45_000), &[0x42; 30], true);
        let len = u16::from_be_bytes([data[4], data[5]]) + 50;
        data[4..6].copy_from_slice(&len.to_be_bytes());
        assert!(h.push(&mut bounded, &data, true, 188).is_empty());
        let tail = bounded.flush().unwrap();
        assert_eq!(&tail.data[..], &[0x42; 30]);
        assert_eq!(tail.pts, Some(45_000));
        assert_eq!(tail.pos, 188);
        assert!(tail.corrupt);

        assert!(open_ended.flush().is_none());
        assert!(bounded.flush().is_none());
    }

    #[test]
    fn test_cc_damage_flags_packet() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        h.push(&mut ctx, &pes(0xe0, None, &[1; 8], false), true, 0);
        ctx.mark_corrupt();
        let out = h.push(&mut ctx, &pes(0xe0, None, &[2; 8], false), true, 188);
        assert!(out[0].corrupt);
        assert!(!ctx.flush().unwrap().corrupt);
    }

    #[test]
    fn test_garbage_and_padding_are_skipped() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        assert!(h.push(&mut ctx, &[0x12, 0x34, 0x56, 0x78, 0, 0, 9, 9], true, 0).is_empty());
        assert_eq!(ctx.state, PesState::Skip);

        assert!(h.push(&mut ctx, &pes(0xbe, None, &[0xff; 16], false), true, 0).is_empty());
        assert_eq!(ctx.state, PesState::Skip);
        assert!(ctx.flush().is_none());
    }

    #[test]
    fn test_private_stream_2_has_no_optional_header() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x06, CodecId::BinData);
        let data = [0, 0, 1, 0xbf, 0, 3, 7, 8, 9];
        let out = h.push(&mut ctx, &data, true, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[7, 8, 9]);
        assert_eq!(out[0].pts, None);
    }

    #[test]
    fn test_unannounced_pid_creates_stream() {
        let mut h = Harness::new();
        let mut ctx = PesContext::new(0x200, None, 0, None);
        h.push(&mut ctx, &pes(0xe0, None, &[1; 8], false), true, 0);
        let key = ctx.stream.unwrap();
        let stream = h.streams.get(key).unwrap();
        assert_eq!(stream.id, 0x200);
        assert!(stream.codec.request_probe);

        let mut h = Harness::new();
        h.skip_new_streams = true;
        let mut ctx = PesContext::new(0x200, None, 0, None);
        h.push(&mut ctx, &pes(0xe0, None, &[1; 8], false), true, 0);
        assert!(ctx.stream.is_none());
        assert!(h.streams.is_empty());
        assert_eq!(ctx.state, PesState::Skip);
    }

    #[test]
    fn test_discarded_stream_is_skipped() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        h.streams.get_mut(ctx.stream.unwrap()).unwrap().discard = Discard::All;
        h.push(&mut ctx, &pes(0xe0, None, &[1; 8], true), true, 0);
        assert_eq!(ctx.state, PesState::Skip);
    }

    #[test]
    fn test_teletext_pinned_to_pcr() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x06, CodecId::DvbTeletext);
        h.clock = Some(PcrClock {
            pcr: 900_000,
            wrap: None,
        });

        // five seconds ahead of the clock
        let out = h.push(&mut ctx, &pes(0xbd, Some(900_000 + 450_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(900_000 + 12_654));
        assert_eq!(out[0].dts, Some(900_000 + 12_654));

        // behind the clock
        let out = h.push(&mut ctx, &pes(0xbd, Some(1000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(900_000));

        // close enough is kept
        let out = h.push(&mut ctx, &pes(0xbd, Some(905_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(905_000));

        // no program clock at all
        h.clock = None;
        let out = h.push(&mut ctx, &pes(0xbd, Some(905_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, None);

        h.fix_teletext_pts = false;
        h.clock = Some(PcrClock {
            pcr: 900_000,
            wrap: None,
        });
        let out = h.push(&mut ctx, &pes(0xbd, Some(2_000_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(2_000_000));
    }

    #[test]
    fn test_subtitle_lead_limit() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x06, CodecId::DvbSubtitle);
        h.clock = Some(PcrClock {
            pcr: 900_000,
            wrap: None,
        });
        let out = h.push(&mut ctx, &pes(0xbd, Some(900_000 + 450_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(900_000 + 450_000));
        let out = h.push(&mut ctx, &pes(0xbd, Some(900_000 + 950_000), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(900_000 + 12_654));
        // subtitles without a clock keep their timestamps
        h.clock = None;
        let out = h.push(&mut ctx, &pes(0xbd, Some(42), &[1; 4], true), true, 0);
        assert_eq!(out[0].pts, Some(42));
    }

    #[test]
    fn test_ac3_core_goes_to_sub_stream() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x1100, STREAM_TYPE_AUDIO_TRUEHD, CodecId::TrueHd);
        let sub = h.streams.add(0x1100);
        ctx.sub_stream = Some(sub);

        // PES extension with stream_id_extension 0x76
        let mut data = vec![0, 0, 1, 0xfd, 0, 0, 0x80, 0x01, 3, 0x01, 0x81, 0x76];
        data.extend_from_slice(&[0x0b, 0x77]);
        let len = (data.len() - PES_START_SIZE) as u16;
        data[4..6].copy_from_slice(&len.to_be_bytes());
        let out = h.push(&mut ctx, &data, true, 0);
        assert_eq!(out[0].stream, sub);
        assert_eq!(&out[0].data[..], &[0x0b, 0x77]);

        let out = h.push(&mut ctx, &pes(0xfd, None, &[1, 2], true), true, 0);
        assert_eq!(out[0].stream, ctx.stream.unwrap());
    }

    #[test]
    fn test_seek_reset_drops_partial_payload() {
        let mut h = Harness::new();
        let mut ctx = with_stream(&mut h, 0x100, 0x1b, CodecId::H264);
        h.push(&mut ctx, &pes(0xe0, None, &[1; 8], false), true, 0);
        ctx.reset_after_seek();
        assert_eq!(ctx.state, PesState::Skip);
        assert!(h.push(&mut ctx, &[2; 184], false, 188).is_empty());
        assert!(ctx.flush().is_none());
    }
}
