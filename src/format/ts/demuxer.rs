use super::context::{ControlFlow, DemuxContext, PmtScan, ScanPhase};
use super::framer::{probe_packet_size, PacketFramer};
use super::parser::{packet_pid, parse_pcr};
use super::program::Program;
use super::psi::ServiceInfo;
use super::registry::StreamsChanged;
use super::source::ByteSource;
use super::timing::{self, DurationMethod, Timings};
use super::types::*;
use crate::av::timestamp::TIME_BASE_27MHZ;
use crate::av::{CodecId, MediaKind, MediaStream, Packet};
use crate::config::{DemuxMode, DemuxOptions};
use crate::error::{Result, TsError};
use crate::format::Demuxer as FormatDemuxer;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use log::{debug, info, trace, warn};

/// Timestamp wrap bits of the raw-mode stream
const RAW_PTS_WRAP_BITS: u32 = 60;

/// Bytes of a TS packet needed to read its PCR
const PCR_PEEK_SIZE: usize = 12;

/// Bisection steps before a seek settles for the closest position found
const MAX_SEEK_STEPS: u32 = 64;

/// How `seek` interprets its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekFlags {
    /// Land on the last position at or before the target
    pub backward: bool,
    /// The target is a byte offset
    pub byte: bool,
    /// Accept packets that are not random access points
    pub any: bool,
}

/// Result of one run of the packet loop
enum Handled {
    Packet(Packet),
    /// A table handler ended the scan
    Stopped,
    /// The packet budget ran out
    Exhausted,
}

/// PCR interpolation state of raw mode.
#[derive(Debug, Default)]
struct RawClock {
    cur_pcr: Option<i64>,
    /// PCR advance per TS packet, in 27 MHz units
    pcr_incr: i64,
}

/// MPEG-2 transport stream demuxer over a [`ByteSource`].
///
/// `open` discovers programs and streams; `read_packet` then returns one
/// reassembled PES payload (or section, or raw TS packet) per call.
pub struct TsDemuxer<S: ByteSource> {
    source: S,
    framer: PacketFramer,
    ctx: DemuxContext,
    /// Where TS data starts in the source
    data_offset: u64,
    /// Offset of the packet grid, taken from the last packet of the header scan
    pos47: u64,
    bit_rate: Option<u64>,
    timings: Option<Timings>,
    raw_clock: RawClock,
}

impl<S: ByteSource> TsDemuxer<S> {
    /// Detects the packet size and reads programs and streams from the start
    /// of `source`.
    pub async fn open(source: S, options: DemuxOptions) -> Result<Self> {
        Self::open_inner(source, options, None).await
    }

    /// Like [`open`](Self::open), with `listener` installed before the
    /// header is read, so the first PMT is reported as well.
    pub async fn open_with_listener<L>(source: S, options: DemuxOptions, listener: L) -> Result<Self>
    where
        L: StreamsChanged + 'static,
    {
        Self::open_inner(source, options, Some(Box::new(listener))).await
    }

    async fn open_inner(
        mut source: S,
        options: DemuxOptions,
        listener: Option<Box<dyn StreamsChanged>>,
    ) -> Result<Self> {
        let data_offset = source.tell();
        let raw_packet_size = match probe_packet_size(&mut source).await {
            Ok(size) => size,
            Err(TsError::InvalidData(_)) => {
                warn!("Failed to detect TS packet size, assuming {}", TS_PACKET_SIZE);
                TS_PACKET_SIZE
            }
            Err(e) => return Err(e),
        };
        source.seek(data_offset).await?;
        debug!("TS packet size {} at offset {}", raw_packet_size, data_offset);

        let mode = options.mode;
        let estimate = options.estimate_duration;
        let framer = PacketFramer::new(raw_packet_size, options.resync_size);
        let mut demuxer = Self {
            source,
            framer,
            ctx: DemuxContext::new(options, raw_packet_size),
            data_offset,
            pos47: data_offset % raw_packet_size as u64,
            bit_rate: None,
            timings: None,
            raw_clock: RawClock::default(),
        };
        demuxer.ctx.set_listener(listener);

        match mode {
            DemuxMode::Raw => demuxer.read_raw_header().await?,
            DemuxMode::Normal => {
                demuxer.read_header().await?;
                if estimate && demuxer.source.is_seekable() {
                    match demuxer.estimate_duration().await {
                        Ok(_) => {}
                        Err(TsError::Exit) => return Err(TsError::Exit),
                        Err(e) => debug!("duration estimation failed: {}", e),
                    }
                }
            }
        }
        demuxer.source.seek(demuxer.data_offset).await?;
        Ok(demuxer)
    }

    /// Installs the listener told about stream list changes.
    pub fn set_streams_changed_callback<F>(&mut self, callback: F)
    where
        F: StreamsChanged + 'static,
    {
        self.ctx.set_listener(Some(Box::new(callback)));
    }

    pub fn clear_streams_changed_callback(&mut self) {
        self.ctx.set_listener(None);
    }

    /// Packet size on the wire: 188, 192 or 204.
    pub fn ts_packetsize(&self) -> usize {
        self.framer.raw_packet_size()
    }

    pub fn streams(&self) -> &[MediaStream] {
        self.ctx.streams().as_slice()
    }

    pub fn programs(&self) -> &[Program] {
        self.ctx.programs().as_slice()
    }

    /// Service name and provider announced by the SDT for `program`.
    pub fn service(&self, program: u16) -> Option<&ServiceInfo> {
        self.ctx.programs().service(program)
    }

    /// Transport stream id from the last PAT.
    pub fn transport_stream_id(&self) -> Option<u16> {
        self.ctx.ts_id
    }

    /// The PMT section that last changed the stream list.
    pub fn current_pmt(&self) -> Option<&Bytes> {
        self.ctx.cur_pmt_section.as_ref()
    }

    /// Mux bitrate estimated from PCRs, in bits per second.
    pub fn bit_rate(&self) -> Option<u64> {
        self.bit_rate
    }

    pub fn timings(&self) -> Option<Timings> {
        self.timings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn probe_budget(&self) -> u64 {
        (self.ctx.options.probesize / self.ctx.raw_packet_size as u64).max(1)
    }

    /// Reads TS packets until one produces output, a table handler stops the
    /// scan or `budget` packets were consumed.
    async fn handle_packets(&mut self, budget: &mut Option<u64>) -> Result<Handled> {
        let pos = self.source.tell();
        if self.ctx.last_pos.is_some_and(|last| last != pos) {
            self.ctx.reset_after_seek();
        }
        loop {
            if *budget == Some(0) {
                return Ok(Handled::Exhausted);
            }
            if self.source.is_interrupted() {
                return Err(TsError::Exit);
            }
            let packet = *self.framer.next_packet(&mut self.source).await?;
            let pos = self.source.tell();
            self.framer.finish_packet(&mut self.source).await?;
            if let Some(left) = budget.as_mut() {
                *left -= 1;
            }
            let flow = self.ctx.handle_packet(&packet, pos);
            self.ctx.last_pos = Some(self.source.tell());
            match flow? {
                ControlFlow::Emitted(packet) => return Ok(Handled::Packet(packet)),
                ControlFlow::Stop => return Ok(Handled::Stopped),
                ControlFlow::Continue => {}
            }
        }
    }

    /// Runs the packet loop from the start of the data. Returns whether a
    /// table handler stopped it.
    async fn scan_from_start(&mut self, budget: Option<u64>) -> Result<bool> {
        self.source.seek(self.data_offset).await?;
        let mut budget = budget;
        loop {
            match self.handle_packets(&mut budget).await {
                Ok(Handled::Packet(_)) => {}
                Ok(Handled::Stopped) => return Ok(true),
                Ok(Handled::Exhausted) | Err(TsError::Eof) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_header(&mut self) -> Result<()> {
        let budget = self.probe_budget();
        self.ctx.emit_enabled = false;
        self.ctx.open_table_filters();

        self.ctx.scan = ScanPhase::Pat;
        self.scan_from_start(Some(budget)).await?;
        let pat: Vec<(u16, u16)> = self
            .ctx
            .programs()
            .iter()
            .map(|p| (p.id, p.pmt_pid))
            .collect();
        debug!("PAT scan found {} program(s)", pat.len());

        if pat.is_empty() {
            warn!("no PAT found, guessing streams from PES headers");
            self.ctx.auto_guess = true;
            self.ctx.scan = ScanPhase::Off;
            self.scan_from_start(Some(budget)).await?;
            self.bit_rate = self.probe_bitrate(budget).await?.map(|(rate, _)| rate);
        } else {
            self.ctx.scan = ScanPhase::Pmt;
            for (id, pmt_pid) in pat {
                self.scan_program(id, pmt_pid, budget).await?;
            }
            self.ctx.req_sid = None;
            if !self.ctx.programs().all_pmts_found() {
                warn!("PMT missing after scanning every program, guessing the rest from PES headers");
                self.ctx.auto_guess = true;
            }
        }

        self.ctx.scan = ScanPhase::Off;
        self.ctx.header_done = true;
        self.ctx.emit_enabled = true;
        self.ctx.queue.clear();
        let raw = self.ctx.raw_packet_size as u64;
        self.pos47 = self.ctx.pos47_full % raw;
        info!(
            "header read: {} program(s), {} stream(s)",
            self.ctx.programs().len(),
            self.ctx.streams().len()
        );
        self.source.seek(self.data_offset).await?;
        Ok(())
    }

    /// Looks for the PMT of one program, relaxing the PMT filter step by step.
    async fn scan_program(&mut self, id: u16, pmt_pid: u16, budget: u64) -> Result<()> {
        self.ctx.req_sid = Some(id);
        let limit = (!self.ctx.options.scan_all_pmts).then_some(budget);
        let retry_without_crc = self.ctx.options.retry_pmt_without_crc;
        let retry_chopped = self.ctx.options.retry_pmt_chopped;

        for attempt in 0..3 {
            match attempt {
                0 => {}
                1 if retry_without_crc => {
                    info!("program {}: no PMT found, retrying without CRC check", id);
                    self.ctx.configure_pmt_filter(pmt_pid, false, false);
                }
                2 if retry_chopped => {
                    info!("program {}: no PMT found, retrying with PMT cut at the TS packet", id);
                    self.ctx.configure_pmt_filter(pmt_pid, false, true);
                }
                _ => continue,
            }
            self.ctx.pmt_scan = PmtScan::Searching;
            self.scan_from_start(limit).await?;
            if self.ctx.pmt_scan == PmtScan::NotInPat {
                debug!("program {} disappeared from the PAT", id);
                return Ok(());
            }
            if self.ctx.programs().get(id).is_some_and(|p| p.pmt_found) {
                trace!("program {}: PMT found", id);
                return Ok(());
            }
        }
        warn!("no PMT found for program {} on pid 0x{:x}", id, pmt_pid);
        Ok(())
    }

    /// Finds two increasing PCRs on the first PCR-carrying PID.
    ///
    /// Returns the mux bitrate and the PCR advance per packet.
    async fn probe_bitrate(&mut self, budget: u64) -> Result<Option<(u64, i64)>> {
        self.source.seek(self.data_offset).await?;
        let mut first: Option<(u16, i64, u64)> = None;
        let mut found = None;
        for index in 0..budget {
            let packet = match self.framer.next_packet(&mut self.source).await {
                Ok(packet) => *packet,
                Err(TsError::Eof) => break,
                Err(e) => return Err(e),
            };
            self.framer.finish_packet(&mut self.source).await?;
            let Some(pcr) = parse_pcr(&packet) else {
                continue;
            };
            let pid = packet_pid(&packet);
            match first {
                None => first = Some((pid, pcr, index)),
                Some((pcr_pid, _, _)) if pcr_pid != pid => {}
                Some((_, prev, at)) => {
                    let packets = index - at;
                    if let Some(rate) = timing::bitrate_from_pcr(prev, pcr, packets) {
                        found = Some((rate, (pcr - prev) / packets as i64));
                        break;
                    }
                    warn!("invalid pcr pair {} >= {}", prev, pcr);
                    first = Some((pid, pcr, index));
                }
            }
        }
        self.source.seek(self.data_offset).await?;
        if let Some((rate, _)) = found {
            debug!("estimated bitrate {} bit/s from PCR", rate);
        }
        Ok(found)
    }

    async fn read_raw_header(&mut self) -> Result<()> {
        let key = self.ctx.streams.add(0);
        if let Some(stream) = self.ctx.streams.get_mut(key) {
            stream.codec.codec_type = MediaKind::Data;
            stream.codec.codec_id = CodecId::Mpeg2Ts;
            stream.set_pts_info(RAW_PTS_WRAP_BITS, TIME_BASE_27MHZ);
        }
        let budget = self.probe_budget();
        if let Some((rate, incr)) = self.probe_bitrate(budget).await? {
            self.bit_rate = Some(rate);
            self.raw_clock.pcr_incr = incr;
        }
        self.ctx.header_done = true;
        Ok(())
    }

    /// Returns the next packet.
    ///
    /// At end of input, partially assembled payloads are handed out first,
    /// flagged corrupt; then `Eof` is returned.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        if self.ctx.options.mode == DemuxMode::Raw {
            return self.read_raw_packet().await;
        }
        if let Some(packet) = self.ctx.queue.pop_front() {
            return Ok(packet);
        }
        loop {
            match self.handle_packets(&mut None).await {
                Ok(Handled::Packet(packet)) => return Ok(packet),
                Ok(Handled::Stopped) | Ok(Handled::Exhausted) => {}
                Err(TsError::Eof) => return self.ctx.flush_pending().ok_or(TsError::Eof),
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_raw_packet(&mut self) -> Result<Packet> {
        if self.source.is_interrupted() {
            return Err(TsError::Exit);
        }
        let packet = *self.framer.next_packet(&mut self.source).await?;
        let pos = self.source.tell() - TS_PACKET_SIZE as u64;
        self.framer.finish_packet(&mut self.source).await?;

        let mut out = Packet::new(Bytes::copy_from_slice(&packet))
            .with_pos(pos)
            .with_stream_index(0);
        if self.ctx.options.compute_pcr {
            if let Some(pcr) = parse_pcr(&packet) {
                if let Some(incr) = self.next_pcr_increment(packet_pid(&packet), pcr).await? {
                    self.raw_clock.pcr_incr = incr;
                }
                self.raw_clock.cur_pcr = Some(pcr);
            }
            if let Some(cur) = self.raw_clock.cur_pcr {
                let incr = self.raw_clock.pcr_incr;
                out = out.with_pts(Some(cur)).with_duration(incr);
                self.raw_clock.cur_pcr = Some(cur + incr);
            }
        }
        Ok(out)
    }

    /// Looks ahead for the next PCR on `pid` and returns the PCR advance per
    /// packet. The source position is restored.
    async fn next_pcr_increment(&mut self, pid: u16, pcr: i64) -> Result<Option<i64>> {
        let pos = self.source.tell();
        let raw = self.framer.raw_packet_size() as u64;
        let mut buf = [0u8; PCR_PEEK_SIZE];
        let mut incr = None;
        for i in 0..MAX_PACKET_READAHEAD as u64 {
            self.source.seek(pos + i * raw).await?;
            if self.source.read_full(&mut buf).await? < PCR_PEEK_SIZE {
                break;
            }
            if buf[0] != SYNC_BYTE || packet_pid(&buf) != pid {
                continue;
            }
            if let Some(next) = parse_pcr(&buf) {
                incr = Some((next - pcr) / (i as i64 + 1));
                break;
            }
        }
        self.source.seek(pos).await?;
        trace!("raw mode pcr increment {:?}", incr);
        Ok(incr)
    }

    /// Rounds `pos` up to the packet grid.
    fn align(&self, pos: u64) -> u64 {
        let raw = self.ctx.raw_packet_size as u64;
        if pos <= self.pos47 {
            return self.pos47;
        }
        (pos + raw - 1 - self.pos47) / raw * raw + self.pos47
    }

    /// DTS and position of the first packet of `stream_index` at or after
    /// byte `pos`, reading no further than `pos_limit`.
    pub async fn get_dts(&mut self, stream_index: usize, pos: u64, pos_limit: u64) -> Result<Option<(i64, u64)>> {
        self.find_dts(stream_index, pos, pos_limit, false).await
    }

    async fn find_dts(
        &mut self,
        stream_index: usize,
        pos: u64,
        pos_limit: u64,
        key_only: bool,
    ) -> Result<Option<(i64, u64)>> {
        let mut cur = self.align(pos);
        self.ctx.queue.clear();
        self.source.seek(cur).await?;
        while cur < pos_limit {
            let packet = match self.read_packet().await {
                Ok(packet) => packet,
                Err(TsError::Eof) => return Ok(None),
                Err(e) => return Err(e),
            };
            if let (Some(dts), Some(at)) = (packet.dts, packet.pos) {
                if packet.stream_index == stream_index && at >= pos && (!key_only || packet.flags.key) {
                    return Ok(Some((dts, at)));
                }
            }
            cur = packet.pos.unwrap_or(cur).max(cur);
        }
        Ok(None)
    }

    /// Moves the read position so the next packets of `stream_index` start
    /// near `target`, given in that stream's time base (or in bytes with
    /// [`SeekFlags::byte`]).
    pub async fn seek(&mut self, stream_index: usize, target: i64, flags: SeekFlags) -> Result<()> {
        if flags.byte {
            let pos = self.align(target.max(0) as u64);
            debug!("byte seek to {}", pos);
            return self.reposition(pos).await;
        }
        if self.ctx.streams().by_index(stream_index).is_none() {
            return Err(TsError::InvalidData(format!("no stream #{}", stream_index)));
        }
        let size = match self.source.size().await? {
            Some(size) => size,
            None => return Err(TsError::InvalidData("seek needs a source of known size".into())),
        };

        let pos = match self.bisect(stream_index, target, flags, size, !flags.any).await? {
            Some(pos) => Some(pos),
            None if !flags.any => self.bisect(stream_index, target, flags, size, false).await?,
            None => None,
        };
        let pos = pos.unwrap_or(self.data_offset);
        debug!("seek stream #{} to {} -> byte {}", stream_index, target, pos);
        self.reposition(pos).await
    }

    async fn bisect(
        &mut self,
        stream_index: usize,
        target: i64,
        flags: SeekFlags,
        size: u64,
        key_only: bool,
    ) -> Result<Option<u64>> {
        let raw = self.ctx.raw_packet_size as u64;
        let mut lo = self.data_offset;
        let mut hi = size;
        // closest packets below and above the target
        let mut below = None;
        let mut above = None;
        for _ in 0..MAX_SEEK_STEPS {
            if hi <= lo + raw {
                break;
            }
            let mid = self.align(lo + (hi - lo) / 2);
            if mid >= hi {
                break;
            }
            match self.find_dts(stream_index, mid, hi, key_only).await? {
                Some((dts, at)) if dts <= target => {
                    below = Some(at);
                    if dts == target {
                        above = Some(at);
                        break;
                    }
                    lo = mid.max(lo + raw);
                }
                Some((_, at)) => {
                    above = Some(at);
                    hi = mid;
                }
                None => hi = mid,
            }
        }
        if below.is_none() {
            if let Some((dts, at)) = self.find_dts(stream_index, lo, size, key_only).await? {
                if dts <= target {
                    below = Some(at);
                } else if above.map_or(true, |a| at < a) {
                    above = Some(at);
                }
            }
        }
        Ok(if flags.backward { below.or(above) } else { above.or(below) })
    }

    async fn reposition(&mut self, pos: u64) -> Result<()> {
        self.ctx.queue.clear();
        self.source.seek(pos).await?;
        Ok(())
    }

    /// Estimates start time and duration of the input.
    ///
    /// Tries the last timestamps near the end of the input, then durations
    /// the streams already carry, then the file size over the bitrate. The
    /// read position is restored.
    pub async fn estimate_duration(&mut self) -> Result<Timings> {
        let saved = self.source.tell();
        let result = self.estimate_timings().await;
        self.ctx.queue.clear();
        self.source.seek(saved).await?;
        let timings = result?;
        debug!(
            "start {:?} us, duration {:?} us ({:?})",
            timings.start_time_us, timings.duration_us, timings.method
        );
        self.timings = Some(timings);
        Ok(timings)
    }

    async fn estimate_timings(&mut self) -> Result<Timings> {
        let size = self.source.size().await?;
        if let Some(size) = size {
            self.read_start_times().await?;
            if self.read_end_times(size).await? {
                return Ok(timing::summarize(&self.ctx.streams, DurationMethod::FromPts));
            }
        }
        if self.ctx.streams.iter().any(|s| s.duration.is_some()) {
            return Ok(timing::summarize(&self.ctx.streams, DurationMethod::FromStream));
        }
        if self.bit_rate.is_none() {
            let budget = self.probe_budget();
            self.bit_rate = self.probe_bitrate(budget).await?.map(|(rate, _)| rate);
        }
        if let (Some(size), Some(rate)) = (size, self.bit_rate) {
            if let Some(duration) = timing::duration_from_bitrate(size.saturating_sub(self.data_offset), rate) {
                timing::fill_durations(&mut self.ctx.streams, duration);
            }
        }
        Ok(timing::summarize(&self.ctx.streams, DurationMethod::FromBitrate))
    }

    /// Reads from the start until every stream has a start time or the
    /// probe budget is spent.
    async fn read_start_times(&mut self) -> Result<()> {
        self.source.seek(self.data_offset).await?;
        self.ctx.queue.clear();
        let mut budget = Some(self.probe_budget());
        loop {
            if self.ctx.streams.iter().all(|s| s.start_time.is_some()) {
                return Ok(());
            }
            match self.handle_packets(&mut budget).await {
                Ok(Handled::Packet(_)) | Ok(Handled::Stopped) => {}
                Ok(Handled::Exhausted) | Err(TsError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads the tail of the input, widening the window until every stream
    /// with a start time has an end. Returns whether any stream got one.
    async fn read_end_times(&mut self, size: u64) -> Result<bool> {
        let mut found = false;
        for retry in 0..=DURATION_MAX_RETRY {
            let window = DURATION_MAX_READ_SIZE << retry;
            let offset = self.align(size.saturating_sub(window).max(self.data_offset));
            self.ctx.queue.clear();
            self.source.seek(offset).await?;
            trace!("reading end timestamps from byte {}", offset);

            loop {
                let packet = match self.handle_packets(&mut None).await {
                    Ok(Handled::Packet(packet)) => packet,
                    Ok(_) => continue,
                    Err(TsError::Eof) => match self.ctx.flush_pending() {
                        Some(packet) => packet,
                        None => break,
                    },
                    Err(e) => return Err(e),
                };
                let queued: Vec<Packet> = self.ctx.queue.drain(..).collect();
                for packet in std::iter::once(packet).chain(queued) {
                    let Some(ts) = packet.pts.or(packet.dts) else {
                        continue;
                    };
                    if let Some(stream) = self.ctx.streams.by_index_mut(packet.stream_index) {
                        found |= timing::observe_end(stream, ts, packet.duration);
                    }
                }
            }

            let done = self
                .ctx
                .streams
                .iter()
                .filter(|s| s.start_time.is_some())
                .all(|s| s.duration.is_some());
            if (found && done) || offset <= self.data_offset {
                break;
            }
        }
        Ok(found)
    }

    /// Releases every filter, table and pooled buffer. Packets already
    /// returned stay valid.
    pub fn close(&mut self) {
        debug!("closing demuxer");
        self.ctx.close();
    }

    /// Turns the demuxer into a stream of packets ending at end of input.
    pub fn into_stream(self) -> impl Stream<Item = Result<Packet>> {
        stream::unfold(Some(self), |state| async move {
            let mut demuxer = state?;
            match demuxer.read_packet().await {
                Ok(packet) => Some((Ok(packet), Some(demuxer))),
                Err(TsError::Eof) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[async_trait]
impl<S: ByteSource> FormatDemuxer for TsDemuxer<S> {
    async fn read_packet(&mut self) -> Result<Packet> {
        TsDemuxer::read_packet(self).await
    }

    async fn streams(&mut self) -> Result<Vec<MediaStream>> {
        Ok(TsDemuxer::streams(self).to_vec())
    }
}
