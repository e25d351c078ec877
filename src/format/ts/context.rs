//! Per-packet demultiplexing.
//!
//! [`DemuxContext`] owns everything the packet loop touches: the PID filter
//! table, the program table, the stream registry and the queue of packets
//! that are ready but not yet handed out. Table handlers run synchronously
//! inside [`DemuxContext::handle_packet`] and report back through
//! [`ControlFlow`] instead of a shared stop flag.

use super::filter::{FilterKind, FilterTable, PidFilter};
use super::parser::{parse_pcr, TsHeader};
use super::pes::{PcrClock, PesContext, PesEnv, PesPacket};
use super::pool::BufferPool;
use super::program::{Program, ProgramTable};
use super::psi::mp4::{read_dec_config, read_od};
use super::psi::stream_type::set_stream_info;
use super::psi::{parse_eit, parse_pat, parse_pmt, parse_scte35, parse_sdt, PatEntry, PmtEntry, Pmt};
use super::registry::{StreamRegistry, StreamsChanged, StreamsChangedEvent};
use super::section::{SectionFilter, SectionHandler, SectionHeader};
use super::timing;
use super::types::*;
use crate::av::{CodecId, Discard, MediaKind, Packet, SideData, StreamKey};
use crate::config::DemuxOptions;
use crate::error::Result;
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::collections::{HashSet, VecDeque};

/// What the packet loop should do after one TS packet.
#[derive(Debug)]
pub enum ControlFlow {
    /// Nothing to hand out, keep reading
    Continue,
    /// A table handler finished what the current scan was looking for
    Stop,
    /// A packet is ready; further ones from the same TS packet are queued
    Emitted(Packet),
}

/// Which part of header discovery is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Off,
    /// Looking for the PAT; no PMT filters are opened yet
    Pat,
    /// Looking for the PMT of `req_sid`
    Pmt,
}

/// Outcome of looking for one program's PMT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmtScan {
    Searching,
    Found,
    /// The PAT does not list the program
    NotInPat,
}

/// DSM-CC sections completed by one TS packet, packed into one payload.
struct DsmccBatch {
    stream: StreamKey,
    data: Vec<u8>,
    used: usize,
}

impl DsmccBatch {
    fn new(stream: StreamKey, section: &[u8]) -> Self {
        let mut data = Vec::with_capacity(section.len() + TS_PACKET_SIZE - TS_HEADER_SIZE);
        data.extend_from_slice(section);
        data.resize(section.len() + TS_PACKET_SIZE - TS_HEADER_SIZE, 0xff);
        Self {
            stream,
            data,
            used: section.len(),
        }
    }

    fn append(&mut self, section: &[u8]) {
        if self.data.len() - self.used < section.len() {
            debug!("Insufficient space for additional packet");
            return;
        }
        self.data[self.used..self.used + section.len()].copy_from_slice(section);
        self.used += section.len();
    }
}

/// Demultiplexing state shared by the header scan and the read loop.
pub struct DemuxContext {
    pub(crate) options: DemuxOptions,
    pub(crate) filters: FilterTable,
    pub(crate) streams: StreamRegistry,
    pub(crate) programs: ProgramTable,
    pub(crate) pool: BufferPool,
    listener: Option<Box<dyn StreamsChanged>>,
    /// Packets waiting to be returned by `read_packet`
    pub(crate) queue: VecDeque<Packet>,
    /// Program being tracked; `None` tracks every program
    pub(crate) req_sid: Option<u16>,
    pub(crate) scan: ScanPhase,
    pub(crate) pmt_scan: PmtScan,
    /// No PSI: every PID starting a payload unit gets a PES filter
    pub(crate) auto_guess: bool,
    pub(crate) header_done: bool,
    /// Completed payloads are handed out; off during header discovery
    pub(crate) emit_enabled: bool,
    pub(crate) raw_packet_size: usize,
    /// Byte offset of the last TS packet carrying payload
    pub(crate) pos47_full: u64,
    /// Source position after the last handled packet
    pub(crate) last_pos: Option<u64>,
    pub(crate) ts_id: Option<u16>,
    /// Raw bytes of the PMT that last changed the stream list
    pub(crate) cur_pmt_section: Option<Bytes>,
    epg_stream: Option<StreamKey>,
    cc_warned: HashSet<u16>,
    stop: bool,
    out: Vec<Packet>,
    dsmcc: Option<DsmccBatch>,
}

impl DemuxContext {
    pub fn new(options: DemuxOptions, raw_packet_size: usize) -> Self {
        Self {
            options,
            filters: FilterTable::new(),
            streams: StreamRegistry::new(),
            programs: ProgramTable::new(),
            pool: BufferPool::new(),
            listener: None,
            queue: VecDeque::new(),
            req_sid: None,
            scan: ScanPhase::Off,
            pmt_scan: PmtScan::Searching,
            auto_guess: false,
            header_done: false,
            emit_enabled: true,
            raw_packet_size,
            pos47_full: 0,
            last_pos: None,
            ts_id: None,
            cur_pmt_section: None,
            epg_stream: None,
            cc_warned: HashSet::new(),
            stop: false,
            out: Vec::new(),
            dsmcc: None,
        }
    }

    pub fn set_listener(&mut self, listener: Option<Box<dyn StreamsChanged>>) {
        self.listener = listener;
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn programs(&self) -> &ProgramTable {
        &self.programs
    }

    /// Opens the PAT, SDT and EIT filters.
    pub fn open_table_filters(&mut self) {
        self.open_section_filter(PAT_PID, SectionHandler::Pat, true);
        self.open_section_filter(SDT_PID, SectionHandler::Sdt, true);
        self.open_section_filter(EIT_PID, SectionHandler::Eit, true);
    }

    fn open_section_filter(&mut self, pid: u16, handler: SectionHandler, check_crc: bool) {
        trace!("opening section filter on pid 0x{:x} ({:?})", pid, handler);
        let section = SectionFilter::new(handler, check_crc);
        self.filters
            .insert(PidFilter::new(pid, FilterKind::Section(section)));
    }

    /// Opens a PMT filter on `pid` unless one is already there.
    pub fn install_pmt_filter(&mut self, pid: u16) {
        match self.filters.get(pid).map(|f| f.section().map(|s| s.handler)) {
            Some(Some(SectionHandler::Pmt)) => return,
            Some(_) => debug!("pid 0x{:x} reused for a PMT, closing its filter", pid),
            None => {}
        }
        self.open_section_filter(pid, SectionHandler::Pmt, true);
    }

    /// Relaxes or restores the checks of the PMT filter on `pid` and makes it
    /// parse the next PMT even if it repeats.
    pub fn configure_pmt_filter(&mut self, pid: u16, check_crc: bool, chop_at_ts: bool) {
        let Some(filter) = self.filters.get_mut(pid) else {
            return;
        };
        filter.pmt_chop_at_ts = chop_at_ts;
        if let Some(section) = filter.section_mut() {
            section.check_crc = check_crc;
            section.forget_version();
        }
    }

    fn skip_changes(&self) -> bool {
        self.options.skip_changes && self.header_done
    }

    fn skip_new_streams(&self) -> bool {
        self.skip_changes() || self.options.merge_pmt_versions
    }

    /// Runs one 188-byte TS packet through its PID filter.
    ///
    /// `pos` is the source position right after the packet.
    pub fn handle_packet(&mut self, packet: &[u8; TS_PACKET_SIZE], pos: u64) -> Result<ControlFlow> {
        self.stop = false;
        let result = self.dispatch_packet(packet, pos);
        self.flush_dsmcc();
        if let Err(e) = result {
            self.queue.extend(self.out.drain(..));
            return Err(e);
        }
        Ok(self.take_flow())
    }

    fn take_flow(&mut self) -> ControlFlow {
        let mut pending = self.out.drain(..);
        match pending.next() {
            Some(first) => {
                self.queue.extend(pending);
                ControlFlow::Emitted(first)
            }
            None if self.stop => ControlFlow::Stop,
            None => ControlFlow::Continue,
        }
    }

    fn dispatch_packet(&mut self, packet: &[u8; TS_PACKET_SIZE], pos: u64) -> Result<()> {
        if !self.filters.contains(PAT_PID) {
            info!("opening pat filter");
            self.open_section_filter(PAT_PID, SectionHandler::Pat, true);
        }

        let header = TsHeader::parse(packet)?;
        let pid = header.pid;
        let is_start = header.payload_unit_start;

        if self.auto_guess && is_start && !self.filters.contains(pid) {
            debug!("auto guess: new PES filter on pid 0x{:x}", pid);
            let pes = PesContext::new(pid, None, 0, None);
            self.filters
                .insert(PidFilter::new(pid, FilterKind::Pes(Box::new(pes))));
        }

        let discard = is_start.then(|| self.programs.discard_pid(pid));
        let Some(filter) = self.filters.get_mut(pid) else {
            return Ok(());
        };
        if let Some(discard) = discard {
            filter.discard = discard;
        }
        if filter.discard {
            return Ok(());
        }

        let afc = (packet[3] >> 4) & 0x03;
        if afc == 0 {
            return Ok(());
        }
        let has_adaptation = afc & 0x02 != 0;
        let has_payload = afc & 0x01 != 0;
        let discontinuity = has_adaptation && packet[4] != 0 && packet[5] & 0x80 != 0;
        let random_access = has_adaptation && packet[4] != 0 && packet[5] & 0x40 != 0;

        let cc = header.continuity_counter;
        let cc_ok = match filter.last_cc {
            None => true,
            Some(last) => {
                let expected = if has_payload { (last + 1) & 0x0f } else { last };
                pid == NULL_PID || discontinuity || expected == cc
            }
        };
        filter.last_cc = Some(cc);

        if !cc_ok {
            if self.cc_warned.insert(pid) {
                warn!("Continuity check failed for pid 0x{:x}", pid);
            } else {
                debug!("Continuity check failed for pid 0x{:x} (cc {})", pid, cc);
            }
            if let Some(pes) = filter.pes_mut() {
                pes.mark_corrupt();
            }
        }
        if header.transport_error {
            debug!("Packet had TEI flag set; marking as corrupt");
            if let Some(pes) = filter.pes_mut() {
                pes.mark_corrupt();
            }
        }

        let mut p = TS_HEADER_SIZE;
        if has_adaptation {
            if let Some(pcr) = parse_pcr(packet) {
                filter.last_pcr = Some(pcr);
            }
            p += packet[4] as usize + 1;
        }
        if p >= TS_PACKET_SIZE || !has_payload {
            return Ok(());
        }
        let is_section = filter.is_section();
        let is_pes = filter.is_pes();

        self.pos47_full = pos.saturating_sub(TS_PACKET_SIZE as u64);
        let payload = &packet[p..];
        if is_section {
            self.handle_section_payload(pid, payload, is_start, cc_ok)
        } else if is_pes {
            let packet_pos = pos.saturating_sub(self.raw_packet_size as u64);
            self.handle_pes_payload(pid, payload, is_start && random_access, is_start, packet_pos)
        } else {
            Ok(())
        }
    }

    fn handle_section_payload(&mut self, pid: u16, payload: &[u8], is_start: bool, cc_ok: bool) -> Result<()> {
        if !is_start {
            if cc_ok {
                self.write_section(pid, payload, false);
            }
            return Ok(());
        }

        let len = payload[0] as usize;
        let rest = &payload[1..];
        if len > rest.len() {
            return Ok(());
        }
        if len > 0 && cc_ok {
            // tail of the previous section
            self.write_section(pid, &rest[..len], false);
            if !self.filters.get(pid).map_or(false, |f| f.is_section()) {
                return Ok(());
            }
        }
        let rest = &rest[len..];
        if !rest.is_empty() {
            self.write_section(pid, rest, true);
        }
        Ok(())
    }

    fn write_section(&mut self, pid: u16, data: &[u8], is_start: bool) {
        let sections = {
            let Some(filter) = self.filters.get_mut(pid) else {
                return;
            };
            let chop = filter.pmt_chop_at_ts;
            let Some(section) = filter.section_mut() else {
                return;
            };
            section.write(pid, data, is_start, chop)
        };
        for section in sections {
            let Some(handler) = self.filters.get(pid).and_then(|f| f.section()).map(|s| s.handler) else {
                break;
            };
            self.dispatch_section(handler, pid, &section);
        }
    }

    fn dispatch_section(&mut self, handler: SectionHandler, pid: u16, section: &[u8]) {
        match handler {
            SectionHandler::Pat => self.handle_pat(pid, section),
            SectionHandler::Pmt => self.handle_pmt(pid, section),
            SectionHandler::Sdt => self.handle_sdt(pid, section),
            SectionHandler::Eit => self.handle_eit(section),
            SectionHandler::Scte35 => self.handle_scte35(pid, section),
            SectionHandler::M4Od => self.handle_m4od(pid, section),
            SectionHandler::Dsmcc => self.handle_dsmcc(pid, section),
        }
    }

    /// True when the section on `pid` repeats the last version and CRC.
    fn is_repeat(&mut self, pid: u16, header: &SectionHeader, section: &[u8]) -> bool {
        self.filters
            .get_mut(pid)
            .and_then(|f| f.section_mut())
            .map_or(false, |s| s.skip_identical(header, section))
    }

    fn handle_pat(&mut self, pid: u16, section: &[u8]) {
        let (header, body) = match SectionHeader::parse(section) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("PAT: {}", e);
                return;
            }
        };
        if header.tid != PAT_TID || self.skip_changes() {
            return;
        }
        if self.is_repeat(pid, &header, section) {
            return;
        }
        let pat = match parse_pat(&header, body) {
            Ok(pat) => pat,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        trace!("PAT ts_id 0x{:x} version {}", pat.ts_id, pat.version);
        self.ts_id = Some(pat.ts_id);

        if !self.programs.is_same(&pat.programs) {
            debug!("new PAT with {} program(s)", pat.programs.len());
            for program in self.programs.rebuild(&pat.programs) {
                self.retire_program(program);
            }
        }

        let wanted: Vec<PatEntry> = pat
            .programs
            .iter()
            .filter(|e| match self.req_sid {
                Some(sid) => e.program == sid,
                None => self.scan != ScanPhase::Pat,
            })
            .copied()
            .collect();
        for entry in &wanted {
            self.install_pmt_filter(entry.pmt_pid);
        }
        self.close_stale_pmt_filters(&wanted);

        match self.req_sid {
            None if self.scan != ScanPhase::Off => self.stop = true,
            Some(sid) if !wanted.iter().any(|e| e.program == sid) => {
                debug!("program {} is not in the PAT", sid);
                self.pmt_scan = PmtScan::NotInPat;
                if self.scan != ScanPhase::Off {
                    self.stop = true;
                }
            }
            _ => {}
        }
    }

    fn close_stale_pmt_filters(&mut self, wanted: &[PatEntry]) {
        let stale: Vec<u16> = self
            .filters
            .iter()
            .filter(|f| f.section().map_or(false, |s| s.handler == SectionHandler::Pmt))
            .filter(|f| !wanted.iter().any(|e| e.pmt_pid == f.pid))
            .map(|f| f.pid)
            .collect();
        for pid in stale {
            debug!("closing PMT filter on pid 0x{:x}", pid);
            self.filters.remove(pid);
        }
    }

    /// Detaches a program the PAT no longer lists from its streams.
    fn retire_program(&mut self, program: Program) {
        debug!("program {} left the PAT", program.id);
        if self.options.skip_clear {
            return;
        }
        for stream in self.streams.iter_mut() {
            stream.program_ids.retain(|&id| id != program.id);
        }
    }

    fn handle_pmt(&mut self, pid: u16, section: &[u8]) {
        self.cleanup_streams();
        let (header, body) = match SectionHeader::parse(section) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("PMT: {}", e);
                return;
            }
        };
        if header.tid != PMT_TID {
            trace!("PMT filter on pid 0x{:x} got table 0x{:02x}", pid, header.tid);
            return;
        }
        if self.req_sid.map_or(false, |sid| sid != header.id) {
            return;
        }
        if self.options.skip_unknown_pmt && self.programs.get(header.id).is_none() {
            debug!("ignoring PMT for program {} not in the PAT", header.id);
            return;
        }
        if self.skip_changes() && !self.options.scan_all_pmts {
            return;
        }
        if self.is_repeat(pid, &header, section) {
            return;
        }
        match parse_pmt(&header, body) {
            Ok(pmt) => self.apply_pmt(pid, section, pmt),
            Err(e) => warn!("PMT: {}", e),
        }
    }

    /// Drops elementary PIDs whose filter was closed behind the PMT's back.
    fn cleanup_streams(&mut self) {
        let filters = &self.filters;
        for program in self.programs.iter_mut() {
            program.es_pids.retain(|&pid| filters.contains(pid));
        }
    }

    /// Number of leading entries that match the installed ones position by
    /// position, PID and stream type alike.
    fn equal_prefix(&self, old: &[u16], entries: &[PmtEntry]) -> usize {
        old.iter()
            .zip(entries)
            .take_while(|&(&pid, e)| {
                pid == e.pid && self.filters.get(pid).and_then(filter_stream_type) == Some(e.stream_type)
            })
            .count()
    }

    fn apply_pmt(&mut self, pmt_pid: u16, section: &[u8], pmt: Pmt) {
        let program_id = pmt.program;
        debug!(
            "PMT program {} version {}: {} stream(s), pcr pid 0x{:x}",
            program_id,
            pmt.version,
            pmt.entries.len(),
            pmt.pcr_pid
        );
        let old = {
            let program = self.programs.add(program_id, pmt_pid);
            program.clear_pids();
            program.add_pid(pmt.pcr_pid);
            program.set_pcr_and_version(pmt.pcr_pid, pmt.version);
            program.es_pids.clone()
        };
        if !pmt.has_stream_loop {
            return;
        }

        let equal = self.equal_prefix(&old, &pmt.entries);
        let changed = equal < old.len() || equal < pmt.entries.len();
        let mut added = Vec::new();
        let mut removed = Vec::new();
        if changed {
            self.queue.clear();
            for &pid in old[equal..].iter().rev() {
                let reused = self.options.merge_pmt_versions
                    && pmt.entries[equal..].iter().any(|e| {
                        e.pid == pid && self.filters.get(pid).and_then(filter_stream_type) == Some(e.stream_type)
                    });
                if reused {
                    if let Some(program) = self.programs.get_mut(program_id) {
                        program.es_pids.retain(|&p| p != pid);
                    }
                    continue;
                }
                self.remove_stream(program_id, pid);
                removed.push(pid);
            }
            for entry in &pmt.entries[equal..] {
                let (key, created) = self.add_stream(program_id, pmt.pcr_pid, pmt.prog_reg, entry);
                if created {
                    added.push(key);
                }
            }
            self.cur_pmt_section = Some(Bytes::copy_from_slice(section));
        }

        if let Some(program) = self.programs.get_mut(program_id) {
            let es_pids = program.es_pids.clone();
            for pid in es_pids {
                program.add_pid(pid);
            }
            program.pmt_found = true;
        }
        self.ensure_pcr_filter(pmt.pcr_pid);

        if changed {
            let event = StreamsChangedEvent {
                program_id,
                added,
                removed,
                stream_count: self.streams.len(),
            };
            info!(
                "program {}: {} stream(s) added, {} removed",
                program_id,
                event.added.len(),
                event.removed.len()
            );
            if let Some(listener) = self.listener.as_mut() {
                listener.streams_changed(&event);
            }
        }

        if self.scan != ScanPhase::Off {
            if self.req_sid == Some(program_id) {
                self.pmt_scan = PmtScan::Found;
            }
            self.stop = true;
        }
    }

    fn ensure_pcr_filter(&mut self, pcr_pid: u16) {
        if pcr_pid == NULL_PID || self.filters.contains(pcr_pid) {
            return;
        }
        trace!("opening PCR filter on pid 0x{:x}", pcr_pid);
        self.filters.insert(PidFilter::new(pcr_pid, FilterKind::Pcr));
    }

    fn remove_stream(&mut self, program_id: u16, pid: u16) {
        debug!("removing stream on pid 0x{:x}", pid);
        self.filters.remove(pid);
        let keys = self.streams.remove_pid(pid);
        for program in self.programs.iter_mut() {
            program.streams.retain(|k| !keys.contains(k));
        }
        if let Some(program) = self.programs.get_mut(program_id) {
            program.es_pids.retain(|&p| p != pid);
        }
        if self.dsmcc.as_ref().map_or(false, |b| keys.contains(&b.stream)) {
            self.dsmcc = None;
        }
    }

    /// Creates or reuses the stream and filter for one PMT entry.
    ///
    /// Returns the stream and whether it is new.
    fn add_stream(&mut self, program_id: u16, pcr_pid: u16, prog_reg: u32, entry: &PmtEntry) -> (StreamKey, bool) {
        debug!(
            "adding stream on pid 0x{:x} with type 0x{:02x} ({})",
            entry.pid,
            entry.stream_type,
            entry.codec.name()
        );
        let (key, sub, created) = if entry.stream_type == STREAM_TYPE_DSMCC_B {
            let (key, created) = self.add_section_stream(entry, SectionHandler::Dsmcc);
            (key, None, created)
        } else if entry.codec == CodecId::Scte35 {
            let (key, created) = self.add_section_stream(entry, SectionHandler::Scte35);
            (key, None, created)
        } else {
            self.add_pes_stream(pcr_pid, prog_reg, entry)
        };

        if let Some(program) = self.programs.get_mut(program_id) {
            program.es_pids.push(entry.pid);
            program.add_pid(entry.pid);
            for k in std::iter::once(key).chain(sub) {
                if !program.streams.contains(&k) {
                    program.streams.push(k);
                }
            }
        }
        for k in std::iter::once(key).chain(sub) {
            if let Some(stream) = self.streams.get_mut(k) {
                if !stream.program_ids.contains(&program_id) {
                    stream.program_ids.push(program_id);
                }
            }
        }
        (key, created)
    }

    fn add_section_stream(&mut self, entry: &PmtEntry, handler: SectionHandler) -> (StreamKey, bool) {
        let pid = entry.pid;
        let reuse = self
            .filters
            .get(pid)
            .and_then(|f| f.section())
            .map_or(false, |s| s.handler == handler && s.stream_type == entry.stream_type);
        if !reuse {
            let section = SectionFilter::new(handler, true).with_stream_type(entry.stream_type);
            if self
                .filters
                .insert(PidFilter::new(pid, FilterKind::Section(section)))
                .is_some()
            {
                debug!("closed previous filter on pid 0x{:x}", pid);
            }
        }
        let (key, created) = match self.streams.find_by_pid(pid) {
            Some(key) => (key, false),
            None => (self.streams.add(pid), true),
        };
        if let Some(stream) = self.streams.get_mut(key) {
            stream.stream_type = entry.stream_type;
            stream.codec.codec_type = entry.kind;
            stream.codec.codec_id = entry.codec;
            stream.codec.codec_tag = entry.stream_type as u32;
            stream.component_tag = entry.dvb.component_tag;
            if handler == SectionHandler::Dsmcc {
                stream.data_id = Some(entry.dvb.data_id);
                stream.carousel_id = Some(entry.dvb.carousel_id);
            }
        }
        (key, created)
    }

    fn add_pes_stream(
        &mut self,
        pcr_pid: u16,
        prog_reg: u32,
        entry: &PmtEntry,
    ) -> (StreamKey, Option<StreamKey>, bool) {
        let pid = entry.pid;
        let existing = self.filters.get(pid).and_then(|f| f.pes()).map(|pes| pes.stream);
        let (key, created) = match existing {
            Some(Some(key)) if self.streams.get(key).is_some() => (key, false),
            Some(_) => {
                // a guessed PES filter that never saw a start code
                let key = self.streams.add(pid);
                if let Some(pes) = self.filters.get_mut(pid).and_then(|f| f.pes_mut()) {
                    pes.stream = Some(key);
                    pes.stream_type = 0;
                }
                (key, true)
            }
            None => {
                if self.filters.remove(pid).is_some() {
                    debug!("closed non-PES filter on pid 0x{:x}", pid);
                }
                let key = self.streams.add(pid);
                let pes = PesContext::new(pid, Some(pcr_pid), 0, Some(key));
                self.filters
                    .insert(PidFilter::new(pid, FilterKind::Pes(Box::new(pes))));
                (key, true)
            }
        };

        let mut sub = None;
        if let Some(filter) = self.filters.get_mut(pid) {
            filter.es_id = entry.es_id;
            if let Some(pes) = filter.pes_mut() {
                pes.pcr_pid = Some(pcr_pid);
                if pes.stream_type == 0 {
                    let wants_sub = self
                        .streams
                        .get_mut(key)
                        .map_or(false, |s| set_stream_info(s, entry.stream_type, prog_reg));
                    pes.stream_type = entry.stream_type;
                    if wants_sub && pes.sub_stream.is_none() {
                        let sub_key = self.streams.add(pid);
                        if let Some(s) = self.streams.get_mut(sub_key) {
                            s.codec.codec_type = MediaKind::Audio;
                            s.codec.codec_id = CodecId::Ac3;
                            s.stream_type = entry.stream_type;
                            s.is_sub_stream = true;
                        }
                        pes.sub_stream = Some(sub_key);
                    }
                }
                sub = pes.sub_stream;
            }
        }

        let mut codec_tag = None;
        if let Some(stream) = self.streams.get_mut(key) {
            if entry.dvb.codec_tag != 0 {
                stream.codec.codec_tag = entry.dvb.codec_tag;
            }
            stream.codec.codec_type = entry.kind;
            stream.codec.codec_id = entry.codec;
            if entry.codec == CodecId::BinData {
                stream.codec.request_probe = true;
            }
            stream.stream_type = entry.stream_type;
            if entry.dvb.language.is_some() {
                stream.language = entry.dvb.language.clone();
            }
            if entry.dvb.sub_id != 0 {
                stream.sub_id = Some(entry.dvb.sub_id);
                if entry.codec == CodecId::DvbSubtitle {
                    stream.carousel_id = Some(entry.dvb.sub_id);
                }
            }
            if entry.dvb.txt_type != 0 {
                stream.txt_type = Some(entry.dvb.txt_type);
            }
            stream.vbi_data = entry.dvb.vbi_data;
            stream.component_tag = entry.dvb.component_tag;
            stream.disposition = entry.dvb.disposition;
            if let Some(extradata) = entry.dec_config.as_ref().and_then(|c| c.extradata.clone()) {
                stream.codec.extradata = Some(extradata);
            }
            codec_tag = Some(stream.codec.codec_tag);
        }
        if (prog_reg == REG_HDMV || prog_reg == REG_HDPR) && entry.stream_type == STREAM_TYPE_AUDIO_TRUEHD {
            if let (Some(sub), Some(tag)) = (sub, codec_tag) {
                if let Some(s) = self.streams.get_mut(sub) {
                    s.codec.codec_tag = tag;
                }
            }
        }

        if entry.m4od {
            debug!("pid 0x{:x} carries MPEG-4 object descriptors", pid);
            let section = SectionFilter::new(SectionHandler::M4Od, true).with_stream_type(entry.stream_type);
            let mut filter = PidFilter::new(pid, FilterKind::Section(section));
            filter.es_id = entry.es_id;
            self.filters.insert(filter);
        }
        (key, sub, created)
    }

    fn handle_sdt(&mut self, pid: u16, section: &[u8]) {
        let Ok((header, body)) = SectionHeader::parse(section) else {
            return;
        };
        if header.tid != SDT_TID || self.skip_changes() {
            return;
        }
        if self.is_repeat(pid, &header, section) {
            return;
        }
        match parse_sdt(&header, body) {
            Ok(sdt) => {
                for service in sdt.services {
                    trace!("service 0x{:x}: {} / {}", service.sid, service.provider, service.name);
                    self.programs.set_service(service);
                }
            }
            Err(e) => debug!("SDT: {}", e),
        }
    }

    fn epg_stream(&mut self) -> StreamKey {
        if let Some(key) = self.epg_stream.filter(|&k| self.streams.get(k).is_some()) {
            return key;
        }
        let key = self.streams.add(EIT_STREAM_ID);
        if let Some(stream) = self.streams.get_mut(key) {
            stream.codec.codec_type = MediaKind::Data;
            stream.codec.codec_id = CodecId::Epg;
        }
        self.epg_stream = Some(key);
        key
    }

    fn handle_eit(&mut self, section: &[u8]) {
        let key = self.epg_stream();
        if self.streams.get(key).map_or(true, |s| s.discard == Discard::All) {
            return;
        }
        let Ok((header, _)) = SectionHeader::parse(section) else {
            return;
        };
        match parse_eit(&header) {
            Ok(Some(_)) => {
                trace!("EIT: tid received = {:02x}", header.tid);
                self.emit_section(key, section.to_vec(), None);
            }
            Ok(None) => trace!("Scrambled EIT table received."),
            Err(e) => trace!("EIT: {}", e),
        }
    }

    fn handle_scte35(&mut self, pid: u16, section: &[u8]) {
        let Some(key) = self.streams.find_by_pid(pid) else {
            return;
        };
        let info = match parse_scte35(section) {
            Ok(info) => info,
            Err(e) => {
                warn!("SCTE-35 on pid 0x{:x}: {}", pid, e);
                return;
            }
        };
        trace!("SCTE-35 command 0x{:02x} on pid 0x{:x}", info.command_type, pid);
        let ts = self
            .programs
            .program_of_stream(key)
            .filter(|p| p.discard != Discard::All)
            .and_then(|p| p.pcr_pid)
            .and_then(|pcr_pid| self.filters.get(pcr_pid))
            .and_then(|f| f.last_pcr)
            .map(|pcr| pcr / 300);
        self.emit_section(key, section.to_vec(), ts);
    }

    fn handle_m4od(&mut self, pid: u16, section: &[u8]) {
        let Ok((header, body)) = SectionHeader::parse(section) else {
            return;
        };
        if header.tid != M4OD_TID || self.is_repeat(pid, &header, section) {
            return;
        }
        for descr in read_od(body) {
            let targets: Vec<u16> = self
                .filters
                .iter()
                .filter(|f| f.es_id == Some(descr.es_id))
                .map(|f| f.pid)
                .collect();
            for target in targets {
                let Some(filter) = self.filters.get_mut(target) else {
                    continue;
                };
                let Some(pes) = filter.pes_mut() else {
                    error!("pid {:x} is not PES", target);
                    continue;
                };
                pes.sl = descr.sl;
                let Some(key) = pes.stream else {
                    continue;
                };
                if descr.dec_config.is_empty() {
                    continue;
                }
                let config = match read_dec_config(&descr.dec_config) {
                    Ok(config) => config,
                    Err(e) => {
                        debug!("decoder config for es_id {}: {}", descr.es_id, e);
                        continue;
                    }
                };
                if let Some(stream) = self.streams.get_mut(key) {
                    stream.codec.codec_id = config.codec;
                    stream.codec.codec_type = config.codec.media_kind();
                    if let Some(extradata) = config.extradata {
                        stream.set_extradata(extradata);
                    }
                }
            }
        }
    }

    fn handle_dsmcc(&mut self, pid: u16, section: &[u8]) {
        if SectionHeader::parse(section).is_err() {
            debug!("Unable to parse header");
            return;
        }
        if !self.emit_enabled {
            return;
        }
        let Some(key) = self.streams.find_by_pid(pid) else {
            return;
        };
        match self.dsmcc.as_mut() {
            Some(batch) if batch.stream == key => batch.append(section),
            Some(_) => {}
            None => self.dsmcc = Some(DsmccBatch::new(key, section)),
        }
    }

    fn flush_dsmcc(&mut self) {
        if let Some(batch) = self.dsmcc.take() {
            self.emit_section(batch.stream, batch.data, None);
        }
    }

    fn emit_section(&mut self, key: StreamKey, data: Vec<u8>, ts: Option<i64>) {
        if !self.emit_enabled {
            return;
        }
        let Some(stream) = self.streams.get(key) else {
            return;
        };
        let packet = Packet::new(data)
            .with_stream_index(stream.index)
            .with_pts(ts)
            .with_dts(ts)
            .with_pos(self.pos47_full);
        self.out.push(packet);
        self.stop = true;
    }

    /// The program clock a teletext or subtitle PID is pinned to.
    fn pcr_clock_for(&self, pid: u16) -> Option<PcrClock> {
        if !self.options.fix_teletext_pts {
            return None;
        }
        let key = self.filters.get(pid)?.pes()?.stream?;
        let stream = self.streams.get(key)?;
        if !matches!(stream.codec.codec_id, CodecId::DvbTeletext | CodecId::DvbSubtitle) {
            return None;
        }
        let program = self
            .programs
            .iter()
            .find(|p| stream.program_ids.contains(&p.id) || p.pids.contains(&pid))?;
        if program.discard == Discard::All {
            return None;
        }
        let pcr_filter = self.filters.get(program.pcr_pid?)?;
        if pcr_filter.discard {
            return None;
        }
        let pcr = pcr_filter.last_pcr?;
        // a PCR-only PID borrows the wrap reference of the program's video
        let clock_stream = match &pcr_filter.kind {
            FilterKind::Pes(pes) => pes.stream,
            FilterKind::Pcr => program.streams.iter().copied().find(|&k| {
                self.streams
                    .get(k)
                    .map_or(false, |s| s.codec.codec_type == MediaKind::Video)
            }),
            FilterKind::Section(_) => None,
        };
        let wrap = clock_stream.and_then(|k| self.streams.get(k)).and_then(|s| s.wrap);
        Some(PcrClock { pcr: pcr / 300, wrap })
    }

    fn handle_pes_payload(
        &mut self,
        pid: u16,
        payload: &[u8],
        random_access: bool,
        is_start: bool,
        pos: u64,
    ) -> Result<()> {
        let pcr_clock = self.pcr_clock_for(pid);
        let skip_new_streams = self.skip_new_streams();
        let Some(mut filter) = self.filters.take(pid) else {
            return Ok(());
        };
        let mut produced = Vec::new();
        let result = match filter.pes_mut() {
            Some(pes) => {
                let mut env = PesEnv {
                    streams: &mut self.streams,
                    pool: &self.pool,
                    fix_teletext_pts: self.options.fix_teletext_pts,
                    skip_new_streams,
                    pcr_clock,
                    random_access,
                };
                pes.push(payload, is_start, pos, &mut env, &mut produced)
            }
            None => Ok(()),
        };
        self.filters.restore(filter);
        for packet in produced {
            self.emit_pes(packet);
        }
        result
    }

    /// Turns an assembled PES payload into a caller-visible packet.
    fn emit_pes(&mut self, pes: PesPacket) {
        if !self.emit_enabled {
            return;
        }
        if self.options.correct_ts_overflow {
            if let Some(first) = pes.dts.or(pes.pts) {
                timing::update_wrap_reference(&mut self.streams, &mut self.programs, pes.stream, first);
            }
        }
        let correct = self.options.correct_ts_overflow;
        let Some(stream) = self.streams.get_mut(pes.stream) else {
            debug!("dropping payload for a removed stream");
            return;
        };
        let (pts, dts) = if correct {
            (
                pes.pts.map(|ts| timing::wrap_timestamp(stream, ts)),
                pes.dts.map(|ts| timing::wrap_timestamp(stream, ts)),
            )
        } else {
            (pes.pts, pes.dts)
        };
        if stream.first_dts.is_none() {
            stream.first_dts = dts;
        }
        if stream.start_time.is_none() {
            stream.start_time = pts.or(dts);
        }

        let mut packet = Packet::new(pes.data)
            .with_pts(pts)
            .with_dts(dts)
            .with_pos(pes.pos)
            .with_stream_index(stream.index)
            .with_corrupt_flag(pes.corrupt)
            .with_side_data(SideData::MpegTsStreamId(pes.stream_id));
        packet.flags.key = pes.key;
        if stream.extradata_changed {
            if let Some(extradata) = stream.codec.extradata.clone() {
                packet = packet.with_side_data(SideData::NewExtradata(extradata));
            }
            stream.extradata_changed = false;
        }
        self.out.push(packet);
    }

    /// Forgets per-PID progress after the source position jumped.
    pub fn reset_after_seek(&mut self) {
        trace!("source position moved, resetting filters");
        for filter in self.filters.iter_mut() {
            filter.last_cc = None;
            filter.last_pcr = None;
            match &mut filter.kind {
                FilterKind::Pes(pes) => pes.reset_after_seek(),
                FilterKind::Section(section) => section.forget_version(),
                FilterKind::Pcr => {}
            }
        }
        self.dsmcc = None;
    }

    /// Hands out the next partially assembled payload at end of input.
    pub fn flush_pending(&mut self) -> Option<Packet> {
        let pids: Vec<u16> = self
            .filters
            .iter()
            .filter(|f| f.pes().map_or(false, |p| p.has_data()))
            .map(|f| f.pid)
            .collect();
        for pid in pids {
            let flushed = self
                .filters
                .get_mut(pid)
                .and_then(|f| f.pes_mut())
                .and_then(|pes| pes.flush());
            if let Some(pes) = flushed {
                self.emit_pes(pes);
                if let ControlFlow::Emitted(packet) = self.take_flow() {
                    return Some(packet);
                }
            }
        }
        None
    }

    /// Releases every filter, table and pooled buffer.
    pub fn close(&mut self) {
        self.filters.clear();
        self.programs.clear();
        self.streams.clear();
        self.queue.clear();
        self.out.clear();
        self.dsmcc = None;
        self.cur_pmt_section = None;
        self.epg_stream = None;
        self.pool.drain();
    }
}

fn filter_stream_type(filter: &PidFilter) -> Option<u8> {
    match &filter.kind {
        FilterKind::Pes(pes) => Some(pes.stream_type),
        FilterKind::Section(section) => Some(section.stream_type),
        FilterKind::Pcr => None,
    }
}
