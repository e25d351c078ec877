//! Synthetic transport stream builder shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use parking_lot::Mutex;
use tsdemux::av::Packet;
use tsdemux::format::ts::{AsyncSource, StreamsChangedEvent, TsDemuxer};
use tsdemux::utils::Crc32Mpeg2;
use tsdemux::{DemuxOptions, Result, TsError};

pub const PMT_PID: u16 = 0x100;
pub const VIDEO_PID: u16 = 0x101;
pub const AUDIO_PID: u16 = 0x102;

pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_AC3: u8 = 0x81;
pub const STREAM_TYPE_PRIVATE: u8 = 0x06;

pub type MemDemuxer = TsDemuxer<AsyncSource<Cursor<Vec<u8>>>>;

/// Bytes around every 188-byte packet on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Plain,
    /// Four byte timecode in front
    Dvhs,
    /// Sixteen bytes of parity behind
    Fec,
}

/// Writes TS packets with correct continuity counters.
pub struct TsWriter {
    data: Vec<u8>,
    cc: HashMap<u16, u8>,
    framing: Framing,
    packets: usize,
}

impl TsWriter {
    pub fn new() -> Self {
        Self::with_framing(Framing::Plain)
    }

    pub fn with_framing(framing: Framing) -> Self {
        Self {
            data: Vec::new(),
            cc: HashMap::new(),
            framing,
            packets: 0,
        }
    }

    pub fn raw_packet_size(&self) -> usize {
        match self.framing {
            Framing::Plain => 188,
            Framing::Dvhs => 192,
            Framing::Fec => 204,
        }
    }

    /// Number of packets written so far.
    pub fn packets(&self) -> usize {
        self.packets
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.cc.entry(pid).or_insert(0);
        let current = *cc;
        *cc = (*cc + 1) & 0x0f;
        current
    }

    /// Counter of the last payload packet, repeated by adaptation-only packets.
    fn last_cc(&self, pid: u16) -> u8 {
        self.cc.get(&pid).map_or(0x0f, |cc| cc.wrapping_sub(1) & 0x0f)
    }

    fn push(&mut self, packet: [u8; 188]) {
        if self.framing == Framing::Dvhs {
            self.data.extend_from_slice(&[0, 0, 0, 0]);
        }
        self.data.extend_from_slice(&packet);
        if self.framing == Framing::Fec {
            self.data.extend_from_slice(&[0; 16]);
        }
        self.packets += 1;
    }

    /// One packet. `adaptation` holds the adaptation field after its length
    /// byte; stuffing is added so `payload` ends the packet.
    pub fn packet(&mut self, pid: u16, start: bool, adaptation: Option<&[u8]>, payload: &[u8]) {
        assert!(payload.len() <= 184);
        let cc = if payload.is_empty() {
            self.last_cc(pid)
        } else {
            self.next_cc(pid)
        };
        let mut p = [0xffu8; 188];
        p[0] = 0x47;
        p[1] = if start { 0x40 } else { 0 } | ((pid >> 8) as u8 & 0x1f);
        p[2] = pid as u8;

        let room = 184 - payload.len();
        let needs_af = adaptation.is_some() || room > 0;
        let afc = match (needs_af, payload.is_empty()) {
            (true, true) => 0x20,
            (true, false) => 0x30,
            (false, _) => 0x10,
        };
        p[3] = afc | cc;
        if needs_af {
            let af = adaptation.unwrap_or(&[]);
            assert!(af.len() < room, "adaptation field does not fit");
            p[4] = (room - 1) as u8;
            if room > 1 {
                if af.is_empty() {
                    p[5] = 0;
                } else {
                    p[5..5 + af.len()].copy_from_slice(af);
                }
            }
        }
        p[4 + room..].copy_from_slice(payload);
        self.push(p);
    }

    /// A section behind a pointer field, padded with 0xff.
    pub fn section(&mut self, pid: u16, section: &[u8]) {
        let mut unit = vec![0u8];
        unit.extend_from_slice(section);
        for (i, chunk) in unit.chunks(184).enumerate() {
            let mut payload = chunk.to_vec();
            payload.resize(184, 0xff);
            self.packet(pid, i == 0, None, &payload);
        }
    }

    /// A PES packet split over as many TS packets as it needs. The first one
    /// carries the PCR and random access flag when asked for.
    pub fn pes(&mut self, pid: u16, pes: &[u8], pcr: Option<i64>, random_access: bool) {
        let mut af = Vec::new();
        if pcr.is_some() || random_access {
            let mut flags = 0u8;
            if random_access {
                flags |= 0x40;
            }
            if pcr.is_some() {
                flags |= 0x10;
            }
            af.push(flags);
            if let Some(base) = pcr {
                af.extend_from_slice(&pcr_bytes(base));
            }
        }
        let first_room = if af.is_empty() { 184 } else { 184 - 1 - af.len() };
        let first = pes.len().min(first_room);
        let adaptation = (!af.is_empty()).then_some(af.as_slice());
        self.packet(pid, true, adaptation, &pes[..first]);
        for chunk in pes[first..].chunks(184) {
            self.packet(pid, false, None, chunk);
        }
    }

    /// An adaptation-only packet carrying a PCR.
    pub fn pcr(&mut self, pid: u16, base: i64) {
        let mut af = vec![0x10];
        af.extend_from_slice(&pcr_bytes(base));
        self.packet(pid, false, Some(&af), &[]);
    }

    /// Overwrites the sync byte of the packet with the given index.
    pub fn corrupt_sync(&mut self, index: usize) {
        let offset = index * self.raw_packet_size()
            + if self.framing == Framing::Dvhs { 4 } else { 0 };
        self.data[offset] = 0x00;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

fn pcr_bytes(base: i64) -> [u8; 6] {
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        ((base & 1) << 7) as u8 | 0x7e,
        0,
    ]
}

/// A long-form PSI section with a valid CRC.
pub fn psi_section(tid: u8, id: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut s = vec![tid, 0xb0 | ((len >> 8) as u8 & 0x0f), len as u8];
    s.extend_from_slice(&id.to_be_bytes());
    s.push(0xc1 | ((version & 0x1f) << 1));
    s.extend_from_slice(&[0, 0]);
    s.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&s);
    s.extend_from_slice(&crc.to_be_bytes());
    s
}

pub fn pat(ts_id: u16, version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(program, pmt_pid) in programs {
        body.extend_from_slice(&program.to_be_bytes());
        body.extend_from_slice(&(0xe000 | pmt_pid).to_be_bytes());
    }
    psi_section(0x00, ts_id, version, &body)
}

/// One elementary stream entry of a PMT.
pub fn es_entry(stream_type: u8, pid: u16, descriptors: &[u8]) -> Vec<u8> {
    let mut out = vec![stream_type];
    out.extend_from_slice(&(0xe000 | pid).to_be_bytes());
    out.extend_from_slice(&(0xf000 | descriptors.len() as u16).to_be_bytes());
    out.extend_from_slice(descriptors);
    out
}

pub fn pmt(program: u16, version: u8, pcr_pid: u16, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(0xe000 | pcr_pid).to_be_bytes());
    body.extend_from_slice(&[0xf0, 0x00]);
    for entry in entries {
        body.extend_from_slice(entry);
    }
    psi_section(0x02, program, version, &body)
}

fn encode_ts(marker: u8, ts: i64) -> [u8; 5] {
    [
        (marker << 4) | (((ts >> 29) as u8) & 0x0e) | 1,
        (ts >> 22) as u8,
        (((ts >> 14) as u8) & 0xfe) | 1,
        (ts >> 7) as u8,
        (((ts << 1) as u8) & 0xfe) | 1,
    ]
}

/// A PES packet with a declared length and a PTS (and DTS when given).
pub fn pes_packet(stream_id: u8, pts: i64, dts: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let mut optional = Vec::new();
    let flags = match dts {
        Some(dts) => {
            optional.extend_from_slice(&encode_ts(0x3, pts));
            optional.extend_from_slice(&encode_ts(0x1, dts));
            0xc0
        }
        None => {
            optional.extend_from_slice(&encode_ts(0x2, pts));
            0x80
        }
    };
    let mut out = vec![0, 0, 1, stream_id, 0, 0, 0x80, flags, optional.len() as u8];
    out.extend_from_slice(&optional);
    out.extend_from_slice(payload);
    let len = (out.len() - 6) as u16;
    out[4..6].copy_from_slice(&len.to_be_bytes());
    out
}

/// Payload bytes that never look like a sync byte.
pub fn payload(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| 0x80 | ((seed + i) as u8 & 0x3f)).collect()
}

pub async fn open(data: Vec<u8>, options: DemuxOptions) -> Result<MemDemuxer> {
    TsDemuxer::open(AsyncSource::new(Cursor::new(data)), options).await
}

/// Reads packets until end of input.
pub async fn read_all(demuxer: &mut MemDemuxer) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    loop {
        match demuxer.read_packet().await {
            Ok(packet) => packets.push(packet),
            Err(TsError::Eof) => return Ok(packets),
            Err(e) => return Err(e),
        }
    }
}

/// Installs a listener collecting every stream list change.
pub fn record_changes(demuxer: &mut MemDemuxer) -> Arc<Mutex<Vec<StreamsChangedEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    demuxer.set_streams_changed_callback(move |event: &StreamsChangedEvent| {
        sink.lock().push(event.clone());
    });
    events
}

/// Opens `data` with a listener already installed, so the header's PMT is
/// recorded too.
pub async fn open_recording(
    data: Vec<u8>,
    options: DemuxOptions,
) -> Result<(MemDemuxer, Arc<Mutex<Vec<StreamsChangedEvent>>>)> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let demuxer = TsDemuxer::open_with_listener(
        AsyncSource::new(Cursor::new(data)),
        options,
        move |event: &StreamsChangedEvent| sink.lock().push(event.clone()),
    )
    .await?;
    Ok((demuxer, events))
}

/// PAT and PMT of one program with H.264 on 0x101 and AC-3 on 0x102.
pub fn write_tables(w: &mut TsWriter, pmt_pid: u16, pat_version: u8) {
    w.section(0, &pat(1, pat_version, &[(1, pmt_pid)]));
    w.section(
        pmt_pid,
        &pmt(
            1,
            0,
            VIDEO_PID,
            &[
                es_entry(STREAM_TYPE_H264, VIDEO_PID, &[]),
                es_entry(STREAM_TYPE_AC3, AUDIO_PID, &[]),
            ],
        ),
    );
}

/// One 40 ms video frame spread over three TS packets and one audio frame.
pub fn write_frame(w: &mut TsWriter, index: usize) {
    let pts = 90_000 + index as i64 * 3_600;
    let video = pes_packet(0xe0, pts, None, &payload(index, 500));
    w.pes(VIDEO_PID, &video, Some(pts - 900), index % 25 == 0);
    let audio = pes_packet(0xbd, pts, None, &payload(index + 7, 150));
    w.pes(AUDIO_PID, &audio, None, false);
}
