use super::source::ByteSource;
use super::types::*;
use crate::error::{Result, TsError};
use log::{debug, trace, warn};

/// Extra score a candidate needs when the probe buffer could not be filled
const PROBE_PACKET_MARGIN: i32 = 5;

const RESYNC_CHUNK: usize = 4096;

/// Scores how well `buf` lines up on a grid of `packet_size` sync bytes.
///
/// The best column counts for the candidate, sync bytes in other columns
/// count against it.
pub fn analyze(buf: &[u8], packet_size: usize) -> i32 {
    let mut stat = vec![0i32; packet_size];
    let mut stat_all = 0i32;
    let mut best_score = 0i32;

    for i in 0..buf.len().saturating_sub(3) {
        if buf[i] == SYNC_BYTE {
            let x = i % packet_size;
            stat[x] += 1;
            stat_all += 1;
            best_score = best_score.max(stat[x]);
        }
    }

    best_score - (stat_all - 10 * best_score).max(0) / 10
}

fn median(a: i32, b: i32, c: i32) -> i32 {
    a.max(b).min(a.min(b).max(c))
}

/// Detects 188, 192 or 204 byte framing from the bytes at the current position.
///
/// Consumes up to 8 KiB; the caller restores the position.
pub async fn probe_packet_size<S: ByteSource + ?Sized>(source: &mut S) -> Result<usize> {
    let mut buf = vec![0u8; PROBE_PACKET_BUFFER_SIZE];
    let mut buf_size = 0;

    for _ in 0..PROBE_PACKET_MAX_READS {
        if buf_size >= PROBE_PACKET_BUFFER_SIZE {
            break;
        }
        let n = source.read(&mut buf[buf_size..]).await?;
        buf_size += n;

        let data = &buf[..buf_size];
        let score = analyze(data, TS_PACKET_SIZE);
        let dvhs_score = analyze(data, TS_DVHS_PACKET_SIZE);
        let fec_score = analyze(data, TS_FEC_PACKET_SIZE);
        trace!(
            "Probe: {}, score: {}, dvhs_score: {}, fec_score: {}",
            buf_size,
            score,
            dvhs_score,
            fec_score
        );

        let mut margin = median(score, fec_score, dvhs_score);
        if buf_size < PROBE_PACKET_BUFFER_SIZE {
            margin += PROBE_PACKET_MARGIN;
        }

        if score > margin {
            return Ok(TS_PACKET_SIZE);
        } else if dvhs_score > margin {
            return Ok(TS_DVHS_PACKET_SIZE);
        } else if fec_score > margin {
            return Ok(TS_FEC_PACKET_SIZE);
        }

        if n == 0 {
            break;
        }
    }

    Err(TsError::InvalidData("could not detect TS packet size".into()))
}

/// Presents framed 188-byte TS packets, hiding FEC and DVHS framing.
pub struct PacketFramer {
    raw_packet_size: usize,
    resync_size: usize,
    packet: [u8; TS_PACKET_SIZE],
}

impl PacketFramer {
    pub fn new(raw_packet_size: usize, resync_size: usize) -> Self {
        Self {
            raw_packet_size,
            resync_size,
            packet: [0u8; TS_PACKET_SIZE],
        }
    }

    /// Packet size on the wire: 188, 192 or 204.
    pub fn raw_packet_size(&self) -> usize {
        self.raw_packet_size
    }

    pub fn set_raw_packet_size(&mut self, size: usize) {
        self.raw_packet_size = size;
    }

    /// Reads the next packet, resynchronizing on a bad sync byte.
    ///
    /// Returns `Eof` when fewer than 188 bytes remain and `InvalidData` when no
    /// sync byte is found within the resync window.
    pub async fn next_packet<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<&[u8; TS_PACKET_SIZE]> {
        loop {
            let len = source.read_full(&mut self.packet).await?;
            if len != TS_PACKET_SIZE {
                return Err(TsError::Eof);
            }
            if self.packet[0] == SYNC_BYTE {
                return Ok(&self.packet);
            }
            let seekback = self.raw_packet_size as u64;
            self.resync(source, seekback).await?;
        }
    }

    /// Skips the FEC trailer or the next DVHS prefix.
    pub async fn finish_packet<S: ByteSource + ?Sized>(&self, source: &mut S) -> Result<()> {
        let skip = self.raw_packet_size.saturating_sub(TS_PACKET_SIZE);
        if skip > 0 {
            source.skip(skip as u64).await?;
        }
        Ok(())
    }

    async fn resync<S: ByteSource + ?Sized>(&mut self, source: &mut S, seekback: u64) -> Result<()> {
        let pos = source.tell();
        let back = seekback.min(pos);

        // captures with a 12-byte RTP header in front of every packet
        if self.packet[0] == 0x80 && self.packet[12] == SYNC_BYTE && pos >= TS_PACKET_SIZE as u64 {
            source.seek(pos - TS_PACKET_SIZE as u64 + 12).await?;
            return Ok(());
        }

        let start = pos - back;
        source.seek(start).await?;

        let mut chunk = vec![0u8; RESYNC_CHUNK];
        let mut scanned = 0;
        while scanned < self.resync_size {
            let want = RESYNC_CHUNK.min(self.resync_size - scanned);
            let n = source.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(TsError::Eof);
            }
            if let Some(offset) = chunk[..n].iter().position(|&b| b == SYNC_BYTE) {
                let sync_pos = start + (scanned + offset) as u64;
                source.seek(sync_pos).await?;
                if let Ok(size) = probe_packet_size(source).await {
                    if size != self.raw_packet_size {
                        warn!("changing packet size to {}", size);
                        self.raw_packet_size = size;
                    }
                }
                source.seek(sync_pos).await?;
                debug!("resynced at byte {}", sync_pos);
                return Ok(());
            }
            scanned += n;
        }

        warn!("max resync size reached, could not find sync byte");
        Err(TsError::InvalidData(
            "max resync size reached, could not find sync byte".into(),
        ))
    }
}
