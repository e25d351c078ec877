//! Timestamp wrap tracking and duration estimation helpers.

use super::program::ProgramTable;
use super::registry::StreamRegistry;
use super::types::{PCR_HZ, TS_PACKET_SIZE};
use crate::av::timestamp::{rescale, TIME_BASE_MICROS};
use crate::av::{MediaStream, StreamKey, WrapReference};
use log::debug;

/// Where the overall duration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationMethod {
    /// Last timestamps near the end of the file
    FromPts,
    /// Durations the streams already carried
    FromStream,
    /// File size over the mux bitrate
    FromBitrate,
}

/// Start time and duration of the whole input, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub start_time_us: Option<i64>,
    pub duration_us: Option<i64>,
    pub method: DurationMethod,
}

/// Gives `key` a wrap reference derived from its first timestamp.
///
/// The owning program's reference wins when it has one; otherwise the new
/// reference becomes the program's and spreads to its other streams.
pub(crate) fn update_wrap_reference(
    streams: &mut StreamRegistry,
    programs: &mut ProgramTable,
    key: StreamKey,
    first: i64,
) {
    let Some(stream) = streams.get(key) else {
        return;
    };
    if stream.wrap.is_some() {
        return;
    }
    let program = programs.iter_mut().find(|p| p.streams.contains(&key));
    let reference = match program.as_ref().and_then(|p| p.wrap) {
        Some(reference) => reference,
        None => match WrapReference::from_first(first, stream.pts_wrap_bits, stream.time_base) {
            Some(reference) => reference,
            None => return,
        },
    };

    if let Some(program) = program {
        if program.wrap.is_none() {
            debug!(
                "program {}: wrap reference {} ({:?})",
                program.id, reference.reference, reference.behavior
            );
            program.wrap = Some(reference);
            for &other in &program.streams {
                if let Some(s) = streams.get_mut(other) {
                    if s.wrap.is_none() {
                        s.wrap = Some(reference);
                    }
                }
            }
        }
    }
    if let Some(stream) = streams.get_mut(key) {
        stream.wrap = Some(reference);
    }
}

/// Undoes a timestamp wrap using the stream's reference.
pub(crate) fn wrap_timestamp(stream: &MediaStream, ts: i64) -> i64 {
    match stream.wrap {
        Some(reference) => reference.wrap(ts, stream.pts_wrap_bits),
        None => ts,
    }
}

/// Feeds the end time of a packet read near the end of the file into the
/// stream's duration. Returns whether the packet gave a usable span.
pub(crate) fn observe_end(stream: &mut MediaStream, pts: i64, duration: Option<i64>) -> bool {
    let Some(start) = stream.start_time.or(stream.first_dts) else {
        return false;
    };
    let mut span = pts + duration.unwrap_or(0) - start;
    if span < 0 && stream.pts_wrap_bits < 63 {
        span += 1i64 << stream.pts_wrap_bits;
    }
    if span <= 0 {
        return false;
    }
    if stream.duration.map_or(true, |d| span > d) {
        stream.duration = Some(span);
    }
    true
}

/// Mux bitrate implied by two PCRs `packets` TS packets apart.
pub fn bitrate_from_pcr(first: i64, second: i64, packets: u64) -> Option<u64> {
    if second <= first || packets == 0 {
        return None;
    }
    let incr = (second - first) / packets as i64;
    if incr <= 0 {
        return None;
    }
    Some((TS_PACKET_SIZE as i64 * 8 * PCR_HZ / incr) as u64)
}

/// Playing time of `bytes` at `bit_rate`, in microseconds.
pub fn duration_from_bitrate(bytes: u64, bit_rate: u64) -> Option<i64> {
    if bit_rate == 0 {
        return None;
    }
    Some((bytes as u128 * 8 * 1_000_000 / bit_rate as u128) as i64)
}

/// Sets the duration of every stream that has none.
pub(crate) fn fill_durations(streams: &mut StreamRegistry, duration_us: i64) {
    for stream in streams.iter_mut().filter(|s| s.duration.is_none()) {
        stream.duration = Some(rescale(duration_us, TIME_BASE_MICROS, stream.time_base));
    }
}

/// Overall start and duration from the per-stream values.
pub(crate) fn summarize(streams: &StreamRegistry, method: DurationMethod) -> Timings {
    let mut start_us: Option<i64> = None;
    let mut end_us: Option<i64> = None;
    for stream in streams.iter() {
        let start = stream
            .start_time
            .map(|t| rescale(t, stream.time_base, TIME_BASE_MICROS));
        if let Some(start) = start {
            start_us = Some(start_us.map_or(start, |s| s.min(start)));
        }
        if let Some(duration) = stream.duration {
            let end = start.unwrap_or(0) + rescale(duration, stream.time_base, TIME_BASE_MICROS);
            end_us = Some(end_us.map_or(end, |e| e.max(end)));
        }
    }
    Timings {
        start_time_us: start_us,
        duration_us: end_us.map(|end| end - start_us.unwrap_or(0)),
        method,
    }
}
