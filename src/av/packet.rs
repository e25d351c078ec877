use bytes::Bytes;

/// Packet-level flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// Keyframe / random access point
    pub key: bool,
    /// Damage was detected while assembling this packet
    pub corrupt: bool,
    /// Packet should be dropped by the consumer
    pub discard: bool,
}

/// A parameter change announced alongside a packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamChange {
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Out-of-band data attached to a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideData {
    /// Stream id byte of the PES header the packet was assembled from
    MpegTsStreamId(u8),
    /// Codec extradata changed on this stream
    NewExtradata(Bytes),
    /// Sample rate, channels or dimensions changed
    ParamChange(ParamChange),
}

/// One demuxed unit of media
///
/// Timestamps are in the time base of the stream named by `stream_index`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Byte offset of the first TS packet that carried this payload
    pub pos: Option<u64>,
    pub stream_index: usize,
    pub flags: PacketFlags,
    pub duration: Option<i64>,
    pub side_data: Vec<SideData>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            pos: None,
            stream_index: 0,
            flags: PacketFlags::default(),
            duration: None,
            side_data: Vec::new(),
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_pos(mut self, pos: u64) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_corrupt_flag(mut self, corrupt: bool) -> Self {
        self.flags.corrupt = corrupt;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_side_data(mut self, side_data: SideData) -> Self {
        self.side_data.push(side_data);
        self
    }

    /// Original PES stream id, if the packet came from a PES.
    pub fn mpegts_stream_id(&self) -> Option<u8> {
        self.side_data.iter().find_map(|sd| match sd {
            SideData::MpegTsStreamId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn is_corrupt(&self) -> bool {
        self.flags.corrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let packet = Packet::new(vec![1u8, 2, 3])
            .with_pts(Some(9000))
            .with_dts(None)
            .with_pos(376)
            .with_stream_index(2)
            .with_corrupt_flag(true)
            .with_side_data(SideData::MpegTsStreamId(0xe0));

        assert_eq!(&packet.data[..], &[1, 2, 3]);
        assert_eq!(packet.pts, Some(9000));
        assert_eq!(packet.dts, None);
        assert_eq!(packet.pos, Some(376));
        assert_eq!(packet.stream_index, 2);
        assert!(packet.is_corrupt());
        assert_eq!(packet.mpegts_stream_id(), Some(0xe0));
    }
}
