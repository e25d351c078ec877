use crate::av::{MediaStream, StreamKey};
use log::debug;

/// What changed in the stream list after a PMT was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamsChangedEvent {
    /// Program whose PMT triggered the change
    pub program_id: u16,
    /// Streams created by the PMT
    pub added: Vec<StreamKey>,
    /// PIDs whose streams were removed
    pub removed: Vec<u16>,
    /// Streams registered after the change
    pub stream_count: usize,
}

/// Listener for stream list changes.
///
/// Called synchronously from inside `read_packet`; it must not call back
/// into the demuxer.
pub trait StreamsChanged: Send {
    fn streams_changed(&mut self, event: &StreamsChangedEvent);
}

impl<F> StreamsChanged for F
where
    F: FnMut(&StreamsChangedEvent) + Send,
{
    fn streams_changed(&mut self, event: &StreamsChangedEvent) {
        self(event)
    }
}

/// The caller-visible streams, in index order.
///
/// Removing a stream renumbers everything after it; [`StreamKey`]s stay
/// valid until their own stream goes.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<MediaStream>,
    next_key: u32,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stream for `pid` with the 33-bit, 1/90000 defaults.
    pub fn add(&mut self, pid: u16) -> StreamKey {
        let key = StreamKey(self.next_key);
        self.next_key += 1;
        let mut stream = MediaStream::new(pid, key);
        stream.index = self.streams.len();
        debug!("new stream #{} on pid 0x{:x}", stream.index, pid);
        self.streams.push(stream);
        key
    }

    pub fn get(&self, key: StreamKey) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.key == key)
    }

    pub fn get_mut(&mut self, key: StreamKey) -> Option<&mut MediaStream> {
        self.streams.iter_mut().find(|s| s.key == key)
    }

    pub fn by_index(&self, index: usize) -> Option<&MediaStream> {
        self.streams.get(index)
    }

    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut MediaStream> {
        self.streams.get_mut(index)
    }

    pub fn index_of(&self, key: StreamKey) -> Option<usize> {
        self.streams.iter().position(|s| s.key == key)
    }

    /// First stream carried on `pid`.
    pub fn find_by_pid(&self, pid: u16) -> Option<StreamKey> {
        self.streams.iter().find(|s| s.id == pid).map(|s| s.key)
    }

    /// Removes every stream carried on `pid` and renumbers the rest.
    pub fn remove_pid(&mut self, pid: u16) -> Vec<StreamKey> {
        let removed: Vec<StreamKey> = self
            .streams
            .iter()
            .filter(|s| s.id == pid)
            .map(|s| s.key)
            .collect();
        if !removed.is_empty() {
            debug!("removing {} stream(s) on pid 0x{:x}", removed.len(), pid);
            self.streams.retain(|s| s.id != pid);
            self.renumber();
        }
        removed
    }

    fn renumber(&mut self) {
        for (index, stream) in self.streams.iter_mut().enumerate() {
            stream.index = index;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MediaStream> {
        self.streams.iter_mut()
    }

    pub fn as_slice(&self) -> &[MediaStream] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
