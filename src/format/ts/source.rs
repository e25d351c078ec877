use crate::error::Result;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// A seekable byte supplier the demuxer reads TS packets from.
///
/// `read` may return fewer bytes than requested; zero means end of stream.
#[async_trait]
pub trait ByteSource: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seeks to an absolute byte offset.
    async fn seek(&mut self, pos: u64) -> Result<u64>;

    /// Current absolute byte offset.
    fn tell(&self) -> u64;

    /// Total size, when known.
    async fn size(&mut self) -> Result<Option<u64>>;

    fn is_seekable(&self) -> bool {
        true
    }

    /// Polled once per TS packet; `true` aborts the current call with `Exit`.
    fn is_interrupted(&self) -> bool {
        false
    }

    /// Fills `buf` unless the stream ends first. Returns the bytes read.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn skip(&mut self, len: u64) -> Result<u64> {
        let pos = self.tell() + len;
        self.seek(pos).await
    }
}

/// Cloneable handle used to interrupt a running demuxer from another task.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// [`ByteSource`] over any tokio reader that can seek: files, `std::io::Cursor`.
pub struct AsyncSource<R> {
    inner: R,
    pos: u64,
    size: Option<u64>,
    interrupt: Option<InterruptHandle>,
}

impl<R: AsyncRead + AsyncSeek + Unpin + Send> AsyncSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            size: None,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = Some(handle);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: AsyncRead + AsyncSeek + Unpin + Send> ByteSource for AsyncSource<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf).await?;
        self.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, pos: u64) -> Result<u64> {
        self.pos = self.inner.seek(SeekFrom::Start(pos)).await?;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    async fn size(&mut self) -> Result<Option<u64>> {
        if self.size.is_none() {
            let end = self.inner.seek(SeekFrom::End(0)).await?;
            self.inner.seek(SeekFrom::Start(self.pos)).await?;
            self.size = Some(end);
        }
        Ok(self.size)
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|h| h.is_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_async_source_tracks_position() {
        tokio_test::block_on(async {
            let mut source = AsyncSource::new(Cursor::new((0u8..=255).collect::<Vec<_>>()));
            let mut buf = [0u8; 10];
            assert_eq!(source.read_full(&mut buf).await.unwrap(), 10);
            assert_eq!(source.tell(), 10);
            assert_eq!(source.size().await.unwrap(), Some(256));
            assert_eq!(source.tell(), 10);

            source.seek(250).await.unwrap();
            assert_eq!(source.read_full(&mut buf).await.unwrap(), 6);
            assert_eq!(&buf[..6], &[250, 251, 252, 253, 254, 255]);
            assert_eq!(source.read(&mut buf).await.unwrap(), 0);
        });
    }

    #[test]
    fn test_interrupt_handle() {
        let handle = InterruptHandle::new();
        let source = AsyncSource::new(Cursor::new(Vec::<u8>::new())).with_interrupt(handle.clone());
        assert!(!source.is_interrupted());
        handle.interrupt();
        assert!(source.is_interrupted());
        handle.clear();
        assert!(!source.is_interrupted());
    }
}
