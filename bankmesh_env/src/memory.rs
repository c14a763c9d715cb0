//! In-process channel backend built on bounded Tokio queues.

use crate::channel::{ByteSink, ByteSource, ChannelFactory, ChannelReader, ChannelWriter};
use crate::error::ChannelError;
use crate::types::ActorId;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Default number of frames a memory channel buffers before `send` blocks.
pub const DEFAULT_CAPACITY: usize = 64;

/// Write half: each frame travels as one chunk, so a frame is never split.
pub struct MemorySink {
    tx: mpsc::Sender<Vec<u8>>,
}

/// Read half.
pub struct MemorySource {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn write(&mut self, frame: &[u8]) -> Result<usize, ChannelError> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(frame.len())
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn fill(&mut self, buf: &mut Vec<u8>) -> Result<usize, ChannelError> {
        match self.rx.recv().await {
            Some(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn try_fill(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>, ChannelError> {
        match self.rx.try_recv() {
            Ok(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(Some(chunk.len()))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(Some(0)),
        }
    }
}

/// Factory for in-process channels.
#[derive(Debug, Clone)]
pub struct MemoryChannelFactory {
    /// Frames buffered per channel before the writer blocks
    capacity: usize,
}

impl MemoryChannelFactory {
    /// Creates a factory with the given per-channel capacity (in frames).
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for MemoryChannelFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChannelFactory for MemoryChannelFactory {
    fn open(&self, _from: ActorId, _to: ActorId) -> Result<(ChannelWriter, ChannelReader), ChannelError> {
        if self.capacity == 0 {
            return Err(ChannelError::create("memory channel capacity must be positive"));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        Ok((
            ChannelWriter::new(MemorySink { tx }),
            ChannelReader::new(MemorySource { rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_channel_is_fifo() {
        let factory = MemoryChannelFactory::default();
        let (mut w, mut r) = factory.open(ActorId(0), ActorId(1)).unwrap();

        w.write_frame(&[1, 2, 3]).await.unwrap();
        w.write_frame(&[4]).await.unwrap();

        assert_eq!(r.read_exact(4).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_memory_channel_detects_closed_reader() {
        let factory = MemoryChannelFactory::default();
        let (mut w, r) = factory.open(ActorId(0), ActorId(1)).unwrap();
        drop(r);

        assert!(matches!(w.write_frame(&[1]).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_memory_channel_exhausts_after_writer_drop() {
        let factory = MemoryChannelFactory::default();
        let (mut w, mut r) = factory.open(ActorId(1), ActorId(0)).unwrap();
        w.write_frame(&[5]).await.unwrap();
        drop(w);

        assert!(r.poll_ready().unwrap());
        assert_eq!(r.read_exact(1).await.unwrap(), vec![5]);
        assert!(!r.poll_ready().unwrap());
        assert!(r.is_exhausted());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let factory = MemoryChannelFactory::new(0);
        assert!(matches!(
            factory.open(ActorId(0), ActorId(1)),
            Err(ChannelError::Create(_))
        ));
    }
}
