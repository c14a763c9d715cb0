//! Unix-socket channel backend.
//!
//! Each directed channel is one `UnixStream` pair used in a single
//! direction: the writer keeps the write half of one end, the reader keeps
//! the read half of the other, and the two unused halves are dropped at
//! creation time.

use crate::channel::{ByteSink, ByteSource, ChannelFactory, ChannelReader, ChannelWriter};
use crate::error::ChannelError;
use crate::types::ActorId;
use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

const READ_CHUNK: usize = 4096;

/// Write half of a socket-backed channel.
pub struct UnixSink {
    half: OwnedWriteHalf,
}

/// Read half of a socket-backed channel.
pub struct UnixSource {
    half: OwnedReadHalf,
}

#[async_trait]
impl ByteSink for UnixSink {
    async fn write(&mut self, frame: &[u8]) -> Result<usize, ChannelError> {
        let mut written = 0;
        while written < frame.len() {
            match self.half.write(&frame[written..]).await {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(ChannelError::Closed),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl ByteSource for UnixSource {
    async fn fill(&mut self, buf: &mut Vec<u8>) -> Result<usize, ChannelError> {
        loop {
            self.half.readable().await?;
            if let Some(n) = self.try_fill(buf)? {
                return Ok(n);
            }
        }
    }

    fn try_fill(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>, ChannelError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.half.try_read(&mut chunk) {
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(Some(n))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(Some(0)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Factory for socket-backed channels. Must be used inside a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct UnixChannelFactory;

impl UnixChannelFactory {
    /// Creates a new factory.
    pub fn new() -> Self {
        Self
    }
}

impl ChannelFactory for UnixChannelFactory {
    fn open(&self, _from: ActorId, _to: ActorId) -> Result<(ChannelWriter, ChannelReader), ChannelError> {
        let (a, b) = UnixStream::pair().map_err(|e| ChannelError::create(e.to_string()))?;
        let (_, write_half) = a.into_split();
        let (read_half, _) = b.into_split();
        Ok((
            ChannelWriter::new(UnixSink { half: write_half }),
            ChannelReader::new(UnixSource { half: read_half }),
        ))
    }

    fn name(&self) -> &'static str {
        "unix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unix_channel_roundtrip() {
        let factory = UnixChannelFactory::new();
        let (mut w, mut r) = factory.open(ActorId(0), ActorId(1)).unwrap();

        let written = w.write_frame(&[0xAF, 0xAF, 0, 0]).await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(r.read_exact(4).await.unwrap(), vec![0xAF, 0xAF, 0, 0]);
    }

    #[tokio::test]
    async fn test_unix_channel_reports_eof() {
        let factory = UnixChannelFactory::new();
        let (mut w, mut r) = factory.open(ActorId(2), ActorId(0)).unwrap();
        w.write_frame(&[1, 2]).await.unwrap();
        drop(w);

        assert_eq!(r.read_exact(2).await.unwrap(), vec![1, 2]);
        r.wait_ready().await.unwrap();
        assert!(r.is_exhausted());
    }
}
