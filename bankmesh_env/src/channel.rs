//! Directed byte-channel abstraction for BankMesh actors.
//!
//! A channel carries an ordered, reliable byte stream from exactly one
//! writer to exactly one reader. The protocol layer only ever sees the two
//! buffered halves defined here; the platform primitive underneath
//! (in-process queue, Unix socket, pipe) plugs in through [`ByteSink`] and
//! [`ByteSource`].
//!
//! ```text
//! actor i                                       actor j
//!   | ChannelWriter --[ ByteSink ~> ByteSource ]--> ChannelReader |
//! ```

use async_trait::async_trait;
use crate::error::ChannelError;
use crate::types::ActorId;

/// Write side of a platform channel primitive.
#[async_trait]
pub trait ByteSink: Send + 'static {
    /// Writes one frame and returns how many bytes were accepted.
    ///
    /// Blocks while the primitive's buffer is full. Returning fewer bytes
    /// than `frame.len()` means the stream is no longer frame-aligned.
    async fn write(&mut self, frame: &[u8]) -> Result<usize, ChannelError>;
}

/// Read side of a platform channel primitive.
#[async_trait]
pub trait ByteSource: Send + 'static {
    /// Waits for more bytes and appends them to `buf`.
    ///
    /// Returns the number of bytes appended; `0` means the writer is gone.
    async fn fill(&mut self, buf: &mut Vec<u8>) -> Result<usize, ChannelError>;

    /// Appends whatever is available right now without waiting.
    ///
    /// Returns `None` if nothing is available yet, `Some(0)` if the
    /// writer is gone.
    fn try_fill(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>, ChannelError>;
}

/// Creates directed channels for the matrix.
pub trait ChannelFactory {
    /// Opens one channel carrying bytes from `from` to `to`.
    fn open(&self, from: ActorId, to: ActorId) -> Result<(ChannelWriter, ChannelReader), ChannelError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Owned write half of a directed channel.
pub struct ChannelWriter {
    sink: Box<dyn ByteSink>,
}

impl ChannelWriter {
    /// Wraps a platform sink.
    pub fn new(sink: impl ByteSink) -> Self {
        Self { sink: Box::new(sink) }
    }

    /// Writes a complete frame, returning the number of bytes accepted.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<usize, ChannelError> {
        self.sink.write(frame).await
    }
}

/// Owned, buffered read half of a directed channel.
///
/// Bytes pulled from the source are kept in an internal buffer until a
/// caller consumes them with [`ChannelReader::read_exact`], so readiness
/// checks never consume frame data.
pub struct ChannelReader {
    source: Box<dyn ByteSource>,
    buf: Vec<u8>,
    closed: bool,
}

impl ChannelReader {
    /// Wraps a platform source.
    pub fn new(source: impl ByteSource) -> Self {
        Self {
            source: Box::new(source),
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Non-committal readiness check: true if at least one byte is buffered
    /// or could be buffered without waiting.
    pub fn poll_ready(&mut self) -> Result<bool, ChannelError> {
        if !self.buf.is_empty() {
            return Ok(true);
        }
        if self.closed {
            return Ok(false);
        }
        match self.source.try_fill(&mut self.buf)? {
            Some(0) => {
                self.closed = true;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Waits until at least one byte is buffered or the writer is gone.
    ///
    /// Cancel-safe: bytes are only ever moved into the internal buffer.
    pub async fn wait_ready(&mut self) -> Result<(), ChannelError> {
        if !self.buf.is_empty() || self.closed {
            return Ok(());
        }
        if self.source.fill(&mut self.buf).await? == 0 {
            self.closed = true;
        }
        Ok(())
    }

    /// Consumes exactly `n` bytes, waiting as long as necessary.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ChannelError> {
        while self.buf.len() < n {
            if self.closed {
                return Err(ChannelError::Truncated {
                    expected: n,
                    got: self.buf.len(),
                });
            }
            if self.source.fill(&mut self.buf).await? == 0 {
                self.closed = true;
            }
        }
        Ok(self.buf.drain(..n).collect())
    }

    /// True once the writer is gone and every buffered byte was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.closed && self.buf.is_empty()
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
