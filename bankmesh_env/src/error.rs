//! Error types for the BankMesh channel layer.

use thiserror::Error;

/// Errors raised by a single channel half.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel primitive could not be created
    #[error("Channel creation failed: {0}")]
    Create(String),

    /// The opposite half is gone; nothing more can be written
    #[error("Channel closed")]
    Closed,

    /// The peer closed mid-frame; fewer bytes arrived than were required
    #[error("Truncated read: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Underlying OS-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Creates a creation error.
    pub fn create(msg: impl Into<String>) -> Self {
        Self::Create(msg.into())
    }
}
