//! Directed send/receive over one actor's restricted channel endpoints.
//!
//! # Packet Flow
//!
//! ```text
//! Actor A                       channel A->B                      Actor B
//!   |-- send(B, msg) ---> [header|payload] -----> receive(A) / receive_any() --|
//! ```
//!
//! # Fairness
//!
//! [`ActorEndpoints::receive_any`] scans peers in ascending ID order and
//! takes the first one with data ready. Under sustained traffic a low-ID
//! peer that is always ready starves higher IDs. Protocol code relies on
//! this deterministic order, so it is not round-robin.

use bankmesh_env::{ActorId, ChannelError, ChannelReader, ChannelWriter};
use futures::future::select_all;
use tracing::trace;

use crate::error::TransportError;
use crate::message::{Message, MessageHeader, MessageType, RawHeader, HEADER_LEN, MAX_PAYLOAD_LEN, MESSAGE_MAGIC};

/// The N-1 outgoing writers and N-1 incoming readers owned by one actor.
///
/// Both vectors are indexed by peer ID; the slot for the actor itself is
/// always empty.
pub struct ActorEndpoints {
    local: ActorId,
    writers: Vec<Option<ChannelWriter>>,
    readers: Vec<Option<ChannelReader>>,
}

impl ActorEndpoints {
    pub(crate) fn new(
        local: ActorId,
        writers: Vec<Option<ChannelWriter>>,
        readers: Vec<Option<ChannelReader>>,
    ) -> Self {
        Self {
            local,
            writers,
            readers,
        }
    }

    /// The owning actor.
    pub fn local_id(&self) -> ActorId {
        self.local
    }

    /// Number of actors in the mesh, the owner included.
    pub fn actor_count(&self) -> usize {
        self.writers.len()
    }

    /// Every other actor, ascending.
    pub fn peers(&self) -> impl Iterator<Item = ActorId> {
        self.local.peers(self.actor_count())
    }

    /// True if the write half towards `peer` is held.
    pub fn has_writer(&self, peer: ActorId) -> bool {
        matches!(self.writers.get(peer.index()), Some(Some(_)))
    }

    /// True if the read half from `peer` is held.
    pub fn has_reader(&self, peer: ActorId) -> bool {
        matches!(self.readers.get(peer.index()), Some(Some(_)))
    }

    /// Writes `msg` as one frame on the channel to `dst`.
    pub async fn send(&mut self, dst: ActorId, msg: &Message) -> Result<(), TransportError> {
        let (local, n) = (self.local, self.actor_count());
        if dst == local || dst.index() >= n {
            return Err(TransportError::InvalidDestination { local, dst, n });
        }
        if msg.payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge {
                len: msg.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let writer = self.writers[dst.index()]
            .as_mut()
            .ok_or(TransportError::ChannelClosed { peer: dst })?;

        let frame = msg.encode();
        let written = writer.write_frame(&frame).await.map_err(|e| match e {
            ChannelError::Closed => TransportError::ChannelClosed { peer: dst },
            source => TransportError::Channel { peer: dst, source },
        })?;
        if written != frame.len() {
            // The stream is no longer frame-aligned; nothing more may go out on it.
            self.writers[dst.index()] = None;
            return Err(TransportError::ShortWrite {
                dst,
                expected: frame.len(),
                written,
            });
        }
        trace!(actor = %local, peer = %dst, kind = %msg.kind(), time = msg.local_time(), "frame sent");
        Ok(())
    }

    /// Sends `msg` to every peer in ascending order, stopping at the first failure.
    pub async fn broadcast(&mut self, msg: &Message) -> Result<(), TransportError> {
        let peers: Vec<ActorId> = self.peers().collect();
        for dst in peers {
            self.send(dst, msg).await?;
        }
        Ok(())
    }

    /// Blocks until one complete frame arrives from `src`.
    pub async fn receive(&mut self, src: ActorId) -> Result<Message, TransportError> {
        let (local, n) = (self.local, self.actor_count());
        if src == local || src.index() >= n {
            return Err(TransportError::InvalidSource { local, src, n });
        }
        let reader = self.readers[src.index()]
            .as_mut()
            .ok_or(TransportError::ChannelClosed { peer: src })?;

        let msg = read_frame(reader, src).await?;
        trace!(actor = %local, peer = %src, kind = %msg.kind(), time = msg.local_time(), "frame received");
        Ok(msg)
    }

    /// Blocks until any peer has a frame ready and returns it with its sender.
    ///
    /// Peers are checked in ascending ID order and the first ready one wins.
    /// Parks on every live reader only when none is ready. Peers whose
    /// channel is closed and drained are skipped; if that is all of them,
    /// fails with [`TransportError::AllPeersClosed`].
    pub async fn receive_any(&mut self) -> Result<(ActorId, Message), TransportError> {
        loop {
            if let Some(src) = self.first_ready()? {
                let msg = self.receive(src).await?;
                return Ok((src, msg));
            }

            let waits: Vec<_> = self
                .readers
                .iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| slot.as_mut().map(|r| (ActorId::from_index(i), r)))
                .filter(|(_, r)| !r.is_exhausted())
                .map(|(peer, r)| Box::pin(async move { (peer, r.wait_ready().await) }))
                .collect();
            if waits.is_empty() {
                return Err(TransportError::AllPeersClosed { local: self.local });
            }

            let ((peer, result), _, _) = select_all(waits).await;
            result.map_err(|source| TransportError::Channel { peer, source })?;
        }
    }

    /// Drops every channel half this actor holds.
    pub fn close(&mut self) {
        self.writers.iter_mut().for_each(|w| *w = None);
        self.readers.iter_mut().for_each(|r| *r = None);
    }

    fn first_ready(&mut self) -> Result<Option<ActorId>, TransportError> {
        for (i, slot) in self.readers.iter_mut().enumerate() {
            let Some(reader) = slot.as_mut() else { continue };
            let peer = ActorId::from_index(i);
            if reader
                .poll_ready()
                .map_err(|source| TransportError::Channel { peer, source })?
            {
                return Ok(Some(peer));
            }
        }
        Ok(None)
    }
}

async fn read_frame(reader: &mut ChannelReader, src: ActorId) -> Result<Message, TransportError> {
    let short = |e: ChannelError| match e {
        ChannelError::Truncated { expected, got } => TransportError::ShortRead { src, expected, got },
        source => TransportError::Channel { peer: src, source },
    };

    let bytes = reader.read_exact(HEADER_LEN).await.map_err(short)?;
    let mut head = [0u8; HEADER_LEN];
    head.copy_from_slice(&bytes);
    let raw = RawHeader::parse(&head);

    if raw.magic != MESSAGE_MAGIC {
        return Err(TransportError::BadMagic { src, found: raw.magic });
    }
    let kind = MessageType::from_tag(raw.tag)
        .ok_or(TransportError::UnknownMessageType { src, tag: raw.tag })?;
    let len = raw.payload_len as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(TransportError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN });
    }
    let payload = if len > 0 {
        reader.read_exact(len).await.map_err(short)?
    } else {
        Vec::new()
    };

    Ok(Message {
        header: MessageHeader {
            magic: raw.magic,
            kind,
            payload_len: raw.payload_len,
            local_time: raw.local_time,
        },
        payload,
    })
}
