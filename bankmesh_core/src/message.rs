//! Wire format for BankMesh frames.
//!
//! ```text
//! +-----------+----------+-----------------+-------------------+---------------------+
//! | magic:4   | type:4   | payload_len:4   | logical_time:4    | payload:payload_len |
//! +-----------+----------+-----------------+-------------------+---------------------+
//! ```
//!
//! All integers are little-endian. The fixed header tells a reader exactly
//! how many payload bytes follow, so no delimiter scanning is needed.
//!
//! Payloads:
//! - `TRANSFER`: `{source:4}{destination:4}{amount:8}`
//! - `BALANCE_HISTORY`: `{actor_id:4}{record_count:4}{record*}` where each
//!   record is `{balance:8}{time:4}{pending_in:8}`
//! - everything else: empty or free text

use bankmesh_env::{ActorId, Balance, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::history::{BalanceHistory, BalanceRecord};

/// Sentinel opening every frame.
pub const MESSAGE_MAGIC: u32 = 0xAFAF;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 4096 - HEADER_LEN;

const TRANSFER_LEN: usize = 16;
const HISTORY_PREFIX_LEN: usize = 8;
const RECORD_LEN: usize = 20;

/// Most balance records one BALANCE_HISTORY frame can carry.
pub const MAX_HISTORY_RECORDS: usize = (MAX_PAYLOAD_LEN - HISTORY_PREFIX_LEN) / RECORD_LEN;

/// Closed set of frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Started,
    Done,
    Ack,
    Stop,
    Transfer,
    BalanceHistory,
}

impl MessageType {
    /// Every type, in tag order.
    pub const ALL: [MessageType; 6] = [
        MessageType::Started,
        MessageType::Done,
        MessageType::Ack,
        MessageType::Stop,
        MessageType::Transfer,
        MessageType::BalanceHistory,
    ];

    /// Wire tag.
    pub fn tag(&self) -> u32 {
        match self {
            MessageType::Started => 0,
            MessageType::Done => 1,
            MessageType::Ack => 2,
            MessageType::Stop => 3,
            MessageType::Transfer => 4,
            MessageType::BalanceHistory => 5,
        }
    }

    /// Parses a wire tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Upper-case protocol name.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Started => "STARTED",
            MessageType::Done => "DONE",
            MessageType::Ack => "ACK",
            MessageType::Stop => "STOP",
            MessageType::Transfer => "TRANSFER",
            MessageType::BalanceHistory => "BALANCE_HISTORY",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub kind: MessageType,
    pub payload_len: u32,
    pub local_time: Timestamp,
}

/// Header fields as read off the wire, before any validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub magic: u32,
    pub tag: u32,
    pub payload_len: u32,
    pub local_time: Timestamp,
}

impl RawHeader {
    /// Splits 16 header bytes into their fields.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic: read_u32(bytes, 0),
            tag: read_u32(bytes, 4),
            payload_len: read_u32(bytes, 8),
            local_time: read_u32(bytes, 12),
        }
    }
}

impl MessageHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.kind.tag().to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.local_time.to_le_bytes());
    }
}

/// One complete frame: header plus exactly `payload_len` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a frame with the given type, payload and send time.
    ///
    /// Payloads longer than [`MAX_PAYLOAD_LEN`] are rejected at send time.
    pub fn new(kind: MessageType, payload: Vec<u8>, local_time: Timestamp) -> Self {
        Self {
            header: MessageHeader {
                magic: MESSAGE_MAGIC,
                kind,
                payload_len: payload.len() as u32,
                local_time,
            },
            payload,
        }
    }

    /// Builds a control frame with an empty payload.
    pub fn control(kind: MessageType, local_time: Timestamp) -> Self {
        Self::new(kind, Vec::new(), local_time)
    }

    /// Builds a control frame carrying a free-text payload.
    pub fn text(kind: MessageType, text: &str, local_time: Timestamp) -> Self {
        Self::new(kind, text.as_bytes().to_vec(), local_time)
    }

    /// Builds a TRANSFER frame.
    pub fn transfer(order: &TransferOrder, local_time: Timestamp) -> Self {
        Self::new(MessageType::Transfer, order.encode(), local_time)
    }

    /// Builds a BALANCE_HISTORY frame.
    pub fn balance_history(history: &BalanceHistory, local_time: Timestamp) -> Self {
        Self::new(MessageType::BalanceHistory, encode_history(history), local_time)
    }

    /// Frame type.
    pub fn kind(&self) -> MessageType {
        self.header.kind
    }

    /// Sender's logical time when the frame was sent.
    pub fn local_time(&self) -> Timestamp {
        self.header.local_time
    }

    /// Total encoded size.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serializes header and payload into one contiguous frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len());
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Payload as lossy UTF-8, for log lines.
    pub fn text_payload(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Decodes a TRANSFER payload.
    pub fn transfer_order(&self) -> Result<TransferOrder, ProtocolError> {
        self.expect_kind(MessageType::Transfer)?;
        TransferOrder::decode(&self.payload)
    }

    /// Decodes a BALANCE_HISTORY payload.
    pub fn history(&self) -> Result<BalanceHistory, ProtocolError> {
        self.expect_kind(MessageType::BalanceHistory)?;
        decode_history(&self.payload)
    }

    fn expect_kind(&self, kind: MessageType) -> Result<(), ProtocolError> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(malformed(kind, format!("frame is {}", self.kind())))
        }
    }
}

/// A request to move `amount` from `source` to `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrder {
    pub source: ActorId,
    pub destination: ActorId,
    pub amount: Balance,
}

impl TransferOrder {
    /// Creates an order.
    pub fn new(source: ActorId, destination: ActorId, amount: Balance) -> Self {
        Self {
            source,
            destination,
            amount,
        }
    }

    /// Encodes as `{source:4}{destination:4}{amount:8}`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSFER_LEN);
        out.extend_from_slice(&self.source.0.to_le_bytes());
        out.extend_from_slice(&self.destination.0.to_le_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out
    }

    /// Decodes a TRANSFER payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != TRANSFER_LEN {
            return Err(malformed(
                MessageType::Transfer,
                format!("expected {} bytes, got {}", TRANSFER_LEN, bytes.len()),
            ));
        }
        let order = Self {
            source: ActorId(read_u32(bytes, 0)),
            destination: ActorId(read_u32(bytes, 4)),
            amount: read_i64(bytes, 8),
        };
        if order.amount < 0 {
            return Err(malformed(
                MessageType::Transfer,
                format!("negative amount {}", order.amount),
            ));
        }
        Ok(order)
    }
}

impl std::fmt::Display for TransferOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${} {} -> {}", self.amount, self.source, self.destination)
    }
}

fn encode_history(history: &BalanceHistory) -> Vec<u8> {
    let records = history.records();
    let mut out = Vec::with_capacity(HISTORY_PREFIX_LEN + records.len() * RECORD_LEN);
    out.extend_from_slice(&history.actor().0.to_le_bytes());
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        out.extend_from_slice(&record.balance.to_le_bytes());
        out.extend_from_slice(&record.time.to_le_bytes());
        out.extend_from_slice(&record.pending_in.to_le_bytes());
    }
    out
}

fn decode_history(bytes: &[u8]) -> Result<BalanceHistory, ProtocolError> {
    let kind = MessageType::BalanceHistory;
    if bytes.len() < HISTORY_PREFIX_LEN {
        return Err(malformed(kind, format!("{} bytes is shorter than the prefix", bytes.len())));
    }
    let actor = ActorId(read_u32(bytes, 0));
    let count = read_u32(bytes, 4) as usize;
    let expected = HISTORY_PREFIX_LEN + count * RECORD_LEN;
    if bytes.len() != expected {
        return Err(malformed(
            kind,
            format!("{} records need {} bytes, got {}", count, expected, bytes.len()),
        ));
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let at = HISTORY_PREFIX_LEN + i * RECORD_LEN;
        records.push(BalanceRecord {
            balance: read_i64(bytes, at),
            time: read_u32(bytes, at + 8),
            pending_in: read_i64(bytes, at + 12),
        });
    }
    BalanceHistory::from_records(actor, records).map_err(|reason| malformed(kind, reason))
}

fn malformed(kind: MessageType, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedPayload {
        kind,
        reason: reason.into(),
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    i64::from_le_bytes(raw)
}
