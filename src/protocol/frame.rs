//! Frame codec
//!
//! Encodes commands into the fixed drone frame layout and decodes replies
//! back into typed fields. All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

use super::{Command, BROADCAST_SENTINEL, DRONE_SLOTS, FRAME_SIZE, MARKER, PROTOCOL_VERSION};

/// Result byte of an accepted command
pub const RESULT_ACCEPTED: u8 = b'y';

/// Result byte of a rejected command
pub const RESULT_REJECTED: u8 = b'n';

/// Result byte written into requests, where the field has no meaning
pub const RESULT_PLACEHOLDER: u8 = RESULT_ACCEPTED;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short: {len} bytes (expected {expected})")]
    Truncated { len: usize, expected: usize },

    #[error("Invalid marker bytes {0:02x?}")]
    InvalidMarker([u8; 2]),

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },

    #[error("Unknown op code {0:#04x}")]
    UnknownOp(u8),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A position on the drone map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Whether the drone carried out the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    /// Anything other than the accepted byte counts as a rejection
    pub fn from_byte(byte: u8) -> Self {
        if byte == RESULT_ACCEPTED {
            Outcome::Accepted
        } else {
            Outcome::Rejected
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Outcome::Accepted => RESULT_ACCEPTED,
            Outcome::Rejected => RESULT_REJECTED,
        }
    }
}

/// Why a drone refused a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The move would leave the map
    OutOfBounds,
    /// Another drone occupies the target cell
    BlockedByPeer,
    /// A code this client does not know about
    Unknown(i32),
}

impl RejectReason {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => RejectReason::OutOfBounds,
            1 => RejectReason::BlockedByPeer,
            other => RejectReason::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            RejectReason::OutOfBounds => 0,
            RejectReason::BlockedByPeer => 1,
            RejectReason::Unknown(code) => code,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OutOfBounds => write!(f, "out of bound of the map"),
            RejectReason::BlockedByPeer => write!(f, "other drone in the way"),
            RejectReason::Unknown(code) => write!(f, "unknown reason (code {})", code),
        }
    }
}

/// Peer positions carried by a frame, `None` where the slot is empty
pub type Broadcasts = [Option<Position>; DRONE_SLOTS];

/// Typed view of a drone frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroneFrame {
    pub op: Command,
    pub position: Position,
    pub outcome: Outcome,
    pub drone_id: i32,
    pub reject_reason: RejectReason,
    pub broadcasts: Broadcasts,
}

impl DroneFrame {
    /// A request frame; the reply-only fields carry their defaults
    pub fn request(op: Command, position: Position) -> Self {
        Self {
            op,
            position,
            outcome: Outcome::from_byte(RESULT_PLACEHOLDER),
            drone_id: 0,
            reject_reason: RejectReason::OutOfBounds,
            broadcasts: [None; DRONE_SLOTS],
        }
    }

    /// Write the frame in wire layout
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_SIZE);
        buf.put_slice(&MARKER);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.op.symbol());
        buf.put_i32(self.position.x);
        buf.put_i32(self.position.y);
        buf.put_u8(self.outcome.to_byte());
        buf.put_i32(self.drone_id);
        buf.put_i32(self.reject_reason.code());

        for slot in &self.broadcasts {
            let Position { x, y } = slot.unwrap_or(Position {
                x: BROADCAST_SENTINEL,
                y: BROADCAST_SENTINEL,
            });
            buf.put_i32(x);
            buf.put_i32(y);
        }
    }

    /// Parse a frame, validating marker and version first
    ///
    /// Bytes past `FRAME_SIZE` are link-layer padding and are ignored.
    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        if bytes.len() < FRAME_SIZE {
            return Err(DecodeError::Truncated {
                len: bytes.len(),
                expected: FRAME_SIZE,
            });
        }

        let mut buf = &bytes[..FRAME_SIZE];

        let marker = [buf.get_u8(), buf.get_u8()];
        if marker != MARKER {
            return Err(DecodeError::InvalidMarker(marker));
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        let op_byte = buf.get_u8();
        let op = Command::from_symbol(op_byte).ok_or(DecodeError::UnknownOp(op_byte))?;
        let position = Position::new(buf.get_i32(), buf.get_i32());
        let outcome = Outcome::from_byte(buf.get_u8());
        let drone_id = buf.get_i32();
        let reject_reason = RejectReason::from_code(buf.get_i32());

        let mut broadcasts = [None; DRONE_SLOTS];
        for slot in broadcasts.iter_mut() {
            let (x, y) = (buf.get_i32(), buf.get_i32());
            if (x, y) != (BROADCAST_SENTINEL, BROADCAST_SENTINEL) {
                *slot = Some(Position::new(x, y));
            }
        }

        Ok(Self {
            op,
            position,
            outcome,
            drone_id,
            reject_reason,
            broadcasts,
        })
    }
}

/// Encode a command sent from `position`
pub fn encode(command: Command, position: Position) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_SIZE);
    DroneFrame::request(command, position).encode_into(&mut buf);
    buf.freeze()
}

/// Decode a frame received from a drone
pub fn decode(bytes: &[u8]) -> DecodeResult<DroneFrame> {
    DroneFrame::decode(bytes)
}
