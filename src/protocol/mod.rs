//! Protocol module - Defines the wire protocol spoken with the drones
//!
//! Every exchange is a single fixed-size frame carried directly inside an
//! Ethernet frame with a private EtherType:
//! - 2 bytes marker ("P4")
//! - 1 byte version
//! - 1 byte op code (ASCII command symbol)
//! - 2x 4 bytes position (big-endian, signed)
//! - 1 byte result
//! - 4 bytes drone id, 4 bytes rejection reason
//! - 3x (4 + 4) bytes peer broadcast positions

mod command;
mod frame;

pub use command::*;
pub use frame::*;

/// Protocol version carried in every frame
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Marker bytes for protocol identification
pub const MARKER: [u8; 2] = [b'P', b'4'];

/// EtherType the frames are bound to
pub const ETHER_TYPE: u16 = 0x1234;

/// Size of a drone frame on the wire, request and reply alike
pub const FRAME_SIZE: usize = 45;

/// Number of drones a reply can carry broadcasts for
pub const DRONE_SLOTS: usize = 3;

/// Coordinate value marking an empty broadcast slot
pub const BROADCAST_SENTINEL: i32 = 999;

/// Destination the drones listen on
pub const DEFAULT_DESTINATION: [u8; 6] = [0x00, 0x04, 0x00, 0x00, 0x00, 0x00];

/// How long to wait for a reply before giving up (ms)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;
