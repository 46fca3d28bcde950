//! gueststream-transport: stream-device protocol between the guest agent
//! and the host.
//!
//! # Header (8 bytes, little-endian)
//!
//! ```text
//! [0]     protocol_version u8   = 1
//! [1]     padding          u8
//! [2..4]  type             u16  MessageType
//! [4..8]  size             u32  payload bytes following the header
//! ```
//!
//! Outbound messages are built with [`OutboundMessage`] and written through a
//! [`StreamPort`], which keeps every message contiguous on the wire even when
//! the frame loop and the cursor watcher send at the same time.  Host
//! commands are read with [`PortReader::receive`].

pub mod inbound;
pub mod messages;
pub mod port;

pub use inbound::InboundMessage;
pub use messages::{CursorSet, OutboundMessage};
pub use port::{PortReader, StreamPort};

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 8;

/// Cursor dimensions must stay strictly below these.
pub const MAX_CURSOR_WIDTH: u16 = 1024;
pub const MAX_CURSOR_HEIGHT: u16 = 1024;

/// `SPICE_CURSOR_TYPE_ALPHA`: 32-bit premultiplied ARGB.
pub const CURSOR_TYPE_ALPHA: u8 = 0;

/// Number of stream capabilities defined by the protocol.
pub const CAPABILITY_COUNT: usize = 0;

/// Upper bound on inbound payloads.
pub const MAX_INBOUND_PAYLOAD: usize = 1024 * 1024;

/// Message type tags.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Capabilities      = 1,
    Data              = 2,
    Format            = 3,
    StartStop         = 4,
    NotifyError       = 5,
    CursorSet         = 6,
    CursorMove        = 7,
    DeviceDisplayInfo = 8,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Capabilities),
            2 => Ok(Self::Data),
            3 => Ok(Self::Format),
            4 => Ok(Self::StartStop),
            5 => Ok(Self::NotifyError),
            6 => Ok(Self::CursorSet),
            7 => Ok(Self::CursorMove),
            8 => Ok(Self::DeviceDisplayInfo),
            other => Err(other),
        }
    }
}
