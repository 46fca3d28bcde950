//! Outbound message kinds.
//!
//! Every kind knows its fixed part, its payload size and how to serialize
//! itself; [`OutboundMessage::write_to`] frames any of them behind the common
//! header.
//!
//! # Fixed parts
//!
//! ```text
//! Format            width u32 | height u32 | codec u8 | pad [u8;3]
//! Data              (none), encoded frame bytes follow
//! Capabilities      bitmap [u8; ceil(n/8)]
//! DeviceDisplayInfo stream_id u32 | device_display_id u32 | address_len u32 | address\0
//! CursorSet         width u16 | height u16 | hot_x u16 | hot_y u16 | type u8 | pad [u8;3]
//!                   + width*height u32 pixels
//! ```

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use gueststream_core::{AgentError, CursorImage, DeviceDisplayInfo, FrameSize, VideoCodec};
use tracing::warn;

use crate::{
    MessageType, CURSOR_TYPE_ALPHA, HEADER_SIZE, MAX_CURSOR_HEIGHT, MAX_CURSOR_WIDTH,
    PROTOCOL_VERSION,
};

const FORMAT_SIZE: usize = 12;
const DEVICE_DISPLAY_INFO_SIZE: usize = 12;
const CURSOR_SET_SIZE: usize = 12;
const MAX_DEVICE_ADDRESS_LEN: usize = 255;

// ── CursorSet ─────────────────────────────────────────────────────────────────

/// A validated cursor shape.  Construction fails for shapes the host would
/// refuse, so an invalid cursor never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSet<'a> {
    width:  u16,
    height: u16,
    hot_x:  u16,
    hot_y:  u16,
    pixels: &'a [u32],
}

impl<'a> CursorSet<'a> {
    pub fn new(
        width: u16,
        height: u16,
        hot_x: u16,
        hot_y: u16,
        pixels: &'a [u32],
    ) -> Result<Self, AgentError> {
        if width >= MAX_CURSOR_WIDTH {
            return Err(AgentError::cursor(format!(
                "Cursor width {width} too big (limit is {MAX_CURSOR_WIDTH})"
            )));
        }
        if height >= MAX_CURSOR_HEIGHT {
            return Err(AgentError::cursor(format!(
                "Cursor height {height} too big (limit is {MAX_CURSOR_HEIGHT})"
            )));
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(AgentError::cursor(format!(
                "Cursor {width}x{height} carries {} pixels, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self { width, height, hot_x, hot_y, pixels })
    }

    pub fn from_image(image: &'a CursorImage) -> Result<Self, AgentError> {
        Self::new(image.width, image.height, image.hot_x, image.hot_y, &image.pixels)
    }

    /// Payload size for a cursor of `pixel_count` pixels.
    pub fn size(pixel_count: usize) -> usize {
        CURSOR_SET_SIZE + 4 * pixel_count
    }
}

// ── OutboundMessage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum OutboundMessage<'a> {
    /// Announces a new encoded stream.
    Format { size: FrameSize, codec: VideoCodec },
    /// One encoded frame.
    Data(&'a [u8]),
    /// Capabilities supported by the agent, indexed by capability number.
    Capabilities(&'a [bool]),
    DeviceDisplayInfo(&'a DeviceDisplayInfo),
    CursorSet(CursorSet<'a>),
}

impl<'a> OutboundMessage<'a> {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Format { .. }       => MessageType::Format,
            Self::Data(_)             => MessageType::Data,
            Self::Capabilities(_)     => MessageType::Capabilities,
            Self::DeviceDisplayInfo(_) => MessageType::DeviceDisplayInfo,
            Self::CursorSet(_)        => MessageType::CursorSet,
        }
    }

    /// Bytes following the common header.
    pub fn payload_size(&self) -> usize {
        match self {
            Self::Format { .. } => FORMAT_SIZE,
            Self::Data(frame) => frame.len(),
            Self::Capabilities(caps) => caps.len().div_ceil(8),
            Self::DeviceDisplayInfo(info) => {
                DEVICE_DISPLAY_INFO_SIZE + device_address(info).len() + 1
            }
            Self::CursorSet(cursor) => CursorSet::size(cursor.pixels.len()),
        }
    }

    /// Header plus everything except a `Data` frame body, which is written
    /// straight from the borrowed buffer.
    pub fn encode_head(&self) -> BytesMut {
        let inline = match self {
            Self::Data(_) => 0,
            _ => self.payload_size(),
        };
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + inline);

        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0);
        buf.put_u16_le(self.msg_type() as u16);
        buf.put_u32_le(self.payload_size() as u32);

        match self {
            Self::Format { size, codec } => {
                buf.put_u32_le(size.width);
                buf.put_u32_le(size.height);
                buf.put_u8(codec.wire_id());
                buf.put_bytes(0, 3);
            }
            Self::Data(_) => {}
            Self::Capabilities(caps) => {
                let mut bitmap = vec![0u8; caps.len().div_ceil(8)];
                for (i, _) in caps.iter().enumerate().filter(|(_, on)| **on) {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
                buf.put_slice(&bitmap);
            }
            Self::DeviceDisplayInfo(info) => {
                let address = device_address(info);
                if address.len() < info.device_address.len() {
                    warn!(
                        "device address of stream id {} is longer than {} bytes, trimming.",
                        info.stream_id, MAX_DEVICE_ADDRESS_LEN
                    );
                }
                buf.put_u32_le(info.stream_id);
                buf.put_u32_le(info.device_display_id);
                buf.put_u32_le(address.len() as u32 + 1);
                buf.put_slice(address);
                buf.put_u8(0);
            }
            Self::CursorSet(cursor) => {
                buf.put_u16_le(cursor.width);
                buf.put_u16_le(cursor.height);
                buf.put_u16_le(cursor.hot_x);
                buf.put_u16_le(cursor.hot_y);
                buf.put_u8(CURSOR_TYPE_ALPHA);
                buf.put_bytes(0, 3);
                for pixel in cursor.pixels {
                    buf.put_u32_le(*pixel);
                }
            }
        }
        buf
    }

    /// Write the whole message: header and fixed part first, then the body.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode_head())?;
        if let Self::Data(frame) = self {
            w.write_all(frame)?;
        }
        Ok(())
    }
}

fn device_address(info: &DeviceDisplayInfo) -> &[u8] {
    let bytes = info.device_address.as_bytes();
    &bytes[..bytes.len().min(MAX_DEVICE_ADDRESS_LEN)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gueststream_core::ErrorKind;

    fn header(bytes: &[u8]) -> (u8, u16, u32) {
        (
            bytes[0],
            u16::from_le_bytes([bytes[2], bytes[3]]),
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        )
    }

    #[test]
    fn oversized_cursor_is_rejected() {
        let pixels = vec![0u32; 4];
        let err = CursorSet::new(MAX_CURSOR_WIDTH, 1, 0, 0, &pixels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cursor);
        assert!(err.message().contains("width"));

        let err = CursorSet::new(1, MAX_CURSOR_HEIGHT + 10, 0, 0, &pixels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cursor);
        assert!(err.message().contains("height"));
    }

    #[test]
    fn pixel_count_must_match_dimensions() {
        let pixels = vec![0u32; 3];
        assert!(CursorSet::new(2, 2, 0, 0, &pixels).is_err());
    }

    #[test]
    fn cursor_set_layout() {
        let pixels: Vec<u32> = (0..6).map(|i| 0xff00_0000 | i).collect();
        let cursor = CursorSet::new(3, 2, 1, 2, &pixels).unwrap();
        let msg = OutboundMessage::CursorSet(cursor);
        assert_eq!(msg.payload_size(), 12 + 4 * 6);

        let mut wire = Vec::new();
        msg.write_to(&mut wire).unwrap();
        assert_eq!(wire.len(), HEADER_SIZE + msg.payload_size());
        assert_eq!(header(&wire), (PROTOCOL_VERSION, MessageType::CursorSet as u16, 36));

        let body = &wire[HEADER_SIZE..];
        assert_eq!(u16::from_le_bytes([body[0], body[1]]), 3);
        assert_eq!(u16::from_le_bytes([body[2], body[3]]), 2);
        assert_eq!(u16::from_le_bytes([body[4], body[5]]), 1);
        assert_eq!(u16::from_le_bytes([body[6], body[7]]), 2);
        assert_eq!(body[8], CURSOR_TYPE_ALPHA);
        assert_eq!(u32::from_le_bytes(body[12..16].try_into().unwrap()), 0xff00_0000);
        assert_eq!(u32::from_le_bytes(body[32..36].try_into().unwrap()), 0xff00_0005);
    }

    #[test]
    fn format_layout() {
        let msg = OutboundMessage::Format { size: FrameSize::new(1920, 1080), codec: VideoCodec::H264 };
        let mut wire = Vec::new();
        msg.write_to(&mut wire).unwrap();
        assert_eq!(header(&wire), (1, MessageType::Format as u16, 12));
        assert_eq!(&wire[8..12], &1920u32.to_le_bytes());
        assert_eq!(&wire[12..16], &1080u32.to_le_bytes());
        assert_eq!(wire[16], VideoCodec::H264.wire_id());
    }

    #[test]
    fn data_follows_header() {
        let frame = [9u8, 8, 7, 6, 5];
        let msg = OutboundMessage::Data(&frame);
        assert_eq!(msg.encode_head().len(), HEADER_SIZE);

        let mut wire = Vec::new();
        msg.write_to(&mut wire).unwrap();
        assert_eq!(header(&wire), (1, MessageType::Data as u16, 5));
        assert_eq!(&wire[HEADER_SIZE..], &frame);
    }

    #[test]
    fn device_address_is_nul_terminated_and_trimmed() {
        let info = DeviceDisplayInfo {
            stream_id: 0,
            device_address: "pci/0000/02.0".into(),
            device_display_id: 1,
            descriptor: String::new(),
        };
        let msg = OutboundMessage::DeviceDisplayInfo(&info);
        let wire = msg.encode_head();
        assert_eq!(msg.payload_size(), 12 + 13 + 1);
        assert_eq!(u32::from_le_bytes(wire[16..20].try_into().unwrap()), 14);
        assert_eq!(&wire[20..33], b"pci/0000/02.0");
        assert_eq!(wire[33], 0);

        let long = DeviceDisplayInfo { device_address: "x".repeat(300), ..info };
        let msg = OutboundMessage::DeviceDisplayInfo(&long);
        assert_eq!(msg.payload_size(), 12 + 255 + 1);
    }

    #[test]
    fn capabilities_bitmap() {
        let caps = [true, false, false, true, false, false, false, false, true];
        let msg = OutboundMessage::Capabilities(&caps);
        let wire = msg.encode_head();
        assert_eq!(msg.payload_size(), 2);
        assert_eq!(&wire[HEADER_SIZE..], &[0b0000_1001, 0b0000_0001]);

        assert_eq!(OutboundMessage::Capabilities(&[]).payload_size(), 0);
    }
}
