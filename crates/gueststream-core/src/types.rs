use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

// ── VideoCodec ────────────────────────────────────────────────────────────────

/// Codecs the host side of the stream protocol knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Mjpeg,
    Vp8,
    H264,
    Vp9,
    H265,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 5] = [Self::Mjpeg, Self::Vp8, Self::H264, Self::Vp9, Self::H265];

    /// Token used in `gst.<codec>` configuration keys.
    pub fn token(self) -> &'static str {
        match self {
            Self::Mjpeg => "mjpeg",
            Self::Vp8   => "vp8",
            Self::H264  => "h264",
            Self::Vp9   => "vp9",
            Self::H265  => "h265",
        }
    }

    /// Codec identifier carried in `Format` and `StartStop` messages.
    pub fn wire_id(self) -> u8 {
        match self {
            Self::Mjpeg => 1,
            Self::Vp8   => 2,
            Self::H264  => 3,
            Self::Vp9   => 4,
            Self::H265  => 5,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.wire_id() == id)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for VideoCodec {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.token() == s)
            .ok_or_else(|| AgentError::configuration(format!("Invalid value '{s}' for GStreamer codec.")))
    }
}

// ── FrameSize / FrameInfo ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    pub width:  u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Drop the last column/row of odd dimensions; several encoders refuse
    /// odd sizes.
    pub fn even(self) -> Self {
        Self { width: self.width & !1, height: self.height & !1 }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One encoded frame, borrowed from the capture pipeline.
///
/// The buffer stays mapped until the next capture call or until the pipeline
/// is dropped; the borrow on the pipeline enforces that.
#[derive(Debug)]
pub struct FrameInfo<'a> {
    pub buffer:       &'a [u8],
    pub size:         FrameSize,
    /// First frame of a new encoded stream (startup or resize).
    pub stream_start: bool,
}

// ── DeviceDisplayInfo ─────────────────────────────────────────────────────────

/// Association between a stream and a display device output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDisplayInfo {
    pub stream_id:         u32,
    /// Hardware path of the device, e.g. `pci/0000/02.0`; empty when unknown.
    pub device_address:    String,
    pub device_display_id: u32,
    /// Human readable output descriptor, e.g. `Virtual-1 1920x1080+0+0`.
    pub descriptor:        String,
}

impl fmt::Display for DeviceDisplayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream id {}: device address: {}, device display id: {} ({})",
            self.stream_id, self.device_address, self.device_display_id, self.descriptor
        )
    }
}

// ── CursorImage ───────────────────────────────────────────────────────────────

/// A cursor shape as reported by the display server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width:  u16,
    pub height: u16,
    pub hot_x:  u16,
    pub hot_y:  u16,
    /// Premultiplied ARGB, one `u32` per pixel, row-major.
    pub pixels: Vec<u32>,
    /// Change serial assigned by the display server.
    pub serial: u32,
}
