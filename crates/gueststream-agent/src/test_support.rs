//! In-memory stream port and screen shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use gueststream_core::{AgentError, DeviceDisplayInfo, FrameSize};
use gueststream_transport::HEADER_SIZE;

use crate::capture::ScreenSource;

#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// `(type, payload)` of every complete message written so far.
    pub fn messages(&self) -> Vec<(u16, Vec<u8>)> {
        let data = self.contents();
        let mut out = Vec::new();
        let mut rest = &data[..];
        while rest.len() >= HEADER_SIZE {
            let msg_type = u16::from_le_bytes([rest[2], rest[3]]);
            let size = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
            let end = HEADER_SIZE + size;
            out.push((msg_type, rest[HEADER_SIZE..end].to_vec()));
            rest = &rest[end..];
        }
        out
    }

    pub fn message_types(&self) -> Vec<u16> {
        self.messages().into_iter().map(|(t, _)| t).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serves scripted sizes with a flat grey image; the last size repeats.
pub struct ScriptedScreen {
    sizes: VecDeque<FrameSize>,
    last:  FrameSize,
}

impl ScriptedScreen {
    pub fn new(sizes: &[(u32, u32)]) -> Self {
        Self {
            sizes: sizes.iter().map(|&(w, h)| FrameSize::new(w, h)).collect(),
            last:  FrameSize::new(64, 48),
        }
    }
}

impl ScreenSource for ScriptedScreen {
    fn size(&mut self) -> Result<FrameSize, AgentError> {
        if let Some(next) = self.sizes.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }

    fn grab(&mut self, size: FrameSize) -> Result<Vec<u8>, AgentError> {
        Ok(vec![0x80; size.width as usize * size.height as usize * 4])
    }

    fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
        vec![DeviceDisplayInfo { descriptor: "fake 64x48+0+0".into(), ..Default::default() }]
    }
}
