//! The stream port: one byte stream shared by every writer in the agent.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use gueststream_core::{AgentError, ErrorKind};
use tracing::{debug, info};

use crate::inbound::InboundMessage;
use crate::messages::OutboundMessage;

/// Write side of the stream device.
///
/// `send` holds the lock for the whole message, so messages from the frame
/// loop and the cursor watcher never interleave on the wire.
pub struct StreamPort {
    writer: Mutex<Box<dyn Write + Send>>,
}

/// Read side of the stream device, owned by the command reader.
pub struct PortReader {
    reader: Box<dyn Read + Send>,
}

impl StreamPort {
    /// Open the virtio port at `path` for reading and writing.
    pub fn open(path: &Path) -> Result<(Self, PortReader), AgentError> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| {
            AgentError::new(ErrorKind::Io, format!("Cannot open stream port {}: {e}", path.display()))
        })?;
        let read_half: File = file.try_clone()?;
        info!("Stream port {} opened", path.display());
        Ok((Self::from_writer(file), PortReader::from_reader(read_half)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self { writer: Mutex::new(Box::new(writer)) }
    }

    /// Write one complete message.
    pub fn send(&self, msg: &OutboundMessage<'_>) -> Result<(), AgentError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AgentError::new(ErrorKind::Io, "stream port writer poisoned"))?;
        msg.write_to(&mut **writer).map_err(|e| {
            AgentError::new(ErrorKind::Io, format!("Failed to write {:?} message: {e}", msg.msg_type()))
        })?;
        writer.flush()?;
        debug!("sent {:?} ({} payload bytes)", msg.msg_type(), msg.payload_size());
        Ok(())
    }
}

impl PortReader {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self { reader: Box::new(reader) }
    }

    /// Block until the host sends the next command.
    pub fn receive(&mut self) -> Result<InboundMessage, AgentError> {
        InboundMessage::read_from(&mut *self.reader)
    }
}
