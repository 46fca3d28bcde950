//! Commands sent by the host.

use std::collections::BTreeSet;
use std::io::Read;

use bytes::Buf;
use gueststream_core::{AgentError, VideoCodec};
use tracing::debug;

use crate::{MessageType, HEADER_SIZE, MAX_INBOUND_PAYLOAD, PROTOCOL_VERSION};

const MAX_ERROR_MESSAGE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Capability bitmap of the host.
    Capabilities(Vec<u8>),
    NotifyError { error_code: u32, message: String },
    /// Start streaming with one of `codecs`, or stop when the set is empty.
    StartStop { codecs: BTreeSet<VideoCodec> },
}

impl InboundMessage {
    /// Block until a complete message has been read.
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, AgentError> {
        let mut head = [0u8; HEADER_SIZE];
        r.read_exact(&mut head)?;

        let mut head = &head[..];
        let version = head.get_u8();
        let _padding = head.get_u8();
        let msg_type = head.get_u16_le();
        let size = head.get_u32_le() as usize;

        if version != PROTOCOL_VERSION {
            return Err(AgentError::protocol(format!(
                "Unsupported protocol version {version} (expected {PROTOCOL_VERSION})"
            )));
        }
        if size > MAX_INBOUND_PAYLOAD {
            return Err(AgentError::protocol(format!(
                "Message of type {msg_type} too big: {size} bytes"
            )));
        }

        let mut payload = vec![0u8; size];
        r.read_exact(&mut payload)?;
        debug!("received message type={} size={}", msg_type, size);

        match MessageType::try_from(msg_type) {
            Ok(MessageType::Capabilities) => Ok(Self::Capabilities(payload)),
            Ok(MessageType::NotifyError) => Self::parse_notify_error(&payload),
            Ok(MessageType::StartStop) => Self::parse_start_stop(&payload),
            _ => Err(AgentError::protocol(format!("UNKNOWN msg of type {msg_type}"))),
        }
    }

    fn parse_notify_error(mut payload: &[u8]) -> Result<Self, AgentError> {
        if payload.remaining() < 4 {
            return Err(AgentError::protocol("NotifyError message too short"));
        }
        let error_code = payload.get_u32_le();
        let text = &payload[..payload.len().min(MAX_ERROR_MESSAGE_LEN)];
        let text = text.split(|b| *b == 0).next().unwrap_or_default();
        Ok(Self::NotifyError { error_code, message: String::from_utf8_lossy(text).into_owned() })
    }

    fn parse_start_stop(mut payload: &[u8]) -> Result<Self, AgentError> {
        if !payload.has_remaining() {
            return Err(AgentError::protocol("StartStop message too short"));
        }
        let num_codecs = payload.get_u8() as usize;
        if payload.remaining() < num_codecs {
            return Err(AgentError::protocol(format!(
                "StartStop message announces {num_codecs} codecs but carries {}",
                payload.remaining()
            )));
        }
        let codecs = payload[..num_codecs]
            .iter()
            .filter_map(|id| VideoCodec::from_wire_id(*id))
            .collect();
        Ok(Self::StartStop { codecs })
    }
}
