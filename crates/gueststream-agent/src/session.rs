//! The streaming session: waits for the host to ask for a stream, then
//! captures and sends frames until told to stop.
//!
//! Runs on a blocking thread because every frame blocks on the encoder.
//! Host commands arrive over an mpsc channel fed by the command reader
//! thread; the signal handler uses the same channel to ask for [`Command::Quit`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gueststream_core::{AgentError, ErrorKind, VideoCodec};
use gueststream_transport::{InboundMessage, OutboundMessage, PortReader, StreamPort, CAPABILITY_COUNT};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::frame_log::FrameLog;
use crate::plugin::FrameCapture;
use crate::registry::Registry;

/// Pause before rebuilding a pipeline that failed mid-stream.
pub const REBUILD_DELAY: Duration = Duration::from_secs(1);

const AGENT_CAPABILITIES: [bool; CAPABILITY_COUNT] = [false; CAPABILITY_COUNT];

#[derive(Debug)]
pub enum Command {
    Host(InboundMessage),
    /// The command reader stopped; the session cannot continue.
    PortClosed(AgentError),
    Quit,
}

/// Forward every host command to `tx` from a dedicated thread.
pub fn spawn_command_reader(
    mut reader: PortReader,
    tx: mpsc::Sender<Command>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("command-reader".into()).spawn(move || loop {
        let cmd = match reader.receive() {
            Ok(msg) => Command::Host(msg),
            Err(e) => Command::PortClosed(e),
        };
        let closed = matches!(cmd, Command::PortClosed(_));
        if tx.blocking_send(cmd).is_err() || closed {
            break;
        }
    })
}

/// How one streaming run ended.
enum StreamEnd {
    /// Host stop or quit request.
    Stopped,
    /// The pipeline or the port failed; rebuild and carry on.
    Failed(AgentError),
}

pub struct Session {
    port:          Arc<StreamPort>,
    commands:      mpsc::Receiver<Command>,
    registry:      Registry,
    frame_log:     FrameLog,
    rebuild_delay: Duration,
    streaming:     bool,
    quit:          bool,
    client_codecs: BTreeSet<VideoCodec>,
    frame_count:   u64,
}

impl Session {
    pub fn new(
        port: Arc<StreamPort>,
        commands: mpsc::Receiver<Command>,
        registry: Registry,
        frame_log: FrameLog,
    ) -> Self {
        Self {
            port,
            commands,
            registry,
            frame_log,
            rebuild_delay: REBUILD_DELAY,
            streaming: false,
            quit: false,
            client_codecs: BTreeSet::new(),
            frame_count: 0,
        }
    }

    pub fn with_rebuild_delay(mut self, delay: Duration) -> Self {
        self.rebuild_delay = delay;
        self
    }

    /// Run until [`Command::Quit`]. Errors are fatal to the agent.
    pub fn run(mut self) -> Result<(), AgentError> {
        while !self.quit {
            while !self.quit && !self.streaming {
                self.wait_command()?;
            }
            if self.quit {
                break;
            }

            info!("streaming starts now");
            let mut capture = self.registry.best_capture(&self.client_codecs).ok_or_else(|| {
                AgentError::construction("cannot find a suitable capture system")
            })?;
            self.send_display_info(capture.as_ref())?;

            match self.stream(capture.as_mut())? {
                StreamEnd::Stopped => info!("streaming stopped"),
                StreamEnd::Failed(e) => {
                    error!("streaming interrupted: {}", e);
                    drop(capture);
                    thread::sleep(self.rebuild_delay);
                }
            }
        }
        info!("session finished after {} frames", self.frame_count);
        Ok(())
    }

    fn send_display_info(&self, capture: &dyn FrameCapture) -> Result<(), AgentError> {
        let infos = capture.device_display_info();
        debug!("Got device info of {} devices from the plugin", infos.len());
        for info in &infos {
            debug!("   {}", info);
        }

        match infos.first() {
            Some(first) => {
                if infos.len() > 1 {
                    warn!(
                        "the capture plugin returned device display info for more than one \
                         display device, but only a single device is supported. Sending \
                         information for the first device to the server."
                    );
                }
                self.port.send(&OutboundMessage::DeviceDisplayInfo(first))
            }
            None => {
                error!("Empty device display info from the plugin");
                Ok(())
            }
        }
    }

    fn stream(&mut self, capture: &mut dyn FrameCapture) -> Result<StreamEnd, AgentError> {
        let codec = capture.video_codec_type();
        let mut time_last = Instant::now();

        while !self.quit && self.streaming {
            if let Err(e) = self.send_frame(capture, codec, &mut time_last) {
                return Ok(StreamEnd::Failed(e));
            }
            self.drain_commands()?;
        }
        Ok(StreamEnd::Stopped)
    }

    fn send_frame(
        &mut self,
        capture: &mut dyn FrameCapture,
        codec: VideoCodec,
        time_last: &mut Instant,
    ) -> Result<(), AgentError> {
        self.frame_count += 1;
        if self.frame_count % 100 == 0 {
            debug!("SENT {} frames", self.frame_count);
        }

        let time_before = Instant::now();
        self.frame_log.log_stat(format_args!("Capturing frame..."));
        let frame = capture.capture_frame()?;
        self.frame_log.log_stat(format_args!("Captured frame"));

        let time_after = Instant::now();
        debug!(
            "got a frame -- size is {} ({} ms) ({} ms from last frame)",
            frame.buffer.len(),
            (time_after - time_before).as_millis(),
            (time_after - *time_last).as_millis(),
        );
        *time_last = time_after;

        if frame.stream_start {
            debug!("wXh {} codec={}", frame.size, codec);
            self.frame_log.log_stat(format_args!(
                "Started new stream wXh {}X{} codec={}",
                frame.size.width,
                frame.size.height,
                codec.wire_id()
            ));
            self.port.send(&OutboundMessage::Format { size: frame.size, codec })?;
        }

        self.frame_log.log_stat(format_args!("Frame of {} bytes", frame.buffer.len()));
        self.frame_log.log_frame(frame.buffer);
        self.port.send(&OutboundMessage::Data(frame.buffer))?;
        self.frame_log.log_stat(format_args!("Sent frame"));
        Ok(())
    }

    fn wait_command(&mut self) -> Result<(), AgentError> {
        match self.commands.blocking_recv() {
            Some(cmd) => self.handle_command(cmd),
            None => Err(AgentError::new(ErrorKind::Io, "command channel closed")),
        }
    }

    fn drain_commands(&mut self) -> Result<(), AgentError> {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(AgentError::new(ErrorKind::Io, "command channel closed"))
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Result<(), AgentError> {
        match cmd {
            Command::Quit => self.quit = true,
            Command::PortClosed(e) => return Err(e),
            Command::Host(InboundMessage::Capabilities(_)) => {
                self.port.send(&OutboundMessage::Capabilities(&AGENT_CAPABILITIES))?;
            }
            Command::Host(InboundMessage::NotifyError { error_code, message }) => {
                error!("Received NotifyError message from the server: {} - {}", error_code, message);
            }
            Command::Host(InboundMessage::StartStop { codecs }) => {
                self.streaming = !codecs.is_empty();
                info!(
                    "GOT START_STOP message -- request to {} streaming",
                    if self.streaming { "START" } else { "STOP" }
                );
                self.client_codecs = codecs;
            }
        }
        Ok(())
    }
}
