//! GStreamer capture pipeline.
//!
//! ```text
//! appsrc "capture" (BGRx samples grabbed from the screen)
//!   → video/x-raw,framerate=<fps>/1
//!   → videoconvert
//!   → <selected encoder>
//!   → <codec target caps>
//!   → appsink "sink" (sync=false drop=false max-buffers=1)
//! ```
//!
//! Frames are pulled synchronously: every [`GstCapture::capture_frame`] grabs
//! one screen image, pushes it and blocks until the encoder hands back one
//! sample.

use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use gueststream_capture_x11::X11Screen;
use gueststream_core::{
    AgentError, DeviceDisplayInfo, EncoderSettings, FrameInfo, FrameSize, VideoCodec,
};
use tracing::{debug, info};

use crate::encoder::select_encoder;
use crate::plugin::FrameCapture;

// ── ScreenSource ──────────────────────────────────────────────────────────────

/// Where the raw frames come from.
pub trait ScreenSource: Send {
    /// Current size of the screen.
    fn size(&mut self) -> Result<FrameSize, AgentError>;
    /// Grab `size` pixels as BGRx.
    fn grab(&mut self, size: FrameSize) -> Result<Vec<u8>, AgentError>;
    fn device_display_info(&self) -> Vec<DeviceDisplayInfo>;
}

impl ScreenSource for X11Screen {
    fn size(&mut self) -> Result<FrameSize, AgentError> {
        X11Screen::size(self)
    }

    fn grab(&mut self, size: FrameSize) -> Result<Vec<u8>, AgentError> {
        X11Screen::grab(self, size)
    }

    fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
        X11Screen::device_display_info(self)
    }
}

// ── StreamTracker ─────────────────────────────────────────────────────────────

/// Tracks the screen size across frames and tells when the encoded stream has
/// to start over.
#[derive(Debug, Default)]
pub(crate) struct StreamTracker {
    last_size: Option<FrameSize>,
    is_first:  bool,
}

impl StreamTracker {
    /// Record the size of the next frame. Returns `true` when it differs from
    /// the previous one (or there was none) and the encoder must be restarted.
    pub(crate) fn observe(&mut self, size: FrameSize) -> bool {
        if self.last_size == Some(size) {
            return false;
        }
        self.last_size = Some(size);
        self.is_first = true;
        true
    }

    /// Whether the frame about to be returned starts a new stream. Only the
    /// first call after a restart answers `true`.
    pub(crate) fn take_stream_start(&mut self) -> bool {
        std::mem::replace(&mut self.is_first, false)
    }
}

// ── GstCapture ────────────────────────────────────────────────────────────────

pub struct GstCapture {
    settings:  EncoderSettings,
    source:    Box<dyn ScreenSource>,
    pipeline:  gstreamer::Pipeline,
    appsrc:    AppSrc,
    appsink:   AppSink,
    /// Buffer handed out by the last `capture_frame`, unmapped on the next call.
    mapped:    Option<gstreamer::MappedBuffer<gstreamer::buffer::Readable>>,
    stream:    StreamTracker,
}

impl GstCapture {
    /// Build a pipeline grabbing the X11 root window.
    pub fn new(settings: &EncoderSettings) -> Result<Self, AgentError> {
        let screen = X11Screen::open()?;
        Self::with_source(settings, Box::new(screen))
    }

    /// Build and start the pipeline. On error nothing is left running.
    pub fn with_source(
        settings: &EncoderSettings,
        source: Box<dyn ScreenSource>,
    ) -> Result<Self, AgentError> {
        gstreamer::init()
            .map_err(|e| AgentError::construction(format!("GStreamer init failed: {e}")))?;

        let pipeline = gstreamer::Pipeline::with_name("pipeline");

        let appsrc = AppSrc::builder()
            .name("capture")
            .format(gstreamer::Format::Time)
            .build();

        let convert = gstreamer::ElementFactory::make("videoconvert")
            .name("convert")
            .build()
            .map_err(|e| {
                AgentError::construction(format!(
                    "Gstreamer's 'videoconvert' element cannot be created: {e}"
                ))
            })?;

        let (encoder, sink_caps) = select_encoder(settings)?;

        let appsink = AppSink::builder()
            .name("sink")
            .sync(false)
            .drop(false)
            .max_buffers(1)
            .build();

        pipeline
            .add_many([appsrc.upcast_ref(), &convert, &encoder, appsink.upcast_ref()])
            .map_err(|e| {
                AgentError::construction(format!(
                    "Gstreamer's element cannot be added to pipeline: {e}"
                ))
            })?;

        let convert_caps = gstreamer::Caps::builder("video/x-raw")
            .field("framerate", gstreamer::Fraction::new(settings.fps as i32, 1))
            .build();
        appsrc
            .link_filtered(&convert, &convert_caps)
            .and_then(|_| convert.link(&encoder))
            .and_then(|_| encoder.link_filtered(&appsink, &sink_caps))
            .map_err(|e| {
                AgentError::construction(format!("Linking gstreamer's elements failed: {e}"))
            })?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(AgentError::construction(format!("Starting capture pipeline: {e}")));
        }
        info!("{} capture pipeline playing ({} fps)", settings.codec, settings.fps);

        Ok(Self {
            settings: settings.clone(),
            source,
            pipeline,
            appsrc,
            appsink,
            mapped: None,
            stream: StreamTracker::default(),
        })
    }

    fn push_screen(&mut self) -> Result<FrameSize, AgentError> {
        // Several encoders refuse odd dimensions.
        let size = self.source.size()?.even();

        if self.stream.observe(size) {
            debug!("screen size changed to {}", size);
            // Flushes the old stream so the encoder starts over at the new size.
            let _ = self.appsrc.end_of_stream();
            self.pipeline
                .set_state(gstreamer::State::Null)
                .and_then(|_| self.pipeline.set_state(gstreamer::State::Playing))
                .map_err(|e| AgentError::stream(format!("Restarting pipeline: {e}")))?;
        }

        let data = self.source.grab(size)?;
        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format(gstreamer_video::VideoFormat::Bgrx)
            .width(size.width as i32)
            .height(size.height as i32)
            .framerate(gstreamer::Fraction::new(self.settings.fps as i32, 1))
            .build();
        let buffer = gstreamer::Buffer::from_mut_slice(data);
        let sample = gstreamer::Sample::builder().buffer(&buffer).caps(&caps).build();

        self.appsrc
            .push_sample(&sample)
            .map_err(|e| AgentError::stream(format!("appsrc cannot push sample: {e:?}")))?;
        Ok(size)
    }
}

impl FrameCapture for GstCapture {
    fn capture_frame(&mut self) -> Result<FrameInfo<'_>, AgentError> {
        self.mapped = None;

        let size = self.push_screen()?;

        let sample = self
            .appsink
            .pull_sample()
            .map_err(|_| AgentError::stream("No sample- EOS or state change"))?;
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| AgentError::stream("Sample carries no buffer"))?;
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| AgentError::stream("Cannot map encoded buffer"))?;

        let stream_start = self.stream.take_stream_start();
        let mapped = self.mapped.insert(mapped);
        Ok(FrameInfo { buffer: mapped.as_slice(), size, stream_start })
    }

    fn video_codec_type(&self) -> VideoCodec {
        self.settings.codec
    }

    fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
        self.source.device_display_info()
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.mapped = None;
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        debug!("capture pipeline stopped");
    }
}
