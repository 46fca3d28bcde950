//! Built-in MJPEG fallback.
//!
//! Grabs the screen and compresses each frame with the `image` JPEG encoder,
//! paced to the configured frame rate. Ranked below every GStreamer encoder so
//! it is only used when none of them can be built.
//!
//! Options:
//!
//! | Key | Range | Default |
//! |-----|-------|---------|
//! | `framerate` | > 0 | 10 |
//! | `mjpeg.quality` | 1..=100 | 80 |

use std::io::Cursor;
use std::thread;
use std::time::{Duration, Instant};

use gueststream_capture_x11::X11Screen;
use gueststream_core::{
    AgentError, ConfigureOption, DeviceDisplayInfo, FrameInfo, FrameSize, VideoCodec,
};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use tracing::{debug, error, info};

use crate::capture::{ScreenSource, StreamTracker};
use crate::plugin::{FrameCapture, Plugin, Rank};
use crate::registry::Registry;

pub const QUALITY_OPTION: &str = "mjpeg.quality";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MjpegSettings {
    pub fps:     u32,
    pub quality: u8,
}

impl Default for MjpegSettings {
    fn default() -> Self {
        Self { fps: 10, quality: 80 }
    }
}

impl MjpegSettings {
    /// Pick `framerate` and `mjpeg.quality` out of the agent options; other
    /// keys are ignored. Later occurrences override earlier ones.
    pub fn parse(options: &[ConfigureOption]) -> Result<Self, AgentError> {
        let mut settings = Self::default();
        for option in options {
            match option.name.as_str() {
                "framerate" => {
                    settings.fps = option
                        .value
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|fps| *fps > 0)
                        .ok_or_else(|| invalid(option))?;
                }
                QUALITY_OPTION => {
                    settings.quality = option
                        .value
                        .trim()
                        .parse::<u8>()
                        .ok()
                        .filter(|q| (1..=100).contains(q))
                        .ok_or_else(|| invalid(option))?;
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }
}

fn invalid(option: &ConfigureOption) -> AgentError {
    AgentError::configuration(format!(
        "Invalid value '{}' for option '{}'.",
        option.value, option.name
    ))
}

// ── MjpegPlugin ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MjpegPlugin {
    settings: MjpegSettings,
}

impl MjpegPlugin {
    pub fn new(settings: MjpegSettings) -> Self {
        Self { settings }
    }
}

impl Plugin for MjpegPlugin {
    fn create_capture(&self) -> Result<Box<dyn FrameCapture>, AgentError> {
        let screen = X11Screen::open()?;
        Ok(Box::new(MjpegCapture::with_source(self.settings, Box::new(screen))))
    }

    fn rank(&self) -> Rank {
        Rank::FALLBACK_MIN
    }

    fn video_codec_type(&self) -> VideoCodec {
        VideoCodec::Mjpeg
    }
}

/// Register the fallback plugin. Invalid options are logged and nothing is
/// registered. Returns the number of plugins registered.
pub fn register_mjpeg_plugin(registry: &mut Registry) -> usize {
    match MjpegSettings::parse(registry.options()) {
        Ok(settings) => {
            info!(
                "MJPEG fallback registered ({} fps, quality {})",
                settings.fps, settings.quality
            );
            registry.register(Box::new(MjpegPlugin::new(settings)));
            1
        }
        Err(e) => {
            error!("MJPEG fallback not registered: {}", e);
            0
        }
    }
}

// ── MjpegCapture ──────────────────────────────────────────────────────────────

pub struct MjpegCapture {
    settings:   MjpegSettings,
    source:     Box<dyn ScreenSource>,
    stream:     StreamTracker,
    /// JPEG handed out by the last `capture_frame`.
    frame:      Vec<u8>,
    next_frame: Option<Instant>,
}

impl MjpegCapture {
    pub fn with_source(settings: MjpegSettings, source: Box<dyn ScreenSource>) -> Self {
        Self {
            settings,
            source,
            stream: StreamTracker::default(),
            frame: Vec::new(),
            next_frame: None,
        }
    }

    fn wait_for_next_frame(&mut self) {
        if let Some(next) = self.next_frame {
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }
        self.next_frame = Some(Instant::now() + self.settings.frame_interval());
    }

    fn encode(&mut self, bgrx: &[u8], size: FrameSize) -> Result<(), AgentError> {
        let rgb: Vec<u8> = bgrx.chunks_exact(4).flat_map(|px| [px[2], px[1], px[0]]).collect();
        let image: RgbImage = ImageBuffer::from_raw(size.width, size.height, rgb)
            .ok_or_else(|| AgentError::stream(format!("Short screen image for {size}")))?;

        let mut jpeg = Cursor::new(std::mem::take(&mut self.frame));
        jpeg.get_mut().clear();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.settings.quality);
        image
            .write_with_encoder(encoder)
            .map_err(|e| AgentError::stream(format!("JPEG encode failed: {e}")))?;
        self.frame = jpeg.into_inner();
        Ok(())
    }
}

impl FrameCapture for MjpegCapture {
    fn capture_frame(&mut self) -> Result<FrameInfo<'_>, AgentError> {
        self.wait_for_next_frame();

        let size = self.source.size()?.even();
        if self.stream.observe(size) {
            debug!("screen size changed to {}", size);
        }
        let data = self.source.grab(size)?;
        self.encode(&data, size)?;

        Ok(FrameInfo {
            buffer:       &self.frame,
            size,
            stream_start: self.stream.take_stream_start(),
        })
    }

    fn video_codec_type(&self) -> VideoCodec {
        VideoCodec::Mjpeg
    }

    fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
        self.source.device_display_info()
    }
}

#[cfg(test)]
mod tests {
    use gueststream_core::ErrorKind;
    use image::GenericImageView;

    use super::*;
    use crate::test_support::ScriptedScreen;

    fn opts(list: &[(&str, &str)]) -> Vec<ConfigureOption> {
        list.iter().map(|&(n, v)| ConfigureOption::new(n, v)).collect()
    }

    fn capture(sizes: &[(u32, u32)]) -> MjpegCapture {
        let settings = MjpegSettings { fps: 100, quality: 50 };
        MjpegCapture::with_source(settings, Box::new(ScriptedScreen::new(sizes)))
    }

    #[test]
    fn settings_default_to_ten_fps_quality_eighty() {
        let settings = MjpegSettings::parse(&opts(&[("gst.h264", "auto")])).unwrap();
        assert_eq!(settings, MjpegSettings { fps: 10, quality: 80 });
    }

    #[test]
    fn settings_read_framerate_and_quality() {
        let settings =
            MjpegSettings::parse(&opts(&[("framerate", "30"), ("mjpeg.quality", "95")])).unwrap();
        assert_eq!(settings, MjpegSettings { fps: 30, quality: 95 });
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let cases = [
            ("framerate", "0"),
            ("mjpeg.quality", "0"),
            ("mjpeg.quality", "101"),
            ("mjpeg.quality", "best"),
        ];
        for (name, value) in cases {
            let err = MjpegSettings::parse(&opts(&[(name, value)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{name}={value}");
        }
    }

    #[test]
    fn bad_quality_registers_nothing() {
        let mut registry = Registry::new(opts(&[("mjpeg.quality", "0")]));
        assert_eq!(register_mjpeg_plugin(&mut registry), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn registered_as_mjpeg_fallback() {
        let mut registry = Registry::new(Vec::new());
        assert_eq!(register_mjpeg_plugin(&mut registry), 1);
        let plugin = registry.plugins().next().unwrap();
        assert_eq!(plugin.video_codec_type(), VideoCodec::Mjpeg);
        assert_eq!(plugin.rank(), Rank::FALLBACK_MIN);
    }

    #[test]
    fn frames_are_jpeg_of_the_screen_size() {
        let mut capture = capture(&[(64, 48)]);
        let frame = capture.capture_frame().unwrap();
        assert_eq!(frame.size, FrameSize::new(64, 48));
        assert!(frame.stream_start);
        assert_eq!(&frame.buffer[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory_with_format(frame.buffer, image::ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn resize_restarts_stream() {
        let mut capture = capture(&[(64, 48), (64, 48), (33, 17), (33, 17)]);
        let mut starts = Vec::new();
        for _ in 0..4 {
            let frame = capture.capture_frame().unwrap();
            starts.push((frame.size, frame.stream_start));
        }
        assert_eq!(
            starts,
            vec![
                (FrameSize::new(64, 48), true),
                (FrameSize::new(64, 48), false),
                (FrameSize::new(32, 16), true),
                (FrameSize::new(32, 16), false),
            ]
        );
    }

    #[test]
    fn frames_are_paced_to_the_frame_rate() {
        let settings = MjpegSettings { fps: 50, quality: 50 };
        let mut capture =
            MjpegCapture::with_source(settings, Box::new(ScriptedScreen::new(&[(8, 8)])));
        let started = Instant::now();
        for _ in 0..3 {
            capture.capture_frame().unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn reports_source_topology() {
        let capture = capture(&[]);
        assert_eq!(capture.video_codec_type(), VideoCodec::Mjpeg);
        assert_eq!(capture.device_display_info().len(), 1);
    }
}
