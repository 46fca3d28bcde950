//! Capture backends.
//!
//! A [`Plugin`] advertises one codec and a [`Rank`]; the registry asks the
//! best-ranked plugin for the codecs the host accepts to build a
//! [`FrameCapture`].

use gueststream_core::settings::GST_OPTION_PREFIX;
use gueststream_core::{AgentError, DeviceDisplayInfo, EncoderSettings, FrameInfo, VideoCodec};
use tracing::{error, info};

use crate::capture::GstCapture;
use crate::registry::Registry;

/// A running capture pipeline producing encoded frames.
pub trait FrameCapture: Send {
    /// Grab and encode one frame. The returned buffer borrows the capture
    /// and stays valid until the next call.
    fn capture_frame(&mut self) -> Result<FrameInfo<'_>, AgentError>;

    fn video_codec_type(&self) -> VideoCodec;

    /// Outputs this capture is showing. Never fails; may be empty.
    fn device_display_info(&self) -> Vec<DeviceDisplayInfo>;
}

/// Preference of a plugin over others offering the same codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(pub u32);

impl Rank {
    /// Never selected.
    pub const DONT_USE: Rank = Rank(0);
    pub const FALLBACK_MIN: Rank = Rank(1);
    pub const SOFTWARE_MIN: Rank = Rank(0x10);
    pub const HARDWARE_MIN: Rank = Rank(0x100);
}

pub trait Plugin: Send + Sync {
    fn create_capture(&self) -> Result<Box<dyn FrameCapture>, AgentError>;
    fn rank(&self) -> Rank;
    fn video_codec_type(&self) -> VideoCodec;
}

// ── GstPlugin ─────────────────────────────────────────────────────────────────

/// Generic encoder-backed plugin: any GStreamer encoder able to produce the codec.
#[derive(Debug, Clone)]
pub struct GstPlugin {
    settings: EncoderSettings,
}

impl GstPlugin {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl Plugin for GstPlugin {
    fn create_capture(&self) -> Result<Box<dyn FrameCapture>, AgentError> {
        Ok(Box::new(GstCapture::new(&self.settings)?))
    }

    fn rank(&self) -> Rank {
        Rank::SOFTWARE_MIN
    }

    fn video_codec_type(&self) -> VideoCodec {
        self.settings.codec
    }
}

/// Register one [`GstPlugin`] per `gst.<codec>` option, or a default VP8 one
/// when there is none. A bad entry is logged and only that entry is skipped.
///
/// Returns the number of plugins registered.
pub fn register_gst_plugins(registry: &mut Registry) -> usize {
    let options = registry.options().to_vec();
    let mut found = false;
    let mut registered = 0;

    for option in &options {
        let Some(codec_name) = option.name.strip_prefix(GST_OPTION_PREFIX) else {
            continue;
        };
        found = true;
        match EncoderSettings::parse(&options, codec_name, &option.value) {
            Ok(settings) => {
                info!("GStreamer plugin registered for {} ({})", settings.codec, option.value);
                registry.register(Box::new(GstPlugin::new(settings)));
                registered += 1;
            }
            Err(e) => error!("Skipping '{}={}': {}", option.name, option.value, e),
        }
    }

    if !found {
        match EncoderSettings::parse(&options, "vp8", "auto") {
            Ok(settings) => {
                info!("GStreamer plugin registered for vp8 (auto)");
                registry.register(Box::new(GstPlugin::new(settings)));
                registered += 1;
            }
            Err(e) => error!("Default GStreamer plugin not registered: {}", e),
        }
    }
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use gueststream_core::ConfigureOption;

    fn gst_codecs(registry: &Registry) -> Vec<VideoCodec> {
        registry.plugins().map(|p| p.video_codec_type()).collect()
    }

    #[test]
    fn default_plugin_is_vp8_auto() {
        let mut registry = Registry::new(vec![ConfigureOption::new("framerate", "30")]);
        assert_eq!(register_gst_plugins(&mut registry), 1);
        assert_eq!(gst_codecs(&registry), vec![VideoCodec::Vp8]);
        assert_eq!(registry.plugins().next().unwrap().rank(), Rank::SOFTWARE_MIN);
    }

    #[test]
    fn one_plugin_per_codec_option() {
        let mut registry = Registry::new(vec![
            ConfigureOption::new("gst.h264", "x264enc:speed-preset=ultrafast"),
            ConfigureOption::new("framerate", "20"),
            ConfigureOption::new("gst.mjpeg", "auto"),
        ]);
        assert_eq!(register_gst_plugins(&mut registry), 2);
        assert_eq!(gst_codecs(&registry), vec![VideoCodec::H264, VideoCodec::Mjpeg]);
    }

    #[test]
    fn bad_entry_skips_only_itself() {
        let mut registry = Registry::new(vec![
            ConfigureOption::new("gst.xyz", "auto"),
            ConfigureOption::new("gst.vp9", "auto:foo=bar"),
            ConfigureOption::new("gst.h265", ""),
            ConfigureOption::new("gst.vp8", "vp8enc:deadline=1"),
        ]);
        assert_eq!(register_gst_plugins(&mut registry), 1);
        assert_eq!(gst_codecs(&registry), vec![VideoCodec::Vp8]);
    }
}
