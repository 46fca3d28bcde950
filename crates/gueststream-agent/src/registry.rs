//! Plugin registry.

use std::collections::BTreeSet;

use gueststream_core::{ConfigureOption, VideoCodec};
use tracing::{debug, error, info};

use crate::plugin::{FrameCapture, Plugin, Rank};

/// Plugins known to the agent, in registration order.
pub struct Registry {
    options: Vec<ConfigureOption>,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Registry {
    pub fn new(options: Vec<ConfigureOption>) -> Self {
        Self { options, plugins: Vec::new() }
    }

    /// Options handed to plugins at registration time.
    pub fn options(&self) -> &[ConfigureOption] {
        &self.options
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        debug!(
            "plugin registered: codec={} rank={:?}",
            plugin.video_codec_type(),
            plugin.rank()
        );
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| &**p)
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins usable for `codecs`, highest rank first (registration order
    /// between equal ranks).
    pub fn candidates(&self, codecs: &BTreeSet<VideoCodec>) -> Vec<&dyn Plugin> {
        let mut candidates: Vec<&dyn Plugin> = self
            .plugins()
            .filter(|p| p.rank() > Rank::DONT_USE && codecs.contains(&p.video_codec_type()))
            .collect();
        // Stable: equal ranks keep registration order.
        candidates.sort_by(|a, b| b.rank().cmp(&a.rank()));
        candidates
    }

    /// Build a capture for one of `codecs`, trying [`candidates`](Self::candidates)
    /// in order. A plugin whose capture fails to build is logged and skipped.
    pub fn best_capture(&self, codecs: &BTreeSet<VideoCodec>) -> Option<Box<dyn FrameCapture>> {
        for plugin in self.candidates(codecs) {
            match plugin.create_capture() {
                Ok(capture) => {
                    info!(
                        "Using {} capture (rank {:?})",
                        plugin.video_codec_type(),
                        plugin.rank()
                    );
                    return Some(capture);
                }
                Err(e) => error!("Error creating {} capture: {}", plugin.video_codec_type(), e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use gueststream_core::{AgentError, DeviceDisplayInfo, FrameInfo, FrameSize};

    use super::*;
    use crate::mjpeg::register_mjpeg_plugin;
    use crate::plugin::register_gst_plugins;

    struct FakeCapture {
        codec: VideoCodec,
        tag:   &'static str,
    }

    impl FrameCapture for FakeCapture {
        fn capture_frame(&mut self) -> Result<FrameInfo<'_>, AgentError> {
            Ok(FrameInfo {
                buffer:       self.tag.as_bytes(),
                size:         FrameSize::new(2, 2),
                stream_start: true,
            })
        }

        fn video_codec_type(&self) -> VideoCodec {
            self.codec
        }

        fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
            Vec::new()
        }
    }

    struct FakePlugin {
        codec:    VideoCodec,
        rank:     Rank,
        tag:      &'static str,
        fails:    bool,
        attempts: Arc<AtomicUsize>,
    }

    impl FakePlugin {
        fn boxed(codec: VideoCodec, rank: Rank, tag: &'static str) -> Box<dyn Plugin> {
            Box::new(Self { codec, rank, tag, fails: false, attempts: Arc::default() })
        }
    }

    impl Plugin for FakePlugin {
        fn create_capture(&self) -> Result<Box<dyn FrameCapture>, AgentError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(AgentError::construction("no encoder"));
            }
            Ok(Box::new(FakeCapture { codec: self.codec, tag: self.tag }))
        }

        fn rank(&self) -> Rank {
            self.rank
        }

        fn video_codec_type(&self) -> VideoCodec {
            self.codec
        }
    }

    fn tag_of(mut capture: Box<dyn FrameCapture>) -> String {
        let frame = capture.capture_frame().unwrap();
        String::from_utf8(frame.buffer.to_vec()).unwrap()
    }

    fn codecs(list: &[VideoCodec]) -> BTreeSet<VideoCodec> {
        list.iter().copied().collect()
    }

    #[test]
    fn highest_rank_wins() {
        let mut registry = Registry::new(Vec::new());
        registry.register(FakePlugin::boxed(VideoCodec::Vp8, Rank::SOFTWARE_MIN, "soft"));
        registry.register(FakePlugin::boxed(VideoCodec::H264, Rank::HARDWARE_MIN, "hard"));

        let capture = registry.best_capture(&codecs(&[VideoCodec::Vp8, VideoCodec::H264]));
        assert_eq!(tag_of(capture.unwrap()), "hard");
    }

    #[test]
    fn equal_rank_keeps_registration_order() {
        let mut registry = Registry::new(Vec::new());
        registry.register(FakePlugin::boxed(VideoCodec::Vp9, Rank::SOFTWARE_MIN, "first"));
        registry.register(FakePlugin::boxed(VideoCodec::Vp8, Rank::SOFTWARE_MIN, "second"));

        let capture = registry.best_capture(&codecs(&[VideoCodec::Vp8, VideoCodec::Vp9]));
        assert_eq!(tag_of(capture.unwrap()), "first");
    }

    #[test]
    fn codecs_not_accepted_by_host_are_ignored() {
        let mut registry = Registry::new(Vec::new());
        registry.register(FakePlugin::boxed(VideoCodec::H264, Rank::HARDWARE_MIN, "h264"));
        registry.register(FakePlugin::boxed(VideoCodec::Mjpeg, Rank::FALLBACK_MIN, "mjpeg"));

        let capture = registry.best_capture(&codecs(&[VideoCodec::Mjpeg]));
        assert_eq!(tag_of(capture.unwrap()), "mjpeg");
        assert!(registry.best_capture(&codecs(&[VideoCodec::Vp9])).is_none());
    }

    #[test]
    fn dont_use_is_never_selected() {
        let mut registry = Registry::new(Vec::new());
        registry.register(FakePlugin::boxed(VideoCodec::Vp8, Rank::DONT_USE, "off"));
        assert!(registry.best_capture(&codecs(&[VideoCodec::Vp8])).is_none());
    }

    #[test]
    fn failed_capture_falls_through_to_next_plugin() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new(Vec::new());
        registry.register(Box::new(FakePlugin {
            codec:    VideoCodec::H264,
            rank:     Rank::HARDWARE_MIN,
            tag:      "broken",
            fails:    true,
            attempts: Arc::clone(&attempts),
        }));
        registry.register(FakePlugin::boxed(VideoCodec::Vp8, Rank::SOFTWARE_MIN, "soft"));

        let capture = registry.best_capture(&codecs(&[VideoCodec::H264, VideoCodec::Vp8]));
        assert_eq!(tag_of(capture.unwrap()), "soft");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn options_are_kept_in_order() {
        let registry = Registry::new(vec![
            ConfigureOption::new("gst.h264", "x264enc"),
            ConfigureOption::new("framerate", "30"),
        ]);
        assert_eq!(registry.options()[1].name, "framerate");
        assert!(registry.is_empty());
    }

    #[test]
    fn gstreamer_mjpeg_outranks_builtin_fallback() {
        let mut registry = Registry::new(vec![
            ConfigureOption::new("gst.mjpeg", "auto"),
            ConfigureOption::new("gst.vp8", "auto"),
        ]);
        register_mjpeg_plugin(&mut registry);
        register_gst_plugins(&mut registry);

        let ranked: Vec<(VideoCodec, Rank)> = registry
            .candidates(&codecs(&[VideoCodec::Mjpeg]))
            .into_iter()
            .map(|p| (p.video_codec_type(), p.rank()))
            .collect();
        assert_eq!(
            ranked,
            vec![(VideoCodec::Mjpeg, Rank::SOFTWARE_MIN), (VideoCodec::Mjpeg, Rank::FALLBACK_MIN)]
        );
    }

    #[test]
    fn fallback_is_the_only_candidate_without_gstreamer_mjpeg() {
        let mut registry = Registry::new(Vec::new());
        register_mjpeg_plugin(&mut registry);
        register_gst_plugins(&mut registry);

        assert_eq!(registry.candidates(&codecs(&[VideoCodec::Vp8])).len(), 1);
        let mjpeg = registry.candidates(&codecs(&[VideoCodec::Mjpeg]));
        assert_eq!(mjpeg.len(), 1);
        assert_eq!(mjpeg[0].rank(), Rank::FALLBACK_MIN);
    }
}
