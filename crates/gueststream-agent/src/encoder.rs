//! Encoder selection.
//!
//! The target caps of each codec are matched against every installed video
//! encoder factory (highest GStreamer rank first). A user-named encoder wins
//! when it is among the candidates; otherwise the first candidate is used.
//!
//! | Codec | Target caps |
//! |-------|-------------|
//! | MJPEG | `image/jpeg` |
//! | VP8   | `video/x-vp8` |
//! | VP9   | `video/x-vp9` |
//! | H.264 | `video/x-h264,stream-format=byte-stream` |
//! | H.265 | `video/x-h265` |
//!
//! All of them carry `framerate=<fps>/1`.

use gstreamer::glib;
use gstreamer::prelude::*;
use gueststream_core::{AgentError, EncoderSettings, VideoCodec};
use tracing::{debug, info, warn};

/// Caps the encoder must be able to produce for `codec` at `fps`.
pub fn target_caps(codec: VideoCodec, fps: u32) -> gstreamer::Caps {
    let builder = match codec {
        VideoCodec::Mjpeg => gstreamer::Caps::builder("image/jpeg"),
        VideoCodec::Vp8 => gstreamer::Caps::builder("video/x-vp8"),
        VideoCodec::Vp9 => gstreamer::Caps::builder("video/x-vp9"),
        VideoCodec::H264 => {
            gstreamer::Caps::builder("video/x-h264").field("stream-format", "byte-stream")
        }
        VideoCodec::H265 => gstreamer::Caps::builder("video/x-h265"),
    };
    builder
        .field("framerate", gstreamer::Fraction::new(fps as i32, 1))
        .build()
}

/// Instantiate the encoder for `settings` and return it with the caps its
/// output has to be linked with.
///
/// Must be called after `gstreamer::init()`.
pub fn select_encoder(
    settings: &EncoderSettings,
) -> Result<(gstreamer::Element, gstreamer::Caps), AgentError> {
    let caps = target_caps(settings.codec, settings.fps);
    let encoder = select_encoder_for_caps(settings, &caps)?;
    Ok((encoder, caps))
}

pub(crate) fn select_encoder_for_caps(
    settings: &EncoderSettings,
    caps: &gstreamer::Caps,
) -> Result<gstreamer::Element, AgentError> {
    let candidates: Vec<gstreamer::ElementFactory> = gstreamer::ElementFactory::factories_with_type(
        gstreamer::ElementFactoryType::VIDEO_ENCODER,
        gstreamer::Rank::NONE,
    )
    .into_iter()
    .filter(|factory| factory.can_src_any_caps(caps))
    .collect();

    if candidates.is_empty() {
        return Err(AgentError::construction(format!(
            "No suitable encoder was found for '{caps}'"
        )));
    }

    info!("Looking for encoder plugins which can produce a '{}' stream", caps);
    let names: Vec<String> = candidates.iter().map(|f| f.name().to_string()).collect();
    for name in &names {
        info!("'{}' plugin is available", name);
    }

    let index = match pick_encoder(&names, &settings.encoder) {
        Some(i) => i,
        None => {
            warn!(
                "Specified encoder named '{}' cannot produce '{}' streams. Make sure that \
                 gst.CODEC=ENCODER is correctly specified and that the encoder is available.",
                settings.encoder, caps
            );
            0
        }
    };
    let factory = &candidates[index];
    info!("'{}' encoder plugin is used", names[index]);

    let encoder = factory.create().name("encoder").build().map_err(|e| {
        AgentError::construction(format!("Gstreamer's encoder element cannot be created: {e}"))
    })?;

    for (name, value) in &settings.properties {
        set_encoder_property(&encoder, name, value);
    }
    Ok(encoder)
}

/// Index of the encoder to use among `candidates`.
///
/// An empty `wanted` always picks the first candidate; `None` means a name was
/// requested but is not a candidate.
pub(crate) fn pick_encoder(candidates: &[String], wanted: &str) -> Option<usize> {
    if wanted.is_empty() {
        return Some(0);
    }
    candidates.iter().position(|name| name == wanted)
}

/// Apply a user property the way `gst-launch` would: the string is parsed
/// as the property's type. Values that do not parse or are out of range are
/// skipped.
fn set_encoder_property(encoder: &gstreamer::Element, name: &str, value: &str) {
    let Some(pspec) = encoder.find_property(name) else {
        warn!("'{}' property was not found for this encoder", name);
        return;
    };
    let flags = pspec.flags();
    if !flags.contains(glib::ParamFlags::WRITABLE) || flags.contains(glib::ParamFlags::CONSTRUCT_ONLY) {
        warn!("'{}' property is not writable on this encoder", name);
        return;
    }

    info!("Trying to set encoder property: '{} = {}'", name, value);
    let parsed = match glib::Value::deserialize(value, pspec.value_type()) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Ignoring '{}' value '{}': {}", name, value, e);
            return;
        }
    };
    if !in_range(&pspec, &parsed) {
        debug!("Ignoring '{}' value '{}': out of range", name, value);
        return;
    }
    encoder.set_property_from_value(name, &parsed);
}

/// Whether a numeric `value` lies within the bounds of `pspec`. Non-numeric
/// properties are always in range once deserialized.
fn in_range(pspec: &glib::ParamSpec, value: &glib::Value) -> bool {
    macro_rules! check {
        ($($spec:ty => $ty:ty),* $(,)?) => {
            $(
                if let Some(spec) = pspec.downcast_ref::<$spec>() {
                    return value
                        .get::<$ty>()
                        .map_or(false, |v| spec.minimum() <= v && v <= spec.maximum());
                }
            )*
        };
    }
    check!(
        glib::ParamSpecChar => i8,
        glib::ParamSpecUChar => u8,
        glib::ParamSpecInt => i32,
        glib::ParamSpecUInt => u32,
        glib::ParamSpecInt64 => i64,
        glib::ParamSpecUInt64 => u64,
        glib::ParamSpecFloat => f32,
        glib::ParamSpecDouble => f64,
    );
    if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecLong>() {
        return value
            .get::<glib::ILong>()
            .map_or(false, |v| spec.minimum() <= v.0 && v.0 <= spec.maximum());
    }
    if let Some(spec) = pspec.downcast_ref::<glib::ParamSpecULong>() {
        return value
            .get::<glib::ULong>()
            .map_or(false, |v| spec.minimum() <= v.0 && v.0 <= spec.maximum());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use gueststream_core::ErrorKind;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn any_encoder_takes_first_candidate() {
        assert_eq!(pick_encoder(&names(&["vaapih264enc", "x264enc"]), ""), Some(0));
    }

    #[test]
    fn named_encoder_is_found_among_candidates() {
        assert_eq!(pick_encoder(&names(&["vaapih264enc", "x264enc"]), "x264enc"), Some(1));
    }

    #[test]
    fn unknown_encoder_name_is_reported() {
        assert_eq!(pick_encoder(&names(&["x264enc"]), "nvh264enc"), None);
    }

    #[test]
    fn h264_target_caps_request_byte_stream() {
        if gstreamer::init().is_err() {
            eprintln!("GStreamer unavailable, skipping");
            return;
        }
        let caps = target_caps(VideoCodec::H264, 30);
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name().as_str(), "video/x-h264");
        assert_eq!(s.get::<&str>("stream-format").unwrap(), "byte-stream");
        assert_eq!(s.get::<gstreamer::Fraction>("framerate").unwrap(), gstreamer::Fraction::new(30, 1));
    }

    #[test]
    fn no_encoder_for_caps_is_construction_error() {
        if gstreamer::init().is_err() {
            eprintln!("GStreamer unavailable, skipping");
            return;
        }
        let caps = gstreamer::Caps::builder("video/x-gueststream-nonexistent").build();
        let err = select_encoder_for_caps(&EncoderSettings::default(), &caps).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn numeric_range_follows_param_spec() {
        let pspec = glib::ParamSpecInt::builder("quality").minimum(0).maximum(100).build();
        assert!(in_range(&pspec, &50i32.to_value()));
        assert!(in_range(&pspec, &100i32.to_value()));
        assert!(!in_range(&pspec, &101i32.to_value()));
        assert!(!in_range(&pspec, &(-1i32).to_value()));

        let pspec = glib::ParamSpecDouble::builder("bpp").minimum(0.0).maximum(1.0).build();
        assert!(!in_range(&pspec, &1.5f64.to_value()));

        let pspec = glib::ParamSpecString::builder("name").build();
        assert!(in_range(&pspec, &"anything".to_value()));
    }

    #[test]
    fn unknown_property_is_accepted() {
        if gstreamer::init().is_err() {
            eprintln!("GStreamer unavailable, skipping");
            return;
        }
        let mut settings = EncoderSettings { codec: VideoCodec::Mjpeg, ..Default::default() };
        settings.properties.insert("no-such-property".into(), "1".into());
        settings.properties.insert("quality".into(), "not-a-number".into());

        let encoder = match select_encoder(&settings) {
            Ok((encoder, _)) => encoder,
            Err(e) => {
                eprintln!("no MJPEG encoder installed, skipping: {e}");
                return;
            }
        };
        assert_eq!(encoder.name().as_str(), "encoder");

        let Some(quality) = encoder.find_property("quality") else {
            return;
        };
        if quality.value_type() != i32::static_type() {
            return;
        }
        let default = quality.default_value().get::<i32>().unwrap();
        assert_eq!(encoder.property::<i32>("quality"), default);

        set_encoder_property(&encoder, "quality", "1000");
        assert_eq!(encoder.property::<i32>("quality"), default);

        set_encoder_property(&encoder, "quality", "42");
        assert_eq!(encoder.property::<i32>("quality"), 42);
    }
}
