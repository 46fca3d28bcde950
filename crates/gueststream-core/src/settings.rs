//! Encoder settings and the `gst.<codec>` option grammar.
//!
//! ```text
//! gst.<codec> = <encoder>[:<key>=<value>[,<key>=<value>...]]
//! ```
//!
//! `auto` lets GStreamer pick the encoder and cannot carry properties.
//! Keys the agent understands itself (`framerate`) are applied to the typed
//! fields; everything else is handed to the encoder element untouched.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::ConfigureOption;
use crate::errors::AgentError;
use crate::types::VideoCodec;

/// Prefix of the per-codec option keys.
pub const GST_OPTION_PREFIX: &str = "gst.";

/// Encoder name meaning "first encoder able to produce the codec".
pub const AUTO_ENCODER: &str = "auto";

pub const DEFAULT_FPS: u32 = 25;

/// Parameters a capture pipeline is built from.  Not modified once a
/// pipeline has been constructed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub fps:        u32,
    pub codec:      VideoCodec,
    /// Requested encoder element; empty means any.
    pub encoder:    String,
    pub properties: BTreeMap<String, String>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            fps:        DEFAULT_FPS,
            codec:      VideoCodec::Vp8,
            encoder:    String::new(),
            properties: BTreeMap::new(),
        }
    }
}

impl EncoderSettings {
    /// Build settings for `codec_name` from an encoder configuration string,
    /// applying the global agent options first.
    pub fn parse(
        options: &[ConfigureOption],
        codec_name: &str,
        encoder_cfg: &str,
    ) -> Result<Self, AgentError> {
        let mut settings = Self { codec: codec_name.parse()?, ..Self::default() };

        let (encoder, props) = match encoder_cfg.split_once(':') {
            Some((encoder, props)) => (encoder, Some(props)),
            None => (encoder_cfg, None),
        };

        if encoder.is_empty() {
            return Err(AgentError::configuration(format!(
                "Invalid GStreamer parameter '{GST_OPTION_PREFIX}{codec_name}={encoder_cfg}': \
                 encoder cannot be empty. Use '{AUTO_ENCODER}' to pick up GST default encoder."
            )));
        }

        if encoder == AUTO_ENCODER {
            if props.is_some() {
                return Err(AgentError::configuration(format!(
                    "Invalid parameter '{GST_OPTION_PREFIX}{codec_name}={encoder_cfg}': \
                     automatically-selected encoder cannot be configured."
                )));
            }
        } else {
            settings.encoder = encoder.to_owned();
        }

        for option in options {
            settings.store_plugin_option(&option.name, &option.value)?;
        }

        if let Some(props) = props {
            settings.store_encoder_options(props)?;
        }

        debug!(
            "{} settings: encoder='{}' fps={} properties={:?}",
            settings.codec, settings.encoder, settings.fps, settings.properties
        );
        Ok(settings)
    }

    /// Apply a key the agent interprets itself.  Returns `false` when the key
    /// is not one of those.
    fn store_plugin_option(&mut self, name: &str, value: &str) -> Result<bool, AgentError> {
        match name {
            "framerate" => {
                self.fps = value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|fps| *fps > 0)
                    .ok_or_else(|| {
                        AgentError::configuration(format!(
                            "Invalid value '{value}' for option 'framerate'."
                        ))
                    })?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn store_encoder_options(&mut self, encoder_options: &str) -> Result<(), AgentError> {
        let tokens: Vec<&str> = encoder_options.split(',').collect();
        let last = tokens.len() - 1;

        for (i, token) in tokens.into_iter().enumerate() {
            if token.is_empty() && i == last {
                break;
            }
            let Some((name, value)) = token.split_once('=') else {
                return Err(AgentError::configuration(format!(
                    "Invalid parameter for GStreamer encoder '{}': separator not found in '{}'.",
                    self.encoder, token
                )));
            };
            if self.store_plugin_option(name, value)? {
                continue;
            }
            self.properties.insert(name.to_owned(), value.to_owned());
        }
        Ok(())
    }
}
