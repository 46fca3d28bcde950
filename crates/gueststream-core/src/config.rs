use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

pub const DEFAULT_STREAM_PORT: &str = "/dev/virtio-ports/org.spice-space.stream.0";

/// A `name=value` pair handed to the plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureOption {
    pub name:  String,
    pub value: String,
}

impl ConfigureOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Parse a `-c name=value` argument.
    pub fn parse(arg: &str) -> Result<Self, AgentError> {
        let (name, value) = arg.split_once('=').ok_or_else(|| {
            AgentError::configuration(format!("Invalid '-c' argument value: {arg}"))
        })?;
        Ok(Self::new(name, value))
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(alias = "streamPort")]
    pub stream_port: PathBuf,
    /// Ordered plugin options; later entries win for the same key.
    pub options: Vec<ConfigureOption>,
    #[serde(alias = "logFile")]
    pub log_file: Option<PathBuf>,
    #[serde(alias = "logBinary")]
    pub log_binary: bool,
    #[serde(alias = "logFrames")]
    pub log_frames: bool,
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stream_port: PathBuf::from(DEFAULT_STREAM_PORT),
            options:     Vec::new(),
            log_file:    None,
            log_binary:  false,
            log_frames:  false,
            debug:       false,
        }
    }
}

impl AgentConfig {
    /// Load a JSON configuration file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AgentError::configuration(format!("Invalid configuration {}: {e}", path.display()))
        })
    }

    /// Apply `--log-categories a:b:c`.  Unknown categories are ignored.
    pub fn apply_log_categories(&mut self, categories: &str) {
        for cat in categories.split(':') {
            if cat == "frames" {
                self.log_frames = true;
            }
        }
    }
}
