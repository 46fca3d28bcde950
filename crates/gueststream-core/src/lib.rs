pub mod config;
pub mod errors;
pub mod settings;
pub mod types;

pub use config::{AgentConfig, ConfigureOption};
pub use errors::{AgentError, ErrorKind};
pub use settings::EncoderSettings;
pub use types::*;

/// Result alias used across the agent crates.
pub type Result<T, E = AgentError> = std::result::Result<T, E>;
