//! gueststream-agent: capture, encode and stream the guest display.
//!
//! | Module | Role |
//! |--------|------|
//! | [`encoder`] | pick and configure a GStreamer encoder for a codec |
//! | [`capture`] | `appsrc → videoconvert → encoder → appsink` pipeline |
//! | [`plugin`] / [`registry`] | ranked capture backends per codec |
//! | [`mjpeg`] | built-in MJPEG fallback backend |
//! | [`cursor`] | XFixes cursor watcher task |
//! | [`session`] | host command handling and the frame loop |
//! | [`frame_log`] | optional per-frame log file |

pub mod capture;
pub mod cursor;
pub mod encoder;
pub mod frame_log;
pub mod mjpeg;
pub mod plugin;
pub mod registry;
pub mod session;

#[cfg(test)]
mod test_support;
