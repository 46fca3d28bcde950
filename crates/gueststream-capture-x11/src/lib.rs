//! gueststream-capture-x11: everything the agent asks the X server.
//!
//! | Type | Extension | Used by |
//! |------|-----------|---------|
//! | [`X11Screen`] | core `GetImage` / `GetGeometry` | capture pipeline source stage |
//! | [`display_info`] | RandR ≥ 1.2 + DRM sysfs, core fallback | device display info |
//! | [`XFixesCursor`] | XFixes cursor notify | cursor watcher |
//!
//! Each type opens its own connection and closes it on drop.

use std::fmt::Display;

use gueststream_core::{AgentError, ErrorKind};

pub mod cursor;
pub mod display_info;
pub mod screen;

pub use cursor::XFixesCursor;
pub use screen::X11Screen;

/// Map an x11rb error into an [`AgentError`] of `kind`, prefixed with `what`.
pub(crate) fn x11_err<E: Display>(kind: ErrorKind, what: &'static str) -> impl FnOnce(E) -> AgentError {
    move |e| AgentError::new(kind, format!("{what}: {e}"))
}
