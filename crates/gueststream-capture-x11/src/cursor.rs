//! XFixes cursor-change notifications.
//!
//! The connection socket is registered with the tokio reactor so a watcher
//! task can wait for a notification and still be cancelled by `select!`.

use std::ops::Deref;
use std::os::unix::io::{AsRawFd, RawFd};

use gueststream_core::{AgentError, CursorImage, ErrorKind};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xfixes::{self, ConnectionExt as _, CursorNotifyMask};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::x11_err;

/// Version requested from the server; cursor notifications need ≥ 2.
const XFIXES_MAJOR: u32 = 4;
const XFIXES_MINOR: u32 = 0;

/// `RustConnection` exposing its socket so it can be registered with the
/// reactor.
struct XConn(RustConnection);

impl Deref for XConn {
    type Target = RustConnection;

    fn deref(&self) -> &RustConnection {
        &self.0
    }
}

impl AsRawFd for XConn {
    fn as_raw_fd(&self) -> RawFd {
        self.0.stream().as_raw_fd()
    }
}

/// Dedicated X connection subscribed to `DisplayCursorNotify` on the root window.
pub struct XFixesCursor {
    conn: AsyncFd<XConn>,
}

impl XFixesCursor {
    /// Connect to `$DISPLAY` and subscribe to cursor changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open() -> Result<Self, AgentError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(x11_err(ErrorKind::Construction, "Failed to open display"))?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| AgentError::construction("Cannot get X11 screen"))?
            .root;

        let present = conn
            .extension_information(xfixes::X11_EXTENSION_NAME)
            .map_err(x11_err(ErrorKind::Construction, "XFixes"))?
            .is_some();
        if !present {
            return Err(AgentError::construction("Missing XFixes extension"));
        }

        let version = conn
            .xfixes_query_version(XFIXES_MAJOR, XFIXES_MINOR)
            .map_err(x11_err(ErrorKind::Construction, "XFixesQueryVersion"))?
            .reply()
            .map_err(x11_err(ErrorKind::Construction, "XFixesQueryVersion"))?;
        if version.major_version < 2 {
            return Err(AgentError::construction(format!(
                "XFixes {}.{} has no cursor notifications",
                version.major_version, version.minor_version
            )));
        }

        conn.xfixes_select_cursor_input(root, CursorNotifyMask::DISPLAY_CURSOR)
            .map_err(x11_err(ErrorKind::Construction, "XFixesSelectCursorInput"))?;
        conn.flush()
            .map_err(x11_err(ErrorKind::Construction, "XFixesSelectCursorInput"))?;

        let conn = AsyncFd::new(XConn(conn))?;
        info!(
            "XFixes {}.{} cursor notifications enabled",
            version.major_version, version.minor_version
        );
        Ok(Self { conn })
    }

    /// Wait until the server reports a cursor change.
    ///
    /// Cancel safe: dropping the future loses no notification that has not
    /// already been returned.
    pub async fn wait_for_change(&mut self) -> Result<(), AgentError> {
        loop {
            // Drain what x11rb already buffered before sleeping on the socket.
            while let Some(event) = self
                .conn
                .get_ref()
                .poll_for_event()
                .map_err(x11_err(ErrorKind::Cursor, "X connection"))?
            {
                if let Event::XfixesCursorNotify(notify) = event {
                    debug!("cursor notify serial {}", notify.cursor_serial);
                    return Ok(());
                }
            }

            let mut guard = self.conn.readable().await?;
            guard.clear_ready();
        }
    }

    /// Fetch the current cursor image.
    pub fn cursor_image(&self) -> Result<CursorImage, AgentError> {
        let reply = self
            .conn
            .get_ref()
            .xfixes_get_cursor_image()
            .map_err(x11_err(ErrorKind::Cursor, "XFixesGetCursorImage"))?
            .reply()
            .map_err(x11_err(ErrorKind::Cursor, "XFixesGetCursorImage"))?;

        Ok(CursorImage {
            width:  reply.width,
            height: reply.height,
            hot_x:  reply.xhot,
            hot_y:  reply.yhot,
            pixels: reply.cursor_image,
            serial: reply.cursor_serial,
        })
    }
}
