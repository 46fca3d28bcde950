//! Root-window grabs through the core protocol.

use gueststream_core::{AgentError, DeviceDisplayInfo, ErrorKind, FrameSize};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, Window};
use x11rb::rust_connection::RustConnection;

use crate::{display_info, x11_err};

/// Connection to the X server used by the capture source stage.
pub struct X11Screen {
    conn:       RustConnection,
    screen_num: usize,
    root:       Window,
}

impl X11Screen {
    /// Connect to `$DISPLAY` and check the root window can be grabbed as BGRx.
    pub fn open() -> Result<Self, AgentError> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(x11_err(ErrorKind::Construction, "Unable to initialize X11"))?;

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| AgentError::construction("Cannot get X11 screen"))?;
        let root = screen.root;
        let depth = screen.root_depth;

        let bpp = conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|f| f.depth == depth)
            .map(|f| f.bits_per_pixel)
            .unwrap_or(0);
        if bpp != 32 {
            return Err(AgentError::construction(format!(
                "Unsupported root window format: depth {depth}, {bpp} bits per pixel"
            )));
        }

        info!("X11 screen {} opened (depth {})", screen_num, depth);
        Ok(Self { conn, screen_num, root })
    }

    /// Current root window size, rounded down to even dimensions.
    pub fn size(&self) -> Result<FrameSize, AgentError> {
        let geometry = self
            .conn
            .get_geometry(self.root)
            .map_err(x11_err(ErrorKind::Stream, "GetGeometry"))?
            .reply()
            .map_err(x11_err(ErrorKind::Stream, "GetGeometry"))?;
        Ok(FrameSize::new(geometry.width.into(), geometry.height.into()).even())
    }

    /// Grab the top-left `size` pixels of the root window as BGRx.
    pub fn grab(&self, size: FrameSize) -> Result<Vec<u8>, AgentError> {
        let (width, height) = (size.width as u16, size.height as u16);
        let image = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, self.root, 0, 0, width, height, !0)
            .map_err(x11_err(ErrorKind::Stream, "Cannot capture from X"))?
            .reply()
            .map_err(x11_err(ErrorKind::Stream, "Cannot capture from X"))?;

        let expected = size.width as usize * size.height as usize * 4;
        if image.data.len() != expected {
            return Err(AgentError::stream(format!(
                "X image for {size} has {} bytes, expected {expected}",
                image.data.len()
            )));
        }
        debug!("grabbed {} ({} bytes)", size, image.data.len());
        Ok(image.data)
    }

    /// Monitor layout of this display, see [`display_info::device_display_info`].
    pub fn device_display_info(&self) -> Vec<DeviceDisplayInfo> {
        display_info::device_display_info(&self.conn, self.screen_num)
    }
}
