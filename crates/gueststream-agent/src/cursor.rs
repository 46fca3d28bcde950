//! Cursor watcher: forwards cursor shape changes to the host as soon as the
//! display server reports them, independently of the frame loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gueststream_capture_x11::XFixesCursor;
use gueststream_core::{AgentError, CursorImage};
use gueststream_transport::{CursorSet, OutboundMessage, StreamPort, MAX_CURSOR_HEIGHT, MAX_CURSOR_WIDTH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed iteration.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Source of cursor-change notifications.
#[async_trait]
pub trait CursorSource: Send {
    /// Wait for the next change notification. Must be cancel safe: the
    /// watcher drops this future when asked to stop.
    async fn wait_for_change(&mut self) -> Result<(), AgentError>;

    /// Current cursor shape.
    fn cursor_image(&mut self) -> Result<CursorImage, AgentError>;
}

#[async_trait]
impl CursorSource for XFixesCursor {
    async fn wait_for_change(&mut self) -> Result<(), AgentError> {
        XFixesCursor::wait_for_change(self).await
    }

    fn cursor_image(&mut self) -> Result<CursorImage, AgentError> {
        XFixesCursor::cursor_image(self)
    }
}

/// Handle to the background watcher task.
pub struct CursorWatcher {
    stop_tx: watch::Sender<bool>,
    task:    JoinHandle<()>,
}

impl CursorWatcher {
    /// Start watching `source`. Needs the multi-threaded runtime: fetching and
    /// sending a cursor blocks the worker in place.
    pub fn spawn<S: CursorSource + 'static>(source: S, port: Arc<StreamPort>) -> Self {
        Self::spawn_with_retry(source, port, RETRY_DELAY)
    }

    pub fn spawn_with_retry<S: CursorSource + 'static>(
        source: S,
        port: Arc<StreamPort>,
        retry_delay: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_watcher(source, port, stop_rx, retry_delay));
        Self { stop_tx, task }
    }

    /// Request stop (non-blocking). A pending wait returns immediately.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the task and wait for it; the source is dropped on return.
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!("cursor watcher task failed: {}", e);
        }
    }
}

async fn run_watcher<S: CursorSource>(
    mut source: S,
    port: Arc<StreamPort>,
    mut stop_rx: watch::Receiver<bool>,
    retry_delay: Duration,
) {
    info!("cursor watcher started");
    let mut last_serial: Option<u32> = None;

    loop {
        let changed = tokio::select! {
            _ = stop_rx.changed() => break,
            changed = source.wait_for_change() => changed,
        };

        // The X reply and the shared port write both block.
        let result = changed.and_then(|_| {
            tokio::task::block_in_place(|| forward_cursor(&mut source, &port, &mut last_serial))
        });
        if let Err(e) = result {
            error!("Error in cursor watcher: {}", e);
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }
    info!("cursor watcher stopped");
}

/// Send the current cursor unless it was already sent or is too big.
fn forward_cursor<S: CursorSource>(
    source: &mut S,
    port: &StreamPort,
    last_serial: &mut Option<u32>,
) -> Result<(), AgentError> {
    let image = source.cursor_image()?;

    if *last_serial == Some(image.serial) {
        debug!("cursor serial {} already sent", image.serial);
        return Ok(());
    }
    if image.width >= MAX_CURSOR_WIDTH || image.height >= MAX_CURSOR_HEIGHT {
        warn!("ignoring cursor: too big {}x{}", image.width, image.height);
        return Ok(());
    }

    let msg = CursorSet::from_image(&image)?;
    *last_serial = Some(image.serial);
    port.send(&OutboundMessage::CursorSet(msg))
}
