//! Remote viewer adapters
//!
//! A viewer connects to a remote stream and decodes it into its own
//! [`FrameBuffer`], so it can be rendered, recorded or re-published like any
//! local source. Dimensions and rate are required up front; the sync client
//! discovers them.

pub mod decoder;
pub mod multipart;
pub mod socket;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::publish::Protocol;
use crate::stats::FrameGovernor;
use crate::video::{FrameBuffer, StreamInfo, VideoConfig, RGB};

pub use decoder::MultipartDecoder;
pub use multipart::MultipartViewer;
pub use socket::SocketViewer;

/// Rate of reconnection attempts
pub const RECONNECT_FPS: f64 = 1.0;

/// Viewer options
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    pub width: u32,
    pub height: u32,
    pub depth: usize,
    /// Rate limit of the local buffer; `f64::INFINITY` follows the sender
    pub max_fps: f64,
    /// Reconnect forever after the stream ends
    pub auto_reconnect: bool,
    pub print_fps: bool,
}

impl ViewerOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: RGB,
            max_fps: 30.0,
            auto_reconnect: true,
            print_fps: false,
        }
    }

    /// Options matching a synced stream description
    pub fn from_info(info: &StreamInfo) -> Self {
        Self::new(info.width, info.height)
            .depth(info.pixel_size)
            .max_fps(info.max_fps.unwrap_or(f64::INFINITY))
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = fps;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }

    pub(crate) fn buffer(&self, label: &'static str) -> Result<Arc<FrameBuffer>> {
        let video = FrameBuffer::new(
            VideoConfig::new(self.width, self.height)
                .depth(self.depth)
                .max_fps(self.max_fps)
                .print_fps(self.print_fps)
                .source_label(label),
        )?;
        Ok(Arc::new(video))
    }
}

/// Connection state of a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Connected,
    Reconnecting,
    /// Stream ended without auto-reconnect; the buffer holds a blank frame
    Stopped,
}

/// Handle to a running viewer
pub struct Viewer {
    url: String,
    protocol: Protocol,
    video: Arc<FrameBuffer>,
    state: watch::Receiver<ViewerState>,
    task: JoinHandle<()>,
}

impl Viewer {
    pub(crate) fn spawn<F, Fut>(url: String, protocol: Protocol, video: Arc<FrameBuffer>, run: F) -> Self
    where
        F: FnOnce(Arc<FrameBuffer>, watch::Sender<ViewerState>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state) = watch::channel(ViewerState::Connected);
        let task = tokio::spawn(run(video.clone(), state_tx));
        Self {
            url,
            protocol,
            video,
            state,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn video(&self) -> &Arc<FrameBuffer> {
        &self.video
    }

    pub fn state(&self) -> ViewerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ViewerState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the viewer's loop; the buffer keeps its last frame
    pub fn close(self) -> Arc<FrameBuffer> {
        self.task.abort();
        self.video
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("url", &self.url)
            .field("protocol", &self.protocol)
            .field("state", &self.state())
            .finish()
    }
}

/// Retry `connect` once per second until it succeeds
pub(crate) async fn reconnect<T, F, Fut>(url: &str, mut connect: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retry = FrameGovernor::new(RECONNECT_FPS).ok();
    loop {
        match &retry {
            Some(retry) => retry.advance_one_frame().await,
            None => tokio::time::sleep(std::time::Duration::from_secs(1)).await,
        }
        match connect().await {
            Ok(connection) => {
                tracing::info!(url = %url, "Stream reconnected");
                return connection;
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to connect to stream, retrying in 1 second");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_info() {
        let info = StreamInfo {
            width: 320,
            height: 240,
            pixel_size: 3,
            max_fps: None,
        };
        let options = ViewerOptions::from_info(&info);

        assert_eq!((options.width, options.height, options.depth), (320, 240, 3));
        assert!(options.max_fps.is_infinite());
        assert!(options.auto_reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_every_second() {
        let start = tokio::time::Instant::now();
        let mut attempts = 0;
        let value = reconnect("http://test", || {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt < 3 {
                    Err(crate::error::Error::source_unavailable("http://test", "refused"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(value, 3);
        let elapsed = start.elapsed().as_secs_f64();
        assert!((2.9..=3.1).contains(&elapsed), "elapsed {}", elapsed);
    }
}
