//! Stream publishers
//!
//! A publisher serves one [`FrameBuffer`] on one route of a
//! [`NetworkController`]:
//!
//! - [`MultipartPublisher`] (pull): every HTTP request gets its own MJPEG
//!   stream paced by a per-connection governor.
//! - [`SocketPublisher`] (push): one shared loop emits encoded frames to the
//!   `video_feed` room while at least one client is connected.

pub mod multipart;
pub mod protocol;
pub mod socket;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::server::NetworkController;
use crate::stats::GovernorOptions;
use crate::video::{Codec, FrameBuffer};

pub use multipart::{encode_part, MultipartOptions, MultipartPublisher, DEFAULT_BOUNDARY};
pub use protocol::{
    Protocol, ProtocolEntry, ProtocolRegistry, PublisherFactory, PushFormat, ViewerFactory,
};
pub use socket::{SocketOptions, SocketPublisher, VIDEO_ROOM};

/// Rate used when neither the publisher nor the buffer sets a finite one
pub const UNBOUNDED_STREAM_FPS: f64 = 30.0;

/// Options shared by every publisher
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Override the buffer's rate
    pub max_fps: Option<f64>,
    /// Log per-frame rate statistics
    pub print_fps: bool,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = Some(fps);
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }

    /// Governor options for serving `video`
    pub(crate) fn governor(&self, video: &FrameBuffer) -> Result<GovernorOptions> {
        let fps = match self.max_fps {
            Some(fps) if !(fps > 0.0) => {
                return Err(Error::InvalidConfiguration(format!(
                    "stream rate must be positive, got {}",
                    fps
                )))
            }
            Some(fps) => fps,
            None => video.max_fps(),
        };
        let fps = if fps.is_finite() {
            fps
        } else {
            UNBOUNDED_STREAM_FPS
        };
        Ok(GovernorOptions::new(fps).print_fps(self.print_fps))
    }
}

/// Everything a publisher factory needs
pub struct PublishContext<'a> {
    pub controller: &'a dyn NetworkController,
    pub video: Arc<FrameBuffer>,
    pub route: String,
    pub codec: Arc<dyn Codec>,
    pub options: PublishOptions,
}

/// A running publisher
pub trait StreamPublisher: Send + Sync + std::fmt::Debug {
    /// Route or namespace it serves
    fn route(&self) -> &str;

    fn protocol(&self) -> Protocol;
}
