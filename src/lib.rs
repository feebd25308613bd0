//! Wormhole: live video streaming and viewing
//!
//! Frames flow from a source through a shared buffer to any number of
//! network viewers:
//!
//! ```text
//!   Source ──► FrameBuffer ──► Publisher ──► network ──► Viewer ──► FrameBuffer ──► ...
//!   (file,      (modifiers,     (MJPEG,                  (MJPEG,     (render, record,
//!    camera,     subscribers,    socket push)             socket)     re-publish)
//!    image,      governor)
//!    generator)
//! ```
//!
//! # Streaming
//!
//! ```no_run
//! use wormhole::{ServerConfig, StreamOptions, Wormhole};
//!
//! # async fn demo() -> wormhole::Result<()> {
//! let hub = Wormhole::new(ServerConfig::default())?;
//! hub.stream("video.mp4", StreamOptions::new()).await?;
//! hub.run().await
//! # }
//! ```
//!
//! # Viewing
//!
//! ```no_run
//! use wormhole::{ServerConfig, Wormhole};
//!
//! # async fn demo() -> wormhole::Result<()> {
//! let hub = Wormhole::new(ServerConfig::default())?;
//! let viewer = hub.view("localhost:8000", "default").await?;
//! let frame = viewer.video().get_frame();
//! println!("{}x{}", frame.width(), frame.height());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod publish;
pub mod registry;
pub mod server;
pub mod source;
pub mod stats;
pub mod video;
pub mod viewer;
pub mod wormhole;

/// Version exchanged during sync; hubs only connect to the same version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use client::SyncClient;
pub use error::{Error, Result};
pub use publish::{Protocol, ProtocolRegistry, PublishOptions};
pub use server::{HttpController, NetworkController, ServerConfig};
pub use source::{Source, SourceState};
pub use stats::{FrameGovernor, GovernorOptions};
pub use video::{Frame, FrameBuffer, FrameModifier, FrameSubscriber, VideoConfig, VideoWriter};
pub use viewer::{Viewer, ViewerOptions};
pub use wormhole::{StreamOptions, Wormhole};
