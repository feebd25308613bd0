//! Still image source
//!
//! Without a frame rate the image is rendered once and no loop runs. With a
//! rate it is re-rendered every tick, optionally re-reading the file so edits
//! show up live.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::video::{Codec, Frame, FrameBuffer, ImageCodec, VideoConfig, RGB};

use super::{spawn_producer, FrameProducer, Produced, Source};

/// Image source options
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Re-render rate; `None` renders once
    pub max_fps: Option<f64>,
    /// Re-read the file on every render
    pub reload: bool,
    pub print_fps: bool,
}

impl ImageOptions {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = Some(fps);
        self
    }

    pub fn reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }
}

/// Renders a still image
pub struct ImageSource {
    path: PathBuf,
    image: Frame,
    reload: bool,
    codec: ImageCodec,
}

impl ImageSource {
    pub async fn open(path: impl AsRef<Path>, options: ImageOptions) -> Result<Source> {
        let path = path.as_ref().to_path_buf();
        let codec = ImageCodec::new();
        let image = load(&codec, &path).await?;

        let width = options.width.unwrap_or(image.width());
        let height = options.height.unwrap_or(image.height());
        let fps = options.max_fps.unwrap_or(f64::INFINITY);

        let video = Arc::new(FrameBuffer::new(
            VideoConfig::new(width, height)
                .max_fps(fps)
                .print_fps(options.print_fps)
                .source_label("ImageSource"),
        )?);
        video.set_frame(codec.resize(&image, width, height)?)?;

        tracing::info!(path = %path.display(), width, height, "Image source opened");

        let source = Self {
            path,
            image,
            reload: options.reload,
            codec,
        };
        if fps.is_finite() {
            Ok(spawn_producer(video, source))
        } else {
            Ok(Source::idle(video))
        }
    }
}

async fn load(codec: &ImageCodec, path: &Path) -> Result<Frame> {
    let shown = path.display().to_string();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::source_unavailable(&shown, e))?;
    codec
        .decode(&bytes, RGB)
        .map_err(|e| Error::source_unavailable(&shown, e))
}

#[async_trait]
impl FrameProducer for ImageSource {
    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }

    async fn next_frame(&mut self, _video: &FrameBuffer) -> Result<Produced> {
        if self.reload {
            self.image = load(&self.codec, &self.path).await?;
        }
        Ok(Produced::Frame(self.image.clone()))
    }
}
