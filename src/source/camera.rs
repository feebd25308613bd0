//! Camera source (Video4Linux through ffmpeg)

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::video::{Frame, FrameBuffer, VideoConfig, RGB};

use super::ffmpeg::{self, camera_device, RawVideoReader, ReaderInput};
use super::file::FALLBACK_FPS;
use super::{spawn_producer, FrameProducer, Produced, Source};

/// Camera options; unset fields are queried from the device
#[derive(Debug, Clone, Default)]
pub struct CameraOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_fps: Option<f64>,
    pub print_fps: bool,
}

impl CameraOptions {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = Some(fps);
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }
}

/// Live capture from a camera device
pub struct CameraSource {
    input: ReaderInput,
    device: String,
    size: (u32, u32),
    reader: Option<RawVideoReader>,
}

impl CameraSource {
    /// Open a camera by index (`"0"`) or device path (`"/dev/video0"`)
    pub async fn open(device: &str, options: CameraOptions) -> Result<Source> {
        let path = camera_device(device);
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::source_unavailable(&path, e))?;

        let (width, height, fps) = match (options.width, options.height) {
            (Some(w), Some(h)) => (w, h, options.max_fps.unwrap_or(FALLBACK_FPS)),
            (w, h) => {
                let probe = ffmpeg::probe(&path, Some("v4l2")).await?;
                (
                    w.unwrap_or(probe.width),
                    h.unwrap_or(probe.height),
                    options.max_fps.or(probe.fps).unwrap_or(FALLBACK_FPS),
                )
            }
        };

        let video = Arc::new(FrameBuffer::new(
            VideoConfig::new(width, height)
                .max_fps(fps)
                .print_fps(options.print_fps)
                .source_label("CameraSource"),
        )?);

        let input = ReaderInput::Camera {
            device: path.clone(),
            fps: options.max_fps,
        };
        let reader = RawVideoReader::spawn(&input, width, height, RGB)?;

        tracing::info!(device = %path, width, height, fps, "Camera opened");

        let producer = Self {
            input,
            device: path,
            size: (width, height),
            reader: Some(reader),
        };
        Ok(spawn_producer(video, producer))
    }
}

#[async_trait]
impl FrameProducer for CameraSource {
    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }

    async fn next_frame(&mut self, _video: &FrameBuffer) -> Result<Produced> {
        let (w, h) = self.size;
        if self.reader.is_none() {
            tracing::debug!(device = %self.device, "Reopening camera");
            self.reader = Some(RawVideoReader::spawn(&self.input, w, h, RGB)?);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::source_unavailable(&self.device, "camera not open"));
        };

        let read = reader.read_frame().await;
        match read {
            Ok(Some(data)) => Ok(Produced::Frame(Frame::from_raw(w, h, RGB, data)?)),
            // A camera never ends; treat it as a failure and reopen
            Ok(None) => {
                self.reader = None;
                Err(Error::source_unavailable(&self.device, "capture stream ended"))
            }
            Err(e) => {
                self.reader = None;
                Err(e)
            }
        }
    }
}
