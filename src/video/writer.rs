//! Record a frame buffer to a video file
//!
//! A governed loop pulls the latest frame and pipes it to an ffmpeg encoder.
//! The encoder is picked from the file extension.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::source::ffmpeg::RawVideoWriter;
use crate::stats::{FrameGovernor, GovernorOptions};

use super::buffer::FrameBuffer;
use super::codec::{Codec, ImageCodec};

/// Writer options; unset fields follow the recorded buffer
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_fps: Option<f64>,
    pub print_fps: bool,
}

impl WriterOptions {
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

/// ffmpeg encoder arguments for a file extension
pub fn encoder_args(path: &Path) -> &'static [&'static str] {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") => &["-c:v", "mpeg4"],
        Some("avi") => &["-c:v", "mpeg4", "-vtag", "xvid"],
        Some("webm") => &["-c:v", "libvpx"],
        _ => {
            tracing::warn!(path = %path.display(), "Unknown video container, using ffmpeg default encoder");
            &[]
        }
    }
}

/// Background recording of a frame buffer
#[derive(Debug)]
pub struct VideoWriter {
    path: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl VideoWriter {
    /// Start recording `video` into `path`
    pub fn start(
        video: Arc<FrameBuffer>,
        path: impl Into<PathBuf>,
        options: WriterOptions,
    ) -> Result<Self> {
        let path = path.into();
        let width = options.width.unwrap_or(video.width());
        let height = options.height.unwrap_or(video.height());
        let fps = options.max_fps.unwrap_or(video.max_fps());
        if !fps.is_finite() {
            return Err(Error::InvalidConfiguration(
                "video writer needs a finite frame rate".into(),
            ));
        }

        let governor =
            FrameGovernor::with_options(GovernorOptions::new(fps).print_fps(options.print_fps))?;
        let output = RawVideoWriter::spawn(
            &path,
            width,
            height,
            video.depth(),
            fps,
            encoder_args(&path),
        )?;

        tracing::info!(path = %path.display(), width, height, fps, "Video writer started");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(record(
            video,
            output,
            governor,
            (width, height),
            cancel.clone(),
        ));

        Ok(Self { path, cancel, task })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop recording and wait for the file to be finalized
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(std::io::Error::other(e))),
        }
    }
}

async fn record(
    video: Arc<FrameBuffer>,
    mut output: RawVideoWriter,
    governor: FrameGovernor,
    (width, height): (u32, u32),
    cancel: CancellationToken,
) -> Result<()> {
    let codec = ImageCodec::new();

    while !cancel.is_cancelled() {
        let frame = video.get_frame();
        let written = if frame.size() == (width, height) {
            output.write_frame(frame.data()).await
        } else {
            match codec.resize(&frame, width, height) {
                Ok(resized) => output.write_frame(resized.data()).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            tracing::error!(error = %e, "Video writer failed");
            return Err(e);
        }

        tokio::select! {
            _ = governor.advance_one_frame() => {}
            _ = cancel.cancelled() => break,
        }
    }

    output.finish().await?;
    tracing::info!("Video writer finished");
    Ok(())
}
