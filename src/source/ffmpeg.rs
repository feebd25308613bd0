//! ffmpeg / ffprobe subprocess plumbing
//!
//! Decoding goes through an `ffmpeg` child process writing raw frames of a
//! fixed size to stdout; encoding goes the other way through stdin.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};

/// Stream properties discovered by ffprobe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// `None` when the container reports no usable rate
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Discover the first video stream's size and rate
///
/// `format` forces the input format (`v4l2` for cameras).
pub async fn probe(input: &str, format: Option<&str>) -> Result<VideoProbe> {
    let mut cmd = Command::new("ffprobe");
    cmd.arg("-v").arg("error");
    if let Some(format) = format {
        cmd.arg("-f").arg(format);
    }
    let output = cmd
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,r_frame_rate")
        .arg("-of")
        .arg("json")
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::source_unavailable(input, e))?;

    if !output.status.success() {
        return Err(Error::source_unavailable(
            input,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }

    parse_probe(&output.stdout).map_err(|reason| Error::source_unavailable(input, reason))
}

fn parse_probe(json: &[u8]) -> std::result::Result<VideoProbe, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("unreadable ffprobe output: {}", e))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err("video stream has no dimensions".to_string());
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));

    Ok(VideoProbe { width, height, fps })
}

/// Parse an ffmpeg rational such as `30000/1001`
pub(crate) fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Resolve a camera index or `/dev/videoN` path to a device path
pub fn camera_device(device: &str) -> String {
    match device.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => device.to_string(),
    }
}

fn pixel_format(depth: usize) -> Result<&'static str> {
    match depth {
        1 => Ok("gray"),
        2 => Ok("ya8"),
        3 => Ok("rgb24"),
        4 => Ok("rgba"),
        d => Err(Error::InvalidConfiguration(format!(
            "unsupported pixel size {}",
            d
        ))),
    }
}

/// Input side of a raw video reader
#[derive(Debug, Clone)]
pub enum ReaderInput {
    File(String),
    Camera {
        device: String,
        /// Requested capture rate
        fps: Option<f64>,
    },
}

/// ffmpeg process emitting fixed-size raw frames
pub struct RawVideoReader {
    child: Child,
    stdout: ChildStdout,
    frame_len: usize,
}

impl RawVideoReader {
    /// Start decoding `input`, scaled to `(width, height)` with `depth` channels
    pub fn spawn(input: &ReaderInput, width: u32, height: u32, depth: usize) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        let source = match input {
            ReaderInput::File(path) => {
                cmd.arg("-i").arg(path);
                path.clone()
            }
            ReaderInput::Camera { device, fps } => {
                let device = camera_device(device);
                cmd.arg("-f").arg("v4l2");
                if let Some(fps) = fps {
                    cmd.arg("-framerate").arg(format!("{}", fps));
                }
                cmd.arg("-i").arg(&device);
                device
            }
        };

        cmd.arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{}", width, height))
            .arg("-pix_fmt")
            .arg(pixel_format(depth)?)
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::source_unavailable(&source, e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::source_unavailable(&source, "failed to capture ffmpeg stdout"))?;

        tracing::debug!(source = %source, width, height, "ffmpeg reader started");

        Ok(Self {
            child,
            stdout,
            frame_len: width as usize * height as usize * depth,
        })
    }

    /// Read the next frame's bytes; `None` at end of stream
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buffer).await {
            Ok(_) => Ok(Some(buffer)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the process
    pub async fn close(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Supplier of fixed-size raw frames
#[async_trait]
pub trait RawFrameReader: Send {
    /// Next frame's bytes; `None` at end of stream
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>>;

    async fn close(self: Box<Self>);
}

#[async_trait]
impl RawFrameReader for RawVideoReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        RawVideoReader::read_frame(self).await
    }

    async fn close(self: Box<Self>) {
        RawVideoReader::close(*self).await
    }
}

/// ffmpeg process encoding raw frames from stdin into a video file
pub struct RawVideoWriter {
    child: Child,
    stdin: ChildStdin,
}

impl RawVideoWriter {
    pub fn spawn(
        path: &Path,
        width: u32,
        height: u32,
        depth: usize,
        fps: f64,
        encoder_args: &[&str],
    ) -> Result<Self> {
        let target = path.display().to_string();
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg(pixel_format(depth)?)
            .arg("-video_size")
            .arg(format!("{}x{}", width, height))
            .arg("-framerate")
            .arg(format!("{}", fps))
            .arg("-i")
            .arg("-");
        cmd.args(encoder_args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::source_unavailable(&target, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::source_unavailable(&target, "failed to capture ffmpeg stdin"))?;

        Ok(Self { child, stdin })
    }

    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.stdin.write_all(data).await?;
        Ok(())
    }

    /// Close stdin and wait for the encoder to finish the file
    pub async fn finish(self) -> Result<()> {
        let Self { mut child, stdin } = self;
        drop(stdin);
        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::Io(std::io::Error::other(format!(
                "ffmpeg exited with {}",
                status
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        let ntsc = parse_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    #[test]
    fn test_parse_probe() {
        let json = br#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"0/0","r_frame_rate":"24/1"}]}"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(
            probe,
            VideoProbe {
                width: 640,
                height: 480,
                fps: Some(24.0)
            }
        );
    }

    #[test]
    fn test_parse_probe_without_stream() {
        assert!(parse_probe(br#"{"streams":[]}"#).is_err());
        assert!(parse_probe(b"not json").is_err());
    }

    #[test]
    fn test_camera_device() {
        assert_eq!(camera_device("0"), "/dev/video0");
        assert_eq!(camera_device("/dev/video2"), "/dev/video2");
    }
}
