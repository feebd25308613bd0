//! Image codec capability
//!
//! Publishers and viewers only see the [`Codec`] trait. [`ImageCodec`] is the
//! implementation backed by the `image` crate.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageBuffer, ImageEncoder, Luma, LumaA, Pixel, Rgb, Rgba};

use crate::error::{Error, Result};

use super::frame::Frame;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Compressed image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// MIME type of the encoded payload
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// Encode, decode and resize capability
pub trait Codec: Send + Sync {
    /// Compress a frame
    fn encode(&self, frame: &Frame, format: ImageFormat) -> Result<Bytes>;

    /// Decompress an image into a frame with `depth` channels
    fn decode(&self, data: &[u8], depth: usize) -> Result<Frame>;

    /// Scale a frame to `(width, height)`
    fn resize(&self, frame: &Frame, width: u32, height: u32) -> Result<Frame>;
}

/// Codec backed by the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    jpeg_quality: u8,
}

impl ImageCodec {
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Set the JPEG quality (1-100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>> {
        let (width, height) = frame.size();
        let mut out = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
            match frame.depth() {
                1 => encoder.encode(frame.data(), width, height, ColorType::L8)?,
                3 => encoder.encode(frame.data(), width, height, ColorType::Rgb8)?,
                // JPEG has no alpha channel
                2 | 4 => encoder.encode(&strip_alpha(frame), width, height, ColorType::Rgb8)?,
                d => return Err(unsupported_depth(d)),
            }
        }
        Ok(out)
    }

    fn encode_png(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let color = color_type(frame.depth())?;
        PngEncoder::new(&mut out).write_image(
            frame.data(),
            frame.width(),
            frame.height(),
            color,
        )?;
        Ok(out)
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for ImageCodec {
    fn encode(&self, frame: &Frame, format: ImageFormat) -> Result<Bytes> {
        let data = match format {
            ImageFormat::Jpeg => self.encode_jpeg(frame)?,
            ImageFormat::Png => self.encode_png(frame)?,
        };
        Ok(Bytes::from(data))
    }

    fn decode(&self, data: &[u8], depth: usize) -> Result<Frame> {
        let image = image::load_from_memory(data)?;
        let (width, height) = (image.width(), image.height());
        let raw = match depth {
            1 => image.to_luma8().into_raw(),
            2 => image.to_luma_alpha8().into_raw(),
            3 => image.to_rgb8().into_raw(),
            4 => image.to_rgba8().into_raw(),
            d => return Err(unsupported_depth(d)),
        };
        Frame::from_raw(width, height, depth, raw)
    }

    fn resize(&self, frame: &Frame, width: u32, height: u32) -> Result<Frame> {
        if frame.size() == (width, height) {
            return Ok(frame.clone());
        }
        if width == 0 || height == 0 {
            return Err(Error::Codec(format!(
                "cannot resize to {}x{}",
                width, height
            )));
        }

        let raw = match frame.depth() {
            1 => resize_raw::<Luma<u8>>(frame, width, height)?,
            2 => resize_raw::<LumaA<u8>>(frame, width, height)?,
            3 => resize_raw::<Rgb<u8>>(frame, width, height)?,
            4 => resize_raw::<Rgba<u8>>(frame, width, height)?,
            d => return Err(unsupported_depth(d)),
        };
        Frame::from_raw(width, height, frame.depth(), raw)
    }
}

fn resize_raw<P>(frame: &Frame, width: u32, height: u32) -> Result<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let buffer: ImageBuffer<P, Vec<u8>> =
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or_else(|| Error::Codec("frame buffer too small for its dimensions".into()))?;
    Ok(imageops::resize(&buffer, width, height, FilterType::Triangle).into_raw())
}

fn strip_alpha(frame: &Frame) -> Vec<u8> {
    let depth = frame.depth();
    let mut rgb = Vec::with_capacity(frame.width() as usize * frame.height() as usize * 3);
    for px in frame.data().chunks_exact(depth) {
        if depth == 2 {
            rgb.extend_from_slice(&[px[0], px[0], px[0]]);
        } else {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    rgb
}

fn color_type(depth: usize) -> Result<ColorType> {
    match depth {
        1 => Ok(ColorType::L8),
        2 => Ok(ColorType::La8),
        3 => Ok(ColorType::Rgb8),
        4 => Ok(ColorType::Rgba8),
        d => Err(unsupported_depth(d)),
    }
}

fn unsupported_depth(depth: usize) -> Error {
    Error::Codec(format!("unsupported channel depth {}", depth))
}
