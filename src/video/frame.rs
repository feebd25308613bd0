//! Frame type
//!
//! A frame is an owned `height × width × depth` pixel buffer with 8 bits per
//! channel, laid out row-major as `[y][x][channel]`. Dimensions are always
//! given as `(width, height)`.

use crate::error::{Error, Result};

/// Channel count of RGB frames
pub const RGB: usize = 3;
/// Channel count of RGBA frames
pub const RGBA: usize = 4;

/// One decoded image sample
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    depth: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Create an all-zero frame
    pub fn blank(width: u32, height: u32, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
            data: vec![0; Self::byte_len(width, height, depth)],
        }
    }

    /// Create a frame filled with a single color
    ///
    /// Only the first `depth` components of `color` are used.
    pub fn solid(width: u32, height: u32, depth: usize, color: [u8; 4]) -> Self {
        let mut frame = Self::blank(width, height, depth);
        frame.fill(color);
        frame
    }

    /// Wrap raw bytes, validating their length against the dimensions
    pub fn from_raw(width: u32, height: u32, depth: usize, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height, depth);
        if data.len() != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            depth,
            data,
        })
    }

    /// Number of bytes a frame of the given shape occupies
    pub fn byte_len(width: u32, height: u32, depth: usize) -> usize {
        width as usize * height as usize * depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `(width, height)`
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Whether every byte is zero
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Channels of the pixel at `(x, y)`, or `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        let offset = self.offset(x, y)?;
        Some(&self.data[offset..offset + self.depth])
    }

    /// Mutable channels of the pixel at `(x, y)`
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut [u8]> {
        let offset = self.offset(x, y)?;
        let depth = self.depth;
        Some(&mut self.data[offset..offset + depth])
    }

    /// Set a pixel; out-of-bounds writes are ignored
    pub fn put_pixel(&mut self, x: i64, y: i64, color: [u8; 4]) {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return;
        };
        let n = self.depth.min(4);
        if let Some(px) = self.pixel_mut(x, y) {
            px[..n].copy_from_slice(&color[..n]);
        }
    }

    /// Fill the whole frame with one color
    pub fn fill(&mut self, color: [u8; 4]) {
        let depth = self.depth.min(4);
        for px in self.data.chunks_exact_mut(self.depth) {
            px[..depth].copy_from_slice(&color[..depth]);
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * self.depth)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("bytes", &self.data.len())
            .finish()
    }
}
