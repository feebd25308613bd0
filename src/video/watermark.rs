//! "Powered by Wormhole" watermark resource
//!
//! The overlay image is loaded at most once, the first time a watermark
//! modifier runs. Without a configured image file a text badge is rendered
//! instead.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use super::codec::{Codec, ImageCodec};
use super::draw;
use super::frame::{Frame, RGBA};

const BADGE_TEXT: &str = "POWERED BY WORMHOLE";

/// Lazily loaded RGBA watermark overlay
#[derive(Debug, Default)]
pub struct Watermark {
    path: Option<PathBuf>,
    image: OnceLock<Arc<Frame>>,
}

impl Watermark {
    /// Watermark loaded from an image file, falling back to the text badge
    /// when the file cannot be decoded
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            image: OnceLock::new(),
        }
    }

    /// Watermark using the built-in text badge
    pub fn badge() -> Self {
        Self::default()
    }

    /// The overlay image, loading it on first use
    pub fn image(&self) -> Arc<Frame> {
        self.image.get_or_init(|| Arc::new(self.load())).clone()
    }

    fn load(&self) -> Frame {
        let Some(path) = &self.path else {
            return render_badge();
        };

        let decoded = std::fs::read(path)
            .map_err(crate::Error::from)
            .and_then(|bytes| ImageCodec::new().decode(&bytes, RGBA));
        match decoded {
            Ok(frame) => {
                tracing::debug!(path = %path.display(), "Watermark loaded");
                frame
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load watermark, using text badge");
                render_badge()
            }
        }
    }
}

/// White text on a transparent background
fn render_badge() -> Frame {
    let scale = 2;
    let width = draw::text_width(BADGE_TEXT, scale) + 8;
    let height = 7 * scale + 8;

    let mut frame = Frame::blank(width, height, RGBA);
    draw::draw_text(&mut frame, BADGE_TEXT, 4, 4, scale, draw::WHITE);
    frame
}
