//! Stock frame modifiers
//!
//! Overlays for frame rate statistics and debug information, simple color
//! filters and the watermark. Each constructor returns a named
//! [`FrameModifier`] ready for [`FrameBuffer::add_frame_modifier`].

use std::sync::Arc;

use super::buffer::{FrameBuffer, FrameModifier};
use super::codec::{Codec, ImageCodec};
use super::draw;
use super::frame::Frame;
use super::watermark::Watermark;

/// Average FPS in the top-left corner
pub fn render_fps() -> FrameModifier {
    FrameModifier::new("render_fps", |video, frame| {
        let stats = video.governor().stats();
        let text = format!("FPS: {:.2}", stats.average_fps);
        draw::draw_text_outlined(frame, &text, 10, 10, 2, draw::WHITE);
        Ok(())
    })
}

/// Integer average FPS in the top-right corner, in yellow
pub fn render_fraps_fps() -> FrameModifier {
    FrameModifier::new("render_fraps_fps", |video, frame| {
        let average = video.governor().stats().average_fps;
        let fps = if average.is_finite() {
            average.max(0.0) as u64
        } else {
            0
        };
        let text = fps.to_string();
        let scale = 3;
        let x = video.width() as i64 - draw::text_width(&text, scale) as i64 - 10;
        draw::draw_text_outlined(frame, &text, x, 10, scale, draw::YELLOW);
        Ok(())
    })
}

/// Frame time, instantaneous, windowed and average FPS
pub fn render_full_fps() -> FrameModifier {
    FrameModifier::new("render_full_fps", |video, frame| {
        let stats = video.governor().stats();
        draw::draw_multiline_text(
            frame,
            0,
            0,
            &[
                format!("Frame Time: {:.2} ms", stats.frame_time.as_secs_f64() * 1000.0),
                format!("Instantaneous FPS: {:.2}", stats.instantaneous_fps),
                format!(
                    "FPS over {:.1} Seconds: {:.2}",
                    stats.window.as_secs_f64(),
                    stats.window_fps
                ),
                format!("Average FPS: {:.2}", stats.average_fps),
            ],
        );
        Ok(())
    })
}

/// Full diagnostic overlay: version, video shape, rates and pipeline
pub fn render_debug_info() -> FrameModifier {
    FrameModifier::new("render_debug_info", |video, frame| {
        draw::draw_multiline_text(frame, 0, 0, &debug_lines(video));
        Ok(())
    })
}

fn debug_lines(video: &FrameBuffer) -> Vec<String> {
    let stats = video.governor().stats();
    let mut lines = vec![
        "=== [Debug Information] ===".to_string(),
        format!("Wormhole Version: {}", crate::VERSION),
        ">>> Video Information <<<".to_string(),
        format!("Render Source: {}", video.source_label()),
        format!(
            "Width: {} | Height: {} | Pixel Size: {}",
            video.width(),
            video.height(),
            video.depth()
        ),
        format!("Maximum Render FPS: {}", video.max_fps()),
        ">>> Frame Rate Information <<<".to_string(),
        format!("Frame Time: {:.2} ms", stats.frame_time.as_secs_f64() * 1000.0),
        format!("Instantaneous FPS: {:.2}", stats.instantaneous_fps),
        format!(
            "FPS over {:.1} Seconds: {:.2}",
            stats.window.as_secs_f64(),
            stats.window_fps
        ),
        format!("Average FPS: {:.2}", stats.average_fps),
        format!("Frames Rendered: {}", stats.frames_rendered),
        ">>> Frame Modifiers <<<".to_string(),
    ];
    lines.extend(video.modifier_names());
    lines.push(">>> Frame Subscribers <<<".to_string());
    lines.extend(video.subscriber_names());
    lines.push("=== [Debug Information] ===".to_string());
    lines
}

/// Replace every pixel's color channels with their luma
pub fn grayscale() -> FrameModifier {
    FrameModifier::new("grayscale", |_, frame| {
        let depth = frame.depth();
        if depth < 3 {
            return Ok(());
        }
        for px in frame.data_mut().chunks_exact_mut(depth) {
            let luma = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
                .round() as u8;
            px[..3].fill(luma);
        }
        Ok(())
    })
}

/// Invert color channels, leaving alpha untouched
pub fn inverse() -> FrameModifier {
    FrameModifier::new("inverse", |_, frame| {
        let depth = frame.depth();
        let channels = if depth == 2 || depth == 4 { depth - 1 } else { depth };
        for px in frame.data_mut().chunks_exact_mut(depth) {
            for c in &mut px[..channels] {
                *c = !*c;
            }
        }
        Ok(())
    })
}

/// Blend the watermark into the bottom-left corner
pub fn watermark(watermark: Arc<Watermark>) -> FrameModifier {
    let codec = ImageCodec::new();
    FrameModifier::new("watermark", move |video, frame| {
        let overlay = watermark.image();
        let (width, height) = video.size();

        let padding = (height / 50).max(width / 50) as i64;
        let ratio = (width as f64 / 1.5 / overlay.width() as f64)
            .min(height as f64 / 6.0 / overlay.height() as f64);
        let target_w = ((overlay.width() as f64 * ratio) as u32).max(1);
        let target_h = ((overlay.height() as f64 * ratio) as u32).max(1);
        let scaled = codec.resize(&overlay, target_w, target_h)?;

        let mut marked: Frame = frame.clone();
        let y = height as i64 - target_h as i64 - padding;
        draw::draw_overlay(&mut marked, &scaled, padding, y);
        draw::blend(frame, &marked, 0.5);
        Ok(())
    })
}
