//! Drawing helpers for overlays and diagnostic frames
//!
//! Text uses a built-in 5x7 bitmap font (upper case only; lower case input is
//! folded). Glyphs advance 6 pixels per character at scale 1.

use super::frame::Frame;

/// Glyph cell width including spacing, at scale 1
pub const GLYPH_ADVANCE: u32 = 6;
/// Line height used by multi-line text, at scale 1
pub const LINE_HEIGHT: u32 = 10;

pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const BLACK: [u8; 4] = [0, 0, 0, 255];
pub const YELLOW: [u8; 4] = [255, 255, 0, 255];

/// Fill an inclusive rectangle, clamped to the frame
pub fn fill_rect(frame: &mut Frame, left: i64, top: i64, right: i64, bottom: i64, color: [u8; 4]) {
    let max_x = frame.width() as i64 - 1;
    let max_y = frame.height() as i64 - 1;
    if max_x < 0 || max_y < 0 {
        return;
    }
    let left = left.clamp(0, max_x);
    let right = right.clamp(0, max_x);
    let top = top.clamp(0, max_y);
    let bottom = bottom.clamp(0, max_y);

    for y in top..=bottom {
        for x in left..=right {
            frame.put_pixel(x, y, color);
        }
    }
}

/// Pixel width of `text` at `scale`
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_ADVANCE * scale
}

/// Draw one line of text with its top-left corner at `(x, y)`
pub fn draw_text(frame: &mut Frame, text: &str, x: i64, y: i64, scale: u32, color: [u8; 4]) {
    let scale = scale.max(1) as i64;
    let mut cursor = x;

    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        let glyph = glyph_bits(ch).unwrap_or(UNKNOWN_GLYPH);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..5 {
                if (pattern >> (4 - col)) & 1 == 0 {
                    continue;
                }
                let px = cursor + col * scale;
                let py = y + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        frame.put_pixel(px + dx, py + dy, color);
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE as i64 * scale;
    }
}

/// Draw text with a one-pixel dark outline so it stays readable on any
/// background
pub fn draw_text_outlined(
    frame: &mut Frame,
    text: &str,
    x: i64,
    y: i64,
    scale: u32,
    color: [u8; 4],
) {
    for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
        draw_text(frame, text, x + dx, y + dy, scale, BLACK);
    }
    draw_text(frame, text, x, y, scale, color);
}

/// Draw several lines starting at `(x, y)`, offset by a small margin
pub fn draw_multiline_text<S: AsRef<str>>(frame: &mut Frame, x: i64, y: i64, lines: &[S]) {
    for (i, line) in lines.iter().enumerate() {
        let line_y = y + 6 + i as i64 * LINE_HEIGHT as i64;
        draw_text_outlined(frame, line.as_ref(), x + 10, line_y, 1, WHITE);
    }
}

/// Blend `overlay` into `base` in place: `base = base * (1 - alpha) + overlay * alpha`
///
/// Frames of different shapes are left untouched.
pub fn blend(base: &mut Frame, overlay: &Frame, alpha: f32) {
    if base.size() != overlay.size() || base.depth() != overlay.depth() {
        return;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    for (b, o) in base.data_mut().iter_mut().zip(overlay.data()) {
        *b = (*b as f32 * (1.0 - alpha) + *o as f32 * alpha).round() as u8;
    }
}

/// Copy `overlay` onto `frame` with its top-left corner at `(x, y)`
///
/// A 4-channel overlay is alpha composited; otherwise channels are copied.
/// Parts outside the frame are clipped.
pub fn draw_overlay(frame: &mut Frame, overlay: &Frame, x: i64, y: i64) {
    let depth = frame.depth();
    let has_alpha = overlay.depth() == 4;

    for oy in 0..overlay.height() {
        for ox in 0..overlay.width() {
            let fx = x + ox as i64;
            let fy = y + oy as i64;
            if fx < 0 || fy < 0 {
                continue;
            }
            let Some(src) = overlay.pixel(ox, oy) else {
                continue;
            };
            let src = expand(src);
            let Some(dst) = frame.pixel_mut(fx as u32, fy as u32) else {
                continue;
            };

            if has_alpha {
                let a = src[3] as f32 / 255.0;
                for c in 0..depth.min(3) {
                    dst[c] = (dst[c] as f32 * (1.0 - a) + src[c] as f32 * a).round() as u8;
                }
            } else {
                let n = depth.min(4);
                dst[..n].copy_from_slice(&src[..n]);
            }
        }
    }
}

fn expand(px: &[u8]) -> [u8; 4] {
    match px.len() {
        1 => [px[0], px[0], px[0], 255],
        2 => [px[0], px[0], px[0], px[1]],
        3 => [px[0], px[1], px[2], 255],
        _ => [px[0], px[1], px[2], px[3]],
    }
}

const UNKNOWN_GLYPH: [u8; 7] = [
    0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111,
];

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let glyph = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ' ' => [0; 7],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        ';' => [0, 0b01100, 0b01100, 0, 0b01100, 0b00100, 0b01000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '+' => [0, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0],
        '=' => [0, 0, 0b11111, 0, 0b11111, 0, 0],
        '/' => [0, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0],
        '\\' => [0, 0b10000, 0b01000, 0b00100, 0b00010, 0b00001, 0],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '[' => [0b01110, 0b01000, 0b01000, 0b01000, 0b01000, 0b01000, 0b01110],
        ']' => [0b01110, 0b00010, 0b00010, 0b00010, 0b00010, 0b00010, 0b01110],
        '<' => [0b00010, 0b00100, 0b01000, 0b10000, 0b01000, 0b00100, 0b00010],
        '>' => [0b01000, 0b00100, 0b00010, 0b00001, 0b00010, 0b00100, 0b01000],
        '|' => [0b00100; 7],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '*' => [0, 0b00100, 0b10101, 0b01110, 0b10101, 0b00100, 0],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '"' => [0b01010, 0b01010, 0b01010, 0, 0, 0, 0],
        _ => return None,
    };
    Some(glyph)
}
