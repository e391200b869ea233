use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use tracing::debug;

use crate::config::types::PlaceholderConfig;
use crate::error::Result;
use crate::sandbox::font::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH};

const TITLE_SCALE: u32 = 8;
const DETAIL_SCALE: u32 = 4;
const MAX_DETAIL_LINES: usize = 12;

#[derive(Debug, Clone)]
pub struct PlaceholderStyle {
    pub width: u32,
    pub height: u32,
    pub background: Rgb<u8>,
    pub foreground: Rgb<u8>,
}

impl From<&PlaceholderConfig> for PlaceholderStyle {
    fn from(config: &PlaceholderConfig) -> Self {
        Self {
            width: config.width.max(1),
            height: config.height.max(1),
            background: Rgb(config.background),
            foreground: Rgb(config.foreground),
        }
    }
}

impl Default for PlaceholderStyle {
    fn default() -> Self {
        Self::from(&PlaceholderConfig::default())
    }
}

/// Write a PNG with a centred `title` and a wrapped `detail` block to `path`.
pub fn render(path: &Path, title: &str, detail: &str, style: &PlaceholderStyle) -> Result<()> {
    let mut canvas = RgbImage::from_pixel(style.width, style.height, style.background);
    let margin = style.width / 12;
    let usable = style.width.saturating_sub(2 * margin);

    let title_scale = fit_scale(title.chars().count(), usable, TITLE_SCALE);
    let title_width = text_width(title.chars().count(), title_scale);
    let title_x = (style.width.saturating_sub(title_width)) / 2;
    let title_y = style.height * 2 / 5;
    draw_text(&mut canvas, title, title_x, title_y, title_scale, style.foreground);

    let columns = (usable / (cell_width() * DETAIL_SCALE)).max(1) as usize;
    let line_height = (GLYPH_HEIGHT + 3) * DETAIL_SCALE;
    let mut y = title_y + (GLYPH_HEIGHT + 6) * title_scale;
    for line in wrap(detail, columns).iter().take(MAX_DETAIL_LINES) {
        draw_text(&mut canvas, line, margin, y, DETAIL_SCALE, style.foreground);
        y += line_height;
    }

    canvas.save_with_format(path, ImageFormat::Png)?;
    debug!(path = %path.display(), title = %title, "Wrote placeholder image");
    Ok(())
}

fn cell_width() -> u32 {
    GLYPH_WIDTH + 1
}

fn text_width(chars: usize, scale: u32) -> u32 {
    (chars as u32 * cell_width()).saturating_sub(1) * scale
}

/// Largest scale up to `max` at which `chars` glyphs fit in `width` pixels.
fn fit_scale(chars: usize, width: u32, max: u32) -> u32 {
    let needed = (chars as u32 * cell_width()).max(1);
    (width / needed).clamp(1, max)
}

fn draw_text(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let mut pen_x = x;
    for c in text.chars() {
        let rows = glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    fill_block(
                        canvas,
                        pen_x + col * scale,
                        y + row as u32 * scale,
                        scale,
                        color,
                    );
                }
            }
        }
        pen_x += cell_width() * scale;
    }
}

fn fill_block(canvas: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for py in y..(y + size).min(height) {
        for px in x..(x + size).min(width) {
            canvas.put_pixel(px, py, color);
        }
    }
}

/// Greedy word wrap; words longer than a line are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > columns {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(columns);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > columns && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}
