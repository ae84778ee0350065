//! Text overlays: panel captions and the export frame marker
//!
//! Text is shaped with cosmic-text into a coverage mask, then blended onto
//! the frame as white glyphs with a 1px black outline so labels stay legible
//! over any content.

use std::sync::Mutex;

use cosmic_text::{Attrs as TextAttrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};

use super::frame::Frame;

lazy_static::lazy_static! {
    static ref FONT_SYSTEM: Mutex<FontSystem> = Mutex::new(FontSystem::new());
    static ref SWASH_CACHE: Mutex<SwashCache> = Mutex::new(SwashCache::new());
}

/// Font size for panel captions, proportional to panel height
pub fn label_font_px(panel_height: usize) -> f32 {
    let scale = (panel_height as f32 / 500.0).clamp(0.4, 1.2);
    22.0 * scale
}

/// Rendered text coverage
#[derive(Debug, Clone, Default)]
pub struct TextMask {
    pub width: usize,
    pub height: usize,
    pub alpha: Vec<u8>,
}

impl TextMask {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Shape and rasterize `text` into an alpha mask
pub fn render_mask(text: &str, font_px: f32) -> TextMask {
    if text.is_empty() || font_px <= 0.0 {
        return TextMask::default();
    }
    let mut font_system = FONT_SYSTEM.lock().unwrap_or_else(|e| e.into_inner());
    let mut swash_cache = SWASH_CACHE.lock().unwrap_or_else(|e| e.into_inner());

    let line_height = font_px * 1.2;
    let mut buffer = Buffer::new(&mut font_system, Metrics::new(font_px, line_height));
    buffer.set_size(&mut font_system, Some(4096.0), None);
    let attrs = TextAttrs::new().family(Family::SansSerif);
    buffer.set_text(&mut font_system, text, &attrs, Shaping::Advanced, None);
    buffer.shape_until_scroll(&mut font_system, false);

    let mut max_x = 0.0f32;
    let mut max_y = 0.0f32;
    for run in buffer.layout_runs() {
        for glyph in run.glyphs.iter() {
            max_x = max_x.max(glyph.x + glyph.w);
        }
        max_y = max_y.max(run.line_y + line_height * 0.3);
    }
    let width = max_x.ceil() as usize;
    let height = max_y.ceil() as usize;
    if width == 0 || height == 0 {
        return TextMask::default();
    }

    let mut alpha = vec![0u8; width * height];
    buffer.draw(
        &mut font_system,
        &mut swash_cache,
        Color::rgba(255, 255, 255, 255),
        |x, y, w, h, color| {
            if color.a() == 0 {
                return;
            }
            for dy in 0..h as i32 {
                for dx in 0..w as i32 {
                    let (px, py) = (x + dx, y + dy);
                    if px < 0 || py < 0 || px as usize >= width || py as usize >= height {
                        continue;
                    }
                    let idx = py as usize * width + px as usize;
                    alpha[idx] = alpha[idx].max(color.a());
                }
            }
        },
    );

    TextMask { width, height, alpha }
}

fn blend_mask(frame: &mut Frame, mask: &TextMask, x: i64, y: i64, rgb: [u8; 3]) {
    let (fw, fh) = frame.resolution();
    let pixels = frame.pixels_mut();
    for my in 0..mask.height {
        let py = y + my as i64;
        if py < 0 || py >= fh as i64 {
            continue;
        }
        for mx in 0..mask.width {
            let px = x + mx as i64;
            if px < 0 || px >= fw as i64 {
                continue;
            }
            let a = mask.alpha[my * mask.width + mx] as u32;
            if a == 0 {
                continue;
            }
            let idx = (py as usize * fw + px as usize) * 4;
            for c in 0..3 {
                let dst = pixels[idx + c] as u32;
                pixels[idx + c] = ((rgb[c] as u32 * a + dst * (255 - a)) / 255) as u8;
            }
        }
    }
}

fn blend_outlined(frame: &mut Frame, mask: &TextMask, x: i64, y: i64) {
    for (ox, oy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
        blend_mask(frame, mask, x + ox, y + oy, [0, 0, 0]);
    }
    blend_mask(frame, mask, x, y, [255, 255, 255]);
}

/// Draw outlined text with its top-left corner at (x, y). Returns text size.
pub fn draw_text(frame: &mut Frame, text: &str, x: i64, y: i64, font_px: f32) -> (usize, usize) {
    let mask = render_mask(text, font_px);
    if mask.is_empty() {
        return (0, 0);
    }
    blend_outlined(frame, &mask, x, y);
    (mask.width, mask.height)
}

/// Caption centered horizontally near the top of the panel
pub fn draw_caption(frame: &mut Frame, text: &str) {
    let font_px = label_font_px(frame.height());
    let mask = render_mask(text, font_px);
    if mask.is_empty() {
        return;
    }
    let x = (frame.width() as i64 - mask.width as i64) / 2;
    let y = (font_px * 0.4) as i64;
    blend_outlined(frame, &mask, x, y);
}

/// `"Frame: N"` marker in the bottom-left corner
pub fn draw_frame_marker(frame: &mut Frame, index: usize) {
    let font_px = label_font_px(frame.height());
    let text = format!("Frame: {}", index);
    let y = frame.height() as i64 - (font_px * 1.6) as i64;
    draw_text(frame, &text, 10, y, font_px);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_font_scale_clamped() {
        assert_eq!(label_font_px(100), 22.0 * 0.4);
        assert_eq!(label_font_px(500), 22.0);
        assert_eq!(label_font_px(5000), 22.0 * 1.2);
    }

    #[test]
    fn test_empty_text_renders_nothing() {
        assert!(render_mask("", 20.0).is_empty());
        let mut f = Frame::new(16, 16);
        assert_eq!(draw_text(&mut f, "", 0, 0, 20.0), (0, 0));
    }

    #[test]
    fn test_blend_mask_clips_and_mixes() {
        let mut f = Frame::new(2, 2);
        let mask = TextMask {
            width: 2,
            height: 1,
            alpha: vec![255, 0],
        };
        // half off the left edge: only mask column 1 would land, and it is transparent
        blend_mask(&mut f, &mask, -1, 0, [255, 255, 255]);
        assert!(f.pixels().chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
        blend_mask(&mut f, &mask, 1, 1, [255, 255, 255]);
        let idx = (1 * 2 + 1) * 4;
        assert_eq!(&f.pixels()[idx..idx + 4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_caption_keeps_frame_size() {
        let mut f = Frame::new(64, 32);
        draw_caption(&mut f, "0: clip.mp4");
        draw_frame_marker(&mut f, 12);
        assert_eq!(f.resolution(), (64, 32));
    }
}
