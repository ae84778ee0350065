//! Decoded RGBA8 frames
//!
//! **Why**: Every stage of the panel pipeline (cache, crop, filter, resize,
//! overlay) passes frames around. Pixel data sits behind an `Arc` so cache
//! hits and reference lookups are cheap clones; mutation goes through
//! `Arc::make_mut` (copy-on-write).
//!
//! **Used by**: Decode backends (producer), FrameCache (owner), Compositor,
//! filters, export sinks.
//!
//! # Layout
//!
//! Tightly packed RGBA, 4 bytes/pixel, row-major, no stride padding.

use image::{RgbaImage, imageops};
use std::sync::Arc;

/// Frame origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Pixel data produced by a decoder (or derived from one)
    Decoded,
    /// Substituted after a decode failure (black or last good frame)
    Placeholder,
}

#[derive(Debug, Clone)]
struct FrameData {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
}

/// Single RGBA8 frame with cheap clones
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<FrameData>,
    status: FrameStatus,
}

impl Frame {
    /// Create an opaque black placeholder frame
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut pixels = vec![0u8; width * height * 4];
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self {
            data: Arc::new(FrameData { pixels, width, height }),
            status: FrameStatus::Placeholder,
        }
    }

    /// Wrap a decoded RGBA buffer.
    ///
    /// Buffer length must be `width * height * 4`; shorter buffers are padded
    /// with black, longer ones truncated.
    pub fn from_u8_buffer(mut pixels: Vec<u8>, width: usize, height: usize) -> Self {
        let expected = width * height * 4;
        if pixels.len() != expected {
            log::warn!(
                "Frame buffer size mismatch: got {} bytes, expected {} ({}x{})",
                pixels.len(),
                expected,
                width,
                height
            );
            pixels.resize(expected, 0);
        }
        Self {
            data: Arc::new(FrameData { pixels, width, height }),
            status: FrameStatus::Decoded,
        }
    }

    /// Wrap an `image` buffer
    pub fn from_image(img: RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        Self::from_u8_buffer(img.into_raw(), w as usize, h as usize)
    }

    /// Same pixels, marked as a placeholder
    pub fn as_placeholder(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            status: FrameStatus::Placeholder,
        }
    }

    /// Same pixels, explicit status
    pub fn with_status(mut self, status: FrameStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == FrameStatus::Placeholder
    }

    pub fn width(&self) -> usize {
        self.data.width
    }

    pub fn height(&self) -> usize {
        self.data.height
    }

    /// (width, height)
    pub fn resolution(&self) -> (usize, usize) {
        (self.data.width, self.data.height)
    }

    /// Raw RGBA bytes
    pub fn pixels(&self) -> &[u8] {
        &self.data.pixels
    }

    /// Mutable RGBA bytes (copies if shared)
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut Arc::make_mut(&mut self.data).pixels
    }

    /// Memory footprint of pixel data in bytes
    pub fn mem(&self) -> usize {
        self.data.pixels.len()
    }

    /// True if both frames share the same pixel allocation
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Copy into an `image` buffer
    pub fn to_image(&self) -> RgbaImage {
        // Length invariant is enforced in constructors
        RgbaImage::from_raw(
            self.data.width as u32,
            self.data.height as u32,
            self.data.pixels.clone(),
        )
        .unwrap_or_else(|| RgbaImage::new(self.data.width as u32, self.data.height as u32))
    }

    /// Extract a sub-rectangle, clipped to the frame bounds.
    ///
    /// Returns a clone when the rect covers the whole frame.
    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> Frame {
        let (fw, fh) = self.resolution();
        let x = x.min(fw.saturating_sub(1));
        let y = y.min(fh.saturating_sub(1));
        let w = w.clamp(1, fw - x);
        let h = h.clamp(1, fh - y);
        if x == 0 && y == 0 && w == fw && h == fh {
            return self.clone();
        }

        let row_bytes = w * 4;
        let mut out = Vec::with_capacity(row_bytes * h);
        for row in y..y + h {
            let start = (row * fw + x) * 4;
            out.extend_from_slice(&self.data.pixels[start..start + row_bytes]);
        }
        Self {
            data: Arc::new(FrameData { pixels: out, width: w, height: h }),
            status: self.status,
        }
    }

    /// Bilinear resize to exact dimensions
    pub fn resize(&self, width: usize, height: usize) -> Frame {
        let width = width.max(1);
        let height = height.max(1);
        if (width, height) == self.resolution() {
            return self.clone();
        }
        let resized = imageops::resize(
            &self.to_image(),
            width as u32,
            height as u32,
            imageops::FilterType::Triangle,
        );
        let mut out = Frame::from_image(resized);
        out.status = self.status;
        out
    }

    /// Copy `src` into this frame with its top-left corner at (x, y), clipped.
    pub fn blit(&mut self, src: &Frame, x: usize, y: usize) {
        let (dw, dh) = self.resolution();
        let (sw, sh) = src.resolution();
        if x >= dw || y >= dh {
            return;
        }
        let copy_w = sw.min(dw - x);
        let copy_h = sh.min(dh - y);
        let src_px = src.pixels();
        let dst = self.pixels_mut();
        for row in 0..copy_h {
            let s = row * sw * 4;
            let d = ((y + row) * dw + x) * 4;
            dst[d..d + copy_w * 4].copy_from_slice(&src_px[s..s + copy_w * 4]);
        }
    }
}
