//! Shared region-of-interest (ROI) geometry
//!
//! One normalized ROI `(x0, y0, x1, y1)` in `[0,1]²` is applied identically to
//! every panel. Panels map pixel input to ROI space through a `PanelView`
//! (panel size + native frame size): the visible crop is letterboxed inside the
//! panel, so all conversions go through the content rect.
//!
//! Pure math, no I/O.

use glam::DVec2;
use log::debug;
use serde::{Deserialize, Serialize};

/// Default multiplicative zoom per wheel notch
pub const ZOOM_BASE: f64 = 0.85;

/// Drags smaller than this fraction of the visible frame are ignored
pub const MIN_DRAG_FRACTION: f64 = 0.02;

/// Both ROI extents at or above this snap to the full frame
const SNAP_FULL: f64 = 0.999;

/// Smallest ROI extent reachable by zooming in
const MIN_EXTENT: f64 = 1e-3;

/// Normalized sub-rectangle of the frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Roi {
    pub const FULL: Roi = Roi {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    /// Validated constructor: `0 <= x0 < x1 <= 1`, same for y
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Roi> {
        let ok = (0.0..x1).contains(&x0) && x1 <= 1.0 && (0.0..y1).contains(&y0) && y1 <= 1.0;
        ok.then_some(Roi { x0, y0, x1, y1 })
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn min(&self) -> DVec2 {
        DVec2::new(self.x0, self.y0)
    }

    pub fn size(&self) -> DVec2 {
        DVec2::new(self.width(), self.height())
    }

    pub fn is_full(&self) -> bool {
        *self == Roi::FULL
    }

    fn from_min_size(min: DVec2, size: DVec2) -> Roi {
        Roi {
            x0: min.x,
            y0: min.y,
            x1: min.x + size.x,
            y1: min.y + size.y,
        }
    }

    /// Pixel crop rect `(x, y, w, h)` for a frame of `width x height`.
    ///
    /// Edges are rounded to the nearest pixel; the rect is never empty.
    pub fn to_pixel_rect(&self, width: usize, height: usize) -> (usize, usize, usize, usize) {
        let axis = |a0: f64, a1: f64, n: usize| -> (usize, usize) {
            let n_f = n as f64;
            let start = ((a0 * n_f).round() as usize).min(n.saturating_sub(1));
            let end = ((a1 * n_f).round() as usize).clamp(start + 1, n.max(1));
            (start, end - start)
        };
        let (x, w) = axis(self.x0, self.x1, width);
        let (y, h) = axis(self.y0, self.y1, height);
        (x, y, w, h)
    }
}

impl Default for Roi {
    fn default() -> Self {
        Roi::FULL
    }
}

/// Panel geometry used to convert panel-local pixels into ROI space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelView {
    /// Panel size in pixels
    pub panel: DVec2,
    /// Native frame resolution of the video shown in the panel
    pub frame: DVec2,
}

impl PanelView {
    pub fn new(panel_w: f64, panel_h: f64, frame_w: f64, frame_h: f64) -> Self {
        Self {
            panel: DVec2::new(panel_w, panel_h),
            frame: DVec2::new(frame_w, frame_h),
        }
    }

    /// Letterboxed rect `(origin, size)` of the visible crop inside the panel
    pub fn content_rect(&self, roi: &Roi) -> (DVec2, DVec2) {
        let crop = roi.size() * self.frame;
        if crop.x <= 0.0 || crop.y <= 0.0 {
            return (DVec2::ZERO, DVec2::ZERO);
        }
        let scale = (self.panel.x / crop.x).min(self.panel.y / crop.y);
        let size = crop * scale;
        ((self.panel - size) * 0.5, size)
    }
}

/// Shared zoom/pan state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub roi: Roi,
    pub zoom_base: f64,
    pub min_drag_fraction: f64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            roi: Roi::FULL,
            zoom_base: ZOOM_BASE,
            min_drag_fraction: MIN_DRAG_FRACTION,
        }
    }
}

impl ViewportState {
    pub fn new(zoom_base: f64, min_drag_fraction: f64) -> Self {
        Self {
            roi: Roi::FULL,
            zoom_base,
            min_drag_fraction,
        }
    }

    pub fn reset(&mut self) {
        self.roi = Roi::FULL;
    }

    /// Panel pixel -> fractional position within the visible crop (unclamped)
    pub fn panel_to_visible(&self, view: &PanelView, p: DVec2) -> DVec2 {
        let (origin, size) = view.content_rect(&self.roi);
        if size.x <= 0.0 || size.y <= 0.0 {
            return DVec2::splat(0.5);
        }
        (p - origin) / size
    }

    /// Panel pixel -> absolute normalized frame coordinates
    pub fn panel_to_norm(&self, view: &PanelView, p: DVec2) -> DVec2 {
        self.roi.min() + self.panel_to_visible(view, p) * self.roi.size()
    }

    /// Absolute normalized frame coordinates -> panel pixel
    pub fn norm_to_panel(&self, view: &PanelView, n: DVec2) -> DVec2 {
        let (origin, size) = view.content_rect(&self.roi);
        origin + (n - self.roi.min()) / self.roi.size() * size
    }

    /// Replace the ROI with a dragged panel rectangle.
    ///
    /// The rectangle is relative to what is currently visible, so a drag on a
    /// zoomed view refines the existing ROI. Returns false when the drag is
    /// below the size threshold.
    pub fn drag_select(&mut self, view: &PanelView, start: DVec2, end: DVec2) -> bool {
        let a = self
            .panel_to_visible(view, start.min(end))
            .clamp(DVec2::ZERO, DVec2::ONE);
        let b = self
            .panel_to_visible(view, start.max(end))
            .clamp(DVec2::ZERO, DVec2::ONE);
        let extent = b - a;
        if extent.x < self.min_drag_fraction || extent.y < self.min_drag_fraction {
            debug!("Drag ignored: {:.4} x {:.4} of visible frame", extent.x, extent.y);
            return false;
        }

        let min = self.roi.min() + a * self.roi.size();
        let size = extent * self.roi.size();
        self.roi = Self::clamp_shift(min, size);
        debug!("ROI selected: {:?}", self.roi);
        true
    }

    /// Zoom by `zoom_base^steps` keeping the point under `cursor` fixed.
    ///
    /// Positive steps zoom in. Returns false when nothing changed.
    pub fn wheel_zoom(&mut self, view: &PanelView, cursor: DVec2, steps: f64) -> bool {
        if steps == 0.0 || !steps.is_finite() {
            return false;
        }
        if steps < 0.0 && self.roi.is_full() {
            return false;
        }

        let frac = self
            .panel_to_visible(view, cursor)
            .clamp(DVec2::ZERO, DVec2::ONE);
        let anchor = self.roi.min() + frac * self.roi.size();
        let factor = self.zoom_base.powf(steps);
        let size = (self.roi.size() * factor).min(DVec2::ONE);
        if size.x < MIN_EXTENT || size.y < MIN_EXTENT {
            return false;
        }
        if size.x >= SNAP_FULL && size.y >= SNAP_FULL {
            self.roi = Roi::FULL;
            debug!("ROI zoomed out to full frame");
            return true;
        }

        let min = anchor - frac * size;
        let roi = Self::clamp_shift(min, size);
        let changed = roi != self.roi;
        self.roi = roi;
        debug!("ROI zoom x{:.3}: {:?}", factor, self.roi);
        changed
    }

    /// Translate the ROI by a panel-pixel delta.
    ///
    /// Positive x moves the ROI right (toward the frame's right edge). The
    /// delta is scaled by the current ROI extent; no-op at full frame.
    pub fn pan(&mut self, view: &PanelView, delta: DVec2) -> bool {
        if self.roi.is_full() {
            return false;
        }
        let (_, content) = view.content_rect(&self.roi);
        if content.x <= 0.0 || content.y <= 0.0 {
            return false;
        }
        let shift = delta / content * self.roi.size();
        let roi = Self::clamp_shift(self.roi.min() + shift, self.roi.size());
        let changed = roi != self.roi;
        self.roi = roi;
        changed
    }

    /// Keep `size`, shift `min` so the rect lies inside `[0,1]²`
    fn clamp_shift(min: DVec2, size: DVec2) -> Roi {
        let size = size.min(DVec2::ONE);
        let min = min.max(DVec2::ZERO).min(DVec2::ONE - size);
        Roi::from_min_size(min, size)
    }
}
