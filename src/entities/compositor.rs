//! Panel compositor
//!
//! Per panel, in this order:
//! 1. ROI crop (in the video's native pixels)
//! 2. Filter, with the reference frame cropped by the same ROI
//! 3. Resize to the panel's display size
//! 4. Caption overlay
//!
//! Cropping first bounds filter and resize cost to the visible area.
//! `compose_grid` runs panels in parallel (rayon) and lays them out
//! row-major on a black canvas, optionally stamping a `"Frame: N"` marker.

use std::sync::Arc;

use log::trace;
use rayon::prelude::*;

use super::filters::Filter;
use super::frame::{Frame, FrameStatus};
use super::overlay;
use super::viewport::Roi;

/// Inputs for one panel: raw cached frames plus per-video settings
///
/// **Why**: Panels are composed in parallel, so each one gets an owned
/// bundle. Frames share pixel buffers, making the clone per panel cheap.
///
/// **Used by**: Session::panel_frame, Session::compose_at
#[derive(Clone)]
pub struct PanelInput {
    /// Frame at this video's displayed index, uncropped
    pub frame: Frame,
    /// Same-index frame of the filter's reference video, if it takes one
    pub reference: Option<Frame>,
    pub filter: Option<Arc<dyn Filter>>,
    pub caption: Option<String>,
}

impl PanelInput {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            reference: None,
            filter: None,
            caption: None,
        }
    }
}

/// How the processed crop is sized into its panel
///
/// Single panels keep their own aspect at a shared row height; grid cells
/// all use `Fit` so the canvas stays rectangular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelSize {
    /// Fixed row height, width follows the crop aspect
    RowHeight(usize),
    /// Letterbox into exactly `w x h`
    Fit(usize, usize),
}

/// Crop a frame to the ROI in its own native pixels
pub fn crop_to_roi(frame: &Frame, roi: &Roi) -> Frame {
    if roi.is_full() {
        return frame.clone();
    }
    let (x, y, w, h) = roi.to_pixel_rect(frame.width(), frame.height());
    frame.crop(x, y, w, h)
}

/// Aspect-preserving fit into `w x h` on a black background
pub fn letterbox(frame: &Frame, width: usize, height: usize) -> Frame {
    let (width, height) = (width.max(1), height.max(1));
    let (fw, fh) = frame.resolution();
    if (fw, fh) == (width, height) {
        return frame.clone();
    }
    let scale = (width as f64 / fw as f64).min(height as f64 / fh as f64);
    let nw = ((fw as f64 * scale).round() as usize).clamp(1, width);
    let nh = ((fh as f64 * scale).round() as usize).clamp(1, height);
    let resized = frame.resize(nw, nh);
    let mut canvas = Frame::new(width, height).with_status(frame.status());
    canvas.blit(&resized, (width - nw) / 2, (height - nh) / 2);
    canvas
}

/// Width for a crop shown at `row_height`, keeping its aspect
pub fn width_for_row(crop_w: usize, crop_h: usize, row_height: usize) -> usize {
    ((crop_w as f64 * row_height as f64 / crop_h.max(1) as f64).round() as usize).max(1)
}

/// Run the full per-panel pipeline
pub fn compose_panel(input: &PanelInput, roi: &Roi, size: PanelSize) -> Frame {
    let cropped = crop_to_roi(&input.frame, roi);
    let filtered = match &input.filter {
        Some(filter) => {
            let reference = input.reference.as_ref().map(|r| crop_to_roi(r, roi));
            let out = filter.apply(&cropped, reference.as_ref());
            out.with_status(cropped.status())
        }
        None => cropped,
    };

    let mut panel = match size {
        PanelSize::RowHeight(h) => {
            let w = width_for_row(filtered.width(), filtered.height(), h);
            filtered.resize(w, h)
        }
        PanelSize::Fit(w, h) => letterbox(&filtered, w, h),
    };

    if let Some(caption) = input.caption.as_deref() {
        overlay::draw_caption(&mut panel, caption);
    }
    panel
}

/// Row-major panel grid
///
/// **Why**: Snapshots and export output need one cell size for every panel, with
/// panel `i` at row `i / cols`, column `i % cols`. Trailing cells in the
/// last row stay black.
///
/// **Used by**: export_layout, compose_grid, Session::composite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    pub panel_w: usize,
    pub panel_h: usize,
}

impl GridLayout {
    /// `cols = ceil(n / rows)`; rows never exceed the panel count
    pub fn new(n: usize, rows: usize, panel_w: usize, panel_h: usize) -> Self {
        let n = n.max(1);
        let rows = rows.clamp(1, n);
        Self {
            rows,
            cols: n.div_ceil(rows),
            panel_w: panel_w.max(1),
            panel_h: panel_h.max(1),
        }
    }

    pub fn canvas_size(&self) -> (usize, usize) {
        (self.cols * self.panel_w, self.rows * self.panel_h)
    }

    /// Top-left pixel of panel `i`
    pub fn panel_origin(&self, i: usize) -> (usize, usize) {
        ((i % self.cols) * self.panel_w, (i / self.cols) * self.panel_h)
    }
}

/// Grid layout for export output.
///
/// `crops` are the visible crop sizes (native resolution times ROI extent).
/// Requested sizes are for the whole canvas and are divided among cells:
///
/// | width | height | cell size                                       |
/// |-------|--------|-------------------------------------------------|
/// | Some  | Some   | `w / cols` x `h / rows`                          |
/// | Some  | None   | `w / cols`, height from the widest crop aspect  |
/// | None  | Some   | `h / rows`, width from the widest crop aspect   |
/// | None  | None   | largest crop width x largest crop height        |
///
/// Using the widest aspect means no panel is letterboxed horizontally.
pub fn export_layout(
    crops: &[(usize, usize)],
    rows: usize,
    width: Option<usize>,
    height: Option<usize>,
) -> GridLayout {
    let shape = GridLayout::new(crops.len(), rows, 1, 1);
    let max_aspect = crops
        .iter()
        .map(|&(w, h)| w as f64 / h.max(1) as f64)
        .fold(0.0f64, f64::max)
        .max(f64::EPSILON);

    let (pw, ph) = match (width, height) {
        (Some(w), Some(h)) => (w / shape.cols, h / shape.rows),
        (Some(w), None) => {
            let pw = w / shape.cols;
            (pw, (pw as f64 / max_aspect).round() as usize)
        }
        (None, Some(h)) => {
            let ph = h / shape.rows;
            ((ph as f64 * max_aspect).round() as usize, ph)
        }
        (None, None) => {
            let pw = crops.iter().map(|c| c.0).max().unwrap_or(1);
            let ph = crops.iter().map(|c| c.1).max().unwrap_or(1);
            (pw, ph)
        }
    };
    GridLayout::new(crops.len(), rows, pw, ph)
}

/// Compose all panels into one grid frame
///
/// Panels run on the rayon pool, each letterboxed into its cell. `marker`
/// stamps `"Frame: N"` in the canvas corner, after all panels are placed.
///
/// **Used by**: Session::compose_at (export, `snapshot` command)
pub fn compose_grid(inputs: &[PanelInput], roi: &Roi, layout: &GridLayout, marker: Option<usize>) -> Frame {
    let panels: Vec<Frame> = inputs
        .par_iter()
        .map(|input| compose_panel(input, roi, PanelSize::Fit(layout.panel_w, layout.panel_h)))
        .collect();

    let (cw, ch) = layout.canvas_size();
    let mut canvas = Frame::new(cw, ch).with_status(FrameStatus::Decoded);
    for (i, panel) in panels.iter().enumerate() {
        let (x, y) = layout.panel_origin(i);
        canvas.blit(panel, x, y);
    }
    if let Some(index) = marker {
        overlay::draw_frame_marker(&mut canvas, index);
    }
    trace!("Composed {} panels into {}x{}", panels.len(), cw, ch);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::filters::brightness::BrightnessContrast;

    fn solid(rgb: [u8; 3], w: usize, h: usize) -> Frame {
        Frame::from_u8_buffer([rgb[0], rgb[1], rgb[2], 255].repeat(w * h), w, h)
    }

    #[test]
    fn test_crop_to_roi_uses_native_pixels() {
        let roi = Roi::new(0.5, 0.0, 1.0, 0.5).unwrap();
        assert_eq!(crop_to_roi(&solid([0, 0, 0], 200, 100), &roi).resolution(), (100, 50));
        assert_eq!(crop_to_roi(&solid([0, 0, 0], 64, 36), &roi).resolution(), (32, 18));
    }

    #[test]
    fn test_letterbox_centers_on_black() {
        let f = solid([255, 255, 255], 4, 2);
        let out = letterbox(&f, 4, 4);
        assert_eq!(out.resolution(), (4, 4));
        // top row is bar, rows 1..3 are content
        assert_eq!(&out.pixels()[0..4], &[0, 0, 0, 255]);
        let mid = (1 * 4) * 4;
        assert_eq!(&out.pixels()[mid..mid + 4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_row_height_panel_keeps_aspect() {
        let input = PanelInput::new(solid([10, 10, 10], 320, 180));
        let out = compose_panel(&input, &Roi::FULL, PanelSize::RowHeight(90));
        assert_eq!(out.resolution(), (160, 90));

        let roi = Roi::new(0.0, 0.0, 0.5, 1.0).unwrap();
        let out = compose_panel(&input, &roi, PanelSize::RowHeight(90));
        assert_eq!(out.resolution(), (80, 90));
    }

    #[test]
    fn test_filter_runs_after_crop() {
        let mut input = PanelInput::new(solid([100, 100, 100], 8, 8));
        input.filter = Some(Arc::new(BrightnessContrast {
            brightness: 1.0,
            contrast: 0.0,
        }));
        let roi = Roi::new(0.0, 0.0, 0.5, 0.5).unwrap();
        let out = compose_panel(&input, &roi, PanelSize::RowHeight(4));
        assert_eq!(out.resolution(), (4, 4));
        assert!(out.pixels().chunks_exact(4).all(|p| p == [255, 255, 255, 255]));
    }

    #[test]
    fn test_grid_layout() {
        let g = GridLayout::new(3, 2, 100, 50);
        assert_eq!((g.rows, g.cols), (2, 2));
        assert_eq!(g.canvas_size(), (200, 100));
        assert_eq!(g.panel_origin(2), (0, 50));

        let single_row = GridLayout::new(3, 1, 100, 50);
        assert_eq!(single_row.cols, 3);
        // more rows than panels collapses
        assert_eq!(GridLayout::new(2, 5, 10, 10).rows, 2);
    }

    #[test]
    fn test_export_layout_sizing_rules() {
        let crops = [(1920, 1080), (1280, 720)];
        let w_only = export_layout(&crops, 1, Some(1280), None);
        assert_eq!((w_only.panel_w, w_only.panel_h), (640, 360));

        let h_only = export_layout(&crops, 1, None, Some(360));
        assert_eq!((h_only.panel_w, h_only.panel_h), (640, 360));

        let both = export_layout(&crops, 1, Some(1000), Some(300));
        assert_eq!((both.panel_w, both.panel_h), (500, 300));

        let neither = export_layout(&crops, 1, None, None);
        assert_eq!((neither.panel_w, neither.panel_h), (1920, 1080));
    }

    #[test]
    fn test_compose_grid_places_panels() {
        let inputs = vec![
            PanelInput::new(solid([255, 0, 0], 4, 4)),
            PanelInput::new(solid([0, 255, 0], 4, 4)),
        ];
        let layout = GridLayout::new(2, 1, 4, 4);
        let out = compose_grid(&inputs, &Roi::FULL, &layout, None);
        assert_eq!(out.resolution(), (8, 4));
        assert_eq!(&out.pixels()[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out.pixels()[16..20], &[0, 255, 0, 255]);
        assert!(!out.is_placeholder());
    }
}
