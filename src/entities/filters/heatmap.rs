//! Difference heatmap against a reference video.
//!
//! Per pixel: `|frame - reference|` per channel, converted to luma
//! (BT.601 weights), then mapped through a colormap. Without a reference
//! frame the input passes through unchanged.

use std::str::FromStr;

use super::{Filter, FilterError, FilterParams};
use crate::entities::frame::Frame;

pub const ID: &str = "difference_heatmap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colormap {
    #[default]
    Jet,
    Hot,
    Inferno,
}

impl FromStr for Colormap {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JET" => Ok(Colormap::Jet),
            "HOT" => Ok(Colormap::Hot),
            "INFERNO" => Ok(Colormap::Inferno),
            _ => Err(()),
        }
    }
}

/// Inferno anchor colors at t = 0, 1/8, ..., 1
const INFERNO: [[u8; 3]; 9] = [
    [0, 0, 4],
    [31, 12, 72],
    [85, 15, 109],
    [136, 34, 106],
    [186, 54, 85],
    [227, 89, 51],
    [249, 140, 10],
    [249, 201, 50],
    [252, 255, 164],
];

impl Colormap {
    /// Map intensity 0..=255 to RGB
    pub fn map(self, v: u8) -> [u8; 3] {
        let t = v as f32 / 255.0;
        let to_u8 = |x: f32| (x.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            Colormap::Jet => [
                to_u8(1.5 - (4.0 * t - 3.0).abs()),
                to_u8(1.5 - (4.0 * t - 2.0).abs()),
                to_u8(1.5 - (4.0 * t - 1.0).abs()),
            ],
            Colormap::Hot => [to_u8(3.0 * t), to_u8(3.0 * t - 1.0), to_u8(3.0 * t - 2.0)],
            Colormap::Inferno => {
                let pos = t * (INFERNO.len() - 1) as f32;
                let i = (pos.floor() as usize).min(INFERNO.len() - 2);
                let f = pos - i as f32;
                let (a, b) = (INFERNO[i], INFERNO[i + 1]);
                let lerp = |c: usize| (a[c] as f32 + (b[c] as f32 - a[c] as f32) * f).round() as u8;
                [lerp(0), lerp(1), lerp(2)]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceHeatmap {
    pub colormap: Colormap,
}

impl DifferenceHeatmap {
    pub fn create(params: &FilterParams) -> Result<Box<dyn Filter>, FilterError> {
        let colormap = match params.get("colormap") {
            None => Colormap::default(),
            Some(raw) => raw.parse().map_err(|_| FilterError::BadParam {
                key: "colormap".to_string(),
                value: raw.clone(),
            })?,
        };
        Ok(Box::new(Self { colormap }))
    }
}

impl Filter for DifferenceHeatmap {
    fn apply(&self, frame: &Frame, reference: Option<&Frame>) -> Frame {
        let Some(reference) = reference else {
            return frame.clone();
        };
        let reference = if reference.resolution() != frame.resolution() {
            reference.resize(frame.width(), frame.height())
        } else {
            reference.clone()
        };

        let mut out = frame.clone();
        for (px, r) in out
            .pixels_mut()
            .chunks_exact_mut(4)
            .zip(reference.pixels().chunks_exact(4))
        {
            let d = |c: usize| px[c].abs_diff(r[c]) as f32;
            let luma = (0.299 * d(0) + 0.587 * d(1) + 0.114 * d(2)).round().min(255.0) as u8;
            let [cr, cg, cb] = self.colormap.map(luma);
            px[0] = cr;
            px[1] = cg;
            px[2] = cb;
            px[3] = 255;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgb: [u8; 3], w: usize, h: usize) -> Frame {
        Frame::from_u8_buffer([rgb[0], rgb[1], rgb[2], 255].repeat(w * h), w, h)
    }

    #[test]
    fn test_identical_frames_map_to_zero() {
        let f = solid([120, 40, 200], 4, 4);
        let out = DifferenceHeatmap { colormap: Colormap::Hot }.apply(&f, Some(&f.clone()));
        assert!(out.pixels().chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_max_difference_hot_is_white() {
        let a = solid([0, 0, 0], 2, 2);
        let b = solid([255, 255, 255], 2, 2);
        let out = DifferenceHeatmap { colormap: Colormap::Hot }.apply(&a, Some(&b));
        assert_eq!(&out.pixels()[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_passthrough_without_reference() {
        let f = solid([1, 2, 3], 2, 2);
        let out = DifferenceHeatmap { colormap: Colormap::Jet }.apply(&f, None);
        assert!(out.ptr_eq(&f));
    }

    #[test]
    fn test_reference_resized_to_frame() {
        let a = solid([0, 0, 0], 4, 2);
        let b = solid([0, 0, 0], 8, 4);
        let out = DifferenceHeatmap { colormap: Colormap::Inferno }.apply(&a, Some(&b));
        assert_eq!(out.resolution(), (4, 2));
        assert_eq!(&out.pixels()[0..3], &INFERNO[0]);
    }

    #[test]
    fn test_colormap_param() {
        let mut p = FilterParams::new();
        p.insert("colormap".into(), "inferno".into());
        assert!(DifferenceHeatmap::create(&p).is_ok());
        p.insert("colormap".into(), "rainbow".into());
        assert!(DifferenceHeatmap::create(&p).is_err());
    }

    #[test]
    fn test_jet_endpoints() {
        // dark blue at 0, dark red at 255
        assert_eq!(Colormap::Jet.map(0), [0, 0, 128]);
        assert_eq!(Colormap::Jet.map(255), [128, 0, 0]);
    }
}
