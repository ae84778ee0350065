//! Brightness/Contrast filter.
//!
//! `output = (input - 0.5) * (1 + contrast) + 0.5 + brightness`
//!
//! # Parameters
//!
//! - `brightness`: -1.0 (black) to 1.0 (white), 0.0 = no change
//! - `contrast`: -1.0 (flat gray) to 1.0 (high contrast), 0.0 = no change

use super::{Filter, FilterError, FilterParams, param_f32};
use crate::entities::frame::Frame;

pub const ID: &str = "brightness_contrast";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessContrast {
    pub brightness: f32,
    pub contrast: f32,
}

impl BrightnessContrast {
    pub fn create(params: &FilterParams) -> Result<Box<dyn Filter>, FilterError> {
        Ok(Box::new(Self {
            brightness: param_f32(params, "brightness", 0.0, -1.0, 1.0)?,
            contrast: param_f32(params, "contrast", 0.0, -1.0, 1.0)?,
        }))
    }
}

impl Filter for BrightnessContrast {
    fn apply(&self, frame: &Frame, _reference: Option<&Frame>) -> Frame {
        if self.brightness.abs() < 0.0001 && self.contrast.abs() < 0.0001 {
            return frame.clone();
        }

        let cf = 1.0 + self.contrast;
        let adjust = |v: u8| -> u8 {
            let v = v as f32 / 255.0;
            (((v - 0.5) * cf + 0.5 + self.brightness).clamp(0.0, 1.0) * 255.0).round() as u8
        };

        let mut out = frame.clone();
        for px in out.pixels_mut().chunks_exact_mut(4) {
            px[0] = adjust(px[0]);
            px[1] = adjust(px[1]);
            px[2] = adjust(px[2]);
            // alpha unchanged
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(v: u8) -> Frame {
        Frame::from_u8_buffer(vec![v, v, v, 255].repeat(4), 2, 2)
    }

    #[test]
    fn test_identity_shares_buffer() {
        let f = gray(100);
        let out = BrightnessContrast { brightness: 0.0, contrast: 0.0 }.apply(&f, None);
        assert!(out.ptr_eq(&f));
    }

    #[test]
    fn test_full_brightness_saturates() {
        let out = BrightnessContrast { brightness: 1.0, contrast: 0.0 }.apply(&gray(10), None);
        assert_eq!(&out.pixels()[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_flat_contrast_is_mid_gray() {
        let out = BrightnessContrast { brightness: 0.0, contrast: -1.0 }.apply(&gray(200), None);
        assert_eq!(out.pixels()[0], 128);
        assert_eq!(out.pixels()[3], 255);
    }
}
