//! Entities: data types and pure components
//!
//! - stream/frame: loaded video metadata and pixel buffers
//! - decoder: decode service contract, per-stream adapter with seek/sequential cursor
//! - viewport: normalized ROI math (drag, wheel zoom, pan)
//! - filters/compositor/overlay: per-panel pixel pipeline

use std::path::Path;
use std::sync::Arc;

pub mod compositor;
pub mod decoder;
pub mod filters;
pub mod frame;
#[cfg(feature = "ffmpeg")]
pub mod loader_video;
pub mod overlay;
pub mod stream;
pub mod synthetic;
pub mod viewport;

pub use decoder::{AudioError, AudioTrack, DecodeAdapter, DecodeError, DecodeService, OpenError, VideoSource};
pub use frame::{Frame, FrameStatus};
pub use stream::{VideoId, VideoStream};
pub use viewport::{Roi, ViewportState};

/// Routes `synthetic:` paths to the test-pattern backend and everything else
/// to the codec backend (ffmpeg when compiled in)
#[derive(Debug, Default, Clone)]
pub struct MediaService {
    synthetic: synthetic::SyntheticService,
    #[cfg(feature = "ffmpeg")]
    ffmpeg: loader_video::FfmpegService,
}

impl MediaService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn DecodeService> {
        Arc::new(Self::new())
    }

    fn backend(&self, path: &Path) -> &dyn DecodeService {
        if path.to_string_lossy().starts_with(synthetic::SYNTHETIC_PREFIX) {
            return &self.synthetic;
        }
        #[cfg(feature = "ffmpeg")]
        {
            &self.ffmpeg
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            &self.synthetic
        }
    }
}

impl DecodeService for MediaService {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, OpenError> {
        self.backend(path).open(path)
    }

    fn open_audio(&self, path: &Path) -> Result<Arc<dyn AudioTrack>, AudioError> {
        self.backend(path).open_audio(path)
    }
}
