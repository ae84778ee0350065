//! Loaded video stream metadata
//!
//! A `VideoStream` is immutable once admitted into a session. Ids are handed
//! out sequentially in load order and never reused within a session, so any
//! per-id state (cache entries, prefetch results, audio selection) can never
//! be confused with a later stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Two frame rates are considered equal within this tolerance
pub const FPS_TOLERANCE: f64 = 0.01;

/// Session-unique video identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VideoId(pub u32);

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream metadata reported by a decode service on open
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub frame_rate: f64,
    pub frame_count: usize,
    pub width: usize,
    pub height: usize,
    pub has_audio: bool,
}

/// Immutable description of a loaded video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub id: VideoId,
    pub path: PathBuf,
    pub frame_rate: f64,
    pub frame_count: usize,
    /// (width, height)
    pub native_resolution: (usize, usize),
    pub has_audio_track: bool,
}

impl VideoStream {
    pub fn new(id: VideoId, path: &Path, info: &StreamInfo) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            frame_rate: info.frame_rate,
            frame_count: info.frame_count,
            native_resolution: (info.width, info.height),
            has_audio_track: info.has_audio,
        }
    }

    /// File name used for the default caption
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Default panel label: `"{id}: {filename}"`
    pub fn default_caption(&self) -> String {
        format!("{}: {}", self.id, self.file_name())
    }

    /// Last valid frame index (0 for empty streams)
    pub fn last_index(&self) -> usize {
        self.frame_count.saturating_sub(1)
    }
}

/// Frame-rate equality under `FPS_TOLERANCE`
pub fn same_frame_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= FPS_TOLERANCE
}
