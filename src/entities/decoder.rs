//! Decode adapter - frame-indexed access over a sequential bitstream
//!
//! **Why**: Random access into compressed video costs a seek back to the
//! nearest keyframe plus a forward decode of every intervening frame. Doing
//! that for every displayed frame during playback makes throughput degrade
//! over time. The adapter remembers which index a plain sequential read would
//! produce next (`DecodeCursor`) and only seeks for genuinely non-sequential
//! requests (scrub jumps).
//!
//! **Used by**: FrameCache (synchronous misses and background prefetch)
//!
//! # Backends
//!
//! `DecodeService` is the opaque codec boundary. Implementations:
//! - `SyntheticService` (always available, procedural test patterns)
//! - `FfmpegService` (feature `ffmpeg`)

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};

use super::frame::Frame;
use super::stream::{StreamInfo, VideoId};

/// Failure to open a file or read its stream info
#[derive(Debug, Clone, PartialEq)]
pub enum OpenError {
    NotFound(String),
    Unreadable(String),
    UnsupportedCodec(String),
    NoVideoStream(String),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::NotFound(p) => write!(f, "Video file not found: {}", p),
            OpenError::Unreadable(e) => write!(f, "Cannot open video file: {}", e),
            OpenError::UnsupportedCodec(e) => write!(f, "Unsupported codec: {}", e),
            OpenError::NoVideoStream(p) => write!(f, "No video stream found in {}", p),
        }
    }
}

impl std::error::Error for OpenError {}

/// Mid-session decode failure for one frame of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub video_id: VideoId,
    pub index: usize,
    pub cause: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Decode failed for video {} frame {}: {}",
            self.video_id, self.index, self.cause
        )
    }
}

impl std::error::Error for DecodeError {}

/// Audio track failure (extraction, decode, or output)
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    NoTrack,
    Decode(String),
    Output(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::NoTrack => write!(f, "No audio track"),
            AudioError::Decode(e) => write!(f, "Audio decode error: {}", e),
            AudioError::Output(e) => write!(f, "Audio output error: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// One opened video bitstream.
///
/// Backends report raw failures as strings; the adapter attaches stream id
/// and index.
pub trait VideoSource: Send {
    /// Stream info captured at open time
    fn info(&self) -> StreamInfo;

    /// Seek so that `index` is the next frame, then decode and return it
    fn seek_decode(&mut self, index: usize) -> Result<Frame, String>;

    /// Decode the next frame in bitstream order
    fn read_next(&mut self) -> Result<Frame, String>;
}

/// Decoded PCM track, interleaved signed 16-bit
pub trait AudioTrack: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Length in sample frames (per channel)
    fn total_samples(&self) -> u64;

    /// Read `sample_count` sample frames starting at `start_sample`.
    ///
    /// Returns fewer frames (possibly none) near the end of the track.
    fn read_pcm(&self, start_sample: u64, sample_count: usize) -> Result<Vec<i16>, AudioError>;
}

/// Opaque codec service
pub trait DecodeService: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, OpenError>;

    fn open_audio(&self, path: &Path) -> Result<Arc<dyn AudioTrack>, AudioError>;
}

/// Per-stream cursor: index reachable with a cheap sequential read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCursor {
    /// `None` after a failure (next request always seeks)
    pub next_expected_index: Option<usize>,
}

/// Seek/sequential counters for one adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub seeks: u64,
    pub sequential_reads: u64,
    pub failures: u64,
}

impl DecodeStats {
    /// Total decode calls that reached the backend
    pub fn decodes(&self) -> u64 {
        self.seeks + self.sequential_reads
    }
}

/// Frame-indexed decoder for one stream.
///
/// Not `Sync`: callers serialize access (one outstanding decode per stream).
pub struct DecodeAdapter {
    video_id: VideoId,
    source: Box<dyn VideoSource>,
    frame_count: usize,
    cursor: DecodeCursor,
    stats: DecodeStats,
}

impl DecodeAdapter {
    /// Wrap a freshly opened source (positioned at frame 0)
    pub fn new(video_id: VideoId, source: Box<dyn VideoSource>) -> Self {
        let frame_count = source.info().frame_count;
        Self {
            video_id,
            source,
            frame_count,
            cursor: DecodeCursor {
                next_expected_index: Some(0),
            },
            stats: DecodeStats::default(),
        }
    }

    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub fn cursor(&self) -> DecodeCursor {
        self.cursor
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode frame `index`, reading sequentially when the cursor allows it
    pub fn decode_frame(&mut self, index: usize) -> Result<Frame, DecodeError> {
        if index >= self.frame_count {
            return Err(self.error(
                index,
                format!("index out of range (frame_count={})", self.frame_count),
            ));
        }

        let result = if self.cursor.next_expected_index == Some(index) {
            trace!("Video {}: sequential read {}", self.video_id, index);
            self.stats.sequential_reads += 1;
            self.source.read_next()
        } else {
            debug!(
                "Video {}: seek to {} (cursor {:?})",
                self.video_id, index, self.cursor.next_expected_index
            );
            self.stats.seeks += 1;
            self.source.seek_decode(index)
        };

        match result {
            Ok(frame) => {
                self.cursor.next_expected_index = Some(index + 1);
                Ok(frame)
            }
            Err(cause) => {
                self.stats.failures += 1;
                self.cursor.next_expected_index = None;
                Err(self.error(index, cause))
            }
        }
    }

    fn error(&self, index: usize, cause: String) -> DecodeError {
        DecodeError {
            video_id: self.video_id,
            index,
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::synthetic::SyntheticService;

    fn adapter(spec: &str) -> DecodeAdapter {
        let svc = SyntheticService::new();
        let source = svc.open(Path::new(spec)).expect("open synthetic");
        DecodeAdapter::new(VideoId(0), source)
    }

    #[test]
    fn test_sequential_reads_never_seek() {
        let mut a = adapter("synthetic:a?frames=50&w=8&h=8");
        for i in 10..20 {
            a.decode_frame(i).expect("decode");
        }
        // first request (10 != cursor 0) seeks, the rest are sequential
        assert_eq!(a.stats().seeks, 1);
        assert_eq!(a.stats().sequential_reads, 9);
        assert_eq!(a.cursor().next_expected_index, Some(20));
    }

    #[test]
    fn test_jump_triggers_seek() {
        let mut a = adapter("synthetic:a?frames=50&w=8&h=8");
        a.decode_frame(0).expect("decode");
        assert_eq!(a.stats().seeks, 0);
        a.decode_frame(5).expect("decode");
        assert_eq!(a.stats().seeks, 1);
        assert_eq!(a.cursor().next_expected_index, Some(6));
    }

    #[test]
    fn test_backward_request_seeks() {
        let mut a = adapter("synthetic:a?frames=50&w=8&h=8");
        a.decode_frame(0).expect("decode");
        a.decode_frame(1).expect("decode");
        a.decode_frame(0).expect("decode");
        assert_eq!(a.stats().seeks, 1);
    }

    #[test]
    fn test_sequential_and_seek_produce_same_pixels() {
        let mut a = adapter("synthetic:a?frames=50&w=8&h=8");
        a.decode_frame(0).expect("decode");
        let seq = a.decode_frame(1).expect("decode");
        let mut b = adapter("synthetic:a?frames=50&w=8&h=8");
        let sought = b.decode_frame(1).expect("decode");
        assert_eq!(seq.pixels(), sought.pixels());
    }

    #[test]
    fn test_failure_resets_cursor_and_reports_ids() {
        let mut a = adapter("synthetic:a?frames=50&w=8&h=8&fail=3");
        a.decode_frame(2).expect("decode");
        let err = a.decode_frame(3).expect_err("frame 3 fails");
        assert_eq!(err.video_id, VideoId(0));
        assert_eq!(err.index, 3);
        assert_eq!(a.cursor().next_expected_index, None);
        // next request must seek even though it is 4 = 3 + 1
        a.decode_frame(4).expect("decode");
        assert_eq!(a.stats().seeks, 2);
    }

    #[test]
    fn test_out_of_range_is_decode_error() {
        let mut a = adapter("synthetic:a?frames=5&w=8&h=8");
        let err = a.decode_frame(5).expect_err("out of range");
        assert_eq!(err.index, 5);
    }
}
