//! Procedural decode backend
//!
//! Paths of the form `synthetic:NAME?frames=300&fps=30&w=320&h=180&audio=1`
//! open a generated stream. Every frame is a deterministic function of
//! (name, index, x, y), so sequential reads and seeks produce identical
//! pixels. `fail=3,7` makes those indices return decode errors.
//!
//! Used by tests and by the CLI when no codec backend is compiled in.

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::decoder::{AudioError, AudioTrack, DecodeService, OpenError, VideoSource};
use super::frame::Frame;
use super::stream::StreamInfo;

pub const SYNTHETIC_PREFIX: &str = "synthetic:";
pub const SYNTHETIC_SAMPLE_RATE: u32 = 44_100;

lazy_static! {
    static ref SYNTHETIC_RE: Regex =
        Regex::new(r"^synthetic:([^?]*)(?:\?(.*))?$").expect("static regex");
}

/// Parsed synthetic stream description
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub name: String,
    pub frames: usize,
    pub fps: f64,
    pub width: usize,
    pub height: usize,
    pub audio: bool,
    pub fail: HashSet<usize>,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            frames: 300,
            fps: 30.0,
            width: 320,
            height: 180,
            audio: false,
            fail: HashSet::new(),
        }
    }
}

impl SyntheticSpec {
    /// Parse `synthetic:NAME?key=value&...`. Returns None for non-synthetic paths.
    pub fn parse(path: &str) -> Result<Option<Self>, OpenError> {
        let Some(caps) = SYNTHETIC_RE.captures(path) else {
            return Ok(None);
        };
        let mut spec = SyntheticSpec {
            name: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            ..Default::default()
        };
        let query = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let bad = || OpenError::Unreadable(format!("bad synthetic parameter '{}'", pair));
            match key {
                "frames" => spec.frames = value.parse().map_err(|_| bad())?,
                "fps" => spec.fps = value.parse().map_err(|_| bad())?,
                "w" => spec.width = value.parse().map_err(|_| bad())?,
                "h" => spec.height = value.parse().map_err(|_| bad())?,
                "audio" => spec.audio = matches!(value, "1" | "true" | "yes"),
                "fail" => {
                    for idx in value.split(',').filter(|s| !s.is_empty()) {
                        spec.fail.insert(idx.parse().map_err(|_| bad())?);
                    }
                }
                _ => return Err(bad()),
            }
        }
        if spec.width == 0 || spec.height == 0 || spec.fps <= 0.0 {
            return Err(OpenError::NoVideoStream(path.to_string()));
        }
        Ok(Some(spec))
    }

    fn seed(&self) -> u8 {
        self.name.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b))
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            frame_rate: self.fps,
            frame_count: self.frames,
            width: self.width,
            height: self.height,
            has_audio: self.audio,
        }
    }

    /// Generate the pixels of frame `index`
    pub fn render(&self, index: usize) -> Frame {
        let (w, h) = (self.width, self.height);
        let seed = self.seed();
        let mut buf = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            let g = (y * 255 / h.max(1)) as u8;
            for x in 0..w {
                let r = ((x * 255 / w.max(1)) as u8).wrapping_add(index as u8);
                let b = seed.wrapping_add((index as u8).wrapping_mul(7));
                buf.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Frame::from_u8_buffer(buf, w, h)
    }
}

struct SyntheticSource {
    spec: SyntheticSpec,
    pos: usize,
}

impl VideoSource for SyntheticSource {
    fn info(&self) -> StreamInfo {
        self.spec.info()
    }

    fn seek_decode(&mut self, index: usize) -> Result<Frame, String> {
        self.pos = index;
        self.read_next()
    }

    fn read_next(&mut self) -> Result<Frame, String> {
        let index = self.pos;
        self.pos += 1;
        if index >= self.spec.frames {
            return Err("end of stream".to_string());
        }
        if self.spec.fail.contains(&index) {
            return Err(format!("injected failure at frame {}", index));
        }
        Ok(self.spec.render(index))
    }
}

/// Sine tone, stereo s16, covering the stream duration
pub struct SyntheticAudio {
    samples: Vec<i16>,
}

impl SyntheticAudio {
    pub fn new(spec: &SyntheticSpec) -> Self {
        let total = (spec.frames as f64 * SYNTHETIC_SAMPLE_RATE as f64 / spec.fps) as usize;
        let freq = 220.0 + spec.seed() as f64;
        let mut samples = Vec::with_capacity(total * 2);
        for n in 0..total {
            let t = n as f64 / SYNTHETIC_SAMPLE_RATE as f64;
            let v = ((TAU * freq * t).sin() * 8000.0) as i16;
            samples.push(v);
            samples.push(v);
        }
        Self { samples }
    }
}

impl AudioTrack for SyntheticAudio {
    fn sample_rate(&self) -> u32 {
        SYNTHETIC_SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        2
    }

    fn total_samples(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    fn read_pcm(&self, start_sample: u64, sample_count: usize) -> Result<Vec<i16>, AudioError> {
        let start = (start_sample as usize).saturating_mul(2).min(self.samples.len());
        let end = start.saturating_add(sample_count * 2).min(self.samples.len());
        Ok(self.samples[start..end].to_vec())
    }
}

/// Decode service for `synthetic:` paths
#[derive(Debug, Default, Clone)]
pub struct SyntheticService;

impl SyntheticService {
    pub fn new() -> Self {
        Self
    }

    fn spec_for(path: &Path) -> Result<SyntheticSpec, OpenError> {
        let s = path.to_string_lossy();
        match SyntheticSpec::parse(&s)? {
            Some(spec) => Ok(spec),
            None if path.exists() => Err(OpenError::UnsupportedCodec(format!(
                "{} (no codec backend compiled in)",
                s
            ))),
            None => Err(OpenError::NotFound(s.into_owned())),
        }
    }
}

impl DecodeService for SyntheticService {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, OpenError> {
        let spec = Self::spec_for(path)?;
        debug!(
            "Synthetic open '{}': {} frames @ {} fps, {}x{}",
            spec.name, spec.frames, spec.fps, spec.width, spec.height
        );
        Ok(Box::new(SyntheticSource { spec, pos: 0 }))
    }

    fn open_audio(&self, path: &Path) -> Result<Arc<dyn AudioTrack>, AudioError> {
        let spec = Self::spec_for(path).map_err(|e| AudioError::Decode(e.to_string()))?;
        if !spec.audio {
            return Err(AudioError::NoTrack);
        }
        Ok(Arc::new(SyntheticAudio::new(&spec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_and_params() {
        let spec = SyntheticSpec::parse("synthetic:ref?frames=10&fps=25&w=16&h=8&audio=1&fail=2,4")
            .expect("parse")
            .expect("synthetic");
        assert_eq!(spec.name, "ref");
        assert_eq!(spec.frames, 10);
        assert_eq!(spec.fps, 25.0);
        assert_eq!((spec.width, spec.height), (16, 8));
        assert!(spec.audio);
        assert!(spec.fail.contains(&2) && spec.fail.contains(&4));

        let plain = SyntheticSpec::parse("synthetic:x").expect("parse").expect("synthetic");
        assert_eq!(plain.frames, 300);
        assert!(!plain.audio);
    }

    #[test]
    fn test_non_synthetic_path() {
        assert_eq!(SyntheticSpec::parse("/tmp/a.mp4").expect("parse"), None);
        let err = SyntheticService::new()
            .open(Path::new("/definitely/not/here.mp4"))
            .err()
            .expect("missing file");
        assert!(matches!(err, OpenError::NotFound(_)));
    }

    #[test]
    fn test_bad_parameter_rejected() {
        assert!(SyntheticSpec::parse("synthetic:x?frames=abc").is_err());
        assert!(SyntheticSpec::parse("synthetic:x?bogus=1").is_err());
    }

    #[test]
    fn test_frames_differ_by_index() {
        let spec = SyntheticSpec::parse("synthetic:x?w=4&h=4").expect("parse").expect("synthetic");
        assert_ne!(spec.render(0).pixels(), spec.render(1).pixels());
        assert_eq!(spec.render(5).pixels(), spec.render(5).pixels());
    }

    #[test]
    fn test_audio_length_matches_duration() {
        let svc = SyntheticService::new();
        let track = svc
            .open_audio(Path::new("synthetic:a?frames=30&fps=30&w=4&h=4&audio=1"))
            .expect("audio");
        assert_eq!(track.total_samples(), 44_100);
        assert_eq!(track.read_pcm(0, 100).expect("pcm").len(), 200);
        // clipped at the end
        assert_eq!(track.read_pcm(44_050, 100).expect("pcm").len(), 100);
        assert!(track.read_pcm(50_000, 10).expect("pcm").is_empty());

        let none = svc.open_audio(Path::new("synthetic:a?w=4&h=4"));
        assert!(matches!(none, Err(AudioError::NoTrack)));
    }
}
