//! Export of the composed comparison grid
//!
//! For every frame of the timeline the full grid (current ROI, filters,
//! captions, `"Frame: N"` marker) is composed and handed to an
//! [`ExportSink`], together with the audio source's PCM for that frame.
//! Runs on the calling thread; progress goes out over a channel and a
//! cancel flag is polled between frames.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::core::session::Session;
use crate::entities::compositor::export_layout;
use crate::entities::frame::Frame;

/// PCM layout of the exported audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Consumer of composed frames and interleaved s16 audio
pub trait ExportSink {
    fn begin(&mut self, width: usize, height: usize, frame_rate: f64, audio: Option<AudioFormat>) -> Result<(), String>;
    fn write_frame(&mut self, index: usize, frame: &Frame) -> Result<(), String>;
    fn write_audio(&mut self, samples: &[i16]) -> Result<(), String>;
    fn finish(&mut self) -> Result<(), String>;
}

/// Output sizing; `None` dimensions derive from the sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub width: Option<usize>,
    pub height: Option<usize>,
    /// Grid rows (None = session setting)
    pub rows: Option<usize>,
}

/// Progress updates during export
#[derive(Clone, Debug, PartialEq)]
pub struct ExportProgress {
    pub current_frame: usize,
    pub total_frames: usize,
    pub stage: ExportStage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finishing,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    NothingLoaded,
    /// Sink error, verbatim
    Sink(String),
    Cancelled,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NothingLoaded => write!(f, "Nothing to export: no videos loaded"),
            ExportError::Sink(msg) => write!(f, "{}", msg),
            ExportError::Cancelled => write!(f, "Export cancelled by user"),
        }
    }
}

impl std::error::Error for ExportError {}

/// First sample of frame `index` (frame boundaries never drift)
fn sample_at(index: usize, frame_rate: f64, sample_rate: u32) -> u64 {
    (index as f64 * sample_rate as f64 / frame_rate).floor() as u64
}

/// Export every timeline frame; returns the number of frames written
pub fn export(
    session: &mut Session,
    sink: &mut dyn ExportSink,
    options: &ExportOptions,
    progress_tx: Sender<ExportProgress>,
    cancel_flag: Arc<AtomicBool>,
) -> Result<usize, ExportError> {
    if session.videos().is_empty() {
        return Err(ExportError::NothingLoaded);
    }
    let total_frames = session.player().max_frame_count();
    let frame_rate = session.player().frame_rate();
    let send = |current_frame: usize, stage: ExportStage| {
        let _ = progress_tx.send(ExportProgress {
            current_frame,
            total_frames,
            stage,
        });
    };
    send(0, ExportStage::Preparing);

    let rows = options.rows.unwrap_or(session.settings().rows);
    let layout = export_layout(&session.crop_sizes(), rows, options.width, options.height);
    let (width, height) = layout.canvas_size();

    let mut track = session
        .audio_source()
        .and_then(|id| session.audio().track(id).map(|t| (id, t)));
    let audio = track.as_ref().map(|(_, t)| AudioFormat {
        sample_rate: t.sample_rate(),
        channels: t.channels(),
    });

    info!(
        "Starting export: {} frames, {}x{} ({}x{} grid), audio: {}",
        total_frames,
        width,
        height,
        layout.cols,
        layout.rows,
        track.as_ref().map(|(id, _)| id.to_string()).unwrap_or_else(|| "none".into())
    );
    sink.begin(width, height, frame_rate, audio).map_err(ExportError::Sink)?;

    for index in 0..total_frames {
        if cancel_flag.load(Ordering::Relaxed) {
            info!("Export cancelled at frame {}", index);
            return Err(ExportError::Cancelled);
        }

        let frame = session.compose_at(index, &layout, true);
        sink.write_frame(index, &frame).map_err(ExportError::Sink)?;

        if let Some((id, t)) = &track {
            let start = sample_at(index, frame_rate, t.sample_rate());
            let end = sample_at(index + 1, frame_rate, t.sample_rate());
            match t.read_pcm(start, (end - start) as usize) {
                Ok(samples) => sink.write_audio(&samples).map_err(ExportError::Sink)?,
                Err(e) => {
                    warn!("Export audio from video {} failed: {}; continuing without audio", id, e);
                    track = None;
                }
            }
        }

        debug!("Exported frame {}/{}", index + 1, total_frames);
        send(index + 1, ExportStage::Rendering);
    }

    send(total_frames, ExportStage::Finishing);
    sink.finish().map_err(ExportError::Sink)?;
    send(total_frames, ExportStage::Complete);
    info!("Export complete: {} frames", total_frames);
    Ok(total_frames)
}

/// Writes `frame_NNNNNN.png` files plus `audio.wav` into a directory
pub struct PngSequenceSink {
    dir: PathBuf,
    wav: Option<hound::WavWriter<BufWriter<File>>>,
}

impl PngSequenceSink {
    pub const AUDIO_FILE: &'static str = "audio.wav";

    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            wav: None,
        }
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl ExportSink for PngSequenceSink {
    fn begin(&mut self, width: usize, height: usize, frame_rate: f64, audio: Option<AudioFormat>) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| format!("Failed to create {}: {}", self.dir.display(), e))?;
        if let Some(fmt) = audio {
            let spec = hound::WavSpec {
                channels: fmt.channels,
                sample_rate: fmt.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let path = self.dir.join(Self::AUDIO_FILE);
            let writer = hound::WavWriter::create(&path, spec)
                .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
            self.wav = Some(writer);
        }
        debug!(
            "PNG sink at {}: {}x{} @ {:.3} fps",
            self.dir.display(),
            width,
            height,
            frame_rate
        );
        Ok(())
    }

    fn write_frame(&mut self, index: usize, frame: &Frame) -> Result<(), String> {
        let path = self.frame_path(index);
        frame
            .to_image()
            .save(&path)
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
    }

    fn write_audio(&mut self, samples: &[i16]) -> Result<(), String> {
        let Some(wav) = self.wav.as_mut() else {
            return Ok(());
        };
        for &s in samples {
            wav.write_sample(s).map_err(|e| format!("WAV write error: {}", e))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), String> {
        if let Some(wav) = self.wav.take() {
            wav.finalize().map_err(|e| format!("WAV finalize error: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryOutput;
    use crate::config::Settings;
    use crate::core::clock::ManualClock;
    use crate::entities::synthetic::SyntheticService;
    use crate::entities::viewport::Roi;
    use crossbeam_channel::unbounded;

    fn session() -> Session {
        let mut s = Session::with_workers(
            Settings::default(),
            Arc::new(SyntheticService::new()),
            Arc::new(ManualClock::new()),
            MemoryOutput::new().factory(),
            None,
        );
        s.load_video(Path::new("synthetic:a?frames=10&fps=30&w=64&h=36&audio=1"))
            .unwrap();
        s.load_video(Path::new("synthetic:b?frames=6&fps=30&w=64&h=36")).unwrap();
        s
    }

    /// Records what it is given; optionally fails on one frame
    #[derive(Default)]
    struct RecordingSink {
        size: (usize, usize),
        audio: Option<AudioFormat>,
        frames: Vec<(usize, (usize, usize))>,
        samples: usize,
        fail_at: Option<usize>,
        finished: bool,
    }

    impl ExportSink for RecordingSink {
        fn begin(&mut self, w: usize, h: usize, _fps: f64, audio: Option<AudioFormat>) -> Result<(), String> {
            self.size = (w, h);
            self.audio = audio;
            Ok(())
        }
        fn write_frame(&mut self, index: usize, frame: &Frame) -> Result<(), String> {
            if self.fail_at == Some(index) {
                return Err("disk full".into());
            }
            self.frames.push((index, frame.resolution()));
            Ok(())
        }
        fn write_audio(&mut self, samples: &[i16]) -> Result<(), String> {
            self.samples += samples.len();
            Ok(())
        }
        fn finish(&mut self) -> Result<(), String> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_export_all_frames_with_audio() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        let (tx, rx) = unbounded();
        let n = export(&mut s, &mut sink, &ExportOptions::default(), tx, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(n, 10);
        assert_eq!(sink.size, (128, 36));
        assert_eq!(sink.frames.len(), 10);
        assert!(sink.frames.iter().all(|(_, r)| *r == (128, 36)));
        assert!(sink.finished);
        assert_eq!(
            sink.audio,
            Some(AudioFormat {
                sample_rate: 44_100,
                channels: 2
            })
        );
        // 10 frames at 30 fps = 14700 stereo samples
        assert_eq!(sink.samples, 14_700 * 2);

        let progress: Vec<ExportProgress> = rx.try_iter().collect();
        assert_eq!(progress.first().map(|p| p.stage.clone()), Some(ExportStage::Preparing));
        assert_eq!(
            progress.last(),
            Some(&ExportProgress {
                current_frame: 10,
                total_frames: 10,
                stage: ExportStage::Complete
            })
        );
    }

    #[test]
    fn test_export_width_only_uses_widest_aspect() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        let options = ExportOptions {
            width: Some(256),
            ..ExportOptions::default()
        };
        export(&mut s, &mut sink, &options, unbounded().0, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(sink.size, (256, 72));
    }

    #[test]
    fn test_export_follows_roi() {
        let mut s = session();
        s.drag_select_roi(
            crate::entities::stream::VideoId(0),
            glam::DVec2::new(0.0, 0.0),
            glam::DVec2::new(320.0, 360.0),
        )
        .unwrap();
        assert_eq!(s.roi(), Roi::new(0.0, 0.0, 0.5, 1.0).unwrap());
        let mut sink = RecordingSink::default();
        export(&mut s, &mut sink, &ExportOptions::default(), unbounded().0, Arc::new(AtomicBool::new(false))).unwrap();
        // crops are 32x36 each
        assert_eq!(sink.size, (64, 36));
    }

    #[test]
    fn test_sink_error_is_verbatim_and_session_survives() {
        let mut s = session();
        let mut sink = RecordingSink {
            fail_at: Some(3),
            ..RecordingSink::default()
        };
        let err = export(&mut s, &mut sink, &ExportOptions::default(), unbounded().0, Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert_eq!(err, ExportError::Sink("disk full".into()));
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(sink.frames.len(), 3);
        assert!(!sink.finished);
        assert!(s.panel_frame(crate::entities::stream::VideoId(1)).is_ok());
    }

    #[test]
    fn test_cancel_and_empty_session() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        let err = export(&mut s, &mut sink, &ExportOptions::default(), unbounded().0, Arc::new(AtomicBool::new(true)))
            .unwrap_err();
        assert_eq!(err, ExportError::Cancelled);
        assert!(sink.frames.is_empty());

        s.clear_videos();
        let err = export(&mut s, &mut sink, &ExportOptions::default(), unbounded().0, Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert_eq!(err, ExportError::NothingLoaded);
    }

    #[test]
    fn test_png_sequence_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("export");
        let mut s = session();
        let mut sink = PngSequenceSink::new(&out);
        export(&mut s, &mut sink, &ExportOptions::default(), unbounded().0, Arc::new(AtomicBool::new(false))).unwrap();

        for i in 0..10 {
            assert!(sink.frame_path(i).exists(), "missing frame {}", i);
        }
        let img = image::open(sink.frame_path(9)).unwrap();
        assert_eq!((img.width(), img.height()), (128, 36));

        let reader = hound::WavReader::open(out.join(PngSequenceSink::AUDIO_FILE)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.duration(), 14_700);
    }
}
