//! Audio sync: maps the playback position to the selected source's PCM
//!
//! `sample_offset = floor(frame_index * sample_rate / frame_rate)`
//!
//! Two delivery modes, both off the command loop thread:
//! - **continuous** while playing: a thread streams 1024-sample chunks from
//!   the offset forward. It is restarted (re-synced) on play, on scrub while
//!   playing, on speed change, and on source change.
//! - **snippet** after a paused seek/step: about one frame of audio, then stop.
//!
//! The delivery thread reads only the track it was started with; it never
//! touches playback state. Output failures are reported through
//! `take_faults()` so the owner can disable audio for that stream only.

#[cfg(feature = "cpal")]
pub mod cpal_output;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};

use crate::core::player::Transition;
use crate::entities::decoder::{AudioError, AudioTrack};
use crate::entities::stream::VideoId;

/// Sample frames per continuous-playback chunk
pub const CHUNK_SAMPLES: usize = 1024;

/// Continuous audio only plays at 1x; other speeds would drift
const NATURAL_SPEED_TOLERANCE: f64 = 1e-3;

/// Audio device sink for interleaved s16 samples
pub trait AudioOutput {
    /// Queue samples; may block to pace delivery
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError>;

    /// Block until queued samples have played
    fn finish(&mut self) {}
}

/// Creates an output for `(sample_rate, channels)` on the delivery thread
pub type OutputFactory = Arc<dyn Fn(u32, u16) -> Result<Box<dyn AudioOutput>, AudioError> + Send + Sync>;

/// Discards samples but sleeps for their duration (real-time pacing)
pub struct NullOutput {
    sample_rate: u32,
    channels: u16,
}

impl NullOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }

    pub fn factory() -> OutputFactory {
        Arc::new(|sr, ch| Ok(Box::new(NullOutput::new(sr, ch)) as Box<dyn AudioOutput>))
    }
}

impl AudioOutput for NullOutput {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let frames = samples.len() / self.channels as usize;
        thread::sleep(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64));
        Ok(())
    }
}

/// Records every write (unpaced); shared buffer for inspection
#[derive(Clone, Default)]
pub struct MemoryOutput {
    pub samples: Arc<Mutex<Vec<i16>>>,
    pub writes: Arc<Mutex<usize>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> OutputFactory {
        let this = self.clone();
        Arc::new(move |_, _| Ok(Box::new(this.clone()) as Box<dyn AudioOutput>))
    }

    pub fn recorded(&self) -> Vec<i16> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) = 0;
    }
}

impl AudioOutput for MemoryOutput {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(samples);
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Running continuous delivery thread
struct Continuous {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Audio source selection plus delivery threads
pub struct AudioSync {
    tracks: HashMap<VideoId, Arc<dyn AudioTrack>>,
    source: Option<VideoId>,
    frame_rate: f64,
    output: OutputFactory,
    snippets: bool,
    continuous: Option<Continuous>,
    fault_tx: Sender<(VideoId, AudioError)>,
    fault_rx: Receiver<(VideoId, AudioError)>,
}

impl AudioSync {
    pub fn new(output: OutputFactory, snippets: bool) -> Self {
        let (fault_tx, fault_rx) = unbounded();
        Self {
            tracks: HashMap::new(),
            source: None,
            frame_rate: 0.0,
            output,
            snippets,
            continuous: None,
            fault_tx,
            fault_rx,
        }
    }

    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        self.frame_rate = frame_rate;
    }

    pub fn add_track(&mut self, id: VideoId, track: Arc<dyn AudioTrack>) {
        self.tracks.insert(id, track);
    }

    /// Forget a stream's track; clears the selection if it was the source
    pub fn remove_track(&mut self, id: VideoId) {
        self.tracks.remove(&id);
        if self.source == Some(id) {
            self.stop();
            self.source = None;
        }
    }

    pub fn has_track(&self, id: VideoId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn track(&self, id: VideoId) -> Option<Arc<dyn AudioTrack>> {
        self.tracks.get(&id).cloned()
    }

    pub fn source(&self) -> Option<VideoId> {
        self.source
    }

    /// Select the source track (must have been added). Callers re-sync.
    pub fn set_source(&mut self, id: Option<VideoId>) -> Result<(), AudioError> {
        if let Some(id) = id
            && !self.tracks.contains_key(&id)
        {
            return Err(AudioError::NoTrack);
        }
        self.stop();
        self.source = id;
        info!("Audio source: {:?}", id.map(|v| v.0));
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.continuous
            .as_ref()
            .is_some_and(|c| !c.handle.is_finished())
    }

    /// Sample offset of `frame_index` in the track of `source`
    pub fn resolve_offset(&self, frame_index: f64, source: VideoId) -> Option<u64> {
        let track = self.tracks.get(&source)?;
        if self.frame_rate <= 0.0 {
            return None;
        }
        Some((frame_index.max(0.0) * track.sample_rate() as f64 / self.frame_rate).floor() as u64)
    }

    /// Sample frames covering one video frame
    pub fn samples_per_frame(&self, track: &dyn AudioTrack) -> usize {
        if self.frame_rate <= 0.0 {
            return 0;
        }
        ((track.sample_rate() as f64 / self.frame_rate) as usize).max(1)
    }

    /// One frame of audio at `frame_index` from the current source
    pub fn snippet_samples(&self, frame_index: f64) -> Option<Vec<i16>> {
        let source = self.source?;
        let track = self.tracks.get(&source)?;
        let offset = self.resolve_offset(frame_index, source)?;
        match track.read_pcm(offset, self.samples_per_frame(track.as_ref())) {
            Ok(samples) if !samples.is_empty() => Some(samples),
            Ok(_) => None,
            Err(e) => {
                let _ = self.fault_tx.send((source, e));
                None
            }
        }
    }

    /// React to a playback transition at `frame_index`
    pub fn on_transition(&mut self, transition: Transition, frame_index: f64, speed: f64) {
        match transition {
            Transition::Idle => {}
            Transition::Started | Transition::Resynced => {
                if (speed - 1.0).abs() <= NATURAL_SPEED_TOLERANCE {
                    self.start_continuous(frame_index);
                } else {
                    debug!("Audio muted at {:.2}x", speed);
                    self.stop();
                }
            }
            Transition::Stopped | Transition::ReachedEnd => self.stop(),
            Transition::Seeked => {
                self.stop();
                if self.snippets {
                    self.play_snippet(frame_index);
                }
            }
        }
    }

    /// Restart continuous delivery from `frame_index`
    pub fn start_continuous(&mut self, frame_index: f64) {
        self.stop();
        let Some(source) = self.source else {
            return;
        };
        let (Some(track), Some(offset)) = (self.tracks.get(&source).cloned(), self.resolve_offset(frame_index, source)) else {
            return;
        };
        if offset >= track.total_samples() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let factory = Arc::clone(&self.output);
        let faults = self.fault_tx.clone();
        let spawned = thread::Builder::new()
            .name("vcompare-audio".into())
            .spawn(move || {
                if let Err(e) = stream_from(track.as_ref(), offset, &factory, &thread_stop) {
                    warn!("Audio playback for video {} failed: {}", source, e);
                    let _ = faults.send((source, e));
                }
            });
        match spawned {
            Ok(handle) => {
                debug!("Audio continuous from sample {} (video {})", offset, source);
                self.continuous = Some(Continuous { stop, handle });
            }
            Err(e) => warn!("Failed to spawn audio thread: {}", e),
        }
    }

    /// Deliver about one frame of audio, detached
    pub fn play_snippet(&self, frame_index: f64) {
        let (Some(source), Some(samples)) = (self.source, self.snippet_samples(frame_index)) else {
            return;
        };
        let Some(track) = self.tracks.get(&source) else {
            return;
        };
        let (sample_rate, channels) = (track.sample_rate(), track.channels());
        let factory = Arc::clone(&self.output);
        let faults = self.fault_tx.clone();
        let spawned = thread::Builder::new()
            .name("vcompare-audio-snippet".into())
            .spawn(move || {
                let result = factory(sample_rate, channels).and_then(|mut out| {
                    out.write(&samples)?;
                    out.finish();
                    Ok(())
                });
                if let Err(e) = result {
                    debug!("Snippet playback failed: {}", e);
                    let _ = faults.send((source, e));
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn snippet thread: {}", e);
        }
    }

    /// Stop continuous delivery and wait for the thread
    pub fn stop(&mut self) {
        if let Some(c) = self.continuous.take() {
            c.stop.store(true, Ordering::SeqCst);
            let _ = c.handle.join();
            debug!("Audio stopped");
        }
    }

    /// Audio failures since the last call, per stream
    pub fn take_faults(&self) -> Vec<(VideoId, AudioError)> {
        self.fault_rx.try_iter().collect()
    }
}

impl Drop for AudioSync {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_from(
    track: &dyn AudioTrack,
    mut offset: u64,
    factory: &OutputFactory,
    stop: &AtomicBool,
) -> Result<(), AudioError> {
    let mut output = factory(track.sample_rate(), track.channels())?;
    while !stop.load(Ordering::Relaxed) {
        let chunk = track.read_pcm(offset, CHUNK_SAMPLES)?;
        if chunk.is_empty() {
            output.finish();
            break;
        }
        output.write(&chunk)?;
        offset += (chunk.len() / track.channels().max(1) as usize) as u64;
    }
    Ok(())
}
