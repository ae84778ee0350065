//! Comparison session: single owner of all engine state
//!
//! Every UI command funnels through `Session` on one thread. It owns the
//! playback clock, shared viewport, filter assignments, captions and audio
//! selection, and resolves pixels through the frame cache. Background work
//! (prefetch, audio delivery) only talks back through channels drained here.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use glam::DVec2;
use log::{debug, info, warn};

use crate::audio::{AudioSync, OutputFactory};
use crate::config::Settings;
use crate::core::clock::Clock;
use crate::core::frame_cache::{CacheStats, FrameCache};
use crate::core::player::{Player, Transition};
use crate::core::workers::Workers;
use crate::entities::compositor::{self, GridLayout, PanelInput, PanelSize};
use crate::entities::decoder::{DecodeAdapter, DecodeService, OpenError};
use crate::entities::filters::{Filter, FilterAssignment, FilterError, FilterRegistry};
use crate::entities::frame::Frame;
use crate::entities::stream::{VideoId, VideoStream, same_frame_rate};
use crate::entities::viewport::{PanelView, Roi, ViewportState};

/// Warnings kept for the UI; older ones are dropped
const MAX_WARNINGS: usize = 64;

/// Rejected `load_video`; the loaded set is left unchanged
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Open(OpenError),
    FrameRateMismatch { expected: f64, found: f64 },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Open(e) => write!(f, "{}", e),
            LoadError::FrameRateMismatch { expected, found } => write!(
                f,
                "Frame rate mismatch: session is {:.3} fps, video is {:.3} fps",
                expected, found
            ),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Open(e) => Some(e),
            LoadError::FrameRateMismatch { .. } => None,
        }
    }
}

impl From<OpenError> for LoadError {
    fn from(e: OpenError) -> Self {
        LoadError::Open(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    UnknownVideo(VideoId),
    NoAudioTrack(VideoId),
    Filter(FilterError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownVideo(id) => write!(f, "No video with id {}", id),
            CommandError::NoAudioTrack(id) => write!(f, "Video {} has no audio track", id),
            CommandError::Filter(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<FilterError> for CommandError {
    fn from(e: FilterError) -> Self {
        CommandError::Filter(e)
    }
}

/// Validated assignment plus its instantiated filter
#[derive(Clone)]
struct ActiveFilter {
    assignment: FilterAssignment,
    filter: Arc<dyn Filter>,
}

pub struct Session {
    settings: Settings,
    service: Arc<dyn DecodeService>,
    cache: FrameCache,
    player: Player,
    viewport: ViewportState,
    registry: FilterRegistry,
    filters: HashMap<VideoId, ActiveFilter>,
    /// Load order; also panel order
    videos: Vec<VideoStream>,
    captions: HashMap<VideoId, String>,
    audio: AudioSync,
    warnings: VecDeque<String>,
    next_id: u32,
}

impl Session {
    /// Create a session with a prefetch pool sized from `settings.workers`
    pub fn new(settings: Settings, service: Arc<dyn DecodeService>, clock: Arc<dyn Clock>, output: OutputFactory) -> Self {
        let workers = match Workers::new(settings.workers) {
            Ok(w) => Some(Arc::new(w)),
            Err(e) => {
                warn!("Failed to start prefetch workers ({}); decoding synchronously", e);
                None
            }
        };
        Self::with_workers(settings, service, clock, output, workers)
    }

    /// Create a session with an explicit pool (None = synchronous decode only)
    pub fn with_workers(
        settings: Settings,
        service: Arc<dyn DecodeService>,
        clock: Arc<dyn Clock>,
        output: OutputFactory,
        workers: Option<Arc<Workers>>,
    ) -> Self {
        let cache = FrameCache::new(settings.cache_capacity, settings.prefetch_window, workers);
        let mut player = Player::new(clock);
        player.set_speed(settings.default_speed);
        let viewport = ViewportState::new(settings.zoom_base, settings.min_drag_fraction);
        let audio = AudioSync::new(output, settings.snippet_audio);
        Self {
            settings,
            service,
            cache,
            player,
            viewport,
            registry: FilterRegistry::with_builtins(),
            filters: HashMap::new(),
            videos: Vec::new(),
            captions: HashMap::new(),
            audio,
            warnings: VecDeque::new(),
            next_id: 0,
        }
    }

    // ------------------------------------------------------------------
    // Video set
    // ------------------------------------------------------------------

    /// Open a video and admit it to the session
    pub fn load_video(&mut self, path: &Path) -> Result<VideoId, LoadError> {
        let result = self.admit(path);
        if let Err(e) = &result {
            self.push_warning(format!("Cannot load {}: {}", path.display(), e));
        }
        result
    }

    fn admit(&mut self, path: &Path) -> Result<VideoId, LoadError> {
        let source = self.service.open(path)?;
        let info = source.info();
        if info.frame_count == 0 {
            return Err(OpenError::NoVideoStream(path.display().to_string()).into());
        }
        if let Some(first) = self.videos.first()
            && !same_frame_rate(first.frame_rate, info.frame_rate)
        {
            return Err(LoadError::FrameRateMismatch {
                expected: first.frame_rate,
                found: info.frame_rate,
            });
        }

        let id = VideoId(self.next_id);
        self.next_id += 1;
        let stream = VideoStream::new(id, path, &info);
        self.cache.add_stream(&stream, DecodeAdapter::new(id, source));

        if stream.has_audio_track && self.settings.audio_enabled {
            match self.service.open_audio(path) {
                Ok(track) => self.audio.add_track(id, track),
                Err(e) => self.push_warning(format!("Audio disabled for video {}: {}", id, e)),
            }
        }

        info!(
            "Loaded video {}: {} ({}x{}, {} frames @ {:.3} fps{})",
            id,
            path.display(),
            stream.native_resolution.0,
            stream.native_resolution.1,
            stream.frame_count,
            stream.frame_rate,
            if stream.has_audio_track { ", audio" } else { "" }
        );
        self.captions.insert(id, stream.default_caption());
        self.videos.push(stream);
        self.after_videos_changed();
        Ok(id)
    }

    /// Drop a video and everything keyed by its id
    pub fn remove_video(&mut self, id: VideoId) -> Result<(), CommandError> {
        let pos = self
            .videos
            .iter()
            .position(|v| v.id == id)
            .ok_or(CommandError::UnknownVideo(id))?;
        if self.videos.len() == 1 {
            self.clear_videos();
            return Ok(());
        }

        self.videos.remove(pos);
        self.cache.remove_stream(id);
        self.captions.remove(&id);
        self.filters.remove(&id);
        let orphaned: Vec<VideoId> = self
            .filters
            .iter()
            .filter(|(_, f)| f.assignment.reference == Some(id))
            .map(|(k, _)| *k)
            .collect();
        for other in orphaned {
            self.filters.remove(&other);
            self.push_warning(format!("Filter on video {} cleared: reference video {} removed", other, id));
        }

        let was_source = self.audio.source() == Some(id);
        self.audio.remove_track(id);
        info!("Removed video {}", id);
        self.after_videos_changed();
        if was_source && self.player.is_playing() {
            self.sync_audio(Transition::Resynced);
        }
        Ok(())
    }

    /// Remove all videos, stop playback and reset the view
    pub fn clear_videos(&mut self) {
        self.audio.stop();
        self.player.teardown();
        for v in &self.videos {
            self.audio.remove_track(v.id);
        }
        self.cache.clear();
        self.filters.clear();
        self.captions.clear();
        self.videos.clear();
        self.viewport.reset();
        info!("All videos cleared");
    }

    fn after_videos_changed(&mut self) {
        let frame_rate = self.videos.first().map(|v| v.frame_rate).unwrap_or(0.0);
        let max = self.videos.iter().map(|v| v.frame_count).max().unwrap_or(0);
        self.player.set_timeline(frame_rate, max);
        self.audio.set_frame_rate(frame_rate);
        self.cache.set_playhead(self.player.display_index());

        // default source: the first video, when it carries audio
        if self.audio.source().is_none()
            && let Some(first) = self.videos.first()
            && self.audio.has_track(first.id)
        {
            let _ = self.audio.set_source(Some(first.id));
        }
    }

    pub fn videos(&self) -> &[VideoStream] {
        &self.videos
    }

    pub fn video(&self, id: VideoId) -> Option<&VideoStream> {
        self.videos.iter().find(|v| v.id == id)
    }

    fn require(&self, id: VideoId) -> Result<&VideoStream, CommandError> {
        self.video(id).ok_or(CommandError::UnknownVideo(id))
    }

    // ------------------------------------------------------------------
    // Captions, filters, audio source
    // ------------------------------------------------------------------

    pub fn set_caption(&mut self, id: VideoId, text: &str) -> Result<(), CommandError> {
        self.require(id)?;
        self.captions.insert(id, text.to_string());
        Ok(())
    }

    pub fn caption(&self, id: VideoId) -> Option<&str> {
        self.captions.get(&id).map(String::as_str)
    }

    pub fn filter_registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Install a filter; returns every video that received the assignment.
    ///
    /// With `apply_to_all_except_reference` the assignment goes to every
    /// loaded video except the reference.
    pub fn set_filter(&mut self, id: VideoId, assignment: FilterAssignment) -> Result<Vec<VideoId>, CommandError> {
        self.require(id)?;
        if let Some(reference) = assignment.reference {
            self.require(reference)?;
        }
        self.registry.validate(&assignment)?;
        let filter: Arc<dyn Filter> = Arc::from(self.registry.create(&assignment.filter_id, &assignment.params)?);

        let targets: Vec<VideoId> = if assignment.apply_to_all_except_reference {
            self.videos
                .iter()
                .map(|v| v.id)
                .filter(|v| Some(*v) != assignment.reference)
                .collect()
        } else {
            vec![id]
        };
        let active = ActiveFilter { assignment, filter };
        for target in &targets {
            self.filters.insert(*target, active.clone());
        }
        info!("Filter '{}' set on videos {:?}", active.assignment.filter_id, targets);
        Ok(targets)
    }

    /// Clear one video's filter, or all filters with None
    pub fn clear_filter(&mut self, id: Option<VideoId>) -> Result<(), CommandError> {
        match id {
            Some(id) => {
                self.require(id)?;
                self.filters.remove(&id);
            }
            None => self.filters.clear(),
        }
        Ok(())
    }

    pub fn filter_assignment(&self, id: VideoId) -> Option<&FilterAssignment> {
        self.filters.get(&id).map(|f| &f.assignment)
    }

    /// Select the audio source (None = mute); re-syncs when playing
    pub fn set_audio_source(&mut self, id: Option<VideoId>) -> Result<(), CommandError> {
        if let Some(id) = id {
            self.require(id)?;
            self.audio
                .set_source(Some(id))
                .map_err(|_| CommandError::NoAudioTrack(id))?;
        } else {
            self.audio.stop();
            let _ = self.audio.set_source(None);
        }
        if self.player.is_playing() {
            self.sync_audio(Transition::Resynced);
        }
        Ok(())
    }

    pub fn audio_source(&self) -> Option<VideoId> {
        self.audio.source()
    }

    pub fn audio(&self) -> &AudioSync {
        &self.audio
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub fn play(&mut self) -> Transition {
        let t = self.player.play();
        self.after_transport(t)
    }

    pub fn pause(&mut self) -> Transition {
        let t = self.player.pause();
        self.after_transport(t)
    }

    pub fn toggle_play(&mut self) -> Transition {
        let t = self.player.toggle();
        self.after_transport(t)
    }

    pub fn scrub_to(&mut self, index: f64) -> Transition {
        let t = self.player.scrub_to(index);
        self.after_transport(t)
    }

    pub fn step(&mut self, delta: i64) -> Transition {
        let t = self.player.step(delta);
        self.after_transport(t)
    }

    pub fn set_speed(&mut self, speed: f64) -> Transition {
        let t = self.player.set_speed(speed);
        self.after_transport(t)
    }

    /// Advance the clock and apply background results
    pub fn tick(&mut self) -> Transition {
        let t = self.player.tick();
        self.cache.drain_prefetch();
        self.collect_faults();
        self.after_transport(t)
    }

    fn after_transport(&mut self, t: Transition) -> Transition {
        self.cache.set_playhead(self.player.display_index());
        if t != Transition::Idle {
            self.sync_audio(t);
        }
        t
    }

    fn sync_audio(&mut self, t: Transition) {
        self.audio
            .on_transition(t, self.player.current_frame_index(), self.player.speed());
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    /// Authoritative (fractional) playback position
    pub fn current_frame_index(&self) -> f64 {
        self.player.current_frame_index()
    }

    /// Frame index shown for a video (holds its last frame past its end)
    pub fn displayed_index(&self, id: VideoId) -> Option<usize> {
        self.video(id).map(|v| self.player.index_for(v.frame_count))
    }

    pub fn status_text(&self) -> String {
        let seconds = self.player.seconds();
        let minutes = (seconds / 60.0).floor();
        format!(
            "Frame: {} / {}  Time: {:02}:{:06.3}  {:.2}x [{}]",
            self.player.display_index(),
            self.player.max_frame_count(),
            minutes as u64,
            seconds - minutes * 60.0,
            self.player.speed(),
            if self.player.is_playing() { "Playing" } else { "Paused" }
        )
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    pub fn roi(&self) -> Roi {
        self.viewport.roi
    }

    /// Geometry of a video's interactive panel at the current ROI
    pub fn panel_view(&self, id: VideoId) -> Result<PanelView, CommandError> {
        let v = self.require(id)?;
        let (w, h) = v.native_resolution;
        let (_, _, cw, ch) = self.viewport.roi.to_pixel_rect(w, h);
        let ph = self.settings.panel_height.max(1);
        let pw = compositor::width_for_row(cw, ch, ph);
        Ok(PanelView::new(pw as f64, ph as f64, w as f64, h as f64))
    }

    /// Rubber-band select on `panel`; points are panel-local pixels
    pub fn drag_select_roi(&mut self, panel: VideoId, start: DVec2, end: DVec2) -> Result<bool, CommandError> {
        let view = self.panel_view(panel)?;
        Ok(self.viewport.drag_select(&view, start, end))
    }

    /// Zoom by `steps` wheel notches around `cursor` (positive = in)
    pub fn wheel_zoom(&mut self, panel: VideoId, cursor: DVec2, steps: f64) -> Result<bool, CommandError> {
        let view = self.panel_view(panel)?;
        Ok(self.viewport.wheel_zoom(&view, cursor, steps))
    }

    pub fn pan_roi(&mut self, panel: VideoId, delta: DVec2) -> Result<bool, CommandError> {
        let view = self.panel_view(panel)?;
        Ok(self.viewport.pan(&view, delta))
    }

    pub fn reset_roi(&mut self) {
        self.viewport.reset();
        debug!("ROI reset");
    }

    // ------------------------------------------------------------------
    // Pixels
    // ------------------------------------------------------------------

    fn panel_input(&mut self, stream: &VideoStream, index: usize) -> Option<PanelInput> {
        let frame = self.cache.get(stream.id, index.min(stream.last_index()))?;
        let mut input = PanelInput::new(frame);
        if let Some(active) = self.filters.get(&stream.id).cloned() {
            if let Some(reference) = active.assignment.reference
                && let Some(r) = self.video(reference).cloned()
            {
                input.reference = self.cache.get(r.id, index.min(r.last_index()));
            }
            input.filter = Some(active.filter);
        }
        input.caption = self.captions.get(&stream.id).cloned();
        Some(input)
    }

    /// Composited panel for one video at the current position
    pub fn panel_frame(&mut self, id: VideoId) -> Result<Frame, CommandError> {
        let stream = self.require(id)?.clone();
        let index = self.player.display_index();
        let input = self
            .panel_input(&stream, index)
            .ok_or(CommandError::UnknownVideo(id))?;
        self.collect_faults();
        Ok(compositor::compose_panel(
            &input,
            &self.viewport.roi,
            PanelSize::RowHeight(self.settings.panel_height.max(1)),
        ))
    }

    /// Current frame of every video, resolved through the cache.
    ///
    /// This is what a display pulls on every new position. Calling it keeps
    /// decoding and prefetch following playback without paying for
    /// composition.
    pub fn resolve_frames(&mut self) -> Vec<(VideoId, Frame)> {
        let index = self.player.display_index();
        let streams = self.videos.clone();
        let frames = streams
            .iter()
            .filter_map(|s| self.cache.get(s.id, index.min(s.last_index())).map(|f| (s.id, f)))
            .collect();
        self.collect_faults();
        frames
    }

    /// Visible crop size per video, in load order
    pub fn crop_sizes(&self) -> Vec<(usize, usize)> {
        self.videos
            .iter()
            .map(|v| {
                let (_, _, w, h) = self.viewport.roi.to_pixel_rect(v.native_resolution.0, v.native_resolution.1);
                (w, h)
            })
            .collect()
    }

    /// Grid of all panels at global `index`
    pub fn compose_at(&mut self, index: usize, layout: &GridLayout, marker: bool) -> Frame {
        let streams = self.videos.clone();
        let inputs: Vec<PanelInput> = streams
            .iter()
            .filter_map(|s| self.panel_input(s, index))
            .collect();
        self.collect_faults();
        compositor::compose_grid(&inputs, &self.viewport.roi, layout, marker.then_some(index))
    }

    /// Interactive grid at the current position (None when nothing is loaded)
    pub fn composite(&mut self) -> Option<Frame> {
        if self.videos.is_empty() {
            return None;
        }
        let ph = self.settings.panel_height.max(1);
        let pw = self
            .crop_sizes()
            .iter()
            .map(|&(w, h)| compositor::width_for_row(w, h, ph))
            .max()
            .unwrap_or(1);
        let layout = GridLayout::new(self.videos.len(), self.settings.rows, pw, ph);
        Some(self.compose_at(self.player.display_index(), &layout, false))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_rows(&mut self, rows: usize) {
        self.settings.rows = rows.max(1);
    }

    pub fn cache_stats(&self) -> Arc<CacheStats> {
        self.cache.stats()
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Warnings
    // ------------------------------------------------------------------

    fn push_warning(&mut self, msg: String) {
        warn!("{}", msg);
        if self.warnings.len() == MAX_WARNINGS {
            self.warnings.pop_front();
        }
        self.warnings.push_back(msg);
    }

    /// Turn background faults into warnings; audio faults mute that stream
    fn collect_faults(&mut self) {
        for e in self.cache.take_faults() {
            self.push_warning(format!("{}; showing placeholder", e));
        }
        for (id, e) in self.audio.take_faults() {
            let was_source = self.audio.source() == Some(id);
            self.audio.remove_track(id);
            self.push_warning(format!("Audio disabled for video {}: {}", id, e));
            if was_source {
                debug!("Audio source {} dropped after failure", id);
            }
        }
    }

    /// Warnings since the last call, oldest first
    pub fn take_warnings(&mut self) -> Vec<String> {
        self.warnings.drain(..).collect()
    }
}
