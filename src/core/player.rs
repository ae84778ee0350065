//! Playback clock: wall-clock-driven timeline position
//!
//! **Why**: Advancing one frame per UI tick drifts whenever decoding or
//! composition is slower than the frame rate. Instead the position is derived
//! from elapsed wall time since the last anchor:
//!
//! `current = index_at_play_start + elapsed * frame_rate * speed`
//!
//! so playback stays real-time regardless of render load (frames are dropped,
//! not delayed).
//!
//! **Used by**: Session (every tick and every transport command)
//!
//! # States
//!
//! - `Paused -> Playing` on play (anchors wall time and index)
//! - `Playing -> Paused` on pause, step, or reaching the last frame
//! - Scrub and speed changes while playing re-anchor and keep playing
//!
//! The fractional position is authoritative between ticks; display uses its
//! floor. Each transport method returns a `Transition` the audio side reacts to.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, trace, warn};

use super::clock::Clock;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Paused,
    Playing,
}

/// What a transport command did, for audio re-synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed
    Idle,
    /// Paused -> Playing
    Started,
    /// Playing -> Paused on request
    Stopped,
    /// Playing -> Paused at the last frame
    ReachedEnd,
    /// Position changed while paused (or by a step)
    Seeked,
    /// Re-anchored while playing (scrub or speed change)
    Resynced,
}

/// Process-wide transport state
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_frame_index: f64,
    pub state: PlayState,
    pub speed: f64,
    pub wall_time_at_play_start: Option<Instant>,
    pub frame_index_at_play_start: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_frame_index: 0.0,
            state: PlayState::Paused,
            speed: 1.0,
            wall_time_at_play_start: None,
            frame_index_at_play_start: 0.0,
        }
    }
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }
}

pub struct Player {
    state: PlaybackState,
    frame_rate: f64,
    max_frame_count: usize,
    clock: Arc<dyn Clock>,
}

impl Player {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: PlaybackState::default(),
            frame_rate: 0.0,
            max_frame_count: 0,
            clock,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn speed(&self) -> f64 {
        self.state.speed
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn max_frame_count(&self) -> usize {
        self.max_frame_count
    }

    pub fn current_frame_index(&self) -> f64 {
        self.state.current_frame_index
    }

    fn last_index(&self) -> f64 {
        self.max_frame_count.saturating_sub(1) as f64
    }

    fn clamp_index(&self, index: f64) -> f64 {
        index.clamp(0.0, self.last_index())
    }

    /// Update the shared timeline after a load or removal
    pub fn set_timeline(&mut self, frame_rate: f64, max_frame_count: usize) {
        self.frame_rate = frame_rate;
        self.max_frame_count = max_frame_count;
        self.state.current_frame_index = self.clamp_index(self.state.current_frame_index);
        if self.is_playing() {
            self.anchor(self.clock.now());
        }
    }

    /// Reset to frame 0, paused (all videos cleared)
    pub fn teardown(&mut self) {
        let speed = self.state.speed;
        self.state = PlaybackState {
            speed,
            ..PlaybackState::default()
        };
        self.frame_rate = 0.0;
        self.max_frame_count = 0;
        debug!("Playback state torn down");
    }

    /// Integer frame shown on screen
    pub fn display_index(&self) -> usize {
        self.state.current_frame_index.max(0.0).floor() as usize
    }

    /// Displayed index for a stream with `frame_count` frames (holds its last frame)
    pub fn index_for(&self, frame_count: usize) -> usize {
        self.display_index().min(frame_count.saturating_sub(1))
    }

    /// Position in seconds
    pub fn seconds(&self) -> f64 {
        if self.frame_rate > 0.0 {
            self.state.current_frame_index / self.frame_rate
        } else {
            0.0
        }
    }

    fn anchor(&mut self, now: Instant) {
        self.state.wall_time_at_play_start = Some(now);
        self.state.frame_index_at_play_start = self.state.current_frame_index;
    }

    pub fn play(&mut self) -> Transition {
        if self.is_playing() || self.max_frame_count == 0 || self.frame_rate <= 0.0 {
            return Transition::Idle;
        }
        if self.display_index() + 1 >= self.max_frame_count {
            self.state.current_frame_index = 0.0;
        }
        self.state.state = PlayState::Playing;
        self.anchor(self.clock.now());
        info!(
            "Play from {:.2} at {:.2}x",
            self.state.current_frame_index, self.state.speed
        );
        Transition::Started
    }

    pub fn pause(&mut self) -> Transition {
        if !self.is_playing() {
            return Transition::Idle;
        }
        self.advance_to(self.clock.now());
        self.state.state = PlayState::Paused;
        info!("Paused at {:.2}", self.state.current_frame_index);
        Transition::Stopped
    }

    pub fn toggle(&mut self) -> Transition {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Advance from the wall clock (call on every scheduling opportunity)
    pub fn tick(&mut self) -> Transition {
        let now = self.clock.now();
        self.tick_at(now)
    }

    /// Pure tick for a given instant
    pub fn tick_at(&mut self, now: Instant) -> Transition {
        if !self.is_playing() {
            return Transition::Idle;
        }
        if self.advance_to(now) {
            self.state.state = PlayState::Paused;
            info!("Reached end of timeline at {}", self.display_index());
            return Transition::ReachedEnd;
        }
        Transition::Idle
    }

    /// Recompute position from the anchor; true when clamped at the end
    fn advance_to(&mut self, now: Instant) -> bool {
        let Some(start) = self.state.wall_time_at_play_start else {
            return false;
        };
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        let position =
            self.state.frame_index_at_play_start + elapsed * self.frame_rate * self.state.speed;
        let last = self.last_index();
        self.state.current_frame_index = position.clamp(0.0, last);
        trace!("Tick: {:.3}", self.state.current_frame_index);
        position >= last
    }

    /// Jump to `index`; keeps playing (re-anchored) if playing
    pub fn scrub_to(&mut self, index: f64) -> Transition {
        if self.max_frame_count == 0 {
            return Transition::Idle;
        }
        if !index.is_finite() {
            warn!("Ignoring scrub to non-finite position {}", index);
            return Transition::Idle;
        }
        self.state.current_frame_index = self.clamp_index(index);
        debug!("Scrub to {:.2}", self.state.current_frame_index);
        if self.is_playing() {
            self.anchor(self.clock.now());
            Transition::Resynced
        } else {
            Transition::Seeked
        }
    }

    /// Move by whole frames from the displayed index, pausing first
    pub fn step(&mut self, delta: i64) -> Transition {
        if self.max_frame_count == 0 {
            return Transition::Idle;
        }
        if self.is_playing() {
            self.advance_to(self.clock.now());
            self.state.state = PlayState::Paused;
        }
        let target = self.display_index() as i64 + delta;
        self.state.current_frame_index = self.clamp_index(target as f64);
        debug!("Step {:+} -> {}", delta, self.display_index());
        Transition::Seeked
    }

    /// Set speed multiplier (clamped to 0.1..=10); re-anchors while playing
    pub fn set_speed(&mut self, speed: f64) -> Transition {
        let speed = if speed.is_finite() {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            1.0
        };
        if self.is_playing() {
            let now = self.clock.now();
            self.advance_to(now);
            self.state.speed = speed;
            self.anchor(now);
            debug!("Speed {:.2}x (re-anchored)", speed);
            Transition::Resynced
        } else {
            self.state.speed = speed;
            Transition::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use approx::assert_abs_diff_eq;

    fn player(frames: usize) -> (Player, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let mut p = Player::new(clock.clone());
        p.set_timeline(30.0, frames);
        (p, clock)
    }

    #[test]
    fn test_two_seconds_at_double_speed() {
        let (mut p, clock) = player(1000);
        p.set_speed(2.0);
        assert_eq!(p.play(), Transition::Started);
        clock.advance_secs(2.0);
        p.tick();
        assert_abs_diff_eq!(p.current_frame_index(), 120.0, epsilon = 1e-6);
        assert_eq!(p.display_index(), 120);
    }

    #[test]
    fn test_position_independent_of_tick_count() {
        let (mut p, clock) = player(1000);
        p.play();
        // one tick after 1s == many small ticks over 1s
        for _ in 0..10 {
            clock.advance_secs(0.1);
            p.tick();
        }
        assert_abs_diff_eq!(p.current_frame_index(), 30.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fractional_position_carried() {
        let (mut p, clock) = player(1000);
        p.set_speed(0.5);
        p.play();
        clock.advance_secs(0.1); // 1.5 frames
        p.tick();
        assert_eq!(p.display_index(), 1);
        clock.advance_secs(0.12); // 3.3 frames
        p.tick();
        assert_eq!(p.display_index(), 3);
    }

    #[test]
    fn test_pause_freezes_position() {
        let (mut p, clock) = player(1000);
        p.play();
        clock.advance_secs(1.0);
        assert_eq!(p.pause(), Transition::Stopped);
        clock.advance_secs(5.0);
        p.tick();
        assert_abs_diff_eq!(p.current_frame_index(), 30.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scrub_while_playing_reanchors() {
        let (mut p, clock) = player(1000);
        p.play();
        clock.advance_secs(1.0);
        assert_eq!(p.scrub_to(500.0), Transition::Resynced);
        assert!(p.is_playing());
        clock.advance_secs(1.0);
        p.tick();
        assert_abs_diff_eq!(p.current_frame_index(), 530.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scrub_clamps_to_timeline() {
        let (mut p, _) = player(300);
        assert_eq!(p.scrub_to(1e6), Transition::Seeked);
        assert_eq!(p.display_index(), 299);
        p.scrub_to(-5.0);
        assert_eq!(p.display_index(), 0);
    }

    #[test]
    fn test_scrub_ignores_non_finite_positions() {
        let (mut p, clock) = player(300);
        p.scrub_to(40.0);
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(p.scrub_to(bad), Transition::Idle);
            assert_eq!(p.current_frame_index(), 40.0);
        }

        // playback still runs to the end afterwards
        p.play();
        p.scrub_to(f64::NAN);
        clock.advance_secs(100.0);
        assert_eq!(p.tick(), Transition::ReachedEnd);
        assert_eq!(p.display_index(), 299);
    }

    #[test]
    fn test_step_pauses_and_moves_one_frame() {
        let (mut p, clock) = player(300);
        p.play();
        clock.advance_secs(1.0);
        assert_eq!(p.step(1), Transition::Seeked);
        assert!(!p.is_playing());
        assert_eq!(p.display_index(), 31);
        p.step(-1);
        p.step(-1);
        assert_eq!(p.display_index(), 29);
    }

    #[test]
    fn test_reaching_end_pauses() {
        let (mut p, clock) = player(60);
        p.play();
        clock.advance_secs(10.0);
        assert_eq!(p.tick(), Transition::ReachedEnd);
        assert!(!p.is_playing());
        assert_eq!(p.display_index(), 59);
        // play again from the end rewinds
        p.play();
        assert_eq!(p.display_index(), 0);
    }

    #[test]
    fn test_speed_change_while_playing() {
        let (mut p, clock) = player(1000);
        p.play();
        clock.advance_secs(1.0);
        assert_eq!(p.set_speed(3.0), Transition::Resynced);
        clock.advance_secs(1.0);
        p.tick();
        assert_abs_diff_eq!(p.current_frame_index(), 120.0, epsilon = 1e-6);
        assert_eq!(p.set_speed(50.0), Transition::Resynced);
        assert_eq!(p.speed(), MAX_SPEED);
    }

    #[test]
    fn test_index_for_short_stream() {
        let (mut p, _) = player(300);
        p.scrub_to(200.0);
        assert_eq!(p.index_for(300), 200);
        assert_eq!(p.index_for(150), 149);
    }

    #[test]
    fn test_teardown_resets() {
        let (mut p, _) = player(300);
        p.scrub_to(100.0);
        p.play();
        p.teardown();
        assert!(!p.is_playing());
        assert_eq!(p.display_index(), 0);
        assert_eq!(p.play(), Transition::Idle);
    }
}
