//! VCOMPARE - side-by-side video comparison engine
//!
//! Re-exports all modules for use by the binary target.

// Core engine (cache, clock, player, session)
pub mod core;

pub mod audio;
pub mod cli;
pub mod config;
pub mod entities;
pub mod export;

pub use self::core::{Session, Transition};
pub use entities::{Frame, MediaService, Roi, VideoId};
