//! Playback engine: frame cache, clock, prefetch workers, session
//!
//! Independent of any UI; driven through [`session::Session`].

pub mod clock;
pub mod commands;
pub mod frame_cache;
pub mod player;
pub mod session;
pub mod workers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use frame_cache::{CacheStats, FrameCache};
pub use player::{PlayState, Player, Transition};
pub use session::{CommandError, LoadError, Session};
pub use workers::Workers;
