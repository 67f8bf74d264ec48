//! Playback scheduling core for media playback engines.
//!
//! The crate models a playlist as a tree of containers and leaf items,
//! flattens it into a linear playback order, and runs a dedicated scheduler
//! thread that decides what plays next and walks one playback worker at a
//! time through its lifecycle. Events flow out over a broadcast bus.

pub mod config;
pub mod engine;
pub mod playlist;
pub mod protocol;

pub use config::{Config, PlaybackFlags, sanitize_config};
pub use engine::{ActivateError, Scheduler};
pub use playlist::{MediaItem, NodeId, PlaylistTree};
pub use protocol::{Message, PlaybackStatus};
