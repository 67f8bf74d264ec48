//! Playlist-domain state: the item tree, the flattened playback order, and
//! the next-item decision logic.

pub mod order;
pub mod selector;
pub mod tree;

pub use order::PlayQueue;
pub use selector::PlaybackRequest;
pub use tree::{MediaItem, NodeId, PlaylistTree};
