//! Event-bus protocol shared by the scheduler and its collaborators.
//!
//! This module defines the message payloads the scheduler publishes for
//! observers: playback lifecycle notifications, fire-and-forget fetch
//! requests, and engine-level control events.

/// Scheduler run state as observed between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum PlaybackStatus {
    Stopped,
    Running,
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playback(PlaybackMessage),
    Fetch(FetchMessage),
    Engine(EngineMessage),
}

/// Playback start notification payload.
#[derive(Debug, Clone)]
pub struct ItemStarted {
    /// Stable item id.
    pub id: String,
    /// Item location as imported.
    pub uri: String,
    /// User-visible title.
    pub title: String,
    /// Number of times this item has been started, including this start.
    pub play_count: u32,
}

/// Playback-domain notifications published by the scheduler.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    ItemStarted(ItemStarted),
    /// Nothing left to play; the scheduler transitioned to `Stopped`.
    Stopped,
}

/// Art lookup request for one item, consumed by an external fetcher.
#[derive(Debug, Clone)]
pub struct ArtFetchRequest {
    /// Stable item id.
    pub id: String,
    /// Item location as imported.
    pub uri: String,
    /// User-visible title.
    pub title: String,
}

/// Fire-and-forget requests addressed to external fetch subsystems.
#[derive(Debug, Clone)]
pub enum FetchMessage {
    ArtRequested(ArtFetchRequest),
}

/// Engine-level control notifications.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// The playlist ended while play-and-exit was set; the embedding
    /// process should shut down.
    ExitRequested,
}
