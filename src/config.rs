//! Persistent scheduler configuration model and defaults.

/// Root configuration persisted to `cueflow.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Playback policy flags applied at every scheduling decision.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Scheduler loop tuning.
    pub scheduler: SchedulerConfig,
}

/// Playback policy flags persisted between sessions.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    /// Restart from the beginning after the last item.
    #[serde(rename = "loop", default)]
    pub loop_all: bool,
    /// Keep returning the current item instead of advancing.
    #[serde(default)]
    pub repeat: bool,
    /// Shuffle the playback order on every rebuild.
    #[serde(default)]
    pub random: bool,
    /// Stop after the current item finishes.
    #[serde(default)]
    pub play_and_stop: bool,
    /// Ask the embedding process to exit when the playlist ends.
    #[serde(default)]
    pub play_and_exit: bool,
    /// When to request album art for items without usable art.
    #[serde(default)]
    pub art_fetch: ArtFetchPolicy,
    /// Keep the stream output alive across item transitions.
    #[serde(default)]
    pub keep_stream_output: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_all: false,
            repeat: false,
            random: false,
            play_and_stop: false,
            play_and_exit: false,
            art_fetch: ArtFetchPolicy::default(),
            keep_stream_output: false,
        }
    }
}

/// Album-art fetch policy.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtFetchPolicy {
    /// Never request art automatically.
    #[default]
    Manual,
    /// Request art when an item without usable art starts playing.
    WhenPlayed,
}

/// Scheduler loop tuning knobs.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SchedulerConfig {
    /// Minimum interval between consecutive playback-order rebuilds.
    #[serde(default = "default_rebuild_debounce_ms")]
    pub rebuild_debounce_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rebuild_debounce_ms: default_rebuild_debounce_ms(),
        }
    }
}

fn default_rebuild_debounce_ms() -> u64 {
    30
}

/// Typed snapshot of the playback policy flags.
///
/// The scheduler stores one of these in its shared state and reads it fresh
/// under the lock at every decision point; setters replace the whole
/// snapshot so a decision never observes a half-applied flag change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackFlags {
    pub loop_all: bool,
    pub repeat: bool,
    pub random: bool,
    pub play_and_stop: bool,
    pub play_and_exit: bool,
    pub art_fetch: ArtFetchPolicy,
    pub keep_stream_output: bool,
}

impl From<&PlaybackConfig> for PlaybackFlags {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            loop_all: config.loop_all,
            repeat: config.repeat,
            random: config.random,
            play_and_stop: config.play_and_stop,
            play_and_exit: config.play_and_exit,
            art_fetch: config.art_fetch,
            keep_stream_output: config.keep_stream_output,
        }
    }
}

/// Clamps persisted values into ranges the scheduler can operate with.
pub fn sanitize_config(config: Config) -> Config {
    let clamped_debounce = config.scheduler.rebuild_debounce_ms.clamp(1, 5_000);
    Config {
        playback: config.playback,
        scheduler: SchedulerConfig {
            rebuild_debounce_ms: clamped_debounce,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("failed to serialize config");
        let restored: Config = toml::from_str(&text).expect("failed to parse config");
        assert_eq!(config, restored);
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let restored: Config = toml::from_str("").expect("failed to parse empty config");
        assert_eq!(restored, Config::default());
        assert_eq!(restored.scheduler.rebuild_debounce_ms, 30);
        assert_eq!(restored.playback.art_fetch, ArtFetchPolicy::Manual);
    }

    #[test]
    fn test_loop_flag_uses_renamed_key() {
        let restored: Config =
            toml::from_str("[playback]\nloop = true\n").expect("failed to parse config");
        assert!(restored.playback.loop_all);
    }

    #[test]
    fn test_sanitize_clamps_rebuild_debounce() {
        let mut config = Config::default();
        config.scheduler.rebuild_debounce_ms = 0;
        assert_eq!(sanitize_config(config).scheduler.rebuild_debounce_ms, 1);

        let mut config = Config::default();
        config.scheduler.rebuild_debounce_ms = 3_600_000;
        assert_eq!(sanitize_config(config).scheduler.rebuild_debounce_ms, 5_000);
    }

    #[test]
    fn test_flags_snapshot_mirrors_playback_config() {
        let mut playback = PlaybackConfig::default();
        playback.loop_all = true;
        playback.art_fetch = ArtFetchPolicy::WhenPlayed;
        let flags = PlaybackFlags::from(&playback);
        assert!(flags.loop_all);
        assert!(!flags.repeat);
        assert_eq!(flags.art_fetch, ArtFetchPolicy::WhenPlayed);
    }
}
