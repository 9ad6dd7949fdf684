//! Settings, loaded from JSON with per-field defaults.
//!
//! ```json
//! {
//!   "player":   { "media_ended": "continue", "start_paused": false },
//!   "playlist": { "repeat": "all", "order": "random", "random_seed": 42 },
//!   "worker":   { "max_threads": 2, "default_timeout_ms": 5000 }
//! }
//! ```
//!
//! Any missing section or field takes its default. A missing or invalid
//! file is not fatal: `Config::load` logs and returns the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{PlaybackOrder, PlaybackRepeat};

/// What the player does when the current media ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaEndedAction {
    /// Ask the owner for the next media and play it.
    #[default]
    Continue,
    /// Stay stopped.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub player: PlayerConfig,
    pub playlist: PlaylistConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlayerConfig {
    pub media_ended: MediaEndedAction,
    /// Open every new input paused.
    pub start_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlaylistConfig {
    pub repeat: PlaybackRepeat,
    pub order: PlaybackOrder,
    /// Fixed shuffle seed; random when absent.
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_threads: usize,
    /// Deadline of a task pushed without an explicit timeout; 0 = none.
    pub default_timeout_ms: u64,
    /// How long a thread waits for work before exiting.
    pub idle_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_threads: 1,
            default_timeout_ms: 5000,
            idle_timeout_ms: 5000,
        }
    }
}

impl WorkerConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read a JSON config file, falling back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("segue: cannot read config {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };
        match Self::from_json(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("segue: invalid config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{"playlist": {"repeat": "all"}, "worker": {"max_threads": 4}}"#).unwrap();
        assert_eq!(config.playlist.repeat, PlaybackRepeat::All);
        assert_eq!(config.playlist.order, PlaybackOrder::Normal);
        assert_eq!(config.worker.max_threads, 4);
        assert_eq!(config.worker.idle_timeout_ms, 5000);
        assert_eq!(config.player.media_ended, MediaEndedAction::Continue);
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"player": {{"media_ended": "stop", "start_paused": true}}}}"#).unwrap();
        let config = Config::load(file.path());
        assert_eq!(config.player.media_ended, MediaEndedAction::Stop);
        assert!(config.player.start_paused);
    }

    #[test]
    fn load_falls_back_on_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(Config::load(file.path()), Config::default());

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load(dir.path().join("missing.json")), Config::default());
    }

    #[test]
    fn zero_timeout_means_none() {
        let worker = WorkerConfig { default_timeout_ms: 0, ..WorkerConfig::default() };
        assert_eq!(worker.default_timeout(), None);
        assert_eq!(WorkerConfig::default().default_timeout(), Some(Duration::from_millis(5000)));
    }
}
