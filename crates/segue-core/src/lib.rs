//! segue-core: playback orchestration for one player and its playlist.
//!
//! The player drives a single input at a time and chains to whatever its
//! owner (normally the playlist) says comes next. Media decoding and output
//! live behind the [`input::Input`] trait; this crate only orchestrates.
//!
//! # Architecture
//!
//! ```text
//! Playlist ──owns──▶ Player<PlaylistState> ──creates──▶ Input (own thread)
//!    │                   ▲ one lock for both               │ events
//!    │                   └─────────────────────────────────┘
//!    └──preparse──▶ Preparser ──▶ BackgroundWorker (thread pool)
//! ```
//!
//! Random order is driven by [`randomizer::Randomizer`]; settings come from
//! [`config::Config`].

pub mod config;
pub mod error;
pub mod input;
pub mod listener;
pub mod models;
pub mod player;
pub mod playlist;
pub mod preparser;
pub mod randomizer;
pub mod worker;

pub use config::{Config, MediaEndedAction};
pub use error::{Error, InputError, Result};
pub use listener::ListenerId;
pub use models::*;
pub use player::{NoOwner, Player, PlayerCore, PlayerEvent, PlayerGuard, PlayerOwner, PlayerState};
pub use playlist::{Playlist, PlaylistEvent, PlaylistGuard, PlaylistItem, PlaylistStatus};
pub use preparser::{MediaParser, ParseOutcome, Preparser};
pub use randomizer::Randomizer;
pub use worker::BackgroundWorker;

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::input::sim::SimFactory;
    use crossbeam_channel::unbounded;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn medias(n: usize) -> Vec<Media> {
        (0..n).map(|i| Media::new(format!("sim://track-{}", i))).collect()
    }

    #[test]
    fn config_file_drives_the_playlist() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"playlist": {{"repeat": "all", "order": "random", "random_seed": 11}}}}"#).unwrap();
        let config = Config::load(file.path());

        let factory = SimFactory::new();
        let playlist = Playlist::new(&config, Arc::new(factory)).unwrap();
        let mut p = playlist.lock();
        assert_eq!(p.playback_repeat(), PlaybackRepeat::All);
        assert_eq!(p.playback_order(), PlaybackOrder::Random);

        p.append(medias(4)).unwrap();
        // Two full passes: looping never runs dry.
        let mut seen = Vec::new();
        for _ in 0..8 {
            p.next().unwrap();
            seen.push(p.current_index().unwrap());
        }
        let mut first: Vec<usize> = seen[..4].to_vec();
        first.sort_unstable();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert!(p.has_next());
    }

    #[test]
    fn media_ended_stop_leaves_playlist_in_place() {
        let mut config = Config::default();
        config.player.media_ended = MediaEndedAction::Stop;
        let factory = SimFactory::new().tick(Duration::from_millis(2)).step_ms(100).length_ms(200);
        let playlist = Playlist::new(&config, Arc::new(factory.clone())).unwrap();

        let (tx, rx) = unbounded();
        {
            let mut p = playlist.lock();
            p.append(medias(3)).unwrap();
            p.player().add_listener(move |event| {
                if let PlayerEvent::StateChanged(state) = event {
                    let _ = tx.send(*state);
                }
            });
            p.start().unwrap();
        }
        while rx.recv_timeout(Duration::from_secs(5)).unwrap() != PlayerState::Stopped {}

        let mut p = playlist.lock();
        assert_eq!(p.current_index(), Some(0));
        assert_eq!(factory.log().started, vec!["sim://track-0"]);

        // The user moves on by hand.
        p.next().unwrap();
        assert_eq!(p.current_index(), Some(1));
        assert_eq!(p.player().media().map(|m| m.uri()), Some("sim://track-1"));
    }
}
