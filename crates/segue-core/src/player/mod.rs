//! Player: drives one input at a time for an owner.
//!
//! ```text
//! caller ──lock()──▶ PlayerGuard ──control──▶ Input (own thread)
//!                        ▲                        │
//!                        └──── handle_event ◀─────┘  EventSink, takes the lock
//!
//! dead inputs ──▶ reaper thread ──▶ Input::close()  (never under the lock)
//! ```
//!
//! Everything visible lives in one mutex-protected host: the player core
//! and its owner. The owner (a playlist, or [`NoOwner`]) is asked what to
//! play next and told when the current media changes, while the same lock is
//! held, so the two can never disagree.

mod control;
mod session;

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::config::{MediaEndedAction, PlayerConfig};
use crate::error::{Error, Result};
use crate::input::{
    Capabilities, EsId, EventSink, InputEvent, InputFactory, InputStats, Program, Signal, Title, Track,
    VoutAction,
};
use crate::models::{Media, MediaNode};

pub use control::PlayerCore;
pub(crate) use session::InputId;

// ---------------------------------------------------------------------------
// State and events
// ---------------------------------------------------------------------------

/// Externally visible playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Stopped,
    Started,
    Playing,
    Paused,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListAction {
    Added,
    Removed,
    Updated,
}

/// What player listeners receive.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    CurrentMediaChanged(Option<Media>),
    StateChanged(PlayerState),
    CapabilitiesChanged(Capabilities),
    /// Only sent outside discontinuities.
    PositionChanged { time_ms: u64, position: f32, rate: f32 },
    LengthChanged(u64),
    RateChanged(f32),
    TrackListChanged { action: ListAction, track: Track },
    TrackSelectionChanged { unselected: Option<EsId>, selected: Option<EsId> },
    ProgramListChanged { action: ListAction, program: Program },
    ProgramSelectionChanged { unselected: Option<i32>, selected: Option<i32> },
    TitleListChanged(Vec<Title>),
    TitleSelectionChanged { index: usize, title: Title },
    ChapterSelectionChanged { title: usize, chapter: usize },
    RecordingChanged(bool),
    StatisticsChanged(InputStats),
    SignalChanged(Signal),
    AudioDelayChanged(i64),
    SubtitleDelayChanged(i64),
    BufferingChanged(f32),
    VoutChanged { action: VoutAction, count: usize },
    SubItemsChanged { media: Media, node: MediaNode },
    DiscontinuityChanged(bool),
}

pub type PlayerListener = dyn FnMut(&PlayerEvent) + Send;

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// The party that decides what plays. Hooks run with the player lock held
/// and get the player core to read or drive.
pub trait PlayerOwner: Send + 'static {
    /// The current media changed, by request or by chaining.
    fn on_current_media_changed(&mut self, _player: &mut PlayerCore, _media: Option<&Media>) {}

    /// What should play after the current media. Must not move any cursor:
    /// the answer may be thrown away and asked again.
    fn get_next_media(&mut self, _player: &PlayerCore) -> Option<Media> {
        None
    }

    /// The current input resolved into a tree of sub-items.
    fn on_media_subitems(&mut self, _player: &mut PlayerCore, _media: &Media, _node: &MediaNode) {}
}

/// Owner for a standalone player: never chains.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOwner;

impl PlayerOwner for NoOwner {}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

pub(crate) struct Host<O> {
    pub(crate) core: PlayerCore,
    pub(crate) owner: O,
}

struct Shared<O> {
    host: Mutex<Host<O>>,
}

pub struct Player<O: PlayerOwner = NoOwner> {
    shared: Arc<Shared<O>>,
    reaper: Option<JoinHandle<()>>,
}

impl<O: PlayerOwner> Player<O> {
    pub fn new(config: &PlayerConfig, factory: Arc<dyn InputFactory>, owner: O) -> Result<Self> {
        let (reaper_tx, reaper_rx) = crossbeam_channel::unbounded::<Box<dyn crate::input::Input>>();
        let reaper = thread::Builder::new()
            .name("segue-reaper".into())
            .spawn(move || {
                for input in reaper_rx.iter() {
                    input.close();
                }
                log::debug!("segue: reaper exiting");
            })
            .map_err(|e| Error::Spawn(e.to_string()))?;

        let config = config.clone();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<O>>| {
            let weak = weak.clone();
            let sinks = Arc::new(move |id: InputId| {
                let weak = weak.clone();
                EventSink::new(move |event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.host.lock().handle_event(id, event);
                    }
                })
            });
            Shared {
                host: Mutex::new(Host {
                    core: PlayerCore::new(config, factory, sinks, reaper_tx),
                    owner,
                }),
            }
        });

        Ok(Self { shared, reaper: Some(reaper) })
    }

    /// Take the player lock. Every operation goes through the guard.
    pub fn lock(&self) -> PlayerGuard<'_, O> {
        PlayerGuard { host: self.shared.host.lock() }
    }

    /// A handle for callbacks that must not keep the player alive.
    pub fn downgrade(&self) -> WeakPlayer<O> {
        WeakPlayer(Arc::downgrade(&self.shared))
    }
}

pub struct WeakPlayer<O: PlayerOwner>(Weak<Shared<O>>);

impl<O: PlayerOwner> WeakPlayer<O> {
    /// Run `f` under the player lock, unless the player is gone.
    pub fn with<R>(&self, f: impl FnOnce(PlayerGuard<'_, O>) -> R) -> Option<R> {
        let shared = self.0.upgrade()?;
        let guard = PlayerGuard { host: shared.host.lock() };
        Some(f(guard))
    }
}

impl<O: PlayerOwner> Clone for WeakPlayer<O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Player<NoOwner> {
    pub fn standalone(config: &PlayerConfig, factory: Arc<dyn InputFactory>) -> Result<Self> {
        Self::new(config, factory, NoOwner)
    }
}

impl<O: PlayerOwner> Drop for Player<O> {
    fn drop(&mut self) {
        let (inputs, reaper_tx) = self.shared.host.lock().core.detach_all();
        for mut input in inputs {
            input.stop();
            input.close();
        }
        drop(reaper_tx);
        if let Some(reaper) = self.reaper.take() {
            if reaper.join().is_err() {
                log::error!("segue: reaper thread panicked");
            }
        }
    }
}

/// Locked access to the player.
///
/// Derefs to [`PlayerCore`] for accessors and controls. Operations that
/// involve the owner or release the lock live here.
pub struct PlayerGuard<'a, O: PlayerOwner> {
    host: MutexGuard<'a, Host<O>>,
}

impl<O: PlayerOwner> PlayerGuard<'_, O> {
    /// Replace the current media. The previous input, if any, is torn down
    /// in the background.
    pub fn set_current_media(&mut self, media: Option<Media>) -> Result<()> {
        let host = &mut *self.host;
        let result = host.core.set_current_media(media);
        let current = host.core.media().cloned();
        host.owner.on_current_media_changed(&mut host.core, current.as_ref());
        result
    }

    /// Stop the current input. With `wait`, block until it is closed; the
    /// lock is released meanwhile.
    pub fn stop(&mut self, wait: bool) -> Result<()> {
        let input = self.host.core.begin_stop()?;
        if !wait {
            self.host.core.closing.push(input);
            return Ok(());
        }
        let handle = input.handle;
        MutexGuard::unlocked(&mut self.host, move || handle.close());
        self.host.core.settle_stopped();
        Ok(())
    }

    /// Drop the cached next media and ask the owner again.
    pub fn invalidate_next_media(&mut self) {
        self.host.refresh_next_media();
    }

    pub fn owner(&self) -> &O {
        &self.host.owner
    }

    pub(crate) fn host_mut(&mut self) -> &mut Host<O> {
        &mut self.host
    }
}

impl<O: PlayerOwner> Deref for PlayerGuard<'_, O> {
    type Target = PlayerCore;

    fn deref(&self) -> &PlayerCore {
        &self.host.core
    }
}

impl<O: PlayerOwner> DerefMut for PlayerGuard<'_, O> {
    fn deref_mut(&mut self) -> &mut PlayerCore {
        &mut self.host.core
    }
}

// ---------------------------------------------------------------------------
// Event dispatch
// ---------------------------------------------------------------------------

impl<O: PlayerOwner> Host<O> {
    pub(crate) fn refresh_next_media(&mut self) {
        self.core.next_media = self.owner.get_next_media(&self.core);
    }

    fn handle_event(&mut self, id: InputId, event: InputEvent) {
        if !self.core.is_current(id) {
            if let InputEvent::Dead = event {
                self.core.reap_closing(id);
            }
            return;
        }

        match event {
            InputEvent::State(state) => {
                if state == crate::input::InputState::Opening {
                    self.refresh_next_media();
                }
                self.core.on_input_state(state);
            }
            InputEvent::SubItems(node) => {
                let Some(media) = self.core.media().cloned() else {
                    return;
                };
                self.core.notify(&PlayerEvent::SubItemsChanged { media: media.clone(), node: node.clone() });
                self.owner.on_media_subitems(&mut self.core, &media, &node);
            }
            InputEvent::Dead => self.on_current_dead(),
            other => self.core.on_input_event(other),
        }
    }

    fn on_current_dead(&mut self) {
        let failed = self.core.retire_current();

        if self.core.config.media_ended == MediaEndedAction::Continue {
            let next = match self.core.next_media.take() {
                Some(media) => Some(media),
                None => self.owner.get_next_media(&self.core),
            };
            if let Some(media) = next {
                self.chain(media);
                return;
            }
        }

        if !failed {
            self.core.set_global_state(PlayerState::Stopped);
        }
    }

    fn chain(&mut self, media: Media) {
        log::debug!("segue: chaining to {}", media.uri());
        let opened = self.core.set_current_media(Some(media));
        let current = self.core.media().cloned();
        self.owner.on_current_media_changed(&mut self.core, current.as_ref());

        if let Err(e) = opened.and_then(|()| self.core.start()) {
            log::error!("segue: cannot chain to next media: {}", e);
            self.core.set_global_state(PlayerState::Stopped);
        }
    }
}
