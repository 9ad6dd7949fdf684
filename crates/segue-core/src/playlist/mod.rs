//! Playlist: an ordered list of media driving a player.
//!
//! The playlist state is the player's owner and lives in the player's
//! locked cell, so one lock guards both. Every operation takes the player
//! core alongside the playlist state: the same code runs from
//! [`PlaylistGuard`] and from player hooks (chaining, sub-items).
//!
//! Listeners get each event together with the post-mutation status. A
//! mutation fires its structural event first, then `CurrentIndexChanged`,
//! `HasPrevChanged` and `HasNextChanged`, each only if the value changed.

mod content;
mod navigate;
mod sort;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{Config, PlaylistConfig};
use crate::error::Result;
use crate::input::InputFactory;
use crate::listener::{ListenerId, Listeners};
use crate::models::{Media, MediaNode, PlaybackOrder, PlaybackRepeat};
use crate::player::{Player, PlayerCore, PlayerGuard, PlayerOwner, WeakPlayer};
use crate::preparser::{MediaParser, ParseOutcome, Preparser, PreparseQueue};
use crate::randomizer::Randomizer;

pub use sort::{SortCriterion, SortKey, SortOrder};

// ---------------------------------------------------------------------------
// Items and events
// ---------------------------------------------------------------------------

/// A playlist entry. Two items are equal only if they are the same entry,
/// even when they hold the same media.
#[derive(Clone)]
pub struct PlaylistItem(Arc<Media>);

impl PlaylistItem {
    pub fn new(media: Media) -> Self {
        Self(Arc::new(media))
    }

    pub fn media(&self) -> &Media {
        &self.0
    }
}

impl PartialEq for PlaylistItem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PlaylistItem {}

impl fmt::Debug for PlaylistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlaylistItem").field(&self.0.uri()).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistEvent {
    ItemsReset(Vec<PlaylistItem>),
    ItemsAdded { index: usize, items: Vec<PlaylistItem> },
    ItemsMoved { index: usize, count: usize, target: usize },
    ItemsRemoved { index: usize, count: usize },
    ItemsUpdated { index: usize, items: Vec<PlaylistItem> },
    PlaybackRepeatChanged(PlaybackRepeat),
    PlaybackOrderChanged(PlaybackOrder),
    CurrentIndexChanged(Option<usize>),
    HasPrevChanged(bool),
    HasNextChanged(bool),
}

/// Playlist state as seen by a listener when an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistStatus {
    pub count: usize,
    pub current: Option<usize>,
    pub has_prev: bool,
    pub has_next: bool,
}

pub type PlaylistListener = dyn FnMut(&PlaylistEvent, &PlaylistStatus) + Send;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Values compared before and after a mutation.
#[derive(Clone, Copy)]
struct Snapshot {
    current: Option<usize>,
    has_prev: bool,
    has_next: bool,
}

pub struct PlaylistState {
    items: Vec<PlaylistItem>,
    randomizer: Randomizer<PlaylistItem>,
    current: Option<usize>,
    has_prev: bool,
    has_next: bool,
    repeat: PlaybackRepeat,
    order: PlaybackOrder,
    rng: StdRng,
    listeners: Listeners<PlaylistListener>,
}

impl PlaylistState {
    pub(crate) fn new(config: &PlaylistConfig) -> Self {
        let (randomizer, rng) = match config.random_seed {
            Some(seed) => (Randomizer::with_seed(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
            None => (Randomizer::new(), StdRng::from_os_rng()),
        };
        let mut state = Self {
            items: Vec::new(),
            randomizer,
            current: None,
            has_prev: false,
            has_next: false,
            repeat: config.repeat,
            order: config.order,
            rng,
            listeners: Listeners::new(),
        };
        state.randomizer.set_loop(state.repeat == PlaybackRepeat::All);
        state
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_item(&self) -> Option<&PlaylistItem> {
        self.items.get(self.current?)
    }

    pub fn has_prev(&self) -> bool {
        self.has_prev
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn index_of(&self, item: &PlaylistItem) -> Option<usize> {
        self.items.iter().position(|candidate| candidate == item)
    }

    pub fn index_of_media(&self, media: &Media) -> Option<usize> {
        self.items.iter().position(|item| item.media() == media)
    }

    pub fn status(&self) -> PlaylistStatus {
        PlaylistStatus {
            count: self.items.len(),
            current: self.current,
            has_prev: self.has_prev,
            has_next: self.has_next,
        }
    }

    // ========================================================================
    // Notification
    // ========================================================================

    fn snapshot(&self) -> Snapshot {
        Snapshot { current: self.current, has_prev: self.has_prev, has_next: self.has_next }
    }

    fn notify(&mut self, event: PlaylistEvent) {
        let status = self.status();
        for listener in self.listeners.iter_mut() {
            listener(&event, &status);
        }
    }

    fn notify_changes(&mut self, before: Snapshot) {
        if before.current != self.current {
            self.notify(PlaylistEvent::CurrentIndexChanged(self.current));
        }
        if before.has_prev != self.has_prev {
            self.notify(PlaylistEvent::HasPrevChanged(self.has_prev));
        }
        if before.has_next != self.has_next {
            self.notify(PlaylistEvent::HasNextChanged(self.has_next));
        }
    }

    pub fn add_listener(
        &mut self,
        listener: impl FnMut(&PlaylistEvent, &PlaylistStatus) + Send + 'static,
        notify_current_state: bool,
    ) -> ListenerId {
        let id = self.listeners.add(Box::new(listener));
        if notify_current_state {
            let status = self.status();
            let events = [
                PlaylistEvent::ItemsReset(self.items.clone()),
                PlaylistEvent::PlaybackRepeatChanged(self.repeat),
                PlaylistEvent::PlaybackOrderChanged(self.order),
                PlaylistEvent::CurrentIndexChanged(self.current),
                PlaylistEvent::HasPrevChanged(self.has_prev),
                PlaylistEvent::HasNextChanged(self.has_next),
            ];
            if let Some(listener) = self.listeners.get_mut(id) {
                for event in &events {
                    listener(event, &status);
                }
            }
        }
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Recompute the cached lookahead of the player.
    fn invalidate_next_media(&mut self, player: &mut PlayerCore) {
        player.next_media = self.next_media();
    }

    /// A preparse job finished for `media`. Only a successful parse changes
    /// the item.
    fn on_preparsed(&mut self, player: &mut PlayerCore, media: &Media, outcome: ParseOutcome) {
        let ParseOutcome::Done(result) = outcome else {
            log::debug!("segue: nothing parsed for {}", media.uri());
            return;
        };
        let Some(index) = self.index_of_media(media) else {
            return;
        };
        let item = self.items[index].clone();
        self.notify(PlaylistEvent::ItemsUpdated { index, items: vec![item] });

        if let Some(node) = result.subitems.filter(|node| !node.children.is_empty()) {
            if let Err(e) = self.expand(player, index, &node) {
                log::warn!("segue: cannot expand {}: {}", media.uri(), e);
            }
        }
    }
}

impl PlayerOwner for PlaylistState {
    fn on_current_media_changed(&mut self, _player: &mut PlayerCore, media: Option<&Media>) {
        let current = self.current_item().map(PlaylistItem::media);
        if current == media {
            return;
        }

        let index = media.and_then(|media| self.index_of_media(media));
        if let (Some(index), PlaybackOrder::Random) = (index, self.order) {
            let item = self.items[index].clone();
            if self.randomizer.peek_next() == Some(&item) {
                self.randomizer.next();
            } else {
                self.randomizer.select(&item);
            }
        }
        self.set_current_index(index);
    }

    fn get_next_media(&mut self, _player: &PlayerCore) -> Option<Media> {
        self.next_media()
    }

    fn on_media_subitems(&mut self, player: &mut PlayerCore, media: &Media, node: &MediaNode) {
        if let Some(index) = self.index_of_media(media) {
            if let Err(e) = self.expand(player, index, node) {
                log::warn!("segue: cannot expand {}: {}", media.uri(), e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Playlist
// ---------------------------------------------------------------------------

static NEXT_PREPARSE_ID: AtomicU64 = AtomicU64::new(1);

pub struct Playlist {
    // Dropped first: pending preparse callbacks still reach the player.
    preparser: Option<Box<dyn PreparseQueue>>,
    player: Player<PlaylistState>,
}

impl Playlist {
    pub fn new(config: &Config, factory: Arc<dyn InputFactory>) -> Result<Self> {
        let state = PlaylistState::new(&config.playlist);
        let player = Player::new(&config.player, factory, state)?;
        Ok(Self { preparser: None, player })
    }

    /// Enable [`Playlist::preparse`].
    pub fn with_preparser<P: MediaParser>(mut self, preparser: Preparser<P>) -> Self {
        self.preparser = Some(Box::new(preparser));
        self
    }

    pub fn lock(&self) -> PlaylistGuard<'_> {
        PlaylistGuard { player: self.player.lock() }
    }

    /// Parse an item in the background. Its metadata is updated in place
    /// (`ItemsUpdated`) and, if it turns out to be a container, it is
    /// expanded into its sub-items. Without a preparser this is a no-op.
    pub fn preparse(&self, item: &PlaylistItem) -> Result<()> {
        let Some(preparser) = &self.preparser else {
            log::debug!("segue: no preparser, skipping {}", item.media().uri());
            return Ok(());
        };
        let weak: WeakPlayer<PlaylistState> = self.player.downgrade();
        let id = NEXT_PREPARSE_ID.fetch_add(1, Ordering::Relaxed);
        preparser.submit(
            item.media().clone(),
            id,
            Box::new(move |media, outcome| {
                weak.with(|mut guard| {
                    let host = guard.host_mut();
                    host.owner.on_preparsed(&mut host.core, media, outcome);
                });
            }),
        )
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        if let Some(preparser) = self.preparser.take() {
            preparser.cancel(None);
        }
    }
}

/// Locked access to the playlist and its player.
pub struct PlaylistGuard<'a> {
    player: PlayerGuard<'a, PlaylistState>,
}

impl<'a> PlaylistGuard<'a> {
    fn parts(&mut self) -> (&mut PlaylistState, &mut PlayerCore) {
        let host = self.player.host_mut();
        (&mut host.owner, &mut host.core)
    }

    fn state(&self) -> &PlaylistState {
        self.player.owner()
    }

    /// The player, under the same lock.
    pub fn player(&mut self) -> &mut PlayerGuard<'a, PlaylistState> {
        &mut self.player
    }

    pub fn count(&self) -> usize {
        self.state().count()
    }

    pub fn is_empty(&self) -> bool {
        self.state().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistItem> {
        self.state().get(index)
    }

    pub fn items(&self) -> &[PlaylistItem] {
        self.state().items()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state().current_index()
    }

    pub fn has_prev(&self) -> bool {
        self.state().has_prev()
    }

    pub fn has_next(&self) -> bool {
        self.state().has_next()
    }

    pub fn index_of(&self, item: &PlaylistItem) -> Option<usize> {
        self.state().index_of(item)
    }

    pub fn index_of_media(&self, media: &Media) -> Option<usize> {
        self.state().index_of_media(media)
    }

    pub fn status(&self) -> PlaylistStatus {
        self.state().status()
    }

    pub fn playback_repeat(&self) -> PlaybackRepeat {
        self.state().repeat
    }

    pub fn playback_order(&self) -> PlaybackOrder {
        self.state().order
    }

    pub fn add_listener(
        &mut self,
        listener: impl FnMut(&PlaylistEvent, &PlaylistStatus) + Send + 'static,
        notify_current_state: bool,
    ) -> ListenerId {
        self.parts().0.add_listener(listener, notify_current_state)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.parts().0.remove_listener(id)
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub fn insert(&mut self, index: usize, medias: Vec<Media>) -> Result<()> {
        let (state, player) = self.parts();
        state.insert(player, index, medias)
    }

    pub fn append(&mut self, medias: Vec<Media>) -> Result<()> {
        let (state, player) = self.parts();
        let end = state.count();
        state.insert(player, end, medias)
    }

    pub fn remove(&mut self, index: usize, count: usize) -> Result<()> {
        let (state, player) = self.parts();
        state.remove(player, index, count)
    }

    pub fn move_items(&mut self, index: usize, count: usize, target: usize) -> Result<()> {
        let (state, player) = self.parts();
        state.move_items(player, index, count, target)
    }

    pub fn clear(&mut self) {
        let (state, player) = self.parts();
        state.clear(player)
    }

    /// Replace the item at `index` by the flattened children of `node`.
    pub fn expand(&mut self, index: usize, node: &MediaNode) -> Result<()> {
        let (state, player) = self.parts();
        state.expand(player, index, node)
    }

    pub fn request_insert(&mut self, index: usize, medias: Vec<Media>) -> Result<()> {
        let (state, player) = self.parts();
        state.request_insert(player, index, medias)
    }

    pub fn request_remove(&mut self, items: &[PlaylistItem], index_hint: Option<usize>) {
        let (state, player) = self.parts();
        state.request_remove(player, items, index_hint)
    }

    pub fn request_move(&mut self, items: &[PlaylistItem], target: usize, index_hint: Option<usize>) {
        let (state, player) = self.parts();
        state.request_move(player, items, target, index_hint)
    }

    pub fn shuffle(&mut self) {
        let (state, player) = self.parts();
        state.shuffle(player)
    }

    pub fn sort(&mut self, criteria: &[SortCriterion]) {
        let (state, player) = self.parts();
        state.sort(player, criteria)
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn set_playback_repeat(&mut self, repeat: PlaybackRepeat) {
        let (state, player) = self.parts();
        state.set_playback_repeat(player, repeat)
    }

    pub fn set_playback_order(&mut self, order: PlaybackOrder) {
        let (state, player) = self.parts();
        state.set_playback_order(player, order)
    }

    pub fn prev(&mut self) -> Result<()> {
        let (state, player) = self.parts();
        state.prev(player)
    }

    pub fn next(&mut self) -> Result<()> {
        let (state, player) = self.parts();
        state.next(player)
    }

    pub fn goto(&mut self, index: Option<usize>) -> Result<()> {
        let (state, player) = self.parts();
        state.goto(player, index)
    }

    pub fn request_goto(&mut self, item: Option<&PlaylistItem>, index_hint: Option<usize>) -> Result<()> {
        let (state, player) = self.parts();
        state.request_goto(player, item, index_hint)
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start playing; selects the first item when none is current.
    pub fn start(&mut self) -> Result<()> {
        if self.current_index().is_none() && !self.is_empty() {
            self.goto(Some(0))?;
        }
        self.player.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.player.stop(false)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.player.pause()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.player.resume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::input::sim::SimFactory;
    use crate::models::MediaMeta;
    use crate::player::{PlayerEvent, PlayerState};
    use crate::preparser::{ParseResult, ParseWaker};
    use crossbeam_channel::{unbounded, Receiver};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    type Record = Receiver<(PlaylistEvent, PlaylistStatus)>;

    fn factory() -> SimFactory {
        SimFactory::new().tick(Duration::from_millis(2)).step_ms(100).length_ms(10_000_000)
    }

    fn playlist_with(config: &Config, factory: &SimFactory) -> Playlist {
        Playlist::new(config, Arc::new(factory.clone())).unwrap()
    }

    fn playlist() -> Playlist {
        playlist_with(&Config::default(), &factory())
    }

    fn medias(range: std::ops::Range<usize>) -> Vec<Media> {
        range.map(|i| Media::new(format!("sim://{}", i))).collect()
    }

    fn record(p: &mut PlaylistGuard<'_>) -> Record {
        let (tx, rx) = unbounded();
        p.add_listener(
            move |event, status| {
                let _ = tx.send((event.clone(), *status));
            },
            false,
        );
        rx
    }

    fn drain(rx: &Record) -> Vec<(PlaylistEvent, PlaylistStatus)> {
        rx.try_iter().collect()
    }

    fn uris(p: &PlaylistGuard<'_>) -> Vec<String> {
        p.items().iter().map(|item| item.media().uri().to_string()).collect()
    }

    fn current_uri(p: &PlaylistGuard<'_>) -> Option<String> {
        let index = p.current_index()?;
        p.get(index).map(|item| item.media().uri().to_string())
    }

    fn player_uri(p: &mut PlaylistGuard<'_>) -> Option<String> {
        p.player().media().map(|media| media.uri().to_string())
    }

    #[test]
    fn append_notifies_added_then_changes() {
        let playlist = playlist();
        let mut p = playlist.lock();
        let rx = record(&mut p);
        p.append(medias(0..5)).unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            (PlaylistEvent::ItemsAdded { index: 0, items }, status) => {
                assert_eq!(items.len(), 5);
                assert_eq!(
                    *status,
                    PlaylistStatus { count: 5, current: None, has_prev: false, has_next: true }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events[1].0, PlaylistEvent::HasNextChanged(true));
        assert_eq!(p.count(), 5);
    }

    #[test]
    fn insert_shifts_current() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..5)).unwrap();
        p.goto(Some(2)).unwrap();
        let rx = record(&mut p);

        p.insert(1, medias(10..12)).unwrap();
        assert_eq!(p.current_index(), Some(4));
        assert_eq!(current_uri(&p).as_deref(), Some("sim://2"));
        let events: Vec<PlaylistEvent> = drain(&rx).into_iter().map(|(event, _)| event).collect();
        assert!(matches!(events[0], PlaylistEvent::ItemsAdded { index: 1, .. }));
        assert_eq!(events[1], PlaylistEvent::CurrentIndexChanged(Some(4)));

        // Inserting after the current item leaves it alone.
        p.insert(7, medias(20..21)).unwrap();
        assert_eq!(p.current_index(), Some(4));
        assert_eq!(p.insert(99, medias(30..31)), Err(Error::OutOfRange { index: 99, count: 8 }));
    }

    #[test]
    fn move_keeps_current_on_its_item() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..10)).unwrap();
        p.goto(Some(5)).unwrap();

        // Block moved forward across the current item.
        p.move_items(2, 2, 6).unwrap();
        assert_eq!(
            uris(&p),
            ["0", "1", "4", "5", "6", "7", "2", "3", "8", "9"].map(|i| format!("sim://{}", i))
        );
        assert_eq!(p.current_index(), Some(3));

        // The current item itself is moved.
        p.move_items(3, 1, 0).unwrap();
        assert_eq!(p.current_index(), Some(0));

        // Block moved backward across the current item.
        p.move_items(5, 2, 0).unwrap();
        assert_eq!(p.current_index(), Some(2));
        assert_eq!(current_uri(&p).as_deref(), Some("sim://5"));

        assert!(p.move_items(8, 3, 0).is_err());
    }

    #[test]
    fn remove_current_switches_to_following_item() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..5)).unwrap();
        p.goto(Some(2)).unwrap();
        assert_eq!(player_uri(&mut p).as_deref(), Some("sim://2"));

        p.remove(2, 1).unwrap();
        assert_eq!(p.current_index(), Some(2));
        assert_eq!(current_uri(&p).as_deref(), Some("sim://3"));
        assert_eq!(player_uri(&mut p).as_deref(), Some("sim://3"));

        // Nothing follows the removed block.
        p.remove(2, 2).unwrap();
        assert_eq!(p.current_index(), None);
        assert_eq!(player_uri(&mut p), None);
        assert!(!p.has_prev());

        p.goto(Some(1)).unwrap();
        let rx = record(&mut p);
        p.remove(0, 1).unwrap();
        assert_eq!(p.current_index(), Some(0));
        let events: Vec<PlaylistEvent> = drain(&rx).into_iter().map(|(event, _)| event).collect();
        assert_eq!(
            events,
            vec![
                PlaylistEvent::ItemsRemoved { index: 0, count: 1 },
                PlaylistEvent::CurrentIndexChanged(Some(0)),
                PlaylistEvent::HasPrevChanged(false),
            ]
        );
    }

    #[test]
    fn clear_resets_everything() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..3)).unwrap();
        p.goto(Some(1)).unwrap();
        let rx = record(&mut p);

        p.clear();
        assert!(p.is_empty());
        assert_eq!(player_uri(&mut p), None);
        let events: Vec<PlaylistEvent> = drain(&rx).into_iter().map(|(event, _)| event).collect();
        assert_eq!(
            events,
            vec![
                PlaylistEvent::ItemsReset(Vec::new()),
                PlaylistEvent::CurrentIndexChanged(None),
                PlaylistEvent::HasPrevChanged(false),
                PlaylistEvent::HasNextChanged(false),
            ]
        );
    }

    #[test]
    fn expand_replaces_item_by_flattened_tree() {
        let playlist = playlist();
        let mut p = playlist.lock();
        let all = medias(0..16);
        p.append(all[..10].to_vec()).unwrap();
        p.goto(Some(9)).unwrap();

        let node = |i: usize| MediaNode::new(all[i].clone());
        let mut third = node(12);
        third.children = vec![node(14), node(15)];
        let root = MediaNode::with_children(all[8].clone(), vec![node(10), node(11), third, node(13)]);

        p.expand(8, &root).unwrap();
        assert_eq!(p.count(), 15);
        let expected: Vec<String> = [0, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 14, 15, 13, 9]
            .iter()
            .map(|i| format!("sim://{}", i))
            .collect();
        assert_eq!(uris(&p), expected);
        assert_eq!(p.current_index(), Some(14));
        assert_eq!(current_uri(&p).as_deref(), Some("sim://9"));
    }

    #[test]
    fn expand_with_no_children_removes() {
        let playlist = playlist();
        let mut p = playlist.lock();
        let all = medias(0..3);
        p.append(all.clone()).unwrap();
        p.expand(1, &MediaNode::new(all[1].clone())).unwrap();
        assert_eq!(uris(&p), vec!["sim://0", "sim://2"]);
    }

    #[test]
    fn prev_and_next_in_normal_order() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..3)).unwrap();
        assert!(!p.has_prev());
        assert!(p.has_next());
        assert_eq!(p.prev(), Err(Error::NoPrev));

        p.next().unwrap();
        assert_eq!(p.current_index(), Some(0));
        p.next().unwrap();
        p.next().unwrap();
        assert_eq!(p.current_index(), Some(2));
        assert!(!p.has_next());
        assert_eq!(p.next(), Err(Error::NoNext));

        p.prev().unwrap();
        assert_eq!(p.current_index(), Some(1));
        assert_eq!(player_uri(&mut p).as_deref(), Some("sim://1"));
    }

    #[test]
    fn repeat_all_wraps_both_ways() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..5)).unwrap();
        p.set_playback_repeat(PlaybackRepeat::All);
        p.goto(Some(4)).unwrap();

        p.next().unwrap();
        assert_eq!(p.current_index(), Some(0));
        assert!(p.has_prev());
        assert!(p.has_next());

        p.prev().unwrap();
        assert_eq!(p.current_index(), Some(4));
        p.goto(Some(3)).unwrap();
        p.prev().unwrap();
        assert_eq!(p.current_index(), Some(2));
    }

    #[test]
    fn goto_none_on_empty_playlist() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.goto(None).unwrap();
        assert_eq!(p.current_index(), None);
        assert!(!p.has_prev());
        assert!(!p.has_next());
        assert_eq!(p.goto(Some(0)), Err(Error::OutOfRange { index: 0, count: 0 }));
    }

    #[test]
    fn random_order_visits_every_item_once() {
        let mut config = Config::default();
        config.playlist.order = PlaybackOrder::Random;
        config.playlist.random_seed = Some(7);
        let playlist = playlist_with(&config, &factory());
        let mut p = playlist.lock();
        p.append(medias(0..6)).unwrap();

        let mut visited = Vec::new();
        while p.has_next() {
            p.next().unwrap();
            visited.push(p.current_index().unwrap());
        }
        let mut sorted = visited.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<_>>());
        assert_eq!(p.next(), Err(Error::NoNext));

        p.prev().unwrap();
        assert_eq!(p.current_index(), Some(visited[4]));
        p.next().unwrap();
        assert_eq!(p.current_index(), Some(visited[5]));
    }

    #[test]
    fn lookahead_follows_repeat_mode() {
        let playlist = playlist();
        let mut p = playlist.lock();
        let all = medias(0..3);
        p.append(all.clone()).unwrap();
        p.goto(Some(1)).unwrap();

        p.set_playback_repeat(PlaybackRepeat::Current);
        assert_eq!(p.player().next_media(), Some(&all[1]));
        p.set_playback_repeat(PlaybackRepeat::None);
        assert_eq!(p.player().next_media(), Some(&all[2]));
        p.goto(Some(2)).unwrap();
        p.set_playback_repeat(PlaybackRepeat::All);
        assert_eq!(p.player().next_media(), Some(&all[0]));
    }

    #[test]
    fn requests_tolerate_stale_views() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..4)).unwrap();
        let items = p.items().to_vec();

        p.request_move(&[items[2].clone(), items[0].clone()], 0, Some(2));
        assert_eq!(uris(&p), vec!["sim://2", "sim://0", "sim://1", "sim://3"]);

        // Hint is wrong, item 3 is found anyway; the gone item is skipped.
        p.request_remove(&[items[3].clone()], Some(0));
        assert_eq!(p.count(), 3);
        p.request_remove(&[items[3].clone(), items[1].clone()], None);
        assert_eq!(uris(&p), vec!["sim://2", "sim://0"]);

        assert_eq!(p.request_goto(Some(&items[3]), Some(1)), Err(Error::ItemNotFound));
        p.request_goto(Some(&items[0]), Some(0)).unwrap();
        assert_eq!(p.current_index(), Some(1));

        p.request_insert(42, medias(9..10)).unwrap();
        assert_eq!(p.get(2).map(|item| item.media().uri()), Some("sim://9"));
    }

    #[test]
    fn listener_can_receive_current_state() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..2)).unwrap();
        p.goto(Some(0)).unwrap();

        let (tx, rx) = unbounded();
        let id = p.add_listener(
            move |event, _| {
                let _ = tx.send(event.clone());
            },
            true,
        );
        let events: Vec<PlaylistEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 6);
        assert!(matches!(&events[0], PlaylistEvent::ItemsReset(items) if items.len() == 2));
        assert_eq!(events[3], PlaylistEvent::CurrentIndexChanged(Some(0)));
        assert_eq!(events[5], PlaylistEvent::HasNextChanged(true));

        assert!(p.remove_listener(id));
        p.clear();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn shuffle_and_sort_keep_the_current_item() {
        let mut config = Config::default();
        config.playlist.random_seed = Some(3);
        let playlist = playlist_with(&config, &factory());
        let mut p = playlist.lock();
        let titles = ["delta", "Alpha", "charlie", "bravo"];
        let all: Vec<Media> = titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let meta = MediaMeta { title: Some(title.to_string()), ..MediaMeta::default() };
                Media::with_meta(format!("sim://{}", i), meta)
            })
            .chain(std::iter::once(Media::new("sim://untitled")))
            .collect();
        p.append(all.clone()).unwrap();
        p.goto(Some(2)).unwrap();
        let rx = record(&mut p);

        p.shuffle();
        assert_eq!(p.count(), 5);
        assert_eq!(current_uri(&p).as_deref(), Some("sim://2"));
        assert!(matches!(drain(&rx)[0].0, PlaylistEvent::ItemsReset(_)));

        p.sort(&[SortCriterion::new(SortKey::Title, SortOrder::Ascending)]);
        assert_eq!(uris(&p), vec!["sim://1", "sim://3", "sim://2", "sim://0", "sim://untitled"]);
        assert_eq!(p.current_index(), Some(2));
        assert_eq!(player_uri(&mut p).as_deref(), Some("sim://2"));
    }

    #[test]
    fn plays_through_the_playlist() {
        let factory = SimFactory::new().tick(Duration::from_millis(2)).step_ms(100).length_ms(300);
        let playlist = playlist_with(&Config::default(), &factory);
        let (tx, rx) = unbounded();
        {
            let mut p = playlist.lock();
            p.append(medias(0..3)).unwrap();
            p.player().add_listener(move |event| {
                if let PlayerEvent::StateChanged(state) = event {
                    let _ = tx.send(*state);
                }
            });
            p.start().unwrap();
        }
        loop {
            let state = rx.recv_timeout(Duration::from_secs(5)).expect("timed out");
            if state == PlayerState::Stopped {
                break;
            }
        }
        assert_eq!(factory.log().started, vec!["sim://0", "sim://1", "sim://2"]);
        let p = playlist.lock();
        assert_eq!(p.current_index(), Some(2));
        assert!(!p.has_next());
    }

    #[test]
    fn random_repeat_all_lookahead_keeps_history() {
        let mut config = Config::default();
        config.playlist.order = PlaybackOrder::Random;
        config.playlist.repeat = PlaybackRepeat::All;
        config.playlist.random_seed = Some(5);
        let playlist = playlist_with(&config, &factory());
        let mut p = playlist.lock();
        p.append(medias(0..3)).unwrap();
        let mut pass = Vec::new();
        for _ in 0..3 {
            p.next().unwrap();
            pass.push(p.current_index().unwrap());
        }

        // Any mutation refreshes the lookahead, which now peeks into the
        // next pass.
        let current = p.get(pass[2]).cloned().unwrap();
        p.move_items(0, 1, 1).unwrap();
        assert!(p.player().next_media().is_some());
        assert!(p.has_prev());
        p.prev().unwrap();
        assert_ne!(p.get(p.current_index().unwrap()), Some(&current));

        p.next().unwrap();
        assert_eq!(p.get(p.current_index().unwrap()), Some(&current));
        p.player().invalidate_next_media();
        let upcoming = p.player().next_media().cloned();
        assert!(upcoming.is_some());
        p.next().unwrap();
        assert_eq!(p.player().media().cloned(), upcoming);
        assert!(!p.has_prev());
    }

    fn seeded(order: PlaybackOrder, repeat: PlaybackRepeat, seed: u64) -> Playlist {
        let mut config = Config::default();
        config.playlist.order = order;
        config.playlist.repeat = repeat;
        config.playlist.random_seed = Some(seed);
        playlist_with(&config, &factory())
    }

    const MODES: [(PlaybackOrder, PlaybackRepeat); 6] = [
        (PlaybackOrder::Normal, PlaybackRepeat::None),
        (PlaybackOrder::Normal, PlaybackRepeat::Current),
        (PlaybackOrder::Normal, PlaybackRepeat::All),
        (PlaybackOrder::Random, PlaybackRepeat::None),
        (PlaybackOrder::Random, PlaybackRepeat::Current),
        (PlaybackOrder::Random, PlaybackRepeat::All),
    ];

    #[test]
    fn insert_then_remove_restores_state() {
        for (order, repeat) in MODES {
            let playlist = seeded(order, repeat, 1);
            let mut p = playlist.lock();
            p.append(medias(0..8)).unwrap();
            p.next().unwrap();
            p.next().unwrap();
            let current = p.current_index().unwrap();
            let items = p.items().to_vec();
            let status = p.status();

            let spots = [0, current, current + 1, 8];
            for index in spots {
                p.insert(index, medias(100..103)).unwrap();
                p.remove(index, 3).unwrap();
                assert_eq!(p.items(), &items[..], "{:?}/{:?} at {}", order, repeat, index);
                assert_eq!(p.status(), status, "{:?}/{:?} at {}", order, repeat, index);
            }
        }
    }

    fn assert_consistent(p: &PlaylistGuard<'_>, context: &str) {
        let state = p.state();
        if let Some(current) = state.current_index() {
            assert!(current < state.count(), "{}: current {} of {}", context, current, state.count());
        }
        assert_eq!(state.has_prev(), state.compute_has_prev(), "{}: has_prev", context);
        assert_eq!(state.has_next(), state.compute_has_next(), "{}: has_next", context);
    }

    #[test]
    fn mixed_operations_keep_derived_state_consistent() {
        use rand::Rng;

        for (order, repeat) in MODES {
            for seed in 0..4 {
                let playlist = seeded(order, repeat, seed);
                let mut p = playlist.lock();
                let mut rng = StdRng::seed_from_u64(seed);
                let mut fresh = 0;
                p.append(medias(0..5)).unwrap();

                for step in 0..300 {
                    let n = p.count();
                    let context = format!("{:?}/{:?} seed {} step {}", order, repeat, seed, step);
                    match rng.random_range(0..6) {
                        0 => {
                            let count = rng.random_range(1..4);
                            let index = rng.random_range(0..=n);
                            p.insert(index, medias(1000 + fresh..1000 + fresh + count)).unwrap();
                            fresh += count;
                        }
                        1 if n > 0 => {
                            let index = rng.random_range(0..n);
                            let count = rng.random_range(1..=(n - index).min(3));
                            p.remove(index, count).unwrap();
                        }
                        2 if n > 0 => {
                            let count = rng.random_range(1..=n.min(3));
                            let index = rng.random_range(0..=n - count);
                            let target = rng.random_range(0..=n - count);
                            p.move_items(index, count, target).unwrap();
                        }
                        3 => {
                            let expected = p.has_next();
                            assert_eq!(p.next().is_ok(), expected, "{}: next", context);
                        }
                        4 => {
                            let expected = p.has_prev();
                            assert_eq!(p.prev().is_ok(), expected, "{}: prev", context);
                        }
                        5 if n > 0 => p.goto(Some(rng.random_range(0..n))).unwrap(),
                        _ => {}
                    }
                    assert_consistent(&p, &context);
                }
            }
        }
    }

    #[test]
    fn out_of_range_blocks_are_errors() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..3)).unwrap();
        assert!(matches!(p.remove(1, usize::MAX), Err(Error::OutOfRange { .. })));
        assert!(matches!(p.move_items(1, usize::MAX, 0), Err(Error::OutOfRange { .. })));
        assert!(matches!(p.move_items(0, 1, usize::MAX), Err(Error::OutOfRange { .. })));
        assert_eq!(p.remove(3, 0), Err(Error::OutOfRange { index: 3, count: 3 }));
        let first = p.get(0).cloned().unwrap();
        p.request_remove(&[first], Some(usize::MAX));
        assert_eq!(p.count(), 2);
    }

    #[test]
    fn unsuccessful_parse_leaves_items_alone() {
        let playlist = playlist();
        let mut p = playlist.lock();
        p.append(medias(0..2)).unwrap();
        let rx = record(&mut p);
        let media = p.get(1).unwrap().media().clone();

        let (state, player) = p.parts();
        for outcome in [ParseOutcome::Failed, ParseOutcome::Cancelled, ParseOutcome::TimedOut] {
            state.on_preparsed(player, &media, outcome);
        }
        assert!(drain(&rx).is_empty());

        let (state, player) = p.parts();
        state.on_preparsed(player, &media, ParseOutcome::Done(ParseResult::default()));
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].0, PlaylistEvent::ItemsUpdated { index: 1, .. }));
    }

    struct InstantParser;

    impl MediaParser for InstantParser {
        type Job = String;

        fn start(&self, media: &Media, _waker: ParseWaker) -> Option<String> {
            Some(media.uri().to_string())
        }

        fn is_done(&self, _job: &mut String) -> bool {
            true
        }

        fn finish(&self, uri: String) -> Option<ParseResult> {
            let subitems = uri.ends_with(".m3u").then(|| {
                MediaNode::with_children(
                    Media::new(uri.clone()),
                    vec![MediaNode::new(Media::new("sim://one")), MediaNode::new(Media::new("sim://two"))],
                )
            });
            Some(ParseResult {
                meta: MediaMeta { title: Some(format!("title of {}", uri)), ..MediaMeta::default() },
                subitems,
            })
        }
    }

    #[test]
    fn preparse_updates_and_expands() {
        let config = Config::default();
        let preparser = Preparser::new(&config.worker, InstantParser);
        let playlist = playlist_with(&config, &factory()).with_preparser(preparser);
        let (tx, rx) = unbounded();
        let (song, list) = {
            let mut p = playlist.lock();
            p.append(vec![Media::new("sim://song"), Media::new("sim://list.m3u"), Media::new("sim://end")])
                .unwrap();
            p.add_listener(
                move |event, status| {
                    let _ = tx.send((event.clone(), *status));
                },
                false,
            );
            (p.get(0).cloned().unwrap(), p.get(1).cloned().unwrap())
        };

        playlist.preparse(&song).unwrap();
        let (event, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, PlaylistEvent::ItemsUpdated { index: 0, .. }));
        assert_eq!(song.media().meta().title.as_deref(), Some("title of sim://song"));

        playlist.preparse(&list).unwrap();
        loop {
            let (event, status) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if let PlaylistEvent::ItemsAdded { index, items } = event {
                assert_eq!(index, 1);
                assert_eq!(items.len(), 2);
                assert_eq!(status.count, 4);
                break;
            }
        }
        let p = playlist.lock();
        assert_eq!(uris(&p), vec!["sim://song", "sim://one", "sim://two", "sim://end"]);
    }
}
