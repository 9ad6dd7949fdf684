//! Playback modes and cursor movement.
//!
//! Normal order walks the items by index; random order delegates to the
//! randomizer, which mirrors the items while the order is random.

use super::{PlaylistEvent, PlaylistItem, PlaylistState};
use crate::error::{Error, Result};
use crate::models::{Media, PlaybackOrder, PlaybackRepeat};
use crate::player::PlayerCore;

impl PlaylistState {
    pub fn playback_repeat(&self) -> PlaybackRepeat {
        self.repeat
    }

    pub fn playback_order(&self) -> PlaybackOrder {
        self.order
    }

    pub(crate) fn set_playback_repeat(&mut self, player: &mut PlayerCore, repeat: PlaybackRepeat) {
        if self.repeat == repeat {
            return;
        }
        let before = self.snapshot();
        self.repeat = repeat;
        self.randomizer.set_loop(repeat == PlaybackRepeat::All);
        self.recompute();

        self.notify(PlaylistEvent::PlaybackRepeatChanged(repeat));
        self.notify_changes(before);
        self.invalidate_next_media(player);
    }

    pub(crate) fn set_playback_order(&mut self, player: &mut PlayerCore, order: PlaybackOrder) {
        if self.order == order {
            return;
        }
        let before = self.snapshot();
        self.order = order;
        match order {
            PlaybackOrder::Random => {
                self.randomizer.add(self.items.iter().cloned());
                if let Some(item) = self.current_item().cloned() {
                    self.randomizer.select(&item);
                }
            }
            PlaybackOrder::Normal => self.randomizer.clear(),
        }
        self.recompute();

        self.notify(PlaylistEvent::PlaybackOrderChanged(order));
        self.notify_changes(before);
        self.invalidate_next_media(player);
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    pub(super) fn recompute(&mut self) {
        self.has_prev = self.compute_has_prev();
        self.has_next = self.compute_has_next();
    }

    pub(super) fn compute_has_prev(&self) -> bool {
        match self.order {
            PlaybackOrder::Random => self.randomizer.has_prev(),
            PlaybackOrder::Normal => match self.current {
                None => false,
                Some(_) if self.repeat == PlaybackRepeat::All => true,
                Some(current) => current > 0,
            },
        }
    }

    pub(super) fn compute_has_next(&self) -> bool {
        if self.repeat == PlaybackRepeat::All {
            return !self.items.is_empty();
        }
        match self.order {
            PlaybackOrder::Random => self.randomizer.has_next(),
            PlaybackOrder::Normal => self.current.map_or(0, |current| current + 1) < self.items.len(),
        }
    }

    fn prev_index(&self) -> Option<usize> {
        match self.order {
            PlaybackOrder::Random => self.randomizer.peek_prev().and_then(|item| self.index_of(item)),
            PlaybackOrder::Normal => {
                let current = self.current?;
                if current > 0 {
                    Some(current - 1)
                } else if self.repeat == PlaybackRepeat::All && !self.items.is_empty() {
                    Some(self.items.len() - 1)
                } else {
                    None
                }
            }
        }
    }

    /// May fix the next pick of the randomizer; never moves its cursors.
    fn next_index(&mut self) -> Option<usize> {
        match self.order {
            PlaybackOrder::Random => {
                let item = self.randomizer.peek_next()?.clone();
                self.index_of(&item)
            }
            PlaybackOrder::Normal => {
                let next = self.current.map_or(0, |current| current + 1);
                if next < self.items.len() {
                    Some(next)
                } else if self.repeat == PlaybackRepeat::All && !self.items.is_empty() {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    /// What the player should chain to after the current media.
    pub(super) fn next_media(&mut self) -> Option<Media> {
        if self.repeat == PlaybackRepeat::Current {
            return self.current_item().map(|item| item.media().clone());
        }
        if !self.compute_has_next() {
            return None;
        }
        let index = self.next_index()?;
        Some(self.items[index].media().clone())
    }

    // ========================================================================
    // Cursor
    // ========================================================================

    pub(super) fn set_current_index(&mut self, index: Option<usize>) {
        let before = self.snapshot();
        self.current = index;
        self.recompute();
        self.notify_changes(before);
    }

    /// Hand the media at `index` to the player.
    pub(super) fn play_index(&self, player: &mut PlayerCore, index: Option<usize>) -> Result<()> {
        let media = index.and_then(|index| self.items.get(index)).map(|item| item.media().clone());
        player.set_current_media(media)
    }

    pub(crate) fn prev(&mut self, player: &mut PlayerCore) -> Result<()> {
        if !self.compute_has_prev() {
            return Err(Error::NoPrev);
        }
        let index = self.prev_index().ok_or(Error::NoPrev)?;
        self.play_index(player, Some(index))?;
        if self.order == PlaybackOrder::Random {
            self.randomizer.prev();
        }
        self.set_current_index(Some(index));
        Ok(())
    }

    pub(crate) fn next(&mut self, player: &mut PlayerCore) -> Result<()> {
        if !self.compute_has_next() {
            return Err(Error::NoNext);
        }
        let index = self.next_index().ok_or(Error::NoNext)?;
        self.play_index(player, Some(index))?;
        if self.order == PlaybackOrder::Random {
            self.randomizer.next();
        }
        self.set_current_index(Some(index));
        Ok(())
    }

    pub(crate) fn goto(&mut self, player: &mut PlayerCore, index: Option<usize>) -> Result<()> {
        if let Some(index) = index {
            if index >= self.items.len() {
                return Err(Error::OutOfRange { index, count: self.items.len() });
            }
        }
        self.play_index(player, index)?;
        if let (Some(index), PlaybackOrder::Random) = (index, self.order) {
            let item = self.items[index].clone();
            self.randomizer.select(&item);
        }
        self.set_current_index(index);
        Ok(())
    }

    /// Go to `item`, wherever it is now. `index_hint` is where the caller
    /// last saw it.
    pub(crate) fn request_goto(
        &mut self,
        player: &mut PlayerCore,
        item: Option<&PlaylistItem>,
        index_hint: Option<usize>,
    ) -> Result<()> {
        let index = match item {
            None => None,
            Some(item) => Some(self.find(item, index_hint).ok_or(Error::ItemNotFound)?),
        };
        self.goto(player, index)
    }

    /// Locate an item, trying the hint first.
    pub(super) fn find(&self, item: &PlaylistItem, index_hint: Option<usize>) -> Option<usize> {
        match index_hint {
            Some(hint) if self.items.get(hint) == Some(item) => Some(hint),
            _ => self.index_of(item),
        }
    }
}
