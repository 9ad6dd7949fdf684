//! Structural mutations: insert, move, remove, clear, expand.

use super::{PlaylistEvent, PlaylistItem, PlaylistState};
use crate::error::{log_err, Error, Result};
use crate::models::{Media, MediaNode, PlaybackOrder};
use crate::player::PlayerCore;

impl PlaylistState {
    pub(crate) fn insert(&mut self, player: &mut PlayerCore, index: usize, medias: Vec<Media>) -> Result<()> {
        if index > self.items.len() {
            return Err(Error::OutOfRange { index, count: self.items.len() });
        }
        if medias.is_empty() {
            return Ok(());
        }
        let items: Vec<PlaylistItem> = medias.into_iter().map(PlaylistItem::new).collect();
        let count = items.len();
        self.items.splice(index..index, items.iter().cloned());
        if self.order == PlaybackOrder::Random {
            self.randomizer.add(items.iter().cloned());
        }

        let before = self.snapshot();
        if let Some(current) = self.current.filter(|&current| current >= index) {
            self.current = Some(current + count);
        }
        self.recompute();
        self.invalidate_next_media(player);

        self.notify(PlaylistEvent::ItemsAdded { index, items });
        self.notify_changes(before);
        Ok(())
    }

    pub(crate) fn move_items(
        &mut self,
        player: &mut PlayerCore,
        index: usize,
        count: usize,
        target: usize,
    ) -> Result<()> {
        let len = self.items.len();
        block_end(index, count, len)?;
        block_end(target, count, len)?;
        if count == 0 || index == target {
            return Ok(());
        }
        let block: Vec<PlaylistItem> = self.items.drain(index..index + count).collect();
        self.items.splice(target..target, block);

        let before = self.snapshot();
        if let Some(current) = self.current {
            self.current = Some(if current >= index && current < index + count {
                current + target - index
            } else if current >= target && current < index {
                current + count
            } else if current >= index + count && current < target + count {
                current - count
            } else {
                current
            });
        }
        self.recompute();
        self.invalidate_next_media(player);

        self.notify(PlaylistEvent::ItemsMoved { index, count, target });
        self.notify_changes(before);
        Ok(())
    }

    pub(crate) fn remove(&mut self, player: &mut PlayerCore, index: usize, count: usize) -> Result<()> {
        let len = self.items.len();
        if index >= len {
            return Err(Error::OutOfRange { index, count: len });
        }
        let end = block_end(index, count, len)?;
        if count == 0 {
            return Ok(());
        }
        let removed: Vec<PlaylistItem> = self.items.drain(index..end).collect();
        if self.order == PlaybackOrder::Random {
            self.randomizer.remove(&removed);
        }

        let before = self.snapshot();
        let mut current_removed = false;
        if let Some(current) = self.current {
            if current >= index && current < index + count {
                // The item after the block, if any, takes over.
                self.current = (index < self.items.len()).then_some(index);
                current_removed = true;
            } else if current >= index + count {
                self.current = Some(current - count);
            }
        }

        if current_removed {
            log_err(self.play_index(player, self.current), "switching to the next item");
            if let (Some(current), PlaybackOrder::Random) = (self.current, self.order) {
                let item = self.items[current].clone();
                self.randomizer.select(&item);
            }
        }
        self.recompute();

        self.notify(PlaylistEvent::ItemsRemoved { index, count });
        self.notify_changes(before);
        if !current_removed {
            self.invalidate_next_media(player);
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self, player: &mut PlayerCore) {
        self.items.clear();
        log_err(player.set_current_media(None), "clearing the player media");
        self.items_reset(None);
    }

    /// Replace the whole content view: the randomizer restarts from the
    /// current item and listeners get the full item list.
    pub(super) fn items_reset(&mut self, current: Option<usize>) {
        if self.order == PlaybackOrder::Random {
            self.randomizer.clear();
            self.randomizer.add(self.items.iter().cloned());
            if let Some(item) = current.and_then(|index| self.items.get(index)).cloned() {
                self.randomizer.select(&item);
            }
        }

        let before = self.snapshot();
        self.current = current;
        self.recompute();

        self.notify(PlaylistEvent::ItemsReset(self.items.clone()));
        self.notify_changes(before);
    }

    /// Replace the item at `index` by the flattened sub-items of `node`.
    pub(crate) fn expand(&mut self, player: &mut PlayerCore, index: usize, node: &MediaNode) -> Result<()> {
        self.remove(player, index, 1)?;
        let medias = node.flatten();
        if medias.is_empty() {
            return Ok(());
        }
        self.insert(player, index, medias)
    }

    // ========================================================================
    // Requests from views that may be out of date
    // ========================================================================

    pub(crate) fn request_insert(&mut self, player: &mut PlayerCore, index: usize, medias: Vec<Media>) -> Result<()> {
        let index = index.min(self.items.len());
        self.insert(player, index, medias)
    }

    /// Remove the items still present, in contiguous slices.
    pub(crate) fn request_remove(
        &mut self,
        player: &mut PlayerCore,
        items: &[PlaylistItem],
        index_hint: Option<usize>,
    ) {
        let mut indices: Vec<usize> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.find(item, index_hint.and_then(|hint| hint.checked_add(i))))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        // Back to front so earlier indices stay valid.
        for (start, count) in slices(&indices).into_iter().rev() {
            log_err(self.remove(player, start, count), "removing a slice");
        }
    }

    /// Move the items still present so that they end up contiguous, in the
    /// given order, starting at `target` (clamped).
    pub(crate) fn request_move(
        &mut self,
        player: &mut PlayerCore,
        items: &[PlaylistItem],
        target: usize,
        index_hint: Option<usize>,
    ) {
        let mut found: Vec<usize> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if let Some(index) = self.find(item, index_hint.and_then(|hint| hint.checked_add(i))) {
                if !found.contains(&index) {
                    found.push(index);
                }
            }
        }
        let Some(&first) = found.first() else {
            return;
        };
        let count = found.len();
        let len = self.items.len();
        let target = target.min(len - count);

        let contiguous = found.iter().enumerate().all(|(offset, &index)| index == first + offset);
        if contiguous {
            log_err(self.move_items(player, first, count, target), "moving items");
            return;
        }

        // Gather the items at the tail in order, then move the block once.
        let picked: Vec<PlaylistItem> = found.iter().map(|&index| self.items[index].clone()).collect();
        for item in &picked {
            if let Some(index) = self.index_of(item) {
                log_err(self.move_items(player, index, 1, len - 1), "moving an item");
            }
        }
        log_err(self.move_items(player, len - count, count, target), "moving items");
    }
}

/// End of the block of `count` items at `index`, if it fits in `len`.
fn block_end(index: usize, count: usize, len: usize) -> Result<usize> {
    index
        .checked_add(count)
        .filter(|&end| end <= len)
        .ok_or(Error::OutOfRange { index: index.saturating_add(count), count: len })
}

/// Group sorted indices into `(start, count)` runs.
fn slices(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &index in indices {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == index => *count += 1,
            _ => runs.push((index, 1)),
        }
    }
    runs
}
