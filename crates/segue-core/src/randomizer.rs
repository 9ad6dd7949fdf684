//! Shuffle cursor for random playback order.
//!
//! The randomizer mirrors the playlist items in its own vector, split in
//! three by two cursors:
//!
//! ```text
//!   0        next      head           len
//!   |--------|---------|---------------|
//!    history  decided   undecided
//!             (ahead)
//! ```
//!
//! Items before `head` have already been picked by the incremental
//! Fisher-Yates shuffle (or selected explicitly); items after are still in
//! the hat. The current item is `items[next - 1]`. Going forward reads
//! `items[next]`, picking one more undecided item when `next == head`;
//! going backward walks the decided region in reverse. Items may be added
//! or removed at any time without breaking either traversal.
//!
//! In loop mode, once a pass is exhausted, the first item of the next pass
//! is picked ahead of time and kept aside; the history of the finished pass
//! stays reachable with `prev()` until `next()` actually starts the new one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Randomizer<T> {
    items: Vec<T>,
    head: usize,
    next: usize,
    looping: bool,
    /// First item of the next pass, once peeked.
    upcoming: Option<T>,
    rng: StdRng,
}

impl<T: Clone + PartialEq> Randomizer<T> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic shuffle sequence, for tests and reproducible demos.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            items: Vec::new(),
            head: 0,
            next: 0,
            looping: false,
            upcoming: None,
            rng,
        }
    }

    /// In loop mode a new pass starts whenever the current one is exhausted.
    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        self.upcoming = None;
    }

    pub fn is_loop(&self) -> bool {
        self.looping
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.position(item).is_some()
    }

    fn position(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|i| i == item)
    }

    pub fn has_prev(&self) -> bool {
        self.next > 1
    }

    pub fn has_next(&self) -> bool {
        if self.looping {
            !self.items.is_empty()
        } else {
            self.next < self.items.len()
        }
    }

    /// Item that `prev()` would return.
    pub fn peek_prev(&self) -> Option<&T> {
        if !self.has_prev() {
            return None;
        }
        self.items.get(self.next - 2)
    }

    /// Item that `next()` would return.
    ///
    /// Never moves `next`, so `has_prev()` and `has_next()` are unchanged.
    /// When the next item is still undecided it is fixed here, so that the
    /// following `next()` returns the same one.
    pub fn peek_next(&mut self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        if self.next == self.items.len() {
            if !self.looping {
                return None;
            }
            if self.upcoming.is_none() {
                // Avoid replaying the last item of the pass right away.
                let last = self.items.len() - 1;
                let pick = if last == 0 { 0 } else { self.rng.random_range(0..last) };
                self.upcoming = Some(self.items[pick].clone());
            }
            return self.upcoming.as_ref();
        }
        if self.next == self.head {
            self.determine_one();
        }
        self.items.get(self.next)
    }

    pub fn next(&mut self) -> Option<T> {
        let item = self.peek_next()?.clone();
        if self.next == self.items.len() {
            self.reshuffle();
            self.select(&item);
        } else {
            self.next += 1;
        }
        Some(item)
    }

    pub fn prev(&mut self) -> Option<T> {
        if !self.has_prev() {
            return None;
        }
        self.next -= 1;
        Some(self.items[self.next - 1].clone())
    }

    /// Make `item` the current one after an explicit jump.
    ///
    /// The item is moved to the end of the decided region and `next` points
    /// right after it, so the items picked afterwards are neither skipped
    /// nor played twice.
    pub fn select(&mut self, item: &T) -> bool {
        let Some(index) = self.position(item) else {
            return false;
        };
        if index >= self.head {
            self.items.swap(index, self.head);
            self.head += 1;
        } else {
            self.items[index..self.head].rotate_left(1);
        }
        self.next = self.head;
        self.upcoming = None;
        true
    }

    pub fn add(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.extend(items);
        self.upcoming = None;
    }

    pub fn remove(&mut self, items: &[T]) {
        for item in items {
            self.remove_one(item);
        }
    }

    pub fn remove_one(&mut self, item: &T) -> bool {
        let Some(index) = self.position(item) else {
            return false;
        };
        if self.upcoming.as_ref() == Some(item) {
            self.upcoming = None;
        }
        if index < self.head {
            // Keep the history order: bubble the item to the end of the
            // decided region, then drop it there.
            self.items[index..self.head].rotate_left(1);
            self.head -= 1;
            self.items.swap_remove(self.head);
            if index < self.next {
                self.next -= 1;
            }
        } else {
            self.items.swap_remove(index);
        }
        true
    }

    /// Forget every decision; the next pass starts from scratch.
    pub fn reshuffle(&mut self) {
        self.head = 0;
        self.next = 0;
        self.upcoming = None;
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.reshuffle();
    }

    fn determine_one(&mut self) {
        debug_assert!(self.head < self.items.len());
        let pick = self.rng.random_range(self.head..self.items.len());
        self.items.swap(self.head, pick);
        self.head += 1;
    }
}

impl<T: Clone + PartialEq> Default for Randomizer<T> {
    fn default() -> Self {
        Self::new()
    }
}
